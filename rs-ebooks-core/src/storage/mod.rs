//! Persistent, transactional storage: an ordered byte store and the nested
//! arrays and maps built on top of it.

pub mod codec;
pub mod container;
pub mod store;

pub use codec::{Path, Segment, pack, unpack};
pub use container::{Entry, PersistentArray, PersistentMap, Value};
pub use store::{Cursor, Store, with_growth_retry};
