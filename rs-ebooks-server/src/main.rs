use std::sync::Mutex;

use actix_cors::Cors;
use actix_web::{App, HttpResponse, HttpServer, Responder, get, middleware, put, web};
use log::{error, info, warn};
use serde::Deserialize;

use rs_ebooks_core::Config;
use rs_ebooks_core::io::list_models;
use rs_ebooks_core::model::{Model, StatementInput};

/// Directory holding one sub-directory per model.
const MODEL_ROOT: &str = "./model";

/// Query parameters shared by `/v1/generate` and `/v1/respond`
#[derive(Deserialize)]
struct GenerateParams {
	passes: Option<usize>,
	limit: Option<usize>,
	retry_limit: Option<usize>,
	min_length: Option<usize>,
}

#[derive(Deserialize)]
struct RespondParams {
	input: Option<String>,
	passes: Option<usize>,
	limit: Option<usize>,
	retry_limit: Option<usize>,
	min_length: Option<usize>,
}

#[derive(Deserialize)]
struct ModelQuery {
	name: Option<String>,
}

struct SharedData {
	config: Config,
	model: Option<Model>,
}

impl GenerateParams {
	fn statement_input(&self) -> Result<StatementInput, String> {
		statement_input(self.passes, self.limit, self.retry_limit, self.min_length)
	}
}

impl RespondParams {
	fn statement_input(&self) -> Result<StatementInput, String> {
		statement_input(self.passes, self.limit, self.retry_limit, self.min_length)
	}
}

/// Builds a `StatementInput`, keeping defaults for missing parameters.
fn statement_input(
	passes: Option<usize>,
	limit: Option<usize>,
	retry_limit: Option<usize>,
	min_length: Option<usize>,
) -> Result<StatementInput, String> {
	let mut input = StatementInput::default();
	if let Some(passes) = passes {
		input.passes = passes;
	}
	if let Some(retry_limit) = retry_limit {
		input.retry_limit = retry_limit;
	}
	if let Some(min_length) = min_length {
		input.min_length = min_length;
	}
	if let Some(limit) = limit {
		input.set_limit(limit).map_err(|e| e.to_string())?;
	}
	Ok(input)
}

/// Turns a generation result into a response: the text, or 204 when every
/// attempt was rejected.
fn generated(result: rs_ebooks_core::Result<Option<String>>) -> HttpResponse {
	match result {
		Ok(Some(text)) => HttpResponse::Ok().body(text),
		Ok(None) => HttpResponse::NoContent().finish(),
		Err(e) if e.is_corruption() => {
			error!("Model data is corrupt: {e}");
			HttpResponse::InternalServerError().body(e.to_string())
		}
		Err(e) => {
			warn!("Generation failed: {e}");
			HttpResponse::InternalServerError().body(e.to_string())
		}
	}
}

/// HTTP GET endpoint `/v1/generate`
///
/// Generates a statement from the loaded model.
#[get("/v1/generate")]
async fn get_generated(data: web::Data<Mutex<SharedData>>, query: web::Query<GenerateParams>) -> impl Responder {
	let input = match query.statement_input() {
		Ok(input) => input,
		Err(e) => return HttpResponse::BadRequest().body(e),
	};

	let shared_data = match data.lock() {
		Ok(m) => m,
		Err(_) => return HttpResponse::InternalServerError().body("Model lock failed"),
	};
	let Some(model) = &shared_data.model else {
		return HttpResponse::BadRequest().body("No model loaded");
	};

	generated(model.statement(&mut rand::rng(), &input))
}

/// HTTP GET endpoint `/v1/respond`
///
/// Generates a response to `input`, built from related sentences when the
/// model has enough of them.
#[get("/v1/respond")]
async fn get_response(data: web::Data<Mutex<SharedData>>, query: web::Query<RespondParams>) -> impl Responder {
	let text = match &query.input {
		Some(s) if !s.trim().is_empty() => s.trim(),
		_ => return HttpResponse::BadRequest().body("Missing or empty input"),
	};
	let input = match query.statement_input() {
		Ok(input) => input,
		Err(e) => return HttpResponse::BadRequest().body(e),
	};

	let shared_data = match data.lock() {
		Ok(m) => m,
		Err(_) => return HttpResponse::InternalServerError().body("Model lock failed"),
	};
	let Some(model) = &shared_data.model else {
		return HttpResponse::BadRequest().body("No model loaded");
	};

	generated(model.make_response(&mut rand::rng(), text, &input))
}

#[get("/v1/models")]
async fn get_models() -> impl Responder {
	match list_models(MODEL_ROOT) {
		Ok(models) => HttpResponse::Ok().body(models.join("\n")),
		Err(_) => HttpResponse::InternalServerError().body("Failed to list models"),
	}
}

#[get("/v1/loaded_model")]
async fn get_loaded_model(data: web::Data<Mutex<SharedData>>) -> impl Responder {
	let shared_data = match data.lock() {
		Ok(m) => m,
		Err(_) => return HttpResponse::InternalServerError().body("Model lock failed"),
	};
	match &shared_data.model {
		Some(model) => HttpResponse::Ok().body(model.name().to_owned()),
		None => HttpResponse::NotFound().body("No model loaded"),
	}
}

#[put("/v1/load_model")]
async fn put_model(data: web::Data<Mutex<SharedData>>, query: web::Query<ModelQuery>) -> impl Responder {
	let name = match &query.name {
		Some(s) if !s.trim().is_empty() => s.trim(),
		_ => return HttpResponse::BadRequest().body("Missing or empty model name"),
	};

	match list_models(MODEL_ROOT) {
		Ok(models) if models.iter().any(|m| m == name) => (),
		Ok(_) => return HttpResponse::NotFound().body(format!("Unknown model: {name}")),
		Err(_) => return HttpResponse::InternalServerError().body("Failed to list models"),
	}

	let mut shared_data = match data.lock() {
		Ok(m) => m,
		Err(_) => return HttpResponse::InternalServerError().body("Model lock failed"),
	};

	match Model::open(MODEL_ROOT, name, shared_data.config) {
		Ok(model) => {
			info!("Loaded model {name}");
			shared_data.model = Some(model);
			HttpResponse::Ok().body("Model loaded successfully")
		}
		Err(e) => HttpResponse::InternalServerError().body(format!("Failed to load model: {e}")),
	}
}

/// Main entry point for the server.
///
/// Reads the configuration, starts without a loaded model and serves the
/// API on 127.0.0.1:5000 with permissive CORS.
#[actix_web::main]
async fn main() -> std::io::Result<()> {
	env_logger::init();

	let config = Config::load(None).map_err(|e| std::io::Error::other(e.to_string()))?;
	let shared_data = SharedData { config, model: None };
	let shared_model = web::Data::new(Mutex::new(shared_data));

	info!("Serving models from {MODEL_ROOT} on 127.0.0.1:5000");
	HttpServer::new(move || {
		App::new()
			.wrap(middleware::Logger::default())
			.wrap(Cors::permissive())
			.app_data(shared_model.clone())
			.service(get_generated)
			.service(get_response)
			.service(get_models)
			.service(put_model)
			.service(get_loaded_model)
	})
		.bind(("127.0.0.1", 5000))?
		.run()
		.await
}
