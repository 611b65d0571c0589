use rs_ebooks_core::Config;
use rs_ebooks_core::model::{Model, StatementInput};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    // Load 'rs-ebooks.yml' from the working directory if present, defaults otherwise
    let config = Config::load(None)?;

    // Open (or create) the model stored in ./model/exemple/model.sqlite3
    let model = Model::open("./model", "exemple", config)?;

    // Consume every .txt corpus of the "data" directory (one text per line).
    // Sentences already stored are skipped
    let report = model.consume_dir("./data", "txt")?;
    println!("{:?}", report);
    println!(
        "Model {} holds {} statements and {} mentions",
        model.dir().display(),
        model.statements().len()?,
        model.mentions().len()?
    );

    // Top keywords of the corpus
    let keywords = model.keywords()?;
    println!("Keywords: {}", keywords.iter().take(10).cloned().collect::<Vec<_>>().join(", "));

    // Statement parameters
    let mut input = StatementInput::default();

    // Number of attempts before giving up. The first half splices on shared
    // token pairs, the second half on single shared tokens
    input.retry_limit = 100;

    // Generated statements must have more tokens than this
    input.min_length = 3;

    // Maximum length of a statement, in characters (must be positive)
    input.set_limit(140)?;

    match input.set_limit(0) {
        Ok(_) => println!("Should not happen"),
        Err(_) => println!("A limit of 0 is invalid"),
    }

    // Generate 10 statements
    let mut rng = rand::rng();
    for i in 0..10 {
        match model.statement(&mut rng, &input)? {
            Some(text) => println!("Generated statement {}: {}", i + 1, text),
            None => println!("Generated statement {}: <no valid statement>", i + 1),
        }
    }

    // Respond to some input, preferring related mentions
    if let Some(response) = model.make_response(&mut rng, "what do you think?", &input)? {
        println!("Response: {}", response);
    }

    Ok(())
}
