pub mod commands;
pub mod error;
pub mod gemini;
pub mod history;
pub mod imaging;
pub mod mask;
pub mod models;
pub mod prompt;
pub mod session;
pub mod storage;

pub use error::{AppError, AppResult, GenerationError};
pub use session::Session;

use commands::Cli;
use gemini::{GeminiConfig, GeminiGateway};
use storage::{JsonProjectStore, StoreConfig};

/// Opens the saved session and runs one command-line request against it.
pub async fn run(cli: Cli) -> AppResult<()> {
    let store_config = match cli.data_dir {
        Some(data_dir) => StoreConfig { data_dir },
        None => StoreConfig::from_env()?,
    };
    let store = JsonProjectStore::open(&store_config)?;
    tracing::debug!(data_dir = %store.root().display(), "using project store");

    let gateway = GeminiGateway::new(GeminiConfig::from_env());
    let config = gateway.config();
    tracing::debug!(model = %config.model, endpoint = %config.endpoint(), "using gemini");
    if config.api_key.is_none() {
        tracing::debug!("no Gemini API key configured; edits will fail");
    }

    let session = Session::open(store, gateway);
    commands::execute(&session, cli.command).await
}

pub fn load_env_files() {
    let _ = dotenvy::from_filename(".env");
    let _ = dotenvy::from_filename("../.env");
}
