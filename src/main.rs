mod chatbot;
mod config;
mod logger;

use tracing::{error, info};

use chatbot::{
    ConnectionSupervisor, ConversationSession, CredentialStore, GeminiClient, MessageHandler,
    TelegramCredentials, TelegramTransport,
};
use config::Config;

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let _guard = logger::init(config.log_dir.as_deref());

    info!("🚀 Starting chatrelay...");
    info!("Model: {}, history limit: {}", config.model, config.history_limit);

    let model = match GeminiClient::new(config.api_key.clone(), config.model.clone()) {
        Ok(model) => model,
        Err(e) => {
            error!("Failed to create Gemini client: {e}");
            std::process::exit(1);
        }
    };

    let handler = MessageHandler::new(
        model,
        ConversationSession::new(config.history_limit),
        config.command_prefix.clone(),
    );
    let mut supervisor = ConnectionSupervisor::new(
        TelegramTransport::new(config.poll_timeout_secs),
        CredentialStore::new(&config.auth_dir),
        handler,
        config.reconnect.clone(),
    )
    .with_configured_credentials(config.telegram_bot_token.clone().map(TelegramCredentials::new));

    tokio::select! {
        result = supervisor.run() => {
            if let Err(e) = result {
                error!("{e}");
                std::process::exit(1);
            }
            info!("Supervisor stopped");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl-C, shutting down");
        }
    }
}
