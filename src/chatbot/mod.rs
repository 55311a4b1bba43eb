//! Chatbot module - relays chat messages to Gemini and replies.

pub mod credentials;
pub mod gemini;
pub mod handler;
pub mod image;
pub mod message;
pub mod session;
pub mod supervisor;
pub mod telegram;
pub mod transport;


pub use credentials::CredentialStore;
pub use gemini::GeminiClient;
pub use handler::MessageHandler;
pub use session::ConversationSession;
pub use supervisor::ConnectionSupervisor;
pub use telegram::{TelegramCredentials, TelegramTransport};
