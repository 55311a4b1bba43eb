//! Message handler - turns inbound messages into model calls and replies.

use std::fmt;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::chatbot::gemini::{LanguageModel, ModelError, Part};
use crate::chatbot::image::fetch_image;
use crate::chatbot::message::{ChatAddress, InboundMessage};
use crate::chatbot::session::ConversationSession;
use crate::chatbot::transport::{Messenger, TransportError};
use crate::logger::success;

pub const RESET_COMMAND: &str = "reset";
pub const RESET_REPLY: &str = "Chat history has been reset.";
pub const APOLOGY_REPLY: &str = "Sorry, I encountered an error while processing your request.";

/// What happened to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Empty batch, no content, or not actionable.
    Ignored,
    Reset,
    Replied,
    /// Something failed and the user got the apology.
    Apologized,
}

#[derive(Debug)]
enum RelayError {
    Model(ModelError),
    Send(TransportError),
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Model(e) => write!(f, "model call failed: {e}"),
            Self::Send(e) => write!(f, "sending reply failed: {e}"),
        }
    }
}

pub struct MessageHandler<M> {
    model: M,
    session: Mutex<ConversationSession>,
    prefix: String,
}

impl<M: LanguageModel> MessageHandler<M> {
    pub fn new(model: M, session: ConversationSession, prefix: impl Into<String>) -> Self {
        Self {
            model,
            session: Mutex::new(session),
            prefix: prefix.into(),
        }
    }

    pub fn session(&self) -> &Mutex<ConversationSession> {
        &self.session
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Handle a delivered batch. Only the first message is looked at.
    pub async fn handle_batch<S: Messenger>(&self, messenger: &S, batch: &[InboundMessage]) -> HandleOutcome {
        let Some(first) = batch.first() else {
            return HandleOutcome::Ignored;
        };
        if batch.len() > 1 {
            warn!("Batch of {} messages, only the first is processed", batch.len());
        }
        self.handle_message(messenger, first).await
    }

    pub async fn handle_message<S: Messenger>(&self, messenger: &S, msg: &InboundMessage) -> HandleOutcome {
        let Some(ref content) = msg.content else {
            return HandleOutcome::Ignored;
        };

        debug!("Message {} in chat {}", msg.id, msg.chat);
        let extracted = content.extract();
        info!("Message received: {}", extracted.text);

        let Some(command) = extracted.command(&self.prefix) else {
            return HandleOutcome::Ignored;
        };

        // Held for the whole exchange so concurrent calls never interleave history updates.
        let mut session = self.session.lock().await;

        if command == RESET_COMMAND {
            session.clear();
            info!("Chat history reset by {}", msg.sender.as_deref().unwrap_or("unknown"));
            if let Err(e) = messenger.send_text(&msg.chat, RESET_REPLY).await {
                error!("Failed to send reset confirmation: {e}");
            }
            return HandleOutcome::Reset;
        }

        info!("Processing query: {command}");

        let image = match content.image() {
            Some(image_ref) => {
                let image = fetch_image(messenger, image_ref).await;
                if image.is_some() {
                    info!("Image downloaded successfully");
                }
                image
            }
            None => None,
        };

        match self.respond(messenger, &msg.chat, &mut session, &command, image).await {
            Ok(()) => HandleOutcome::Replied,
            Err(e) => {
                error!("Error generating response: {e}");
                if let Err(e) = messenger.send_text(&msg.chat, APOLOGY_REPLY).await {
                    error!("Failed to send apology: {e}");
                }
                HandleOutcome::Apologized
            }
        }
    }

    async fn respond<S: Messenger>(
        &self,
        messenger: &S,
        chat: &ChatAddress,
        session: &mut ConversationSession,
        command: &str,
        image: Option<Vec<u8>>,
    ) -> Result<(), RelayError> {
        let parts = match image {
            // Image prompts never carry history.
            Some(bytes) => vec![Part::jpeg(&bytes), Part::text(command)],
            None => session
                .entries()
                .map(|entry| Part::text(entry.text.clone()))
                .chain(std::iter::once(Part::text(command)))
                .collect(),
        };

        let reply = self
            .model
            .generate_content(parts)
            .await
            .map_err(RelayError::Model)?;

        session.record_exchange(command, &reply);
        success!("Generated response: {reply}");

        messenger
            .send_text(chat, &reply)
            .await
            .map_err(RelayError::Send)
    }
}
