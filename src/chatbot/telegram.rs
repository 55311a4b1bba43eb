//! Telegram transport using teloxide long polling.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{FileId, Update, UpdateKind};
use teloxide::{ApiError, RequestError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::chatbot::message::{ChatAddress, ImageRef, InboundMessage, MessageContent};
use crate::chatbot::transport::{
    Connection, ConnectionUpdate, DisconnectReason, Messenger, Transport, TransportError,
    TransportEvent,
};

/// Telegram rejects longer messages.
pub const MAX_MESSAGE_CHARS: usize = 4096;

const EVENT_BUFFER: usize = 64;

/// Consecutive failed polls before the connection is reported lost.
const MAX_POLL_FAILURES: u32 = 5;
const POLL_BACKOFF_BASE: Duration = Duration::from_secs(1);
const POLL_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Bot token plus the long-polling offset, persisted between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelegramCredentials {
    pub bot_token: String,
    #[serde(default)]
    pub next_update_id: i32,
}

impl TelegramCredentials {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            next_update_id: 0,
        }
    }

    /// Numeric bot id, the part of the token before the colon.
    fn bot_id(&self) -> &str {
        self.bot_token.split(':').next().unwrap_or_default()
    }

    /// Stored credentials overlaid with a configured token.
    ///
    /// A different token replaces the stored one. The poll offset survives
    /// only when both tokens belong to the same bot.
    pub fn reconcile(self, configured: &TelegramCredentials) -> TelegramCredentials {
        if self.bot_token == configured.bot_token {
            return self;
        }
        let next_update_id = if self.bot_id() == configured.bot_id() {
            self.next_update_id
        } else {
            0
        };
        info!("Configured bot token differs from the stored one, using the configured token");
        TelegramCredentials {
            bot_token: configured.bot_token.clone(),
            next_update_id,
        }
    }
}

pub struct TelegramTransport {
    poll_timeout_secs: u32,
}

impl TelegramTransport {
    pub fn new(poll_timeout_secs: u32) -> Self {
        Self { poll_timeout_secs }
    }
}

impl Transport for TelegramTransport {
    type Credentials = TelegramCredentials;
    type Messenger = TelegramMessenger;

    async fn connect(
        &self,
        credentials: TelegramCredentials,
    ) -> Result<Connection<TelegramMessenger, TelegramCredentials>, TransportError> {
        if credentials.bot_token.is_empty() {
            return Err(TransportError::Other("bot token is empty".to_string()));
        }

        let bot = Bot::new(&credentials.bot_token);
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(poll_updates(bot.clone(), credentials, self.poll_timeout_secs, tx));

        Ok(Connection {
            messenger: Arc::new(TelegramMessenger { bot }),
            events: rx,
        })
    }

    fn reconcile_credentials(
        &self,
        stored: TelegramCredentials,
        configured: &TelegramCredentials,
    ) -> TelegramCredentials {
        stored.reconcile(configured)
    }
}

/// Bot API calls the poll loop depends on.
trait UpdateSource: Send + Sync + 'static {
    /// Identity check run once per connection; returns a display name.
    fn handshake(&self) -> impl Future<Output = Result<String, RequestError>> + Send;

    fn fetch(&self, offset: i32, timeout_secs: u32) -> impl Future<Output = Result<Vec<Update>, RequestError>> + Send;
}

impl UpdateSource for Bot {
    async fn handshake(&self) -> Result<String, RequestError> {
        let me = self.get_me().await?;
        Ok(format!("@{} ({})", me.username(), me.id))
    }

    async fn fetch(&self, offset: i32, timeout_secs: u32) -> Result<Vec<Update>, RequestError> {
        self.get_updates().offset(offset).timeout(timeout_secs).await
    }
}

/// Delay between failed polls. Doubles per consecutive failure.
#[derive(Debug, Default)]
struct PollBackoff {
    failures: u32,
}

impl PollBackoff {
    /// Register a failure. `None` means the connection should be given up.
    fn on_failure(&mut self) -> Option<Duration> {
        self.failures += 1;
        if self.failures >= MAX_POLL_FAILURES {
            return None;
        }
        let delay = POLL_BACKOFF_BASE.saturating_mul(1 << (self.failures - 1));
        Some(delay.min(POLL_BACKOFF_MAX))
    }

    fn reset(&mut self) {
        self.failures = 0;
    }
}

/// Long-poll loop feeding one connection's event channel.
///
/// Ends after sending `Closed`, or when the receiver is dropped.
async fn poll_updates<S: UpdateSource>(
    source: S,
    mut credentials: TelegramCredentials,
    timeout_secs: u32,
    tx: mpsc::Sender<TransportEvent<TelegramCredentials>>,
) {
    if !notify(&tx, ConnectionUpdate::Connecting).await {
        return;
    }

    match source.handshake().await {
        Ok(name) => {
            info!("Logged in as {name}");
            if !notify(&tx, ConnectionUpdate::Open).await {
                return;
            }
        }
        Err(e) => {
            let reason = disconnect_reason(&e).unwrap_or_else(|| DisconnectReason::ConnectionLost(e.to_string()));
            notify(&tx, ConnectionUpdate::Closed(reason)).await;
            return;
        }
    }

    let mut backoff = PollBackoff::default();
    loop {
        let updates = match source.fetch(credentials.next_update_id, timeout_secs).await {
            Ok(updates) => {
                backoff.reset();
                updates
            }
            Err(RequestError::RetryAfter(secs)) => {
                let detail = format!("rate limited, retrying in {secs:?}");
                if !notify(&tx, ConnectionUpdate::Error(detail)).await {
                    return;
                }
                tokio::time::sleep(secs.duration()).await;
                continue;
            }
            Err(e) => {
                if let Some(reason) = disconnect_reason(&e) {
                    notify(&tx, ConnectionUpdate::Closed(reason)).await;
                    return;
                }
                let Some(delay) = backoff.on_failure() else {
                    let detail = format!("{MAX_POLL_FAILURES} polls failed in a row, last: {e}");
                    notify(&tx, ConnectionUpdate::Closed(DisconnectReason::ConnectionLost(detail))).await;
                    return;
                };
                let detail = format!("{e}, polling again in {} ms", delay.as_millis());
                if !notify(&tx, ConnectionUpdate::Error(detail)).await {
                    return;
                }
                tokio::time::sleep(delay).await;
                continue;
            }
        };

        if updates.is_empty() {
            continue;
        }
        debug!("Received {} update(s)", updates.len());

        for update in updates {
            credentials.next_update_id = update.id.0 as i32 + 1;
            let UpdateKind::Message(ref msg) = update.kind else {
                continue;
            };
            let event = TransportEvent::Messages(vec![inbound_from_message(msg)]);
            if tx.send(event).await.is_err() {
                return;
            }
        }

        if tx.send(TransportEvent::Credentials(credentials.clone())).await.is_err() {
            return;
        }
    }
}

/// False once the supervisor has dropped the receiver.
async fn notify(tx: &mpsc::Sender<TransportEvent<TelegramCredentials>>, update: ConnectionUpdate) -> bool {
    tx.send(TransportEvent::Connection(update)).await.is_ok()
}

/// Errors that end the connection. Anything else is reported and polling continues.
fn disconnect_reason(e: &RequestError) -> Option<DisconnectReason> {
    match e {
        RequestError::Api(ApiError::InvalidToken) => Some(DisconnectReason::LoggedOut),
        RequestError::Network(_) | RequestError::Io(_) => {
            Some(DisconnectReason::ConnectionLost(e.to_string()))
        }
        _ => None,
    }
}

fn inbound_from_message(msg: &Message) -> InboundMessage {
    let content = if let Some(photos) = msg.photo() {
        // Sizes are ordered smallest first.
        photos.last().map(|photo| MessageContent::Image {
            image: ImageRef {
                id: photo.file.id.0.clone(),
            },
            caption: msg.caption().map(str::to_string),
        })
    } else if let Some(text) = msg.text() {
        let extended = msg.reply_to_message().is_some()
            || msg.entities().is_some_and(|entities| !entities.is_empty());
        if extended {
            Some(MessageContent::ExtendedText(text.to_string()))
        } else {
            Some(MessageContent::Conversation(text.to_string()))
        }
    } else {
        Some(MessageContent::Other)
    };

    let sender = msg.from.as_ref().map(|user| {
        user.username
            .clone()
            .unwrap_or_else(|| user.first_name.clone())
    });

    InboundMessage {
        id: msg.id.0.to_string(),
        chat: ChatAddress(msg.chat.id.0.to_string()),
        sender,
        content,
    }
}

/// Split `text` into pieces of at most `max_chars` characters, preferring line breaks.
pub fn split_message(text: &str, max_chars: usize) -> Vec<&str> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;

    while rest.chars().count() > max_chars {
        let hard_end = rest
            .char_indices()
            .nth(max_chars)
            .map(|(idx, _)| idx)
            .unwrap_or(rest.len());
        let end = match rest[..hard_end].rfind('\n') {
            Some(idx) if idx > 0 => idx + 1,
            _ => hard_end,
        };
        chunks.push(&rest[..end]);
        rest = &rest[end..];
    }

    chunks.push(rest);
    chunks
}

/// Outbound side of a Telegram connection.
pub struct TelegramMessenger {
    bot: Bot,
}

impl Messenger for TelegramMessenger {
    async fn send_text(&self, chat: &ChatAddress, text: &str) -> Result<(), TransportError> {
        let chat_id = chat
            .0
            .parse::<i64>()
            .map(ChatId)
            .map_err(|_| TransportError::InvalidAddress(chat.0.clone()))?;

        for chunk in split_message(text, MAX_MESSAGE_CHARS) {
            self.bot.send_message(chat_id, chunk).await.map_err(|e| {
                warn!("Failed to send: {e}");
                TransportError::from(e)
            })?;
        }
        Ok(())
    }

    fn download_image(&self, image: &ImageRef) -> BoxStream<'static, Result<Vec<u8>, TransportError>> {
        let bot = self.bot.clone();
        let file_id = FileId(image.id.clone());

        stream::once(async move {
            let file = bot.get_file(file_id).await?;
            debug!("Streaming {} ({} bytes)", file.path, file.size);
            let chunks = bot
                .download_file_stream(&file.path)
                .map_ok(|chunk| chunk.to_vec())
                .map_err(TransportError::from);
            Ok::<_, TransportError>(chunks)
        })
        .try_flatten()
        .boxed()
    }
}
