//! Contracts between the relay and a messaging transport.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::stream::BoxStream;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use crate::chatbot::message::{ChatAddress, ImageRef, InboundMessage};

/// Errors raised by a transport or its messenger.
#[derive(Debug)]
pub enum TransportError {
    /// A Bot API request failed.
    Request(teloxide::RequestError),
    /// Streaming a file download failed.
    Download(reqwest::Error),
    /// A chat address could not be understood by the transport.
    InvalidAddress(String),
    /// Anything else the transport reports.
    Other(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request(e) => write!(f, "request failed: {e}"),
            Self::Download(e) => write!(f, "download failed: {e}"),
            Self::InvalidAddress(addr) => write!(f, "invalid chat address '{addr}'"),
            Self::Other(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Request(e) => Some(e),
            Self::Download(e) => Some(e),
            Self::InvalidAddress(_) | Self::Other(_) => None,
        }
    }
}

impl From<teloxide::RequestError> for TransportError {
    fn from(e: teloxide::RequestError) -> Self {
        Self::Request(e)
    }
}

/// File URLs embed the bot token, so it is stripped before the error is kept.
impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        Self::Download(e.without_url())
    }
}

/// Connection lifecycle as seen by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// Why a connection closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Credentials were rejected for good; reconnecting is pointless.
    LoggedOut,
    /// Network or protocol failure.
    ConnectionLost(String),
    /// The event stream ended without a close notification.
    StreamEnded,
}

impl DisconnectReason {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::LoggedOut)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoggedOut => f.write_str("logged out"),
            Self::ConnectionLost(detail) => write!(f, "connection lost: {detail}"),
            Self::StreamEnded => f.write_str("event stream ended"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionUpdate {
    Connecting,
    Open,
    Closed(DisconnectReason),
    /// Reported problem that does not change the connection state.
    Error(String),
}

/// Everything a live connection reports, in delivery order.
#[derive(Debug, Clone)]
pub enum TransportEvent<C> {
    Connection(ConnectionUpdate),
    Credentials(C),
    Messages(Vec<InboundMessage>),
}

/// Outbound half of a connection.
pub trait Messenger: Send + Sync {
    fn send_text(
        &self,
        chat: &ChatAddress,
        text: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Chunks of the (decrypted) image payload in arrival order.
    fn download_image(&self, image: &ImageRef) -> BoxStream<'static, Result<Vec<u8>, TransportError>>;
}

/// A live session: the messenger to reply through and the event feed.
pub struct Connection<M, C> {
    pub messenger: Arc<M>,
    pub events: mpsc::Receiver<TransportEvent<C>>,
}

/// Session factory.
pub trait Transport: Send + Sync {
    type Credentials: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;
    type Messenger: Messenger + 'static;

    fn connect(
        &self,
        credentials: Self::Credentials,
    ) -> impl Future<Output = Result<Connection<Self::Messenger, Self::Credentials>, TransportError>> + Send;

    /// Credentials to connect with when both a stored and a configured value exist.
    fn reconcile_credentials(&self, stored: Self::Credentials, _configured: &Self::Credentials) -> Self::Credentials {
        stored
    }
}
