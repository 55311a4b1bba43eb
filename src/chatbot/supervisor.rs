//! Connection supervisor - owns the transport session and reconnects it.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info, warn};

use crate::chatbot::credentials::{CredentialError, CredentialStore};
use crate::chatbot::gemini::LanguageModel;
use crate::chatbot::handler::MessageHandler;
use crate::chatbot::transport::{
    Connection, ConnectionState, ConnectionUpdate, DisconnectReason, Transport, TransportError,
    TransportEvent,
};
use crate::logger::success;

const DEFAULT_RECONNECT_DELAY_MS: u64 = 5000;

/// How long to wait before each reconnect attempt.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ReconnectPolicy {
    /// Same delay every time.
    Fixed {
        #[serde(default = "default_delay_ms")]
        delay_ms: u64,
        #[serde(default)]
        max_attempts: Option<u32>,
    },
    /// Doubling delay, capped at `max_ms`.
    Exponential {
        initial_ms: u64,
        max_ms: u64,
        #[serde(default)]
        max_attempts: Option<u32>,
    },
}

fn default_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY_MS
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::Fixed {
            delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect number `attempt` (1-based), or `None` when attempts are used up.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        match *self {
            Self::Fixed { delay_ms, max_attempts } => {
                if max_attempts.is_some_and(|max| attempt > max) {
                    return None;
                }
                Some(Duration::from_millis(delay_ms))
            }
            Self::Exponential { initial_ms, max_ms, max_attempts } => {
                if max_attempts.is_some_and(|max| attempt > max) {
                    return None;
                }
                let shift = attempt.saturating_sub(1).min(32);
                let delay = initial_ms.saturating_mul(1u64 << shift).min(max_ms.max(initial_ms));
                Some(Duration::from_millis(delay))
            }
        }
    }

    /// Every delay this policy can produce is positive.
    pub fn validate(&self) -> Result<(), String> {
        match *self {
            Self::Fixed { delay_ms: 0, .. } => Err("reconnect delay_ms must be positive".into()),
            Self::Exponential { initial_ms: 0, .. } => Err("reconnect initial_ms must be positive".into()),
            _ => Ok(()),
        }
    }
}

#[derive(Debug)]
pub enum SupervisorError {
    Credentials(CredentialError),
    /// No stored credentials and none configured.
    MissingCredentials,
    Connect(TransportError),
    RetriesExhausted { attempts: u32 },
}

impl fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Credentials(e) => write!(f, "failed to load credentials: {e}"),
            Self::MissingCredentials => {
                f.write_str("no stored credentials and no bot token configured")
            }
            Self::Connect(e) => write!(f, "failed to connect: {e}"),
            Self::RetriesExhausted { attempts } => {
                write!(f, "giving up after {attempts} reconnect attempts")
            }
        }
    }
}

impl std::error::Error for SupervisorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Credentials(e) => Some(e),
            Self::Connect(e) => Some(e),
            Self::MissingCredentials | Self::RetriesExhausted { .. } => None,
        }
    }
}

/// How one connection ended.
#[derive(Debug)]
struct SessionEnd {
    reason: DisconnectReason,
    /// The connection reached `Open` before closing.
    was_open: bool,
}

pub struct ConnectionSupervisor<T: Transport, M> {
    transport: T,
    store: CredentialStore,
    handler: MessageHandler<M>,
    policy: ReconnectPolicy,
    configured: Option<T::Credentials>,
    state: ConnectionState,
}

impl<T: Transport, M: LanguageModel> ConnectionSupervisor<T, M> {
    pub fn new(transport: T, store: CredentialStore, handler: MessageHandler<M>, policy: ReconnectPolicy) -> Self {
        Self {
            transport,
            store,
            handler,
            policy,
            configured: None,
            state: ConnectionState::Closed,
        }
    }

    /// Credentials from configuration. Used on first run and reconciled
    /// with the store afterwards.
    pub fn with_configured_credentials(mut self, credentials: Option<T::Credentials>) -> Self {
        self.configured = credentials;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Connect and keep reconnecting until logged out or the policy gives up.
    ///
    /// Only a failure of the very first connect is returned as an error; later
    /// connect failures are retried like any other disconnect.
    pub async fn run(&mut self) -> Result<(), SupervisorError> {
        let mut connection = self.establish().await?;
        let mut attempt: u32 = 0;

        loop {
            let SessionEnd { reason, was_open } = self.drive(connection).await;
            self.state = ConnectionState::Closed;

            warn!("Connection closed due to {reason}");
            let reconnect = !reason.is_terminal();
            info!("Reconnecting: {}", if reconnect { "Yes" } else { "No" });
            if !reconnect {
                error!("Connection closed for good: {reason}. Configure new credentials to connect again");
                return Ok(());
            }

            if was_open {
                attempt = 0;
            }

            connection = loop {
                attempt += 1;
                let Some(delay) = self.policy.next_delay(attempt) else {
                    error!("Reconnect attempts exhausted");
                    return Err(SupervisorError::RetriesExhausted { attempts: attempt - 1 });
                };
                info!("Reconnect attempt {attempt} in {} ms", delay.as_millis());
                tokio::time::sleep(delay).await;

                match self.establish().await {
                    Ok(connection) => break connection,
                    Err(e) => warn!("Reconnect failed: {e}"),
                }
            };
        }
    }

    async fn establish(&mut self) -> Result<Connection<T::Messenger, T::Credentials>, SupervisorError> {
        let stored = self
            .store
            .load::<T::Credentials>()
            .map_err(SupervisorError::Credentials)?;
        let credentials = match (stored, &self.configured) {
            (Some(stored), Some(configured)) => self.transport.reconcile_credentials(stored, configured),
            (Some(stored), None) => stored,
            (None, Some(configured)) => configured.clone(),
            (None, None) => return Err(SupervisorError::MissingCredentials),
        };

        self.state = ConnectionState::Connecting;
        info!("Connecting (auth dir: {})", self.store.dir().display());
        self.transport
            .connect(credentials)
            .await
            .map_err(SupervisorError::Connect)
    }

    /// Process events until the connection closes.
    async fn drive(&mut self, connection: Connection<T::Messenger, T::Credentials>) -> SessionEnd {
        let Connection { messenger, mut events } = connection;
        let mut was_open = false;

        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Connection(ConnectionUpdate::Connecting) => {
                    self.state = ConnectionState::Connecting;
                    info!("Connecting...");
                }
                TransportEvent::Connection(ConnectionUpdate::Open) => {
                    self.state = ConnectionState::Open;
                    was_open = true;
                    success!("Connection opened");
                }
                TransportEvent::Connection(ConnectionUpdate::Closed(reason)) => {
                    return SessionEnd { reason, was_open };
                }
                TransportEvent::Connection(ConnectionUpdate::Error(e)) => {
                    error!("Connection error: {e}");
                }
                TransportEvent::Credentials(credentials) => {
                    if let Err(e) = self.store.save(&credentials) {
                        warn!("Failed to save credentials: {e}");
                    }
                }
                TransportEvent::Messages(batch) => {
                    self.handler.handle_batch(messenger.as_ref(), &batch).await;
                }
            }
        }

        SessionEnd {
            reason: DisconnectReason::StreamEnded,
            was_open,
        }
    }
}
