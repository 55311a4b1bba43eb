//! Inbound message shapes and command normalization.

use std::fmt;

/// Transport-level address of a conversation (where replies go).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChatAddress(pub String);

impl fmt::Display for ChatAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque handle the transport uses to download an attached image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub id: String,
}

/// Body of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    /// Plain text.
    Conversation(String),
    /// Text with formatting or reply context.
    ExtendedText(String),
    /// Photo with an optional caption.
    Image {
        image: ImageRef,
        caption: Option<String>,
    },
    /// Anything else (stickers, voice, ...).
    Other,
}

/// A message delivered by the transport.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub id: String,
    pub chat: ChatAddress,
    pub sender: Option<String>,
    /// `None` when the update carried no message body at all.
    pub content: Option<MessageContent>,
}

/// Text and image flag derived from any message shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub text: String,
    pub has_image: bool,
}

impl MessageContent {
    pub fn extract(&self) -> Extracted {
        match self {
            Self::Conversation(text) | Self::ExtendedText(text) => Extracted {
                text: text.clone(),
                has_image: false,
            },
            Self::Image { caption, .. } => Extracted {
                text: caption.clone().unwrap_or_default(),
                has_image: true,
            },
            Self::Other => Extracted {
                text: String::new(),
                has_image: false,
            },
        }
    }

    pub fn image(&self) -> Option<&ImageRef> {
        match self {
            Self::Image { image, .. } => Some(image),
            _ => None,
        }
    }
}

impl Extracted {
    /// Normalized command, or `None` when the message is not actionable.
    ///
    /// Prefixed text has the prefix stripped; image captions are taken as-is.
    /// Both are then trimmed and lower-cased.
    pub fn command(&self, prefix: &str) -> Option<String> {
        if let Some(rest) = self.text.strip_prefix(prefix) {
            return Some(rest.trim().to_lowercase());
        }
        if self.has_image {
            return Some(self.text.trim().to_lowercase());
        }
        None
    }
}
