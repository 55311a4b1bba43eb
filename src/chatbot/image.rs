//! Reassemble an attached image from the transport's chunk stream.

use futures::StreamExt;
use tracing::{error, info};

use crate::chatbot::message::ImageRef;
use crate::chatbot::transport::Messenger;

/// Full image payload, or `None` if the download failed part-way.
pub async fn fetch_image<S: Messenger>(messenger: &S, image: &ImageRef) -> Option<Vec<u8>> {
    let mut stream = messenger.download_image(image);
    let mut buffer = Vec::new();

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => buffer.extend_from_slice(&bytes),
            Err(e) => {
                error!("Error downloading image: {e}");
                return None;
            }
        }
    }

    info!("Image downloaded, size: {} bytes", buffer.len());
    Some(buffer)
}
