//! Messaging gateway contract.
//!
//! The core only talks to the chat service through [`MessagingGateway`].
//! Implementations live at the edge (see `telegram`); tests use an in-memory
//! fake.

use crate::approval::ActionToken;
use crate::video::{MessageRef, VideoDescriptor};
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

/// Errors reported by the messaging gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Message not found: {0}")]
    NotFound(String),

    #[error("Chat service request failed: {0}")]
    Request(String),

    #[error("Media download failed: {0}")]
    Download(String),

    #[error("Local I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// True when the target message is already gone
    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::NotFound(_))
    }
}

/// Identifier of an inline-action event, used to acknowledge it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallbackId(pub String);

/// One inline button attached to an interactive message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineAction {
    pub label: String,
    pub token: ActionToken,
}

impl InlineAction {
    pub fn new(label: impl Into<String>, token: ActionToken) -> Self {
        Self {
            label: label.into(),
            token,
        }
    }
}

/// Send/forward/delete/edit/download primitives against the chat service.
///
/// Calls are never retried by the core; every failure is logged and returned.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Videos recently observed in a chat, newest first
    async fn list_recent_videos(&self, chat_id: i64) -> Result<Vec<VideoDescriptor>, GatewayError>;

    /// Re-send the video's media to another chat without its caption
    async fn forward(&self, video: &VideoDescriptor, destination_chat_id: i64) -> Result<(), GatewayError>;

    /// Post the video with an alert caption and inline actions
    async fn send_with_actions(
        &self,
        video: &VideoDescriptor,
        chat_id: i64,
        alert_text: &str,
        actions: &[InlineAction],
    ) -> Result<MessageRef, GatewayError>;

    async fn delete(&self, message: MessageRef) -> Result<(), GatewayError>;

    async fn edit_caption(&self, message: MessageRef, new_caption: &str) -> Result<(), GatewayError>;

    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), GatewayError>;

    /// Upload a local file as a video
    async fn send_file(&self, chat_id: i64, path: &Path, caption: &str) -> Result<(), GatewayError>;

    async fn send_reply(&self, chat_id: i64, text: &str, reply_to_message_id: i32) -> Result<(), GatewayError>;

    /// Download the video's media into `destination`, returning bytes written
    async fn download(&self, video: &VideoDescriptor, destination: &Path) -> Result<u64, GatewayError>;

    /// Answer an inline-action event with a short notice
    async fn acknowledge(&self, callback: &CallbackId, text: &str) -> Result<(), GatewayError>;
}

/// Delete a message, treating "already gone" as success.
///
/// Returns `true` if this call removed the message.
pub async fn delete_tolerant(
    gateway: &dyn MessagingGateway,
    message: MessageRef,
) -> Result<bool, GatewayError> {
    match gateway.delete(message).await {
        Ok(()) => Ok(true),
        Err(e) if e.is_not_found() => {
            tracing::debug!(message = %message, "Message already deleted");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}
