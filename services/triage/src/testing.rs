//! In-memory gateway used by unit tests.

use crate::gateway::{CallbackId, GatewayError, InlineAction, MessagingGateway};
use crate::video::{MessageRef, VideoDescriptor};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    Forward {
        message: MessageRef,
        destination: i64,
    },
    SendWithActions {
        message: MessageRef,
        chat_id: i64,
        alert: String,
        actions: Vec<InlineAction>,
    },
    Delete(MessageRef),
    EditCaption {
        message: MessageRef,
        caption: String,
    },
    SendText {
        chat_id: i64,
        text: String,
    },
    SendFile {
        chat_id: i64,
        path: PathBuf,
        caption: String,
        existed: bool,
    },
    SendReply {
        chat_id: i64,
        text: String,
        reply_to: i32,
    },
    Download {
        message: MessageRef,
        destination: PathBuf,
    },
    Acknowledge {
        callback: CallbackId,
        text: String,
    },
}

#[derive(Default)]
struct Failures {
    forward: bool,
    delete: bool,
    send_file: bool,
    download: bool,
}

/// Records every call; deletes of an already-deleted message report `NotFound`.
pub(crate) struct FakeGateway {
    calls: Mutex<Vec<Call>>,
    deleted: Mutex<HashSet<MessageRef>>,
    failures: Mutex<Failures>,
    download_content: Mutex<Vec<u8>>,
    recent: Mutex<Vec<VideoDescriptor>>,
    next_message_id: Mutex<i32>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            deleted: Mutex::new(HashSet::new()),
            failures: Mutex::new(Failures::default()),
            download_content: Mutex::new(b"fake video payload".to_vec()),
            recent: Mutex::new(Vec::new()),
            next_message_id: Mutex::new(1000),
        }
    }

    pub fn fail_forward(&self) {
        self.failures.lock().forward = true;
    }

    pub fn fail_deletes(&self) {
        self.failures.lock().delete = true;
    }

    pub fn fail_send_file(&self) {
        self.failures.lock().send_file = true;
    }

    pub fn fail_download(&self) {
        self.failures.lock().download = true;
    }

    pub fn set_download_content(&self, content: &[u8]) {
        *self.download_content.lock() = content.to_vec();
    }

    pub fn mark_deleted(&self, message: MessageRef) {
        self.deleted.lock().insert(message);
    }

    pub fn set_recent(&self, videos: Vec<VideoDescriptor>) {
        *self.recent.lock() = videos;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Calls that change remote state
    pub fn mutations(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, Call::Acknowledge { .. }))
            .collect()
    }

    pub fn deleted(&self) -> Vec<MessageRef> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Delete(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    pub fn acknowledgments(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Acknowledge { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn downloads(&self) -> Vec<PathBuf> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Download { destination, .. } => Some(destination),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl MessagingGateway for FakeGateway {
    async fn list_recent_videos(&self, chat_id: i64) -> Result<Vec<VideoDescriptor>, GatewayError> {
        Ok(self
            .recent
            .lock()
            .iter()
            .filter(|v| v.chat_id() == chat_id)
            .cloned()
            .collect())
    }

    async fn forward(&self, video: &VideoDescriptor, destination_chat_id: i64) -> Result<(), GatewayError> {
        self.record(Call::Forward {
            message: video.message(),
            destination: destination_chat_id,
        });
        if self.failures.lock().forward {
            return Err(GatewayError::Request("forward rejected".to_string()));
        }
        Ok(())
    }

    async fn send_with_actions(
        &self,
        video: &VideoDescriptor,
        chat_id: i64,
        alert_text: &str,
        actions: &[InlineAction],
    ) -> Result<MessageRef, GatewayError> {
        self.record(Call::SendWithActions {
            message: video.message(),
            chat_id,
            alert: alert_text.to_string(),
            actions: actions.to_vec(),
        });
        let mut next = self.next_message_id.lock();
        *next += 1;
        Ok(MessageRef::new(chat_id, *next))
    }

    async fn delete(&self, message: MessageRef) -> Result<(), GatewayError> {
        self.record(Call::Delete(message));
        if self.failures.lock().delete {
            return Err(GatewayError::Request("delete rejected".to_string()));
        }
        if !self.deleted.lock().insert(message) {
            return Err(GatewayError::NotFound(format!("message {message}")));
        }
        Ok(())
    }

    async fn edit_caption(&self, message: MessageRef, new_caption: &str) -> Result<(), GatewayError> {
        self.record(Call::EditCaption {
            message,
            caption: new_caption.to_string(),
        });
        if self.deleted.lock().contains(&message) {
            return Err(GatewayError::NotFound(format!("message {message}")));
        }
        Ok(())
    }

    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), GatewayError> {
        self.record(Call::SendText {
            chat_id,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_file(&self, chat_id: i64, path: &Path, caption: &str) -> Result<(), GatewayError> {
        self.record(Call::SendFile {
            chat_id,
            path: path.to_path_buf(),
            caption: caption.to_string(),
            existed: path.exists(),
        });
        if self.failures.lock().send_file {
            return Err(GatewayError::Request("upload rejected".to_string()));
        }
        Ok(())
    }

    async fn send_reply(&self, chat_id: i64, text: &str, reply_to_message_id: i32) -> Result<(), GatewayError> {
        self.record(Call::SendReply {
            chat_id,
            text: text.to_string(),
            reply_to: reply_to_message_id,
        });
        Ok(())
    }

    async fn download(&self, video: &VideoDescriptor, destination: &Path) -> Result<u64, GatewayError> {
        self.record(Call::Download {
            message: video.message(),
            destination: destination.to_path_buf(),
        });
        if self.failures.lock().download {
            return Err(GatewayError::Download("file is too big".to_string()));
        }
        let content = self.download_content.lock().clone();
        tokio::fs::write(destination, &content).await?;
        Ok(content.len() as u64)
    }

    async fn acknowledge(&self, callback: &CallbackId, text: &str) -> Result<(), GatewayError> {
        self.record(Call::Acknowledge {
            callback: callback.clone(),
            text: text.to_string(),
        });
        Ok(())
    }
}
