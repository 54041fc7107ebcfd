//! Bot API adapter.
//!
//! [`TelegramGateway`] implements [`MessagingGateway`] with teloxide and
//! [`TelegramListener`] turns updates into calls on the triage service. The
//! Bot API cannot list chat history, so the listener records every video it
//! sees into a bounded [`RecentVideos`] cache that backs
//! `list_recent_videos`.
//!
//! Bot API downloads are capped at 20 MB unless `telegram.api_url` points at
//! a local Bot API server; larger downloads surface as
//! `GatewayError::Download`. Channel posts are handled like group messages.

use crate::approval::ActionEvent;
use crate::commands::{Command, CommandResponder};
use crate::gateway::{CallbackId, GatewayError, InlineAction, MessagingGateway};
use crate::service::{TriageService, PROCESSING_FAILED_NOTICE};
use crate::video::{MediaRef, MessageRef, SizeThresholds, VideoDescriptor};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use teloxide::dispatching::UpdateHandler;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{
    InlineKeyboardButton, InlineKeyboardMarkup, InputFile, MaybeInaccessibleMessage, MessageId,
    ReplyParameters,
};
use teloxide::{ApiError, DownloadError, RequestError};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Build a descriptor from a message carrying a video
pub fn descriptor_from_message(msg: &Message, thresholds: &SizeThresholds) -> Option<VideoDescriptor> {
    let video = msg.video()?;

    let descriptor = VideoDescriptor::new(
        MessageRef::new(msg.chat.id.0, msg.id.0),
        MediaRef::new(video.file.id.clone(), video.file.unique_id.clone()),
        u64::from(video.file.size),
        video.duration.seconds(),
        thresholds,
    )
    .with_caption(msg.caption().map(str::to_owned))
    .with_file_name(video.file_name.clone());

    Some(descriptor)
}

fn request_error(e: RequestError) -> GatewayError {
    match &e {
        RequestError::Api(ApiError::MessageToDeleteNotFound | ApiError::MessageToEditNotFound) => {
            GatewayError::NotFound(e.to_string())
        }
        _ => GatewayError::Request(e.to_string()),
    }
}

fn download_error(e: DownloadError) -> GatewayError {
    GatewayError::Download(e.to_string())
}

fn file_id(media: &MediaRef) -> String {
    media.file_id().to_owned()
}

/// Bounded per-chat memory of recently observed videos, newest first
pub struct RecentVideos {
    limit: usize,
    chats: Mutex<HashMap<i64, VecDeque<VideoDescriptor>>>,
}

impl RecentVideos {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            chats: Mutex::new(HashMap::new()),
        }
    }

    pub fn record(&self, video: VideoDescriptor) {
        if self.limit == 0 {
            return;
        }
        let mut chats = self.chats.lock();
        let videos = chats.entry(video.chat_id()).or_default();
        videos.push_front(video);
        videos.truncate(self.limit);
    }

    pub fn list(&self, chat_id: i64) -> Vec<VideoDescriptor> {
        self.chats
            .lock()
            .get(&chat_id)
            .map(|videos| videos.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// [`MessagingGateway`] over the Bot API
pub struct TelegramGateway {
    bot: Bot,
    recent: Arc<RecentVideos>,
}

impl TelegramGateway {
    pub fn new(bot: Bot, recent: Arc<RecentVideos>) -> Self {
        Self { bot, recent }
    }
}

#[async_trait]
impl MessagingGateway for TelegramGateway {
    async fn list_recent_videos(&self, chat_id: i64) -> Result<Vec<VideoDescriptor>, GatewayError> {
        Ok(self.recent.list(chat_id))
    }

    async fn forward(&self, video: &VideoDescriptor, destination_chat_id: i64) -> Result<(), GatewayError> {
        self.bot
            .send_video(ChatId(destination_chat_id), InputFile::file_id(file_id(video.media())))
            .await
            .map_err(request_error)?;
        Ok(())
    }

    async fn send_with_actions(
        &self,
        video: &VideoDescriptor,
        chat_id: i64,
        alert_text: &str,
        actions: &[InlineAction],
    ) -> Result<MessageRef, GatewayError> {
        let buttons: Vec<InlineKeyboardButton> = actions
            .iter()
            .map(|action| InlineKeyboardButton::callback(action.label.clone(), action.token.as_str()))
            .collect();

        let sent = self
            .bot
            .send_video(ChatId(chat_id), InputFile::file_id(file_id(video.media())))
            .caption(alert_text)
            .reply_markup(InlineKeyboardMarkup::new(vec![buttons]))
            .await
            .map_err(request_error)?;

        Ok(MessageRef::new(sent.chat.id.0, sent.id.0))
    }

    async fn delete(&self, message: MessageRef) -> Result<(), GatewayError> {
        self.bot
            .delete_message(ChatId(message.chat_id), MessageId(message.message_id))
            .await
            .map_err(request_error)?;
        Ok(())
    }

    async fn edit_caption(&self, message: MessageRef, new_caption: &str) -> Result<(), GatewayError> {
        self.bot
            .edit_message_caption(ChatId(message.chat_id), MessageId(message.message_id))
            .caption(new_caption)
            .await
            .map_err(request_error)?;
        Ok(())
    }

    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), GatewayError> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .await
            .map_err(request_error)?;
        Ok(())
    }

    async fn send_file(&self, chat_id: i64, path: &Path, caption: &str) -> Result<(), GatewayError> {
        self.bot
            .send_video(ChatId(chat_id), InputFile::file(path))
            .caption(caption)
            .await
            .map_err(request_error)?;
        Ok(())
    }

    async fn send_reply(&self, chat_id: i64, text: &str, reply_to_message_id: i32) -> Result<(), GatewayError> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .reply_parameters(ReplyParameters::new(MessageId(reply_to_message_id)))
            .await
            .map_err(request_error)?;
        Ok(())
    }

    async fn download(&self, video: &VideoDescriptor, destination: &Path) -> Result<u64, GatewayError> {
        let file = self
            .bot
            .get_file(file_id(video.media()))
            .await
            .map_err(|e| GatewayError::Download(e.to_string()))?;

        // A local Bot API server in --local mode hands out paths on its own disk
        let local = Path::new(&file.path);
        if local.is_absolute() {
            let written = tokio::fs::copy(local, destination).await?;
            debug!(source = %local.display(), bytes = written, "Media copied from local Bot API server");
            return Ok(written);
        }

        let mut dst = tokio::fs::File::create(destination).await?;
        self.bot
            .download_file(&file.path, &mut dst)
            .await
            .map_err(download_error)?;
        dst.flush().await?;

        let written = tokio::fs::metadata(destination).await?.len();
        debug!(path = %destination.display(), bytes = written, "Media downloaded");
        Ok(written)
    }

    async fn acknowledge(&self, callback: &CallbackId, text: &str) -> Result<(), GatewayError> {
        self.bot
            .answer_callback_query(callback.0.clone())
            .text(text)
            .await
            .map_err(request_error)?;
        Ok(())
    }
}

/// Receives updates and hands each one to the service on its own task
pub struct TelegramListener {
    service: Arc<TriageService>,
    commands: Arc<CommandResponder>,
    recent: Arc<RecentVideos>,
    thresholds: SizeThresholds,
    input_chat_id: i64,
}

impl TelegramListener {
    pub fn new(
        service: Arc<TriageService>,
        commands: Arc<CommandResponder>,
        recent: Arc<RecentVideos>,
        thresholds: SizeThresholds,
        input_chat_id: i64,
    ) -> Self {
        Self {
            service,
            commands,
            recent,
            thresholds,
            input_chat_id,
        }
    }

    /// Update tree: group messages, channel posts and button presses.
    ///
    /// Channels deliver their posts as `channel_post` updates, so an input
    /// chat that is a channel is only seen through that branch.
    fn schema(self: &Arc<Self>) -> UpdateHandler<RequestError> {
        let on_message = |listener: Arc<Self>| {
            move |msg: Message| {
                let listener = Arc::clone(&listener);
                async move {
                    listener.handle_message(msg);
                    respond(())
                }
            }
        };

        dptree::entry()
            .branch(Update::filter_message().endpoint(on_message(Arc::clone(self))))
            .branch(Update::filter_channel_post().endpoint(on_message(Arc::clone(self))))
            .branch(Update::filter_callback_query().endpoint({
                let listener = Arc::clone(self);
                move |q: CallbackQuery, bot: Bot| {
                    let listener = Arc::clone(&listener);
                    async move {
                        listener.handle_callback(q, bot).await;
                        respond(())
                    }
                }
            }))
    }

    /// Poll for updates until a shutdown signal arrives
    pub async fn run(self: Arc<Self>, bot: Bot) {
        info!(input_chat_id = self.input_chat_id, "Starting update listener");

        let handler = self.schema();
        let mut dispatcher = Dispatcher::builder(bot, handler)
            .default_handler(|_| async {})
            .build();

        let shutdown = dispatcher.shutdown_token();
        tokio::spawn(async move {
            crate::shutdown_signal().await;
            info!("Shutdown signal received, stopping listener");
            if let Ok(stopped) = shutdown.shutdown() {
                stopped.await;
            }
        });

        dispatcher.dispatch().await;
        info!("Update listener stopped");
    }

    fn handle_message(&self, msg: Message) {
        let chat_id = msg.chat.id.0;

        if let Some(command) = msg.text().and_then(Command::parse) {
            debug!(chat_id, command = ?command, "Command received");
            let commands = Arc::clone(&self.commands);
            tokio::spawn(async move {
                if let Err(e) = commands.respond(chat_id, &command).await {
                    warn!(chat_id, error = %e, "Failed to answer command");
                }
            });
            return;
        }

        if chat_id != self.input_chat_id {
            debug!(chat_id, "Message outside the input chat, ignoring");
            return;
        }

        let Some(video) = descriptor_from_message(&msg, &self.thresholds) else {
            debug!(message_id = msg.id.0, "Non-video message in input chat, ignoring");
            return;
        };

        self.recent.record(video.clone());
        let service = Arc::clone(&self.service);
        tokio::spawn(async move {
            service.on_new_video(&video).await;
        });
    }

    async fn handle_callback(&self, q: CallbackQuery, bot: Bot) {
        let callback = CallbackId(q.id.to_string());

        let Some(token) = q.data.clone() else {
            debug!(callback = %callback.0, "Callback without data, ignoring");
            return;
        };

        let Some(MaybeInaccessibleMessage::Regular(msg)) = q.message.as_ref() else {
            warn!(token = %token, "Callback for an inaccessible message");
            if let Err(e) = bot
                .answer_callback_query(callback.0.clone())
                .text(PROCESSING_FAILED_NOTICE)
                .await
            {
                warn!(error = %e, "Failed to answer callback");
            }
            return;
        };

        let event = ActionEvent {
            token,
            callback,
            message: MessageRef::new(msg.chat.id.0, msg.id.0),
            video: descriptor_from_message(msg, &self.thresholds),
        };

        let service = Arc::clone(&self.service);
        tokio::spawn(async move {
            service.on_action(&event).await;
        });
    }
}
