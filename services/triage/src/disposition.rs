//! Disposition handlers, one per tier.
//!
//! Each handler checks that the descriptor really belongs to its tier. A
//! mismatch is logged and skipped so a classification drift never takes the
//! listener down.

use crate::approval::{ActionLedger, ActionToken};
use crate::config::Config;
use crate::error::DispositionError;
use crate::gateway::{delete_tolerant, InlineAction, MessagingGateway};
use crate::storage::LocalVideoStore;
use crate::video::{Tier, VideoDescriptor};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const MEDIUM_ALERT: &str =
    "⚠️ Este video es de tamaño medio. ¿Deseas enviarlo al chat de destino?";
pub const DOWNLOADING_NOTICE: &str = "⬇️ Descargando archivo, por favor espera...";

pub fn download_confirmation(path: &Path) -> String {
    format!("✅ Archivo descargado exitosamente:\n📁 {}", path.display())
}

fn tier_matches(video: &VideoDescriptor, expected: Tier) -> bool {
    if video.tier() == expected {
        return true;
    }
    warn!(
        message = %video.message(),
        expected = %expected,
        actual = %video.tier(),
        size_bytes = video.size_bytes(),
        "Classification mismatch, skipping video"
    );
    false
}

/// Forwards short videos to the destination chat
pub struct ShortVideoHandler {
    gateway: Arc<dyn MessagingGateway>,
    destination_chat_id: i64,
}

impl ShortVideoHandler {
    pub fn new(gateway: Arc<dyn MessagingGateway>, destination_chat_id: i64) -> Self {
        Self {
            gateway,
            destination_chat_id,
        }
    }

    /// Forward the media without its caption
    pub async fn handle(&self, video: &VideoDescriptor) -> Result<(), DispositionError> {
        debug!(message = %video.message(), "Handling short video");
        if !tier_matches(video, Tier::Short) {
            return Ok(());
        }

        match self.gateway.forward(video, self.destination_chat_id).await {
            Ok(()) => {
                info!(
                    message = %video.message(),
                    destination = self.destination_chat_id,
                    "Short video forwarded"
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    message = %video.message(),
                    destination = self.destination_chat_id,
                    error = %e,
                    "Failed to forward short video"
                );
                Err(e.into())
            }
        }
    }
}

/// Posts medium videos back to the origin chat with approval buttons
pub struct MediumVideoHandler {
    gateway: Arc<dyn MessagingGateway>,
    ledger: Arc<ActionLedger>,
    actions: Vec<InlineAction>,
}

impl MediumVideoHandler {
    pub fn new(config: &Config, gateway: Arc<dyn MessagingGateway>, ledger: Arc<ActionLedger>) -> Self {
        let mut actions = vec![
            InlineAction::new("Enviar", ActionToken::Send),
            InlineAction::new("Borrar", ActionToken::Delete),
        ];
        if config.trim.enabled {
            actions.push(InlineAction::new(
                format!("Recortar a {}s", config.trim.clip_seconds),
                ActionToken::Trim,
            ));
        }

        Self {
            gateway,
            ledger,
            actions,
        }
    }

    pub fn actions(&self) -> &[InlineAction] {
        &self.actions
    }

    /// Post the interactive copy, then remove the original post
    pub async fn handle(&self, video: &VideoDescriptor) -> Result<(), DispositionError> {
        debug!(message = %video.message(), "Handling medium video");
        if !tier_matches(video, Tier::Medium) {
            return Ok(());
        }

        let posted = match self
            .gateway
            .send_with_actions(video, video.chat_id(), MEDIUM_ALERT, &self.actions)
            .await
        {
            Ok(posted) => posted,
            Err(e) => {
                error!(
                    message = %video.message(),
                    error = %e,
                    "Failed to post medium video for approval"
                );
                return Err(e.into());
            }
        };
        self.ledger.register_pending(posted);
        info!(
            message = %video.message(),
            interactive = %posted,
            "Medium video posted for approval"
        );

        if let Err(e) = delete_tolerant(self.gateway.as_ref(), video.message()).await {
            error!(
                message = %video.message(),
                error = %e,
                "Failed to delete original medium video"
            );
            return Err(e.into());
        }
        debug!(message = %video.message(), "Original post deleted");

        Ok(())
    }
}

/// Downloads long videos to local storage
pub struct LongVideoHandler {
    gateway: Arc<dyn MessagingGateway>,
    store: LocalVideoStore,
}

impl LongVideoHandler {
    pub fn new(gateway: Arc<dyn MessagingGateway>, store: LocalVideoStore) -> Self {
        Self { gateway, store }
    }

    /// Reply with progress, download, then reply with the stored path
    pub async fn handle(&self, video: &VideoDescriptor) -> Result<(), DispositionError> {
        debug!(message = %video.message(), "Handling long video");
        if !tier_matches(video, Tier::Long) {
            return Ok(());
        }

        let result = async {
            self.gateway
                .send_reply(video.chat_id(), DOWNLOADING_NOTICE, video.message_id())
                .await?;

            let path = self.store.save(video).await?;

            self.gateway
                .send_reply(
                    video.chat_id(),
                    &download_confirmation(&path),
                    video.message_id(),
                )
                .await?;
            Ok::<_, DispositionError>(path)
        }
        .await;

        match result {
            Ok(path) => {
                info!(message = %video.message(), path = %path.display(), "Long video stored");
                Ok(())
            }
            Err(e) => {
                error!(message = %video.message(), error = %e, "Failed to store long video");
                Err(e)
            }
        }
    }
}
