//! Video Triage Service
//!
//! Watches one input chat for posted videos and disposes of each one by
//! size. Short videos are forwarded to the destination chat, medium videos
//! wait for a human decision behind inline buttons, and long videos are
//! downloaded to local storage.
//!
//! ## Features
//!
//! - **Size Classification**: Three tiers split by two configurable
//!   thresholds
//! - **Approval Workflow**: Send, delete or trim actions on medium videos,
//!   first press wins
//! - **Trim Pipeline**: Centered stream-copy clips cut by ffmpeg, temporary
//!   files always removed
//! - **Local Storage**: Long videos downloaded with progress replies
//!
//! ## Architecture
//!
//! ```text
//! Input Chat                                     Destination Chat
//! ┌──────────────┐                               ┌──────────────┐
//! │ New video    │                               │ Forwarded    │
//! │ Button press │                               │ videos/clips │
//! └──────────────┘                               └──────────────┘
//!        │                                              ▲
//!        ▼                                              │
//! ┌──────────────┐     ┌──────────────┐          ┌──────────────┐
//! │ Telegram     │────▶│ Triage       │─────────▶│ Disposition  │
//! │ Listener     │     │ Service      │          │ Router       │
//! └──────────────┘     └──────────────┘          └──────────────┘
//!                             │                   │     │     │
//!                             ▼                 short medium long
//!                      ┌──────────────┐               │     │
//!                      │ Approval     │◀── ledger ────┘     ▼
//!                      │ Processor    │              ┌──────────────┐
//!                      └──────────────┘              │ Local Video  │
//!                             │                      │ Store        │
//!                             ▼                      └──────────────┘
//!                      ┌──────────────┐
//!                      │ Trim         │
//!                      │ Pipeline     │
//!                      └──────────────┘
//! ```

pub mod approval;
pub mod commands;
pub mod config;
pub mod disposition;
pub mod error;
pub mod gateway;
pub mod router;
pub mod service;
pub mod storage;
pub mod telegram;
pub mod trim;
pub mod video;

#[cfg(test)]
pub(crate) mod testing;

pub use approval::{ActionEvent, ActionLedger, ActionOutcome, ActionToken, ApprovalProcessor};
pub use commands::{Command, CommandResponder};
pub use config::Config;
pub use disposition::{LongVideoHandler, MediumVideoHandler, ShortVideoHandler};
pub use error::DispositionError;
pub use gateway::{GatewayError, MessagingGateway};
pub use router::DispositionRouter;
pub use service::{TriageService, TriageStats};
pub use storage::LocalVideoStore;
pub use telegram::{RecentVideos, TelegramGateway, TelegramListener};
pub use trim::{FfmpegTranscoder, TrimError, TrimPipeline};
pub use video::{MediaRef, MessageRef, SizeThresholds, Tier, VideoDescriptor};

use tokio::signal;
use tracing::{info, warn};

/// Wait for shutdown signal (SIGINT or SIGTERM)
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
