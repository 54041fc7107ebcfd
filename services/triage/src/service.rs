//! Event boundary between the chat listener and the core.
//!
//! One failing event must never affect the next, so both entry points
//! swallow errors after logging them and telling the user something went
//! wrong. The underlying error text is never shown in the chat.

use crate::approval::{ActionEvent, ApprovalProcessor};
use crate::gateway::MessagingGateway;
use crate::router::DispositionRouter;
use crate::video::{Tier, VideoDescriptor};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

pub const PROCESSING_FAILED_NOTICE: &str = "❌ Error al procesar el video";

/// Counters since process start, reported by `/stats`
#[derive(Debug, Default)]
pub struct TriageStats {
    short: AtomicU64,
    medium: AtomicU64,
    long: AtomicU64,
    actions: AtomicU64,
    failures: AtomicU64,
}

/// Point-in-time copy of [`TriageStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub short: u64,
    pub medium: u64,
    pub long: u64,
    pub actions: u64,
    pub failures: u64,
}

impl StatsSnapshot {
    pub fn total_videos(&self) -> u64 {
        self.short + self.medium + self.long
    }
}

impl TriageStats {
    pub fn record_video(&self, tier: Tier) {
        let counter = match tier {
            Tier::Short => &self.short,
            Tier::Medium => &self.medium,
            Tier::Long => &self.long,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_action(&self) {
        self.actions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            short: self.short.load(Ordering::Relaxed),
            medium: self.medium.load(Ordering::Relaxed),
            long: self.long.load(Ordering::Relaxed),
            actions: self.actions.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Inbound callbacks for new videos and inline actions
pub struct TriageService {
    gateway: Arc<dyn MessagingGateway>,
    router: DispositionRouter,
    approval: ApprovalProcessor,
    stats: Arc<TriageStats>,
}

impl TriageService {
    pub fn new(
        gateway: Arc<dyn MessagingGateway>,
        router: DispositionRouter,
        approval: ApprovalProcessor,
        stats: Arc<TriageStats>,
    ) -> Self {
        Self {
            gateway,
            router,
            approval,
            stats,
        }
    }

    pub fn stats(&self) -> &Arc<TriageStats> {
        &self.stats
    }

    /// Handle a video posted in the input chat
    #[instrument(skip(self, video), fields(message = %video.message(), tier = %video.tier()))]
    pub async fn on_new_video(&self, video: &VideoDescriptor) {
        info!(
            size_bytes = video.size_bytes(),
            duration_secs = video.duration_secs(),
            video = %video.display_name(),
            "New video received"
        );
        self.stats.record_video(video.tier());

        if let Err(e) = self.router.route(video).await {
            self.stats.record_failure();
            error!(error = %e, "Failed to process video");

            if let Err(notify_err) = self
                .gateway
                .send_reply(video.chat_id(), PROCESSING_FAILED_NOTICE, video.message_id())
                .await
            {
                warn!(error = %notify_err, "Failed to report processing failure");
            }
        }
    }

    /// Handle an inline button press
    #[instrument(skip(self, event), fields(token = %event.token, message = %event.message))]
    pub async fn on_action(&self, event: &ActionEvent) {
        self.stats.record_action();

        if let Err(e) = self.approval.handle_action(event).await {
            self.stats.record_failure();
            error!(error = %e, "Failed to process action");

            // A second answer to the same callback is rejected by the chat
            // service, which only costs a warning here
            if let Err(notify_err) = self
                .gateway
                .acknowledge(&event.callback, PROCESSING_FAILED_NOTICE)
                .await
            {
                warn!(error = %notify_err, "Failed to report action failure");
            }
        }
    }
}

/// Service wired to a fake gateway with the default test configuration
#[cfg(test)]
pub(crate) fn test_service(
    gateway: Arc<crate::testing::FakeGateway>,
    videos_dir: &std::path::Path,
) -> TriageService {
    use crate::approval::ActionLedger;
    use crate::disposition::{LongVideoHandler, MediumVideoHandler, ShortVideoHandler};
    use crate::storage::LocalVideoStore;
    use crate::trim::{MockTranscoder, TrimPipeline};

    let config = crate::config::test_config();
    let ledger = Arc::new(ActionLedger::new());
    let router = DispositionRouter::new(
        ShortVideoHandler::new(gateway.clone(), config.telegram.destination_chat_id),
        MediumVideoHandler::new(&config, gateway.clone(), ledger.clone()),
        LongVideoHandler::new(gateway.clone(), LocalVideoStore::new(gateway.clone(), videos_dir)),
    );
    let trim = Arc::new(TrimPipeline::new(
        gateway.clone(),
        Arc::new(MockTranscoder::new()),
        Some(videos_dir.to_path_buf()),
    ));
    let approval = ApprovalProcessor::new(&config, gateway.clone(), trim, ledger);
    TriageService::new(gateway, router, approval, Arc::new(TriageStats::default()))
}
