//! Tier-based dispatch of new videos.

use crate::disposition::{LongVideoHandler, MediumVideoHandler, ShortVideoHandler};
use crate::error::DispositionError;
use crate::video::{Tier, VideoDescriptor};
use tracing::{debug, instrument};

/// Sends each video to exactly one disposition handler based on its tier
pub struct DispositionRouter {
    short: ShortVideoHandler,
    medium: MediumVideoHandler,
    long: LongVideoHandler,
}

impl DispositionRouter {
    pub fn new(short: ShortVideoHandler, medium: MediumVideoHandler, long: LongVideoHandler) -> Self {
        Self { short, medium, long }
    }

    #[instrument(skip(self, video), fields(message = %video.message(), tier = %video.tier()))]
    pub async fn route(&self, video: &VideoDescriptor) -> Result<(), DispositionError> {
        debug!(size_bytes = video.size_bytes(), "Routing video");
        metrics::counter!("triage.videos", "tier" => video.tier().as_str()).increment(1);

        match video.tier() {
            Tier::Short => self.short.handle(video).await,
            Tier::Medium => self.medium.handle(video).await,
            Tier::Long => self.long.handle(video).await,
        }
    }
}
