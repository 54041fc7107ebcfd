//! Local storage for long videos.

use crate::error::DispositionError;
use crate::gateway::MessagingGateway;
use crate::video::VideoDescriptor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

const VIDEO_EXTENSIONS: [&str; 5] = ["mp4", "avi", "mkv", "mov", "webm"];

/// File name for a stored video: the display filename, or the media's
/// unique id, with `.mp4` appended unless it already has a video extension.
pub fn storage_file_name(video: &VideoDescriptor) -> String {
    let base = video
        .file_name()
        .map(sanitize)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| sanitize(video.media().unique_id()));

    let has_video_extension = Path::new(&base)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false);

    if has_video_extension {
        base
    } else {
        format!("{base}.mp4")
    }
}

/// Strip path separators so a name cannot escape the storage directory
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}

/// Downloads videos into a directory on local disk
pub struct LocalVideoStore {
    gateway: Arc<dyn MessagingGateway>,
    videos_dir: PathBuf,
}

impl LocalVideoStore {
    pub fn new(gateway: Arc<dyn MessagingGateway>, videos_dir: impl Into<PathBuf>) -> Self {
        Self {
            gateway,
            videos_dir: videos_dir.into(),
        }
    }

    pub fn videos_dir(&self) -> &Path {
        &self.videos_dir
    }

    /// Download `video` into the storage directory and return its path
    pub async fn save(&self, video: &VideoDescriptor) -> Result<PathBuf, DispositionError> {
        debug!(
            media = %video.media().unique_id(),
            dir = %self.videos_dir.display(),
            "Starting video download"
        );

        tokio::fs::create_dir_all(&self.videos_dir)
            .await
            .map_err(|source| DispositionError::Storage {
                path: self.videos_dir.clone(),
                source,
            })?;

        let path = self.videos_dir.join(storage_file_name(video));
        info!(video = %video.display_name(), path = %path.display(), "Downloading video");

        if let Err(e) = self.gateway.download(video, &path).await {
            error!(
                video = %video.display_name(),
                dir = %self.videos_dir.display(),
                error = %e,
                "Failed to download video"
            );
            return Err(e.into());
        }

        let size = tokio::fs::metadata(&path)
            .await
            .map_err(|source| DispositionError::Storage {
                path: path.clone(),
                source,
            })?
            .len();

        info!(
            video = %video.display_name(),
            path = %path.display(),
            size_bytes = size,
            "Video downloaded"
        );

        Ok(path)
    }
}
