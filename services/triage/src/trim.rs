//! Trim pipeline: download a video, cut a centered clip with the external
//! transcoder and send the clip to the configured chats.
//!
//! The transcoder runs in stream-copy mode (`-c copy`). Nothing is
//! re-encoded, so clip boundaries snap to the nearest keyframe instead of
//! being frame-exact.
//!
//! Both temporary files belong to a [`TrimJob`]. They are closed explicitly
//! on every return path and removed by `Drop` if the owning task is aborted.

use crate::error::DispositionError;
use crate::gateway::MessagingGateway;
use crate::video::VideoDescriptor;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, error, info, instrument, warn};

/// Errors that can occur while producing a clip
#[derive(Error, Debug)]
pub enum TrimError {
    #[error("Failed to create temporary file: {0}")]
    TempFile(#[source] std::io::Error),

    #[error("Source video missing or empty after download: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("Failed to run transcoder: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Transcoder exited with {status}: {stderr}")]
    TranscoderFailed { status: String, stderr: String },

    #[error("Transcoder timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transcoder produced an empty clip")]
    EmptyOutput,
}

/// Start offset of a clip centered in the source, clamped to zero when the
/// source is shorter than the clip.
pub fn centered_start_offset(duration_secs: u32, clip_secs: u32) -> f64 {
    f64::from(duration_secs.saturating_sub(clip_secs)) / 2.0
}

/// Caption sent along with the clip
pub fn clip_caption(clip_secs: u32) -> String {
    format!("✂️ Video recortado ({clip_secs}s)")
}

/// One trim invocation: the two scoped temp files and the cut parameters.
#[derive(Debug)]
pub struct TrimJob {
    input: NamedTempFile,
    output: NamedTempFile,
    clip_secs: u32,
    start_offset: f64,
}

impl TrimJob {
    /// Create fresh temp files in `work_dir` (or the OS temp dir)
    pub fn create(
        work_dir: Option<&Path>,
        duration_secs: u32,
        clip_secs: u32,
    ) -> Result<Self, TrimError> {
        let input = temp_file("trim-in-", work_dir)?;
        let output = temp_file("trim-out-", work_dir)?;

        Ok(Self {
            input,
            output,
            clip_secs,
            start_offset: centered_start_offset(duration_secs, clip_secs),
        })
    }

    pub fn input_path(&self) -> &Path {
        self.input.path()
    }

    pub fn output_path(&self) -> &Path {
        self.output.path()
    }

    pub fn clip_secs(&self) -> u32 {
        self.clip_secs
    }

    pub fn start_offset(&self) -> f64 {
        self.start_offset
    }

    /// Delete both temp files, logging rather than failing on errors
    pub fn cleanup(self) {
        for (kind, file) in [("input", self.input), ("output", self.output)] {
            let path = file.path().to_path_buf();
            match file.close() {
                Ok(()) => debug!(path = %path.display(), kind, "Removed temporary file"),
                Err(e) => warn!(
                    path = %path.display(),
                    kind,
                    error = %e,
                    "Failed to remove temporary file"
                ),
            }
        }
    }
}

fn temp_file(prefix: &str, work_dir: Option<&Path>) -> Result<NamedTempFile, TrimError> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(prefix).suffix(".mp4");

    match work_dir {
        Some(dir) => builder.tempfile_in(dir),
        None => builder.tempfile(),
    }
    .map_err(TrimError::TempFile)
}

/// External process that cuts the clip described by a [`TrimJob`]
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn trim(&self, job: &TrimJob) -> Result<(), TrimError>;
}

/// ffmpeg-backed transcoder with a bounded wait
pub struct FfmpegTranscoder {
    ffmpeg_path: String,
    timeout: Duration,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            timeout,
        }
    }

    /// Arguments for a stream-copy cut of `job`
    pub fn trim_args(job: &TrimJob) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-y".to_string(),
            "-ss".to_string(),
            format!("{:.3}", job.start_offset()),
            "-i".to_string(),
            job.input_path().display().to_string(),
            "-t".to_string(),
            job.clip_secs().to_string(),
            "-c".to_string(),
            "copy".to_string(),
            "-avoid_negative_ts".to_string(),
            "make_zero".to_string(),
            job.output_path().display().to_string(),
        ]
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn trim(&self, job: &TrimJob) -> Result<(), TrimError> {
        let args = Self::trim_args(job);
        debug!(program = %self.ffmpeg_path, args = ?args, "Running transcoder");

        let child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(TrimError::Spawn)?;

        // Dropping the wait future on timeout kills the child
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(TrimError::Spawn)?,
            Err(_) => return Err(TrimError::Timeout(self.timeout)),
        };

        if !output.status.success() {
            return Err(TrimError::TranscoderFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}

/// Downloads, trims and forwards clips
pub struct TrimPipeline {
    gateway: Arc<dyn MessagingGateway>,
    transcoder: Arc<dyn Transcoder>,
    work_dir: Option<PathBuf>,
}

impl TrimPipeline {
    pub fn new(
        gateway: Arc<dyn MessagingGateway>,
        transcoder: Arc<dyn Transcoder>,
        work_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            gateway,
            transcoder,
            work_dir,
        }
    }

    /// Cut a centered `clip_secs` clip of `video` and send it to every destination.
    ///
    /// Temp files are gone when this returns, whatever the outcome.
    #[instrument(skip(self, video, destinations), fields(message = %video.message()))]
    pub async fn trim_and_forward(
        &self,
        video: &VideoDescriptor,
        destinations: &[i64],
        clip_secs: u32,
    ) -> Result<(), DispositionError> {
        debug!(
            duration_secs = video.duration_secs(),
            destinations = ?destinations,
            "Starting trim"
        );

        let started = Instant::now();
        let job = TrimJob::create(self.work_dir.as_deref(), video.duration_secs(), clip_secs)?;
        let result = self.run(&job, video, destinations).await;
        job.cleanup();

        match &result {
            Ok(()) => {
                metrics::counter!("triage.trim.completed").increment(1);
                metrics::histogram!("triage.trim.duration_seconds")
                    .record(started.elapsed().as_secs_f64());
                info!(
                    video = %video.display_name(),
                    destinations = destinations.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Trimmed clip sent"
                );
            }
            Err(e) => {
                metrics::counter!("triage.trim.failed").increment(1);
                error!(video = %video.display_name(), error = %e, "Trim failed");
            }
        }

        result
    }

    async fn run(
        &self,
        job: &TrimJob,
        video: &VideoDescriptor,
        destinations: &[i64],
    ) -> Result<(), DispositionError> {
        let downloaded = self.gateway.download(video, job.input_path()).await?;
        if file_len(job.input_path()).await == 0 {
            return Err(TrimError::MissingInput(job.input_path().to_path_buf()).into());
        }
        debug!(bytes = downloaded, "Source downloaded");

        debug!(start_offset = job.start_offset(), "Cutting clip");
        self.transcoder.trim(job).await?;

        if file_len(job.output_path()).await == 0 {
            return Err(TrimError::EmptyOutput.into());
        }

        let caption = clip_caption(job.clip_secs());
        for chat_id in destinations {
            self.gateway
                .send_file(*chat_id, job.output_path(), &caption)
                .await?;
            debug!(chat_id, "Clip sent");
        }

        Ok(())
    }
}

async fn file_len(path: &Path) -> u64 {
    tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, FakeGateway};
    use crate::video::test_video;
    use crate::gateway::GatewayError;
    use parking_lot::Mutex;
    use tokio::sync::Notify;

    fn pipeline(
        gateway: Arc<FakeGateway>,
        transcoder: impl Transcoder + 'static,
        work_dir: &Path,
    ) -> TrimPipeline {
        TrimPipeline::new(gateway, Arc::new(transcoder), Some(work_dir.to_path_buf()))
    }

    /// Mock that records the job's paths and writes `clip` to the output
    fn recording_transcoder(paths: Arc<Mutex<Vec<PathBuf>>>, clip: &'static [u8]) -> MockTranscoder {
        let mut transcoder = MockTranscoder::new();
        transcoder.expect_trim().times(1).returning(move |job| {
            paths.lock().push(job.input_path().to_path_buf());
            paths.lock().push(job.output_path().to_path_buf());
            std::fs::write(job.output_path(), clip).unwrap();
            Ok(())
        });
        transcoder
    }

    fn failing_transcoder(paths: Arc<Mutex<Vec<PathBuf>>>, error: fn() -> TrimError) -> MockTranscoder {
        let mut transcoder = MockTranscoder::new();
        transcoder.expect_trim().times(1).returning(move |job| {
            paths.lock().push(job.input_path().to_path_buf());
            paths.lock().push(job.output_path().to_path_buf());
            Err(error())
        });
        transcoder
    }

    fn assert_removed(paths: &[PathBuf]) {
        assert_eq!(paths.len(), 2);
        for path in paths {
            assert!(!path.exists(), "{} still exists", path.display());
        }
    }

    #[test]
    fn test_centered_start_offset() {
        assert_eq!(centered_start_offset(30, 10), 10.0);
        assert_eq!(centered_start_offset(40, 10), 15.0);
        assert_eq!(centered_start_offset(31, 10), 10.5);
        assert_eq!(centered_start_offset(10, 10), 0.0);
        assert_eq!(centered_start_offset(5, 10), 0.0);
        assert_eq!(centered_start_offset(0, 10), 0.0);
    }

    #[test]
    fn test_trim_args_use_stream_copy() {
        let dir = tempfile::tempdir().unwrap();
        let job = TrimJob::create(Some(dir.path()), 40, 10).unwrap();
        let args = FfmpegTranscoder::trim_args(&job);

        let position = |flag: &str| args.iter().position(|a| a == flag).unwrap();
        assert_eq!(args[position("-ss") + 1], "15.000");
        assert_eq!(args[position("-t") + 1], "10");
        assert_eq!(args[position("-c") + 1], "copy");
        assert_eq!(args[position("-i") + 1], job.input_path().display().to_string());
        assert!(position("-ss") < position("-i"));
        assert_eq!(args.last().unwrap(), &job.output_path().display().to_string());
    }

    #[test]
    fn test_job_cleanup_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let job = TrimJob::create(Some(dir.path()), 30, 10).unwrap();
        let input = job.input_path().to_path_buf();
        let output = job.output_path().to_path_buf();
        assert_ne!(input, output);
        assert!(input.exists() && output.exists());

        job.cleanup();
        assert!(!input.exists());
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_trim_success_sends_to_every_destination() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(FakeGateway::new());
        let paths = Arc::new(Mutex::new(Vec::new()));

        let mut transcoder = MockTranscoder::new();
        let recorded = paths.clone();
        transcoder
            .expect_trim()
            .withf(|job| job.start_offset() == 15.0 && job.clip_secs() == 10)
            .times(1)
            .returning(move |job| {
                recorded.lock().push(job.input_path().to_path_buf());
                recorded.lock().push(job.output_path().to_path_buf());
                assert!(std::fs::metadata(job.input_path()).unwrap().len() > 0);
                std::fs::write(job.output_path(), b"clip").unwrap();
                Ok(())
            });

        let pipeline = pipeline(gateway.clone(), transcoder, dir.path());
        let video = test_video(10, 100 * 1024 * 1024, 40);

        pipeline
            .trim_and_forward(&video, &[-1, -2], 10)
            .await
            .unwrap();

        let sends: Vec<_> = gateway
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::SendFile {
                    chat_id,
                    caption,
                    existed,
                    ..
                } => Some((chat_id, caption, existed)),
                _ => None,
            })
            .collect();
        assert_eq!(sends.len(), 2);
        assert_eq!(sends[0].0, -1);
        assert_eq!(sends[1].0, -2);
        for (_, caption, existed) in &sends {
            assert!(caption.contains("10s"));
            assert!(*existed);
        }

        assert_removed(&paths.lock());
    }

    #[tokio::test]
    async fn test_short_source_starts_at_zero() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(FakeGateway::new());

        let mut transcoder = MockTranscoder::new();
        transcoder
            .expect_trim()
            .withf(|job| job.start_offset() == 0.0)
            .times(1)
            .returning(|job| {
                std::fs::write(job.output_path(), b"clip").unwrap();
                Ok(())
            });

        let pipeline = pipeline(gateway, transcoder, dir.path());
        let video = test_video(11, 100 * 1024 * 1024, 5);

        assert!(pipeline.trim_and_forward(&video, &[-1], 10).await.is_ok());
    }

    #[tokio::test]
    async fn test_transcoder_failure_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(FakeGateway::new());
        let paths = Arc::new(Mutex::new(Vec::new()));
        let transcoder = failing_transcoder(paths.clone(), || TrimError::TranscoderFailed {
            status: "exit status: 1".to_string(),
            stderr: "Invalid data found when processing input".to_string(),
        });

        let pipeline = pipeline(gateway.clone(), transcoder, dir.path());
        let video = test_video(12, 100 * 1024 * 1024, 40);

        let result = pipeline.trim_and_forward(&video, &[-1], 10).await;

        match result {
            Err(DispositionError::Trim(TrimError::TranscoderFailed { stderr, .. })) => {
                assert!(stderr.contains("Invalid data"));
            }
            other => panic!("Expected TranscoderFailed, got {other:?}"),
        }
        assert!(!gateway
            .calls()
            .iter()
            .any(|c| matches!(c, Call::SendFile { .. })));
        assert_removed(&paths.lock());
    }

    #[tokio::test]
    async fn test_timeout_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(FakeGateway::new());
        let paths = Arc::new(Mutex::new(Vec::new()));
        let transcoder =
            failing_transcoder(paths.clone(), || TrimError::Timeout(Duration::from_secs(1)));

        let pipeline = pipeline(gateway, transcoder, dir.path());
        let result = pipeline
            .trim_and_forward(&test_video(13, 1, 40), &[-1], 10)
            .await;

        assert!(matches!(
            result,
            Err(DispositionError::Trim(TrimError::Timeout(_)))
        ));
        assert_removed(&paths.lock());
    }

    #[tokio::test]
    async fn test_download_failure_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(FakeGateway::new());
        gateway.fail_download();
        let mut transcoder = MockTranscoder::new();
        transcoder.expect_trim().never();

        let pipeline = pipeline(gateway.clone(), transcoder, dir.path());
        let result = pipeline
            .trim_and_forward(&test_video(14, 1, 40), &[-1], 10)
            .await;

        assert!(matches!(
            result,
            Err(DispositionError::Gateway(GatewayError::Download(_)))
        ));
        let downloads = gateway.downloads();
        assert_eq!(downloads.len(), 1);
        assert!(!downloads[0].exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_empty_download_is_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(FakeGateway::new());
        gateway.set_download_content(b"");
        let mut transcoder = MockTranscoder::new();
        transcoder.expect_trim().never();

        let pipeline = pipeline(gateway, transcoder, dir.path());
        let result = pipeline
            .trim_and_forward(&test_video(15, 1, 40), &[-1], 10)
            .await;

        assert!(matches!(
            result,
            Err(DispositionError::Trim(TrimError::MissingInput(_)))
        ));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_empty_output_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(FakeGateway::new());
        let paths = Arc::new(Mutex::new(Vec::new()));
        let transcoder = recording_transcoder(paths.clone(), b"");

        let pipeline = pipeline(gateway.clone(), transcoder, dir.path());
        let result = pipeline
            .trim_and_forward(&test_video(16, 1, 40), &[-1], 10)
            .await;

        assert!(matches!(
            result,
            Err(DispositionError::Trim(TrimError::EmptyOutput))
        ));
        assert!(gateway.mutations().iter().all(|c| !matches!(c, Call::SendFile { .. })));
        assert_removed(&paths.lock());
    }

    #[tokio::test]
    async fn test_send_failure_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(FakeGateway::new());
        gateway.fail_send_file();
        let paths = Arc::new(Mutex::new(Vec::new()));
        let transcoder = recording_transcoder(paths.clone(), b"clip");

        let pipeline = pipeline(gateway, transcoder, dir.path());
        let result = pipeline
            .trim_and_forward(&test_video(17, 1, 40), &[-1], 10)
            .await;

        assert!(matches!(result, Err(DispositionError::Gateway(_))));
        assert_removed(&paths.lock());
    }

    /// Never finishes; signals once it has seen the job
    struct StallingTranscoder {
        paths: Arc<Mutex<Vec<PathBuf>>>,
        started: Arc<Notify>,
    }

    #[async_trait]
    impl Transcoder for StallingTranscoder {
        async fn trim(&self, job: &TrimJob) -> Result<(), TrimError> {
            self.paths.lock().push(job.input_path().to_path_buf());
            self.paths.lock().push(job.output_path().to_path_buf());
            self.started.notify_one();
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_aborted_task_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(FakeGateway::new());
        let paths = Arc::new(Mutex::new(Vec::new()));
        let started = Arc::new(Notify::new());
        let transcoder = StallingTranscoder {
            paths: paths.clone(),
            started: started.clone(),
        };

        let pipeline = Arc::new(pipeline(gateway, transcoder, dir.path()));
        let video = test_video(18, 1, 40);
        let handle = tokio::spawn(async move {
            pipeline.trim_and_forward(&video, &[-1], 10).await
        });

        started.notified().await;
        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());

        assert_removed(&paths.lock());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ffmpeg_nonzero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let job = TrimJob::create(Some(dir.path()), 30, 10).unwrap();
        let transcoder = FfmpegTranscoder::new("false", Duration::from_secs(5));

        let result = transcoder.trim(&job).await;
        assert!(matches!(result, Err(TrimError::TranscoderFailed { .. })));
        job.cleanup();
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_ffmpeg_timeout_kills_transcoder() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("transcoder.pid");
        let script = dir.path().join("slow-ffmpeg");
        std::fs::write(
            &script,
            format!("#!/bin/sh\necho $$ > '{}'\nexec sleep 30\n", pid_file.display()),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let job = TrimJob::create(Some(dir.path()), 30, 10).unwrap();
        let transcoder =
            FfmpegTranscoder::new(script.display().to_string(), Duration::from_millis(500));

        let started = Instant::now();
        let result = transcoder.trim(&job).await;

        assert!(matches!(result, Err(TrimError::Timeout(t)) if t == Duration::from_millis(500)));
        assert!(started.elapsed() < Duration::from_secs(5));

        // The killed child is gone or only waiting to be reaped
        let pid = std::fs::read_to_string(&pid_file).unwrap().trim().to_string();
        let stat_path = format!("/proc/{pid}/stat");
        let mut alive = true;
        for _ in 0..100 {
            alive = match std::fs::read_to_string(&stat_path) {
                Ok(stat) => !stat.contains(") Z "),
                Err(_) => false,
            };
            if !alive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!alive);
        job.cleanup();
    }

    #[tokio::test]
    async fn test_ffmpeg_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let job = TrimJob::create(Some(dir.path()), 30, 10).unwrap();
        let transcoder =
            FfmpegTranscoder::new("/nonexistent/bin/ffmpeg", Duration::from_secs(5));

        let result = transcoder.trim(&job).await;
        assert!(matches!(result, Err(TrimError::Spawn(_))));
        job.cleanup();
    }
}
