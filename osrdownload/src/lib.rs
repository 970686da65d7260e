//! Background download pipeline.
//!
//! One worker task consumes a job channel, so playlist downloads are
//! strictly serial — parallel fetches get the remote host throttling us.
//! The worker never touches the store: finished files go through the
//! [`RegistrationQueue`] and the two `pending_db` hand-off slots, which
//! the tick loop drains on the store-owner thread.

pub mod probe;
pub mod queue;
pub mod ytdlp;

pub use queue::{RegistrationQueue, VideoRegistration};
pub use ytdlp::YtDlpOptions;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("{0} not found on PATH")]
    ToolMissing(&'static str),
    #[error("subprocess error: {0}")]
    Spawn(std::io::Error),
    #[error("download worker is not running")]
    WorkerGone,
    #[error("another download batch is already in progress")]
    Busy,
}

pub type Result<T> = std::result::Result<T, DownloadError>;

/// Minimal playlist reference handed to the worker (id + name + URL).
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistRef {
    pub id: i64,
    pub name: String,
    pub url: String,
}

/// What a batch was downloaded for; consumers route outcomes on this.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchKind {
    /// Blocking download for a session being started right now.
    Rotation,
    /// Background pre-staging of the next rotation.
    NextRotation,
    /// Auto-resume of interrupted downloads after a restart.
    Resume,
    /// Fallback-mode retry probe.
    FallbackRetry,
    /// Download into a prepared-rotation folder (identified by its slug).
    Prepared(String),
}

/// Result of one download batch.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub kind: BatchKind,
    /// Per-playlist success, in download order.
    pub playlist_results: Vec<(String, bool)>,
    pub success: bool,
    pub total_duration_seconds: i64,
}

impl BatchOutcome {
    pub fn playlist_names(&self) -> Vec<String> {
        self.playlist_results.iter().map(|(name, _)| name.clone()).collect()
    }
}

struct DownloadJob {
    playlists: Vec<PlaylistRef>,
    folder: PathBuf,
    options: YtDlpOptions,
    kind: BatchKind,
    /// Queue `set_next_playlists` for the main thread at batch start.
    init_db: bool,
    /// On success, stage the batch as the next prepared rotation and queue
    /// `complete_next_playlists` for the main thread.
    mark_prepared: bool,
    completion: Option<oneshot::Sender<BatchOutcome>>,
}

#[derive(Default)]
struct SharedState {
    in_progress: bool,
    prepared: Option<Vec<PlaylistRef>>,
    pending_initialize: Option<Vec<String>>,
    pending_complete: Option<Vec<String>>,
}

/// Owner of the single download worker and its hand-off queues.
pub struct DownloadManager {
    job_tx: mpsc::UnboundedSender<DownloadJob>,
    registrations: RegistrationQueue,
    state: Arc<Mutex<SharedState>>,
    outcome_rx: crossbeam_channel::Receiver<BatchOutcome>,
    shutdown: CancellationToken,
}

impl DownloadManager {
    pub fn new() -> Self {
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = crossbeam_channel::unbounded();
        let registrations = RegistrationQueue::new();
        let state = Arc::new(Mutex::new(SharedState::default()));
        let shutdown = CancellationToken::new();

        tokio::spawn(worker_loop(
            job_rx,
            registrations.clone(),
            state.clone(),
            outcome_tx,
            shutdown.clone(),
        ));

        Self {
            job_tx,
            registrations,
            state,
            outcome_rx,
            shutdown,
        }
    }

    pub fn registrations(&self) -> &RegistrationQueue {
        &self.registrations
    }

    /// Batch outcomes, for the fallback failure counter and prepared
    /// rotation bookkeeping. Drained by the tick loop.
    pub fn outcomes(&self) -> crossbeam_channel::Receiver<BatchOutcome> {
        self.outcome_rx.clone()
    }

    pub fn is_in_progress(&self) -> bool {
        self.state.lock().unwrap().in_progress
    }

    /// Take the staged next-rotation playlists, if a background batch
    /// finished successfully.
    pub fn take_prepared(&self) -> Option<Vec<PlaylistRef>> {
        self.state.lock().unwrap().prepared.take()
    }

    pub fn has_prepared(&self) -> bool {
        self.state.lock().unwrap().prepared.is_some()
    }

    /// Stage an already-downloaded set as the next rotation (used when a
    /// fully-prepared set is validated on startup).
    pub fn set_prepared(&self, playlists: Vec<PlaylistRef>) {
        self.state.lock().unwrap().prepared = Some(playlists);
    }

    /// Names whose `next_playlists` row should be initialised (PENDING).
    pub fn take_pending_initialize(&self) -> Option<Vec<String>> {
        self.state.lock().unwrap().pending_initialize.take()
    }

    /// Names whose `next_playlists_status` should flip to COMPLETED.
    pub fn take_pending_complete(&self) -> Option<Vec<String>> {
        self.state.lock().unwrap().pending_complete.take()
    }

    /// Start a background batch. Returns false when a batch is running.
    pub fn spawn_batch(
        &self,
        playlists: Vec<PlaylistRef>,
        folder: &Path,
        options: YtDlpOptions,
        kind: BatchKind,
        init_db: bool,
        mark_prepared: bool,
    ) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.in_progress {
            debug!("Download batch refused: worker busy");
            return false;
        }
        state.in_progress = true;
        drop(state);

        let job = DownloadJob {
            playlists,
            folder: folder.to_path_buf(),
            options,
            kind,
            init_db,
            mark_prepared,
            completion: None,
        };
        if self.job_tx.send(job).is_err() {
            self.state.lock().unwrap().in_progress = false;
            error!("Download worker is gone; batch dropped");
            return false;
        }
        true
    }

    /// Run a batch and wait for its outcome (still off the main thread —
    /// the worker does the downloading, this merely awaits it).
    pub async fn run_batch(
        &self,
        playlists: Vec<PlaylistRef>,
        folder: &Path,
        options: YtDlpOptions,
        kind: BatchKind,
    ) -> Result<BatchOutcome> {
        {
            let mut state = self.state.lock().unwrap();
            if state.in_progress {
                return Err(DownloadError::Busy);
            }
            state.in_progress = true;
        }

        let (completion_tx, completion_rx) = oneshot::channel();
        let job = DownloadJob {
            playlists,
            folder: folder.to_path_buf(),
            options,
            kind,
            init_db: false,
            mark_prepared: false,
            completion: Some(completion_tx),
        };
        if self.job_tx.send(job).is_err() {
            self.state.lock().unwrap().in_progress = false;
            return Err(DownloadError::WorkerGone);
        }
        completion_rx.await.map_err(|_| DownloadError::WorkerGone)
    }

    /// Signal shutdown. In-flight yt-dlp processes handle their own
    /// termination; the worker stops between playlists.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait up to `timeout` for an in-flight batch to wind down.
    pub async fn wait_for_idle(&self, timeout: std::time::Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.is_in_progress() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        }
        if self.is_in_progress() {
            warn!("Download worker still busy after {:?}; abandoning", timeout);
        }
    }
}

impl Default for DownloadManager {
    fn default() -> Self {
        Self::new()
    }
}

async fn worker_loop(
    mut job_rx: mpsc::UnboundedReceiver<DownloadJob>,
    registrations: RegistrationQueue,
    state: Arc<Mutex<SharedState>>,
    outcome_tx: crossbeam_channel::Sender<BatchOutcome>,
    shutdown: CancellationToken,
) {
    while let Some(job) = job_rx.recv().await {
        if shutdown.is_cancelled() {
            break;
        }

        if job.init_db {
            let names = job.playlists.iter().map(|p| p.name.clone()).collect();
            state.lock().unwrap().pending_initialize = Some(names);
        }

        let outcome = process_job(&job, &registrations, &shutdown).await;

        {
            let mut state = state.lock().unwrap();
            if outcome.success && job.mark_prepared {
                state.prepared = Some(job.playlists.clone());
                state.pending_complete = Some(outcome.playlist_names());
            }
            state.in_progress = false;
        }

        let _ = outcome_tx.send(outcome.clone());
        if let Some(completion) = job.completion {
            let _ = completion.send(outcome);
        }
    }
    debug!("Download worker stopped");
}

async fn process_job(
    job: &DownloadJob,
    registrations: &RegistrationQueue,
    shutdown: &CancellationToken,
) -> BatchOutcome {
    info!(
        "Downloading batch ({:?}): {:?}",
        job.kind,
        job.playlists.iter().map(|p| p.name.as_str()).collect::<Vec<_>>()
    );

    let mut playlist_results = Vec::with_capacity(job.playlists.len());
    let mut total_duration = 0i64;

    for playlist in &job.playlists {
        if shutdown.is_cancelled() {
            warn!("Shutdown requested; remaining playlists in batch skipped");
            playlist_results.push((playlist.name.clone(), false));
            continue;
        }

        let downloaded =
            match ytdlp::download_playlist(&playlist.url, &job.folder, &job.options).await {
                Ok(ok) => ok,
                Err(e) => {
                    error!("Error downloading {}: {}", playlist.name, e);
                    false
                }
            };

        if downloaded {
            total_duration +=
                register_downloaded_videos(&job.folder, playlist, registrations).await;
        } else {
            warn!("Failed to download playlist: {}", playlist.name);
        }
        playlist_results.push((playlist.name.clone(), downloaded));
    }

    let success = playlist_results.iter().all(|(_, ok)| *ok);
    BatchOutcome {
        kind: job.kind.clone(),
        playlist_results,
        success,
        total_duration_seconds: total_duration,
    }
}

/// Queue every file of `playlist` present in `folder` for registration.
///
/// Registration is idempotent at the store level, so re-queueing a file
/// that survived a previous batch is harmless.
async fn register_downloaded_videos(
    folder: &Path,
    playlist: &PlaylistRef,
    registrations: &RegistrationQueue,
) -> i64 {
    let files = osrutils::video_files_sorted(folder);
    if files.is_empty() {
        warn!("No video files found in {}", folder.display());
        return 0;
    }

    let mut total_duration = 0i64;
    let mut registered = 0usize;

    for filename in files {
        if !osrutils::folders::stem_matches_playlist(&filename, &playlist.name) {
            continue;
        }
        let path = folder.join(&filename);
        let duration = probe::video_duration_seconds(&path).await;
        let file_size_mb = std::fs::metadata(&path)
            .map(|m| (m.len() / (1024 * 1024)) as i64)
            .unwrap_or(0);

        registrations.enqueue(VideoRegistration {
            playlist_id: playlist.id,
            playlist_name: playlist.name.clone(),
            filename: filename.clone(),
            title: osrutils::extract_title_from_filename(&filename),
            duration_seconds: duration,
            file_size_mb,
        });
        total_duration += duration;
        registered += 1;
    }

    info!(
        "Queued {} videos for {}, total: {}s",
        registered, playlist.name, total_duration
    );
    total_duration
}
