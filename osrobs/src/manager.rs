//! Connection manager and the high-level compositor surface.
//!
//! [`ObsManager`] owns the connection lifecycle (connect, keyword-based
//! disconnect detection, exponential-backoff reconnect) and implements the
//! [`Compositor`] trait the handlers program against. Swapping the inner
//! client on reconnect is invisible to callers.

use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::ObsClient;
use crate::errors::{ObsError, Result};
use crate::protocol::{MediaEvent, MediaState, MediaStatus};

/// Reconnect backoff parameters: base 2 s doubling to a 60 s cap,
/// unbounded retries until shutdown.
const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(2);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(60);

/// The request surface the rotation handlers program against.
///
/// `ObsManager` is the production implementation; tests substitute their
/// own recording fakes.
#[async_trait]
pub trait Compositor: Send + Sync {
    /// Whether the connection is believed to be alive.
    fn is_connected(&self) -> bool;

    async fn current_scene(&self) -> Result<String>;
    async fn switch_scene(&self, scene: &str) -> Result<()>;
    /// Returns the required scenes that are missing.
    async fn verify_scenes(&self, required: &[String]) -> Result<Vec<String>>;

    /// Empty the media source playlist so the OS releases file locks.
    async fn stop_media_source(&self, source: &str) -> Result<()>;
    /// Point the media source at `folder` (or an explicit file list) with
    /// loop on and shuffle off. Returns the filenames loaded, in order.
    async fn update_media_source(
        &self,
        source: &str,
        folder: &Path,
        playlist: Option<&[String]>,
    ) -> Result<Vec<String>>;
    async fn media_status(&self, source: &str) -> Result<MediaStatus>;
    async fn seek_media(&self, source: &str, cursor_ms: i64) -> Result<()>;
    async fn play_media(&self, source: &str) -> Result<()>;
    /// Skip to the next playlist entry.
    async fn next_media(&self, source: &str) -> Result<()>;

    async fn render_total_frames(&self) -> Result<u64>;
    async fn stream_active(&self) -> Result<bool>;
    async fn start_stream(&self) -> Result<()>;

    async fn show_alert(&self, scene: &str, source: &str, text: &str) -> Result<()>;
    async fn hide_alert(&self, scene: &str, source: &str) -> Result<()>;
}

/// Owns the obs-websocket connection for the lifetime of the process.
pub struct ObsManager {
    host: String,
    port: u16,
    password: String,
    media_source_name: String,
    client: RwLock<Option<ObsClient>>,
    connected: AtomicBool,
    event_tx: crossbeam_channel::Sender<MediaEvent>,
    event_rx: crossbeam_channel::Receiver<MediaEvent>,
}

impl ObsManager {
    pub fn new(host: &str, port: u16, password: &str, media_source_name: &str) -> Self {
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        Self {
            host: host.to_string(),
            port,
            password: password.to_string(),
            media_source_name: media_source_name.to_string(),
            client: RwLock::new(None),
            connected: AtomicBool::new(false),
            event_tx,
            event_rx,
        }
    }

    /// The queue of normalised media events fed by the event socket.
    pub fn events(&self) -> crossbeam_channel::Receiver<MediaEvent> {
        self.event_rx.clone()
    }

    /// Establish a fresh connection, replacing any previous client.
    pub async fn connect(&self) -> Result<()> {
        let client = ObsClient::connect(
            &self.host,
            self.port,
            &self.password,
            &self.media_source_name,
            self.event_tx.clone(),
        )
        .await?;
        *self.client.write().unwrap() = Some(client);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Reconnect with exponential backoff until success or shutdown.
    ///
    /// Returns false only when shutdown was requested.
    pub async fn reconnect_with_backoff(&self, shutdown: &CancellationToken) -> bool {
        let mut delay = RECONNECT_BASE_DELAY;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            info!("OBS reconnect attempt {} (waiting {:?})...", attempt, delay);
            tokio::select! {
                _ = shutdown.cancelled() => return false,
                _ = tokio::time::sleep(delay) => {}
            }
            match self.connect().await {
                Ok(()) => {
                    info!("OBS reconnected after {} attempt(s)", attempt);
                    return true;
                }
                Err(e) => debug!("OBS reconnect failed: {}", e),
            }
            let jitter = Duration::from_millis(rand::rng().random_range(0..250));
            delay = (delay * 2).min(RECONNECT_MAX_DELAY) + jitter;
            delay = delay.min(RECONNECT_MAX_DELAY);
        }
    }

    fn current_client(&self) -> Result<ObsClient> {
        let guard = self.client.read().unwrap();
        match guard.as_ref() {
            Some(client) if client.is_alive() => Ok(client.clone()),
            _ => {
                self.connected.store(false, Ordering::SeqCst);
                Err(ObsError::Disconnected)
            }
        }
    }

    async fn request(&self, request_type: &str, data: Option<Value>) -> Result<Value> {
        let client = self.current_client()?;
        match client.request(request_type, data).await {
            Ok(value) => Ok(value),
            Err(e) => {
                if e.is_connectivity() && self.connected.swap(false, Ordering::SeqCst) {
                    warn!("OBS connection lost (detected from error: {})", e);
                }
                Err(e)
            }
        }
    }

    async fn scene_item_id(&self, scene: &str, source: &str) -> Result<i64> {
        let response = self
            .request(
                "GetSceneItemId",
                Some(json!({"sceneName": scene, "sourceName": source})),
            )
            .await?;
        response
            .get("sceneItemId")
            .and_then(|v| v.as_i64())
            .ok_or(ObsError::MissingField("sceneItemId"))
    }
}

#[async_trait]
impl Compositor for ObsManager {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn current_scene(&self) -> Result<String> {
        let response = self.request("GetCurrentProgramScene", None).await?;
        response
            .get("currentProgramSceneName")
            .or_else(|| response.get("sceneName"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or(ObsError::MissingField("currentProgramSceneName"))
    }

    async fn switch_scene(&self, scene: &str) -> Result<()> {
        self.request(
            "SetCurrentProgramScene",
            Some(json!({"sceneName": scene})),
        )
        .await?;
        info!("Switched to scene: {}", scene);
        Ok(())
    }

    async fn verify_scenes(&self, required: &[String]) -> Result<Vec<String>> {
        let response = self.request("GetSceneList", None).await?;
        let names: Vec<&str> = response
            .get("scenes")
            .and_then(|v| v.as_array())
            .map(|scenes| {
                scenes
                    .iter()
                    .filter_map(|s| s.get("sceneName").and_then(|n| n.as_str()))
                    .collect()
            })
            .unwrap_or_default();

        let missing: Vec<String> = required
            .iter()
            .filter(|scene| !names.contains(&scene.as_str()))
            .cloned()
            .collect();
        Ok(missing)
    }

    async fn stop_media_source(&self, source: &str) -> Result<()> {
        self.request(
            "SetInputSettings",
            Some(json!({
                "inputName": source,
                "inputSettings": {"playlist": []},
                "overlay": true,
            })),
        )
        .await?;
        info!("Stopped media source: {}", source);
        Ok(())
    }

    async fn update_media_source(
        &self,
        source: &str,
        folder: &Path,
        playlist: Option<&[String]>,
    ) -> Result<Vec<String>> {
        let filenames: Vec<String> = match playlist {
            Some(list) => list.to_vec(),
            None => osrutils::video_files_sorted(folder),
        };
        if filenames.is_empty() {
            error!("No video files found to add to media source");
            return Err(ObsError::EmptyPlaylist);
        }

        let entries: Vec<Value> = filenames
            .iter()
            .map(|name| {
                let path = folder.join(name);
                let absolute: PathBuf = std::path::absolute(&path).unwrap_or(path);
                json!({"value": absolute.to_string_lossy()})
            })
            .collect();

        self.request(
            "SetInputSettings",
            Some(json!({
                "inputName": source,
                "inputSettings": {
                    "loop": true,
                    "shuffle": false,
                    "playlist": entries,
                },
                "overlay": false,
            })),
        )
        .await?;

        info!("Updated media source with {} videos", filenames.len());
        Ok(filenames)
    }

    async fn media_status(&self, source: &str) -> Result<MediaStatus> {
        let response = self
            .request("GetMediaInputStatus", Some(json!({"inputName": source})))
            .await?;
        let state = response
            .get("mediaState")
            .and_then(|v| v.as_str())
            .map(MediaState::parse)
            .unwrap_or(MediaState::Unknown(String::new()));
        Ok(MediaStatus {
            state,
            cursor_ms: response.get("mediaCursor").and_then(|v| v.as_i64()),
            duration_ms: response.get("mediaDuration").and_then(|v| v.as_i64()),
        })
    }

    async fn seek_media(&self, source: &str, cursor_ms: i64) -> Result<()> {
        self.request(
            "SetMediaInputCursor",
            Some(json!({"inputName": source, "mediaCursor": cursor_ms})),
        )
        .await?;
        info!("Seeked {} to {}ms ({:.1}s)", source, cursor_ms, cursor_ms as f64 / 1000.0);
        Ok(())
    }

    async fn play_media(&self, source: &str) -> Result<()> {
        self.request(
            "TriggerMediaInputAction",
            Some(json!({
                "inputName": source,
                "mediaAction": "OBS_WEBSOCKET_MEDIA_INPUT_ACTION_PLAY",
            })),
        )
        .await?;
        Ok(())
    }

    async fn next_media(&self, source: &str) -> Result<()> {
        self.request(
            "TriggerMediaInputAction",
            Some(json!({
                "inputName": source,
                "mediaAction": "OBS_WEBSOCKET_MEDIA_INPUT_ACTION_NEXT",
            })),
        )
        .await?;
        info!("Triggered next on {}", source);
        Ok(())
    }

    async fn render_total_frames(&self) -> Result<u64> {
        let response = self.request("GetStats", None).await?;
        response
            .get("renderTotalFrames")
            .and_then(|v| v.as_f64())
            .map(|f| f as u64)
            .ok_or(ObsError::MissingField("renderTotalFrames"))
    }

    async fn stream_active(&self) -> Result<bool> {
        let response = self.request("GetStreamStatus", None).await?;
        response
            .get("outputActive")
            .and_then(|v| v.as_bool())
            .ok_or(ObsError::MissingField("outputActive"))
    }

    async fn start_stream(&self) -> Result<()> {
        self.request("StartStream", None).await?;
        Ok(())
    }

    async fn show_alert(&self, scene: &str, source: &str, text: &str) -> Result<()> {
        self.request(
            "SetInputSettings",
            Some(json!({
                "inputName": source,
                "inputSettings": {"text": text},
                "overlay": true,
            })),
        )
        .await?;
        let item_id = self.scene_item_id(scene, source).await?;
        self.request(
            "SetSceneItemEnabled",
            Some(json!({
                "sceneName": scene,
                "sceneItemId": item_id,
                "sceneItemEnabled": true,
            })),
        )
        .await?;
        Ok(())
    }

    async fn hide_alert(&self, scene: &str, source: &str) -> Result<()> {
        let item_id = self.scene_item_id(scene, source).await?;
        self.request(
            "SetSceneItemEnabled",
            Some(json!({
                "sceneName": scene,
                "sceneItemId": item_id,
                "sceneItemEnabled": false,
            })),
        )
        .await?;
        Ok(())
    }
}
