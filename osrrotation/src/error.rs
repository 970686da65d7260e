use thiserror::Error;

#[derive(Error, Debug)]
pub enum RotationError {
    #[error("no playlists available for rotation")]
    NoPlaylists,
    #[error("download validation failed for {0}")]
    ValidationFailed(std::path::PathBuf),
    #[error("content switch refused: temp playback is active")]
    TempPlaybackActive,
    #[error("no active rotation session")]
    NoSession,
    #[error("store error: {0}")]
    Store(#[from] osrstore::StoreError),
    #[error("compositor error: {0}")]
    Compositor(#[from] osrobs::ObsError),
    #[error("download error: {0}")]
    Download(#[from] osrdownload::DownloadError),
    #[error("config error: {0}")]
    Config(#[from] osrconfig::ConfigError),
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid prepared rotation slug: {0}")]
    InvalidSlug(String),
    #[error("prepared rotation not found: {0}")]
    PreparedNotFound(String),
    #[error("{0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, RotationError>;
