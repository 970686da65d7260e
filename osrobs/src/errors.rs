use thiserror::Error;

#[derive(Error, Debug)]
pub enum ObsError {
    #[error("OBS WebSocket is not connected")]
    Disconnected,
    #[error("OBS WebSocket transport error: {0}")]
    Transport(String),
    #[error("OBS handshake failed: {0}")]
    Handshake(String),
    #[error("OBS request '{request}' failed with code {code}: {comment}")]
    RequestFailed {
        request: String,
        code: u32,
        comment: String,
    },
    #[error("OBS request '{0}' timed out")]
    Timeout(String),
    #[error("Missing {0} field in OBS response")]
    MissingField(&'static str),
    #[error("No video files found to add to media source")]
    EmptyPlaylist,
    #[error("Freeze recovery failed: {0}")]
    Recovery(String),
}

impl ObsError {
    /// Whether this error looks like a dead connection rather than a bad
    /// request. The text scan mirrors the failure modes a dropped OBS
    /// process produces: timeouts, resets and raw socket errors.
    pub fn is_connectivity(&self) -> bool {
        match self {
            ObsError::Disconnected | ObsError::Timeout(_) => true,
            ObsError::Transport(msg) | ObsError::Handshake(msg) => {
                let lower = msg.to_lowercase();
                [
                    "timeout",
                    "timed out",
                    "forcibly closed",
                    "websocket",
                    "connection",
                    "socket",
                    "broken pipe",
                    "reset by peer",
                ]
                .iter()
                .any(|hint| lower.contains(hint))
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ObsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_classification() {
        assert!(ObsError::Disconnected.is_connectivity());
        assert!(ObsError::Timeout("GetStats".into()).is_connectivity());
        assert!(ObsError::Transport("Connection reset by peer (os error 104)".into())
            .is_connectivity());
        assert!(
            ObsError::Transport("An existing connection was forcibly closed".into())
                .is_connectivity()
        );
        assert!(!ObsError::RequestFailed {
            request: "SetInputSettings".into(),
            code: 600,
            comment: "no such input".into(),
        }
        .is_connectivity());
        assert!(!ObsError::EmptyPlaylist.is_connectivity());
    }
}
