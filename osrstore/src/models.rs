//! Types des enregistrements exposés par le store.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Une playlist distante synchronisée depuis la configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Playlist {
    /// Clé primaire en base.
    pub id: i64,
    /// Nom unique (insensible à la casse).
    pub name: String,
    /// URL distante passée au téléchargeur.
    pub url: String,
    /// Dernière lecture complète (RFC3339), `None` si jamais jouée.
    pub last_played: Option<String>,
    /// Nombre de rotations complétées contenant cette playlist.
    pub play_count: i64,
    pub enabled: bool,
    /// Plus la valeur est haute, plus la playlist est prioritaire à égalité.
    pub priority: i64,
}

/// Une vidéo téléchargée, identifiée par `(playlist_id, filename)`.
///
/// Le nom stocké est TOUJOURS sans préfixe d'ordre (`NN_`) — l'appelant
/// doit retirer le préfixe avant toute recherche.
#[derive(Debug, Clone, PartialEq)]
pub struct Video {
    pub id: i64,
    pub playlist_id: i64,
    /// Nom de playlist dénormalisé pour la résolution de catégorie sans join.
    pub playlist_name: Option<String>,
    pub filename: String,
    pub title: Option<String>,
    pub duration_seconds: i64,
    pub file_size_mb: i64,
    /// Horodatage du téléchargement (RFC3339).
    pub downloaded_at: Option<String>,
}

/// Statut de préparation d'une playlist de la prochaine rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrepStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "COMPLETED")]
    Completed,
}

/// État de lecture temporaire persisté pour la reprise après crash.
#[derive(Debug, Clone, PartialEq)]
pub struct TempPlaybackState {
    /// Noms de fichiers de la playlist du lecteur au moment de l'activation.
    pub playlist: Vec<String>,
    /// Position dans la playlist au moment de l'activation.
    pub position: i64,
    /// Dossier depuis lequel le lecteur diffuse (dossier pending).
    pub folder: String,
    /// Curseur intra-vidéo au moment de l'activation (ms).
    pub cursor_ms: i64,
}

/// Une session de rotation avec ses colonnes de reprise et de préparation.
#[derive(Debug, Clone)]
pub struct RotationSession {
    pub id: i64,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
    /// Ids des playlists sélectionnées, dans l'ordre de sélection.
    pub playlists_selected: Vec<i64>,
    pub total_duration_seconds: i64,
    pub stream_title: Option<String>,
    /// Au plus une session porte ce drapeau à tout instant.
    pub is_current: bool,
    /// Noms des playlists réellement jouées (audit).
    pub current_playlists: Vec<String>,
    /// Noms des playlists en cours de préparation pour la rotation suivante.
    pub next_playlists: Vec<String>,
    pub next_playlists_status: HashMap<String, PrepStatus>,
    pub temp_playback_active: bool,
    /// Curseur de lecture sauvegardé à chaque tick (ms).
    pub playback_cursor_ms: i64,
    /// Nom (sans préfixe) de la vidéo en cours au dernier tick.
    pub playback_current_video: Option<String>,
    /// Données de suspension du protocole d'override (JSON libre).
    pub suspension_data: Option<serde_json::Value>,
}

impl RotationSession {
    /// Vrai quand toutes les playlists préparées sont COMPLETED.
    ///
    /// Une liste vide n'est pas considérée comme prête : il n'y a alors
    /// simplement rien de préparé.
    pub fn next_rotation_ready(&self) -> bool {
        !self.next_playlists.is_empty()
            && self
                .next_playlists
                .iter()
                .all(|name| self.next_playlists_status.get(name) == Some(&PrepStatus::Completed))
    }

    /// Noms préparés encore en attente de téléchargement.
    pub fn pending_next_playlists(&self) -> Vec<String> {
        self.next_playlists
            .iter()
            .filter(|name| self.next_playlists_status.get(*name) != Some(&PrepStatus::Completed))
            .cloned()
            .collect()
    }
}

/// Entrée du journal de lecture (append-only).
#[derive(Debug, Clone)]
pub struct PlaybackLogEntry {
    pub id: i64,
    pub video_id: Option<i64>,
    pub session_id: Option<i64>,
    pub video_filename: String,
    pub playlist_name: Option<String>,
    pub played_at: Option<String>,
}
