//! Store SQLite du contrôleur de rotation.
//!
//! Base embarquée mono-écrivain protégée par un verrou de processus. Chaque
//! opération publique prend le verrou une seule fois et s'exécute dans une
//! transaction dédiée : soit elle est validée entièrement, soit elle est
//! annulée. Les recherches imbriquées (ex. journal de lecture → vidéo)
//! passent par des helpers internes sur `&Connection` pour ne jamais
//! reprendre le verrou.
//!
//! Le schéma est créé de façon idempotente au démarrage ; les colonnes
//! ajoutées au fil des versions sont insérées par `ALTER TABLE` (compat
//! ascendante uniquement).

mod models;
mod sessions;

pub use models::{
    Playlist, PlaybackLogEntry, PrepStatus, RotationSession, TempPlaybackState, Video,
};

use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

/// Erreurs typées du store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("malformed JSON in column {column}: {source}")]
    Json {
        column: &'static str,
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Paramètres de synchronisation d'une playlist depuis la configuration.
#[derive(Debug, Clone)]
pub struct PlaylistSync {
    pub name: String,
    pub url: String,
    pub enabled: bool,
    pub priority: i64,
}

/// Base SQLite du contrôleur (playlists, vidéos, sessions, journal).
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Ouvre (ou crée) la base au chemin donné et initialise le schéma.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Sqlite(rusqlite::Error::SqliteFailure(
                        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
                        Some(format!("cannot create {}: {}", parent.display(), e)),
                    ))
                })?;
            }
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Base en mémoire, utilisée par les tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS playlists (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL COLLATE NOCASE UNIQUE,
                url TEXT NOT NULL,
                last_played TEXT,
                play_count INTEGER DEFAULT 0,
                enabled INTEGER DEFAULT 1,
                priority INTEGER DEFAULT 1,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS videos (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                playlist_id INTEGER NOT NULL,
                playlist_name TEXT,
                filename TEXT NOT NULL,
                title TEXT,
                duration_seconds INTEGER DEFAULT 0,
                file_size_mb INTEGER DEFAULT 0,
                downloaded_at TEXT DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (playlist_id) REFERENCES playlists(id),
                UNIQUE(playlist_id, filename)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS rotation_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                started_at TEXT DEFAULT CURRENT_TIMESTAMP,
                ended_at TEXT,
                playlists_selected TEXT,
                total_duration_seconds INTEGER DEFAULT 0,
                stream_title TEXT,
                is_current INTEGER DEFAULT 0
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS playback_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                video_id INTEGER,
                session_id INTEGER,
                video_filename TEXT,
                playlist_name TEXT,
                played_at TEXT DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (video_id) REFERENCES videos(id),
                FOREIGN KEY (session_id) REFERENCES rotation_sessions(id)
            )",
            [],
        )?;

        // Colonnes ajoutées au fil des versions (compat ascendante).
        for column_def in [
            "current_playlists TEXT",
            "next_playlists TEXT",
            "next_playlists_status TEXT",
            "temp_playback_active INTEGER DEFAULT 0",
            "temp_playback_playlist TEXT",
            "temp_playback_position INTEGER DEFAULT 0",
            "temp_playback_folder TEXT",
            "temp_playback_cursor_ms INTEGER DEFAULT 0",
            "playback_cursor_ms INTEGER DEFAULT 0",
            "playback_current_video TEXT",
            "suspension_data TEXT",
        ] {
            add_column(&conn, "rotation_sessions", column_def);
        }

        info!("Store schema initialized");
        Ok(())
    }

    // ========================================================================
    // Playlists
    // ========================================================================

    /// Ajoute une playlist ; un nom déjà présent retourne l'id existant.
    pub fn add_playlist(&self, name: &str, url: &str, enabled: bool, priority: i64) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let inserted = conn.execute(
            "INSERT INTO playlists (name, url, enabled, priority)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name) DO NOTHING",
            params![name, url, enabled, priority],
        )?;
        if inserted > 0 {
            info!("Added playlist: {}", name);
        } else {
            debug!("Playlist already exists: {}", name);
        }
        let id =
            conn.query_row("SELECT id FROM playlists WHERE name = ?1", [name], |row| {
                row.get(0)
            })?;
        Ok(id)
    }

    /// Synchronise le roster depuis la configuration (convergent :
    /// rejouer la même entrée ne change plus rien).
    pub fn sync_playlists_from_config(&self, entries: &[PlaylistSync]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for entry in entries {
            tx.execute(
                "INSERT INTO playlists (name, url, enabled, priority)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(name) DO UPDATE SET
                     url = excluded.url,
                     enabled = excluded.enabled,
                     priority = excluded.priority",
                params![entry.name, entry.url, entry.enabled, entry.priority],
            )?;
        }
        tx.commit()?;
        info!("Synced {} playlists from config", entries.len());
        Ok(())
    }

    /// Playlists activées, les jamais-jouées d'abord, puis par ancienneté
    /// de dernière lecture et priorité décroissante.
    pub fn enabled_playlists(&self) -> Result<Vec<Playlist>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, url, last_played, play_count, enabled, priority
             FROM playlists
             WHERE enabled = 1
             ORDER BY last_played ASC NULLS FIRST, priority DESC",
        )?;
        let playlists = stmt
            .query_map([], playlist_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(playlists)
    }

    pub fn playlist(&self, id: i64) -> Result<Option<Playlist>> {
        let conn = self.conn.lock().unwrap();
        playlist_by_id_tx(&conn, id)
    }

    /// Playlists correspondant aux noms donnés, dans l'ordre demandé.
    pub fn playlists_by_names(&self, names: &[String]) -> Result<Vec<Playlist>> {
        let conn = self.conn.lock().unwrap();
        let mut playlists = Vec::with_capacity(names.len());
        for name in names {
            let found = conn
                .query_row(
                    "SELECT id, name, url, last_played, play_count, enabled, priority
                     FROM playlists WHERE name = ?1",
                    [name],
                    playlist_from_row,
                )
                .optional()?;
            if let Some(playlist) = found {
                playlists.push(playlist);
            } else {
                warn!("Playlist '{}' not found in store", name);
            }
        }
        Ok(playlists)
    }

    /// Playlists correspondant aux ids donnés, dans l'ordre demandé.
    pub fn playlists_by_ids(&self, ids: &[i64]) -> Result<Vec<Playlist>> {
        let conn = self.conn.lock().unwrap();
        let mut playlists = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(playlist) = playlist_by_id_tx(&conn, *id)? {
                playlists.push(playlist);
            }
        }
        Ok(playlists)
    }

    /// Met à jour `last_played` et incrémente `play_count`.
    pub fn mark_playlist_played(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE playlists
             SET last_played = ?1, play_count = play_count + 1, updated_at = ?1
             WHERE id = ?2",
            params![now, id],
        )?;
        Ok(())
    }

    pub fn remove_playlist(&self, name: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute("DELETE FROM playlists WHERE name = ?1", [name])?;
        Ok(removed > 0)
    }

    pub fn rename_playlist(&self, old_name: &str, new_name: &str) -> Result<bool> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE playlists SET name = ?2 WHERE name = ?1",
            params![old_name, new_name],
        )?;
        tx.execute(
            "UPDATE videos SET playlist_name = ?2 WHERE playlist_name = ?1",
            params![old_name, new_name],
        )?;
        tx.commit()?;
        Ok(updated > 0)
    }

    // ========================================================================
    // Vidéos
    // ========================================================================

    /// Enregistre une vidéo ; `(playlist_id, filename)` déjà présent
    /// retourne l'id existant.
    pub fn add_video(
        &self,
        playlist_id: i64,
        filename: &str,
        title: Option<&str>,
        duration_seconds: i64,
        file_size_mb: i64,
        playlist_name: Option<&str>,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let inserted = conn.execute(
            "INSERT INTO videos (playlist_id, playlist_name, filename, title, duration_seconds, file_size_mb, downloaded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(playlist_id, filename) DO NOTHING",
            params![
                playlist_id,
                playlist_name,
                filename,
                title,
                duration_seconds,
                file_size_mb,
                Utc::now().to_rfc3339(),
            ],
        )?;
        if inserted == 0 {
            debug!("Video already exists: {}", filename);
        }
        let id = conn.query_row(
            "SELECT id FROM videos WHERE playlist_id = ?1 AND filename = ?2",
            params![playlist_id, filename],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn videos_by_playlist(&self, playlist_id: i64) -> Result<Vec<Video>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, playlist_id, playlist_name, filename, title, duration_seconds, file_size_mb, downloaded_at
             FROM videos WHERE playlist_id = ?1",
        )?;
        let videos = stmt
            .query_map([playlist_id], video_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(videos)
    }

    pub fn videos_by_playlist_name(&self, playlist_name: &str) -> Result<Vec<Video>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, playlist_id, playlist_name, filename, title, duration_seconds, file_size_mb, downloaded_at
             FROM videos WHERE playlist_name = ?1",
        )?;
        let videos = stmt
            .query_map([playlist_name], video_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(videos)
    }

    /// Recherche une vidéo par nom de fichier (sans préfixe d'ordre).
    pub fn video_by_filename(&self, filename: &str) -> Result<Option<Video>> {
        let conn = self.conn.lock().unwrap();
        video_by_filename_tx(&conn, filename)
    }

    /// Somme des durées connues pour les playlists données.
    pub fn total_duration_for_playlists(&self, playlist_ids: &[i64]) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let mut total = 0i64;
        for id in playlist_ids {
            let sum: Option<i64> = conn.query_row(
                "SELECT SUM(duration_seconds) FROM videos WHERE playlist_id = ?1",
                [id],
                |row| row.get(0),
            )?;
            total += sum.unwrap_or(0);
        }
        Ok(total)
    }

    // ========================================================================
    // Journal de lecture
    // ========================================================================

    /// Consigne une transition de lecture. Le nom de fichier doit être
    /// SANS préfixe d'ordre ; la vidéo et sa playlist sont résolues ici.
    pub fn log_playback(&self, video_filename: &str, session_id: Option<i64>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let video = video_by_filename_tx(&conn, video_filename)?;
        let (video_id, playlist_name) = match &video {
            Some(v) => (Some(v.id), v.playlist_name.clone()),
            None => (None, None),
        };
        conn.execute(
            "INSERT INTO playback_log (video_id, session_id, video_filename, playlist_name, played_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                video_id,
                session_id,
                video_filename,
                playlist_name,
                Utc::now().to_rfc3339(),
            ],
        )?;
        debug!("Logged playback: {} (playlist={:?})", video_filename, playlist_name);
        Ok(())
    }

    /// Dernières entrées du journal, la plus récente d'abord.
    pub fn recent_playback_log(&self, limit: usize) -> Result<Vec<PlaybackLogEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, video_id, session_id, video_filename, playlist_name, played_at
             FROM playback_log ORDER BY id DESC LIMIT ?1",
        )?;
        let entries = stmt
            .query_map([limit as i64], |row| {
                Ok(PlaybackLogEntry {
                    id: row.get(0)?,
                    video_id: row.get(1)?,
                    session_id: row.get(2)?,
                    video_filename: row.get(3)?,
                    playlist_name: row.get(4)?,
                    played_at: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    pub(crate) fn lock_conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }
}

/// Ajoute une colonne si elle n'existe pas déjà.
fn add_column(conn: &Connection, table: &str, column_def: &str) {
    let sql = format!("ALTER TABLE {} ADD COLUMN {}", table, column_def);
    match conn.execute(&sql, []) {
        Ok(_) => info!("Added column to {}: {}", table, column_def),
        Err(_) => debug!("Column already present on {}: {}", table, column_def),
    }
}

fn playlist_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Playlist> {
    Ok(Playlist {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        last_played: row.get(3)?,
        play_count: row.get(4)?,
        enabled: row.get(5)?,
        priority: row.get(6)?,
    })
}

fn video_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Video> {
    Ok(Video {
        id: row.get(0)?,
        playlist_id: row.get(1)?,
        playlist_name: row.get(2)?,
        filename: row.get(3)?,
        title: row.get(4)?,
        duration_seconds: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
        file_size_mb: row.get::<_, Option<i64>>(6)?.unwrap_or(0),
        downloaded_at: row.get(7)?,
    })
}

fn playlist_by_id_tx(conn: &Connection, id: i64) -> Result<Option<Playlist>> {
    let playlist = conn
        .query_row(
            "SELECT id, name, url, last_played, play_count, enabled, priority
             FROM playlists WHERE id = ?1",
            [id],
            playlist_from_row,
        )
        .optional()?;
    Ok(playlist)
}

/// Recherche interne sur `&Connection` — utilisable sous le verrou.
fn video_by_filename_tx(conn: &Connection, filename: &str) -> Result<Option<Video>> {
    let video = conn
        .query_row(
            "SELECT id, playlist_id, playlist_name, filename, title, duration_seconds, file_size_mb, downloaded_at
             FROM videos WHERE filename = ?1 LIMIT 1",
            [filename],
            video_from_row,
        )
        .optional()?;
    Ok(video)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_playlist_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let a = store.add_playlist("CATS", "https://example.com/a", true, 1).unwrap();
        let b = store.add_playlist("CATS", "https://example.com/other", true, 5).unwrap();
        assert_eq!(a, b);
        // Le nom est insensible à la casse.
        let c = store.add_playlist("cats", "https://example.com/x", true, 1).unwrap();
        assert_eq!(a, c);
    }

    #[test]
    fn test_enabled_playlists_ordering() {
        let store = Store::open_in_memory().unwrap();
        let old = store.add_playlist("old", "u", true, 1).unwrap();
        let never_low = store.add_playlist("never-low", "u", true, 1).unwrap();
        let never_high = store.add_playlist("never-high", "u", true, 9).unwrap();
        let disabled = store.add_playlist("disabled", "u", false, 9).unwrap();
        store.mark_playlist_played(old).unwrap();

        let ordered: Vec<i64> = store
            .enabled_playlists()
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        // Jamais jouées d'abord (priorité décroissante), puis les plus anciennes.
        assert_eq!(ordered, vec![never_high, never_low, old]);
        assert!(!ordered.contains(&disabled));
    }

    #[test]
    fn test_sync_converges() {
        let store = Store::open_in_memory().unwrap();
        let entries = vec![
            PlaylistSync {
                name: "CATS".to_string(),
                url: "https://example.com/cats".to_string(),
                enabled: true,
                priority: 2,
            },
            PlaylistSync {
                name: "MW2".to_string(),
                url: "https://example.com/mw2".to_string(),
                enabled: false,
                priority: 1,
            },
        ];
        store.sync_playlists_from_config(&entries).unwrap();
        store.sync_playlists_from_config(&entries).unwrap();

        let enabled = store.enabled_playlists().unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].name, "CATS");
        assert_eq!(enabled[0].url, "https://example.com/cats");
    }

    #[test]
    fn test_add_video_and_lookup() {
        let store = Store::open_in_memory().unwrap();
        let pid = store.add_playlist("CATS", "u", true, 1).unwrap();
        let a = store
            .add_video(pid, "CATS_1_intro.mp4", Some("intro"), 120, 42, Some("CATS"))
            .unwrap();
        let b = store
            .add_video(pid, "CATS_1_intro.mp4", Some("intro again"), 999, 1, Some("CATS"))
            .unwrap();
        assert_eq!(a, b);

        let video = store.video_by_filename("CATS_1_intro.mp4").unwrap().unwrap();
        assert_eq!(video.duration_seconds, 120);
        assert_eq!(video.playlist_name.as_deref(), Some("CATS"));
        assert!(store.video_by_filename("missing.mp4").unwrap().is_none());
    }

    #[test]
    fn test_log_playback_resolves_video() {
        let store = Store::open_in_memory().unwrap();
        let pid = store.add_playlist("CATS", "u", true, 1).unwrap();
        store
            .add_video(pid, "vid.webm", None, 10, 1, Some("CATS"))
            .unwrap();

        store.log_playback("vid.webm", None).unwrap();
        store.log_playback("unknown.webm", None).unwrap();

        let log = store.recent_playback_log(10).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].playlist_name.as_deref(), Some("CATS"));
        assert!(log[1].video_id.is_some());
        assert!(log[0].video_id.is_none());
    }

    #[test]
    fn test_total_duration() {
        let store = Store::open_in_memory().unwrap();
        let pid = store.add_playlist("CATS", "u", true, 1).unwrap();
        store.add_video(pid, "a.mp4", None, 100, 1, Some("CATS")).unwrap();
        store.add_video(pid, "b.mp4", None, 50, 1, Some("CATS")).unwrap();
        assert_eq!(store.total_duration_for_playlists(&[pid]).unwrap(), 150);
    }
}
