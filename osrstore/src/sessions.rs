//! Opérations sur les sessions de rotation.
//!
//! Invariants maintenus ici :
//! - au plus une session porte `is_current = 1` (séquence clear-then-insert
//!   dans une même transaction) ;
//! - clore une session pose `ended_at` et retire `is_current` ;
//! - quand `temp_playback_active` est vrai, le dossier et la playlist temp
//!   sont non nuls.

use std::collections::HashMap;
use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::models::{PrepStatus, RotationSession, TempPlaybackState};
use crate::{Result, Store, StoreError};

impl Store {
    /// Crée une nouvelle session courante avec un état de préparation vierge.
    ///
    /// Toute session précédemment courante perd son drapeau dans la même
    /// transaction, si bien qu'aucun instant n'expose deux sessions courantes.
    pub fn create_rotation_session(
        &self,
        playlists_selected: &[i64],
        stream_title: &str,
        total_duration_seconds: i64,
    ) -> Result<i64> {
        let mut conn = self.lock_conn();
        let tx = conn.transaction()?;

        tx.execute(
            "UPDATE rotation_sessions SET is_current = 0 WHERE is_current = 1",
            [],
        )?;
        tx.execute(
            "INSERT INTO rotation_sessions
                 (started_at, playlists_selected, stream_title, total_duration_seconds,
                  is_current, current_playlists, next_playlists, next_playlists_status)
             VALUES (?1, ?2, ?3, ?4, 1, NULL, NULL, NULL)",
            params![
                Utc::now().to_rfc3339(),
                serde_json::to_string(playlists_selected).expect("ids serialize"),
                stream_title,
                total_duration_seconds,
            ],
        )?;
        let session_id = tx.last_insert_rowid();
        tx.commit()?;

        info!("Created rotation session {} (previous sessions marked inactive)", session_id);
        Ok(session_id)
    }

    /// La session courante, s'il y en a une.
    pub fn current_session(&self) -> Result<Option<RotationSession>> {
        let conn = self.lock_conn();
        session_query(&conn, "WHERE is_current = 1 LIMIT 1", [])
    }

    pub fn session_by_id(&self, id: i64) -> Result<Option<RotationSession>> {
        let conn = self.lock_conn();
        session_query(&conn, "WHERE id = ?1", [id])
    }

    /// Clôt une session : pose `ended_at`, retire `is_current` et marque
    /// les playlists sélectionnées comme jouées.
    pub fn end_session(&self, session_id: i64) -> Result<()> {
        let mut conn = self.lock_conn();
        let tx = conn.transaction()?;

        let selected: Option<String> = tx
            .query_row(
                "SELECT playlists_selected FROM rotation_sessions WHERE id = ?1",
                [session_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();

        let now = Utc::now().to_rfc3339();
        if let Some(raw) = selected {
            for playlist_id in parse_json_or_default::<Vec<i64>>(Some(raw), "playlists_selected") {
                tx.execute(
                    "UPDATE playlists
                     SET last_played = ?1, play_count = play_count + 1, updated_at = ?1
                     WHERE id = ?2",
                    params![now, playlist_id],
                )?;
            }
        }

        tx.execute(
            "UPDATE rotation_sessions SET ended_at = ?1, is_current = 0 WHERE id = ?2",
            params![now, session_id],
        )?;
        tx.commit()?;
        info!("Ended rotation session {}", session_id);
        Ok(())
    }

    pub fn update_session_stream_title(&self, session_id: i64, stream_title: &str) -> Result<()> {
        let conn = self.lock_conn();
        conn.execute(
            "UPDATE rotation_sessions SET stream_title = ?1 WHERE id = ?2",
            params![stream_title, session_id],
        )?;
        Ok(())
    }

    pub fn update_session_playlists_selected(
        &self,
        session_id: i64,
        playlist_ids: &[i64],
    ) -> Result<()> {
        let conn = self.lock_conn();
        conn.execute(
            "UPDATE rotation_sessions SET playlists_selected = ?1 WHERE id = ?2",
            params![
                serde_json::to_string(playlist_ids).expect("ids serialize"),
                session_id
            ],
        )?;
        Ok(())
    }

    /// Sauvegarde du curseur de lecture — appelée à chaque tick.
    pub fn save_playback_position(
        &self,
        session_id: i64,
        cursor_ms: i64,
        current_video: Option<&str>,
    ) -> Result<()> {
        let conn = self.lock_conn();
        conn.execute(
            "UPDATE rotation_sessions
             SET playback_cursor_ms = ?1, playback_current_video = ?2
             WHERE id = ?3",
            params![cursor_ms, current_video, session_id],
        )?;
        Ok(())
    }

    pub fn clear_playback_position(&self, session_id: i64) -> Result<()> {
        self.save_playback_position(session_id, 0, None)
    }

    /// Enregistre les données de suspension du protocole d'override.
    pub fn update_session_suspension_data(
        &self,
        session_id: i64,
        data: &serde_json::Value,
    ) -> Result<()> {
        let conn = self.lock_conn();
        conn.execute(
            "UPDATE rotation_sessions SET suspension_data = ?1 WHERE id = ?2",
            params![data.to_string(), session_id],
        )?;
        Ok(())
    }

    // ========================================================================
    // Préparation de la rotation suivante
    // ========================================================================

    /// Déclare les playlists en préparation, toutes en statut PENDING.
    pub fn set_next_playlists(&self, session_id: i64, playlists: &[String]) -> Result<()> {
        let mut conn = self.lock_conn();
        let tx = conn.transaction()?;
        let status: HashMap<&String, PrepStatus> = playlists
            .iter()
            .map(|name| (name, PrepStatus::Pending))
            .collect();
        tx.execute(
            "UPDATE rotation_sessions
             SET next_playlists = ?1, next_playlists_status = ?2
             WHERE id = ?3",
            params![
                serde_json::to_string(playlists).expect("names serialize"),
                serde_json::to_string(&status).expect("status serializes"),
                session_id,
            ],
        )?;
        tx.commit()?;
        debug!("Set next_playlists to {:?} in session {}", playlists, session_id);
        Ok(())
    }

    /// Consigne les playlists réellement jouées (piste d'audit).
    pub fn set_current_playlists(&self, session_id: i64, playlists: &[String]) -> Result<()> {
        let conn = self.lock_conn();
        conn.execute(
            "UPDATE rotation_sessions SET current_playlists = ?1 WHERE id = ?2",
            params![
                serde_json::to_string(playlists).expect("names serialize"),
                session_id
            ],
        )?;
        Ok(())
    }

    /// Passe une playlist préparée au statut donné.
    pub fn update_playlist_status(
        &self,
        session_id: i64,
        playlist_name: &str,
        status: PrepStatus,
    ) -> Result<()> {
        let mut conn = self.lock_conn();
        let tx = conn.transaction()?;

        let raw: Option<String> = tx
            .query_row(
                "SELECT next_playlists_status FROM rotation_sessions WHERE id = ?1",
                [session_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();

        let mut map: HashMap<String, PrepStatus> =
            parse_json_or_default(raw, "next_playlists_status");
        map.insert(playlist_name.to_string(), status);

        tx.execute(
            "UPDATE rotation_sessions SET next_playlists_status = ?1 WHERE id = ?2",
            params![
                serde_json::to_string(&map).expect("status serializes"),
                session_id
            ],
        )?;
        tx.commit()?;
        debug!("Updated playlist '{}' to {:?} in session {}", playlist_name, status, session_id);
        Ok(())
    }

    /// Tous les statuts de préparation de la session.
    pub fn next_playlists_status(&self, session_id: i64) -> Result<HashMap<String, PrepStatus>> {
        let conn = self.lock_conn();
        let raw: Option<String> = conn
            .query_row(
                "SELECT next_playlists_status FROM rotation_sessions WHERE id = ?1",
                [session_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        Ok(parse_json_or_default(raw, "next_playlists_status"))
    }

    /// Marque toutes les playlists données COMPLETED (fin de téléchargement).
    pub fn complete_next_playlists(&self, session_id: i64, playlists: &[String]) -> Result<()> {
        for name in playlists {
            self.update_playlist_status(session_id, name, PrepStatus::Completed)?;
        }
        info!("Marked {:?} as COMPLETED in session {}", playlists, session_id);
        Ok(())
    }

    // ========================================================================
    // Lecture temporaire
    // ========================================================================

    /// Persiste l'état de lecture temporaire pour la reprise après crash.
    pub fn save_temp_playback_state(
        &self,
        session_id: i64,
        playlist: &[String],
        position: i64,
        folder: &str,
        cursor_ms: i64,
    ) -> Result<()> {
        let conn = self.lock_conn();
        conn.execute(
            "UPDATE rotation_sessions
             SET temp_playback_active = 1,
                 temp_playback_playlist = ?1,
                 temp_playback_position = ?2,
                 temp_playback_folder = ?3,
                 temp_playback_cursor_ms = ?4
             WHERE id = ?5",
            params![
                serde_json::to_string(playlist).expect("names serialize"),
                position,
                folder,
                cursor_ms,
                session_id,
            ],
        )?;
        info!(
            "Saved temp playback state: {} videos, position={}, cursor={}ms",
            playlist.len(),
            position,
            cursor_ms
        );
        Ok(())
    }

    /// État de lecture temporaire, seulement si le mode est actif.
    pub fn temp_playback_state(&self, session_id: i64) -> Result<Option<TempPlaybackState>> {
        let conn = self.lock_conn();
        let row = conn
            .query_row(
                "SELECT temp_playback_active, temp_playback_playlist, temp_playback_position,
                        temp_playback_folder, temp_playback_cursor_ms
                 FROM rotation_sessions WHERE id = ?1",
                [session_id],
                |row| {
                    Ok((
                        row.get::<_, Option<bool>>(0)?.unwrap_or(false),
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<i64>>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((active, playlist, position, folder, cursor_ms)) = row else {
            return Ok(None);
        };
        if !active {
            return Ok(None);
        }
        let Some(folder) = folder else {
            warn!("Temp playback marked active without a folder in session {}", session_id);
            return Ok(None);
        };

        Ok(Some(TempPlaybackState {
            playlist: parse_json_or_default(playlist, "temp_playback_playlist"),
            position: position.unwrap_or(0),
            folder,
            cursor_ms: cursor_ms.unwrap_or(0),
        }))
    }

    /// Efface l'état de lecture temporaire (sortie normale). Idempotent.
    pub fn clear_temp_playback_state(&self, session_id: i64) -> Result<()> {
        let conn = self.lock_conn();
        conn.execute(
            "UPDATE rotation_sessions
             SET temp_playback_active = 0,
                 temp_playback_playlist = NULL,
                 temp_playback_position = NULL,
                 temp_playback_folder = NULL,
                 temp_playback_cursor_ms = NULL
             WHERE id = ?1",
            [session_id],
        )?;
        info!("Cleared temp playback state for session {}", session_id);
        Ok(())
    }

    // ========================================================================
    // Validation de la rotation préparée
    // ========================================================================

    /// Vérifie que chaque vidéo connue des playlists préparées existe
    /// réellement dans le dossier pending.
    ///
    /// Retourne `true` quand rien n'est préparé (rien à valider), `false`
    /// dès qu'un fichier attendu manque.
    pub fn validate_prepared_playlists_exist(
        &self,
        session_id: i64,
        pending_folder: &Path,
    ) -> Result<bool> {
        let conn = self.lock_conn();
        let raw: Option<String> = conn
            .query_row(
                "SELECT next_playlists FROM rotation_sessions WHERE id = ?1",
                [session_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();

        let next_playlists: Vec<String> = parse_json_or_default(raw, "next_playlists");
        if next_playlists.is_empty() {
            return Ok(true);
        }

        for playlist_name in &next_playlists {
            let mut stmt =
                conn.prepare("SELECT filename FROM videos WHERE playlist_name = ?1")?;
            let filenames = stmt
                .query_map([playlist_name], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            for filename in filenames {
                if !pending_folder.join(&filename).exists() {
                    warn!(
                        "Prepared file missing from {}: {} (playlist {})",
                        pending_folder.display(),
                        filename,
                        playlist_name
                    );
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

/// Construit une session depuis une ligne complète.
pub(crate) fn session_query<P: rusqlite::Params>(
    conn: &Connection,
    where_clause: &str,
    params: P,
) -> Result<Option<RotationSession>> {
    let sql = format!(
        "SELECT id, started_at, ended_at, playlists_selected, total_duration_seconds,
                stream_title, is_current, current_playlists, next_playlists,
                next_playlists_status, temp_playback_active, playback_cursor_ms,
                playback_current_video, suspension_data
         FROM rotation_sessions {}",
        where_clause
    );

    let session = conn
        .query_row(&sql, params, |row| {
            Ok(RotationSession {
                id: row.get(0)?,
                started_at: row.get(1)?,
                ended_at: row.get(2)?,
                playlists_selected: parse_json_or_default(
                    row.get::<_, Option<String>>(3)?,
                    "playlists_selected",
                ),
                total_duration_seconds: row.get::<_, Option<i64>>(4)?.unwrap_or(0),
                stream_title: row.get(5)?,
                is_current: row.get::<_, Option<bool>>(6)?.unwrap_or(false),
                current_playlists: parse_json_or_default(
                    row.get::<_, Option<String>>(7)?,
                    "current_playlists",
                ),
                next_playlists: parse_json_or_default(
                    row.get::<_, Option<String>>(8)?,
                    "next_playlists",
                ),
                next_playlists_status: parse_json_or_default(
                    row.get::<_, Option<String>>(9)?,
                    "next_playlists_status",
                ),
                temp_playback_active: row.get::<_, Option<bool>>(10)?.unwrap_or(false),
                playback_cursor_ms: row.get::<_, Option<i64>>(11)?.unwrap_or(0),
                playback_current_video: row.get(12)?,
                suspension_data: row
                    .get::<_, Option<String>>(13)?
                    .and_then(|raw| serde_json::from_str(&raw).ok()),
            })
        })
        .optional()?;
    Ok(session)
}

/// Décode une colonne JSON en tolérant l'absence et la corruption.
///
/// Une colonne illisible est signalée puis remplacée par la valeur par
/// défaut : une ligne corrompue ne doit pas bloquer tout le contrôleur.
fn parse_json_or_default<T: serde::de::DeserializeOwned + Default>(
    raw: Option<String>,
    column: &'static str,
) -> T {
    match raw {
        None => T::default(),
        Some(raw) if raw.is_empty() => T::default(),
        Some(raw) => match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(source) => {
                warn!("{}", StoreError::Json { column, source });
                T::default()
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_playlists() -> (Store, Vec<i64>) {
        let store = Store::open_in_memory().unwrap();
        let a = store.add_playlist("CATS", "u", true, 1).unwrap();
        let b = store.add_playlist("MW2", "u", true, 1).unwrap();
        (store, vec![a, b])
    }

    #[test]
    fn test_single_current_session() {
        let (store, ids) = store_with_playlists();
        let first = store.create_rotation_session(&ids, "title one", 100).unwrap();
        let second = store.create_rotation_session(&ids, "title two", 200).unwrap();

        let current = store.current_session().unwrap().unwrap();
        assert_eq!(current.id, second);
        assert!(current.is_current);

        let old = store.session_by_id(first).unwrap().unwrap();
        assert!(!old.is_current);
    }

    #[test]
    fn test_end_session_marks_played_and_sets_ended_at() {
        let (store, ids) = store_with_playlists();
        let session = store.create_rotation_session(&ids, "t", 0).unwrap();
        store.end_session(session).unwrap();

        let ended = store.session_by_id(session).unwrap().unwrap();
        assert!(!ended.is_current);
        assert!(ended.ended_at.is_some());
        assert!(store.current_session().unwrap().is_none());

        for playlist in store.enabled_playlists().unwrap() {
            assert_eq!(playlist.play_count, 1);
            assert!(playlist.last_played.is_some());
        }
    }

    #[test]
    fn test_next_playlists_status_lifecycle() {
        let (store, ids) = store_with_playlists();
        let session = store.create_rotation_session(&ids, "t", 0).unwrap();

        let names = vec!["CATS".to_string(), "MW2".to_string()];
        store.set_next_playlists(session, &names).unwrap();

        let current = store.session_by_id(session).unwrap().unwrap();
        assert_eq!(current.next_playlists, names);
        assert!(!current.next_rotation_ready());
        assert_eq!(current.pending_next_playlists(), names);

        store
            .update_playlist_status(session, "CATS", PrepStatus::Completed)
            .unwrap();
        let current = store.session_by_id(session).unwrap().unwrap();
        assert!(!current.next_rotation_ready());
        assert_eq!(current.pending_next_playlists(), vec!["MW2".to_string()]);

        store.complete_next_playlists(session, &names).unwrap();
        let current = store.session_by_id(session).unwrap().unwrap();
        assert!(current.next_rotation_ready());
        assert!(current.pending_next_playlists().is_empty());
    }

    #[test]
    fn test_playback_position_round_trip() {
        let (store, ids) = store_with_playlists();
        let session = store.create_rotation_session(&ids, "t", 0).unwrap();

        store
            .save_playback_position(session, 123_000, Some("vid.webm"))
            .unwrap();
        let current = store.current_session().unwrap().unwrap();
        assert_eq!(current.playback_cursor_ms, 123_000);
        assert_eq!(current.playback_current_video.as_deref(), Some("vid.webm"));

        store.clear_playback_position(session).unwrap();
        let current = store.current_session().unwrap().unwrap();
        assert_eq!(current.playback_cursor_ms, 0);
        assert!(current.playback_current_video.is_none());
    }

    #[test]
    fn test_temp_playback_state_round_trip() {
        let (store, ids) = store_with_playlists();
        let session = store.create_rotation_session(&ids, "t", 0).unwrap();
        assert!(store.temp_playback_state(session).unwrap().is_none());

        let playlist = vec!["x1.webm".to_string(), "x2.webm".to_string()];
        store
            .save_temp_playback_state(session, &playlist, 0, "/tmp/pending", 0)
            .unwrap();

        let state = store.temp_playback_state(session).unwrap().unwrap();
        assert_eq!(state.playlist, playlist);
        assert_eq!(state.folder, "/tmp/pending");

        store.clear_temp_playback_state(session).unwrap();
        assert!(store.temp_playback_state(session).unwrap().is_none());
        // L'effacement est idempotent.
        store.clear_temp_playback_state(session).unwrap();
    }

    #[test]
    fn test_validate_prepared_playlists_exist() {
        let (store, ids) = store_with_playlists();
        let session = store.create_rotation_session(&ids, "t", 0).unwrap();
        let pending = tempfile::tempdir().unwrap();

        // Rien de préparé : rien à valider.
        assert!(store
            .validate_prepared_playlists_exist(session, pending.path())
            .unwrap());

        store
            .set_next_playlists(session, &vec!["CATS".to_string()])
            .unwrap();
        store
            .add_video(ids[0], "CATS_1_a.mp4", None, 10, 1, Some("CATS"))
            .unwrap();

        assert!(!store
            .validate_prepared_playlists_exist(session, pending.path())
            .unwrap());

        std::fs::write(pending.path().join("CATS_1_a.mp4"), b"x").unwrap();
        assert!(store
            .validate_prepared_playlists_exist(session, pending.path())
            .unwrap());
    }

    #[test]
    fn test_corrupt_json_column_is_tolerated() {
        let (store, ids) = store_with_playlists();
        let session = store.create_rotation_session(&ids, "t", 0).unwrap();
        {
            let conn = store.lock_conn();
            conn.execute(
                "UPDATE rotation_sessions SET next_playlists = 'not json' WHERE id = ?1",
                [session],
            )
            .unwrap();
        }
        let current = store.session_by_id(session).unwrap().unwrap();
        assert!(current.next_playlists.is_empty());
    }
}
