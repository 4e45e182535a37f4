//! SQLite-backed track cache.
//!
//! [`TrackStore`] is a synchronous handle; callers on the async side run its
//! methods on the blocking pool. Rows keep insertion order, so the first
//! catalog fetch defines the cached listing order.
//!
//! Catalog writes merge into existing rows: they refresh metadata but never
//! touch `last_played` or `is_favorite`, which belong to the local user.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::Track;

pub mod schema;

const TRACK_COLUMNS: &str =
    "id, title, artist, duration, audio_url, image_url, last_played, is_favorite";

/// Persistent local cache of tracks keyed by id.
#[derive(Debug)]
pub struct TrackStore {
    conn: Mutex<Connection>,
}

impl TrackStore {
    /// Open (or create) the store at `path`, creating parent directories.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        debug!("Opening track store at {}", path.display());
        Self::with_connection(Connection::open(path)?)
    }

    /// Open a throwaway in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(mut conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        schema::migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Lock the connection, recovering from a poisoned mutex.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Track store mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Merge catalog tracks into the cache and return the stored rows in
    /// input order.
    ///
    /// New rows take the local fields from the given tracks; existing rows
    /// keep theirs.
    pub fn upsert_catalog(&self, tracks: &[Track]) -> Result<Vec<Track>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO tracks (id, title, artist, duration, audio_url, image_url, last_played, is_favorite)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    artist = excluded.artist,
                    duration = excluded.duration,
                    audio_url = excluded.audio_url,
                    image_url = excluded.image_url",
            )?;
            for track in tracks {
                stmt.execute(params![
                    track.id,
                    track.title,
                    track.artist,
                    track.duration_ms as i64,
                    track.audio_url,
                    track.image_url,
                    track.last_played.unwrap_or(0),
                    track.is_favorite,
                ])?;
            }
        }
        let mut merged = Vec::with_capacity(tracks.len());
        {
            let mut stmt = tx.prepare(&format!(
                "SELECT {} FROM tracks WHERE id = ?1",
                TRACK_COLUMNS
            ))?;
            for track in tracks {
                merged.push(stmt.query_row(params![track.id], track_from_row)?);
            }
        }
        tx.commit()?;
        debug!("Upserted {} catalog tracks", tracks.len());
        Ok(merged)
    }

    /// Insert or update a track together with its last-played stamp.
    ///
    /// The favorite flag of an existing row is preserved.
    pub fn upsert_played(&self, track: &Track) -> Result<()> {
        self.conn().execute(
            "INSERT INTO tracks (id, title, artist, duration, audio_url, image_url, last_played, is_favorite)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                artist = excluded.artist,
                duration = excluded.duration,
                audio_url = excluded.audio_url,
                image_url = excluded.image_url,
                last_played = excluded.last_played",
            params![
                track.id,
                track.title,
                track.artist,
                track.duration_ms as i64,
                track.audio_url,
                track.image_url,
                track.last_played.unwrap_or(0),
                track.is_favorite,
            ],
        )?;
        Ok(())
    }

    /// Number of cached tracks.
    pub fn count(&self) -> Result<usize> {
        let n: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM tracks", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// All cached tracks in insertion order.
    pub fn all_tracks(&self) -> Result<Vec<Track>> {
        self.query_tracks(
            &format!("SELECT {} FROM tracks ORDER BY rowid ASC", TRACK_COLUMNS),
            [],
        )
    }

    /// One page of cached tracks in insertion order.
    pub fn tracks_page(&self, offset: usize, limit: usize) -> Result<Vec<Track>> {
        self.query_tracks(
            &format!(
                "SELECT {} FROM tracks ORDER BY rowid ASC LIMIT ?1 OFFSET ?2",
                TRACK_COLUMNS
            ),
            params![limit as i64, offset as i64],
        )
    }

    /// Look up a single track.
    pub fn track_by_id(&self, id: &str) -> Result<Option<Track>> {
        let conn = self.conn();
        let track = conn
            .query_row(
                &format!("SELECT {} FROM tracks WHERE id = ?1", TRACK_COLUMNS),
                params![id],
                track_from_row,
            )
            .optional()?;
        Ok(track)
    }

    /// The track whose id sorts right after `id`. `None` when `id` itself is
    /// not cached.
    pub fn next_track(&self, id: &str) -> Result<Option<Track>> {
        let conn = self.conn();
        let track = conn
            .query_row(
                &format!(
                    "SELECT {} FROM tracks WHERE id > ?1 \
                     AND EXISTS (SELECT 1 FROM tracks WHERE id = ?1) \
                     ORDER BY id ASC LIMIT 1",
                    TRACK_COLUMNS
                ),
                params![id],
                track_from_row,
            )
            .optional()?;
        Ok(track)
    }

    /// The track whose id sorts right before `id`. `None` when `id` itself is
    /// not cached.
    pub fn previous_track(&self, id: &str) -> Result<Option<Track>> {
        let conn = self.conn();
        let track = conn
            .query_row(
                &format!(
                    "SELECT {} FROM tracks WHERE id < ?1 \
                     AND EXISTS (SELECT 1 FROM tracks WHERE id = ?1) \
                     ORDER BY id DESC LIMIT 1",
                    TRACK_COLUMNS
                ),
                params![id],
                track_from_row,
            )
            .optional()?;
        Ok(track)
    }

    /// Flip the favorite flag. Returns the new value, or `None` if the track
    /// is not cached.
    pub fn toggle_favorite(&self, id: &str) -> Result<Option<bool>> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE tracks SET is_favorite = NOT is_favorite WHERE id = ?1",
            params![id],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        let value: bool = conn.query_row(
            "SELECT is_favorite FROM tracks WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(Some(value))
    }

    /// Favorite tracks in insertion order.
    pub fn favorites(&self) -> Result<Vec<Track>> {
        self.query_tracks(
            &format!(
                "SELECT {} FROM tracks WHERE is_favorite = 1 ORDER BY rowid ASC",
                TRACK_COLUMNS
            ),
            [],
        )
    }

    /// Played tracks, most recent first.
    pub fn recent_plays(&self, limit: usize) -> Result<Vec<Track>> {
        self.query_tracks(
            &format!(
                "SELECT {} FROM tracks WHERE last_played > 0 ORDER BY last_played DESC LIMIT ?1",
                TRACK_COLUMNS
            ),
            params![limit as i64],
        )
    }

    fn query_tracks<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<Track>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, track_from_row)?;

        let mut tracks = Vec::new();
        for track in rows {
            tracks.push(track?);
        }
        Ok(tracks)
    }
}

fn track_from_row(row: &Row<'_>) -> rusqlite::Result<Track> {
    let last_played: i64 = row.get(6)?;
    Ok(Track {
        id: row.get(0)?,
        title: row.get(1)?,
        artist: row.get(2)?,
        duration_ms: row.get::<_, i64>(3)?.max(0) as u64,
        audio_url: row.get(4)?,
        image_url: row.get(5)?,
        last_played: (last_played > 0).then_some(last_played),
        is_favorite: row.get(7)?,
    })
}
