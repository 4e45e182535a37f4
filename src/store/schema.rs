//! Forward-only schema migrations keyed on `PRAGMA user_version`.

use rusqlite::Connection;
use tracing::info;

use crate::error::Result;

/// Each entry upgrades the schema from `index` to `index + 1`.
const MIGRATIONS: &[&str] = &[
    // 1: track cache
    "CREATE TABLE IF NOT EXISTS tracks (
        id TEXT PRIMARY KEY NOT NULL,
        title TEXT NOT NULL,
        artist TEXT NOT NULL,
        duration INTEGER NOT NULL,
        audio_url TEXT NOT NULL,
        image_url TEXT NOT NULL,
        last_played INTEGER NOT NULL DEFAULT 0,
        is_favorite INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS idx_tracks_last_played ON tracks(last_played);",
    // 2: user playlists; not read by the repository yet
    "CREATE TABLE IF NOT EXISTS playlists (
        id TEXT PRIMARY KEY NOT NULL,
        name TEXT NOT NULL,
        description TEXT,
        cover_image_url TEXT,
        created_at INTEGER NOT NULL,
        is_user_created INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS playlist_track_join (
        playlist_id TEXT NOT NULL,
        track_id TEXT NOT NULL,
        position INTEGER NOT NULL,
        PRIMARY KEY (playlist_id, track_id),
        FOREIGN KEY (playlist_id) REFERENCES playlists(id) ON DELETE CASCADE,
        FOREIGN KEY (track_id) REFERENCES tracks(id) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS idx_playlist_track_join_track_id ON playlist_track_join(track_id);",
];

/// Latest schema version.
pub const SCHEMA_VERSION: i64 = MIGRATIONS.len() as i64;

/// Bring the database up to [`SCHEMA_VERSION`].
pub fn migrate(conn: &mut Connection) -> Result<()> {
    let current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    for (index, sql) in MIGRATIONS.iter().enumerate().skip(current.max(0) as usize) {
        let version = index as i64 + 1;
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
        info!("Migrated track store to schema v{}", version);
    }

    Ok(())
}
