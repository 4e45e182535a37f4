//! JSON to model converters.
//!
//! Turns raw Jamendo result objects into [`Track`] and [`Playlist`] values.
//! Jamendo is loose about field types (ids and counts arrive as strings or
//! numbers depending on the endpoint), so fields are read leniently.

use serde_json::Value;

use crate::error::{JamplayError, Result};
use crate::models::{Playlist, Track};

/// Text field such as `name` or `artist_name`; empty when absent.
fn get_str(json: &Value, key: &str) -> String {
    json.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

/// Optional text field such as `image`; `None` when absent or blank.
fn get_opt_str(json: &Value, key: &str) -> Option<String> {
    json.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// Jamendo id field, which arrives as `"1532"` or `1532` depending on the endpoint.
fn get_id(json: &Value, key: &str) -> Option<String> {
    json.get(key).and_then(|v| {
        if let Some(s) = v.as_str() {
            Some(s.to_string()).filter(|s| !s.is_empty())
        } else if let Some(n) = v.as_u64() {
            Some(n.to_string())
        } else {
            v.as_i64().map(|n| n.to_string())
        }
    })
}

/// Get u64 from JSON, accepting numeric strings.
fn get_u64(json: &Value, key: &str) -> u64 {
    json.get(key)
        .and_then(|v| v.as_u64().or_else(|| v.as_str()?.trim().parse().ok()))
        .unwrap_or(0)
}

/// Parse a track result object. Durations arrive in seconds.
pub fn parse_track(json: &Value) -> Result<Track> {
    let id = get_id(json, "id")
        .ok_or_else(|| JamplayError::MalformedRecord("track without id".to_string()))?;

    Ok(Track {
        id,
        title: get_str(json, "name"),
        artist: get_str(json, "artist_name"),
        duration_ms: get_u64(json, "duration") * 1000,
        audio_url: get_str(json, "audio"),
        image_url: get_str(json, "image"),
        last_played: None,
        is_favorite: false,
    })
}

/// Parse a playlist result object.
pub fn parse_playlist(json: &Value) -> Result<Playlist> {
    let id = get_id(json, "id")
        .ok_or_else(|| JamplayError::MalformedRecord("playlist without id".to_string()))?;

    Ok(Playlist {
        id,
        title: get_str(json, "name"),
        cover_url: get_opt_str(json, "image"),
        track_count: get_u64(json, "tracks_count") as u32,
    })
}

/// Borrow the `results` array of a response envelope.
pub fn results(envelope: &Value) -> &[Value] {
    envelope
        .get("results")
        .and_then(|r| r.as_array())
        .map(|a| a.as_slice())
        .unwrap_or(&[])
}
