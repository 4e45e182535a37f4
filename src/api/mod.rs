//! Remote catalog access.
//!
//! - [`CatalogSource`]: what the repository needs from a catalog
//! - [`JamendoApi`]: the HTTP implementation against Jamendo

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Playlist, Track};

pub mod jamendo;

pub use jamendo::JamendoApi;

/// A paginated remote track catalog.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Fetch one page of the track listing.
    async fn fetch_tracks(&self, limit: u32, offset: u32) -> Result<Vec<Track>>;

    /// Fetch the featured playlist listing.
    async fn fetch_featured_playlists(&self, limit: u32) -> Result<Vec<Playlist>>;
}

#[cfg(test)]
pub(crate) mod fake;
