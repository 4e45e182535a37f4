//! # jamplay
//!
//! A cache-first client for the Jamendo catalog with a single-session
//! playback controller and UI-ready state holders.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use jamplay::{JamplayConfig, MusicRepository, PlaybackController, SilentEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = JamplayConfig::from_env()?;
//!     let repo = Arc::new(MusicRepository::from_config(&config)?);
//!
//!     // First call fills the local cache, later calls are served from it
//!     let tracks = repo.get_tracks_paginated(0, config.page_size).await?;
//!
//!     let (engine, events) = SilentEngine::new();
//!     let controller = Arc::new(PlaybackController::new(Box::new(engine), repo.clone()));
//!     let driver = controller.clone();
//!     tokio::spawn(async move { driver.run(events).await });
//!
//!     controller.play_playlist(tracks, 0).await?;
//!     controller.skip_next().await?;
//!     println!("{:?}", controller.session().status);
//!     Ok(())
//! }
//! ```
//!
//! ## Layout
//!
//! - [`store`] - SQLite track cache with favorites and play history
//! - [`api`] - catalog trait and the Jamendo HTTP client
//! - [`MusicRepository`] - read-through policy over both
//! - [`player`] - media engine seam and [`PlaybackController`]
//! - [`presentation`] - home and player state holders
//!
//! ## Features
//!
//! - `audio-output`: enables `player::RodioEngine` for real audio output

pub mod api;
pub mod config;
pub mod converters;
pub mod error;
pub mod models;
pub mod player;
pub mod presentation;
pub mod repository;
pub mod store;

pub use api::{CatalogSource, JamendoApi};
pub use config::JamplayConfig;
pub use error::{JamplayError, Result};
pub use models::{Playlist, Track};
pub use player::{
    EngineEvent, EngineState, MediaEngine, MediaItem, PlaybackController, PlaybackSession,
    PlaybackStatus, SilentEngine,
};
pub use presentation::{
    HomeUiState, HomeViewModel, PlayerUiState, PlayerViewModel, PlaylistItem, TrackItem,
};
pub use repository::{read_through, MusicRepository};
pub use store::TrackStore;
