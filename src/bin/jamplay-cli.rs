use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use jamplay::{
    JamplayConfig, MediaEngine, MusicRepository, PlaybackController, PlaybackStatus,
    SilentEngine, Track,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "jamplay-cli")]
#[command(about = "Browse and play the Jamendo catalog", long_about = None)]
struct Cli {
    /// Jamendo client id (can also be set via JAMENDO_CLIENT_ID env var)
    #[arg(long, env = "JAMENDO_CLIENT_ID")]
    client_id: String,

    /// Track cache location
    #[arg(long, env = "JAMPLAY_DB")]
    db: Option<PathBuf>,

    /// Catalog base URL
    #[arg(long, env = "JAMPLAY_API_BASE")]
    api_base: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List cached tracks, fetching the catalog on first use
    Tracks {
        #[arg(short, long, default_value_t = 0)]
        page: usize,

        #[arg(short, long, default_value_t = 20)]
        size: usize,
    },
    /// Re-fetch the catalog into the cache
    Refresh,
    /// List featured playlists
    Featured,
    /// List recently played tracks
    Recent,
    /// List favorite tracks
    Favorites,
    /// Toggle the favorite flag of a track
    Favorite {
        id: String,
    },
    /// Play a track and print progress until it ends
    Play {
        id: String,

        /// Playback engine
        #[arg(short, long, value_enum, default_value_t = Engine::Silent)]
        engine: Engine,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Engine {
    /// Advance the clock without audio output
    Silent,
    /// Play through the default audio device
    Rodio,
}

fn print_tracks(tracks: &[Track]) {
    if tracks.is_empty() {
        println!("(none)");
    }
    for (i, track) in tracks.iter().enumerate() {
        println!(
            "{}. {} - {} [{}]{} (ID: {})",
            i + 1,
            track.artist,
            track.title,
            track.duration_formatted(),
            if track.is_favorite { " *" } else { "" },
            track.id
        );
    }
}

fn build_engine(
    kind: Engine,
) -> Result<(Box<dyn MediaEngine>, jamplay::player::EventReceiver), Box<dyn std::error::Error>> {
    match kind {
        Engine::Silent => {
            let (engine, events) = SilentEngine::new();
            Ok((Box::new(engine), events))
        }
        #[cfg(feature = "audio-output")]
        Engine::Rodio => {
            let (engine, events) = jamplay::player::RodioEngine::new(reqwest::Client::new())?;
            Ok((Box::new(engine), events))
        }
        #[cfg(not(feature = "audio-output"))]
        Engine::Rodio => Err("built without the audio-output feature".into()),
    }
}

async fn play(
    repo: Arc<MusicRepository>,
    id: &str,
    kind: Engine,
) -> Result<(), Box<dyn std::error::Error>> {
    let track = match repo.get_track_by_id(id).await? {
        Some(track) => track,
        None => {
            repo.get_tracks().await?;
            repo.get_track_by_id(id)
                .await?
                .ok_or_else(|| format!("unknown track {}", id))?
        }
    };

    let (engine, events) = build_engine(kind)?;
    let controller = Arc::new(PlaybackController::new(engine, repo));
    let driver = Arc::clone(&controller);
    let event_loop = tokio::spawn(async move { driver.run(events).await });

    let mut session = controller.subscribe();
    controller.play(track).await?;

    while session.changed().await.is_ok() {
        let snapshot = session.borrow_and_update().clone();
        if let Some(track) = &snapshot.current_track {
            print!(
                "\r{} - {}  {} / {}  {:?}   ",
                track.artist,
                track.title,
                jamplay::models::format_millis(snapshot.position_ms),
                jamplay::models::format_millis(snapshot.duration_ms),
                snapshot.status
            );
            std::io::stdout().flush()?;
        }
        match snapshot.status {
            PlaybackStatus::Ended | PlaybackStatus::Idle => break,
            PlaybackStatus::Error(message) => {
                println!();
                return Err(message.into());
            }
            _ => {}
        }
    }
    println!();
    event_loop.abort();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut config = JamplayConfig::new(cli.client_id);
    if let Some(db) = cli.db {
        config.database_path = db;
    }
    if let Some(base) = cli.api_base {
        config.set_api_base(base);
    }
    let repo = Arc::new(MusicRepository::from_config(&config)?);

    match cli.command {
        Commands::Tracks { page, size } => {
            let tracks = repo.get_tracks_paginated(page, size).await?;
            println!("Page {} ({} tracks):", page, tracks.len());
            print_tracks(&tracks);
        }
        Commands::Refresh => {
            let tracks = repo.try_fetch_tracks_from_network().await?;
            println!("✅ Refreshed {} tracks", tracks.len());
        }
        Commands::Featured => {
            for (i, playlist) in repo.get_featured_playlists().await?.iter().enumerate() {
                println!(
                    "{}. {} ({} tracks, ID: {})",
                    i + 1,
                    playlist.title,
                    playlist.track_count,
                    playlist.id
                );
            }
        }
        Commands::Recent => print_tracks(&repo.get_recent_plays().await?),
        Commands::Favorites => print_tracks(&repo.get_favorite_tracks().await?),
        Commands::Favorite { id } => {
            let favorite = repo.toggle_favorite(&id).await?;
            println!(
                "{} {}",
                id,
                if favorite { "added to favorites" } else { "removed from favorites" }
            );
        }
        Commands::Play { id, engine } => play(repo, &id, engine).await?,
    }

    Ok(())
}
