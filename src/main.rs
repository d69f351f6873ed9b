//! Tally AI - chat command backend
//!
//! Serves the AI side of the Tally bot: per-conversation chat sessions with a
//! bounded history, regeneration of the latest reply, characters, custom
//! prompts and image generation, fronting Ollama / OpenAI-compatible and
//! Stable Diffusion servers.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod conversation;
mod core;
mod providers;
mod routes;
mod session;

use crate::config::{BotConfig, CharacterBook, Config, StorageKind};
use crate::core::ChatEngine;
use crate::providers::{Provider, StableDiffusionProvider};
use crate::session::SessionStore;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub chat_engine: Arc<ChatEngine>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tally_ai=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::from_env()?;

    let bot_file = std::env::var("TALLY_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("tally.toml"));
    let bot = if bot_file.exists() {
        let bot = BotConfig::from_file(&bot_file)?;
        config.apply_bot_file(&bot)?;
        tracing::info!("Loaded bot config from {}", bot_file.display());
        bot
    } else {
        BotConfig::default()
    };

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let limit = config.history_limit()?;

    // Initialize session storage
    let sessions = match config.storage {
        StorageKind::Memory => SessionStore::in_memory(limit),
        StorageKind::Sqlite => {
            let pool = session::connect_sqlite(&config.data_dir.join("tally.db")).await?;
            SessionStore::sqlite(pool, limit)
        }
    };
    tracing::info!(
        "Sessions: {:?} storage, {} turns of history",
        config.storage,
        limit.max_turns()
    );

    let characters = match config.characters_dir {
        Some(ref dir) => CharacterBook::load_dir(dir).await?,
        None => CharacterBook::builtin(),
    };
    tracing::info!("Loaded {} character(s)", characters.list().len());

    let provider = Provider::from_config(&config)?;
    tracing::info!("Text generation: {} ({})", provider.name(), provider.model());

    let mut chat_engine = ChatEngine::new(Arc::new(sessions), Arc::new(provider))
        .with_characters(characters, config.default_character.as_deref())?
        .with_timeout(config.generation_timeout());

    if let Some(ref url) = config.image_api_url {
        let images = StableDiffusionProvider::new(url.clone(), bot.image.clone())?;
        chat_engine = chat_engine.with_images(Arc::new(images));
        tracing::info!("Image generation: {}", url);
    }

    let state = AppState {
        config,
        chat_engine: Arc::new(chat_engine),
    };

    let app = Router::new()
        .merge(routes::router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!("Tally AI running at http://{} ({})", addr, bot.bot.name);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
