#[macro_use]
extern crate log;

use anyhow::{Context, Result};
use breathing_bridge::{
    config,
    event::{self, EventBus},
    registry::SessionRegistry,
    resolver::{ChainExtractor, SourceResolver},
    transcode::ProcessTranscoder,
    youtube::{self, YtDlpExtractor},
};
use std::sync::Arc;

#[cfg(feature = "discord")]
use breathing_bridge::{discord, session::SessionContext};

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::formatted_builder()
        .filter_level(log::LevelFilter::Info)
        .parse_env("RUST_LOG")
        .init();

    let config = config::load().await?;

    youtube::ensure_binary(&config.resolver.yt_dlp_path)
        .await
        .context("Could not set up yt-dlp")?;

    let bus = EventBus::new();
    event::debug(&bus);

    let extractor = ChainExtractor::new(Arc::new(YtDlpExtractor::new(
        config.resolver.yt_dlp_path.clone(),
    )));
    let resolver = SourceResolver::new(Arc::new(extractor), &config.resolver);
    let transcoder = Arc::new(ProcessTranscoder::new(config.transcoder.clone()));

    #[cfg(feature = "discord")]
    let registry = {
        let discord_config = config
            .discord
            .clone()
            .context("The [discord] section is missing from the configuration")?;

        let manager = discord::voice_manager();
        let registry = SessionRegistry::new(SessionContext {
            resolver,
            transcoder,
            transports: Arc::new(discord::SongbirdTransportFactory::new(manager.clone())),
            bus: bus.clone(),
            scheduler: config.scheduler.clone(),
            session: config.session.clone(),
        });

        info!("Starting Discord bot");
        discord::init(registry.clone(), &discord_config, manager).await?;
        Some(registry)
    };

    #[cfg(not(feature = "discord"))]
    let registry: Option<SessionRegistry> = {
        let _ = (resolver, transcoder, &bus);
        warn!("Built without the discord feature, there is no voice transport to play into");
        None
    };

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    if let Some(registry) = registry {
        registry.shutdown().await;
    }

    Ok(())
}
