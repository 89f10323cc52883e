use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tracing::{error, info};

mod audio;
mod bot;
mod config;
mod error;
mod sources;
mod ui;

use crate::audio::{songbird_transport::SongbirdTransport, AudioPlayer};
use crate::bot::MusicBot;
use crate::config::Config;
use crate::sources::{ytdlp, YtDlpResolver};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("harmonia=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    // El health check no necesita token
    if std::env::args().any(|arg| arg == "--health-check") {
        ytdlp::check_binaries().await?;
        println!("OK");
        return Ok(());
    }

    info!("🎵 Iniciando Harmonia v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    info!("{}", config.summary());

    if let Err(e) = ytdlp::check_binaries().await {
        error!("❌ Dependencias de audio no disponibles: {:#}", e);
    }

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    // Motor de reproducción sobre songbird + yt-dlp
    let manager = Songbird::serenity();
    let transport = Arc::new(SongbirdTransport::new(manager.clone()));
    let resolver = Arc::new(YtDlpResolver::new(&config));
    let player = Arc::new(AudioPlayer::new(resolver, transport, config.engine_settings()));

    let handler = MusicBot::new(player.clone(), config.command_prefix.clone());

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(manager)
        .await?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        player.shutdown().await;
        shard_manager.shutdown_all().await;
    });

    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    info!("👋 Bot detenido");
    Ok(())
}
