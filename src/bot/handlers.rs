use serenity::{
    builder::CreateEmbed,
    model::id::{ChannelId, GuildId, UserId},
};
use tracing::{info, warn};

use super::commands::Command;
use crate::{
    audio::{AudioPlayer, PlayOutcome},
    error::{MusicError, MusicResult},
    ui::embeds,
};

/// Quién pide el comando y desde dónde.
#[derive(Debug, Clone, Copy)]
pub struct Request {
    pub guild_id: GuildId,
    pub user_id: UserId,
    /// Canal de voz en el que está el usuario, si está en alguno
    pub voice_channel: Option<ChannelId>,
}

/// Ejecuta un comando y arma la respuesta. Los errores se muestran al usuario.
pub async fn execute(player: &AudioPlayer, request: &Request, command: Command, prefix: &str) -> CreateEmbed {
    info!(
        "📝 Comando {}{} usado por {} en guild {}",
        prefix,
        command.name(),
        request.user_id,
        request.guild_id
    );

    match run(player, request, command, prefix).await {
        Ok(embed) => embed,
        Err(e) => {
            warn!("Comando fallido en guild {}: {}", request.guild_id, e);
            error_embed(&e)
        }
    }
}

async fn run(player: &AudioPlayer, request: &Request, command: Command, prefix: &str) -> MusicResult<CreateEmbed> {
    let guild_id = request.guild_id;

    let embed = match command {
        Command::Play(query) => {
            let channel = request.voice_channel.ok_or(MusicError::NoVoiceChannel)?;
            match player.play(guild_id, request.user_id, channel, &query).await? {
                PlayOutcome::Started(track) => embeds::create_now_playing_embed(&track),
                PlayOutcome::Queued { track, position } => embeds::create_track_added_embed(&track, position),
                PlayOutcome::Playlist { first, started } => embeds::create_playlist_started_embed(&first, started),
            }
        }
        Command::Skip => {
            let skipped = player.skip(guild_id).await?;
            embeds::create_success_embed("Canción saltada", &format!("⏭️ **{}**", skipped.title))
        }
        Command::Stop => {
            let cleared = player.stop(guild_id).await?;
            embeds::create_success_embed(
                "Reproducción detenida",
                &format!("⏹️ Se descartaron {} canciones de la cola", cleared),
            )
        }
        Command::Pause => {
            player.pause(guild_id).await?;
            embeds::create_success_embed("Pausado", "⏸️ Reproducción pausada")
        }
        Command::Resume => {
            player.resume(guild_id).await?;
            embeds::create_success_embed("Reanudado", "▶️ Reproducción reanudada")
        }
        Command::Volume(None) => {
            let status = player.status(guild_id).await.ok_or(MusicError::NotConnected)?;
            embeds::create_info_embed("Volumen", &format!("🔊 Volumen actual: **{}%**", status.volume))
        }
        Command::Volume(Some(volume)) => {
            player.set_volume(guild_id, volume).await?;
            embeds::create_success_embed("Volumen ajustado", &format!("🔊 Volumen: **{}%**", volume))
        }
        Command::Queue(page) => match player.queue_view(guild_id, page).await {
            Some(view) => embeds::create_queue_embed(&view),
            None => embeds::create_info_embed(
                "Cola de Reproducción",
                &format!("😴 **La cola está vacía**\n\n💡 Usa `{}play <canción>` para agregar música", prefix),
            ),
        },
        Command::Remove(position) => {
            let removed = player.remove(guild_id, position).await?;
            embeds::create_success_embed(
                "Canción removida",
                &format!("🗑️ **{}** (posición {})", removed.title, position),
            )
        }
        Command::Move { from, to } => {
            player.move_track(guild_id, from, to).await?;
            embeds::create_success_embed("Canción movida", &format!("↕️ De la posición {} a la {}", from, to))
        }
        Command::Shuffle => {
            let len = player.shuffle(guild_id).await?;
            embeds::create_success_embed("Cola mezclada", &format!("🔀 {} canciones en nuevo orden", len))
        }
        Command::Repeat => {
            let enabled = player.toggle_repeat(guild_id).await?;
            let description = if enabled {
                "🔂 La canción actual se repetirá"
            } else {
                "➡️ Repetición desactivada"
            };
            embeds::create_success_embed("Repetición", description)
        }
        Command::Clear => {
            let cleared = player.clear(guild_id).await?;
            embeds::create_success_embed("Cola vaciada", &format!("🧹 Se quitaron {} canciones", cleared))
        }
        Command::NowPlaying => {
            let view = player.now_playing(guild_id).await.ok_or(MusicError::NothingPlaying)?;
            embeds::create_now_playing_status_embed(&view)
        }
        Command::Disconnect => {
            player.disconnect(guild_id).await?;
            embeds::create_success_embed("Desconectado", "👋 Salí del canal de voz")
        }
        Command::Reconnect => {
            let current = player.status(guild_id).await.and_then(|status| status.channel_id);
            let channel = request
                .voice_channel
                .or(current)
                .ok_or(MusicError::NoVoiceChannel)?;
            player.reconnect(guild_id, channel).await?;
            embeds::create_success_embed("Reconectado", &format!("🔄 Conectado a <#{}>", channel))
        }
        Command::Status => match player.status(guild_id).await {
            Some(status) => embeds::create_status_embed(&status),
            None => embeds::create_info_embed("Estado de la Conexión", "🔴 Sin sesión de voz activa"),
        },
        Command::Help => embeds::create_help_embed(prefix),
    };

    Ok(embed)
}

fn error_embed(error: &MusicError) -> CreateEmbed {
    let title = match error {
        MusicError::Capacity { .. } => "Cola llena",
        MusicError::Position { .. } => "Posición inválida",
        MusicError::Resolution(_) | MusicError::TooLong { .. } => "No se pudo agregar la canción",
        MusicError::Connection { .. } => "Sin conexión de voz",
        MusicError::InvalidVolume(_) => "Volumen inválido",
        MusicError::NothingPlaying => "Nada que hacer",
        MusicError::NotConnected | MusicError::NoVoiceChannel => "Canal de voz",
        MusicError::Cancelled => "Operación cancelada",
        MusicError::Internal(_) => "Error interno",
    };

    embeds::create_error_embed(title, &error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{testing::FakeTransport, track::{AudioStream, Track}},
        config::EngineSettings,
        sources::MockTrackResolver,
    };
    use serde_json::Value;
    use std::sync::Arc;

    fn player() -> AudioPlayer {
        let mut resolver = MockTrackResolver::new();
        resolver.expect_resolve().returning(|query: &str, requester: UserId| {
            Ok(Track::new(query, query, format!("https://youtu.be/{}", query), requester)
                .with_stream(AudioStream::Url("https://cdn.example.com/x".into())))
        });
        AudioPlayer::new(
            Arc::new(resolver),
            Arc::new(FakeTransport::new()),
            EngineSettings::default(),
        )
    }

    fn request(voice_channel: Option<ChannelId>) -> Request {
        Request {
            guild_id: GuildId::new(1),
            user_id: UserId::new(2),
            voice_channel,
        }
    }

    fn title(embed: CreateEmbed) -> String {
        let value: Value = serde_json::to_value(embed).unwrap();
        value["title"].as_str().unwrap_or_default().to_string()
    }

    #[tokio::test(start_paused = true)]
    async fn play_requires_voice_channel() {
        let player = player();
        let embed = execute(&player, &request(None), Command::Play("algo".into()), "!").await;

        assert_eq!(title(embed), "❌ Canal de voz");
        assert_eq!(player.active_guilds(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn play_then_queue_reports_position() {
        let player = player();
        let req = request(Some(ChannelId::new(5)));

        let first = execute(&player, &req, Command::Play("uno".into()), "!").await;
        assert_eq!(title(first), "🎵 Reproduciendo Ahora");

        let second = execute(&player, &req, Command::Play("dos".into()), "!").await;
        assert_eq!(title(second), "✅ Canción Agregada");
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_volume_is_explained() {
        let player = player();
        let embed = execute(&player, &request(None), Command::Volume(Some(101)), "!").await;
        assert_eq!(title(embed), "❌ Volumen inválido");
    }

    #[tokio::test(start_paused = true)]
    async fn commands_without_session_explain_why() {
        let player = player();
        let embed = execute(&player, &request(None), Command::Skip, "!").await;
        assert_eq!(title(embed), "❌ Nada que hacer");

        let embed = execute(&player, &request(None), Command::Reconnect, "!").await;
        assert_eq!(title(embed), "❌ Canal de voz");
    }
}
