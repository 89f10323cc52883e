use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};

use crate::audio::{
    session::SessionState,
    track::{format_duration, Track},
    NowPlayingView, PlayerNotice, PlayerStatus, QueueView,
};

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 Harmonia";

fn duration_label(track: &Track) -> String {
    match track.duration_secs() {
        0 => "🔴 En vivo / desconocida".to_string(),
        secs => format_duration(secs),
    }
}

fn with_track_details(mut embed: CreateEmbed, track: &Track) -> CreateEmbed {
    embed = embed
        .field(
            "🎤 Artista",
            track.uploader.clone().unwrap_or_else(|| "Desconocido".to_string()),
            true,
        )
        .field("⏱️ Duración", duration_label(track), true)
        .field("👤 Solicitado por", format!("<@{}>", track.requested_by), true);

    if let Some(thumbnail) = &track.thumbnail {
        embed = embed.thumbnail(thumbnail);
    }

    if track.url.starts_with("http") {
        embed = embed.url(&track.url);
    }

    embed
}

pub fn create_now_playing_embed(track: &Track) -> CreateEmbed {
    let embed = CreateEmbed::default()
        .title("🎵 Reproduciendo Ahora")
        .description(format!("**{}**", track.title))
        .color(colors::SUCCESS_GREEN);

    with_track_details(embed, track)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Canción actual con progreso, volumen y estado de repeat.
pub fn create_now_playing_status_embed(view: &NowPlayingView) -> CreateEmbed {
    let elapsed = format_duration(view.elapsed.as_secs().max(1));
    let progress = match view.track.duration_secs() {
        0 => elapsed,
        total => format!("{} / {}", elapsed, format_duration(total)),
    };

    let state = if view.paused { "⏸️ Pausado" } else { "▶️ Sonando" };
    let embed = CreateEmbed::default()
        .title("🎵 Reproduciendo Ahora")
        .description(format!("**{}**", view.track.title))
        .color(if view.paused { colors::WARNING_ORANGE } else { colors::SUCCESS_GREEN });

    with_track_details(embed, &view.track)
        .field("📍 Progreso", progress, true)
        .field("🎛️ Estado", state, true)
        .field("🔊 Volumen", create_volume_bar(view.volume), false)
        .footer(CreateEmbedFooter::new(if view.repeat {
            "🔂 Repetición activada"
        } else {
            STANDARD_FOOTER
        }))
        .timestamp(Timestamp::now())
}

pub fn create_track_added_embed(track: &Track, position: usize) -> CreateEmbed {
    let embed = CreateEmbed::default()
        .title("✅ Canción Agregada")
        .description(format!(
            "**{}** se ha agregado a la cola en la posición **#{}**",
            track.title, position
        ))
        .color(colors::SUCCESS_GREEN);

    with_track_details(embed, track)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(
            "🎵 Se reproducirá automáticamente cuando llegue su turno",
        ))
}

pub fn create_playlist_started_embed(first: &Track, started: bool) -> CreateEmbed {
    let status = if started {
        "▶️ Reproduciendo la primera canción"
    } else {
        "📋 Primera canción agregada a la cola"
    };

    CreateEmbed::default()
        .title("📋 Cargando Playlist")
        .description(format!("{}: **{}**\n\n⏳ Agregando el resto en segundo plano...", status, first.title))
        .color(colors::MUSIC_PURPLE)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
        .timestamp(Timestamp::now())
}

/// Crea un embed para mostrar la cola de reproducción
pub fn create_queue_embed(view: &QueueView) -> CreateEmbed {
    let page = &view.page;
    let mut embed = CreateEmbed::default()
        .title("📋 Cola de Reproducción")
        .color(colors::INFO_BLUE);

    if page.total_items == 0 && view.now_playing.is_none() {
        return embed
            .description("😴 **La cola está vacía**\n\n💡 Usa `!play <canción>` para agregar música")
            .color(colors::NEUTRAL_GRAY)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
            .timestamp(Timestamp::now());
    }

    if let Some(current) = &view.now_playing {
        let status = if view.repeat { "🔂" } else { "▶️" };
        embed = embed.field(
            format!("{} Reproduciendo", status),
            format!("**{}** `[{}]`", current.title, duration_label(current)),
            false,
        );
    }

    if !page.items.is_empty() {
        let description: String = page
            .items
            .iter()
            .map(|(position, track)| {
                format!(
                    "**{}**. {} `[{}]` • <@{}>\n",
                    position,
                    track.title,
                    duration_label(track),
                    track.requested_by
                )
            })
            .collect();

        embed = embed.field("Próximas canciones", description, false);
    }

    let mut info = format!("**Total:** {}/{} canciones", page.total_items, page.max_size);
    if !page.total_duration.is_zero() {
        info.push_str(&format!(
            " • **Duración:** {}",
            format_duration(page.total_duration.as_secs())
        ));
    }
    embed = embed.field("Información", info, false);

    let footer = if page.total_pages > 1 {
        format!("Página {} de {} • Harmonia", page.current_page, page.total_pages)
    } else {
        STANDARD_FOOTER.to_string()
    };

    embed
        .footer(CreateEmbedFooter::new(footer))
        .timestamp(Timestamp::now())
}

pub fn create_status_embed(status: &PlayerStatus) -> CreateEmbed {
    let (emoji, color) = match status.session {
        SessionState::Connected => ("🟢", colors::SUCCESS_GREEN),
        SessionState::Connecting | SessionState::Reconnecting => ("🟡", colors::WARNING_ORANGE),
        SessionState::Disconnecting | SessionState::Disconnected => ("🔴", colors::ERROR_RED),
    };

    let channel = status
        .channel_id
        .map(|id| format!("<#{}>", id))
        .unwrap_or_else(|| "Ninguno".to_string());

    CreateEmbed::default()
        .title("📡 Estado de la Conexión")
        .color(color)
        .field("Estado", format!("{} {}", emoji, status.session.as_str()), true)
        .field("Canal", channel, true)
        .field("Reintentos", status.retry_count.to_string(), true)
        .field(
            "Reproduciendo",
            status.now_playing.clone().unwrap_or_else(|| "Nada".to_string()),
            false,
        )
        .field(
            "Cola",
            format!("{}/{}", status.queue_len, status.max_queue_size),
            true,
        )
        .field("Volumen", format!("{}%", status.volume), true)
        .field("Repetición", if status.repeat { "🔂 Sí" } else { "No" }, true)
        .footer(CreateEmbedFooter::new(format!(
            "Última actividad hace {}",
            humantime::format_duration(std::time::Duration::from_secs(status.idle_for.as_secs()))
        )))
        .timestamp(Timestamp::now())
}

/// Aviso asíncrono del motor para el canal de texto del guild.
pub fn create_notice_embed(notice: &PlayerNotice) -> CreateEmbed {
    match notice {
        PlayerNotice::NowPlaying { track, .. } => create_now_playing_embed(track),
        PlayerNotice::TrackFailed { title, reason, .. } => create_error_embed(
            "Canción omitida",
            &format!("No se pudo reproducir **{}**: {}", title, reason),
        ),
        PlayerNotice::ConnectionLost { .. } => create_warning_embed(
            "Conexión perdida",
            "Se cortó la conexión de voz. Reconectando...",
        ),
        PlayerNotice::Reconnected { .. } => {
            create_success_embed("Reconectado", "La conexión de voz se recuperó")
        }
        PlayerNotice::ConnectionFailed { reason, .. } => create_error_embed(
            "Sin conexión de voz",
            &format!("{}\n\n💡 Usa `!reconnect` para intentar de nuevo", reason),
        ),
        PlayerNotice::IdleDisconnect { .. } => create_info_embed(
            "Desconectado por inactividad",
            "👋 No había nada en la cola, salí del canal de voz",
        ),
        PlayerNotice::PlaylistProgress { added, .. } => create_info_embed(
            "Cargando playlist",
            &format!("📋 {} canciones agregadas...", added),
        ),
        PlayerNotice::PlaylistFinished { added, failed, .. } => {
            let mut description = format!("📋 **{}** canciones agregadas a la cola", added);
            if *failed > 0 {
                description.push_str(&format!("\n⚠️ {} no se pudieron agregar", failed));
            }
            create_success_embed("Playlist cargada", &description)
        }
    }
}

pub fn create_help_embed(prefix: &str) -> CreateEmbed {
    let p = prefix;
    CreateEmbed::default()
        .title("🎵 Harmonia - Comandos")
        .color(colors::INFO_BLUE)
        .field(
            "🎵 Reproducción",
            format!(
                "• `{p}play <canción|url>` (`{p}p`) - Reproduce o encola\n\
                • `{p}pause` / `{p}resume` - Pausa y reanuda\n\
                • `{p}skip` (`{p}s`) - Salta la canción actual\n\
                • `{p}stop` - Detiene y limpia la cola\n\
                • `{p}nowplaying` (`{p}np`) - Canción actual"
            ),
            false,
        )
        .field(
            "📜 Cola",
            format!(
                "• `{p}queue [página]` (`{p}q`) - Muestra la cola\n\
                • `{p}remove <n>` (`{p}rm`) - Quita una canción\n\
                • `{p}move <desde> <hasta>` - Mueve una canción\n\
                • `{p}shuffle` - Mezcla la cola\n\
                • `{p}repeat` (`{p}loop`) - Repite la canción actual\n\
                • `{p}clear` - Vacía la cola"
            ),
            false,
        )
        .field(
            "🔊 Conexión",
            format!(
                "• `{p}volume <0-100>` (`{p}vol`) - Ajusta el volumen\n\
                • `{p}disconnect` (`{p}dc`, `{p}leave`) - Sale del canal\n\
                • `{p}reconnect` - Fuerza una reconexión\n\
                • `{p}status` - Estado de la conexión"
            ),
            false,
        )
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
        .timestamp(Timestamp::now())
}

pub fn create_error_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("❌ {}", title))
        .description(description)
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_warning_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("⚠️ {}", title))
        .description(description)
        .color(colors::WARNING_ORANGE)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_success_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("✅ {}", title))
        .description(description)
        .color(colors::SUCCESS_GREEN)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_info_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("ℹ️ {}", title))
        .description(description)
        .color(colors::INFO_BLUE)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea una barra visual de volumen
fn create_volume_bar(volume: u8) -> String {
    let segments = 20;
    let filled = (usize::from(volume.min(100)) * segments) / 100;
    let bar = "█".repeat(filled) + &"▒".repeat(segments - filled);
    format!("`[{}]` {}%", bar, volume)
}
