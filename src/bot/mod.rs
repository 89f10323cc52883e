//! # Bot Module
//!
//! Capa de Discord sobre el motor de audio.
//!
//! - [`commands`]: interpreta los comandos de texto con prefijo
//! - [`handlers`]: ejecuta cada comando contra el [`AudioPlayer`] y arma la respuesta
//! - [`MusicBot`]: el [`EventHandler`] de serenity que une ambas cosas y publica los
//!   avisos del motor en el último canal de texto usado en cada guild

use dashmap::DashMap;
use serenity::{
    all::{ActivityData, ChannelId, Context, EventHandler, GuildId, Message, Ready, UserId},
    async_trait,
    builder::CreateMessage,
    http::Http,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};

pub mod commands;
pub mod handlers;

use crate::{
    audio::{AudioPlayer, PlayerNotice},
    ui::embeds,
};

/// Handler principal del bot.
pub struct MusicBot {
    player: Arc<AudioPlayer>,
    prefix: String,
    /// Último canal de texto donde se usó un comando, por guild
    text_channels: Arc<DashMap<GuildId, ChannelId>>,
    forwarding: AtomicBool,
}

impl MusicBot {
    pub fn new(player: Arc<AudioPlayer>, prefix: impl Into<String>) -> Self {
        Self {
            player,
            prefix: prefix.into(),
            text_channels: Arc::new(DashMap::new()),
            forwarding: AtomicBool::new(false),
        }
    }

    /// Arranca la tarea que publica los avisos del motor. Solo la primera llamada tiene efecto.
    fn start_notice_forwarder(&self, http: Arc<Http>) {
        if self.forwarding.swap(true, Ordering::SeqCst) {
            return;
        }

        let notices = self.player.subscribe();
        let channels = self.text_channels.clone();
        tokio::spawn(forward_notices(notices, channels, http));
        info!("📣 Reenvío de avisos activado");
    }
}

#[async_trait]
impl EventHandler for MusicBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        ctx.set_activity(Some(ActivityData::listening(format!("{}help", self.prefix))));
        self.start_notice_forwarder(ctx.http.clone());
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let Some(guild_id) = msg.guild_id else {
            return;
        };
        let Some(parsed) = commands::parse(&msg.content, &self.prefix) else {
            return;
        };

        self.text_channels.insert(guild_id, msg.channel_id);

        let embed = match parsed {
            Ok(command) => {
                let request = handlers::Request {
                    guild_id,
                    user_id: msg.author.id,
                    voice_channel: user_voice_channel(&ctx, guild_id, msg.author.id),
                };
                handlers::execute(&self.player, &request, command, &self.prefix).await
            }
            Err(usage) => embeds::create_warning_embed("Uso incorrecto", &usage),
        };

        if let Err(e) = msg
            .channel_id
            .send_message(&ctx.http, CreateMessage::new().embed(embed))
            .await
        {
            error!("Error al responder en canal {}: {:?}", msg.channel_id, e);
        }
    }
}

/// Canal de voz del usuario según la caché del guild.
fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}

async fn forward_notices(
    mut notices: broadcast::Receiver<PlayerNotice>,
    channels: Arc<DashMap<GuildId, ChannelId>>,
    http: Arc<Http>,
) {
    loop {
        let notice = match notices.recv().await {
            Ok(notice) => notice,
            Err(RecvError::Lagged(skipped)) => {
                warn!("⚠️ Se perdieron {} avisos del reproductor", skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let guild_id = notice.guild_id();
        let Some(channel_id) = channels.get(&guild_id).map(|entry| *entry.value()) else {
            debug!("Aviso sin canal de texto para guild {}", guild_id);
            continue;
        };

        let message = CreateMessage::new().embed(embeds::create_notice_embed(&notice));
        if let Err(e) = channel_id.send_message(&http, message).await {
            error!("Error al publicar aviso en canal {}: {:?}", channel_id, e);
        }
    }

    debug!("Reenvío de avisos terminado");
}
