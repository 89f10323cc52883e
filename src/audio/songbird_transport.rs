//! Implementación de [`VoiceTransport`] sobre songbird.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    events::CoreEvent,
    input::{File, HttpRequest, Input},
    tracks::{PlayMode, TrackHandle},
    Call, Event, EventContext, EventHandler as SongbirdEventHandler, Songbird, TrackEvent,
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::{
    track::AudioStream,
    transport::{
        ConnectionId, OutputHandle, PlaybackId, VoiceConnection, VoiceEvent, VoiceEventSender,
        VoiceTransport,
    },
};

pub struct SongbirdTransport {
    manager: Arc<Songbird>,
    http: reqwest::Client,
}

impl SongbirdTransport {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self {
            manager,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl VoiceTransport for SongbirdTransport {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        connection: ConnectionId,
        events: VoiceEventSender,
    ) -> Result<Box<dyn VoiceConnection>> {
        let call = match self.manager.join(guild_id, channel_id).await {
            Ok(call) => call,
            Err(e) => {
                // Un join fallido deja la llamada a medio armar en el manager
                if let Err(remove_err) = self.manager.remove(guild_id).await {
                    debug!("Limpieza tras join fallido en guild {}: {:?}", guild_id, remove_err);
                }
                anyhow::bail!("Error al unirse al canal de voz: {}", e);
            }
        };

        {
            let mut handler = call.lock().await;
            if let Err(e) = handler.deafen(true).await {
                warn!("No se pudo ensordecer al bot en guild {}: {:?}", guild_id, e);
            }

            // Los handlers de conexiones anteriores reportarían IDs viejos
            handler.remove_all_global_events();
            handler.add_global_event(
                Event::Core(CoreEvent::DriverDisconnect),
                DisconnectNotifier {
                    guild_id,
                    connection,
                    events: events.clone(),
                },
            );
        }

        info!("🔊 Conectado al canal de voz en guild {} ({})", guild_id, connection);

        Ok(Box::new(SongbirdConnection {
            id: connection,
            guild_id,
            channel_id,
            call,
            manager: self.manager.clone(),
            http: self.http.clone(),
            events,
            closed: AtomicBool::new(false),
        }))
    }
}

struct SongbirdConnection {
    id: ConnectionId,
    guild_id: GuildId,
    channel_id: ChannelId,
    call: Arc<Mutex<Call>>,
    manager: Arc<Songbird>,
    http: reqwest::Client,
    events: VoiceEventSender,
    closed: AtomicBool,
}

#[async_trait]
impl VoiceConnection for SongbirdConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    async fn is_live(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) || self.manager.get(self.guild_id).is_none() {
            return false;
        }
        self.call.lock().await.current_connection().is_some()
    }

    async fn send_audio(
        &self,
        stream: AudioStream,
        volume: f32,
        playback: PlaybackId,
    ) -> Result<Box<dyn OutputHandle>> {
        let input: Input = match stream {
            AudioStream::Url(url) => HttpRequest::new(self.http.clone(), url).into(),
            AudioStream::File(path) => File::new(path).into(),
        };

        let handle = {
            let mut call = self.call.lock().await;
            call.play_input(input)
        };

        handle
            .set_volume(volume)
            .context("Error al configurar el volumen")?;

        let notifier = TrackNotifier {
            guild_id: self.guild_id,
            playback,
            events: self.events.clone(),
        };
        handle
            .add_event(Event::Track(TrackEvent::End), notifier.clone())
            .context("Error al agregar event handler")?;
        handle
            .add_event(Event::Track(TrackEvent::Error), notifier)
            .context("Error al agregar event handler")?;

        Ok(Box::new(SongbirdOutput { handle }))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        {
            let mut call = self.call.lock().await;
            call.remove_all_global_events();
            call.stop();
        }

        if let Err(e) = self.manager.remove(self.guild_id).await {
            debug!("Llamada de guild {} ya estaba cerrada: {:?}", self.guild_id, e);
        }
        info!("👋 Conexión {} cerrada en guild {}", self.id, self.guild_id);
    }
}

struct SongbirdOutput {
    handle: TrackHandle,
}

impl OutputHandle for SongbirdOutput {
    fn pause(&self) -> Result<()> {
        self.handle.pause().context("Error al pausar")
    }

    fn resume(&self) -> Result<()> {
        self.handle.play().context("Error al reanudar")
    }

    fn stop(&self) -> Result<()> {
        self.handle.stop().context("Error al detener")
    }

    fn set_volume(&self, volume: f32) -> Result<()> {
        self.handle
            .set_volume(volume)
            .context("Error al configurar el volumen")
    }

    fn seek(&self, position: Duration) -> Result<()> {
        // Songbird resuelve el seek en el driver; si la fuente no lo soporta sigue desde donde está
        let _pending = self.handle.seek(position);
        Ok(())
    }
}

/// Reporta el fin (o error) de una salida como [`VoiceEvent::TrackEnded`].
#[derive(Clone)]
struct TrackNotifier {
    guild_id: GuildId,
    playback: PlaybackId,
    events: VoiceEventSender,
}

#[async_trait]
impl SongbirdEventHandler for TrackNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let error = match ctx {
            EventContext::Track(tracks) => tracks.iter().find_map(|(state, _)| match &state.playing {
                PlayMode::Errored(e) => Some(format!("{:?}", e)),
                _ => None,
            }),
            _ => None,
        };

        match &error {
            Some(e) => error!("❌ Error en track para guild {}: {}", self.guild_id, e),
            None => debug!("🎵 Track terminó en guild {} ({})", self.guild_id, self.playback),
        }

        if self
            .events
            .send(VoiceEvent::TrackEnded {
                playback: self.playback,
                error,
            })
            .is_err()
        {
            debug!("Motor de guild {} ya no escucha eventos", self.guild_id);
        }

        // Un solo aviso por salida
        Some(Event::Cancel)
    }
}

/// Reporta cierres del driver como [`VoiceEvent::ConnectionLost`].
struct DisconnectNotifier {
    guild_id: GuildId,
    connection: ConnectionId,
    events: VoiceEventSender,
}

#[async_trait]
impl SongbirdEventHandler for DisconnectNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if let EventContext::DriverDisconnect(data) = ctx {
            warn!(
                "🔌 Driver de voz desconectado en guild {}: {:?} ({:?})",
                self.guild_id, data.kind, data.reason
            );

            if self
                .events
                .send(VoiceEvent::ConnectionLost {
                    connection: self.connection,
                })
                .is_err()
            {
                debug!("Motor de guild {} ya no escucha eventos", self.guild_id);
            }
        }

        None
    }
}
