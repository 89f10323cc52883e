//! # Voice Session
//!
//! Máquina de estados de la conexión de voz de un guild:
//!
//! ```text
//! Disconnected ──play──▶ Connecting ──ok──▶ Connected ──cierre forzado──▶ Reconnecting
//!       ▲                    │                  │                              │
//!       │                    └──fallo/timeout──▶ Reconnecting ◀────────────────┘
//!       │                                           │   espera retry_delay × 2^n
//!       ├──────── intentos agotados ◀───────────────┘   y vuelve a Connecting
//!       └──── Disconnecting ◀── disconnect / idle / teardown
//! ```
//!
//! La sesión no tiene tareas propias: el motor del guild la maneja con su lock tomado, así que
//! nunca hay más de un intento de conexión en vuelo por guild. Las esperas de backoff son
//! `tokio::time::sleep` dentro de un `select!` con el token de cancelación del paso actual.

use serenity::model::id::{ChannelId, GuildId};
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    track::AudioStream,
    transport::{ConnectionId, OutputHandle, PlaybackId, VoiceConnection, VoiceEventSender, VoiceTransport},
};
use crate::{
    config::VoiceSettings,
    error::{MusicError, MusicResult},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Disconnecting,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "desconectado",
            SessionState::Connecting => "conectando",
            SessionState::Connected => "conectado",
            SessionState::Reconnecting => "reconectando",
            SessionState::Disconnecting => "desconectando",
        }
    }
}

/// Espera antes del reintento número `retry_count + 1`: `base × 2^retry_count`.
pub fn retry_delay(base: Duration, retry_count: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(retry_count))
}

pub struct VoiceSession {
    guild_id: GuildId,
    settings: VoiceSettings,
    transport: Arc<dyn VoiceTransport>,
    events: VoiceEventSender,
    state: SessionState,
    channel_id: Option<ChannelId>,
    connection: Option<Box<dyn VoiceConnection>>,
    retry_count: u32,
    next_connection: u64,
    last_activity: Instant,
    last_error: Option<String>,
}

impl VoiceSession {
    pub fn new(
        guild_id: GuildId,
        settings: VoiceSettings,
        transport: Arc<dyn VoiceTransport>,
        events: VoiceEventSender,
    ) -> Self {
        Self {
            guild_id,
            settings,
            transport,
            events,
            state: SessionState::Disconnected,
            channel_id: None,
            connection: None,
            retry_count: 0,
            next_connection: 1,
            last_activity: Instant::now(),
            last_error: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn channel_id(&self) -> Option<ChannelId> {
        self.channel_id
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected && self.connection.is_some()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Fija el canal destino mientras no haya una conexión establecida.
    pub fn set_channel(&mut self, channel_id: ChannelId) {
        if self.connection.is_none() && self.channel_id != Some(channel_id) {
            debug!("🎯 Canal de voz para guild {}: {}", self.guild_id, channel_id);
            self.channel_id = Some(channel_id);
        }
    }

    /// Valida la conexión antes de reproducir y, si hace falta, recorre
    /// Connecting/Reconnecting hasta quedar `Connected` o agotar los intentos.
    pub async fn ensure_connection(&mut self, cancel: &CancellationToken) -> MusicResult<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(MusicError::Cancelled);
            }

            match self.state {
                SessionState::Connected => {
                    let live = match &self.connection {
                        Some(connection) => connection.is_live().await,
                        None => false,
                    };

                    if live {
                        self.touch();
                        return Ok(());
                    }

                    warn!("🔌 Conexión de voz muerta en guild {}, reconectando", self.guild_id);
                    self.release_connection().await;
                    self.state = SessionState::Reconnecting;
                }
                SessionState::Disconnected | SessionState::Disconnecting => {
                    self.retry_count = 0;
                    self.attempt_connect(cancel).await?;
                }
                SessionState::Connecting => {
                    self.attempt_connect(cancel).await?;
                }
                SessionState::Reconnecting => {
                    if self.retry_count >= self.settings.reconnect_attempts {
                        let attempts = self.retry_count;
                        let reason = self
                            .last_error
                            .take()
                            .unwrap_or_else(|| "sin respuesta del servidor de voz".to_string());

                        self.state = SessionState::Disconnected;
                        self.retry_count = 0;
                        error!(
                            "❌ Reconexión agotada en guild {} tras {} intentos: {}",
                            self.guild_id, attempts, reason
                        );
                        return Err(MusicError::Connection { attempts, reason });
                    }

                    let delay = retry_delay(self.settings.retry_delay, self.retry_count);
                    self.retry_count += 1;
                    info!(
                        "🔄 Reintento {}/{} en {:?} para guild {}",
                        self.retry_count, self.settings.reconnect_attempts, delay, self.guild_id
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => {
                            debug!("⏹️ Backoff cancelado en guild {}", self.guild_id);
                            return Err(MusicError::Cancelled);
                        }
                    }

                    self.attempt_connect(cancel).await?;
                }
            }
        }
    }

    /// Un único intento con deadline. Los fallos dejan la sesión en `Reconnecting`;
    /// solo devuelve error si se canceló o no hay canal destino.
    async fn attempt_connect(&mut self, cancel: &CancellationToken) -> MusicResult<()> {
        let Some(channel_id) = self.channel_id else {
            self.state = SessionState::Disconnected;
            self.retry_count = 0;
            return Err(MusicError::NoVoiceChannel);
        };

        self.state = SessionState::Connecting;
        let connection_id = ConnectionId(self.next_connection);
        self.next_connection += 1;

        info!(
            "🔗 Conectando a canal {} en guild {} ({})",
            channel_id, self.guild_id, connection_id
        );

        let attempt = tokio::time::timeout(
            self.settings.connection_timeout,
            self.transport
                .connect(self.guild_id, channel_id, connection_id, self.events.clone()),
        );

        let result = tokio::select! {
            result = attempt => result,
            _ = cancel.cancelled() => {
                self.state = if self.retry_count > 0 {
                    SessionState::Reconnecting
                } else {
                    SessionState::Disconnected
                };
                return Err(MusicError::Cancelled);
            }
        };

        match result {
            Ok(Ok(connection)) => {
                info!("✅ Conectado a canal {} en guild {}", channel_id, self.guild_id);
                self.connection = Some(connection);
                self.state = SessionState::Connected;
                self.retry_count = 0;
                self.last_error = None;
                self.touch();
            }
            Ok(Err(e)) => {
                warn!("❌ Fallo de conexión en guild {}: {:#}", self.guild_id, e);
                self.last_error = Some(e.to_string());
                self.state = SessionState::Reconnecting;
            }
            Err(_) => {
                warn!(
                    "⏰ Timeout de conexión ({:?}) en guild {}",
                    self.settings.connection_timeout, self.guild_id
                );
                self.last_error = Some(format!(
                    "timeout tras {:?}",
                    self.settings.connection_timeout
                ));
                self.state = SessionState::Reconnecting;
            }
        }

        Ok(())
    }

    /// Cierre forzado reportado por el transporte. Devuelve `false` si el evento es de
    /// una conexión vieja o la sesión no estaba conectada.
    pub async fn connection_lost(&mut self, connection_id: ConnectionId) -> bool {
        let current = self.connection.as_ref().map(|c| c.id());
        if self.state != SessionState::Connected || current != Some(connection_id) {
            debug!(
                "Ignorando cierre de {} en guild {} (actual: {:?})",
                connection_id, self.guild_id, current
            );
            return false;
        }

        warn!("⚠️ Cierre forzado de {} en guild {}", connection_id, self.guild_id);
        self.release_connection().await;
        self.state = SessionState::Reconnecting;
        true
    }

    /// Entrega un stream a la conexión activa.
    pub async fn play(
        &mut self,
        stream: AudioStream,
        volume: f32,
        playback: PlaybackId,
    ) -> MusicResult<Box<dyn OutputHandle>> {
        let connection = match (&self.connection, self.state) {
            (Some(connection), SessionState::Connected) => connection,
            _ => return Err(MusicError::NotConnected),
        };

        let output = connection
            .send_audio(stream, volume, playback)
            .await
            .map_err(MusicError::resolution)?;
        self.touch();
        Ok(output)
    }

    /// Connected/Reconnecting → Disconnecting → Disconnected. Libera el handle aunque
    /// estemos a mitad de un backoff.
    pub async fn disconnect(&mut self) {
        if self.state == SessionState::Disconnected && self.connection.is_none() {
            self.retry_count = 0;
            return;
        }

        self.state = SessionState::Disconnecting;
        self.release_connection().await;
        self.state = SessionState::Disconnected;
        self.retry_count = 0;
        self.channel_id = None;
        self.last_error = None;
        info!("👋 Desconectado del canal de voz en guild {}", self.guild_id);
    }

    async fn release_connection(&mut self) {
        if let Some(connection) = self.connection.take() {
            debug!("🔓 Liberando {} en guild {}", connection.id(), self.guild_id);
            connection.close().await;
        }
    }
}
