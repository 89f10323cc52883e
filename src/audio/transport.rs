//! Contrato con la capa de transporte de voz.
//!
//! El motor nunca habla con songbird directamente: pide conexiones a un [`VoiceTransport`],
//! entrega streams a la [`VoiceConnection`] resultante y recibe de vuelta [`VoiceEvent`]s
//! etiquetados por un canal por guild. Las etiquetas (`ConnectionId`, `PlaybackId`) permiten
//! descartar eventos viejos, así cada finalización se procesa una sola vez.

use anyhow::Result;
use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use std::{fmt, time::Duration};
use tokio::sync::mpsc;

use super::track::AudioStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlaybackId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

impl fmt::Display for PlaybackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "play#{}", self.0)
    }
}

/// Eventos asíncronos que el transporte reporta al motor de un guild.
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceEvent {
    /// La salida terminó (fin natural, stop o error del decoder).
    TrackEnded {
        playback: PlaybackId,
        error: Option<String>,
    },
    /// Cierre forzado de la conexión (invalidación de sesión, caída de red).
    ConnectionLost { connection: ConnectionId },
}

pub type VoiceEventSender = mpsc::UnboundedSender<VoiceEvent>;
pub type VoiceEventReceiver = mpsc::UnboundedReceiver<VoiceEvent>;

/// Fábrica de conexiones de voz.
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    /// Abre una conexión al canal. Los cierres forzados se reportan por `events`
    /// como [`VoiceEvent::ConnectionLost`] con el `connection` dado.
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        connection: ConnectionId,
        events: VoiceEventSender,
    ) -> Result<Box<dyn VoiceConnection>>;
}

/// Conexión viva, propiedad exclusiva de la sesión de voz del guild.
#[async_trait]
pub trait VoiceConnection: Send + Sync {
    fn id(&self) -> ConnectionId;

    fn channel_id(&self) -> ChannelId;

    async fn is_live(&self) -> bool;

    /// Comienza a emitir el stream. El fin se reporta como [`VoiceEvent::TrackEnded`]
    /// con el `playback` dado.
    async fn send_audio(
        &self,
        stream: AudioStream,
        volume: f32,
        playback: PlaybackId,
    ) -> Result<Box<dyn OutputHandle>>;

    /// Libera la conexión. Debe ser idempotente.
    async fn close(&self);
}

/// Control sobre una salida en curso.
pub trait OutputHandle: Send + Sync {
    fn pause(&self) -> Result<()>;
    fn resume(&self) -> Result<()>;
    fn stop(&self) -> Result<()>;
    fn set_volume(&self, volume: f32) -> Result<()>;
    fn seek(&self, position: Duration) -> Result<()>;
}
