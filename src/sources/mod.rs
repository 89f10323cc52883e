pub mod direct_url;
pub mod ytdlp;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serenity::model::id::UserId;

use crate::{
    audio::track::{AudioStream, Track},
    error::MusicResult,
};

pub use direct_url::DirectUrlClient;
pub use ytdlp::YtDlpResolver;

/// Secuencia perezosa de tracks de una playlist; cada item se resuelve al pedirlo.
pub type PlaylistStream = BoxStream<'static, MusicResult<Track>>;

/// Convierte consultas de usuario en tracks reproducibles.
///
/// Las implementaciones hacen su trabajo fuera del hilo del scheduler (procesos hijos,
/// I/O asíncrono) y aplican `MAX_SONG_DURATION` antes de devolver nada: un track demasiado
/// largo nunca llega a la cola.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackResolver: Send + Sync {
    /// Resuelve una búsqueda o URL a un único track.
    async fn resolve(&self, query: &str, requester: UserId) -> MusicResult<Track>;

    /// Resuelve una playlist de forma incremental. Para reiniciarla hay que volver a llamar.
    fn resolve_playlist(&self, url: &str, requester: UserId) -> PlaylistStream;

    /// Obtiene un stream fresco para un track cuyo handle ya se consumió o expiró.
    async fn open_stream(&self, track: &Track) -> MusicResult<AudioStream>;
}

/// Detecta consultas de playlist (`list=` o la palabra `playlist`).
pub fn is_playlist(query: &str) -> bool {
    let lower = query.to_lowercase();
    lower.contains("playlist") || lower.contains("list=")
}

pub fn is_url(query: &str) -> bool {
    let query = query.trim();
    query.starts_with("http://") || query.starts_with("https://")
}
