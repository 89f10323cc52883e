use thiserror::Error;

/// Errores tipados que el motor de reproducción devuelve al front end.
///
/// Los errores de resolución se recuperan localmente (se salta la canción y la cola avanza);
/// los de conexión se reportan al usuario; los internos detienen solo el loop del guild.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MusicError {
    #[error("La cola está llena (máximo {max} canciones)")]
    Capacity { max: usize },

    #[error("Posición inválida: {position} (usa un número entre 1 y {len})")]
    Position { position: usize, len: usize },

    #[error("No se pudo resolver la canción: {0}")]
    Resolution(String),

    #[error("La canción es demasiado larga ({duration}s, máximo {max}s)")]
    TooLong { duration: u64, max: u64 },

    #[error("Conexión de voz fallida tras {attempts} intentos: {reason}")]
    Connection { attempts: u32, reason: String },

    #[error("El volumen debe estar entre 0 y 100, recibido: {0}")]
    InvalidVolume(u32),

    #[error("No hay nada reproduciéndose")]
    NothingPlaying,

    #[error("No estoy conectado a un canal de voz")]
    NotConnected,

    #[error("Necesitas estar en un canal de voz")]
    NoVoiceChannel,

    #[error("Operación cancelada")]
    Cancelled,

    #[error("Error interno: {0}")]
    Internal(String),
}

impl MusicError {
    pub fn resolution(err: impl std::fmt::Display) -> Self {
        Self::Resolution(err.to_string())
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::Internal(err.to_string())
    }

    /// Errores que afectan solo a la canción actual; el loop puede continuar.
    pub fn is_track_local(&self) -> bool {
        matches!(self, Self::Resolution(_) | Self::TooLong { .. })
    }
}

pub type MusicResult<T> = std::result::Result<T, MusicError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_local_errors_are_recoverable() {
        assert!(MusicError::resolution("Video is private").is_track_local());
        assert!(MusicError::TooLong { duration: 9000, max: 7200 }.is_track_local());
        assert!(!MusicError::Connection { attempts: 3, reason: "timeout".into() }.is_track_local());
        assert!(!MusicError::Capacity { max: 20 }.is_track_local());
    }

    #[test]
    fn position_error_mentions_valid_range() {
        let msg = MusicError::Position { position: 7, len: 3 }.to_string();
        assert!(msg.contains("entre 1 y 3"));
    }
}
