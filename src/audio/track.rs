use chrono::{DateTime, Utc};
use serenity::model::id::UserId;
use std::{fmt, path::PathBuf, time::Duration};

/// Handle reproducible de un track ya resuelto.
///
/// Puede apuntar a un recurso transitorio (URL firmada que expira, archivo temporal en el
/// directorio de descargas); se consume al entregarse a la sesión de voz.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioStream {
    /// URL directa de audio (googlevideo, CDN, archivo remoto)
    Url(String),
    /// Archivo local dentro de `DOWNLOAD_DIR`
    File(PathBuf),
}

impl AudioStream {
    pub fn describe(&self) -> String {
        match self {
            AudioStream::Url(url) => url.chars().take(60).collect(),
            AudioStream::File(path) => path.display().to_string(),
        }
    }
}

/// Una canción en la cola de un guild.
#[derive(Clone)]
pub struct Track {
    pub query: String,
    pub title: String,
    pub duration: Option<Duration>,
    pub url: String,
    pub uploader: Option<String>,
    pub thumbnail: Option<String>,
    pub requested_by: UserId,
    pub added_at: DateTime<Utc>,
    stream: Option<AudioStream>,
    /// Posición desde la que retomar (cierre forzado a mitad de canción)
    resume_at: Option<Duration>,
}

impl Track {
    pub fn new(query: impl Into<String>, title: impl Into<String>, url: impl Into<String>, requested_by: UserId) -> Self {
        Self {
            query: query.into(),
            title: title.into(),
            duration: None,
            url: url.into(),
            uploader: None,
            thumbnail: None,
            requested_by,
            added_at: Utc::now(),
            stream: None,
            resume_at: None,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_uploader(mut self, uploader: String) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: String) -> Self {
        self.thumbnail = Some(thumbnail);
        self
    }

    pub fn with_stream(mut self, stream: AudioStream) -> Self {
        self.stream = Some(stream);
        self
    }

    pub fn duration_secs(&self) -> u64 {
        self.duration.map(|d| d.as_secs()).unwrap_or(0)
    }

    pub fn is_resolved(&self) -> bool {
        self.stream.is_some()
    }

    /// Toma el stream para reproducirlo; el track queda sin resolver.
    pub fn take_stream(&mut self) -> Option<AudioStream> {
        self.stream.take()
    }

    /// Retoma la reproducción desde `position` la próxima vez que suene.
    pub fn resuming_at(mut self, position: Duration) -> Self {
        self.resume_at = Some(position).filter(|p| !p.is_zero());
        self
    }

    pub fn take_resume_at(&mut self) -> Option<Duration> {
        self.resume_at.take()
    }

    /// Copia sin el stream, conservando la posición de reanudación.
    pub fn without_stream(&self) -> Self {
        Self {
            stream: None,
            ..self.clone()
        }
    }

    /// Copia para re-encolar (repeat): empieza desde el principio con un stream nuevo.
    pub fn replay(&self) -> Self {
        Self {
            stream: None,
            resume_at: None,
            ..self.clone()
        }
    }
}

impl fmt::Debug for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Track")
            .field("title", &self.title)
            .field("duration", &self.duration)
            .field("url", &self.url)
            .field("requested_by", &self.requested_by)
            .field("resolved", &self.is_resolved())
            .field("resume_at", &self.resume_at)
            .finish()
    }
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
            && self.title == other.title
            && self.requested_by == other.requested_by
            && self.added_at == other.added_at
    }
}

/// Formatea segundos como MM:SS o HH:MM:SS.
pub fn format_duration(seconds: u64) -> String {
    if seconds == 0 {
        return "Desconocida".to_string();
    }

    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(0), "Desconocida");
        assert_eq!(format_duration(59), "00:59");
        assert_eq!(format_duration(200), "03:20");
        assert_eq!(format_duration(3725), "01:02:05");
    }

    #[test]
    fn replay_drops_consumed_stream() {
        let mut track = Track::new("q", "Canción", "https://youtu.be/x", UserId::new(1))
            .with_stream(AudioStream::Url("https://cdn/x".into()));
        assert!(track.is_resolved());

        let copy = track.replay();
        assert!(!copy.is_resolved());
        assert_eq!(copy, track);

        assert!(track.take_stream().is_some());
        assert!(!track.is_resolved());
    }

    #[test]
    fn resume_position_survives_only_without_stream() {
        let track = Track::new("q", "Canción", "https://youtu.be/x", UserId::new(1))
            .resuming_at(Duration::from_secs(42));

        assert_eq!(track.without_stream().take_resume_at(), Some(Duration::from_secs(42)));
        assert_eq!(track.replay().take_resume_at(), None);
        assert_eq!(track.replay().resuming_at(Duration::ZERO).take_resume_at(), None);
    }
}
