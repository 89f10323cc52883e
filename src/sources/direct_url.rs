use serenity::model::id::UserId;
use url::Url;

use crate::{
    audio::track::{AudioStream, Track},
    error::{MusicError, MusicResult},
};

const AUDIO_EXTENSIONS: [&str; 6] = [".mp3", ".wav", ".ogg", ".flac", ".m4a", ".opus"];

/// Archivos de audio servidos por HTTP: no necesitan yt-dlp.
pub struct DirectUrlClient;

impl DirectUrlClient {
    pub fn is_valid_url(url: &str) -> bool {
        let Ok(parsed) = Url::parse(url.trim()) else {
            return false;
        };

        if !matches!(parsed.scheme(), "http" | "https") {
            return false;
        }

        let path = parsed.path().to_lowercase();
        AUDIO_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
    }

    pub fn get_track(url: &str, requested_by: UserId) -> MusicResult<Track> {
        let url = url.trim();
        let parsed = Url::parse(url).map_err(|e| MusicError::resolution(format!("URL mal formada: {}", e)))?;

        let title = parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|name| !name.is_empty())
            .map(|name| name.to_string())
            .unwrap_or_else(|| url.to_string());

        Ok(Track::new(url, title, url, requested_by).with_stream(AudioStream::Url(url.to_string())))
    }
}
