use anyhow::{Context, Result};
use async_process::Command;
use async_trait::async_trait;
use futures::{stream, StreamExt};
use serde::Deserialize;
use regex::Regex;
use serenity::model::id::UserId;
use std::{
    path::PathBuf,
    sync::{Arc, LazyLock},
    time::Duration,
};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::{is_url, DirectUrlClient, PlaylistStream, TrackResolver};
use crate::{
    audio::track::{AudioStream, Track},
    config::Config,
    error::{MusicError, MusicResult},
};

/// Procesos yt-dlp simultáneos permitidos.
const MAX_CONCURRENT_EXTRACTIONS: usize = 3;

/// Prefijo de los errores de yt-dlp: `ERROR: [extractor] id: `
static ERROR_PREFIX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(?:ERROR:\s*)?(?:\[[^\]]+\]\s*[^:\s]+:\s*)?").ok());

/// Resolver basado en el binario `yt-dlp`. Cada extracción es un proceso hijo, así que
/// nunca bloquea el runtime.
#[derive(Clone)]
pub struct YtDlpResolver {
    rate_limiter: Arc<Semaphore>,
    download_dir: PathBuf,
    max_song_duration: u64,
    max_playlist_size: usize,
}

/// Información extraída de yt-dlp
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: String,
    duration: Option<f64>,
    uploader: Option<String>,
    thumbnail: Option<String>,
    webpage_url: Option<String>,
    /// URL del formato elegido con `-f`
    url: Option<String>,
    is_live: Option<bool>,
}

/// Entrada de `--flat-playlist`
#[derive(Debug, Deserialize)]
struct FlatEntry {
    id: Option<String>,
    url: Option<String>,
}

impl YtDlpResolver {
    pub fn new(config: &Config) -> Self {
        Self {
            rate_limiter: Arc::new(Semaphore::new(MAX_CONCURRENT_EXTRACTIONS)),
            download_dir: config.download_dir.clone(),
            max_song_duration: config.max_song_duration,
            max_playlist_size: config.max_playlist_size,
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .context("Limitador de yt-dlp cerrado")?;

        let output = Command::new("yt-dlp")
            .args(args)
            .current_dir(&self.download_dir)
            .output()
            .await
            .context("Error al ejecutar yt-dlp")?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("yt-dlp error: {}", error.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn extract(&self, query: &str, target: &str, requester: UserId) -> MusicResult<Track> {
        debug!("📊 Obteniendo info de: {}", target);

        let stdout = self
            .run(&[
                "--no-playlist",
                "--dump-json",
                "-f",
                "bestaudio/best",
                "--no-warnings",
                target,
            ])
            .await
            .map_err(to_resolution_error)?;

        let line = stdout
            .lines()
            .find(|line| !line.trim().is_empty())
            .ok_or_else(|| MusicError::resolution("no se encontraron resultados"))?;

        let info: YtDlpInfo = serde_json::from_str(line)
            .context("Error al parsear respuesta de yt-dlp")
            .map_err(MusicError::resolution)?;

        info_to_track(info, query, target, requester, self.max_song_duration)
    }

    async fn list_playlist(&self, url: &str) -> MusicResult<Vec<String>> {
        info!("📋 Obteniendo playlist: {}", url);

        let max_items = self.max_playlist_size.to_string();
        let stdout = self
            .run(&[
                "--flat-playlist",
                "--dump-json",
                "--playlist-end",
                &max_items,
                "--no-warnings",
                url,
            ])
            .await
            .map_err(to_resolution_error)?;

        let entries: Vec<String> = stdout
            .lines()
            .filter_map(|line| serde_json::from_str::<FlatEntry>(line).ok())
            .filter_map(entry_url)
            .take(self.max_playlist_size)
            .collect();

        if entries.is_empty() {
            return Err(MusicError::resolution(
                "la playlist está vacía o no está disponible",
            ));
        }

        info!("📋 Playlist con {} canciones: {}", entries.len(), url);
        Ok(entries)
    }
}

#[async_trait]
impl TrackResolver for YtDlpResolver {
    async fn resolve(&self, query: &str, requester: UserId) -> MusicResult<Track> {
        let query = query.trim();
        if query.is_empty() {
            return Err(MusicError::resolution("la búsqueda está vacía"));
        }

        if DirectUrlClient::is_valid_url(query) {
            debug!("🔗 URL directa de audio: {}", query);
            return DirectUrlClient::get_track(query, requester);
        }

        info!("🔍 Resolviendo: {}", query);
        self.extract(query, &search_target(query), requester).await
    }

    fn resolve_playlist(&self, url: &str, requester: UserId) -> PlaylistStream {
        let lister = self.clone();
        let extractor = self.clone();
        let url = url.trim().to_string();

        stream::once(async move { lister.list_playlist(&url).await })
            .flat_map(|listed| match listed {
                Ok(entries) => stream::iter(entries.into_iter().map(Ok)).left_stream(),
                Err(e) => stream::iter(vec![Err(e)]).right_stream(),
            })
            .then(move |entry| {
                let extractor = extractor.clone();
                async move {
                    let entry = entry?;
                    extractor.extract(&entry, &entry, requester).await
                }
            })
            .boxed()
    }

    async fn open_stream(&self, track: &Track) -> MusicResult<AudioStream> {
        if DirectUrlClient::is_valid_url(&track.url) {
            return Ok(AudioStream::Url(track.url.clone()));
        }

        debug!("🎵 Obteniendo URL de stream para: {}", track.url);
        let stdout = self
            .run(&[
                "--no-playlist",
                "-f",
                "bestaudio/best",
                "--get-url",
                "--no-warnings",
                &track.url,
            ])
            .await
            .map_err(to_resolution_error)?;

        stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(|url| AudioStream::Url(url.to_string()))
            .ok_or_else(|| MusicError::resolution("No se pudo obtener URL de stream"))
    }
}

/// Verifica que `yt-dlp` y `ffmpeg` estén instalados y respondan.
pub async fn check_binaries() -> Result<()> {
    for (binary, flag) in [("yt-dlp", "--version"), ("ffmpeg", "-version")] {
        let output = Command::new(binary)
            .arg(flag)
            .output()
            .await
            .with_context(|| format!("{} no está instalado", binary))?;

        if !output.status.success() {
            anyhow::bail!("{} respondió con error", binary);
        }

        let version = String::from_utf8_lossy(&output.stdout);
        info!("✅ {}: {}", binary, version.lines().next().unwrap_or("").trim());
    }

    Ok(())
}

fn search_target(query: &str) -> String {
    if is_url(query) {
        query.to_string()
    } else {
        format!("ytsearch1:{}", query)
    }
}

fn entry_url(entry: FlatEntry) -> Option<String> {
    match (entry.url, entry.id) {
        (Some(url), _) if is_url(&url) => Some(url),
        (_, Some(id)) if !id.is_empty() => Some(format!("https://www.youtube.com/watch?v={}", id)),
        _ => None,
    }
}

fn info_to_track(
    info: YtDlpInfo,
    query: &str,
    target: &str,
    requester: UserId,
    max_duration: u64,
) -> MusicResult<Track> {
    let duration = info.duration.filter(|d| *d > 0.0).map(|d| d.round() as u64);

    if let Some(secs) = duration {
        if secs > max_duration {
            warn!("⏱️ '{}' excede la duración máxima ({}s)", info.title, secs);
            return Err(MusicError::TooLong {
                duration: secs,
                max: max_duration,
            });
        }
    }

    if info.is_live.unwrap_or(false) {
        debug!("📡 Transmisión en vivo: {}", info.title);
    }

    let url = info.webpage_url.unwrap_or_else(|| target.to_string());
    let mut track = Track::new(query, info.title, url, requester);

    if let Some(secs) = duration {
        track = track.with_duration(Duration::from_secs(secs));
    }
    if let Some(uploader) = info.uploader {
        track = track.with_uploader(uploader);
    }
    if let Some(thumbnail) = info.thumbnail {
        track = track.with_thumbnail(thumbnail);
    }
    if let Some(stream_url) = info.url.filter(|u| is_url(u)) {
        track = track.with_stream(AudioStream::Url(stream_url));
    }

    Ok(track)
}

fn to_resolution_error(error: anyhow::Error) -> MusicError {
    MusicError::Resolution(classify_error(&format!("{:#}", error)))
}

/// Traduce los errores conocidos de yt-dlp a mensajes para el usuario.
fn classify_error(stderr: &str) -> String {
    if stderr.contains("Video unavailable") {
        "el video no está disponible".to_string()
    } else if stderr.contains("Private video") {
        "el video es privado".to_string()
    } else if stderr.to_lowercase().contains("age-restricted") {
        "el video tiene restricción de edad".to_string()
    } else {
        let first = stderr.lines().next().unwrap_or(stderr).trim();
        let message = match ERROR_PREFIX.as_ref() {
            Some(prefix) => prefix.replace(first, "").into_owned(),
            None => first.to_string(),
        };
        message.chars().take(200).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn info(json: &str) -> YtDlpInfo {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn free_text_becomes_search() {
        assert_eq!(search_target("lofi beats"), "ytsearch1:lofi beats");
        assert_eq!(
            search_target("https://youtu.be/dQw4w9WgXcQ"),
            "https://youtu.be/dQw4w9WgXcQ"
        );
    }

    #[test]
    fn known_errors_are_translated() {
        assert_eq!(
            classify_error("ERROR: [youtube] abc: Video unavailable"),
            "el video no está disponible"
        );
        assert_eq!(classify_error("ERROR: Private video. Sign in"), "el video es privado");
        assert_eq!(
            classify_error("Sign in to confirm your age. This video may be Age-Restricted"),
            "el video tiene restricción de edad"
        );
        assert_eq!(classify_error("HTTP Error 429\nmas detalles"), "HTTP Error 429");
        assert_eq!(
            classify_error("ERROR: [youtube] dQw4w9WgXcQ: Requested format is not available"),
            "Requested format is not available"
        );
    }

    #[test]
    fn flat_entries_become_watch_urls() {
        let by_url = FlatEntry {
            id: Some("abc".into()),
            url: Some("https://www.youtube.com/watch?v=abc".into()),
        };
        let by_id = FlatEntry {
            id: Some("xyz".into()),
            url: Some("xyz".into()),
        };
        let empty = FlatEntry { id: None, url: None };

        assert_eq!(entry_url(by_url).as_deref(), Some("https://www.youtube.com/watch?v=abc"));
        assert_eq!(entry_url(by_id).as_deref(), Some("https://www.youtube.com/watch?v=xyz"));
        assert_eq!(entry_url(empty), None);
    }

    #[test]
    fn dump_json_maps_to_resolved_track() {
        let json = r#"{
            "title": "Canción",
            "duration": 212.4,
            "uploader": "Artista",
            "webpage_url": "https://www.youtube.com/watch?v=abc",
            "url": "https://rr1.googlevideo.com/videoplayback?x=1"
        }"#;

        let track = info_to_track(info(json), "cancion", "ytsearch1:cancion", UserId::new(3), 7200).unwrap();

        assert_eq!(track.title, "Canción");
        assert_eq!(track.query, "cancion");
        assert_eq!(track.duration_secs(), 212);
        assert_eq!(track.url, "https://www.youtube.com/watch?v=abc");
        assert_eq!(track.uploader.as_deref(), Some("Artista"));
        assert!(track.is_resolved());
    }

    #[test]
    fn overlong_tracks_are_rejected() {
        let json = r#"{"title": "Mix de 3 horas", "duration": 10800}"#;
        let err = info_to_track(info(json), "mix", "ytsearch1:mix", UserId::new(3), 7200).unwrap_err();
        assert_eq!(err, MusicError::TooLong { duration: 10800, max: 7200 });
    }

    #[test]
    fn missing_webpage_url_falls_back_to_target() {
        let json = r#"{"title": "Sin url", "duration": null}"#;
        let track = info_to_track(info(json), "q", "https://example.com/v", UserId::new(3), 7200).unwrap();
        assert_eq!(track.url, "https://example.com/v");
        assert_eq!(track.duration, None);
        assert!(!track.is_resolved());
    }
}
