use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr, time::Duration};

/// Timeout mínimo de conexión cuando corremos dentro de un contenedor.
const CONTAINER_MIN_CONNECTION_TIMEOUT: u64 = 30;
/// Intentos mínimos de reconexión dentro de un contenedor.
const CONTAINER_MIN_RECONNECT_ATTEMPTS: u32 = 8;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub command_prefix: String,

    // Música
    pub max_queue_size: usize,
    pub max_song_duration: u64, // En segundos
    pub max_playlist_size: usize,
    pub default_volume: f32,

    // Voz
    pub voice_connection_timeout: u64,
    pub voice_reconnect_attempts: u32,
    pub voice_retry_delay: u64,
    pub voice_auto_disconnect_timeout: u64,
    pub container_mode: bool,

    // Paths
    pub download_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;

        std::fs::create_dir_all(&config.download_dir).with_context(|| {
            format!("No se pudo crear DOWNLOAD_DIR {}", config.download_dir.display())
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Construye la configuración a partir de una función de búsqueda de variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let container_mode = match lookup("CONTAINER_MODE") {
            Some(val) if !val.trim().is_empty() => parse_var("CONTAINER_MODE", &val)?,
            _ => detect_container(&lookup),
        };

        let mut config = Self {
            discord_token: lookup("DISCORD_TOKEN")
                .filter(|t| !t.trim().is_empty())
                .context("DISCORD_TOKEN no está definido")?,
            command_prefix: lookup("COMMAND_PREFIX").unwrap_or(defaults.command_prefix),

            max_queue_size: var_or(&lookup, "MAX_QUEUE_SIZE", defaults.max_queue_size)?,
            max_song_duration: var_or(&lookup, "MAX_SONG_DURATION", defaults.max_song_duration)?,
            max_playlist_size: var_or(&lookup, "MAX_PLAYLIST_SIZE", defaults.max_playlist_size)?,
            default_volume: var_or(&lookup, "DEFAULT_VOLUME", defaults.default_volume)?,

            voice_connection_timeout: var_or(
                &lookup,
                "VOICE_CONNECTION_TIMEOUT",
                defaults.voice_connection_timeout,
            )?,
            voice_reconnect_attempts: var_or(
                &lookup,
                "VOICE_RECONNECT_ATTEMPTS",
                defaults.voice_reconnect_attempts,
            )?,
            voice_retry_delay: var_or(&lookup, "VOICE_RETRY_DELAY", defaults.voice_retry_delay)?,
            voice_auto_disconnect_timeout: var_or(
                &lookup,
                "VOICE_AUTO_DISCONNECT_TIMEOUT",
                defaults.voice_auto_disconnect_timeout,
            )?,
            container_mode,

            download_dir: lookup("DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.download_dir),
        };

        if config.container_mode {
            config.widen_for_container();
        }

        Ok(config)
    }

    /// Los contenedores ven cierres forzados del transporte con más frecuencia:
    /// se amplía la tolerancia sin cambiar la máquina de estados.
    fn widen_for_container(&mut self) {
        self.voice_connection_timeout = self
            .voice_connection_timeout
            .max(CONTAINER_MIN_CONNECTION_TIMEOUT);
        self.voice_reconnect_attempts = self
            .voice_reconnect_attempts
            .max(CONTAINER_MIN_RECONNECT_ATTEMPTS);
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Volume must be between 0.0 and 1.0
    /// - Queue size, playlist size and song duration must be greater than 0
    /// - Voice timeouts must be greater than 0
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.default_volume) {
            anyhow::bail!(
                "Default volume must be between 0.0 and 1.0, got: {}",
                self.default_volume
            );
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.max_playlist_size == 0 {
            anyhow::bail!("Max playlist size must be greater than 0");
        }

        if self.max_song_duration == 0 {
            anyhow::bail!("Max song duration must be greater than 0");
        }

        if self.voice_connection_timeout == 0 {
            anyhow::bail!("Voice connection timeout must be greater than 0");
        }

        if self.voice_auto_disconnect_timeout == 0 {
            anyhow::bail!("Voice auto-disconnect timeout must be greater than 0");
        }

        if self.command_prefix.is_empty() {
            anyhow::bail!("Command prefix cannot be empty");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Excludes the Discord token.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Prefix: {}\n  \
            Music: {} queue, {} max duration, {} playlist items, {}% vol\n  \
            Voice: {} timeout, {} attempts, {} retry delay, {} idle disconnect{}\n  \
            Downloads: {}",
            self.command_prefix,
            self.max_queue_size,
            humantime::format_duration(Duration::from_secs(self.max_song_duration)),
            self.max_playlist_size,
            (self.default_volume * 100.0).round() as u32,
            humantime::format_duration(Duration::from_secs(self.voice_connection_timeout)),
            self.voice_reconnect_attempts,
            humantime::format_duration(Duration::from_secs(self.voice_retry_delay)),
            humantime::format_duration(Duration::from_secs(self.voice_auto_disconnect_timeout)),
            if self.container_mode { " (container)" } else { "" },
            self.download_dir.display(),
        )
    }

    pub fn voice_settings(&self) -> VoiceSettings {
        VoiceSettings {
            connection_timeout: Duration::from_secs(self.voice_connection_timeout),
            reconnect_attempts: self.voice_reconnect_attempts,
            retry_delay: Duration::from_secs(self.voice_retry_delay),
            auto_disconnect_timeout: Duration::from_secs(self.voice_auto_disconnect_timeout),
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            max_queue_size: self.max_queue_size,
            default_volume: (self.default_volume * 100.0).round().clamp(0.0, 100.0) as u8,
            voice: self.voice_settings(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            command_prefix: "!".to_string(),

            max_queue_size: 20,
            max_song_duration: 7200, // 2 horas
            max_playlist_size: 50,
            default_volume: 0.5,

            voice_connection_timeout: 20,
            voice_reconnect_attempts: 5,
            voice_retry_delay: 3,
            voice_auto_disconnect_timeout: 300,
            container_mode: false,

            download_dir: "./downloads".into(),
        }
    }
}

/// Parámetros de la máquina de estados de la sesión de voz.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceSettings {
    pub connection_timeout: Duration,
    pub reconnect_attempts: u32,
    pub retry_delay: Duration,
    pub auto_disconnect_timeout: Duration,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Config::default().voice_settings()
    }
}

/// Parámetros por guild del motor de reproducción.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    pub max_queue_size: usize,
    /// Volumen inicial en porcentaje (0-100)
    pub default_volume: u8,
    pub voice: VoiceSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Config::default().engine_settings()
    }
}

fn var_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(val) if !val.trim().is_empty() => parse_var(key, &val),
        _ => Ok(default),
    }
}

fn parse_var<T>(key: &str, val: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    val.trim()
        .parse()
        .with_context(|| format!("Valor inválido para {}: {:?}", key, val))
}

fn detect_container<F>(lookup: &F) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup("KUBERNETES_SERVICE_HOST").is_some() || std::path::Path::new("/.dockerenv").exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_follow_documented_values() {
        let config =
            Config::from_lookup(lookup_from(&[("DISCORD_TOKEN", "t"), ("CONTAINER_MODE", "false")]))
                .unwrap();

        assert_eq!(config.max_queue_size, 20);
        assert_eq!(config.max_song_duration, 7200);
        assert_eq!(config.voice_connection_timeout, 20);
        assert_eq!(config.voice_reconnect_attempts, 5);
        assert_eq!(config.voice_retry_delay, 3);
        assert_eq!(config.voice_auto_disconnect_timeout, 300);
        assert_eq!(config.command_prefix, "!");
        assert_eq!(config.engine_settings().default_volume, 50);
        config.validate().unwrap();
    }

    #[test]
    fn missing_token_is_rejected() {
        assert!(Config::from_lookup(lookup_from(&[])).is_err());
    }

    #[test]
    fn malformed_number_is_rejected() {
        let result = Config::from_lookup(lookup_from(&[
            ("DISCORD_TOKEN", "t"),
            ("MAX_QUEUE_SIZE", "veinte"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn container_mode_widens_retry_tolerance() {
        let config = Config::from_lookup(lookup_from(&[
            ("DISCORD_TOKEN", "t"),
            ("CONTAINER_MODE", "true"),
            ("VOICE_CONNECTION_TIMEOUT", "10"),
            ("VOICE_RECONNECT_ATTEMPTS", "3"),
        ]))
        .unwrap();

        assert_eq!(config.voice_connection_timeout, 30);
        assert_eq!(config.voice_reconnect_attempts, 8);

        // Valores ya más altos se respetan
        let config = Config::from_lookup(lookup_from(&[
            ("DISCORD_TOKEN", "t"),
            ("CONTAINER_MODE", "true"),
            ("VOICE_RECONNECT_ATTEMPTS", "12"),
        ]))
        .unwrap();
        assert_eq!(config.voice_reconnect_attempts, 12);
    }

    #[test]
    fn voice_settings_are_durations() {
        let config = Config::from_lookup(lookup_from(&[
            ("DISCORD_TOKEN", "t"),
            ("CONTAINER_MODE", "false"),
            ("VOICE_RETRY_DELAY", "2"),
        ]))
        .unwrap();
        let voice = config.voice_settings();
        assert_eq!(voice.retry_delay, Duration::from_secs(2));
        assert_eq!(voice.auto_disconnect_timeout, Duration::from_secs(300));
    }

    #[test]
    fn validate_rejects_out_of_range_volume() {
        let config = Config {
            default_volume: 1.5,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_playlist_limit() {
        let config = Config {
            discord_token: "t".into(),
            max_playlist_size: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config::from_lookup(lookup_from(&[
            ("DISCORD_TOKEN", "t"),
            ("MAX_PLAYLIST_SIZE", "0"),
        ]))
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn summary_never_contains_token() {
        let config = Config {
            discord_token: "super-secreto".into(),
            ..Config::default()
        };
        assert!(!config.summary().contains("super-secreto"));
    }
}
