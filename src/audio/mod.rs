//! # Audio Module
//!
//! Motor de reproducción por guild, resistente a un transporte de voz poco confiable.
//!
//! ## Architecture
//!
//! ### [`player`] - Audio Player
//! - Registro de contextos por guild; se crean con el primer `play`
//! - Se destruyen con `disconnect` o tras el timeout de inactividad
//!
//! ### [`guild`] - Guild Player
//! - Orquesta cola, sesión de voz y resolver bajo un único lock por guild
//! - Procesa los eventos del transporte una sola vez (IDs de conexión y de salida)
//! - Timer de inactividad e ingesta de playlists en segundo plano
//!
//! ### [`session`] - Voice Session
//! - Máquina de estados de la conexión con backoff exponencial
//!
//! ### [`queue`] - Queue Management
//! - Cola acotada con repeat, shuffle, historial y paginación
//!
//! ### [`transport`] / [`songbird_transport`]
//! - Contrato con la capa de voz y su implementación sobre songbird
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use harmonia::audio::player::AudioPlayer;
//!
//! let player = AudioPlayer::new(resolver, transport, config.engine_settings());
//! let mut notices = player.subscribe();
//!
//! player.play(guild_id, user_id, channel_id, "never gonna give you up").await?;
//! player.pause(guild_id).await?;
//! player.resume(guild_id).await?;
//! player.skip(guild_id).await?;
//! ```

pub mod guild;
pub mod player;
pub mod queue;
pub mod session;
pub mod songbird_transport;
pub mod track;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use guild::{NowPlayingView, PlayOutcome, PlayerNotice, PlayerStatus, QueueView};
pub use player::AudioPlayer;
