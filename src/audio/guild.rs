//! Motor de reproducción de un guild.
//!
//! Compone la cola, la sesión de voz y el resolver. Todo lo que muta el estado del guild
//! pasa por un único `tokio::sync::Mutex`, así que comandos y eventos del transporte se
//! serializan. Un paso de reproducción (abrir stream, conectar, backoff) corre con el lock
//! tomado y con un `CancellationToken` que skip/stop/disconnect cancelan antes de pedir el lock.

use dashmap::DashMap;
use futures::StreamExt;
use serenity::model::id::{ChannelId, GuildId};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Weak,
    },
    time::Duration,
};
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    queue::{QueuePage, TrackQueue},
    session::{SessionState, VoiceSession},
    track::Track,
    transport::{OutputHandle, PlaybackId, VoiceEvent, VoiceEventReceiver, VoiceTransport},
};
use crate::{
    config::EngineSettings,
    error::{MusicError, MusicResult},
    sources::{PlaylistStream, TrackResolver},
};

/// Canciones por página en `queue_view`.
pub const QUEUE_PAGE_SIZE: usize = 10;
/// Cada cuántas canciones agregadas se reporta el progreso de una playlist.
const PLAYLIST_PROGRESS_EVERY: usize = 5;

pub(crate) type Registry = DashMap<GuildId, Arc<GuildPlayer>>;

/// Avisos asíncronos para el front end.
#[derive(Debug, Clone)]
pub enum PlayerNotice {
    NowPlaying { guild_id: GuildId, track: Track },
    TrackFailed { guild_id: GuildId, title: String, reason: String },
    ConnectionLost { guild_id: GuildId },
    Reconnected { guild_id: GuildId },
    ConnectionFailed { guild_id: GuildId, reason: String },
    IdleDisconnect { guild_id: GuildId },
    PlaylistProgress { guild_id: GuildId, added: usize },
    PlaylistFinished { guild_id: GuildId, added: usize, failed: usize },
}

impl PlayerNotice {
    pub fn guild_id(&self) -> GuildId {
        match self {
            PlayerNotice::NowPlaying { guild_id, .. }
            | PlayerNotice::TrackFailed { guild_id, .. }
            | PlayerNotice::ConnectionLost { guild_id }
            | PlayerNotice::Reconnected { guild_id }
            | PlayerNotice::ConnectionFailed { guild_id, .. }
            | PlayerNotice::IdleDisconnect { guild_id }
            | PlayerNotice::PlaylistProgress { guild_id, .. }
            | PlayerNotice::PlaylistFinished { guild_id, .. } => *guild_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlayOutcome {
    Started(Track),
    Queued { track: Track, position: usize },
    /// Primera canción de una playlist; el resto se agrega en segundo plano.
    Playlist { first: Track, started: bool },
}

/// Resultado de una operación sobre un contexto que pudo cerrarse mientras esperábamos el lock.
#[derive(Debug)]
pub(crate) enum Attempt<T> {
    Done(T),
    Closed,
}

#[derive(Debug, Clone)]
pub struct NowPlayingView {
    pub track: Track,
    pub elapsed: Duration,
    pub paused: bool,
    pub volume: u8,
    pub repeat: bool,
}

#[derive(Debug, Clone)]
pub struct QueueView {
    pub page: QueuePage,
    pub now_playing: Option<Track>,
    pub repeat: bool,
}

#[derive(Debug, Clone)]
pub struct PlayerStatus {
    pub guild_id: GuildId,
    pub session: SessionState,
    pub channel_id: Option<ChannelId>,
    pub retry_count: u32,
    pub now_playing: Option<String>,
    pub paused: bool,
    pub repeat: bool,
    pub volume: u8,
    pub queue_len: usize,
    pub max_queue_size: usize,
    pub idle_for: Duration,
}

struct NowPlaying {
    id: PlaybackId,
    track: Track,
    output: Box<dyn OutputHandle>,
    started_at: Instant,
    /// Desde dónde empezó a sonar esta salida
    offset: Duration,
    paused_at: Option<Instant>,
    paused_total: Duration,
}

impl NowPlaying {
    /// Posición actual dentro de la canción, sin contar el tiempo en pausa.
    fn position(&self) -> Duration {
        let paused = self.paused_total + self.paused_at.map(|at| at.elapsed()).unwrap_or_default();
        self.offset + self.started_at.elapsed().saturating_sub(paused)
    }
}

struct GuildState {
    queue: TrackQueue,
    session: VoiceSession,
    current: Option<NowPlaying>,
    /// Track sacado de la cola que todavía no suena (resolviendo, conectando o retenido
    /// por un cierre forzado).
    preparing: Option<Track>,
    volume: u8,
    paused: bool,
    next_playback: u64,
    idle_timer: Option<CancellationToken>,
    closed: bool,
}

pub struct GuildPlayer {
    guild_id: GuildId,
    me: Weak<GuildPlayer>,
    state: Mutex<GuildState>,
    step: parking_lot::Mutex<CancellationToken>,
    /// Comandos que cancelaron el paso en curso y todavía esperan el lock
    interrupts: AtomicUsize,
    ingest: parking_lot::Mutex<CancellationToken>,
    lifetime: CancellationToken,
    resolver: Arc<dyn TrackResolver>,
    settings: EngineSettings,
    notices: broadcast::Sender<PlayerNotice>,
    registry: Weak<Registry>,
}

impl GuildPlayer {
    pub(crate) fn new(
        guild_id: GuildId,
        resolver: Arc<dyn TrackResolver>,
        transport: Arc<dyn VoiceTransport>,
        settings: EngineSettings,
        notices: broadcast::Sender<PlayerNotice>,
        registry: Weak<Registry>,
    ) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let lifetime = CancellationToken::new();

        let player = Arc::new_cyclic(|me| Self {
            guild_id,
            me: me.clone(),
            state: Mutex::new(GuildState {
                queue: TrackQueue::new(settings.max_queue_size),
                session: VoiceSession::new(guild_id, settings.voice, transport, events_tx),
                current: None,
                preparing: None,
                volume: settings.default_volume.min(100),
                paused: false,
                next_playback: 1,
                idle_timer: None,
                closed: false,
            }),
            step: parking_lot::Mutex::new(CancellationToken::new()),
            interrupts: AtomicUsize::new(0),
            ingest: parking_lot::Mutex::new(lifetime.child_token()),
            lifetime: lifetime.clone(),
            resolver,
            settings,
            notices,
            registry,
        });

        tokio::spawn(pump_events(Arc::downgrade(&player), events_rx, lifetime));
        debug!("🆕 Contexto de reproducción creado para guild {}", guild_id);
        player
    }

    /// Agrega un track ya resuelto. Si no suena nada, empieza a reproducir de inmediato.
    pub(crate) async fn enqueue(
        &self,
        track: &Track,
        channel_id: ChannelId,
    ) -> MusicResult<Attempt<PlayOutcome>> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Ok(Attempt::Closed);
        }

        // El timer de inactividad se cancela recién cuando algo empieza a sonar
        state.session.set_channel(channel_id);

        if state.current.is_some() {
            let position = state.queue.add(track.clone())?;
            return Ok(Attempt::Done(PlayOutcome::Queued {
                track: track.replay(),
                position,
            }));
        }

        let cancel = self.begin_step();

        // Quedó algo pendiente (conexión fallida, paso cancelado): respetar el orden.
        if state.preparing.is_some() || !state.queue.is_empty() {
            let position = state.queue.add(track.clone())?;
            self.play_next(&mut state, &cancel).await?;
            return Ok(Attempt::Done(self.outcome_for(&state, track, position)));
        }

        match self.start(&mut state, &cancel, track.clone()).await {
            Ok(()) => Ok(Attempt::Done(PlayOutcome::Started(track.replay()))),
            Err(e) => {
                if e != MusicError::Cancelled {
                    self.arm_idle_timer(&mut state);
                }
                Err(e)
            }
        }
    }

    fn outcome_for(&self, state: &GuildState, track: &Track, position: usize) -> PlayOutcome {
        match &state.current {
            Some(np) if np.track == *track => PlayOutcome::Started(track.replay()),
            _ => PlayOutcome::Queued {
                track: track.replay(),
                position: state
                    .queue
                    .iter()
                    .position(|queued| queued == track)
                    .map(|index| index + 1)
                    .unwrap_or(position),
            },
        }
    }

    /// Agrega en segundo plano el resto de una playlist. `stop` y el teardown la cancelan.
    pub(crate) fn spawn_ingestion(&self, mut stream: PlaylistStream, channel_id: ChannelId, failed_before: usize) {
        let Some(player) = self.me.upgrade() else { return };
        let token = self.ingest.lock().clone();

        tokio::spawn(async move {
            let guild_id = player.guild_id;
            let mut added = 1;
            let mut failed = failed_before;

            loop {
                let item = tokio::select! {
                    item = stream.next() => item,
                    _ = token.cancelled() => {
                        debug!("⏹️ Ingesta de playlist cancelada en guild {}", guild_id);
                        break;
                    }
                };

                let track = match item {
                    Some(Ok(track)) => track,
                    Some(Err(e)) => {
                        debug!("⚠️ Item de playlist omitido en guild {}: {}", guild_id, e);
                        failed += 1;
                        continue;
                    }
                    None => break,
                };

                match player.enqueue(&track, channel_id).await {
                    Ok(Attempt::Done(_)) => {
                        added += 1;
                        if added % PLAYLIST_PROGRESS_EVERY == 0 {
                            player.notify(PlayerNotice::PlaylistProgress { guild_id, added });
                        }
                    }
                    Ok(Attempt::Closed) => break,
                    Err(e) if e.is_track_local() => failed += 1,
                    Err(e) => {
                        warn!("🛑 Ingesta de playlist detenida en guild {}: {}", guild_id, e);
                        break;
                    }
                }
            }

            info!(
                "📋 Playlist procesada en guild {}: {} agregadas, {} fallidas",
                guild_id, added, failed
            );
            player.notify(PlayerNotice::PlaylistFinished {
                guild_id,
                added,
                failed,
            });
        });
    }

    pub async fn skip(&self) -> MusicResult<Track> {
        let interrupt = self.interrupt();
        let mut state = self.state.lock().await;
        drop(interrupt);

        let skipped = if let Some(np) = state.current.take() {
            if let Err(e) = np.output.stop() {
                debug!("Error deteniendo salida en guild {}: {:#}", self.guild_id, e);
            }
            np.track
        } else if let Some(track) = state.preparing.take() {
            track
        } else {
            return Err(MusicError::NothingPlaying);
        };

        info!("⏭️ Saltada en guild {}: {}", self.guild_id, skipped.title);
        state.queue.set_repeat(false);
        state.paused = false;

        let cancel = self.begin_step();
        if let Err(e) = self.play_next(&mut state, &cancel).await {
            self.report_step_error(e);
        }

        Ok(skipped)
    }

    /// Detiene la reproducción y vacía la cola. Devuelve cuántas canciones se descartaron.
    pub async fn stop(&self) -> MusicResult<usize> {
        let interrupt = self.interrupt();
        self.restart_ingestion();
        let mut state = self.state.lock().await;
        drop(interrupt);

        let was_active = state.current.is_some() || state.preparing.is_some();
        let cleared = state.queue.clear();
        state.queue.set_repeat(false);
        state.preparing = None;
        state.paused = false;

        if let Some(np) = state.current.take() {
            if let Err(e) = np.output.stop() {
                debug!("Error deteniendo salida en guild {}: {:#}", self.guild_id, e);
            }
        }

        if !was_active && cleared == 0 {
            return Err(MusicError::NothingPlaying);
        }

        info!("⏹️ Reproducción detenida en guild {} ({} en cola descartadas)", self.guild_id, cleared);
        self.arm_idle_timer(&mut state);
        Ok(cleared)
    }

    pub async fn pause(&self) -> MusicResult<()> {
        let mut state = self.state.lock().await;
        let np = state.current.as_mut().ok_or(MusicError::NothingPlaying)?;
        np.output.pause().map_err(MusicError::internal)?;
        np.paused_at.get_or_insert_with(Instant::now);
        state.paused = true;
        info!("⏸️ Pausado en guild {}", self.guild_id);
        Ok(())
    }

    pub async fn resume(&self) -> MusicResult<()> {
        let mut state = self.state.lock().await;
        let np = state.current.as_mut().ok_or(MusicError::NothingPlaying)?;
        np.output.resume().map_err(MusicError::internal)?;
        if let Some(at) = np.paused_at.take() {
            np.paused_total += at.elapsed();
        }
        state.paused = false;
        state.session.touch();
        info!("▶️ Reanudado en guild {}", self.guild_id);
        Ok(())
    }

    pub async fn set_volume(&self, volume: u32) -> MusicResult<()> {
        if volume > 100 {
            return Err(MusicError::InvalidVolume(volume));
        }

        let mut state = self.state.lock().await;
        state.volume = volume as u8;
        if let Some(np) = &state.current {
            np.output
                .set_volume(volume as f32 / 100.0)
                .map_err(MusicError::internal)?;
        }

        info!("🔊 Volumen en guild {}: {}%", self.guild_id, volume);
        Ok(())
    }

    pub async fn queue_view(&self, page: usize) -> QueueView {
        let state = self.state.lock().await;
        QueueView {
            page: state.queue.page(page, QUEUE_PAGE_SIZE),
            now_playing: state.current.as_ref().map(|np| np.track.replay()),
            repeat: state.queue.is_repeat(),
        }
    }

    pub async fn remove(&self, position: usize) -> MusicResult<Track> {
        self.state.lock().await.queue.remove(position)
    }

    pub async fn move_track(&self, from: usize, to: usize) -> MusicResult<()> {
        self.state.lock().await.queue.move_track(from, to)
    }

    pub async fn shuffle(&self) -> usize {
        let mut state = self.state.lock().await;
        state.queue.shuffle();
        state.queue.len()
    }

    pub async fn toggle_repeat(&self) -> bool {
        self.state.lock().await.queue.toggle_repeat()
    }

    pub async fn clear(&self) -> usize {
        self.state.lock().await.queue.clear()
    }

    pub async fn now_playing(&self) -> Option<NowPlayingView> {
        let state = self.state.lock().await;
        state.current.as_ref().map(|np| NowPlayingView {
            track: np.track.replay(),
            elapsed: np.position(),
            paused: state.paused,
            volume: state.volume,
            repeat: state.queue.is_repeat(),
        })
    }

    pub async fn status(&self) -> PlayerStatus {
        let state = self.state.lock().await;
        PlayerStatus {
            guild_id: self.guild_id,
            session: state.session.state(),
            channel_id: state.session.channel_id(),
            retry_count: state.session.retry_count(),
            now_playing: state.current.as_ref().map(|np| np.track.title.clone()),
            paused: state.paused,
            repeat: state.queue.is_repeat(),
            volume: state.volume,
            queue_len: state.queue.len(),
            max_queue_size: state.queue.max_size(),
            idle_for: state.session.idle_for(),
        }
    }

    /// Desconexión explícita: libera el handle aunque haya un backoff en curso y destruye el contexto.
    pub async fn disconnect(&self) -> MusicResult<()> {
        let interrupt = self.interrupt();
        let mut state = self.state.lock().await;
        drop(interrupt);
        if state.closed {
            return Err(MusicError::NotConnected);
        }

        let was_connected = state.session.state() != SessionState::Disconnected;
        self.teardown(&mut state).await;

        if was_connected {
            Ok(())
        } else {
            Err(MusicError::NotConnected)
        }
    }

    /// Descarta la conexión actual y conecta de nuevo, retomando lo que estaba sonando.
    pub(crate) async fn reconnect(&self, channel_id: ChannelId) -> MusicResult<Attempt<()>> {
        let interrupt = self.interrupt();
        let mut state = self.state.lock().await;
        drop(interrupt);
        if state.closed {
            return Ok(Attempt::Closed);
        }

        self.cancel_idle_timer(&mut state);
        self.hold_current(&mut state);
        state.session.disconnect().await;
        state.session.set_channel(channel_id);

        let cancel = self.begin_step();
        if let Err(e) = state.session.ensure_connection(&cancel).await {
            self.release_held(&mut state);
            self.arm_idle_timer(&mut state);
            return Err(e);
        }

        info!("🔄 Reconexión manual completada en guild {}", self.guild_id);
        self.play_next(&mut state, &cancel).await?;
        Ok(Attempt::Done(()))
    }

    /// Cierre ordenado al apagar el proceso.
    pub(crate) async fn shutdown(&self) {
        let interrupt = self.interrupt();
        let mut state = self.state.lock().await;
        drop(interrupt);
        if !state.closed {
            self.teardown(&mut state).await;
        }
    }

    async fn handle_event(&self, event: VoiceEvent) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }

        match event {
            VoiceEvent::TrackEnded { playback, error } => {
                let finished = match state.current.take() {
                    Some(np) if np.id == playback => np,
                    other => {
                        state.current = other;
                        debug!("Ignorando fin de {} en guild {}", playback, self.guild_id);
                        return;
                    }
                };
                state.paused = false;

                match error {
                    Some(reason) => {
                        warn!(
                            "❌ Error reproduciendo '{}' en guild {}: {}",
                            finished.track.title, self.guild_id, reason
                        );
                        // Un track roto con repeat se repetiría para siempre
                        state.queue.set_repeat(false);
                        self.notify(PlayerNotice::TrackFailed {
                            guild_id: self.guild_id,
                            title: finished.track.title.clone(),
                            reason,
                        });
                    }
                    None if state.queue.is_repeat() => {
                        // Retenido fuera de la cola: repetir no ocupa lugar
                        debug!("🔂 Repitiendo en guild {}: {}", self.guild_id, finished.track.title);
                        state.preparing = Some(finished.track.replay());
                    }
                    None => {
                        debug!("✅ Terminó en guild {}: {}", self.guild_id, finished.track.title);
                    }
                }

                let cancel = self.begin_step();
                if let Err(e) = self.play_next(&mut state, &cancel).await {
                    self.report_step_error(e);
                }
            }
            VoiceEvent::ConnectionLost { connection } => {
                if !state.session.connection_lost(connection).await {
                    return;
                }

                self.notify(PlayerNotice::ConnectionLost {
                    guild_id: self.guild_id,
                });
                self.hold_current(&mut state);

                let cancel = self.begin_step();
                match state.session.ensure_connection(&cancel).await {
                    Ok(()) => {
                        info!("✅ Reconectado en guild {}", self.guild_id);
                        self.notify(PlayerNotice::Reconnected {
                            guild_id: self.guild_id,
                        });
                        if let Err(e) = self.play_next(&mut state, &cancel).await {
                            self.report_step_error(e);
                        }
                    }
                    Err(MusicError::Cancelled) => {}
                    Err(e) => {
                        self.release_held(&mut state);
                        self.arm_idle_timer(&mut state);
                        self.report_step_error(e);
                    }
                }
            }
        }
    }

    /// Avanza la cola hasta que algo suene, no quede nada o la conexión falle.
    async fn play_next(&self, state: &mut GuildState, cancel: &CancellationToken) -> MusicResult<()> {
        loop {
            let next = match state.preparing.take() {
                Some(track) => Some(track),
                None => state.queue.pop_next(),
            };

            let Some(track) = next else {
                debug!("📭 Cola vacía en guild {}", self.guild_id);
                self.arm_idle_timer(state);
                return Ok(());
            };

            let title = track.title.clone();
            match self.start(state, cancel, track).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_track_local() => {
                    warn!("⚠️ Saltando '{}' en guild {}: {}", title, self.guild_id, e);
                    self.notify(PlayerNotice::TrackFailed {
                        guild_id: self.guild_id,
                        title,
                        reason: e.to_string(),
                    });
                }
                Err(MusicError::Cancelled) => return Err(MusicError::Cancelled),
                Err(e) => {
                    self.arm_idle_timer(state);
                    return Err(e);
                }
            }
        }
    }

    /// Intenta reproducir un track. Mientras no suena queda en `preparing`; si la conexión
    /// falla vuelve al frente de la cola.
    async fn start(&self, state: &mut GuildState, cancel: &CancellationToken, mut track: Track) -> MusicResult<()> {
        state.preparing = Some(track.without_stream());

        let stream = match track.take_stream() {
            Some(stream) => stream,
            None => {
                let opened = tokio::select! {
                    opened = self.resolver.open_stream(&track) => opened,
                    _ = cancel.cancelled() => return Err(MusicError::Cancelled),
                };

                match opened {
                    Ok(stream) => stream,
                    Err(e) => {
                        state.preparing = None;
                        return Err(if e.is_track_local() { e } else { MusicError::resolution(e) });
                    }
                }
            }
        };

        match state.session.ensure_connection(cancel).await {
            Ok(()) => {}
            Err(MusicError::Cancelled) => return Err(MusicError::Cancelled),
            Err(e) => {
                self.release_held(state);
                return Err(e);
            }
        }

        let playback = PlaybackId(state.next_playback);
        state.next_playback += 1;
        let volume = f32::from(state.volume) / 100.0;

        debug!("🎧 Enviando {} a la conexión ({})", stream.describe(), playback);
        let output = match state.session.play(stream, volume, playback).await {
            Ok(output) => output,
            Err(e) => {
                state.preparing = None;
                return Err(e);
            }
        };

        let mut offset = track.take_resume_at().unwrap_or_default();
        if !offset.is_zero() {
            match output.seek(offset) {
                Ok(()) => info!("⏩ Retomando '{}' desde {:?}", track.title, offset),
                Err(e) => {
                    debug!("No se pudo retomar '{}' en guild {}: {:#}", track.title, self.guild_id, e);
                    offset = Duration::ZERO;
                }
            }
        }

        info!("🎵 Reproduciendo en guild {}: {}", self.guild_id, track.title);
        state.preparing = None;
        state.paused = false;
        self.cancel_idle_timer(state);
        self.notify(PlayerNotice::NowPlaying {
            guild_id: self.guild_id,
            track: track.replay(),
        });
        state.current = Some(NowPlaying {
            id: playback,
            track,
            output,
            started_at: Instant::now(),
            offset,
            paused_at: None,
            paused_total: Duration::ZERO,
        });

        Ok(())
    }

    /// Detiene la salida actual y retiene su track para volver a reproducirlo.
    fn hold_current(&self, state: &mut GuildState) {
        if let Some(np) = state.current.take() {
            if let Err(e) = np.output.stop() {
                debug!("Error deteniendo salida en guild {}: {:#}", self.guild_id, e);
            }
            let position = np.position();
            debug!("✋ Retenido en guild {} en {:?}: {}", self.guild_id, position, np.track.title);
            state.preparing = Some(np.track.replay().resuming_at(position));
        }
        state.paused = false;
    }

    /// Devuelve el track retenido al frente de la cola. Con la cola llena queda retenido
    /// y se retoma igual antes que el resto.
    fn release_held(&self, state: &mut GuildState) {
        if state.queue.is_full() {
            return;
        }
        if let Some(held) = state.preparing.take() {
            if let Err(e) = state.queue.push_front(held) {
                warn!("No se pudo devolver el track a la cola en guild {}: {}", self.guild_id, e);
            }
        }
    }

    fn report_step_error(&self, error: MusicError) {
        match error {
            MusicError::Cancelled => debug!("⏹️ Paso cancelado en guild {}", self.guild_id),
            error => {
                error!("❌ Reproducción detenida en guild {}: {}", self.guild_id, error);
                self.notify(PlayerNotice::ConnectionFailed {
                    guild_id: self.guild_id,
                    reason: error.to_string(),
                });
            }
        }
    }

    fn arm_idle_timer(&self, state: &mut GuildState) {
        self.cancel_idle_timer(state);

        let token = CancellationToken::new();
        state.idle_timer = Some(token.clone());

        let timeout = self.settings.voice.auto_disconnect_timeout;
        let me = self.me.clone();
        debug!("⏲️ Timer de inactividad ({:?}) armado en guild {}", timeout, self.guild_id);

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {}
                _ = token.cancelled() => return,
            }

            if let Some(player) = me.upgrade() {
                player.idle_expired(&token).await;
            }
        });
    }

    fn cancel_idle_timer(&self, state: &mut GuildState) {
        if let Some(token) = state.idle_timer.take() {
            token.cancel();
        }
    }

    async fn idle_expired(&self, token: &CancellationToken) {
        let mut state = self.state.lock().await;
        if token.is_cancelled() || state.closed || state.current.is_some() {
            return;
        }

        // Quedan canciones tras una conexión fallida: esperan un play o reconnect
        if state.preparing.is_some() || !state.queue.is_empty() {
            debug!(
                "⏲️ Guild {} inactivo con {} canciones pendientes, se conservan",
                self.guild_id,
                state.queue.len() + usize::from(state.preparing.is_some())
            );
            return;
        }

        info!(
            "⏰ Guild {} inactivo por {:?}, desconectando",
            self.guild_id, self.settings.voice.auto_disconnect_timeout
        );
        self.teardown(&mut state).await;
        self.notify(PlayerNotice::IdleDisconnect {
            guild_id: self.guild_id,
        });
    }

    async fn teardown(&self, state: &mut GuildState) {
        self.cancel_idle_timer(state);
        self.lifetime.cancel();

        if let Some(np) = state.current.take() {
            if let Err(e) = np.output.stop() {
                debug!("Error deteniendo salida en guild {}: {:#}", self.guild_id, e);
            }
        }

        state.preparing = None;
        state.queue.clear();
        state.queue.set_repeat(false);
        state.paused = false;
        state.session.disconnect().await;
        state.closed = true;

        if let Some(registry) = self.registry.upgrade() {
            registry.remove_if(&self.guild_id, |_, player| std::ptr::eq(Arc::as_ptr(player), self));
        }

        info!("🧹 Contexto de guild {} destruido", self.guild_id);
    }

    /// Token para un paso nuevo. Se llama con el lock tomado. Si hay un comando que
    /// interrumpió y sigue esperando el lock, el paso nace cancelado.
    fn begin_step(&self) -> CancellationToken {
        let mut step = self.step.lock();
        let token = CancellationToken::new();
        if self.interrupts.load(Ordering::SeqCst) > 0 {
            token.cancel();
        }
        *step = token.clone();
        token
    }

    /// Cancela el paso en curso y los que empiecen antes de que el llamador tome el lock.
    /// Hay que soltar el guard apenas se tiene el lock.
    fn interrupt(&self) -> InterruptGuard<'_> {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
        self.step.lock().cancel();
        InterruptGuard { interrupts: &self.interrupts }
    }

    fn restart_ingestion(&self) {
        let mut ingest = self.ingest.lock();
        ingest.cancel();
        *ingest = self.lifetime.child_token();
    }

    fn notify(&self, notice: PlayerNotice) {
        // Sin suscriptores no hay a quién avisar
        let _ = self.notices.send(notice);
    }
}

struct InterruptGuard<'a> {
    interrupts: &'a AtomicUsize,
}

impl Drop for InterruptGuard<'_> {
    fn drop(&mut self) {
        self.interrupts.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn pump_events(player: Weak<GuildPlayer>, mut events: VoiceEventReceiver, lifetime: CancellationToken) {
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = lifetime.cancelled() => break,
        };

        let Some(event) = event else { break };
        let Some(player) = player.upgrade() else { break };
        player.handle_event(event).await;
    }
}
