//! Transporte de voz en memoria para los tests del motor y de la sesión.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::Instant;

use super::{
    track::AudioStream,
    transport::{
        ConnectionId, OutputHandle, PlaybackId, VoiceConnection, VoiceEvent, VoiceEventSender,
        VoiceTransport,
    },
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConnectOutcome {
    Succeed,
    Fail,
    /// Nunca responde; sirve para probar el timeout.
    Hang,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Played {
    pub playback: PlaybackId,
    pub stream: AudioStream,
    pub volume: f32,
}

struct State {
    script: VecDeque<ConnectOutcome>,
    default_outcome: ConnectOutcome,
    attempts: Vec<Instant>,
    events: Option<VoiceEventSender>,
    current: Option<(ConnectionId, Arc<AtomicBool>)>,
    played: Vec<Played>,
    stopped: Vec<PlaybackId>,
    closed: Vec<ConnectionId>,
    volumes: Vec<(PlaybackId, f32)>,
    seeks: Vec<(PlaybackId, Duration)>,
}

#[derive(Clone)]
pub struct FakeTransport {
    state: Arc<Mutex<State>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                script: VecDeque::new(),
                default_outcome: ConnectOutcome::Succeed,
                attempts: Vec::new(),
                events: None,
                current: None,
                played: Vec::new(),
                stopped: Vec::new(),
                closed: Vec::new(),
                volumes: Vec::new(),
                seeks: Vec::new(),
            })),
        }
    }

    pub fn script(&self, outcomes: impl IntoIterator<Item = ConnectOutcome>) {
        self.state.lock().script.extend(outcomes);
    }

    pub fn set_default(&self, outcome: ConnectOutcome) {
        self.state.lock().default_outcome = outcome;
    }

    pub fn attempts(&self) -> Vec<Instant> {
        self.state.lock().attempts.clone()
    }

    pub fn played(&self) -> Vec<Played> {
        self.state.lock().played.clone()
    }

    pub fn last_playback(&self) -> Option<PlaybackId> {
        self.state.lock().played.last().map(|p| p.playback)
    }

    pub fn stopped(&self) -> Vec<PlaybackId> {
        self.state.lock().stopped.clone()
    }

    pub fn closed(&self) -> Vec<ConnectionId> {
        self.state.lock().closed.clone()
    }

    pub fn volumes(&self) -> Vec<(PlaybackId, f32)> {
        self.state.lock().volumes.clone()
    }

    pub fn seeks(&self) -> Vec<(PlaybackId, Duration)> {
        self.state.lock().seeks.clone()
    }

    pub fn current_connection(&self) -> Option<ConnectionId> {
        self.state.lock().current.as_ref().map(|(id, _)| *id)
    }

    /// Marca la conexión actual como muerta sin avisar (handle zombie).
    pub fn kill_current(&self) {
        if let Some((_, live)) = &self.state.lock().current {
            live.store(false, Ordering::SeqCst);
        }
    }

    /// Simula el fin natural de una salida.
    pub fn finish(&self, playback: PlaybackId) {
        self.send(VoiceEvent::TrackEnded { playback, error: None });
    }

    pub fn fail_output(&self, playback: PlaybackId, error: &str) {
        self.send(VoiceEvent::TrackEnded {
            playback,
            error: Some(error.to_string()),
        });
    }

    /// Simula un cierre forzado de la conexión actual.
    pub fn force_close(&self) {
        let id = {
            let state = self.state.lock();
            let Some((id, live)) = &state.current else { return };
            live.store(false, Ordering::SeqCst);
            *id
        };
        self.send(VoiceEvent::ConnectionLost { connection: id });
    }

    fn send(&self, event: VoiceEvent) {
        if let Some(events) = &self.state.lock().events {
            let _ = events.send(event);
        }
    }
}

#[async_trait]
impl VoiceTransport for FakeTransport {
    async fn connect(
        &self,
        _guild_id: GuildId,
        channel_id: ChannelId,
        connection: ConnectionId,
        events: VoiceEventSender,
    ) -> Result<Box<dyn VoiceConnection>> {
        let outcome = {
            let mut state = self.state.lock();
            state.attempts.push(Instant::now());
            let default = state.default_outcome;
            state.script.pop_front().unwrap_or(default)
        };

        match outcome {
            ConnectOutcome::Succeed => {
                let live = Arc::new(AtomicBool::new(true));
                let mut state = self.state.lock();
                state.events = Some(events.clone());
                state.current = Some((connection, live.clone()));
                Ok(Box::new(FakeConnection {
                    id: connection,
                    channel_id,
                    live,
                    events,
                    state: self.state.clone(),
                }))
            }
            ConnectOutcome::Fail => anyhow::bail!("handshake rechazado"),
            ConnectOutcome::Hang => {
                futures::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

struct FakeConnection {
    id: ConnectionId,
    channel_id: ChannelId,
    live: Arc<AtomicBool>,
    events: VoiceEventSender,
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl VoiceConnection for FakeConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    async fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    async fn send_audio(
        &self,
        stream: AudioStream,
        volume: f32,
        playback: PlaybackId,
    ) -> Result<Box<dyn OutputHandle>> {
        self.state.lock().played.push(Played {
            playback,
            stream,
            volume,
        });
        Ok(Box::new(FakeOutput {
            playback,
            events: self.events.clone(),
            state: self.state.clone(),
        }))
    }

    async fn close(&self) {
        self.live.store(false, Ordering::SeqCst);
        let mut state = self.state.lock();
        if !state.closed.contains(&self.id) {
            state.closed.push(self.id);
        }
    }
}

struct FakeOutput {
    playback: PlaybackId,
    events: VoiceEventSender,
    state: Arc<Mutex<State>>,
}

impl OutputHandle for FakeOutput {
    fn pause(&self) -> Result<()> {
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        Ok(())
    }

    /// Como songbird: detener una salida también dispara su evento de fin.
    fn stop(&self) -> Result<()> {
        self.state.lock().stopped.push(self.playback);
        let _ = self.events.send(VoiceEvent::TrackEnded {
            playback: self.playback,
            error: None,
        });
        Ok(())
    }

    fn set_volume(&self, volume: f32) -> Result<()> {
        self.state.lock().volumes.push((self.playback, volume));
        Ok(())
    }

    fn seek(&self, position: Duration) -> Result<()> {
        self.state.lock().seeks.push((self.playback, position));
        Ok(())
    }
}
