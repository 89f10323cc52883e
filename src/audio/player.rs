use dashmap::DashMap;
use futures::StreamExt;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{
    guild::{
        Attempt, GuildPlayer, NowPlayingView, PlayOutcome, PlayerNotice, PlayerStatus, QueueView,
        Registry,
    },
    track::Track,
    transport::VoiceTransport,
};
use crate::{
    config::EngineSettings,
    error::{MusicError, MusicResult},
    sources::{is_playlist, TrackResolver},
};

const NOTICE_CAPACITY: usize = 128;

/// Supervisor de los contextos de reproducción, uno por guild.
///
/// Es el único estado compartido entre guilds: el mapa se consulta y se suelta de inmediato,
/// y cada contexto serializa sus propias operaciones.
pub struct AudioPlayer {
    guilds: Arc<Registry>,
    resolver: Arc<dyn TrackResolver>,
    transport: Arc<dyn VoiceTransport>,
    settings: EngineSettings,
    notices: broadcast::Sender<PlayerNotice>,
}

impl AudioPlayer {
    pub fn new(
        resolver: Arc<dyn TrackResolver>,
        transport: Arc<dyn VoiceTransport>,
        settings: EngineSettings,
    ) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            guilds: Arc::new(DashMap::new()),
            resolver,
            transport,
            settings,
            notices,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerNotice> {
        self.notices.subscribe()
    }

    pub fn active_guilds(&self) -> usize {
        self.guilds.len()
    }

    /// Reproduce o encola una búsqueda, URL o playlist.
    pub async fn play(
        &self,
        guild_id: GuildId,
        requester: UserId,
        channel_id: ChannelId,
        query: &str,
    ) -> MusicResult<PlayOutcome> {
        let query = query.trim();
        if is_playlist(query) {
            return self.play_playlist(guild_id, requester, channel_id, query).await;
        }

        // La resolución corre sin tomar el lock del guild
        let track = self.resolver.resolve(query, requester).await?;
        self.enqueue(guild_id, channel_id, &track).await
    }

    async fn play_playlist(
        &self,
        guild_id: GuildId,
        requester: UserId,
        channel_id: ChannelId,
        url: &str,
    ) -> MusicResult<PlayOutcome> {
        info!("📋 Procesando playlist en guild {}: {}", guild_id, url);
        let mut stream = self.resolver.resolve_playlist(url, requester);
        let mut failed = 0;

        // La primera canción válida se agrega ya; el resto en segundo plano
        let first = loop {
            match stream.next().await {
                Some(Ok(track)) => break track,
                Some(Err(e)) => {
                    debug!("⚠️ Item de playlist omitido: {}", e);
                    failed += 1;
                }
                None => {
                    return Err(MusicError::resolution(
                        "la playlist está vacía o no tiene canciones disponibles",
                    ))
                }
            }
        };

        loop {
            let player = self.context(guild_id);
            match player.enqueue(&first, channel_id).await? {
                Attempt::Done(outcome) => {
                    player.spawn_ingestion(stream, channel_id, failed);
                    let started = matches!(outcome, PlayOutcome::Started(_));
                    return Ok(PlayOutcome::Playlist {
                        first: first.replay(),
                        started,
                    });
                }
                Attempt::Closed => debug!("Contexto de guild {} cerrado, creando otro", guild_id),
            }
        }
    }

    async fn enqueue(&self, guild_id: GuildId, channel_id: ChannelId, track: &Track) -> MusicResult<PlayOutcome> {
        loop {
            match self.context(guild_id).enqueue(track, channel_id).await? {
                Attempt::Done(outcome) => return Ok(outcome),
                Attempt::Closed => debug!("Contexto de guild {} cerrado, creando otro", guild_id),
            }
        }
    }

    pub async fn skip(&self, guild_id: GuildId) -> MusicResult<Track> {
        self.existing(guild_id, MusicError::NothingPlaying)?.skip().await
    }

    pub async fn stop(&self, guild_id: GuildId) -> MusicResult<usize> {
        self.existing(guild_id, MusicError::NothingPlaying)?.stop().await
    }

    pub async fn pause(&self, guild_id: GuildId) -> MusicResult<()> {
        self.existing(guild_id, MusicError::NothingPlaying)?.pause().await
    }

    pub async fn resume(&self, guild_id: GuildId) -> MusicResult<()> {
        self.existing(guild_id, MusicError::NothingPlaying)?.resume().await
    }

    pub async fn set_volume(&self, guild_id: GuildId, volume: u32) -> MusicResult<()> {
        if volume > 100 {
            return Err(MusicError::InvalidVolume(volume));
        }
        self.existing(guild_id, MusicError::NotConnected)?.set_volume(volume).await
    }

    /// Página de la cola. Un guild sin contexto tiene la cola vacía.
    pub async fn queue_view(&self, guild_id: GuildId, page: usize) -> Option<QueueView> {
        let player = self.guilds.get(&guild_id).map(|entry| entry.value().clone())?;
        Some(player.queue_view(page).await)
    }

    pub async fn remove(&self, guild_id: GuildId, position: usize) -> MusicResult<Track> {
        self.existing(guild_id, MusicError::Position { position, len: 0 })?
            .remove(position)
            .await
    }

    pub async fn move_track(&self, guild_id: GuildId, from: usize, to: usize) -> MusicResult<()> {
        self.existing(guild_id, MusicError::Position { position: from, len: 0 })?
            .move_track(from, to)
            .await
    }

    pub async fn shuffle(&self, guild_id: GuildId) -> MusicResult<usize> {
        Ok(self.existing(guild_id, MusicError::NothingPlaying)?.shuffle().await)
    }

    pub async fn toggle_repeat(&self, guild_id: GuildId) -> MusicResult<bool> {
        Ok(self.existing(guild_id, MusicError::NothingPlaying)?.toggle_repeat().await)
    }

    pub async fn clear(&self, guild_id: GuildId) -> MusicResult<usize> {
        Ok(self.existing(guild_id, MusicError::NothingPlaying)?.clear().await)
    }

    pub async fn now_playing(&self, guild_id: GuildId) -> Option<NowPlayingView> {
        let player = self.guilds.get(&guild_id).map(|entry| entry.value().clone())?;
        player.now_playing().await
    }

    pub async fn disconnect(&self, guild_id: GuildId) -> MusicResult<()> {
        self.existing(guild_id, MusicError::NotConnected)?.disconnect().await
    }

    /// Fuerza una conexión nueva al canal dado.
    pub async fn reconnect(&self, guild_id: GuildId, channel_id: ChannelId) -> MusicResult<()> {
        loop {
            match self.context(guild_id).reconnect(channel_id).await? {
                Attempt::Done(()) => return Ok(()),
                Attempt::Closed => debug!("Contexto de guild {} cerrado, creando otro", guild_id),
            }
        }
    }

    pub async fn status(&self, guild_id: GuildId) -> Option<PlayerStatus> {
        let player = self.guilds.get(&guild_id).map(|entry| entry.value().clone())?;
        Some(player.status().await)
    }

    /// Desconecta todos los guilds. Se usa al apagar el bot.
    pub async fn shutdown(&self) {
        let players: Vec<Arc<GuildPlayer>> = self.guilds.iter().map(|entry| entry.value().clone()).collect();
        if players.is_empty() {
            return;
        }

        info!("🛑 Cerrando {} sesiones de voz", players.len());
        futures::future::join_all(players.iter().map(|player| player.shutdown())).await;

        if !self.guilds.is_empty() {
            warn!("Quedaron {} contextos tras el apagado", self.guilds.len());
        }
    }

    fn context(&self, guild_id: GuildId) -> Arc<GuildPlayer> {
        self.guilds
            .entry(guild_id)
            .or_insert_with(|| {
                GuildPlayer::new(
                    guild_id,
                    self.resolver.clone(),
                    self.transport.clone(),
                    self.settings,
                    self.notices.clone(),
                    Arc::downgrade(&self.guilds),
                )
            })
            .clone()
    }

    fn existing(&self, guild_id: GuildId, missing: MusicError) -> MusicResult<Arc<GuildPlayer>> {
        self.guilds
            .get(&guild_id)
            .map(|entry| entry.value().clone())
            .ok_or(missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{
            session::SessionState,
            testing::{ConnectOutcome, FakeTransport},
            track::AudioStream,
        },
        config::VoiceSettings,
        sources::MockTrackResolver,
    };
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::time::Instant;

    const USER: UserId = UserId::new(1);

    fn settings() -> EngineSettings {
        EngineSettings {
            max_queue_size: 3,
            default_volume: 50,
            voice: VoiceSettings {
                connection_timeout: Duration::from_secs(20),
                reconnect_attempts: 3,
                retry_delay: Duration::from_secs(2),
                auto_disconnect_timeout: Duration::from_secs(300),
            },
        }
    }

    fn resolver() -> MockTrackResolver {
        let mut resolver = MockTrackResolver::new();
        resolver.expect_resolve().returning(|query: &str, requester: UserId| {
            Ok(Track::new(query, query, format!("https://youtu.be/{}", query), requester)
                .with_stream(AudioStream::Url(format!("https://cdn.example.com/{}", query))))
        });
        resolver
            .expect_open_stream()
            .returning(|track: &Track| Ok(AudioStream::Url(format!("https://cdn.example.com/{}", track.title))));
        resolver.expect_resolve_playlist().returning(|_url: &str, requester: UserId| {
            let items: Vec<MusicResult<Track>> = vec![
                Err(MusicError::resolution("Private video")),
                Ok(Track::new("p1", "p1", "https://youtu.be/p1", requester)),
                Ok(Track::new("p2", "p2", "https://youtu.be/p2", requester)),
                Ok(Track::new("p3", "p3", "https://youtu.be/p3", requester)),
            ];
            futures::stream::iter(items).boxed()
        });
        resolver
    }

    fn player(transport: &FakeTransport) -> AudioPlayer {
        AudioPlayer::new(Arc::new(resolver()), Arc::new(transport.clone()), settings())
    }

    #[tokio::test(start_paused = true)]
    async fn contexts_are_created_on_first_play() {
        let transport = FakeTransport::new();
        let player = player(&transport);
        let guild = GuildId::new(1);

        assert!(player.status(guild).await.is_none());
        assert_eq!(player.skip(guild).await, Err(MusicError::NothingPlaying));

        let outcome = player.play(guild, USER, ChannelId::new(10), "a").await.unwrap();
        assert!(matches!(outcome, PlayOutcome::Started(ref t) if t.title == "a"));
        assert_eq!(player.active_guilds(), 1);
        assert_eq!(player.status(guild).await.unwrap().session, SessionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_rejects_new_tracks() {
        let transport = FakeTransport::new();
        let player = player(&transport);
        let guild = GuildId::new(1);

        for query in ["a", "b", "c", "d"] {
            player.play(guild, USER, ChannelId::new(10), query).await.unwrap();
        }

        let err = player.play(guild, USER, ChannelId::new(10), "e").await.unwrap_err();
        assert_eq!(err, MusicError::Capacity { max: 3 });
        assert_eq!(player.status(guild).await.unwrap().queue_len, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_guild_does_not_block_others() {
        let transport = FakeTransport::new();
        transport.script([ConnectOutcome::Hang]);
        let player = Arc::new(player(&transport));

        let slow = player.clone();
        tokio::spawn(async move {
            let _ = slow.play(GuildId::new(1), USER, ChannelId::new(10), "lento").await;
        });
        tokio::task::yield_now().await;

        let started = Instant::now();
        let outcome = player
            .play(GuildId::new(2), USER, ChannelId::new(20), "rapido")
            .await
            .unwrap();

        assert!(matches!(outcome, PlayOutcome::Started(_)));
        assert!(started.elapsed() < Duration::from_secs(1));
        // El guild lento sigue esperando su primer intento
        assert_eq!(transport.attempts().len(), 2);
        assert_eq!(transport.played().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn playlist_adds_first_item_then_the_rest() {
        let transport = FakeTransport::new();
        let player = player(&transport);
        let guild = GuildId::new(1);
        let mut notices = player.subscribe();

        let outcome = player
            .play(guild, USER, ChannelId::new(10), "https://www.youtube.com/playlist?list=PL1")
            .await
            .unwrap();
        assert!(matches!(outcome, PlayOutcome::Playlist { ref first, started: true } if first.title == "p1"));

        let finished = loop {
            match notices.recv().await.unwrap() {
                PlayerNotice::PlaylistFinished { added, failed, .. } => break (added, failed),
                _ => continue,
            }
        };
        assert_eq!(finished, (3, 1));
        assert_eq!(player.status(guild).await.unwrap().queue_len, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_removes_context_and_play_recreates_it() {
        let transport = FakeTransport::new();
        let player = player(&transport);
        let guild = GuildId::new(1);

        player.play(guild, USER, ChannelId::new(10), "a").await.unwrap();
        player.disconnect(guild).await.unwrap();
        assert_eq!(player.active_guilds(), 0);
        assert_eq!(player.disconnect(guild).await, Err(MusicError::NotConnected));

        player.play(guild, USER, ChannelId::new(10), "b").await.unwrap();
        assert_eq!(player.active_guilds(), 1);
        assert_eq!(transport.attempts().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_closes_every_guild() {
        let transport = FakeTransport::new();
        let player = player(&transport);

        player.play(GuildId::new(1), USER, ChannelId::new(10), "a").await.unwrap();
        player.play(GuildId::new(2), USER, ChannelId::new(20), "b").await.unwrap();
        player.shutdown().await;

        assert_eq!(player.active_guilds(), 0);
        assert_eq!(transport.closed().len(), 2);
    }
}
