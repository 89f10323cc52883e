use rand::seq::SliceRandom;
use std::{collections::VecDeque, time::Duration};
use tracing::{debug, info, warn};

use super::track::Track;
use crate::error::{MusicError, MusicResult};

/// Canciones recientes que se recuerdan por guild.
const MAX_HISTORY: usize = 10;

/// Cola acotada de un guild. La canción en reproducción no vive aquí.
#[derive(Debug)]
pub struct TrackQueue {
    items: VecDeque<Track>,
    history: VecDeque<Track>,
    repeat: bool,
    max_size: usize,
}

impl TrackQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::new(),
            history: VecDeque::new(),
            repeat: false,
            max_size,
        }
    }

    /// Agrega un track al final; devuelve su posición (1-based).
    pub fn add(&mut self, track: Track) -> MusicResult<usize> {
        if self.is_full() {
            warn!("🚫 Cola llena (máximo {}), rechazando: {}", self.max_size, track.title);
            return Err(MusicError::Capacity { max: self.max_size });
        }

        info!("➕ Agregado a la cola: {}", track.title);
        self.items.push_back(track);
        Ok(self.items.len())
    }

    /// Re-inserta un track al frente (repeat). Respeta el límite de tamaño.
    pub fn push_front(&mut self, track: Track) -> MusicResult<()> {
        if self.is_full() {
            return Err(MusicError::Capacity { max: self.max_size });
        }

        debug!("🔂 Re-insertado al frente: {}", track.title);
        self.items.push_front(track);
        Ok(())
    }

    /// Saca el siguiente track (FIFO) y lo registra en el historial.
    pub fn pop_next(&mut self) -> Option<Track> {
        let next = self.items.pop_front()?;
        info!("➡️ Siguiente en cola: {}", next.title);

        self.history.push_back(next.replay());
        if self.history.len() > MAX_HISTORY {
            self.history.pop_front();
        }

        Some(next)
    }

    pub fn peek_next(&self) -> Option<&Track> {
        self.items.front()
    }

    /// Elimina por posición 1-based.
    pub fn remove(&mut self, position: usize) -> MusicResult<Track> {
        let len = self.items.len();
        if position == 0 || position > len {
            return Err(MusicError::Position { position, len });
        }

        let removed = self
            .items
            .remove(position - 1)
            .ok_or(MusicError::Position { position, len })?;
        info!("🗑️ Eliminado en posición {}: {}", position, removed.title);
        Ok(removed)
    }

    /// Mueve un track entre posiciones 1-based.
    pub fn move_track(&mut self, from: usize, to: usize) -> MusicResult<()> {
        let len = self.items.len();
        for position in [from, to] {
            if position == 0 || position > len {
                return Err(MusicError::Position { position, len });
            }
        }

        if from != to {
            let item = self
                .items
                .remove(from - 1)
                .ok_or(MusicError::Position { position: from, len })?;
            self.items.insert(to - 1, item);
            debug!("📍 Track movido de posición {} a {}", from, to);
        }

        Ok(())
    }

    /// Mezcla las canciones pendientes.
    pub fn shuffle(&mut self) {
        let mut items: Vec<_> = self.items.drain(..).collect();
        items.shuffle(&mut rand::thread_rng());
        self.items.extend(items);
        info!("🔀 Cola mezclada ({} canciones)", self.items.len());
    }

    /// Descarta lo pendiente y devuelve cuántas canciones se quitaron.
    pub fn clear(&mut self) -> usize {
        let cleared = self.items.len();
        self.items.clear();
        info!("🗑️ Cola limpiada: {} tracks removidos", cleared);
        cleared
    }

    pub fn toggle_repeat(&mut self) -> bool {
        self.repeat = !self.repeat;
        if self.repeat {
            info!("🔂 Repetir canción activado");
        } else {
            info!("➡️ Repetición desactivada");
        }
        self.repeat
    }

    pub fn set_repeat(&mut self, enabled: bool) {
        self.repeat = enabled;
    }

    pub fn is_repeat(&self) -> bool {
        self.repeat
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.max_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn remaining_space(&self) -> usize {
        self.max_size.saturating_sub(self.items.len())
    }

    pub fn total_duration(&self) -> Duration {
        self.items.iter().filter_map(|item| item.duration).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.items.iter()
    }

    pub fn history(&self) -> impl Iterator<Item = &Track> {
        self.history.iter()
    }

    /// Obtiene una página específica de la cola
    pub fn page(&self, page: usize, items_per_page: usize) -> QueuePage {
        let items_per_page = items_per_page.max(1);
        let total_items = self.items.len();
        let total_pages = if total_items == 0 {
            1
        } else {
            total_items.div_ceil(items_per_page)
        };
        let current_page = page.clamp(1, total_pages);
        let start = (current_page - 1) * items_per_page;

        QueuePage {
            items: self
                .items
                .iter()
                .enumerate()
                .skip(start)
                .take(items_per_page)
                .map(|(index, track)| (index + 1, track.clone()))
                .collect(),
            current_page,
            total_pages,
            total_items,
            max_size: self.max_size,
            total_duration: self.total_duration(),
        }
    }
}

/// Vista paginada de la cola; cada item lleva su posición 1-based.
#[derive(Debug, Clone)]
pub struct QueuePage {
    pub items: Vec<(usize, Track)>,
    pub current_page: usize,
    pub total_pages: usize,
    pub total_items: usize,
    pub max_size: usize,
    pub total_duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serenity::model::id::UserId;

    fn track(name: &str, secs: u64) -> Track {
        Track::new(name, name, format!("https://youtu.be/{}", name), UserId::new(1))
            .with_duration(Duration::from_secs(secs))
    }

    fn titles(queue: &TrackQueue) -> Vec<String> {
        queue.iter().map(|t| t.title.clone()).collect()
    }

    #[test]
    fn add_never_exceeds_max_size() {
        let mut queue = TrackQueue::new(3);
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            assert_eq!(queue.add(track(name, 10)).unwrap(), i + 1);
        }

        let before = titles(&queue);
        assert_eq!(queue.add(track("d", 10)), Err(MusicError::Capacity { max: 3 }));
        assert_eq!(titles(&queue), before);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.remaining_space(), 0);
    }

    #[test]
    fn remove_validates_position() {
        let mut queue = TrackQueue::new(10);
        queue.add(track("a", 10)).unwrap();
        queue.add(track("b", 10)).unwrap();
        queue.add(track("c", 10)).unwrap();

        assert_eq!(queue.remove(0).unwrap_err(), MusicError::Position { position: 0, len: 3 });
        assert_eq!(queue.remove(4).unwrap_err(), MusicError::Position { position: 4, len: 3 });
        assert_eq!(queue.len(), 3);

        let removed = queue.remove(2).unwrap();
        assert_eq!(removed.title, "b");
        assert_eq!(queue.len(), 2);
        assert_eq!(titles(&queue), vec!["a", "c"]);
    }

    #[test]
    fn shuffle_preserves_multiset() {
        let mut queue = TrackQueue::new(50);
        for i in 0..30 {
            queue.add(track(&format!("t{}", i), 10)).unwrap();
        }

        let mut before = titles(&queue);
        queue.shuffle();
        let mut after = titles(&queue);

        before.sort();
        after.sort();
        assert_eq!(before, after);
    }

    #[test]
    fn push_front_respects_capacity() {
        let mut queue = TrackQueue::new(2);
        queue.add(track("a", 10)).unwrap();
        queue.push_front(track("r", 10)).unwrap();
        assert_eq!(titles(&queue), vec!["r", "a"]);
        assert!(queue.push_front(track("x", 10)).is_err());
    }

    #[test]
    fn pop_next_is_fifo_and_records_history() {
        let mut queue = TrackQueue::new(20);
        for i in 0..12 {
            queue.add(track(&format!("t{}", i), 10)).unwrap();
        }

        assert_eq!(queue.peek_next().unwrap().title, "t0");
        for i in 0..12 {
            assert_eq!(queue.pop_next().unwrap().title, format!("t{}", i));
        }
        assert!(queue.pop_next().is_none());
        assert_eq!(queue.history().count(), MAX_HISTORY);
        assert_eq!(queue.history().next().unwrap().title, "t2");
    }

    #[test]
    fn move_track_reorders() {
        let mut queue = TrackQueue::new(10);
        for name in ["a", "b", "c", "d"] {
            queue.add(track(name, 10)).unwrap();
        }
        queue.move_track(4, 1).unwrap();
        assert_eq!(titles(&queue), vec!["d", "a", "b", "c"]);
        assert!(queue.move_track(0, 2).is_err());
        assert!(queue.move_track(1, 5).is_err());
    }

    #[test]
    fn toggle_repeat_flips() {
        let mut queue = TrackQueue::new(1);
        assert!(queue.toggle_repeat());
        assert!(queue.is_repeat());
        assert!(!queue.toggle_repeat());
    }

    #[test]
    fn pagination_numbers_positions() {
        let mut queue = TrackQueue::new(30);
        for i in 0..25 {
            queue.add(track(&format!("t{}", i), 60)).unwrap();
        }

        let page = queue.page(3, 10);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.current_page, 3);
        assert_eq!(page.items.len(), 5);
        assert_eq!(page.items[0].0, 21);
        assert_eq!(page.total_duration, Duration::from_secs(25 * 60));

        // Páginas fuera de rango se ajustan
        assert_eq!(queue.page(99, 10).current_page, 3);
        assert_eq!(TrackQueue::new(5).page(1, 10).total_pages, 1);
    }

    #[test]
    fn clear_reports_count() {
        let mut queue = TrackQueue::new(5);
        queue.add(track("a", 1)).unwrap();
        queue.add(track("b", 1)).unwrap();
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
    }
}
