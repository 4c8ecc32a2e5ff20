use rand::seq::SliceRandom;
use std::collections::VecDeque;
use tracing::{debug, info};

use super::track::Track;
use crate::error::{AudioError, AudioResult};

/// Cola FIFO de tracks pendientes. Las posiciones públicas son 1-based.
#[derive(Debug, Clone)]
pub struct MusicQueue {
    items: VecDeque<Track>,
    max_size: usize,
}

impl MusicQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::new(),
            max_size,
        }
    }

    /// Agrega un track al final de la cola y devuelve su posición
    pub fn enqueue(&mut self, track: Track) -> AudioResult<usize> {
        if self.items.len() >= self.max_size {
            return Err(AudioError::validation(format!(
                "la cola está llena (máximo {} canciones)",
                self.max_size
            )));
        }

        info!("➕ Agregado a la cola: {}", track.title());
        self.items.push_back(track);

        Ok(self.items.len())
    }

    /// Agrega múltiples tracks (playlist) hasta llenar la cola
    pub fn enqueue_all(&mut self, tracks: Vec<Track>) -> usize {
        let available_space = self.max_size.saturating_sub(self.items.len());
        let to_add = tracks.len().min(available_space);

        self.items.extend(tracks.into_iter().take(to_add));

        info!("➕ Agregadas {} canciones a la cola", to_add);
        to_add
    }

    /// Reinserta un track al frente. No respeta el límite: se consume enseguida.
    pub fn enqueue_front(&mut self, track: Track) {
        debug!("🔂 Reencolado al frente: {}", track.title());
        self.items.push_front(track);
    }

    /// Obtiene el siguiente track (FIFO)
    pub fn dequeue_next(&mut self) -> Option<Track> {
        let next = self.items.pop_front();
        match &next {
            Some(track) => debug!("➡️ Siguiente en cola: {}", track.title()),
            None => debug!("📭 Cola vacía, no hay siguiente track"),
        }
        next
    }

    /// Mueve el track en `from` a `to` (ambas 1-based)
    pub fn move_track(&mut self, from: usize, to: usize) -> AudioResult<Track> {
        let from_idx = self.index_of(from)?;
        let to_idx = self.index_of(to)?;

        let track = self
            .items
            .remove(from_idx)
            .ok_or_else(|| AudioError::validation(format!("no hay canción en la posición {}", from)))?;
        self.items.insert(to_idx, track.clone());

        debug!("📍 Track movido de posición {} a {}", from, to);
        Ok(track)
    }

    /// Elimina el track en `position` (1-based)
    pub fn remove_track(&mut self, position: usize) -> AudioResult<Track> {
        let index = self.index_of(position)?;
        let track = self
            .items
            .remove(index)
            .ok_or_else(|| AudioError::validation(format!("no hay canción en la posición {}", position)))?;

        debug!("❌ Track eliminado en posición {}", position);
        Ok(track)
    }

    /// Mezcla la cola
    pub fn shuffle(&mut self) -> AudioResult<()> {
        if self.items.len() < 2 {
            return Err(AudioError::validation(
                "se necesitan al menos 2 canciones en la cola para mezclar",
            ));
        }

        let mut rng = rand::thread_rng();
        self.items.make_contiguous().shuffle(&mut rng);
        info!("🔀 Cola mezclada ({} canciones)", self.items.len());
        Ok(())
    }

    /// Limpia la cola y devuelve cuántos tracks se descartaron
    pub fn clear(&mut self) -> usize {
        let removed = self.items.len();
        self.items.clear();
        info!("🗑️ Cola limpiada ({} canciones)", removed);
        removed
    }

    /// Descarta los tracks a partir de la posición `len` (deshace un encolado)
    pub fn truncate(&mut self, len: usize) -> usize {
        let removed = self.items.len().saturating_sub(len);
        self.items.truncate(len);
        removed
    }

    pub fn peek_all(&self) -> Vec<Track> {
        self.items.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    // Funciones privadas

    fn index_of(&self, position: usize) -> AudioResult<usize> {
        if position == 0 || position > self.items.len() {
            return Err(AudioError::validation(format!(
                "posición {} fuera de rango (la cola tiene {} canciones)",
                position,
                self.items.len()
            )));
        }
        Ok(position - 1)
    }
}

/// Una página de la cola para mostrar en Discord
#[derive(Debug, Clone)]
pub struct QueuePage {
    pub items: Vec<Track>,
    /// Posición 1-based del primer item de la página
    pub first_position: usize,
    pub current_page: usize,
    pub total_pages: usize,
    pub total_items: usize,
}

impl QueuePage {
    pub fn from_tracks(tracks: &[Track], page: usize, items_per_page: usize) -> Self {
        let items_per_page = items_per_page.max(1);
        let total_items = tracks.len();
        let total_pages = if total_items == 0 {
            1
        } else {
            total_items.div_ceil(items_per_page)
        };
        let safe_page = page.clamp(1, total_pages);
        let start = (safe_page - 1) * items_per_page;
        let end = (start + items_per_page).min(total_items);

        Self {
            items: tracks.get(start..end).map(<[Track]>::to_vec).unwrap_or_default(),
            first_position: start + 1,
            current_page: safe_page,
            total_pages,
            total_items,
        }
    }
}
