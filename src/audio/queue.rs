use std::collections::VecDeque;
use tracing::{debug, info};

use super::track_context::TrackContext;

/// Política de repetición de la cola
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepeatMode {
    #[default]
    Off,
    /// Repite el último track servido en bucle
    Single,
    /// Re-encola cada track servido al final
    All,
}

/// Motor de orden de la cola de un guild: FIFO estricto, shuffle por clave
/// aleatoria o repetición. Es dueño exclusivo de su colección de pendientes;
/// solo su `PlaybackController` escribe en él.
#[derive(Debug, Default)]
pub struct TrackProvider {
    pending: VecDeque<TrackContext>,
    /// Último contexto entregado, para los modos de repetición
    last_served: Option<TrackContext>,
    repeat_mode: RepeatMode,
    shuffle: bool,
}

impl TrackProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Añade al final; O(1) amortizado
    pub fn add(&mut self, ctx: TrackContext) {
        debug!("➕ Encolado: {}", ctx.effective_title());
        self.pending.push_back(ctx);
    }

    /// Entrega el siguiente contexto según el modo actual.
    ///
    /// Con `RepeatMode::Single` devuelve el último servido una y otra vez
    /// sin consumir pendientes (el shuffle no tiene efecto visible hasta
    /// salir de ese modo; es política explícita, no un bug). Con
    /// `RepeatMode::All` el último servido vuelve al final antes de tomar
    /// el siguiente.
    pub fn poll_next(&mut self) -> Option<TrackContext> {
        if self.repeat_mode == RepeatMode::Single {
            if let Some(last) = &self.last_served {
                info!("🔂 Repitiendo track: {}", last.effective_title());
                return Some(last.clone());
            }
        }

        if self.repeat_mode == RepeatMode::All {
            if let Some(last) = &self.last_served {
                self.pending.push_back(last.clone());
            }
        }

        let next = if self.shuffle {
            self.take_minimum_sort_key()
        } else {
            self.pending.pop_front()
        };

        match next {
            Some(ctx) => {
                self.last_served = Some(ctx.clone());
                Some(ctx)
            }
            None => {
                self.last_served = None;
                None
            }
        }
    }

    /// Mínima `sort_key`; empates los gana el orden de inserción
    fn take_minimum_sort_key(&mut self) -> Option<TrackContext> {
        let mut min_index = None;
        for (index, ctx) in self.pending.iter().enumerate() {
            match min_index {
                Some(best) if self.pending[best].sort_key() <= ctx.sort_key() => {}
                _ => min_index = Some(index),
            }
        }
        min_index.and_then(|index| self.pending.remove(index))
    }

    /// Elimina por identidad; quitar un contexto ausente es un no-op
    pub fn remove(&mut self, stable_id: u64) {
        self.pending.retain(|ctx| ctx.stable_id() != stable_id);
    }

    /// Eliminación en bloque, idempotente
    pub fn remove_all(&mut self, stable_ids: &[u64]) {
        self.pending
            .retain(|ctx| !stable_ids.contains(&ctx.stable_id()));
    }

    /// Olvida el último track servido, para que los modos de repetición no
    /// resuciten un track recién saltado
    pub fn skipped(&mut self) {
        self.last_served = None;
    }

    /// Re-sortea la clave de orden de cada pendiente; ni quita ni duplica
    pub fn reshuffle(&mut self) {
        for ctx in &mut self.pending {
            ctx.randomize_sort_key();
        }
        info!("🔀 Cola re-barajada ({} tracks)", self.pending.len());
    }

    /// Vista paginada de solo lectura respetando el orden actual
    pub fn ordered_view(&self, offset: usize, count: usize) -> Vec<TrackContext> {
        if self.shuffle {
            let mut indices: Vec<usize> = (0..self.pending.len()).collect();
            // orden estable: los empates de sort_key conservan inserción
            indices.sort_by_key(|&i| self.pending[i].sort_key());
            indices
                .into_iter()
                .skip(offset)
                .take(count)
                .map(|i| self.pending[i].clone())
                .collect()
        } else {
            self.pending
                .iter()
                .skip(offset)
                .take(count)
                .cloned()
                .collect()
        }
    }

    /// Milisegundos de música pendiente; los streams en vivo cuentan 0.
    /// Se recalcula en cada consulta para que nunca se desvíe.
    pub fn remaining_duration_millis(&self) -> u64 {
        self.pending
            .iter()
            .filter(|ctx| !ctx.is_stream())
            .map(|ctx| ctx.effective_duration().as_millis() as u64)
            .sum()
    }

    /// Dueños de los contextos pendientes indicados, para el chequeo de
    /// permisos de skip
    pub fn contexts_by_id(&self, stable_ids: &[u64]) -> Vec<TrackContext> {
        self.pending
            .iter()
            .filter(|ctx| stable_ids.contains(&ctx.stable_id()))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn set_shuffle(&mut self, shuffle: bool) {
        self.shuffle = shuffle;
    }

    pub fn is_shuffle(&self) -> bool {
        self.shuffle
    }

    pub fn set_repeat_mode(&mut self, mode: RepeatMode) {
        self.repeat_mode = mode;
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.repeat_mode
    }
}
