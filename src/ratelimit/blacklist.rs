use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::now_millis;

/// Escalera de duraciones de blacklist en milisegundos. Niveles por encima
/// del último escalón se quedan en una semana.
const BLACKLIST_LEVELS: [u64; 5] = [
    1000 * 60,            // un minuto
    1000 * 600,           // diez minutos
    1000 * 3600,          // una hora
    1000 * 3600 * 24,     // 24 horas
    1000 * 3600 * 24 * 7, // una semana
];

#[derive(Debug)]
struct BlacklistEntry {
    /// Nivel actual; -1 significa "nunca blacklisteado"
    level: i32,
    /// Denegaciones acumuladas en el nivel actual
    violation_count: u32,
    /// Momento en que se emitió el último blacklist
    blacklisted_at: u64,
}

impl BlacklistEntry {
    fn new(now: u64) -> Self {
        Self { level: -1, violation_count: 0, blacklisted_at: now }
    }
}

/// Blacklist indulgente con duraciones progresivas.
pub struct Blacklist {
    threshold: u32,
    entries: DashMap<u64, Arc<Mutex<BlacklistEntry>>>,
    /// Identidades que no pueden ser blacklisteadas jamás
    allowlist: HashSet<u64>,
}

impl Blacklist {
    pub fn new(allowlist: HashSet<u64>, threshold: u32) -> Self {
        assert!(threshold > 0);
        Self { threshold, entries: DashMap::new(), allowlist }
    }

    /// Se consulta antes de cada comando: solo lecturas, nada caro.
    pub fn is_blacklisted(&self, id: u64) -> bool {
        self.is_blacklisted_at(id, now_millis())
    }

    pub(crate) fn is_blacklisted_at(&self, id: u64, now: u64) -> bool {
        if self.allowlist.contains(&id) {
            return false;
        }

        let Some(entry) = self.entries.get(&id) else {
            return false;
        };
        let entry = entry.lock();

        // existe el registro pero nunca llegó a blacklist
        if entry.level < 0 {
            return false;
        }

        now < entry.blacklisted_at + level_duration(entry.level)
    }

    /// Registra una denegación del rate limiter. Devuelve la duración del
    /// castigo si esta violación acaba de cruzar el umbral.
    pub fn record_violation(&self, id: u64) -> Option<Duration> {
        self.record_violation_at(id, now_millis())
    }

    pub(crate) fn record_violation_at(&self, id: u64, now: u64) -> Option<Duration> {
        if self.allowlist.contains(&id) {
            return None;
        }

        let entry = self
            .entries
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(BlacklistEntry::new(now))))
            .clone();

        let mut entry = entry.lock();
        entry.violation_count += 1;
        if entry.violation_count < self.threshold {
            return None;
        }

        entry.level = (entry.level + 1).max(0);
        entry.violation_count = 0;
        entry.blacklisted_at = now;

        let duration = Duration::from_millis(level_duration(entry.level));
        info!(
            id,
            level = entry.level,
            duration = %crate::util::format_duration(duration),
            "identidad blacklisteada"
        );
        Some(duration)
    }

    /// Reset administrativo: borra ventana de violaciones y blacklist.
    pub fn lift(&self, id: u64) {
        self.entries.remove(&id);
    }
}

fn level_duration(level: i32) -> u64 {
    if level < 0 {
        return 0;
    }
    let idx = (level as usize).min(BLACKLIST_LEVELS.len() - 1);
    BLACKLIST_LEVELS[idx]
}
