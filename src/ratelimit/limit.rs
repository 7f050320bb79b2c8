use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

use super::{now_millis, RuleClass, Scope};

/// Ventana deslizante de timestamps para una identidad concreta.
///
/// Se crea de forma perezosa y nunca se destruye explícitamente: decae sola
/// a medida que los timestamps envejecen.
#[derive(Debug)]
struct Rate {
    /// Última vez que se tocó el registro, para acotar la purga amortizada
    last_updated: u64,
    timestamps: VecDeque<u64>,
}

impl Rate {
    fn new(now: u64) -> Self {
        Self { last_updated: now, timestamps: VecDeque::new() }
    }
}

/// Rate limiter de ventana deslizante para una clase de peticiones y un
/// ámbito (usuario o guild). Variante optimizada de leaky bucket: en vez de
/// un hilo por bucket guardamos timestamps y purgamos al consultar.
pub struct Ratelimit {
    scope: Scope,
    class: RuleClass,
    max_requests: u64,
    window_millis: u64,
    limits: DashMap<u64, Arc<Mutex<Rate>>>,
}

impl Ratelimit {
    pub fn new(scope: Scope, class: RuleClass, max_requests: u64, window_millis: u64) -> Self {
        assert!(max_requests > 0 && window_millis > 0);
        Self {
            scope,
            class,
            max_requests,
            window_millis,
            limits: DashMap::new(),
        }
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn class(&self) -> RuleClass {
        self.class
    }

    /// ¿Puede esta identidad hacer una petición de peso `weight` ahora?
    pub fn is_allowed(&self, id: u64, weight: u64) -> bool {
        self.is_allowed_at(id, weight, now_millis())
    }

    pub(crate) fn is_allowed_at(&self, id: u64, weight: u64, now: u64) -> bool {
        let rate = self
            .limits
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(Rate::new(now))))
            .clone();

        // el lock vive en el registro individual: identidades distintas
        // nunca contienden entre sí
        let mut rate = rate.lock();

        // purga amortizada de timestamps vencidos, acotada por lo que pudo
        // haberse liberado desde la última actualización
        let max_to_clear =
            now.saturating_sub(rate.last_updated) * self.max_requests / self.window_millis;
        let mut cleared = 0;
        while cleared < max_to_clear {
            match rate.timestamps.front() {
                Some(&ts) if ts + self.window_millis < now => {
                    rate.timestamps.pop_front();
                    cleared += 1;
                }
                _ => break,
            }
        }

        rate.last_updated = now;

        if rate.timestamps.len() as u64 + weight <= self.max_requests {
            for _ in 0..weight {
                rate.timestamps.push_back(now);
            }
            true
        } else {
            debug!(id, weight, class = ?self.class, scope = ?self.scope, "rate limit alcanzado");
            false
        }
    }

    /// Reset administrativo de una identidad
    pub fn lift_limit(&self, id: u64) {
        self.limits.remove(&id);
    }
}
