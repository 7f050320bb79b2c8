//! Control de admisión compartido por todo el proceso: rate limiting de
//! ventana deslizante por usuario/guild y blacklist progresiva.
//!
//! Se construye una sola vez al arrancar y se inyecta por referencia; no hay
//! estado global escondido.

pub mod blacklist;
pub mod limit;

use chrono::Utc;
use serenity::model::id::{GuildId, UserId};
use std::collections::HashSet;
use std::time::Duration;

pub use blacklist::Blacklist;
pub use limit::Ratelimit;

use crate::config::Config;

pub(crate) fn now_millis() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// ¿Limitamos al usuario individual o al guild entero?
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    User,
    Guild,
}

/// Clase de peticiones que una regla cubre
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleClass {
    /// Comandos genéricos
    Command,
    /// Skips, que son más baratos pero más spameables
    Skip,
    /// Importación de playlists lentas; el peso es el número de tracks
    BulkPlaylist,
}

/// Quién origina una petición
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub guild_id: GuildId,
}

/// Veredicto de admisión. `blacklisted_for` viene relleno cuando esta misma
/// denegación acaba de emitir un blacklist nuevo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionResult {
    pub allowed: bool,
    pub blacklisted_for: Option<Duration>,
}

impl AdmissionResult {
    fn allowed() -> Self {
        Self { allowed: true, blacklisted_for: None }
    }

    fn denied(blacklisted_for: Option<Duration>) -> Self {
        Self { allowed: false, blacklisted_for }
    }
}

/// Fachada del control de admisión: todas las reglas más la blacklist.
pub struct Ratelimiter {
    limits: Vec<Ratelimit>,
    blacklist: Option<Blacklist>,
    /// Usuarios exentos de límites y blacklist (owner, admins, el propio bot)
    allowlist: HashSet<u64>,
}

impl Ratelimiter {
    /// Reglas por defecto, una por clase de comando y ámbito.
    pub fn new(config: &Config) -> Self {
        let allowlist: HashSet<u64> = config.admin_user_ids.iter().copied().collect();

        let limits = vec![
            Ratelimit::new(Scope::User, RuleClass::Command, 5, 10_000),
            Ratelimit::new(Scope::User, RuleClass::Skip, 5, 20_000),
            Ratelimit::new(Scope::Guild, RuleClass::Command, 10, 10_000),
            Ratelimit::new(Scope::Guild, RuleClass::BulkPlaylist, 1000, 120_000),
        ];

        let blacklist = config
            .auto_blacklist
            .then(|| Blacklist::new(allowlist.clone(), config.blacklist_threshold));

        Self { limits, blacklist, allowlist }
    }

    /// Construye una fachada con reglas arbitrarias (tests, despliegues raros)
    pub fn with_rules(
        limits: Vec<Ratelimit>,
        blacklist: Option<Blacklist>,
        allowlist: HashSet<u64>,
    ) -> Self {
        Self { limits, blacklist, allowlist }
    }

    /// Evalúa todas las reglas que aplican a `class`. La primera denegación
    /// corta; las denegaciones con ámbito de usuario escalan la blacklist,
    /// las de guild no (un guild entero no se blacklistea por un abusón).
    pub fn is_allowed(&self, invoker: &Identity, class: RuleClass, weight: u64) -> AdmissionResult {
        if self.allowlist.contains(&invoker.user_id.get()) {
            return AdmissionResult::allowed();
        }

        for limit in self.limits.iter().filter(|l| l.class() == class) {
            let id = match limit.scope() {
                Scope::User => invoker.user_id.get(),
                Scope::Guild => invoker.guild_id.get(),
            };

            if !limit.is_allowed(id, weight) {
                let blacklisted_for = match (limit.scope(), &self.blacklist) {
                    (Scope::User, Some(bl)) => bl.record_violation(id),
                    _ => None,
                };
                return AdmissionResult::denied(blacklisted_for);
            }
        }

        AdmissionResult::allowed()
    }

    pub fn is_blacklisted(&self, user_id: UserId) -> bool {
        self.blacklist
            .as_ref()
            .is_some_and(|bl| bl.is_blacklisted(user_id.get()))
    }

    /// Reset administrativo: limpia límites y blacklist de una identidad.
    pub fn lift_limit_and_blacklist(&self, id: u64) {
        for limit in &self.limits {
            limit.lift_limit(id);
        }
        if let Some(bl) = &self.blacklist {
            bl.lift(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(user: u64, guild: u64) -> Identity {
        Identity { user_id: UserId::new(user), guild_id: GuildId::new(guild) }
    }

    fn gate(threshold: u32) -> Ratelimiter {
        Ratelimiter::with_rules(
            vec![
                Ratelimit::new(Scope::User, RuleClass::Command, 2, 60_000),
                Ratelimit::new(Scope::Guild, RuleClass::BulkPlaylist, 10, 60_000),
            ],
            Some(Blacklist::new(HashSet::new(), threshold)),
            HashSet::new(),
        )
    }

    #[test]
    fn test_user_rule_denies_and_escalates() {
        let gate = gate(2);
        let id = identity(1, 100);

        assert!(gate.is_allowed(&id, RuleClass::Command, 1).allowed);
        assert!(gate.is_allowed(&id, RuleClass::Command, 1).allowed);

        let first = gate.is_allowed(&id, RuleClass::Command, 1);
        assert!(!first.allowed);
        assert_eq!(first.blacklisted_for, None);

        let second = gate.is_allowed(&id, RuleClass::Command, 1);
        assert!(!second.allowed);
        assert_eq!(second.blacklisted_for, Some(Duration::from_secs(60)));
        assert!(gate.is_blacklisted(UserId::new(1)));
    }

    #[test]
    fn test_guild_scope_never_blacklists() {
        let gate = gate(1);
        let id = identity(1, 100);

        let denial = gate.is_allowed(&id, RuleClass::BulkPlaylist, 11);
        assert!(!denial.allowed);
        assert_eq!(denial.blacklisted_for, None);
        assert!(!gate.is_blacklisted(UserId::new(1)));
    }

    #[test]
    fn test_allowlisted_user_always_passes() {
        let mut allow = HashSet::new();
        allow.insert(1);
        let gate = Ratelimiter::with_rules(
            vec![Ratelimit::new(Scope::User, RuleClass::Command, 1, 60_000)],
            None,
            allow,
        );
        let id = identity(1, 100);

        for _ in 0..10 {
            assert!(gate.is_allowed(&id, RuleClass::Command, 1).allowed);
        }
    }

    #[test]
    fn test_lift_limit_and_blacklist() {
        let gate = gate(1);
        let id = identity(1, 100);

        gate.is_allowed(&id, RuleClass::Command, 1);
        gate.is_allowed(&id, RuleClass::Command, 1);
        gate.is_allowed(&id, RuleClass::Command, 1);
        assert!(gate.is_blacklisted(UserId::new(1)));

        gate.lift_limit_and_blacklist(1);
        assert!(!gate.is_blacklisted(UserId::new(1)));
        assert!(gate.is_allowed(&id, RuleClass::Command, 1).allowed);
    }

    #[test]
    fn test_rules_of_other_classes_do_not_apply() {
        let gate = gate(10);
        let id = identity(1, 100);

        gate.is_allowed(&id, RuleClass::Command, 1);
        gate.is_allowed(&id, RuleClass::Command, 1);
        assert!(!gate.is_allowed(&id, RuleClass::Command, 1).allowed);
        // la regla de Command agotada no afecta a los skips
        assert!(gate.is_allowed(&id, RuleClass::Skip, 1).allowed);
    }
}
