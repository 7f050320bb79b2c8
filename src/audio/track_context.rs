use chrono::{DateTime, Utc};
use serenity::model::id::{GuildId, UserId};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use crate::engine::ResolvedTrack;

/// Track resuelto más los metadatos de quién lo encoló y cuándo.
///
/// Un track dividido (split) es un `TrackContext` con límites explícitos
/// dentro del recurso original y un título propio.
#[derive(Debug)]
pub struct TrackContext {
    track: ResolvedTrack,
    owner_id: UserId,
    guild_id: GuildId,
    added_at: DateTime<Utc>,
    /// Clave de orden para el modo shuffle; se vuelve a sortear en cada
    /// reshuffle y en cada clon
    sort_key: u32,
    /// Identidad estable: se deriva una sola vez al construir y sobrevive
    /// a los clones, nunca se recalcula
    stable_id: u64,
    start_position: Duration,
    /// `None` significa hasta el final del track
    end_position: Option<Duration>,
    title_override: Option<String>,
}

impl TrackContext {
    pub fn new(track: ResolvedTrack, owner_id: UserId, guild_id: GuildId) -> Self {
        Self::build(track, owner_id, guild_id, Duration::ZERO, None, None)
    }

    /// Sub-rango `[start, end)` de un track, con su propio título.
    pub fn new_split(
        track: ResolvedTrack,
        owner_id: UserId,
        guild_id: GuildId,
        start: Duration,
        end: Duration,
        title: String,
    ) -> Self {
        Self::build(track, owner_id, guild_id, start, Some(end), Some(title))
    }

    fn build(
        track: ResolvedTrack,
        owner_id: UserId,
        guild_id: GuildId,
        start_position: Duration,
        end_position: Option<Duration>,
        title_override: Option<String>,
    ) -> Self {
        let added_at = Utc::now();
        let stable_id = derive_stable_id(owner_id, guild_id, added_at, &track.identifier);

        Self {
            track,
            owner_id,
            guild_id,
            added_at,
            sort_key: rand::random(),
            stable_id,
            start_position,
            end_position,
            title_override,
        }
    }

    pub fn with_start_position(mut self, position: Duration) -> Self {
        self.start_position = position;
        self
    }

    pub fn track(&self) -> &ResolvedTrack {
        &self.track
    }

    pub fn owner_id(&self) -> UserId {
        self.owner_id
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn added_at(&self) -> DateTime<Utc> {
        self.added_at
    }

    pub fn sort_key(&self) -> u32 {
        self.sort_key
    }

    pub fn stable_id(&self) -> u64 {
        self.stable_id
    }

    pub fn start_position(&self) -> Duration {
        self.start_position
    }

    pub fn is_stream(&self) -> bool {
        self.track.is_stream
    }

    pub fn effective_title(&self) -> &str {
        self.title_override.as_deref().unwrap_or(&self.track.title)
    }

    /// Duración reproducible de este contexto (respeta los límites de split)
    pub fn effective_duration(&self) -> Duration {
        match self.end_position {
            Some(end) => end.saturating_sub(self.start_position),
            None => self.track.duration.saturating_sub(self.start_position),
        }
    }

    /// Re-sortea la clave de orden; devuelve la nueva
    pub(crate) fn randomize_sort_key(&mut self) -> u32 {
        self.sort_key = rand::random();
        self.sort_key
    }
}

// Clone a mano: conserva dueño, guild y stable_id pero sortea una clave
// de orden nueva para no sesgar el shuffle al re-encolar
impl Clone for TrackContext {
    fn clone(&self) -> Self {
        Self {
            track: self.track.clone(),
            owner_id: self.owner_id,
            guild_id: self.guild_id,
            added_at: self.added_at,
            sort_key: rand::random(),
            stable_id: self.stable_id,
            start_position: self.start_position,
            end_position: self.end_position,
            title_override: self.title_override.clone(),
        }
    }
}

impl PartialEq for TrackContext {
    fn eq(&self, other: &Self) -> bool {
        self.stable_id == other.stable_id
    }
}

impl Eq for TrackContext {}

impl Hash for TrackContext {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.stable_id.hash(state);
    }
}

fn derive_stable_id(
    owner_id: UserId,
    guild_id: GuildId,
    added_at: DateTime<Utc>,
    identifier: &str,
) -> u64 {
    let mut hasher = DefaultHasher::new();
    owner_id.get().hash(&mut hasher);
    guild_id.get().hash(&mut hasher);
    added_at
        .timestamp_nanos_opt()
        .unwrap_or_else(|| added_at.timestamp_micros())
        .hash(&mut hasher);
    identifier.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testutil::{context, track};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_clone_keeps_identity() {
        let ctx = context("abc");
        let clone = ctx.clone();

        assert_eq!(clone.stable_id(), ctx.stable_id());
        assert_eq!(clone.owner_id(), ctx.owner_id());
        assert_eq!(clone.guild_id(), ctx.guild_id());
        assert_eq!(clone, ctx);
    }

    #[test]
    fn test_split_bounds() {
        let ctx = TrackContext::new_split(
            track("abc", 300),
            UserId::new(1),
            GuildId::new(2),
            Duration::from_secs(60),
            Duration::from_secs(90),
            "part 2".to_string(),
        );

        assert_eq!(ctx.effective_duration(), Duration::from_secs(30));
        assert_eq!(ctx.effective_title(), "part 2");
        assert_eq!(ctx.start_position(), Duration::from_secs(60));
    }

    #[test]
    fn test_start_offset_shortens_duration() {
        let ctx = context("abc").with_start_position(Duration::from_secs(100));
        assert_eq!(ctx.effective_duration(), Duration::from_secs(80));
    }

    #[test]
    fn test_distinct_contexts_have_distinct_ids() {
        assert_ne!(context("abc").stable_id(), context("def").stable_id());
    }
}
