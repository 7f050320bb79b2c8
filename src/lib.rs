//! Pipeline de cola de música por servidor: ordering de tracks (FIFO,
//! shuffle, repeat), carga asíncrona serializada por guild y control de
//! admisión (rate limiter + blacklist progresiva).
//!
//! La decodificación de audio, el transporte de voz y el gateway de Discord
//! quedan fuera: se consumen a través de los traits de [`engine`].

pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod ratelimit;
pub mod storage;
pub mod util;

pub use audio::loader::{LoadRequest, Requester, TrackLoader};
pub use audio::player::{PlaybackController, PlaybackState, PlayerDeps, PlayerRegistry};
pub use audio::queue::{RepeatMode, TrackProvider};
pub use audio::track_context::TrackContext;
pub use config::Config;
pub use error::LoadError;
pub use ratelimit::{AdmissionResult, Identity, Ratelimiter, RuleClass, Scope};
