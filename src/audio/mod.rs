pub mod loader;
pub mod player;
pub mod queue;
pub mod track_context;
