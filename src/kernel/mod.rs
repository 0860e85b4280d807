pub mod block;
pub mod cancel;
pub mod generation;
pub mod scheduler;
pub mod state;
pub mod telemetry;
pub mod time;
pub mod timeline;
pub mod trim;
