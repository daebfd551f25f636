//! HTTP front door for the quiz-solving pipeline.

pub mod config;
pub mod routes;

pub use config::{Cli, Config};
pub use routes::{build_state, router, AppState};
