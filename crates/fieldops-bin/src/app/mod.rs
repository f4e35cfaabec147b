//! Application wiring and operator commands.

mod commands;
mod state;

pub use commands::{clear, flush_once, print_status, retry_all, run};
pub use state::OutboxApp;

pub type AppResult<T> = Result<T, Box<dyn std::error::Error>>;
