pub mod answers; // Answer intake store
pub mod care_team; // Assignments, claims, access control
pub mod collaborators; // Identity and blob store interfaces
pub mod compat; // Client compatibility gate
pub mod config;
pub mod context;
pub mod core_state; // Transport-agnostic state
pub mod db;
pub mod diagnosis;
pub mod error;
pub mod events; // Outbox, dispatcher, built-in handlers
pub mod layout; // Versioned layouts
pub mod models;
pub mod store;
pub mod treatment_plan;
pub mod visit; // Case and visit lifecycles

#[cfg(test)]
mod scenarios;
#[cfg(test)]
mod test_support;

pub use core_state::{CoreState, CoreStateBuilder};
pub use error::CoreError;

use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber. `RUST_LOG` wins over the default filter.
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init_tracing() {
    let result = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init();

    if result.is_ok() {
        tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);
    }
}
