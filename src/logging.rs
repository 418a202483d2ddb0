//! Logging initialisation

use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialise the tracing subscriber once per process.
///
/// The configured level seeds the default filter, with sqlx statement
/// logging capped at warn so poll-cycle output stays readable. `RUST_LOG`
/// overrides the whole filter when set. A second call fails because the
/// global subscriber is already installed.
pub fn init(level: &str) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{level},sqlx=warn")));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()?;

    debug!("Logging initialized at level {level}");
    Ok(())
}
