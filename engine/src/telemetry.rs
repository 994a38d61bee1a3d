//! Logging setup
//!
//! `RUST_LOG` overrides everything. Otherwise the configured level applies to
//! our own crates while the database and HTTP stacks stay at `warn`, since
//! sqlx logs every statement at `info`. Debug builds print for a terminal,
//! release builds emit JSON lines with the current span.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const QUIET_TARGETS: &[&str] = &["sqlx", "hyper", "reqwest"];

/// Filter used when `RUST_LOG` is unset
fn default_directives(log_level: &str) -> String {
    let mut directives = vec![
        log_level.to_string(),
        format!("followup_engine={}", log_level),
        format!("questionnaire={}", log_level),
    ];
    directives.extend(QUIET_TARGETS.iter().map(|target| format!("{}=warn", target)));
    directives.join(",")
}

/// Install the global subscriber
///
/// Safe to call more than once; later calls are ignored.
pub fn init_telemetry(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(log_level)));

    #[cfg(debug_assertions)]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty().with_target(false))
            .try_init()
            .ok();
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_current_span(true))
            .try_init()
            .ok();
    }
}
