use crate::config::LoggingSettings;
use tracing_subscriber::{
    fmt::{self, time::ChronoUtc},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Installs the global subscriber. `RUST_LOG` overrides the configured
/// level. Returns `false` when a subscriber was already installed.
pub fn init_tracing(settings: &LoggingSettings) -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "authz_engine={level},authz_schema={level},sqlx=warn,reqwest=info",
            level = settings.level
        )
        .into()
    });

    let installed = if settings.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(false)
                    .json(),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_line_number(true)
                    .with_timer(ChronoUtc::rfc_3339()),
            )
            .try_init()
    };

    installed.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_a_no_op() {
        let settings = LoggingSettings {
            level: "debug".to_string(),
            json: true,
        };
        init_tracing(&settings);
        assert!(!init_tracing(&settings));
    }
}
