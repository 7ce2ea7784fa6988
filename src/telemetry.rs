#[cfg(feature = "telemetry")]
use std::sync::OnceLock;

#[cfg(feature = "telemetry")]
use tracing_subscriber::{EnvFilter, fmt};

/// Initialize tracing subscriber once per process.
#[cfg(feature = "telemetry")]
pub fn init_tracing() {
    static INIT: OnceLock<()> = OnceLock::new();

    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("param_validation=info"));
        let _ = fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
    });
}

#[cfg(not(feature = "telemetry"))]
pub fn init_tracing() {}

/// Run an inline block inside a tracing span named after the analysis phase.
#[macro_export]
macro_rules! instrument_block {
    ($name:expr, $method:expr, $block:block) => {{
        let span = tracing::debug_span!("param_validation", phase = $name, method = %$method);
        let _guard = span.enter();
        (|| $block)()
    }};
}
