//! Global subscriber installation.

use rust_nds::config::{LogFormat, NdsConfig};
use rust_nds::tracing_init::{self, OutputFormat, TracingConfig};

#[test]
fn test_init_is_idempotent() {
    let mut config = NdsConfig::default();
    config.application.log_format = LogFormat::Compact;
    let tracing_config = TracingConfig::from_config(&config).unwrap();
    assert_eq!(tracing_config.format, OutputFormat::Compact);

    tracing_init::init(tracing_config.with_ansi(false)).unwrap();
    assert!(tracing_init::is_initialized());

    tracing_init::init_from_config(&config).unwrap();
    tracing_init::init(TracingConfig::default().with_format(OutputFormat::Json)).unwrap();
    tracing::info!(node = "dev-Channel1", "still logging");
}

#[test]
fn test_bad_level_fails_before_installing() {
    let mut config = NdsConfig::default();
    config.application.log_level = "chatty".to_string();
    assert!(tracing_init::init_from_config(&config).is_err());
}
