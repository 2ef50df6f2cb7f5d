use std::io::Write;
use std::time::Duration;

use affinity_pump::util::config::{load_config, ConfigError};
use affinity_pump::util::logger::{self, LogLevel};
use affinity_pump::Scheduler;

#[test]
fn test_scheduler_from_ron_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "(worker_threads: 2, worker_name_prefix: \"ron-worker\", pump_idle_timeout: 5)"
    )
    .unwrap();

    let config = match load_config(file.path()) {
        Ok(config) => config,
        // Overrides from the environment are validated too.
        Err(ConfigError::InvalidEnv { .. }) => return,
        Err(err) => panic!("unexpected error: {}", err),
    };
    assert_eq!(config.worker_name_prefix, "ron-worker");

    let s = Scheduler::with_config(config);
    let s2 = s.clone();
    let prefix = s
        .run_synchronously_with_result(move || async move {
            s2.switch_to_background().await?;
            anyhow::Ok(std::thread::current().name().map(str::to_owned))
        })
        .unwrap();
    assert!(prefix.is_some_and(|name| name.starts_with("ron-worker-")));
    assert_eq!(s.config().pump_idle_timeout, Duration::from_millis(5));
}

#[test]
fn test_malformed_ron_is_reported() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "(worker_threads: \"many\")").unwrap();
    assert!(matches!(
        load_config(file.path()),
        Err(ConfigError::ParseError(_))
    ));
}

#[test]
fn test_logger_init_is_idempotent() {
    logger::init_with_level(LogLevel::Debug);
    logger::init();
    assert!(logger::try_init_with_level(LogLevel::Trace).is_err());

    let s = Scheduler::new();
    s.run_synchronously(|| async { anyhow::Ok(()) }).unwrap();
    assert_eq!("warn".parse::<LogLevel>(), Ok(LogLevel::Warn));
}
