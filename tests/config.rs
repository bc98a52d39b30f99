#![allow(clippy::unwrap_used)]

use std::io::Write;
use std::time::Duration;

use entropy::{Config, ConfigError};

#[test]
fn given_config_file_when_loading_then_sections_override_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[log]
level = "debug"
json = true

[service]
port = 8081
grace_period_secs = 10

[worker]
count = 2
backoff_ceiling_secs = 120

[drivers]
helm_path = "/usr/local/bin/helm"
"#
    )
    .unwrap();

    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.log.level, "debug");
    assert!(config.log.json);
    assert_eq!(config.service.addr().unwrap().port(), 8081);
    assert_eq!(config.service.grace_period(), Duration::from_secs(10));
    assert_eq!(config.worker.sync_config().worker_count, 2);
    assert_eq!(config.worker.sync_config().backoff.ceiling, Duration::from_secs(120));
    assert_eq!(config.drivers.helm_path, "/usr/local/bin/helm");
    assert_eq!(config.drivers.kubectl_path, "kubectl");
}

#[test]
fn given_no_path_when_loading_then_defaults_apply() {
    assert_eq!(Config::load(None).unwrap(), Config::default());
}

#[test]
fn given_missing_file_when_loading_then_read_error_names_the_path() {
    let err = Config::load(Some(std::path::Path::new("/nonexistent/entropy.toml"))).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
    assert!(err.to_string().contains("/nonexistent/entropy.toml"));
}

#[test]
fn given_malformed_toml_when_loading_then_parse_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[service\nport = 1").unwrap();
    assert!(matches!(Config::load(Some(file.path())), Err(ConfigError::Parse { .. })));
}
