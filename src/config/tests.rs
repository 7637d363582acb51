use super::*;
use crate::codec::CodecKind;
use serial_test::serial;
use std::env;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Runs `f` with a fresh temporary directory as working directory.
fn in_temp_dir<T>(f: impl FnOnce(&Path) -> T) -> T {
    let tmp = TempDir::new().expect("create tempdir");
    let orig = env::current_dir().expect("current_dir");
    env::set_current_dir(tmp.path()).expect("set current dir");

    let result = f(tmp.path());

    env::set_current_dir(orig).expect("restore cwd");
    result
}

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.broker.host, "127.0.0.1");
    assert_eq!(settings.broker.port, 8080);
    assert_eq!(settings.broker.user, "admin");
    assert_eq!(settings.messenger.max_retries, 10);
    assert_eq!(settings.messenger.retry_interval_secs, 10);
    assert_eq!(settings.messenger.stream_buffer, 50);
    assert_eq!(settings.messenger.codec, CodecKind::Json);
    assert_eq!(settings.log.level, "info");
}

#[test]
#[serial]
fn test_load_config_without_sources_uses_defaults() {
    let cfg = in_temp_dir(|_| load_config().expect("load_config failed"));
    assert_eq!(cfg, Settings::default());
}

#[test]
#[serial]
fn test_load_config_from_file_overrides_defaults() {
    let cfg = in_temp_dir(|_| {
        fs::create_dir_all("config").expect("create config dir");
        let toml = r#"
            [broker]
            host = "broker.internal"
            port = 9000

            [messenger]
            max_retries = 3
            codec = "yaml"
        "#;
        fs::write("config/default.toml", toml).expect("write config file");
        load_config().expect("load_config failed")
    });

    assert_eq!(cfg.broker.host, "broker.internal");
    assert_eq!(cfg.broker.port, 9000);
    assert_eq!(cfg.broker.user, "admin");
    assert_eq!(cfg.messenger.max_retries, 3);
    assert_eq!(cfg.messenger.retry_interval_secs, 10);
    assert_eq!(cfg.messenger.codec, CodecKind::Yaml);
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let cfg = in_temp_dir(|dir| {
        let path = dir.join("messenger.yaml");
        fs::write(
            &path,
            "broker:\n  port: 9000\nmessenger:\n  stream_buffer: 5\n",
        )
        .expect("write config file");

        temp_env::with_vars(
            [
                ("POPSUB__BROKER__PORT", Some("9100")),
                ("POPSUB__MESSENGER__RETRY_INTERVAL_SECS", Some("2")),
                ("POPSUB__LOG__LEVEL", Some("debug")),
            ],
            || {
                let path = path.to_str().expect("utf-8 temp path");
                load_config_from(path).expect("load_config failed")
            },
        )
    });

    assert_eq!(cfg.broker.port, 9100);
    assert_eq!(cfg.messenger.stream_buffer, 5);
    assert_eq!(cfg.messenger.retry_interval_secs, 2);
    assert_eq!(cfg.log.level, "debug");
}

#[test]
#[serial]
fn test_invalid_value_is_an_error() {
    let result = in_temp_dir(|_| {
        temp_env::with_var("POPSUB__BROKER__PORT", Some("not-a-port"), load_config)
    });
    assert!(result.is_err());
}

#[test]
fn test_messenger_config_from_settings() {
    let settings = Settings::default();
    let config = crate::messenger::MessengerConfig::from(&settings.messenger);
    assert_eq!(config, crate::messenger::MessengerConfig::default());
}
