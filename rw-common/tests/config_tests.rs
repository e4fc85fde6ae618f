//! Configuration loading and database path resolution
//!
//! Uses serial_test because several tests manipulate RW_DATABASE.

use rw_common::config::{resolve_database_path, TomlConfig, DATABASE_FILE_NAME};
use serial_test::serial;
use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};

const ENV_VAR: &str = "RW_TEST_DATABASE";

#[test]
fn test_parse_full_config() {
    let config = TomlConfig::parse(
        r#"
        database = "/srv/rainwave/rainwave.db"
        event_capacity = 256
        stations = [1, 2, 5]
        tick_secs = 15
        "#,
    )
    .unwrap();

    assert_eq!(config.database, Some(PathBuf::from("/srv/rainwave/rainwave.db")));
    assert_eq!(config.event_capacity, Some(256));
    assert_eq!(config.stations, vec![1, 2, 5]);
    assert_eq!(config.tick_secs, Some(15));
}

#[test]
fn test_parse_empty_config_uses_defaults() {
    let config = TomlConfig::parse("").unwrap();
    assert!(config.database.is_none());
    assert!(config.stations.is_empty());
}

#[test]
fn test_parse_invalid_config_is_error() {
    assert!(TomlConfig::parse("stations = \"all of them\"").is_err());
}

#[test]
fn test_load_or_default_with_missing_file() {
    let config = TomlConfig::load_or_default(Some(Path::new("/nonexistent/rainwave.toml")));
    assert!(config.database.is_none());
}

#[test]
fn test_load_or_default_reads_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "stations = [3]").unwrap();

    let config = TomlConfig::load_or_default(Some(file.path()));
    assert_eq!(config.stations, vec![3]);
}

#[test]
#[serial]
fn test_cli_argument_has_highest_priority() {
    env::set_var(ENV_VAR, "/tmp/rw-env.db");
    let toml = TomlConfig {
        database: Some(PathBuf::from("/tmp/rw-toml.db")),
        ..Default::default()
    };

    let path = resolve_database_path(Some(Path::new("/tmp/rw-cli.db")), ENV_VAR, &toml);
    assert_eq!(path, PathBuf::from("/tmp/rw-cli.db"));

    env::remove_var(ENV_VAR);
}

#[test]
#[serial]
fn test_env_var_beats_toml() {
    env::set_var(ENV_VAR, "/tmp/rw-env.db");
    let toml = TomlConfig {
        database: Some(PathBuf::from("/tmp/rw-toml.db")),
        ..Default::default()
    };

    let path = resolve_database_path(None, ENV_VAR, &toml);
    assert_eq!(path, PathBuf::from("/tmp/rw-env.db"));

    env::remove_var(ENV_VAR);
}

#[test]
#[serial]
fn test_toml_beats_default() {
    env::remove_var(ENV_VAR);
    let toml = TomlConfig {
        database: Some(PathBuf::from("/tmp/rw-toml.db")),
        ..Default::default()
    };

    let path = resolve_database_path(None, ENV_VAR, &toml);
    assert_eq!(path, PathBuf::from("/tmp/rw-toml.db"));
}

#[test]
#[serial]
fn test_default_path_ends_with_database_file() {
    env::remove_var(ENV_VAR);

    let path = resolve_database_path(None, ENV_VAR, &TomlConfig::default());
    assert!(path.ends_with(DATABASE_FILE_NAME));
}
