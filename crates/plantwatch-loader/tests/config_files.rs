//! Loader configuration files

use plantwatch_loader::{ConfigError, LoaderConfig, PlanError, TierLayout};
use pretty_assertions::assert_eq;
use std::io::Write;
use std::time::Duration;

#[test]
fn toml_config() {
    let config = LoaderConfig::from_toml_str(
        r#"
refresh_interval_secs = 60
event_capacity = 32

[layout]
tiers = [["alerts"], ["kpis", "weather"]]
"#,
    )
    .unwrap();

    assert_eq!(config.refresh_interval(), Duration::from_secs(60));
    assert_eq!(config.event_capacity, 32);
    assert_eq!(
        config.layout,
        TierLayout::new([vec!["alerts"], vec!["kpis", "weather"]])
    );
}

#[test]
fn yaml_config() {
    let config = LoaderConfig::from_yaml_str(
        "refresh_interval_secs: 120\nlayout:\n  tiers:\n    - [alerts, kpis]\n    - [heatmap]\n",
    )
    .unwrap();

    assert_eq!(config.refresh_interval(), Duration::from_secs(120));
    assert_eq!(config.event_capacity, 256);
    assert_eq!(config.layout.field_count(), 3);
}

#[test]
fn missing_keys_fall_back_to_defaults() {
    let config = LoaderConfig::from_toml_str("").unwrap();
    assert_eq!(config, LoaderConfig::default());
}

#[test]
fn unknown_key_rejected() {
    let err = LoaderConfig::from_toml_str("refresh_secs = 10").unwrap_err();
    assert!(matches!(err, ConfigError::Toml(_)));
}

#[test]
fn duplicate_field_in_layout_rejected() {
    let err = LoaderConfig::from_yaml_str("layout:\n  tiers:\n    - [alerts]\n    - [alerts]\n")
        .unwrap_err();
    assert!(matches!(
        err,
        ConfigError::Layout(PlanError::DuplicateField { .. })
    ));
}

#[test]
fn load_from_files() {
    let dir = tempfile::tempdir().unwrap();

    let toml_path = dir.path().join("loader.toml");
    std::fs::write(&toml_path, "refresh_interval_secs = 30\n").unwrap();
    let config = LoaderConfig::load(&toml_path).unwrap();
    assert_eq!(config.refresh_interval_secs, 30);

    let yaml_path = dir.path().join("loader.yml");
    let mut file = std::fs::File::create(&yaml_path).unwrap();
    writeln!(file, "event_capacity: 8").unwrap();
    drop(file);
    let config = LoaderConfig::load(&yaml_path).unwrap();
    assert_eq!(config.event_capacity, 8);
}

#[test]
fn unsupported_extension() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("loader.json");
    std::fs::write(&path, "{}").unwrap();

    let err = LoaderConfig::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::UnsupportedFormat(p) if p == path));
}

#[test]
fn missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = LoaderConfig::load(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
    assert!(err.to_string().contains("absent.toml"));
}
