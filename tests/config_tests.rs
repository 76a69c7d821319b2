use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tailbeat::config::{generate::generate_starter_config, load_config, OutputKind};
use tempfile::TempDir;

#[test]
fn test_generated_config_is_valid() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");

    fs::write(&config_path, generate_starter_config()).unwrap();

    let config = load_config(&config_path).expect("Generated config should be valid");
    assert_eq!(config.tailbeat.prospectors.len(), 1);
    assert_eq!(config.tailbeat.spool_size, 1024);
    assert!(matches!(config.output.kind, OutputKind::Console));
}

#[test]
fn test_minimal_config_gets_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");

    fs::write(
        &config_path,
        r#"
tailbeat:
  prospectors:
    - paths: ["/var/log/*.log"]
"#,
    )
    .unwrap();

    let config = load_config(&config_path).unwrap();
    let prospector = &config.tailbeat.prospectors[0];
    assert_eq!(prospector.ignore_older, Duration::from_secs(24 * 3600));
    assert_eq!(prospector.scan_frequency, Duration::from_secs(10));
    assert_eq!(prospector.harvester.buffer_size, 16384);
    assert_eq!(prospector.harvester.backoff, Duration::from_secs(1));
    assert_eq!(prospector.harvester.backoff_factor, 2);
    assert_eq!(prospector.harvester.max_backoff, Duration::from_secs(10));
    assert_eq!(config.tailbeat.registry_file, PathBuf::from(".tailbeat"));
    assert_eq!(config.tailbeat.idle_timeout, Duration::from_secs(5));
}

#[test]
fn test_config_dir_prospectors_merged() {
    let temp_dir = TempDir::new().unwrap();
    let conf_d = temp_dir.path().join("conf.d");
    fs::create_dir(&conf_d).unwrap();

    fs::write(
        conf_d.join("10-nginx.yml"),
        r#"
tailbeat:
  prospectors:
    - paths: ["/var/log/nginx/*.log"]
      document_type: nginx
"#,
    )
    .unwrap();
    fs::write(conf_d.join("README.txt"), "not a config").unwrap();

    let config_path = temp_dir.path().join("config.yml");
    fs::write(
        &config_path,
        format!(
            r#"
tailbeat:
  prospectors:
    - paths: ["/var/log/app/*.log"]
  config_dir: {}
"#,
            conf_d.display()
        ),
    )
    .unwrap();

    let config = load_config(&config_path).unwrap();
    let prospectors = &config.tailbeat.prospectors;
    assert_eq!(prospectors.len(), 2);
    assert_eq!(prospectors[0].paths, vec!["/var/log/app/*.log"]);
    assert_eq!(prospectors[1].harvester.document_type, "nginx");
}

#[test]
fn test_env_var_expansion() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");

    std::env::set_var("TAILBEAT_TEST_LOG_DIR", "/srv/logs");
    fs::write(
        &config_path,
        r#"
tailbeat:
  prospectors:
    - paths: ["$env{TAILBEAT_TEST_LOG_DIR}/*.log"]
"#,
    )
    .unwrap();

    let config = load_config(&config_path).unwrap();
    assert_eq!(config.tailbeat.prospectors[0].paths, vec!["/srv/logs/*.log"]);
}

#[test]
fn test_unset_env_var_reported() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");

    fs::write(
        &config_path,
        r#"
tailbeat:
  prospectors:
    - paths: ["$env{TAILBEAT_TEST_DEFINITELY_UNSET}/*.log"]
"#,
    )
    .unwrap();

    let err = load_config(&config_path).unwrap_err().to_string();
    assert!(err.contains("TAILBEAT_TEST_DEFINITELY_UNSET"));
}

#[test]
fn test_stdin_path_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");

    fs::write(
        &config_path,
        r#"
tailbeat:
  prospectors:
    - paths: ["-"]
"#,
    )
    .unwrap();

    assert!(load_config(&config_path).is_err());
}

#[test]
fn test_invalid_backoff_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");

    fs::write(
        &config_path,
        r#"
tailbeat:
  prospectors:
    - paths: ["/var/log/*.log"]
      backoff_factor: 0
      backoff: 5s
      max_backoff: 1s
"#,
    )
    .unwrap();

    let err = load_config(&config_path).unwrap_err().to_string();
    assert!(err.contains("backoff_factor"));
    assert!(err.contains("max_backoff"));
}

#[test]
fn test_missing_file_is_io_error() {
    let temp_dir = TempDir::new().unwrap();
    let err = load_config(&temp_dir.path().join("nope.yml")).unwrap_err();
    assert!(matches!(err, tailbeat::config::ConfigError::Io(_)));
}

#[test]
fn test_file_output_path_tilde_expanded() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");

    fs::write(
        &config_path,
        r#"
tailbeat:
  prospectors:
    - paths: ["/var/log/*.log"]
output:
  type: file
  path: ~/tailbeat/out.json
  publish_mode: fire_and_forget
"#,
    )
    .unwrap();

    let config = load_config(&config_path).unwrap();
    match config.output.kind {
        OutputKind::File { path } => {
            if let Some(home) = dirs::home_dir() {
                assert_eq!(path, home.join("tailbeat/out.json"));
            }
        }
        other => panic!("expected file output, got {:?}", other),
    }
}
