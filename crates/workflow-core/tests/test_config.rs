use std::io::Write;
use workflow_core::config::{EngineConfig, EngineOptions};

#[test]
fn test_parse_full_config() {
    let json = r#"{
        "database": {
            "url": "sqlite://workflow.db?mode=rwc",
            "max_connections": 2,
            "auto_migrate": false
        },
        "engine": {
            "default_title": "Approval of {type_name}"
        },
        "log_level": "debug"
    }"#;

    let config = EngineConfig::from_json_str(json).expect("Failed to parse config");

    assert_eq!(config.database.url, "sqlite://workflow.db?mode=rwc");
    assert_eq!(config.database.max_connections, 2);
    assert!(!config.database.auto_migrate);
    assert_eq!(config.engine.render_title("Leave"), "Approval of Leave");
    assert_eq!(config.log_level, "debug");
}

#[test]
fn test_parse_minimal_config() {
    let json = r#"{ "database": { "url": "sqlite::memory:" } }"#;

    let config = EngineConfig::from_json_str(json).expect("Failed to parse minimal config");

    assert_eq!(config.database.max_connections, 5, "Default pool size");
    assert!(config.database.auto_migrate, "Migrations run by default");
    assert_eq!(config.engine, EngineOptions::default(), "Default engine options");
    assert_eq!(config.log_level, "info", "Default log level");
}

#[test]
fn test_validate_config() {
    let result = EngineConfig::from_json_str(r#"{ "database": { "url": "  " } }"#);
    assert!(result.is_err(), "Parsing should fail with an empty database URL");
    assert!(
        result.unwrap_err().to_string().contains("required"),
        "Error should mention required fields"
    );

    let result = EngineConfig::from_json_str(
        r#"{ "database": { "url": "sqlite::memory:", "max_connections": 0 } }"#,
    );
    assert!(result.is_err(), "A pool without connections is rejected");

    let result = EngineConfig::from_json_str(
        r#"{
            "database": { "url": "sqlite::memory:" },
            "engine": { "default_title": "Approval" }
        }"#,
    );
    assert!(
        result.unwrap_err().to_string().contains("{type_name}"),
        "Title needs the type placeholder"
    );
}

#[test]
fn test_missing_database_section() {
    let result = EngineConfig::from_json_str(r#"{ "log_level": "warn" }"#);
    assert!(result.is_err(), "The database section is mandatory");
}

#[test]
fn test_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{ "database": {{ "url": "sqlite://from-file.db" }} }}"#).unwrap();

    let config = EngineConfig::from_file(file.path()).expect("Failed to read config file");
    assert_eq!(config.database.url, "sqlite://from-file.db");

    let missing = EngineConfig::from_file(file.path().with_extension("missing"));
    assert!(missing.unwrap_err().to_string().contains("Failed to read config file"));
}

#[test]
fn test_load_with_environment_override() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("workflow.json");
    std::fs::write(
        &path,
        r#"{ "database": { "url": "sqlite://layered.db", "max_connections": 3 } }"#,
    )
    .unwrap();

    std::env::set_var("WORKFLOW__DATABASE__MAX_CONNECTIONS", "9");
    let config = EngineConfig::load(&path);
    std::env::remove_var("WORKFLOW__DATABASE__MAX_CONNECTIONS");

    let config = config.expect("Failed to load layered config");
    assert_eq!(config.database.url, "sqlite://layered.db");
    assert_eq!(config.database.max_connections, 9, "Environment wins over the file");
    assert_eq!(config.engine, EngineOptions::default());
}
