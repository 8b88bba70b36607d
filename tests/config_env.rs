// tests/config_env.rs
// Env-var driven config resolution. Serialized because process env is global.

use std::io::Write;

use serial_test::serial;

use immigration_monitor::classify::keywords::{KeywordGate, ENV_KEYWORDS_CONFIG_PATH};
use immigration_monitor::config::{AppConfig, ENV_CONFIG_PATH};
use immigration_monitor::{Category, Language, MethodMode};

fn write_temp(dir: &tempfile::TempDir, name: &str, content: &str) -> String {
    let path = dir.path().join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(content.as_bytes()).unwrap();
    path.to_string_lossy().into_owned()
}

#[test]
#[serial]
fn config_path_env_var_wins() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_temp(
        &dir,
        "monitor.toml",
        r#"
        method = "keywords"
        min_text_len = 5
        "#,
    );

    std::env::set_var(ENV_CONFIG_PATH, &path);
    let cfg = AppConfig::load_default().unwrap();
    std::env::remove_var(ENV_CONFIG_PATH);

    assert_eq!(cfg.method, MethodMode::Keywords);
    assert_eq!(cfg.min_text_len, 5);
}

#[test]
#[serial]
fn missing_config_file_behind_env_var_is_an_error() {
    std::env::set_var(ENV_CONFIG_PATH, "/nonexistent/monitor.toml");
    let err = AppConfig::load_default();
    std::env::remove_var(ENV_CONFIG_PATH);
    assert!(err.is_err());
}

#[test]
#[serial]
fn keyword_config_env_override_replaces_seed() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_temp(
        &dir,
        "keywords.toml",
        r#"
        [urgency]
        work = "low"

        [en]
        work = ["ead card"]
        "#,
    );

    std::env::set_var(ENV_KEYWORDS_CONFIG_PATH, &path);
    let gate = KeywordGate::load_default().unwrap();
    std::env::remove_var(ENV_KEYWORDS_CONFIG_PATH);

    let hit = gate
        .evaluate("waiting on my ead card renewal", Language::En)
        .expect("should match override term");
    assert_eq!(hit.category, Category::Work);
    // The seed's terms are gone entirely under an override file.
    assert!(gate.evaluate("my visa was denied", Language::En).is_none());
}

#[test]
#[serial]
fn api_key_env_indirection_resolves_when_enabled() {
    let cfg: AppConfig = toml::from_str(
        r#"
        [ai]
        enabled = true
        api_key = "ENV"
        "#,
    )
    .unwrap();

    std::env::set_var("ANTHROPIC_API_KEY", "sk-test-123");
    let key = cfg.ai.resolved_api_key().unwrap();
    std::env::remove_var("ANTHROPIC_API_KEY");
    assert_eq!(key, "sk-test-123");

    // Disabled AI never requires the env var.
    let cfg: AppConfig = toml::from_str("").unwrap();
    assert_eq!(cfg.ai.resolved_api_key().unwrap(), "");
}
