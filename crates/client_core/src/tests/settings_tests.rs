use super::*;

fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn defaults_apply_without_sources() {
    let settings = SyncSettings::load_from(None, env(&[])).expect("settings");
    assert_eq!(settings, SyncSettings::default());
    assert_eq!(settings.debounce(), Duration::from_millis(300));
}

#[test]
fn file_then_env_override_defaults() {
    let settings = SyncSettings::load_from(
        Some("server_url = \"http://10.0.0.2:9000\"\ndebounce_ms = 50\nretry_attempts = 5\n"),
        env(&[("NODESYNC__RETRY_ATTEMPTS", "2"), ("NODESYNC__RETRY_BASE_DELAY_MS", "10")]),
    )
    .expect("settings");
    assert_eq!(settings.server_url, "http://10.0.0.2:9000");
    assert_eq!(settings.debounce_ms, 50);
    assert_eq!(settings.retry_attempts, 2);
    assert_eq!(settings.retry_base_delay_ms, 10);
}

#[test]
fn unrelated_env_is_ignored() {
    let settings =
        SyncSettings::load_from(None, env(&[("OTHER__DEBOUNCE_MS", "1")])).expect("settings");
    assert_eq!(settings.debounce_ms, 300);
}

#[test]
fn malformed_numbers_are_rejected() {
    let result = SyncSettings::load_from(Some("debounce_ms = \"soon\"\n"), env(&[]));
    assert!(result.is_err());
}

#[test]
fn retry_policy_never_has_zero_attempts() {
    let settings = SyncSettings {
        retry_attempts: 0,
        ..SyncSettings::default()
    };
    assert_eq!(settings.retry_policy().attempts(), 1);
}
