//! Integration tests for layered configuration loading.

use base64::{Engine as _, engine::general_purpose};
use marketsync::config::{ConfigError, ConfigLoader};
use std::{
    env, fs,
    sync::{Mutex, MutexGuard, OnceLock},
};
use tempfile::TempDir;

// Process environment is global; serialize tests that touch it.
fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn env_guard() -> MutexGuard<'static, ()> {
    env_lock()
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

const MANAGED_VARS: &[&str] = &[
    "MARKETSYNC_PROFILE",
    "MARKETSYNC_API_BIND_ADDR",
    "MARKETSYNC_LOG_LEVEL",
    "MARKETSYNC_CRYPTO_KEY",
    "MARKETSYNC_OPERATOR_TOKEN",
    "MARKETSYNC_OPERATOR_TOKENS",
    "MARKETSYNC_MARKETPLACE_API_BASE",
    "MARKETSYNC_QUEUE_LEASE_SECONDS",
    "MARKETSYNC_CHUNK_SIZE",
];

fn clear_env() {
    for var in MANAGED_VARS {
        unsafe {
            env::remove_var(var);
        }
    }
}

fn set_var(key: &str, value: &str) {
    unsafe {
        env::set_var(key, value);
    }
}

fn valid_key() -> String {
    general_purpose::STANDARD.encode([7u8; 32])
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    fs::write(dir.path().join(name), contents).expect("write env file");
}

#[test]
fn minimal_environment_yields_defaults() {
    let _guard = env_guard();
    clear_env();
    set_var("MARKETSYNC_CRYPTO_KEY", &valid_key());
    set_var("MARKETSYNC_OPERATOR_TOKEN", "op-token");

    let dir = TempDir::new().expect("tempdir");
    let config = ConfigLoader::with_base_dir(dir.path().to_path_buf())
        .load()
        .expect("load config");

    assert_eq!(config.profile, "local");
    assert_eq!(config.api_bind_addr, "0.0.0.0:8080");
    assert_eq!(config.operator_tokens, vec!["op-token".to_string()]);
    assert_eq!(config.queue.lease_seconds, 600);
    assert_eq!(config.queue.max_attempts, 3);
    assert_eq!(config.chunking.chunk_size, 100);
    assert_eq!(config.chunking.inline_threshold, 200);
    assert_eq!(config.batch.batch_size, 100);
    assert_eq!(config.batch.cb_threshold, 3);

    clear_env();
}

#[test]
fn profile_env_file_overrides_base_and_process_env_wins() {
    let _guard = env_guard();
    clear_env();
    set_var("MARKETSYNC_CRYPTO_KEY", &valid_key());
    set_var("MARKETSYNC_OPERATOR_TOKEN", "op-token");

    let dir = TempDir::new().expect("tempdir");
    write_env_file(
        &dir,
        ".env",
        "MARKETSYNC_PROFILE=test\nMARKETSYNC_LOG_LEVEL=warn\nMARKETSYNC_QUEUE_LEASE_SECONDS=300\n",
    );
    write_env_file(&dir, ".env.test", "MARKETSYNC_LOG_LEVEL=debug\n");

    set_var("MARKETSYNC_QUEUE_LEASE_SECONDS", "120");

    let config = ConfigLoader::with_base_dir(dir.path().to_path_buf())
        .load()
        .expect("load config");

    assert_eq!(config.profile, "test");
    // Profile file layers over the base file.
    assert_eq!(config.log_level, "debug");
    // Process environment layers over every file.
    assert_eq!(config.queue.lease_seconds, 120);

    clear_env();
}

#[test]
fn operator_token_list_is_split_and_trimmed() {
    let _guard = env_guard();
    clear_env();
    set_var("MARKETSYNC_CRYPTO_KEY", &valid_key());
    set_var("MARKETSYNC_OPERATOR_TOKENS", "alpha, beta ,,gamma");

    let dir = TempDir::new().expect("tempdir");
    let config = ConfigLoader::with_base_dir(dir.path().to_path_buf())
        .load()
        .expect("load config");

    assert_eq!(
        config.operator_tokens,
        vec!["alpha".to_string(), "beta".to_string(), "gamma".to_string()]
    );

    clear_env();
}

#[test]
fn missing_operator_tokens_is_rejected() {
    let _guard = env_guard();
    clear_env();
    set_var("MARKETSYNC_CRYPTO_KEY", &valid_key());

    let dir = TempDir::new().expect("tempdir");
    let error = ConfigLoader::with_base_dir(dir.path().to_path_buf())
        .load()
        .expect_err("config must not load");
    assert!(matches!(error, ConfigError::MissingOperatorTokens));

    clear_env();
}

#[test]
fn crypto_key_must_be_valid_base64_of_32_bytes() {
    let _guard = env_guard();
    clear_env();
    set_var("MARKETSYNC_OPERATOR_TOKEN", "op-token");

    let dir = TempDir::new().expect("tempdir");

    set_var("MARKETSYNC_CRYPTO_KEY", "not-base64!!!");
    let error = ConfigLoader::with_base_dir(dir.path().to_path_buf())
        .load()
        .expect_err("bad base64 must not load");
    assert!(matches!(error, ConfigError::InvalidCryptoKeyBase64 { .. }));

    set_var(
        "MARKETSYNC_CRYPTO_KEY",
        &general_purpose::STANDARD.encode([7u8; 16]),
    );
    let error = ConfigLoader::with_base_dir(dir.path().to_path_buf())
        .load()
        .expect_err("short key must not load");
    assert!(matches!(
        error,
        ConfigError::InvalidCryptoKeyLength { length: 16 }
    ));

    clear_env();
}
