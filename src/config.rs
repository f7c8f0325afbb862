//! Configuration management for html-surgeon
//!
//! Stores settings in ~/.config/html-surgeon/config.json. The API key lives in
//! the system keychain (or the ANTHROPIC_API_KEY environment variable), never
//! in the config file.

use crate::error::PipelineError;
use crate::llm::Models;
use crate::map::MapOptions;
use crate::section_map::DEFAULT_LARGE_SECTION_LINES;
use crate::skeleton::SkeletonOptions;
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
const KEYRING_SERVICE: &str = "html-surgeon";
const KEYRING_USERNAME: &str = "anthropic_api_key";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub models: Models,
    /// Upper bound on a single model request, in seconds
    pub request_timeout_secs: u64,
    /// Retries on 429/5xx responses (0 = fail on the first error)
    pub max_retries: u32,
    pub skeleton: SkeletonOptions,
    pub large_section_lines: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            models: Models::default(),
            request_timeout_secs: 120,
            max_retries: 0,
            skeleton: SkeletonOptions::default(),
            large_section_lines: DEFAULT_LARGE_SECTION_LINES,
        }
    }
}

fn keyring_disabled() -> bool {
    if cfg!(test) {
        return true;
    }
    matches!(
        std::env::var("HTML_SURGEON_DISABLE_KEYRING")
            .unwrap_or_default()
            .to_lowercase()
            .as_str(),
        "1" | "true" | "yes"
    )
}

fn keyring_entry() -> Result<Entry, keyring::Error> {
    Entry::new(KEYRING_SERVICE, KEYRING_USERNAME)
}

fn read_keyring_key() -> Result<Option<String>, keyring::Error> {
    if keyring_disabled() {
        return Ok(None);
    }
    let entry = keyring_entry()?;
    match entry.get_password() {
        Ok(key) => Ok(Some(key)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(err) => Err(err),
    }
}

fn write_keyring_key(key: &str) -> Result<(), keyring::Error> {
    let entry = keyring_entry()?;
    entry.set_password(key)
}

impl Config {
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("html-surgeon"))
    }

    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from disk, or return default
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// A corrupt file is moved aside to `config.json.corrupt` and defaults are used.
    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(err) => {
                preserve_corrupt_config(path, &content);
                log::warn!(
                    "Config file was corrupted ({}). A backup was saved and defaults were loaded.",
                    err
                );
                Self::default()
            }
        }
    }

    /// Write the config file if none exists yet, so its settings can be edited
    /// by hand. Returns the path when a file was created.
    pub fn init_file(&self) -> Result<Option<PathBuf>, PipelineError> {
        let path = Self::config_path()
            .ok_or_else(|| PipelineError::Config("Could not determine config directory".into()))?;
        Ok(self.init_file_at(&path)?.then_some(path))
    }

    pub fn init_file_at(&self, path: &Path) -> Result<bool, PipelineError> {
        if path.exists() {
            return Ok(false);
        }
        self.save_to(path)?;
        Ok(true)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), PipelineError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| {
                PipelineError::Config(format!("Failed to create config directory: {}", e))
            })?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Err(e) = fs::set_permissions(dir, fs::Permissions::from_mode(0o700)) {
                    log::warn!("Failed to set config directory permissions: {}", e);
                }
            }
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| PipelineError::Config(format!("Failed to serialize config: {}", e)))?;
        write_config_atomic(path, &content)
            .map_err(|e| PipelineError::Config(format!("Failed to write config: {}", e)))
    }

    /// API key from the environment, then the system keychain
    pub fn get_api_key(&self) -> Option<String> {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                return Some(key.trim().to_string());
            }
        }

        match read_keyring_key() {
            Ok(key) => key,
            Err(err) => {
                log::warn!("Failed to read API key from system keychain: {}", err);
                log::warn!("Set the {} environment variable as a workaround.", API_KEY_ENV);
                None
            }
        }
    }

    /// Store the key in the keychain and verify it reads back.
    pub fn set_api_key(&self, key: &str) -> Result<(), PipelineError> {
        if let Err(write_err) = write_keyring_key(key) {
            return Err(PipelineError::Config(format!(
                "Failed to store API key in system keychain: {}. \
                 You can set the {} environment variable instead.",
                write_err, API_KEY_ENV
            )));
        }

        match read_keyring_key() {
            Ok(Some(stored)) if stored == key => Ok(()),
            Ok(_) => Err(PipelineError::Config(format!(
                "API key verification failed: key was not persisted to keychain. \
                 You can set the {} environment variable instead.",
                API_KEY_ENV
            ))),
            Err(read_err) => Err(PipelineError::Config(format!(
                "API key verification failed: couldn't read back from keychain ({})",
                read_err
            ))),
        }
    }

    /// Anthropic keys start with sk-ant-
    pub fn validate_api_key_format(key: &str) -> bool {
        key.starts_with("sk-ant-")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn map_options(&self) -> MapOptions {
        MapOptions {
            skeleton: self.skeleton.clone(),
            large_section_lines: self.large_section_lines,
        }
    }

    /// Get the config file location for display
    pub fn config_location() -> String {
        Self::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "~/.config/html-surgeon/config.json".to_string())
    }
}

/// Interactive prompt to set up the API key. Talks on stderr; stdout is
/// reserved for JSON reports.
pub fn setup_api_key_interactive() -> Result<String, PipelineError> {
    use std::io::{self, Write};

    eprintln!();
    eprintln!("  html-surgeon uses the Anthropic API for mapping and generation.");
    eprintln!("  1. Create a key at: https://console.anthropic.com/settings/keys");
    eprintln!("  2. Paste it below (saved in your system keychain)");
    eprintln!();
    eprint!("  API Key: ");
    io::stderr().flush()?;

    let mut key = String::new();
    io::stdin().read_line(&mut key)?;
    let key = key.trim().to_string();

    if key.is_empty() {
        return Err(PipelineError::Config("No API key provided".into()));
    }

    if !Config::validate_api_key_format(&key) {
        eprintln!("  Warning: Key doesn't look like an Anthropic key (should start with sk-ant-)");
        eprintln!("     Saving anyway...");
    }

    let config = Config::load();
    config.set_api_key(&key)?;
    eprintln!("  + API key saved to the system keychain");
    if let Some(path) = config.init_file()? {
        eprintln!("  + Default settings written to {}", path.display());
    }
    Ok(key)
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

fn write_config_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    use std::fs::OpenOptions;
    use std::io::Write;

    let tmp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = file.set_permissions(fs::Permissions::from_mode(0o600)) {
            log::warn!("Failed to set temp config file permissions: {}", e);
        }
    }

    file.write_all(content.as_bytes())?;

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}
