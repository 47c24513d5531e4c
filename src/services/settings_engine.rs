// Tidymarks Settings Engine
// Loads, validates and persists EngineSettings as a JSON file in the platform config directory.
// Individual values are addressed with dot-notation keys such as "search.cache_capacity".

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::platform;
use crate::types::errors::SettingsError;
use crate::types::settings::EngineSettings;

/// Trait defining the settings engine interface.
pub trait SettingsEngineTrait {
    fn load(&mut self) -> Result<EngineSettings, SettingsError>;
    fn save(&self) -> Result<(), SettingsError>;
    fn get_settings(&self) -> &EngineSettings;
    fn get_value(&self, key: &str) -> Result<serde_json::Value, SettingsError>;
    fn set_value(&mut self, key: &str, value: serde_json::Value) -> Result<(), SettingsError>;
    fn reset(&mut self) -> Result<(), SettingsError>;
    fn get_config_path(&self) -> &str;
}

/// Rejects combinations the engine cannot run with.
pub fn validate(settings: &EngineSettings) -> Result<(), SettingsError> {
    if settings.reconcile.batch_size == 0 {
        return Err(SettingsError::InvalidValue(
            "reconcile.batch_size must be at least 1".to_string(),
        ));
    }
    if settings.storage.batch_size == Some(0) {
        return Err(SettingsError::InvalidValue(
            "storage.batch_size must be at least 1 when set".to_string(),
        ));
    }
    if settings.storage.init_timeout_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "storage.init_timeout_ms must be positive".to_string(),
        ));
    }
    if settings.search.default_limit == 0 {
        return Err(SettingsError::InvalidValue(
            "search.default_limit must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Settings engine that persists [`EngineSettings`] as JSON on disk.
pub struct SettingsEngine {
    config_path: String,
    settings: EngineSettings,
}

impl SettingsEngine {
    /// Creates a new SettingsEngine.
    ///
    /// `path_override` replaces the default `<config dir>/settings.json`.
    pub fn new(path_override: Option<String>) -> Self {
        let config_path = path_override.unwrap_or_else(|| {
            platform::get_config_dir()
                .join("settings.json")
                .to_string_lossy()
                .to_string()
        });

        Self {
            config_path,
            settings: EngineSettings::default(),
        }
    }

    /// Settings held in memory only, for callers that never touch disk.
    pub fn with_settings(config_path: String, settings: EngineSettings) -> Self {
        Self {
            config_path,
            settings,
        }
    }

    fn to_json(&self) -> Result<serde_json::Value, SettingsError> {
        serde_json::to_value(&self.settings).map_err(|e| {
            SettingsError::SerializationError(format!("Failed to serialize settings: {}", e))
        })
    }
}

/// Walks a dot-notation key through nested JSON objects.
fn lookup_mut<'v>(root: &'v mut serde_json::Value, key: &str) -> Result<&'v mut serde_json::Value, SettingsError> {
    if key.is_empty() {
        return Err(SettingsError::InvalidKey("Key cannot be empty".to_string()));
    }
    let mut current = root;
    for part in key.split('.') {
        current = current
            .as_object_mut()
            .ok_or_else(|| {
                SettingsError::InvalidKey(format!(
                    "Cannot navigate to key '{}': intermediate value is not an object",
                    key
                ))
            })?
            .get_mut(part)
            .ok_or_else(|| SettingsError::InvalidKey(format!("Key '{}' not found in settings", key)))?;
    }
    Ok(current)
}

impl SettingsEngineTrait for SettingsEngine {
    /// Loads settings from the JSON config file.
    ///
    /// A missing file yields defaults. Missing keys inside an existing file
    /// take their default values; malformed JSON is an error.
    fn load(&mut self) -> Result<EngineSettings, SettingsError> {
        let path = Path::new(&self.config_path);

        if !path.exists() {
            debug!(path = %self.config_path, "no settings file, using defaults");
            self.settings = EngineSettings::default();
            return Ok(self.settings.clone());
        }

        let content = fs::read_to_string(path)
            .map_err(|e| SettingsError::IoError(format!("Failed to read config file: {}", e)))?;

        let settings: EngineSettings = serde_json::from_str(&content).map_err(|e| {
            SettingsError::SerializationError(format!("Failed to parse config file: {}", e))
        })?;
        validate(&settings)?;

        self.settings = settings;
        Ok(self.settings.clone())
    }

    /// Writes the current settings, creating parent directories as needed.
    fn save(&self) -> Result<(), SettingsError> {
        let path = Path::new(&self.config_path);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                SettingsError::IoError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let json = serde_json::to_string_pretty(&self.settings).map_err(|e| {
            SettingsError::SerializationError(format!("Failed to serialize settings: {}", e))
        })?;

        fs::write(path, json)
            .map_err(|e| SettingsError::IoError(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    fn get_settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Reads one value by dot-notation key, e.g. `"storage.write_retries"`.
    fn get_value(&self, key: &str) -> Result<serde_json::Value, SettingsError> {
        let mut json_value = self.to_json()?;
        Ok(lookup_mut(&mut json_value, key)?.take())
    }

    /// Updates one value by dot-notation key and persists the result.
    ///
    /// The new value must deserialize into the field's type and the resulting
    /// settings must pass [`validate`]; otherwise nothing changes.
    fn set_value(&mut self, key: &str, value: serde_json::Value) -> Result<(), SettingsError> {
        let mut json_value = self.to_json()?;
        *lookup_mut(&mut json_value, key)? = value;

        let new_settings: EngineSettings = serde_json::from_value(json_value).map_err(|e| {
            SettingsError::InvalidValue(format!("Invalid value for key '{}': {}", key, e))
        })?;
        if let Err(err) = validate(&new_settings) {
            warn!(key, error = %err, "rejected settings change");
            return Err(err);
        }

        self.settings = new_settings;
        self.save()?;
        Ok(())
    }

    /// Resets all settings to defaults and saves to disk.
    fn reset(&mut self) -> Result<(), SettingsError> {
        self.settings = EngineSettings::default();
        self.save()?;
        Ok(())
    }

    fn get_config_path(&self) -> &str {
        &self.config_path
    }
}
