use crate::domain::models::DeviceDescriptor;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable pointing at an explicit settings file
pub const SETTINGS_PATH_ENV: &str = "HXM_MONITOR_SETTINGS";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_true")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_true(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "hxm_monitor".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// How to choose between several bonded devices matching the name prefix
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// First match in enumeration order
    #[default]
    FirstMatch,
    /// Match with the lexically smallest address, stable across runs
    LowestAddress,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Device discovery
    #[serde(default = "default_device_name_prefix")]
    pub device_name_prefix: String,
    #[serde(default)]
    pub selection_policy: SelectionPolicy,
    /// Devices paired at the OS level, e.g. an HxM bound to /dev/rfcomm0
    #[serde(default)]
    pub bonded_devices: Vec<DeviceDescriptor>,

    // Connection
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_false")]
    pub auto_reconnect: bool,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    // Debug Settings
    #[serde(default = "default_false")]
    pub log_frame_dump: bool,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device_name_prefix: default_device_name_prefix(),
            selection_policy: SelectionPolicy::default(),
            bonded_devices: Vec::new(),
            connect_timeout_ms: default_connect_timeout_ms(),
            auto_reconnect: false,
            reconnect_delay_ms: default_reconnect_delay_ms(),
            log_frame_dump: false,
            log_settings: LogSettings::default(),
        }
    }
}

impl Settings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

fn default_device_name_prefix() -> String {
    "HXM".to_string()
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_reconnect_delay_ms() -> u64 {
    5_000
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Load settings from `$HXM_MONITOR_SETTINGS` or the user config
    /// directory, falling back to defaults when the file is missing or bad.
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = match std::env::var_os(SETTINGS_PATH_ENV) {
            Some(path) => PathBuf::from(path),
            None => Self::get_settings_path()?,
        };
        let service = Self::from_path(settings_path);
        if let Err(e) = service.ensure_saved() {
            eprintln!(
                "Could not write settings template ({}): {}",
                service.settings_path.display(),
                e
            );
        }
        Ok(service)
    }

    pub fn from_path(settings_path: impl Into<PathBuf>) -> Self {
        let settings_path = settings_path.into();
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                // Logging is not up yet at this point
                eprintln!(
                    "Using default settings ({}): {}",
                    settings_path.display(),
                    e
                );
                Settings::default()
            }
        };

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("HxmMonitor");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    /// Write the settings out if the file does not exist yet, leaving a
    /// template to list bonded devices in
    pub fn ensure_saved(&self) -> anyhow::Result<()> {
        if !self.settings_path.exists() {
            self.save()?;
        }
        Ok(())
    }
}
