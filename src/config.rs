use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::error::EyeDbError;

pub static CONFIG: OnceCell<Config> = OnceCell::new();

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    pub eyedb: String,
}

impl LoggingConfig {
    const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
    const EYEDB_LEVEL: &str = "info";

    fn default() -> Self {
        LoggingConfig {
            eyedb: Self::EYEDB_LEVEL.to_string(),
        }
    }

    fn ensure_valid(&mut self) {
        let str_original = self.eyedb.clone();
        self.eyedb = self.eyedb.trim().to_ascii_lowercase();
        if !Self::LOG_LEVELS.contains(&self.eyedb.as_str()) {
            eprintln!(
                "Config error: eyedb log level of '{}' is invalid - using default of '{}'",
                str_original,
                Self::EYEDB_LEVEL
            );
            self.eyedb = Self::EYEDB_LEVEL.to_owned();
        }
    }

    /// Log specification handed to flexi_logger. Only our own crate logs at
    /// the configured level; everything else stays at warn.
    pub fn log_spec(&self) -> String {
        format!("warn,eyedb={}", self.eyedb)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    /// Explicit database file. When unset, `candidates` are probed in order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub candidates: Vec<String>,
}

impl DatabaseConfig {
    const DEFAULT_CANDIDATES: [&str; 2] = [
        "src-tauri/resources/eye_tracking.db",
        "src-tauri/target/debug/resources/eye_tracking.db",
    ];

    fn default() -> Self {
        DatabaseConfig {
            path: None,
            candidates: Self::DEFAULT_CANDIDATES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    fn ensure_valid(&mut self) {
        if let Some(path) = &self.path {
            if path.trim().is_empty() {
                self.path = None;
            }
        }
        self.candidates.retain(|c| !c.trim().is_empty());
        if self.candidates.is_empty() {
            eprintln!("Config error: database candidates list is empty - using defaults");
            self.candidates = Self::default().candidates;
        }
    }

    /// Resolves the database file to operate on.
    ///
    /// Precedence: the command-line override, then the configured `path`,
    /// then the first candidate that exists on disk. A missing file is
    /// reported as `NotFound` before any connection is opened.
    pub fn resolve(&self, override_path: Option<&Path>) -> Result<PathBuf, EyeDbError> {
        let explicit = override_path
            .map(Path::to_path_buf)
            .or_else(|| self.path.as_ref().map(PathBuf::from));

        if let Some(path) = explicit {
            return if path.is_file() {
                Ok(path)
            } else {
                Err(EyeDbError::NotFound(path))
            };
        }

        self.candidates
            .iter()
            .map(PathBuf::from)
            .find(|p| p.is_file())
            .ok_or_else(|| {
                EyeDbError::NotFound(PathBuf::from(
                    self.candidates.first().map(String::as_str).unwrap_or_default(),
                ))
            })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PurgeConfig {
    pub sample_limit: usize,
}

impl PurgeConfig {
    const SAMPLE_LIMIT: usize = 100;

    fn default() -> Self {
        PurgeConfig {
            sample_limit: Self::SAMPLE_LIMIT,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ParticipantsConfig {
    pub source_table: String,
    pub source_column: String,
    pub non_qac: Vec<String>,
}

impl ParticipantsConfig {
    const SOURCE_TABLE: &str = "gaze_data";
    const SOURCE_COLUMN: &str = "Participant name";

    fn default() -> Self {
        ParticipantsConfig {
            source_table: Self::SOURCE_TABLE.to_owned(),
            source_column: Self::SOURCE_COLUMN.to_owned(),
            non_qac: (311..=320).map(|i| format!("TLK{}", i)).collect(),
        }
    }

    fn ensure_valid(&mut self) {
        if self.source_table.trim().is_empty() {
            eprintln!(
                "Config error: participants source_table is empty - using default of '{}'",
                Self::SOURCE_TABLE
            );
            self.source_table = Self::SOURCE_TABLE.to_owned();
        }
        if self.source_column.trim().is_empty() {
            eprintln!(
                "Config error: participants source_column is empty - using default of '{}'",
                Self::SOURCE_COLUMN
            );
            self.source_column = Self::SOURCE_COLUMN.to_owned();
        }
        self.non_qac = self
            .non_qac
            .iter()
            .map(|p| p.trim().to_owned())
            .filter(|p| !p.is_empty())
            .collect();
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
    pub purge: PurgeConfig,
    pub participants: ParticipantsConfig,
}

impl Config {
    const ENV_PREFIX: &str = "EYEDB_";

    pub fn default_config() -> Self {
        Config {
            logging: LoggingConfig::default(),
            database: DatabaseConfig::default(),
            purge: PurgeConfig::default(),
            participants: ParticipantsConfig::default(),
        }
    }

    /// Returns the process-wide configuration, falling back to defaults when
    /// `load_config` was never called (tests, early failures).
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(Config::default_config)
    }

    /// Loads the configuration from a TOML file located in the app's data directory.
    /// If the file is missing or fails to parse, defaults are used.
    /// Additionally, writes the default config to disk if no file exists.
    pub fn load_config(project_dirs: &ProjectDirs) -> Self {
        let config_path = project_dirs.data_local_dir().join("config.toml");
        Self::load_from_path(&config_path)
    }

    fn load_from_path(config_path: &Path) -> Self {
        let default_config = Self::default_config();

        // If the config file doesn't exist, write the default configuration to disk.
        if !config_path.exists() {
            if let Some(parent) = config_path.parent() {
                if let Err(e) = fs::create_dir_all(parent) {
                    eprintln!(
                        "Failed to create configuration directory {}: {}",
                        parent.display(),
                        e
                    );
                }
            }
            if let Ok(toml_string) = toml::to_string_pretty(&default_config) {
                if let Err(e) = fs::write(config_path, toml_string) {
                    eprintln!(
                        "Failed to write default config to {}: {}",
                        config_path.display(),
                        e
                    );
                }
            } else {
                eprintln!("Failed to serialize default config.");
            }
        }

        // Defaults, then the TOML file, then EYEDB_* environment variables
        let figment = Figment::from(Serialized::defaults(default_config.clone()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed(Self::ENV_PREFIX).split("__"));

        let mut config = figment.extract().unwrap_or_else(|err| {
            eprintln!(
                "Could not load config file {}: {}. Using default configuration.",
                config_path.display(),
                err
            );
            default_config
        });

        config.ensure_valid();

        config
    }

    fn ensure_valid(&mut self) {
        self.logging.ensure_valid();
        self.database.ensure_valid();
        self.participants.ensure_valid();
    }
}
