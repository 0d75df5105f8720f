use std::{
    env::{self, VarError},
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use humantime::parse_duration;
use serde::{Deserialize, Deserializer};

use crate::error::{Error, Result};

pub const ENV_VAR_CONFIG: &str = "GDRIVE_BACKUP_CONFIG";

const APP_DIR: &str = "gdrive-backup";
const CONFIG_FILENAME: &str = "config.yml";
const TOKEN_FILENAME: &str = "token.json";

pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_DELETE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub folders_for_backup: Vec<PathBuf>,

    /// Drive folder that receives uploads, or the Drive root if unset
    pub google_drive_backup_folder_id: Option<String>,

    /// Folder names skipped anywhere in a backed-up tree
    #[serde(default)]
    pub exclude_folder_names: Vec<String>,

    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub token_path: Option<PathBuf>,
    pub temp_dir: Option<PathBuf>,
    pub jobs: Option<usize>,
    pub compression_level: Option<i32>,

    #[serde(default, deserialize_with = "deserialize_duration")]
    pub upload_timeout: Option<Duration>,

    #[serde(default, deserialize_with = "deserialize_duration")]
    pub delete_timeout: Option<Duration>,

    /// Every run appends its log here, rotated once it reaches 20 MB
    pub log_file: Option<PathBuf>,
}

impl Config {
    /// Loads the config from `path`, or from the default location if `None`.
    /// A missing file at the default location is an empty config.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path.to_owned(), true),
            None => match get_env_var(ENV_VAR_CONFIG)? {
                Some(path) => (PathBuf::from(path), true),
                None => (default_config_path()?, false),
            },
        };

        match std::fs::read_to_string(&path) {
            Ok(text) => Self::parse(&text),
            Err(err) if err.kind() == io::ErrorKind::NotFound && !explicit => {
                Ok(Config::default())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(Error::ConfigNotFound(path)),
            Err(err) => Err(err.into()),
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Config::default());
        }

        let config: Config = serde_yaml::from_str(text)?;
        if let Some(level) = config.compression_level {
            if !(1..=19).contains(&level) {
                return Err(Error::InvalidConfig(format!(
                    "compression_level {level} is not in range 1-19"
                )));
            }
        }

        if config.jobs == Some(0) {
            return Err(Error::InvalidConfig("jobs must be at least 1".to_owned()));
        }

        Ok(config)
    }

    pub fn token_path(&self) -> Result<PathBuf> {
        match &self.token_path {
            Some(path) => Ok(path.clone()),
            None => Ok(app_dir()?.join(TOKEN_FILENAME)),
        }
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(env::temp_dir)
    }

    pub fn compression_level(&self) -> i32 {
        self.compression_level.unwrap_or(DEFAULT_COMPRESSION_LEVEL)
    }

    pub fn upload_timeout(&self) -> Duration {
        self.upload_timeout.unwrap_or(DEFAULT_UPLOAD_TIMEOUT)
    }

    pub fn delete_timeout(&self) -> Duration {
        self.delete_timeout.unwrap_or(DEFAULT_DELETE_TIMEOUT)
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(app_dir()?.join(CONFIG_FILENAME))
}

fn app_dir() -> Result<PathBuf> {
    let base = dirs::config_dir()
        .ok_or_else(|| Error::InvalidConfig("no config directory for this user".to_owned()))?;
    Ok(base.join(APP_DIR))
}

fn deserialize_duration<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<Duration>, D::Error> {
    let Some(text) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };

    parse_duration(&text)
        .map(Some)
        .map_err(serde::de::Error::custom)
}

fn get_env_var(name: &str) -> Result<Option<String>> {
    match env::var(name) {
        Ok(value) => Ok(Some(value)),
        Err(VarError::NotPresent) => Ok(None),
        Err(err) => Err(Error::InvalidConfig(format!("`{name}`: {err}"))),
    }
}
