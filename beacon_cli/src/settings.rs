use crate::error::CliError;
use libbeacon::constants::{DEFAULT_RELAY_LISTEN_ADDRESS, DEFAULT_RELAY_URL};
use log::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The settings file, `$HOME/.beacon/config.yml` by default.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Where client state (identity seed, peers, grants, accounts) is kept.
    pub storage_dir: PathBuf,
    /// The relay to pair and exchange messages through.
    pub relay_url: String,
    /// The address `beacon relay serve` binds to.
    pub relay_listen_address: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            storage_dir: beacon_home().join("storage"),
            relay_url: DEFAULT_RELAY_URL.to_string(),
            relay_listen_address: DEFAULT_RELAY_LISTEN_ADDRESS.to_string(),
        }
    }
}

impl Settings {
    pub fn try_load<P: AsRef<Path>>(path: P) -> Result<Self, CliError> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        Ok(serde_yml::from_reader(reader)?)
    }

    /// Loads the settings at `path`, falling back to the defaults if the file does not exist.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, CliError> {
        match Self::try_load(&path) {
            Ok(settings) => Ok(settings),
            Err(CliError::IoError(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings file at {}. Using defaults.", path.as_ref().display());
                Ok(Self::default())
            }
            Err(err) => Err(err),
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), CliError> {
        // Create directory path if required
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_yml::to_writer(writer, self)?;
        Ok(())
    }
}

fn beacon_home() -> PathBuf {
    let mut home = std::env::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.push(".beacon");
    home
}

pub fn default_settings_path() -> PathBuf {
    beacon_home().join("config.yml")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn missing_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_or_default(dir.path().join("config.yml")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.relay_url, DEFAULT_RELAY_URL);
    }

    #[test]
    fn saved_settings_load_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yml");
        let settings = Settings {
            storage_dir: dir.path().join("state"),
            relay_url: "ws://relay.example:7750".into(),
            relay_listen_address: "0.0.0.0:7750".into(),
        };
        settings.save(&path).unwrap();
        assert_eq!(Settings::try_load(&path).unwrap(), settings);
    }

    #[test]
    fn partial_files_fill_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(&path, "relay_url: ws://10.0.0.2:7750\n").unwrap();
        let settings = Settings::try_load(&path).unwrap();
        assert_eq!(settings.relay_url, "ws://10.0.0.2:7750");
        assert_eq!(settings.relay_listen_address, DEFAULT_RELAY_LISTEN_ADDRESS);
    }

    #[test]
    fn garbage_is_an_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(&path, "relay_url: [unclosed").unwrap();
        assert!(matches!(Settings::try_load(&path), Err(CliError::InvalidConfig(_))));
    }
}
