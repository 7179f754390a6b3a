//! Queue configuration and loading it from disk.
use std::path::{Path, PathBuf};
use std::time::Duration;

use envconfig::Envconfig;
use serde::{de::DeserializeOwned, Deserialize};
use thiserror::Error;

/// Default capacity of the add request queue.
pub const DEFAULT_ADD_CAPACITY: usize = 10_000;

/// Default capacity of the remove request queue.
pub const DEFAULT_REMOVE_CAPACITY: usize = 100;

/// Configuration for a `DelayQueue`.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// How many add requests may be waiting before `push` blocks.
    pub add_capacity: usize,

    /// How many remove requests may be waiting before `delete` blocks.
    pub remove_capacity: usize,

    /// Forget unmatched cancellations after this many seconds.
    ///
    /// If not set, they are kept until a matching task fires.
    pub cancellation_ttl_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            add_capacity: DEFAULT_ADD_CAPACITY,
            remove_capacity: DEFAULT_REMOVE_CAPACITY,
            cancellation_ttl_secs: None,
        }
    }
}

impl Config {
    /// The time to live for unmatched cancellations.
    #[must_use]
    pub fn cancellation_ttl(&self) -> Option<Duration> {
        self.cancellation_ttl_secs.map(Duration::from_secs)
    }
}

/// Where to find the configuration.
#[derive(Envconfig)]
pub struct Environment {
    /// Path of the YAML config file.
    #[envconfig(from = "CONFIG_FILE")]
    pub config_file: Option<PathBuf>,
}

/// An error loading the Config
#[derive(Error, Debug)]
pub enum Error {
    /// Error reading the file
    #[error("Error reading file {0}: {1}")]
    File(PathBuf, std::io::Error),

    /// Error parsing the file
    #[error("Error parsing file {0}: {1}")]
    Yaml(PathBuf, serde_yml::Error),
}

fn load_file<T: DeserializeOwned>(filename: &Path) -> Result<T, Error> {
    let f = std::fs::File::open(filename).map_err(|e| Error::File(filename.to_path_buf(), e))?;
    serde_yml::from_reader(f).map_err(|e| Error::Yaml(filename.to_path_buf(), e))
}

impl Environment {
    /// Load the environment from the environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but cannot be parsed.
    pub fn load() -> Result<Self, envconfig::Error> {
        Self::init_from_env()
    }

    /// Load the config file, or the defaults if no file was given.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn config<T: DeserializeOwned + Default>(&self) -> Result<T, Error> {
        self.config_file
            .as_deref()
            .map_or_else(|| Ok(T::default()), load_file::<T>)
    }
}
