//! Program settings, read once at startup.
//!
//! The environment (`FALOCALREPO_*`) is layered under the command line flags.

use std::collections::HashMap;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::Result;

pub const ENV_PREFIX: &str = "FALOCALREPO";
pub const DEFAULT_DATABASE: &str = "FA.db";

// what the environment may carry; any value of DEBUG switches it on
#[derive(Debug, Default, Deserialize)]
struct Settings {
    debug: Option<String>,
    database: Option<PathBuf>,
}

/// Values given on the command line; they win over the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub debug: bool,
    pub database: Option<PathBuf>,
    pub color: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub debug: bool,
    pub database: PathBuf,
    pub color: bool,
}

impl Config {
    /// Reads the process environment.
    pub fn load(overrides: Overrides) -> Result<Self> {
        Self::from_environment(None, overrides)
    }

    /// `environment` replaces the process environment when given.
    pub fn from_environment(environment: Option<HashMap<String, String>>, overrides: Overrides) -> Result<Self> {
        let settings: Settings = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX).source(environment))
            .build()?
            .try_deserialize()?;
        let database = overrides
            .database
            .or(settings.database)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE));
        Ok(Self {
            debug: overrides.debug || settings.debug.is_some(),
            database: archive_path(&database),
            color: overrides.color.unwrap_or_else(|| std::io::stdout().is_terminal()),
        })
    }
}

/// A path that does not name a `.db` file is a folder holding `FA.db`.
pub fn archive_path(path: &Path) -> PathBuf {
    match path.extension() {
        Some(ext) if ext.eq_ignore_ascii_case("db") => path.to_path_buf(),
        _ => path.join(DEFAULT_DATABASE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn environment(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
    }

    #[test]
    fn defaults_to_working_directory() {
        let config = Config::from_environment(environment(&[]), Overrides::default()).expect("config");
        assert_eq!(config.database, PathBuf::from("FA.db"));
        assert!(!config.debug);
    }

    #[test]
    fn environment_sets_debug_and_folder() {
        let env = environment(&[("FALOCALREPO_DEBUG", "1"), ("FALOCALREPO_DATABASE", "/data/fa")]);
        let config = Config::from_environment(env, Overrides::default()).expect("config");
        assert!(config.debug);
        assert_eq!(config.database, PathBuf::from("/data/fa/FA.db"));
    }

    #[test]
    fn flags_win_over_environment() {
        let env = environment(&[("FALOCALREPO_DATABASE", "/data/other.db")]);
        let overrides = Overrides {
            database: Some(PathBuf::from("mine.db")),
            color: Some(false),
            ..Overrides::default()
        };
        let config = Config::from_environment(env, overrides).expect("config");
        assert_eq!(config.database, PathBuf::from("mine.db"));
        assert!(!config.color);
    }
}
