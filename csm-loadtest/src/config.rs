//! Configuration for the load test.
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. Environment variables (prefixed with `CSM__`)
//! 2. YAML configuration file (specified via `-c` or `--config` flag)
//! 3. Defaults
//!
//! Environment variables use double underscores (`__`) to denote nested structures, for example
//! `CSM__CONNECTION__HOST=db.internal` or `CSM__CLIENT__TYPE=memory`.
//!
//! ```yaml
//! duration: 5m
//! max_block_size: 16MiB
//!
//! connection:
//!   host: localhost
//!   port: 3306
//!   name: wwc
//!
//! users:
//!   - name: csm
//!     count: 10
//!     min_wait: 1s
//!     max_wait: 5s
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{Result, ensure};
use bytesize::ByteSize;
use csm_client::{ConnectionSettings, SettingsHandle};
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

use crate::workload::{DEFAULT_MAX_BLOCK_SIZE, MAX_BLOCK_SIZE_LIMIT};

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "CSM__";

/// The client used to reach the user state storage.
///
/// The `type` field in YAML or `__TYPE` in environment variables determines the variant.
#[derive(Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientConfig {
    /// Talk to the user state service over HTTP, using [`Config::connection`].
    Http {
        /// Timeout for every request, including connecting.
        ///
        /// # Default
        ///
        /// `5s`
        #[serde(with = "humantime_serde")]
        timeout: Duration,
    },
    /// Keep all state in process memory.
    ///
    /// Useful for dry runs of the workload itself, without a storage service.
    Memory,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::Http {
            timeout: Duration::from_secs(5),
        }
    }
}

/// Relative weights of the tasks of a virtual user.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct TaskWeights {
    /// Weight of reading previously written blocks.
    pub get_many: u32,
    /// Weight of writing a block.
    pub set_many: u32,
}

impl Default for TaskWeights {
    fn default() -> Self {
        Self {
            get_many: 2,
            set_many: 1,
        }
    }
}

/// A group of virtual users that share wait times and task weights.
///
/// Two presets exist, see [`UserProfile::preset`]:
///
/// - `csm`: waits between 1 and 5 seconds, like a learner clicking through a course
/// - `csm-fast`: waits between 10 and 50 milliseconds, to put maximum pressure on the storage
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct UserProfile {
    /// Name of the profile, used as prefix for the names of its virtual users.
    pub name: String,
    /// Number of virtual users running this profile.
    pub count: usize,
    /// Minimum wait between two tasks of a virtual user.
    #[serde(with = "humantime_serde")]
    pub min_wait: Duration,
    /// Maximum wait between two tasks of a virtual user.
    #[serde(with = "humantime_serde")]
    pub max_wait: Duration,
    /// Relative weights of the tasks.
    pub weights: TaskWeights,
}

impl UserProfile {
    /// Returns the profile with the given preset name.
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "csm" => Some(Self::csm()),
            "csm-fast" => Some(Self::csm_fast()),
            _ => None,
        }
    }

    /// A single virtual user waiting between 1 and 5 seconds.
    pub fn csm() -> Self {
        Self {
            name: "csm".to_owned(),
            count: 1,
            min_wait: Duration::from_secs(1),
            max_wait: Duration::from_secs(5),
            weights: TaskWeights::default(),
        }
    }

    /// A single virtual user waiting between 10 and 50 milliseconds.
    pub fn csm_fast() -> Self {
        Self {
            name: "csm-fast".to_owned(),
            min_wait: Duration::from_millis(10),
            max_wait: Duration::from_millis(50),
            ..Self::csm()
        }
    }
}

impl Default for UserProfile {
    fn default() -> Self {
        Self::csm()
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Chooses [`LogFormat::Pretty`] if stderr is a TTY, otherwise [`LogFormat::Simplified`].
    Auto,
    /// Compact, colored output for humans.
    Pretty,
    /// Plain text output without colors.
    Simplified,
    /// One JSON object per line.
    Json,
}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Logging configuration. Logs are always written to stderr.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// Minimum log level to output.
    ///
    /// A plain level in `RUST_LOG` overrides this, any other `RUST_LOG` value replaces the filter
    /// entirely.
    ///
    /// # Default
    ///
    /// `INFO`
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Log output format.
    ///
    /// # Default
    ///
    /// `auto`
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// Main configuration struct of the load test.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Total run time of the load test.
    ///
    /// # Default
    ///
    /// `60s`
    #[serde(with = "humantime_serde")]
    pub duration: Duration,

    /// Seed for the random number generators of all virtual users.
    ///
    /// Each virtual user derives its own seed from this value. If unset, every virtual user is
    /// seeded from entropy.
    pub seed: Option<u64>,

    /// Upper bound for the serialized size of a single written block.
    ///
    /// # Default
    ///
    /// `16MiB`
    pub max_block_size: ByteSize,

    /// The client used to reach the storage.
    pub client: ClientConfig,

    /// Connection parameters of the user state service.
    ///
    /// These are reloaded from all configuration sources on `SIGHUP`.
    pub connection: ConnectionSettings,

    /// Groups of virtual users to run concurrently.
    ///
    /// # Default
    ///
    /// A single `csm` profile with one virtual user.
    pub users: Vec<UserProfile>,

    /// Logging configuration.
    pub logging: Logging,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(60),
            seed: None,
            max_block_size: ByteSize::b(DEFAULT_MAX_BLOCK_SIZE),
            client: ClientConfig::default(),
            connection: ConnectionSettings::default(),
            users: vec![UserProfile::csm()],
            logging: Logging::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the given YAML file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }

    /// Replaces all configured users with a preset profile.
    pub fn use_preset(&mut self, name: &str, count: Option<usize>) -> Result<()> {
        let Some(mut profile) = UserProfile::preset(name) else {
            anyhow::bail!("unknown profile preset `{name}`, expected `csm` or `csm-fast`");
        };
        if let Some(count) = count {
            profile.count = count;
        }
        self.users = vec![profile];
        Ok(())
    }

    /// Checks the configuration for values the load test cannot run with.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.duration.is_zero(), "duration must not be zero");
        ensure!(
            self.max_block_size.as_u64() >= 2,
            "max_block_size must be at least 2 bytes"
        );
        ensure!(
            self.max_block_size.as_u64() <= MAX_BLOCK_SIZE_LIMIT,
            "max_block_size must not exceed {}",
            ByteSize::b(MAX_BLOCK_SIZE_LIMIT)
        );
        ensure!(!self.users.is_empty(), "at least one user profile is required");

        for profile in &self.users {
            let name = &profile.name;
            ensure!(!name.is_empty(), "user profile names must not be empty");
            ensure!(profile.count > 0, "profile `{name}` has no users");
            ensure!(
                profile.min_wait <= profile.max_wait,
                "profile `{name}` has min_wait greater than max_wait"
            );
            ensure!(
                profile.weights.get_many > 0 || profile.weights.set_many > 0,
                "profile `{name}` has no task with a positive weight"
            );
        }

        if let ClientConfig::Http { .. } = self.client {
            self.connection.base_url()?;
        }

        Ok(())
    }
}

/// Reloads the connection settings from all configuration sources into `settings`.
///
/// Everything but the connection settings is ignored. On error, `settings` remain unchanged.
pub fn reload_connection(path: Option<&Path>, settings: &SettingsHandle) -> Result<()> {
    let connection = Config::load(path)?.connection;
    connection.base_url()?;
    settings.replace(connection);
    Ok(())
}
