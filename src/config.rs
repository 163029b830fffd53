use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Process configuration, read from `PARKD_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    pub promote_interval: Duration,
    pub request_timeout: Duration,
    /// Slot labels provisioned at startup.
    pub slots: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 3001,
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            promote_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
            slots: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let parse = |var: &'static str| -> Result<Option<u64>, ConfigError> {
            parse_var(&lookup, var)
        };

        Ok(Self {
            bind: lookup("PARKD_BIND").unwrap_or(defaults.bind),
            port: parse_var(&lookup, "PARKD_PORT")?.unwrap_or(defaults.port),
            data_dir: lookup("PARKD_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port: parse_var(&lookup, "PARKD_METRICS_PORT")?,
            compact_threshold: parse("PARKD_COMPACT_THRESHOLD")?
                .unwrap_or(defaults.compact_threshold),
            promote_interval: parse("PARKD_PROMOTE_INTERVAL_SECS")?
                .map(|s| Duration::from_secs(s.max(1)))
                .unwrap_or(defaults.promote_interval),
            request_timeout: parse("PARKD_REQUEST_TIMEOUT_SECS")?
                .map(|s| Duration::from_secs(s.max(1)))
                .unwrap_or(defaults.request_timeout),
            slots: lookup("PARKD_SLOTS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("parkd.wal")
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}
