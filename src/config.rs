use std::path::PathBuf;

use crate::calendar::GoogleConfig;

/// Server settings, read once at startup from `TANDEM_*` variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls: Option<TlsFiles>,
    pub google: Option<GoogleConfig>,
    pub notifications: bool,
    pub booking_index: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    Invalid { var: &'static str, value: String },
    /// One of a pair of variables that must be set together.
    Unpaired { set: &'static str, missing: &'static str },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { var, value } => write!(f, "invalid {var}: {value:?}"),
            ConfigError::Unpaired { set, missing } => {
                write!(f, "{set} is set but {missing} is not")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let tls = pair(&get, "TANDEM_TLS_CERT", "TANDEM_TLS_KEY")?.map(|(cert, key)| TlsFiles {
            cert: cert.into(),
            key: key.into(),
        });
        let google = pair(&get, "TANDEM_GOOGLE_CLIENT_ID", "TANDEM_GOOGLE_CLIENT_SECRET")?
            .map(|(client_id, client_secret)| GoogleConfig {
                client_id,
                client_secret,
            });

        Ok(Self {
            bind: get("TANDEM_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed(&get, "TANDEM_PORT")?.unwrap_or(5433),
            data_dir: get("TANDEM_DATA_DIR").unwrap_or_else(|| "./data".into()).into(),
            password: get("TANDEM_PASSWORD").unwrap_or_else(|| "tandem".into()),
            max_connections: parsed(&get, "TANDEM_MAX_CONNECTIONS")?.unwrap_or(256),
            compact_threshold: parsed(&get, "TANDEM_COMPACT_THRESHOLD")?.unwrap_or(1000),
            metrics_port: parsed(&get, "TANDEM_METRICS_PORT")?,
            tls,
            google,
            notifications: switch(&get, "TANDEM_NOTIFICATIONS")?.unwrap_or(true),
            booking_index: switch(&get, "TANDEM_BOOKING_INDEX")?.unwrap_or(true),
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parsed<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    get(var)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid { var, value })
        })
        .transpose()
}

fn switch(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<bool>, ConfigError> {
    get(var)
        .map(|value| match value.trim().to_ascii_lowercase().as_str() {
            "on" | "true" | "1" | "yes" => Ok(true),
            "off" | "false" | "0" | "no" => Ok(false),
            _ => Err(ConfigError::Invalid { var, value }),
        })
        .transpose()
}

fn pair(
    get: &impl Fn(&str) -> Option<String>,
    first: &'static str,
    second: &'static str,
) -> Result<Option<(String, String)>, ConfigError> {
    match (get(first), get(second)) {
        (Some(a), Some(b)) => Ok(Some((a, b))),
        (None, None) => Ok(None),
        (Some(_), None) => Err(ConfigError::Unpaired {
            set: first,
            missing: second,
        }),
        (None, Some(_)) => Err(ConfigError::Unpaired {
            set: second,
            missing: first,
        }),
    }
}
