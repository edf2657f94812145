//! Layered configuration.
//!
//! Values come from an optional TOML file, overridden by CLI flags and
//! environment variables. Each layer is a partial struct of `Option`s which
//! is merged with [`Overlay`] and then converted into its complete form.
use crate::server::DEFAULT_SHUTDOWN_TIMEOUT;
use clap::Args;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{0}")]
    Validation(String),
}

/// Trait for merging two partial structs.
pub trait Overlay {
    /// self is the base layer, over is the top layer.
    fn overlay(self, over: Self) -> Self;
}

// If top layer exists, use it. Otherwise keep base.
impl<T> Overlay for Option<T> {
    fn overlay(self, over: Self) -> Self {
        over.or(self)
    }
}

#[derive(Args, Debug, Clone)]
pub struct LayeredArgs<T: Args> {
    /// Path to configuration file
    #[arg(long, env = "HANDOVER_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub inner: T,
}

impl<T> LayeredArgs<T>
where
    T: Args,
{
    pub fn load<C>(self) -> Result<C, ConfigError>
    where
        T: Layered<C>,
    {
        self.inner.resolve(self.config.as_deref())
    }
}

pub trait Layered<C>: Overlay + DeserializeOwned + Default + Sized {
    fn resolve(self, config_path: Option<&Path>) -> Result<C, ConfigError>;
}

impl<T, C> Layered<C> for T
where
    T: Overlay + DeserializeOwned + Default,
    T: TryInto<C>,
    <T as TryInto<C>>::Error: Into<ConfigError>,
{
    fn resolve(self, config_path: Option<&Path>) -> Result<C, ConfigError> {
        let base = match config_path {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(path)?;
                toml::from_str::<Self>(&content)?
            }
            Some(path) => {
                return Err(ConfigError::Validation(format!(
                    "configuration file {} does not exist",
                    path.display()
                )));
            }
            None => Self::default(),
        };

        let merged = base.overlay(self);

        merged.try_into().map_err(Into::into)
    }
}

/// Grace period for in-flight requests during shutdown.
///
/// Defaults to seconds if no unit specified, otherwise uses humantime parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct ShutdownTimeout(pub Duration);

impl FromStr for ShutdownTimeout {
    type Err = humantime::DurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(s) = s.parse::<u64>() {
            return Ok(ShutdownTimeout(Duration::from_secs(s)));
        }
        let duration = humantime::parse_duration(s)?;
        Ok(ShutdownTimeout(duration))
    }
}

impl TryFrom<String> for ShutdownTimeout {
    type Error = humantime::DurationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl std::fmt::Display for ShutdownTimeout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", humantime::format_duration(self.0))
    }
}

impl From<ShutdownTimeout> for Duration {
    fn from(val: ShutdownTimeout) -> Self {
        val.0
    }
}

impl Default for ShutdownTimeout {
    fn default() -> Self {
        ShutdownTimeout(DEFAULT_SHUTDOWN_TIMEOUT)
    }
}

/// Resolved listen and shutdown settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Bind address. Empty binds the default HTTP port.
    pub addr: String,
    pub shutdown_timeout: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            addr: String::new(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

#[derive(Args, Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ServerArgs {
    /// Address to listen on when no listener is inherited from the supervisor.
    ///
    /// Empty listens on all interfaces on port 80. A bare port such as `:8080`
    /// listens on all interfaces.
    #[arg(long, env = "HANDOVER_ADDR")]
    pub addr: Option<String>,

    /// Time allowed for in-flight requests to finish after a termination signal.
    ///
    /// Bare integers are seconds, otherwise a duration such as `500ms` or `1m`.
    /// Zero closes connections immediately.
    #[arg(long, env = "HANDOVER_SHUTDOWN_TIMEOUT")]
    pub shutdown_timeout: Option<ShutdownTimeout>,
}

impl Overlay for ServerArgs {
    fn overlay(self, over: Self) -> Self {
        Self {
            addr: self.addr.overlay(over.addr),
            shutdown_timeout: self.shutdown_timeout.overlay(over.shutdown_timeout),
        }
    }
}

impl TryFrom<ServerArgs> for ServerSettings {
    type Error = ConfigError;

    fn try_from(args: ServerArgs) -> Result<Self, Self::Error> {
        let addr = args.addr.unwrap_or_default();
        if addr.chars().any(char::is_whitespace) {
            return Err(ConfigError::Validation(format!(
                "listen address '{}' must not contain whitespace",
                addr
            )));
        }
        Ok(Self {
            addr,
            shutdown_timeout: args.shutdown_timeout.unwrap_or_default().into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn timeout_bare_integer_is_seconds() {
        let t: ShutdownTimeout = "10".parse().unwrap();
        assert_eq!(t.0, Duration::from_secs(10));
    }

    #[test]
    fn timeout_accepts_humantime() {
        let t: ShutdownTimeout = "1m 30s".parse().unwrap();
        assert_eq!(t.0, Duration::from_secs(90));

        let t: ShutdownTimeout = "250ms".parse().unwrap();
        assert_eq!(t.0, Duration::from_millis(250));
    }

    #[test]
    fn timeout_zero_is_allowed() {
        let t: ShutdownTimeout = "0".parse().unwrap();
        assert_eq!(t.0, Duration::ZERO);
    }

    #[test]
    fn timeout_rejects_garbage() {
        assert!("soon".parse::<ShutdownTimeout>().is_err());
    }

    #[test]
    fn timeout_display_uses_humantime() {
        let t = ShutdownTimeout(Duration::from_secs(90));
        assert_eq!(t.to_string(), "1m 30s");
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let settings: ServerSettings = ServerArgs::default().try_into().unwrap();
        assert_eq!(settings, ServerSettings::default());
        assert_eq!(settings.shutdown_timeout, Duration::from_secs(30));
        assert!(settings.addr.is_empty());
    }

    #[test]
    fn top_layer_wins() {
        let base = ServerArgs {
            addr: Some("127.0.0.1:8080".into()),
            shutdown_timeout: Some(ShutdownTimeout(Duration::from_secs(5))),
        };
        let top = ServerArgs {
            addr: Some(":9090".into()),
            shutdown_timeout: None,
        };

        let merged = base.overlay(top);
        assert_eq!(merged.addr.as_deref(), Some(":9090"));
        assert_eq!(
            merged.shutdown_timeout,
            Some(ShutdownTimeout(Duration::from_secs(5)))
        );
    }

    #[test]
    fn whitespace_in_addr_is_rejected() {
        let args = ServerArgs {
            addr: Some("127.0.0.1: 80".into()),
            shutdown_timeout: None,
        };
        let err = ServerSettings::try_from(args).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn file_values_are_overridden_by_cli() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "addr = \"127.0.0.1:8000\"").unwrap();
        writeln!(file, "shutdown-timeout = \"2s\"").unwrap();

        let cli = ServerArgs {
            addr: None,
            shutdown_timeout: Some(ShutdownTimeout(Duration::from_secs(7))),
        };

        let settings: ServerSettings = cli.resolve(Some(file.path())).unwrap();
        assert_eq!(settings.addr, "127.0.0.1:8000");
        assert_eq!(settings.shutdown_timeout, Duration::from_secs(7));
    }

    #[test]
    fn unknown_file_keys_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "adress = \"127.0.0.1:8000\"").unwrap();

        let err = Layered::<ServerSettings>::resolve(ServerArgs::default(), Some(file.path()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("handover.toml");

        let err =
            Layered::<ServerSettings>::resolve(ServerArgs::default(), Some(missing.as_path()))
                .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }
}
