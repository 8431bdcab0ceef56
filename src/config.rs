//! Gateway configuration
//!
//! Loaded once at startup from a JSON file and passed by value to every
//! component that needs it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::transport::BodyEncoding;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sqs-irc-gateway.conf";

/// Longest long-poll wait the queue service accepts
pub const MAX_POLL_WAIT: Duration = Duration::from_secs(20);

/// Queue service credentials
#[derive(Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Fixed timing constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Chat server dial timeout
    pub dial_timeout: Duration,
    /// Queue long-poll wait per receive call
    pub poll_wait: Duration,
    /// First delay after a transient queue error
    pub retry_delay: Duration,
    /// Upper bound for the backoff delay
    pub max_retry_delay: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_secs(60),
            poll_wait: MAX_POLL_WAIT,
            retry_delay: Duration::from_secs(10),
            max_retry_delay: Duration::from_secs(120),
        }
    }
}

/// Validated gateway configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub credentials: Credentials,
    /// Queue service region (e.g. us-east-1)
    pub region: String,
    /// Chat server address including port (e.g. localhost:6667)
    pub server: String,
    /// Nickname used for the first handshake attempt
    pub nickname: String,
    /// Queue read by the gateway; its messages are written to chat
    pub incoming_queue: String,
    /// Queue the gateway writes chat lines to
    pub outgoing_queue: String,
    /// Transport transform applied to message bodies
    pub encoding: BodyEncoding,
    pub timing: Timing,
}

/// On-disk shape of the configuration file
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    #[serde(rename = "AWSAccessKeyId")]
    aws_access_key_id: String,
    #[serde(rename = "AWSSecretAccessKey")]
    aws_secret_access_key: String,
    #[serde(rename = "AWSRegionCode")]
    aws_region_code: String,
    #[serde(rename = "IRCServer")]
    irc_server: String,
    #[serde(rename = "IRCNickname")]
    irc_nickname: String,
    #[serde(rename = "IncomingQueueName")]
    incoming_queue_name: String,
    #[serde(rename = "OutgoingQueueName")]
    outgoing_queue_name: String,
    #[serde(rename = "BodyEncoding")]
    body_encoding: BodyEncoding,
    #[serde(rename = "DialTimeoutSeconds")]
    dial_timeout_seconds: Option<u64>,
    #[serde(rename = "PollWaitSeconds")]
    poll_wait_seconds: Option<u64>,
    #[serde(rename = "RetryDelaySeconds")]
    retry_delay_seconds: Option<u64>,
    #[serde(rename = "MaxRetryDelaySeconds")]
    max_retry_delay_seconds: Option<u64>,
}

fn required(value: String, key: &'static str) -> Result<String, ConfigError> {
    let value = value.trim().to_string();
    if value.is_empty() {
        return Err(ConfigError::Missing(key));
    }
    Ok(value)
}

impl Config {
    /// Read and validate the configuration file at `path`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Parse and validate a JSON configuration document
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_json::from_str(text)?;

        let defaults = Timing::default();
        let seconds = |value: Option<u64>, default: Duration| {
            value.map(Duration::from_secs).unwrap_or(default)
        };
        let timing = Timing {
            dial_timeout: seconds(file.dial_timeout_seconds, defaults.dial_timeout),
            poll_wait: seconds(file.poll_wait_seconds, defaults.poll_wait),
            retry_delay: seconds(file.retry_delay_seconds, defaults.retry_delay),
            max_retry_delay: seconds(file.max_retry_delay_seconds, defaults.max_retry_delay),
        };

        let config = Self {
            nickname: required(file.irc_nickname, "IRCNickname")?,
            server: required(file.irc_server, "IRCServer")?,
            incoming_queue: required(file.incoming_queue_name, "IncomingQueueName")?,
            outgoing_queue: required(file.outgoing_queue_name, "OutgoingQueueName")?,
            region: required(file.aws_region_code, "AWSRegionCode")?,
            credentials: Credentials {
                access_key_id: required(file.aws_access_key_id, "AWSAccessKeyId")?,
                secret_access_key: required(file.aws_secret_access_key, "AWSSecretAccessKey")?,
            },
            encoding: file.body_encoding,
            timing,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.incoming_queue == self.outgoing_queue {
            return Err(ConfigError::Invalid(format!(
                "IncomingQueueName and OutgoingQueueName must differ (both '{}')",
                self.incoming_queue
            )));
        }
        if self.nickname.contains(char::is_whitespace) {
            return Err(ConfigError::Invalid(format!(
                "IRCNickname '{}' contains whitespace",
                self.nickname
            )));
        }
        if self.timing.poll_wait > MAX_POLL_WAIT {
            return Err(ConfigError::Invalid(format!(
                "PollWaitSeconds must be at most {}",
                MAX_POLL_WAIT.as_secs()
            )));
        }
        if self.timing.retry_delay.is_zero() || self.timing.dial_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "RetryDelaySeconds and DialTimeoutSeconds must be positive".to_string(),
            ));
        }
        if self.timing.retry_delay > self.timing.max_retry_delay {
            return Err(ConfigError::Invalid(
                "RetryDelaySeconds must not exceed MaxRetryDelaySeconds".to_string(),
            ));
        }
        Ok(())
    }
}

/// Resolve the configuration file path from the process arguments
///
/// Accepts `-c <path>`, `--config <path>`, a single positional path, or
/// nothing (default path). `args` excludes the program name.
pub fn config_path_from_args<I>(args: I) -> Result<PathBuf, ConfigError>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let path = match args.next() {
        None => PathBuf::from(DEFAULT_CONFIG_PATH),
        Some(flag) if flag == "-c" || flag == "--config" => match args.next() {
            Some(path) => PathBuf::from(path),
            None => return Err(ConfigError::Usage(format!("{flag} requires a path"))),
        },
        Some(flag) if flag.starts_with('-') => {
            return Err(ConfigError::Usage(format!("unknown option '{flag}'")));
        }
        Some(path) => PathBuf::from(path),
    };

    if let Some(extra) = args.next() {
        return Err(ConfigError::Usage(format!("unexpected argument '{extra}'")));
    }
    Ok(path)
}
