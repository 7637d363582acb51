use serde::Deserialize;

use crate::codec::CodecKind;

/// Top-level configuration settings for the application.
///
/// Includes the broker endpoint, the messenger tuning and logging.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub messenger: MessengerSettings,
    pub log: LogSettings,
}

/// Where the broker lives and how to log in to it.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

/// Messenger tuning: retry policy, buffer sizes and payload codec.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct MessengerSettings {
    pub max_retries: u32,
    pub retry_interval_secs: u64,
    pub stream_buffer: usize,
    pub control_buffer: usize,
    pub codec: CodecKind,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LogSettings {
    /// Default level filter, overridden by `RUST_LOG` when set.
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Every value is optional here; missing ones are filled from defaults.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub broker: Option<PartialBrokerSettings>,
    pub messenger: Option<PartialMessengerSettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBrokerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialMessengerSettings {
    pub max_retries: Option<u32>,
    pub retry_interval_secs: Option<u64>,
    pub stream_buffer: Option<usize>,
    pub control_buffer: Option<usize>,
    pub codec: Option<CodecKind>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

/// Provides default values for `Settings`.
///
/// Matches a popsub broker started with its own defaults on the local host.
impl Default for Settings {
    fn default() -> Self {
        Self {
            broker: BrokerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
                user: "admin".to_string(),
                password: "password".to_string(),
            },
            messenger: MessengerSettings {
                max_retries: 10,
                retry_interval_secs: 10,
                stream_buffer: 50,
                control_buffer: 50,
                codec: CodecKind::Json,
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl PartialSettings {
    /// Fills every missing value from `default`.
    pub fn merge(self, default: Settings) -> Settings {
        let broker = self.broker.unwrap_or_default();
        let messenger = self.messenger.unwrap_or_default();
        let log = self.log.unwrap_or_default();

        Settings {
            broker: BrokerSettings {
                host: broker.host.unwrap_or(default.broker.host),
                port: broker.port.unwrap_or(default.broker.port),
                user: broker.user.unwrap_or(default.broker.user),
                password: broker.password.unwrap_or(default.broker.password),
            },
            messenger: MessengerSettings {
                max_retries: messenger
                    .max_retries
                    .unwrap_or(default.messenger.max_retries),
                retry_interval_secs: messenger
                    .retry_interval_secs
                    .unwrap_or(default.messenger.retry_interval_secs),
                stream_buffer: messenger
                    .stream_buffer
                    .unwrap_or(default.messenger.stream_buffer),
                control_buffer: messenger
                    .control_buffer
                    .unwrap_or(default.messenger.control_buffer),
                codec: messenger.codec.unwrap_or(default.messenger.codec),
            },
            log: LogSettings {
                level: log.level.unwrap_or(default.log.level),
            },
        }
    }
}
