//! Configuration of the debug session unit and its network endpoints.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Default port of an endpoint.
pub const DEFAULT_PORT: u16 = 9824;

/// Verbosity of a component's log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn into_tracing(self) -> tracing::level_filters::LevelFilter {
        match self {
            Self::Off => tracing::level_filters::LevelFilter::OFF,
            Self::Error => tracing::level_filters::LevelFilter::ERROR,
            Self::Warn => tracing::level_filters::LevelFilter::WARN,
            Self::Info => tracing::level_filters::LevelFilter::INFO,
            Self::Debug => tracing::level_filters::LevelFilter::DEBUG,
            Self::Trace => tracing::level_filters::LevelFilter::TRACE,
        }
    }

    /// Whether a message of `level` passes this filter.
    pub fn enabled(self, level: tracing::Level) -> bool {
        self.into_tracing() >= level
    }
}

/// Configuration of the debug session unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DsuConfig {
    /// Names of the harts to debug, in index order.
    pub harts: Vec<String>,
    /// How long to wait for a hart to complete a transaction. 0 waits forever.
    #[serde(with = "duration_ms")]
    pub transaction_timeout: Duration,
    /// Bus master id under which the unit's own accesses are counted.
    pub bus_master_id: u32,
}

impl Default for DsuConfig {
    fn default() -> Self {
        Self {
            harts: vec!["core0".to_string()],
            transaction_timeout: Duration::from_millis(1000),
            bus_master_id: 0,
        }
    }
}

impl DsuConfig {
    /// The transaction deadline, `None` meaning unbounded.
    pub fn deadline(&self) -> Option<Duration> {
        (!self.transaction_timeout.is_zero()).then_some(self.transaction_timeout)
    }
}

/// One listening endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Whether the accept loop runs at all.
    pub enable: bool,
    /// Receive timeout applied to accepted sockets. 0 disables it.
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
    /// Blocking mode of the listening and accepted sockets.
    pub blocking_mode: bool,
    /// IPv4 address to bind. Unset binds the loopback address.
    pub host_ip: Option<String>,
    pub host_port: u16,
    /// Log level handed to every session.
    pub log_level: LogLevel,
    pub protocol: ProtocolConfig,
}

impl ServerConfig {
    /// Reject parameters no session could work with.
    pub fn validate(&self) -> Result<(), Error> {
        if let ProtocolConfig::Openocd(tap) = &self.protocol {
            // The IR has to hold the DMI instruction, 0x11.
            if !(5..=32).contains(&tap.irlen) {
                return Err(Error::InvalidConfig(format!(
                    "irlen {} is outside 5..=32",
                    tap.irlen
                )));
            }
            // Debug module registers are addressed with 16 bits.
            if !(1..=16).contains(&tap.abits) {
                return Err(Error::InvalidConfig(format!(
                    "abits {} is outside 1..=16",
                    tap.abits
                )));
            }
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enable: true,
            timeout: Duration::ZERO,
            blocking_mode: true,
            host_ip: None,
            host_port: DEFAULT_PORT,
            log_level: LogLevel::Info,
            protocol: ProtocolConfig::default(),
        }
    }
}

/// Protocol spoken by the sessions of an endpoint, with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProtocolConfig {
    /// Line based command protocol.
    Generic(GenericClientConfig),
    /// OpenOCD `remote_bitbang` JTAG.
    Openocd(JtagTapConfig),
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self::Generic(GenericClientConfig::default())
    }
}

/// Parameters of a generic client session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct GenericClientConfig {
    /// Free form platform description reported to clients.
    pub platform_config: serde_json::Value,
    /// Greet clients on connect.
    pub listen_default_output: bool,
}

/// Parameters of the emulated JTAG tap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JtagTapConfig {
    /// Instruction register length in bits.
    pub irlen: u32,
    /// Value of the IDCODE register.
    pub idcode: u32,
    /// Number of address bits of the DMI register.
    pub abits: u32,
    /// Idle cycles advertised in `dtmcs`.
    pub idle: u32,
}

impl Default for JtagTapConfig {
    fn default() -> Self {
        Self {
            irlen: 5,
            idcode: 0x10e3_1913,
            abits: 7,
            idle: 1,
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
