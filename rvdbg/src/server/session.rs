use std::net::TcpStream;
use std::sync::Arc;

use crate::config::{LogLevel, ProtocolConfig};
use crate::dsu::DebugSessionUnit;
use crate::Error;

use super::bitbang::BitBangSession;
use super::generic::GenericSession;

/// The protocol variants a session can speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolKind {
    Generic,
    OpenOcd,
}

impl ProtocolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::OpenOcd => "openocd",
        }
    }
}

impl std::fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ProtocolConfig {
    pub fn kind(&self) -> ProtocolKind {
        match self {
            Self::Generic(_) => ProtocolKind::Generic,
            Self::Openocd(_) => ProtocolKind::OpenOcd,
        }
    }
}

/// Settings every session gets, independent of its protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Sequential name, `client<N>`.
    pub name: String,
    pub log_level: LogLevel,
    /// A disabled session closes its connection right away.
    pub enabled: bool,
}

/// One connected client.
pub trait ClientSession: Send {
    fn name(&self) -> &str;

    fn kind(&self) -> ProtocolKind;

    /// Serve `stream` until the client disconnects or quits.
    fn run(&mut self, stream: TcpStream) -> Result<(), Error>;
}

/// Build the session for `protocol`, bound to a fresh context of `dsu`.
pub fn create_session(
    settings: SessionSettings,
    protocol: &ProtocolConfig,
    dsu: &Arc<DebugSessionUnit>,
) -> Box<dyn ClientSession> {
    match protocol {
        ProtocolConfig::Generic(config) => {
            Box::new(GenericSession::new(settings, config.clone(), dsu.context()))
        }
        ProtocolConfig::Openocd(tap) => {
            Box::new(BitBangSession::new(settings, *tap, dsu.context()))
        }
    }
}

/// Whether a read error only means that no data arrived in time.
pub(crate) fn is_idle_error(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted
    )
}
