//! Server side of the OpenOCD `remote_bitbang` protocol.
//!
//! The client drives the JTAG pins one ASCII byte at a time, see
//! [remote_bitbang](https://github.com/openocd-org/openocd/blob/b6b4f9d46a48aadc1de6bb5152ff4913661c9059/doc/manual/jtag/drivers/remote_bitbang.txt).
//! The pins feed a [`JtagTap`] whose data registers form a RISC-V debug
//! transport module.

mod dtm;
mod tap;

pub use dtm::{Dtm, Dtmcs, DMI, DTMCS, IDCODE};
pub use tap::{DataRegisters, JtagTap, TapState};

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use tracing::Level;

use crate::config::JtagTapConfig;
use crate::dsu::DebugContext;
use crate::Error;

use super::session::{is_idle_error, ClientSession, ProtocolKind, SessionSettings};

/// One decoded protocol byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Drive TCK, TMS and TDI.
    Write { tck: bool, tms: bool, tdi: bool },
    /// Sample TDO.
    Read,
    /// Drive the TRST and SRST reset lines.
    Reset { trst: bool, srst: bool },
    /// Turn the activity LED on or off.
    Blink(bool),
    /// End of the session.
    Quit,
}

impl Command {
    pub fn parse(byte: u8) -> Option<Self> {
        let command = match byte {
            b'0'..=b'7' => {
                let pins = byte - b'0';
                Self::Write {
                    tck: pins & 0b100 != 0,
                    tms: pins & 0b010 != 0,
                    tdi: pins & 0b001 != 0,
                }
            }
            b'R' => Self::Read,
            b'r' => Self::Reset {
                trst: false,
                srst: false,
            },
            b's' => Self::Reset {
                trst: false,
                srst: true,
            },
            b't' => Self::Reset {
                trst: true,
                srst: false,
            },
            b'u' => Self::Reset {
                trst: true,
                srst: true,
            },
            b'B' => Self::Blink(true),
            b'b' => Self::Blink(false),
            b'Q' => Self::Quit,
            _ => return None,
        };

        Some(command)
    }
}

pub struct BitBangSession {
    settings: SessionSettings,
    tap: JtagTap<Dtm>,
    srst: bool,
}

impl BitBangSession {
    pub fn new(settings: SessionSettings, config: JtagTapConfig, context: DebugContext) -> Self {
        Self {
            settings,
            tap: JtagTap::new(config.irlen, Dtm::new(config, context)),
            srst: false,
        }
    }

    pub fn tap(&self) -> &JtagTap<Dtm> {
        &self.tap
    }

    /// Apply `command`, returning the byte to send back if there is one.
    pub fn process(&mut self, command: Command) -> Option<u8> {
        match command {
            Command::Write { tck, tms, tdi } => self.tap.set_pins(tck, tms, tdi),
            Command::Read => return Some(if self.tap.tdo() { b'1' } else { b'0' }),
            Command::Reset { trst, srst } => {
                if trst {
                    self.tap.reset();
                }
                // Reset the platform once per SRST assertion.
                if srst && !self.srst {
                    tracing::info!("System reset requested");
                    self.tap.registers().context().dsu().reset_all();
                }
                self.srst = srst;
            }
            Command::Blink(_) | Command::Quit => {}
        }

        None
    }

    fn log_enabled(&self, level: Level) -> bool {
        self.settings.enabled && self.settings.log_level.enabled(level)
    }
}

impl ClientSession for BitBangSession {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn kind(&self) -> ProtocolKind {
        ProtocolKind::OpenOcd
    }

    fn run(&mut self, mut stream: TcpStream) -> Result<(), Error> {
        if !self.settings.enabled {
            return Ok(());
        }

        let span = tracing::info_span!("session", name = %self.settings.name);
        let _enter = span.enter();

        let mut buffer = [0u8; 4096];
        let mut replies = Vec::with_capacity(buffer.len());

        'session: loop {
            let count = match stream.read(&mut buffer) {
                Ok(0) => break,
                Ok(count) => count,
                Err(e) if is_idle_error(&e) => {
                    std::thread::sleep(Duration::from_millis(10));
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            for &byte in &buffer[..count] {
                match Command::parse(byte) {
                    Some(Command::Quit) => {
                        stream.write_all(&replies)?;
                        break 'session;
                    }
                    Some(command) => replies.extend(self.process(command)),
                    None => {
                        if self.log_enabled(Level::DEBUG) {
                            tracing::debug!("Ignoring unknown byte {byte:#04x}");
                        }
                    }
                }
            }

            if !replies.is_empty() {
                stream.write_all(&replies)?;
                replies.clear();
            }
        }

        if self.log_enabled(Level::INFO) {
            tracing::info!("Client disconnected");
        }
        Ok(())
    }
}
