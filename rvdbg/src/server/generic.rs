//! Line based command protocol.
//!
//! Each request is one line of whitespace separated words, answered by exactly
//! one line: `OK`, a value, or `ERR <message>`. Numbers are decimal or `0x`
//! prefixed hexadecimal.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::time::Duration;

use tracing::Level;

use crate::config::GenericClientConfig;
use crate::dsu::DebugContext;
use crate::Error;

use super::session::{is_idle_error, ClientSession, ProtocolKind, SessionSettings};

/// Outcome of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Reply {
    Line(String),
    Quit,
}

impl Reply {
    fn ok() -> Self {
        Self::Line("OK".to_string())
    }

    fn err(message: impl std::fmt::Display) -> Self {
        Self::Line(format!("ERR {message}"))
    }
}

pub struct GenericSession {
    settings: SessionSettings,
    config: GenericClientConfig,
    context: DebugContext,
}

impl GenericSession {
    pub fn new(
        settings: SessionSettings,
        config: GenericClientConfig,
        context: DebugContext,
    ) -> Self {
        Self {
            settings,
            config,
            context,
        }
    }

    fn greeting(&self) -> String {
        format!(
            "{} {} harts={}",
            self.settings.name,
            ProtocolKind::Generic,
            self.context.dsu().hart_count()
        )
    }

    fn handle(&mut self, line: &str) -> Reply {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return Reply::err("empty request");
        };
        let args: Vec<&str> = words.collect();

        match self.dispatch(command, &args) {
            Ok(reply) => reply,
            Err(message) => Reply::err(message),
        }
    }

    fn dispatch(&mut self, command: &str, args: &[&str]) -> Result<Reply, String> {
        let dsu = self.context.dsu().clone();

        let reply = match (command, args) {
            ("harts", []) => Reply::Line(dsu.hart_count().to_string()),
            ("select", [index]) => {
                self.context
                    .select(parse(index)?)
                    .map_err(|e| e.to_string())?;
                Reply::ok()
            }
            ("current", []) => Reply::Line(self.context.selection().current().to_string()),
            ("halted", []) => flag(self.context.is_halted()),
            ("halted", [index]) => flag(dsu.is_halted(parse(index)?)),
            ("halt", [index]) => {
                dsu.halt_hart(parse(index)?).map_err(|e| e.to_string())?;
                Reply::ok()
            }
            ("resume", [index]) => {
                dsu.resume_hart(parse(index)?).map_err(|e| e.to_string())?;
                Reply::ok()
            }
            ("reset", []) => {
                dsu.reset_all();
                Reply::ok()
            }
            ("rdreg", [address]) => {
                let value = self
                    .context
                    .try_read_register(parse(address)?)
                    .map_err(|e| e.to_string())?;
                Reply::Line(format!("{value:#x}"))
            }
            ("wrreg", [address, value]) => {
                self.context
                    .try_write_register(parse(address)?, parse(value)?)
                    .map_err(|e| e.to_string())?;
                Reply::ok()
            }
            ("progbuf", words) if !words.is_empty() => {
                let words = words
                    .iter()
                    .map(|word| parse::<u32>(word))
                    .collect::<Result<Vec<_>, _>>()?;
                if self.context.execute_program_buffer(&words) {
                    Reply::ok()
                } else {
                    Reply::err("program buffer refused")
                }
            }
            ("busy", []) => flag(self.context.is_executing_program_buffer()),
            ("counters", []) => {
                let counters = dsu
                    .counters()
                    .snapshot()
                    .into_iter()
                    .map(|(master, direction, count)| {
                        format!("{master}:{}={count}", direction.as_str())
                    })
                    .collect::<Vec<_>>();
                Reply::Line(counters.join(" "))
            }
            ("platform", []) => Reply::Line(self.config.platform_config.to_string()),
            ("quit", []) => Reply::Quit,
            _ => return Err(format!("unknown request '{command}'")),
        };

        Ok(reply)
    }

    fn log_enabled(&self, level: Level) -> bool {
        self.settings.enabled && self.settings.log_level.enabled(level)
    }
}

impl ClientSession for GenericSession {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Generic
    }

    fn run(&mut self, stream: TcpStream) -> Result<(), Error> {
        if !self.settings.enabled {
            return Ok(());
        }

        let span = tracing::info_span!("session", name = %self.settings.name);
        let _enter = span.enter();

        let mut writer = stream.try_clone()?;
        let mut reader = BufReader::new(stream);

        if self.config.listen_default_output {
            writeln!(writer, "{}", self.greeting())?;
        }

        let mut line = Vec::new();
        loop {
            match reader.read_until(b'\n', &mut line) {
                Ok(0) if line.is_empty() => break,
                Ok(_) => {}
                Err(e) if is_idle_error(&e) => {
                    // Keep what was read so far and wait for the rest.
                    std::thread::sleep(Duration::from_millis(10));
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            let request = String::from_utf8_lossy(&line).trim().to_string();
            line.clear();
            if request.is_empty() {
                continue;
            }

            if self.log_enabled(Level::DEBUG) {
                tracing::debug!("Request: {request}");
            }

            match self.handle(&request) {
                Reply::Line(reply) => {
                    if self.log_enabled(Level::TRACE) {
                        tracing::trace!("Reply: {reply}");
                    }
                    writeln!(writer, "{reply}")?;
                }
                Reply::Quit => {
                    writeln!(writer, "OK")?;
                    break;
                }
            }
        }

        if self.log_enabled(Level::INFO) {
            tracing::info!("Client disconnected");
        }
        Ok(())
    }
}

fn flag(value: bool) -> Reply {
    Reply::Line(if value { "1" } else { "0" }.to_string())
}

fn parse<T: TryFrom<u64>>(word: &str) -> Result<T, String> {
    let value =
        parse_int::parse::<u64>(word).map_err(|_| format!("invalid number '{word}'"))?;
    T::try_from(value).map_err(|_| format!("number out of range '{word}'"))
}
