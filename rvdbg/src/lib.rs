//! # Debug transport and run-control for RISC-V harts
//!
//! A [`DebugSessionUnit`] gives every connected client halt, resume and reset
//! control over a set of harts, plus register access to the hart the client
//! selected. Register accesses are asynchronous on the hart side; the
//! [`TransactionBridge`](bridge::TransactionBridge) turns them into blocking
//! calls.
//!
//! Clients connect over TCP through an [`Acceptor`], speaking either a line
//! based command protocol or OpenOCD's `remote_bitbang` JTAG protocol.
//!
//! ## Serving a simulated platform
//!
//! ```no_run
//! # use rvdbg::Error;
//! use std::sync::Arc;
//!
//! use rvdbg::config::{DsuConfig, ServerConfig};
//! use rvdbg::{Acceptor, DebugSessionUnit, SimulatedPlatform};
//!
//! let config = DsuConfig::default();
//! let platform = Arc::new(SimulatedPlatform::new(&config.harts)?);
//! let dsu = DebugSessionUnit::from_config(platform, &config);
//!
//! let mut acceptor = Acceptor::new(ServerConfig::default(), dsu);
//! acceptor.start()?;
//! # Ok::<(), Error>(())
//! ```

pub mod bridge;
pub mod config;
mod counters;
pub mod dport;
mod dsu;
mod error;
pub mod registers;
mod registry;
pub mod server;
mod sim;

pub use crate::counters::{AccessCounters, AccessDirection};
pub use crate::dsu::{DebugContext, DebugSessionUnit, COMMAND_SINK_HART};
pub use crate::error::Error;
pub use crate::registry::{Hart, HartRegistry, HartSelection};
pub use crate::server::{Acceptor, ClientSession, ProtocolKind};
pub use crate::sim::{SimulatedHart, SimulatedPlatform};
