//! TCP front end: the endpoint acceptor and the protocols its sessions speak.

mod acceptor;
pub mod bitbang;
mod generic;
mod session;

pub use acceptor::{resolve_host, Acceptor};
pub use bitbang::BitBangSession;
pub use generic::GenericSession;
pub use session::{create_session, ClientSession, ProtocolKind, SessionSettings};
