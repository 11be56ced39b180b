//! TCP endpoint accepting client sessions.

use std::net::{Ipv4Addr, Shutdown, SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::os::fd::{AsFd, AsRawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::socket::{
    self, listen, setsockopt, sockopt, AddressFamily, Backlog, SockFlag, SockProtocol, SockType,
    SockaddrIn,
};
use parking_lot::Mutex;

use crate::config::ServerConfig;
use crate::dsu::DebugSessionUnit;
use crate::Error;

use super::session::{create_session, SessionSettings};

/// Upper bound on how long the accept loop waits before checking for a stop.
const ACCEPT_POLL_INTERVAL_MS: u16 = 400;

/// Resolve the configured host to an IPv4 address.
///
/// No host, an empty one and `localhost` mean the loopback address.
pub fn resolve_host(host: Option<&str>) -> Result<Ipv4Addr, Error> {
    match host.map(str::trim) {
        None | Some("") | Some("localhost") => Ok(Ipv4Addr::LOCALHOST),
        Some(host) => host
            .parse()
            .map_err(|_| Error::InvalidHostAddress(host.to_string())),
    }
}

/// Create a listening socket on `address`, with address reuse enabled.
fn bind(address: SocketAddrV4) -> Result<TcpListener, Error> {
    let fd = socket::socket(
        AddressFamily::Inet,
        SockType::Stream,
        SockFlag::empty(),
        SockProtocol::Tcp,
    )?;
    setsockopt(&fd, sockopt::ReuseAddr, &true)?;
    socket::bind(fd.as_raw_fd(), &SockaddrIn::from(address))?;
    listen(&fd, Backlog::new(1)?)?;

    Ok(TcpListener::from(fd))
}

struct SessionHandle {
    name: String,
    /// Clone of the session's socket, used to unblock it on stop.
    stream: TcpStream,
    thread: JoinHandle<()>,
}

impl SessionHandle {
    fn close(self) {
        let _ = self.stream.shutdown(Shutdown::Both);
        if self.thread.join().is_err() {
            tracing::error!("Session {} panicked", self.name);
        }
        tracing::info!("TCP {} stopped", self.name);
    }
}

type SessionTable = Arc<Mutex<Vec<SessionHandle>>>;

/// Listens on one TCP endpoint and runs a session per accepted client.
pub struct Acceptor {
    config: ServerConfig,
    dsu: Arc<DebugSessionUnit>,
    local_addr: Option<SocketAddr>,
    running: Arc<AtomicBool>,
    sessions: SessionTable,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Acceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acceptor")
            .field("local_addr", &self.local_addr)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Acceptor {
    pub fn new(config: ServerConfig, dsu: Arc<DebugSessionUnit>) -> Self {
        Self {
            config,
            dsu,
            local_addr: None,
            running: Arc::new(AtomicBool::new(false)),
            sessions: Arc::default(),
            thread: None,
        }
    }

    /// Bind the endpoint and start accepting clients.
    ///
    /// A disabled endpoint is not started. Starting a running acceptor does
    /// nothing.
    pub fn start(&mut self) -> Result<(), Error> {
        if !self.config.enable {
            tracing::info!("TCP endpoint on port {} is disabled", self.config.host_port);
            return Ok(());
        }
        if self.thread.is_some() {
            return Ok(());
        }

        let (listener, local_addr) = self.listen().inspect_err(|e| {
            tracing::error!(
                "TCP endpoint on port {} not started: {e}",
                self.config.host_port
            );
        })?;
        tracing::info!("Listening on {local_addr}");

        self.running.store(true, Ordering::Release);
        let accept_loop = AcceptLoop {
            listener,
            config: self.config.clone(),
            dsu: self.dsu.clone(),
            running: self.running.clone(),
            sessions: self.sessions.clone(),
            next_session: 0,
        };

        let thread = thread::Builder::new()
            .name(format!("accept-{}", local_addr.port()))
            .spawn(move || accept_loop.run());
        match thread {
            Ok(thread) => {
                self.thread = Some(thread);
                self.local_addr = Some(local_addr);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                Err(e.into())
            }
        }
    }

    fn listen(&self) -> Result<(TcpListener, SocketAddr), Error> {
        self.config.validate()?;
        let host = resolve_host(self.config.host_ip.as_deref())?;
        let listener = bind(SocketAddrV4::new(host, self.config.host_port))?;
        listener.set_nonblocking(!self.config.blocking_mode)?;
        let local_addr = listener.local_addr()?;

        Ok((listener, local_addr))
    }

    /// Address the endpoint is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
            && self
                .thread
                .as_ref()
                .is_some_and(|thread| !thread.is_finished())
    }

    /// Names of the sessions not yet reaped.
    pub fn session_names(&self) -> Vec<String> {
        self.sessions
            .lock()
            .iter()
            .map(|session| session.name.clone())
            .collect()
    }

    /// Stop accepting, then close every session and wait for it.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Accept loop panicked");
            }
        }

        let sessions = std::mem::take(&mut *self.sessions.lock());
        for session in sessions {
            session.close();
        }
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        self.stop();
    }
}

struct AcceptLoop {
    listener: TcpListener,
    config: ServerConfig,
    dsu: Arc<DebugSessionUnit>,
    running: Arc<AtomicBool>,
    sessions: SessionTable,
    next_session: usize,
}

impl AcceptLoop {
    fn run(mut self) {
        while self.running.load(Ordering::Acquire) {
            self.reap();

            let mut fds = [PollFd::new(self.listener.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, PollTimeout::from(ACCEPT_POLL_INTERVAL_MS)) {
                Ok(0) | Err(Errno::EINTR) => continue,
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("Polling the listener failed: {e}");
                    break;
                }
            }

            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = self.spawn_session(stream, peer) {
                        tracing::error!("Failed to start session for {peer}: {e}");
                    }
                }
                Err(e) if is_transient(&e) => {}
                Err(e) => {
                    tracing::error!("Accepting a client failed: {e}");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::Release);
        let _ = socket::shutdown(self.listener.as_raw_fd(), socket::Shutdown::Both);
        tracing::debug!("Accept loop on {:?} stopped", self.listener.local_addr());
    }

    fn spawn_session(&mut self, stream: TcpStream, peer: SocketAddr) -> Result<(), Error> {
        let timeout = (!self.config.timeout.is_zero()).then_some(self.config.timeout);
        stream.set_read_timeout(timeout)?;
        stream.set_nonblocking(!self.config.blocking_mode)?;

        let name = format!("client{}", self.next_session);
        self.next_session += 1;

        let mut session = create_session(
            SessionSettings {
                name: name.clone(),
                log_level: self.config.log_level,
                enabled: self.config.enable,
            },
            &self.config.protocol,
            &self.dsu,
        );
        let handle = stream.try_clone()?;

        let thread = thread::Builder::new().name(name.clone()).spawn(move || {
            if let Err(e) = session.run(stream) {
                tracing::warn!("Session {} ended with an error: {e}", session.name());
            }
        })?;

        tracing::info!("TCP {name} {peer} started");
        self.sessions.lock().push(SessionHandle {
            name,
            stream: handle,
            thread,
        });
        Ok(())
    }

    /// Join sessions whose client has gone.
    fn reap(&mut self) {
        let finished = {
            let mut sessions = self.sessions.lock();
            let (finished, active) = std::mem::take(&mut *sessions)
                .into_iter()
                .partition::<Vec<_>, _>(|session| session.thread.is_finished());
            *sessions = active;
            finished
        };

        for session in finished {
            session.close();
        }
    }
}

fn is_transient(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        std::io::ErrorKind::WouldBlock
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
    )
}
