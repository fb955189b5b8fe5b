//! Sockets: the owned endpoint every role is built on.
//!
//! A [`Socket`] starts unopened, is opened into exactly one [`Pattern`], and is
//! closed exactly once, either explicitly or when it is dropped. Role types such
//! as [`Requester`](crate::Requester) hold a socket and expose the operations
//! that make sense for their pattern; the operations they all share live on the
//! [`Endpoint`] trait.
//!
//! # Example
//! ```rust
//! use tether::{Error, Pattern, Socket};
//!
//! let mut socket = Socket::new();
//! assert!(socket.open(Pattern::Pair).is_success());
//!
//! let again = socket.open(Pattern::Pair);
//! assert_eq!(again.error_code(), Ok(Error::ALREADY_OPEN));
//! ```
use std::{sync::Arc, time::Duration};

use bincode::{Decode, Encode};
use log::debug;

use crate::{
    Fallible,
    error::Error,
    transport::{Core, SOCKET_CONTEXT, TransportError},
};

/// Interaction pattern a socket is opened into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode)]
pub enum Pattern {
    Request,
    Reply,
    Push,
    Pull,
    Pair,
}

impl Pattern {
    /// The pattern a compatible peer must be opened into.
    pub fn peer(self) -> Pattern {
        match self {
            Pattern::Request => Pattern::Reply,
            Pattern::Reply => Pattern::Request,
            Pattern::Push => Pattern::Pull,
            Pattern::Pull => Pattern::Push,
            Pattern::Pair => Pattern::Pair,
        }
    }

    /// Whether independent exchange contexts can be opened on this pattern.
    pub fn supports_contexts(self) -> bool {
        matches!(self, Pattern::Request | Pattern::Reply)
    }
}

enum Handle {
    Unopened,
    Open(Arc<Core>),
    Closed,
}

pub struct Socket {
    handle: Handle,
}

impl Default for Socket {
    fn default() -> Self {
        Self::new()
    }
}

impl Socket {
    pub fn new() -> Self {
        Self {
            handle: Handle::Unopened,
        }
    }

    /// Creates a socket already opened into `pattern`.
    pub fn with_pattern(pattern: Pattern) -> Fallible<Socket> {
        let mut socket = Self::new();
        let opened = socket.open(pattern);
        if !opened.is_success() {
            return opened.reinterpret_error_as();
        }
        Fallible::success(socket)
    }

    pub fn open(&mut self, pattern: Pattern) -> Fallible<()> {
        match self.handle {
            Handle::Unopened => {
                self.handle = Handle::Open(Core::open(pattern));
                debug!("opened {pattern:?} socket");
                Fallible::success_void()
            }
            Handle::Open(_) => Fallible::error(Error::ALREADY_OPEN),
            Handle::Closed => Fallible::error(TransportError::Closed.code()),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.handle, Handle::Open(_))
    }

    pub fn pattern(&self) -> Option<Pattern> {
        match &self.handle {
            Handle::Open(core) => Some(core.pattern()),
            _ => None,
        }
    }

    pub(crate) fn core(&self) -> Result<&Arc<Core>, Error> {
        match &self.handle {
            Handle::Open(core) => Ok(core),
            _ => Err(TransportError::Closed.into()),
        }
    }

    pub fn listen(&self, address: &str) -> Fallible<()> {
        self.core()
            .and_then(|core| Ok(core.listen(address)?))
            .into()
    }

    pub fn dial(&self, address: &str) -> Fallible<()> {
        self.core()
            .and_then(|core| Ok(core.dial(address)?))
            .into()
    }

    /// Sends directly on the socket. Only one exchange at a time may use the
    /// socket this way; concurrent exchanges need a [`Context`](crate::Context)
    /// each.
    pub fn send(&self, payload: &[u8]) -> Fallible<()> {
        self.core()
            .and_then(|core| Ok(core.send(SOCKET_CONTEXT, payload.to_vec())?))
            .into()
    }

    pub fn receive(&self) -> Fallible<Vec<u8>> {
        self.core()
            .and_then(|core| Ok(core.receive(SOCKET_CONTEXT)?))
            .into()
    }

    /// Bounds how long receives may block. Zero blocks indefinitely.
    pub fn set_receive_timeout(&self, timeout: Duration) -> Fallible<()> {
        let timeout = (!timeout.is_zero()).then_some(timeout);
        self.core()
            .and_then(|core| Ok(core.set_receive_timeout(timeout)?))
            .into()
    }

    /// Bounds how long sends may wait for a connected peer. Zero waits
    /// indefinitely.
    pub fn set_send_timeout(&self, timeout: Duration) -> Fallible<()> {
        let timeout = (!timeout.is_zero()).then_some(timeout);
        self.core()
            .and_then(|core| Ok(core.set_send_timeout(timeout)?))
            .into()
    }

    /// Releases the transport handle. Closing a closed or unopened socket
    /// does nothing.
    pub fn close(&mut self) -> Fallible<()> {
        if let Handle::Open(core) = std::mem::replace(&mut self.handle, Handle::Closed) {
            core.close();
        }
        Fallible::success_void()
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Operations shared by every role built on a [`Socket`].
pub trait Endpoint {
    fn socket(&self) -> &Socket;

    fn socket_mut(&mut self) -> &mut Socket;

    fn listen(&self, address: &str) -> Fallible<()> {
        self.socket().listen(address)
    }

    fn dial(&self, address: &str) -> Fallible<()> {
        self.socket().dial(address)
    }

    fn set_receive_timeout(&self, timeout: Duration) -> Fallible<()> {
        self.socket().set_receive_timeout(timeout)
    }

    fn set_send_timeout(&self, timeout: Duration) -> Fallible<()> {
        self.socket().set_send_timeout(timeout)
    }

    fn close(&mut self) -> Fallible<()> {
        self.socket_mut().close()
    }
}

#[cfg(test)]
mod tests {
    use std::{net::TcpListener, time::Instant};

    use tempdir::TempDir;

    use super::*;

    #[test]
    fn open_twice_is_rejected() {
        let mut socket = Socket::new();

        assert!(socket.open(Pattern::Reply).is_success());
        let again = socket.open(Pattern::Request);

        assert_eq!(again.error_code(), Ok(Error::ALREADY_OPEN));
        assert_eq!(socket.pattern(), Some(Pattern::Reply));
    }

    #[test]
    fn unopened_socket_reports_closed() {
        let socket = Socket::new();

        assert!(!socket.is_open());
        assert_eq!(
            socket.listen("inproc://unopened").error_code(),
            Ok(TransportError::Closed.code())
        );
        assert_eq!(
            socket.receive().error_code(),
            Ok(TransportError::Closed.code())
        );
    }

    #[test]
    fn close_is_idempotent() {
        let mut socket = Socket::with_pattern(Pattern::Push).into_result().unwrap();

        assert!(socket.close().is_success());
        assert!(socket.close().is_success());
        assert!(!socket.is_open());
        assert_eq!(
            socket.open(Pattern::Push).error_code(),
            Ok(TransportError::Closed.code())
        );
    }

    #[test]
    fn listen_rejects_bad_addresses() {
        let socket = Socket::with_pattern(Pattern::Reply).into_result().unwrap();

        assert_eq!(
            socket.listen("nowhere").error_code(),
            Ok(TransportError::AddressInvalid.code())
        );
        assert_eq!(
            socket.listen("udp://127.0.0.1:1").error_code(),
            Ok(TransportError::NotSupported.code())
        );
    }

    #[test]
    fn listen_twice_on_same_inproc_name() {
        let first = Socket::with_pattern(Pattern::Reply).into_result().unwrap();
        let second = Socket::with_pattern(Pattern::Reply).into_result().unwrap();

        assert!(first.listen("inproc://socket-in-use").is_success());
        assert_eq!(
            second.listen("inproc://socket-in-use").error_code(),
            Ok(TransportError::AddressInUse.code())
        );
    }

    #[test]
    fn dial_without_listener_is_refused() {
        let socket = Socket::with_pattern(Pattern::Request).into_result().unwrap();

        assert_eq!(
            socket.dial("inproc://socket-nobody-home").error_code(),
            Ok(TransportError::ConnectionRefused.code())
        );
    }

    #[test]
    fn dial_incompatible_pattern() {
        let server = Socket::with_pattern(Pattern::Pull).into_result().unwrap();
        let client = Socket::with_pattern(Pattern::Request).into_result().unwrap();

        assert!(server.listen("inproc://socket-mismatch").is_success());
        assert_eq!(
            client.dial("inproc://socket-mismatch").error_code(),
            Ok(TransportError::Protocol.code())
        );
    }

    #[cfg(unix)]
    #[test]
    fn dial_incompatible_pattern_over_ipc() {
        let dir = TempDir::new("tether").unwrap();
        let address = format!("ipc://{}", dir.path().join("mismatch.ipc").display());
        let server = Socket::with_pattern(Pattern::Pull).into_result().unwrap();
        let client = Socket::with_pattern(Pattern::Request).into_result().unwrap();

        assert!(server.listen(&address).is_success());
        assert_eq!(
            client.dial(&address).error_code(),
            Ok(TransportError::Protocol.code())
        );
    }

    #[test]
    fn dial_to_silent_peer_times_out() {
        // Accepts connections but never speaks.
        let silent = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = format!("tcp://{}", silent.local_addr().unwrap());
        let client = Socket::with_pattern(Pattern::Request).into_result().unwrap();
        assert!(
            client
                .set_send_timeout(Duration::from_millis(200))
                .is_success()
        );

        let started = Instant::now();
        let dialed = client.dial(&address);

        assert_eq!(dialed.error_code(), Ok(TransportError::TimedOut.code()));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[cfg(unix)]
    #[test]
    fn close_removes_ipc_socket_file() {
        let dir = TempDir::new("tether").unwrap();
        let path = dir.path().join("removed.ipc");
        let mut socket = Socket::with_pattern(Pattern::Reply).into_result().unwrap();

        assert!(
            socket
                .listen(&format!("ipc://{}", path.display()))
                .is_success()
        );
        assert!(path.exists());
        assert!(socket.close().is_success());
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn listen_in_missing_directory_is_an_invalid_address() {
        let dir = TempDir::new("tether").unwrap();
        let path = dir.path().join("missing").join("x.ipc");
        let socket = Socket::with_pattern(Pattern::Reply).into_result().unwrap();

        assert_eq!(
            socket.listen(&format!("ipc://{}", path.display())).error_code(),
            Ok(TransportError::AddressInvalid.code())
        );
    }

    #[test]
    fn closed_listener_frees_its_address() {
        let mut first = Socket::with_pattern(Pattern::Pull).into_result().unwrap();
        assert!(first.listen("inproc://socket-reuse").is_success());
        assert!(first.close().is_success());

        let second = Socket::with_pattern(Pattern::Pull).into_result().unwrap();
        assert!(second.listen("inproc://socket-reuse").is_success());
    }

    #[test]
    fn direct_send_and_receive_over_pair() {
        let left = Socket::with_pattern(Pattern::Pair).into_result().unwrap();
        let right = Socket::with_pattern(Pattern::Pair).into_result().unwrap();

        assert!(left.listen("inproc://socket-pair").is_success());
        assert!(right.dial("inproc://socket-pair").is_success());

        assert!(right.send(b"ping").is_success());
        assert_eq!(left.receive().into_result().unwrap(), b"ping");
    }
}
