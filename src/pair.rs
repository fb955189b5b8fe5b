//! Exclusive two-way connection between two [`Peer`]s.
use crate::{Endpoint, Fallible, Pattern, Socket};

/// One end of a pair. Accepts a single connected peer; further connection
/// attempts are refused.
pub struct Peer {
    socket: Socket,
}

impl Peer {
    pub fn new() -> Fallible<Peer> {
        Socket::with_pattern(Pattern::Pair).map(|socket| Peer { socket })
    }

    pub fn send(&self, payload: &[u8]) -> Fallible<()> {
        self.socket.send(payload)
    }

    pub fn receive(&self) -> Fallible<Vec<u8>> {
        self.socket.receive()
    }
}

impl Endpoint for Peer {
    fn socket(&self) -> &Socket {
        &self.socket
    }

    fn socket_mut(&mut self) -> &mut Socket {
        &mut self.socket
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempdir::TempDir;

    use crate::transport::TransportError;

    use super::*;

    #[test]
    fn peers_talk_both_ways() {
        let left = Peer::new().into_result().unwrap();
        let right = Peer::new().into_result().unwrap();
        assert!(left.listen("inproc://pair-both-ways").is_success());
        assert!(right.dial("inproc://pair-both-ways").is_success());

        assert!(left.send(b"marco").is_success());
        assert_eq!(right.receive().into_result().unwrap(), b"marco");
        assert!(right.send(b"polo").is_success());
        assert_eq!(left.receive().into_result().unwrap(), b"polo");
    }

    #[test]
    fn third_peer_is_refused() {
        let host = Peer::new().into_result().unwrap();
        let first = Peer::new().into_result().unwrap();
        let second = Peer::new().into_result().unwrap();
        assert!(host.listen("inproc://pair-busy").is_success());

        assert!(first.dial("inproc://pair-busy").is_success());
        assert_eq!(
            second.dial("inproc://pair-busy").error_code(),
            Ok(TransportError::Busy.code())
        );
    }

    #[cfg(unix)]
    #[test]
    fn third_peer_is_refused_over_ipc() {
        let dir = TempDir::new("tether").unwrap();
        let address = format!("ipc://{}", dir.path().join("pair.ipc").display());
        let host = Peer::new().into_result().unwrap();
        let first = Peer::new().into_result().unwrap();
        let second = Peer::new().into_result().unwrap();
        assert!(host.listen(&address).is_success());
        assert!(
            host.set_receive_timeout(Duration::from_secs(5))
                .is_success()
        );

        assert!(first.dial(&address).is_success());
        assert_eq!(
            second.dial(&address).error_code(),
            Ok(TransportError::Busy.code())
        );

        // The refused dial leaves the established pipe alone.
        assert!(first.send(b"still here").is_success());
        assert_eq!(host.receive().into_result().unwrap(), b"still here");
    }
}
