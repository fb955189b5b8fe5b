//! One-way pipeline roles: a [`Sender`] pushes, a [`Receiver`] pulls.
//!
//! A sender connected to several receivers distributes messages round-robin.
//! There are no replies and no contexts.
use crate::{Endpoint, Fallible, Pattern, Socket};

/// Push side of a pipeline.
pub struct Sender {
    socket: Socket,
}

impl Sender {
    pub fn new() -> Fallible<Sender> {
        Socket::with_pattern(Pattern::Push).map(|socket| Sender { socket })
    }

    pub fn send(&self, payload: &[u8]) -> Fallible<()> {
        self.socket.send(payload)
    }
}

impl Endpoint for Sender {
    fn socket(&self) -> &Socket {
        &self.socket
    }

    fn socket_mut(&mut self) -> &mut Socket {
        &mut self.socket
    }
}

/// Pull side of a pipeline.
pub struct Receiver {
    socket: Socket,
}

impl Receiver {
    pub fn new() -> Fallible<Receiver> {
        Socket::with_pattern(Pattern::Pull).map(|socket| Receiver { socket })
    }

    pub fn receive(&self) -> Fallible<Vec<u8>> {
        self.socket.receive()
    }
}

impl Endpoint for Receiver {
    fn socket(&self) -> &Socket {
        &self.socket
    }

    fn socket_mut(&mut self) -> &mut Socket {
        &mut self.socket
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        thread,
        time::{Duration, Instant},
    };

    use crate::transport::{INBOUND_CAPACITY, TransportError};

    use super::*;

    #[test]
    fn messages_arrive_in_order() {
        let receiver = Receiver::new().into_result().unwrap();
        let sender = Sender::new().into_result().unwrap();
        assert!(receiver.listen("inproc://pipeline-order").is_success());
        assert!(sender.dial("inproc://pipeline-order").is_success());

        for i in 0..10u8 {
            assert!(sender.send(&[i]).is_success());
        }
        for i in 0..10u8 {
            assert_eq!(receiver.receive().into_result().unwrap(), vec![i]);
        }
    }

    #[test]
    fn sender_spreads_over_receivers() {
        let sender = Sender::new().into_result().unwrap();
        let first = Receiver::new().into_result().unwrap();
        let second = Receiver::new().into_result().unwrap();
        assert!(sender.listen("inproc://pipeline-spread").is_success());
        assert!(first.dial("inproc://pipeline-spread").is_success());
        assert!(second.dial("inproc://pipeline-spread").is_success());

        for _ in 0..4 {
            assert!(sender.send(b"job").is_success());
        }

        for receiver in [&first, &second] {
            assert!(
                receiver
                    .set_receive_timeout(Duration::from_millis(100))
                    .is_success()
            );
            assert!(receiver.receive().is_success());
            assert!(receiver.receive().is_success());
            assert_eq!(
                receiver.receive().error_code(),
                Ok(TransportError::TimedOut.code())
            );
        }
    }

    #[test]
    fn send_times_out_without_receivers() {
        let sender = Sender::new().into_result().unwrap();
        assert!(
            sender
                .set_send_timeout(Duration::from_millis(50))
                .is_success()
        );

        assert_eq!(
            sender.send(b"lost").error_code(),
            Ok(TransportError::TimedOut.code())
        );
    }

    /// Waits until `count` reaches `target`, for at most five seconds.
    fn wait_for(count: &AtomicUsize, target: usize) {
        let started = Instant::now();
        while count.load(Ordering::Acquire) < target {
            assert!(
                started.elapsed() < Duration::from_secs(5),
                "stuck below {target}"
            );
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn full_receiver_holds_back_the_sender() {
        let receiver = Receiver::new().into_result().unwrap();
        let sender = Sender::new().into_result().unwrap();
        assert!(receiver.listen("inproc://pipeline-backlog").is_success());
        assert!(sender.dial("inproc://pipeline-backlog").is_success());
        let sent = AtomicUsize::new(0);

        thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..=INBOUND_CAPACITY {
                    assert!(sender.send(b"item").is_success());
                    sent.fetch_add(1, Ordering::AcqRel);
                }
            });

            wait_for(&sent, INBOUND_CAPACITY);
            thread::sleep(Duration::from_millis(100));
            assert_eq!(sent.load(Ordering::Acquire), INBOUND_CAPACITY);

            assert!(receiver.receive().is_success());
            wait_for(&sent, INBOUND_CAPACITY + 1);
        });
    }

    #[test]
    fn close_releases_a_blocked_sender() {
        let mut receiver = Receiver::new().into_result().unwrap();
        let sender = Sender::new().into_result().unwrap();
        assert!(receiver.listen("inproc://pipeline-backlog-close").is_success());
        assert!(sender.dial("inproc://pipeline-backlog-close").is_success());
        assert!(sender.set_send_timeout(Duration::from_secs(1)).is_success());
        for _ in 0..INBOUND_CAPACITY {
            assert!(sender.send(b"item").is_success());
        }

        thread::scope(|s| {
            let blocked = s.spawn(|| sender.send(b"overflow"));
            thread::sleep(Duration::from_millis(50));
            assert!(!blocked.is_finished());

            assert!(receiver.close().is_success());
            // Either the message is dropped with the queue or the pipe is
            // already gone and the send times out; it must not hang.
            let _ = blocked.join().unwrap();
        });
    }
}
