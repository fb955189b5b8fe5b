//! Per-exchange contexts.
//!
//! A socket on its own can carry one request/reply exchange at a time. A
//! [`Context`] gives one exchange its own slot on the socket, so any number of
//! exchanges can be in flight over the same socket at once: the transport
//! correlates each reply with the context that sent the request, and assigns
//! each inbound request to exactly one receiving context.
//!
//! Contexts are cheap. The usual pattern is one context per exchange, dropped
//! once the exchange is over.
//!
//! # Example
//! ```rust
//! use tether::{Context, Message, Pattern, Socket};
//!
//! let server = Socket::with_pattern(Pattern::Reply).into_result().unwrap();
//! let client = Socket::with_pattern(Pattern::Request).into_result().unwrap();
//! server.listen("inproc://context-doc").into_result().unwrap();
//! client.dial("inproc://context-doc").into_result().unwrap();
//!
//! let mut outgoing = Context::open(&client).into_result().unwrap();
//! let mut incoming = Context::open(&server).into_result().unwrap();
//!
//! let message = Message::from_bytes(b"hello").into_result().unwrap();
//! outgoing.send(message).into_result().unwrap();
//!
//! let request = incoming.receive().into_result().unwrap();
//! incoming.send(Message::from_bytes(&request).into_result().unwrap()).into_result().unwrap();
//!
//! assert_eq!(outgoing.receive().into_result().unwrap(), b"hello");
//! ```
use std::sync::Arc;

use log::trace;

use crate::{Fallible, Message, Socket, error::Error, transport::Core};

/// One logical exchange multiplexed over a [`Socket`].
///
/// A context is used by one exchange at a time, hence the `&mut self`
/// receivers. It can be moved to another thread between operations.
pub struct Context {
    core: Arc<Core>,
    id: u32,
}

impl Context {
    /// Opens a context on `socket`. Fails if the socket is not open or its
    /// pattern has no contexts.
    pub fn open(socket: &Socket) -> Fallible<Context> {
        socket
            .core()
            .and_then(|core| {
                let id = core.open_context()?;
                trace!("context {id} opened");
                Ok(Context {
                    core: Arc::clone(core),
                    id,
                })
            })
            .into()
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Sends `message` as part of this context's exchange. The message is
    /// consumed whether or not the send succeeds.
    pub fn send(&mut self, message: Message) -> Fallible<()> {
        self.core
            .send(self.id, message.into_body())
            .map_err(Error::from)
            .into()
    }

    /// Blocks until the message correlated with this context arrives, or the
    /// socket's receive timeout elapses.
    pub fn receive(&mut self) -> Fallible<Vec<u8>> {
        self.core.receive(self.id).map_err(Error::from).into()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.core.close_context(self.id);
    }
}
