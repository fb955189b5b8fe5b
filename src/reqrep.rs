//! Request/reply roles.
//!
//! [`Requester`] is the client side: it issues requests and waits for their
//! replies. [`Responder`] is the server side: it accepts requests and hands each
//! one out as a [`PendingRequest`] that must be answered exactly once.
//!
//! Both roles offer a direct, single-exchange form (`exchange`, `receive`/`send`)
//! and a concurrent form (`exchange_concurrent`, `receive_concurrent`) that opens a
//! private [`Context`] per exchange. Only the concurrent forms may be used from
//! several threads at once.
//!
//! # Example
//! ```rust
//! use std::thread;
//! use tether::{Endpoint, Requester, Responder};
//!
//! let responder = Responder::new().into_result().unwrap();
//! let requester = Requester::new().into_result().unwrap();
//! responder.listen("inproc://reqrep-doc").into_result().unwrap();
//! requester.dial("inproc://reqrep-doc").into_result().unwrap();
//!
//! thread::scope(|s| {
//!     s.spawn(|| {
//!         let mut request = responder.receive_concurrent().into_result().unwrap();
//!         let echo = request.payload().to_vec();
//!         request.reply(&echo).into_result().unwrap();
//!     });
//!
//!     let response = requester.exchange_concurrent(b"42").into_result().unwrap();
//!     assert_eq!(response, b"42");
//! });
//! ```
use log::debug;

use crate::{Context, Endpoint, Fallible, Message, Pattern, Socket, error::Error};

/// Client role over a request socket.
pub struct Requester {
    socket: Socket,
}

impl Requester {
    pub fn new() -> Fallible<Requester> {
        Socket::with_pattern(Pattern::Request).map(|socket| Requester { socket })
    }

    /// Sends `payload` and waits for the reply directly on the socket.
    ///
    /// Only one such exchange can be in flight per requester, which the
    /// `&mut self` receiver enforces.
    pub fn exchange(&mut self, payload: &[u8]) -> Fallible<Vec<u8>> {
        let sent = self.socket.send(payload);
        if !sent.is_success() {
            return sent.reinterpret_error_as();
        }
        self.socket.receive()
    }

    /// Sends `payload` through a context of its own and waits for the
    /// matching reply. Safe to call from any number of threads at once.
    pub fn exchange_concurrent(&self, payload: &[u8]) -> Fallible<Vec<u8>> {
        let exchange = || -> Result<Vec<u8>, Error> {
            let mut context = Context::open(&self.socket).into_result()?;
            let message = Message::from_bytes(payload).into_result()?;
            context.send(message).into_result()?;
            context.receive().into_result()
        };
        exchange().into()
    }
}

impl Endpoint for Requester {
    fn socket(&self) -> &Socket {
        &self.socket
    }

    fn socket_mut(&mut self) -> &mut Socket {
        &mut self.socket
    }
}

/// Server role over a reply socket.
pub struct Responder {
    socket: Socket,
}

impl Responder {
    pub fn new() -> Fallible<Responder> {
        Socket::with_pattern(Pattern::Reply).map(|socket| Responder { socket })
    }

    /// Receives one request directly on the socket. It must be answered with
    /// [`Responder::send`] before the next direct receive.
    pub fn receive(&mut self) -> Fallible<Vec<u8>> {
        self.socket.receive()
    }

    pub fn send(&mut self, payload: &[u8]) -> Fallible<()> {
        self.socket.send(payload)
    }

    /// Claims the next inbound request on a context of its own. Safe to call
    /// from any number of threads at once.
    pub fn receive_concurrent(&self) -> Fallible<PendingRequest> {
        let mut context = match Context::open(&self.socket) {
            Fallible::Success(context) => context,
            other => return other.reinterpret_error_as(),
        };

        let payload = match context.receive() {
            Fallible::Success(payload) => payload,
            other => return other.reinterpret_error_as(),
        };

        Fallible::success(PendingRequest {
            context: Some(context),
            payload,
        })
    }
}

impl Endpoint for Responder {
    fn socket(&self) -> &Socket {
        &self.socket
    }

    fn socket_mut(&mut self) -> &mut Socket {
        &mut self.socket
    }
}

/// A received request that still owes its requester a reply.
///
/// The request holds on to the context it arrived on until [`reply`] is
/// called. Dropping it unanswered releases the context and the requester
/// never hears back (until its own timeout, if any).
///
/// [`reply`]: PendingRequest::reply
pub struct PendingRequest {
    context: Option<Context>,
    payload: Vec<u8>,
}

impl PendingRequest {
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn is_replied(&self) -> bool {
        self.context.is_none()
    }

    /// Sends the reply and releases the context. The request is finished
    /// after this call even if the send fails; a second call returns
    /// [`Error::ALREADY_REPLIED`] and sends nothing.
    pub fn reply(&mut self, payload: &[u8]) -> Fallible<()> {
        let Some(mut context) = self.context.take() else {
            return Fallible::error(Error::ALREADY_REPLIED);
        };

        Message::from_bytes(payload)
            .into_result()
            .and_then(|message| context.send(message).into_result())
            .into()
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        if let Some(context) = &self.context {
            debug!("request on context {} dropped without a reply", context.id());
        }
    }
}
