//! Request/reply sockets that keep many exchanges in flight over one endpoint.
//!
//! Every fallible operation returns a [`Fallible`]: a success, an [`Error`]
//! code, or one of the two usage-error sentinels (empty, consumed). Nothing in
//! the public API panics on a failed operation.
//!
//! Concurrency comes from [`Context`]s: one per exchange, many per socket. The
//! role types build on them: [`Requester::exchange_concurrent`] and
//! [`Responder::receive_concurrent`] may be called from any number of threads.
pub mod cli;
pub mod context;
pub mod error;
pub mod fallible;
pub mod message;
pub mod pair;
pub mod pipeline;
pub mod reqrep;
pub mod socket;
pub mod transport;

mod thread;

pub use context::Context;
pub use error::Error;
pub use fallible::Fallible;
pub use message::Message;
pub use pair::Peer;
pub use reqrep::{PendingRequest, Requester, Responder};
pub use socket::{Endpoint, Pattern, Socket};
pub use transport::TransportError;
