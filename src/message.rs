//! Owned outgoing payloads.
use crate::{
    Fallible,
    error::Error,
    transport::{MAX_MESSAGE_SIZE, TransportError},
};

/// A byte buffer built up before it is handed to a [`Context`](crate::Context).
///
/// Messages only grow. Sending one consumes it, so each buffer is released
/// exactly once: either by the send or by going out of scope.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Message {
    body: Vec<u8>,
}

impl Message {
    pub fn new() -> Fallible<Message> {
        Fallible::success(Self::default())
    }

    /// Allocates a message holding a copy of `content`.
    pub fn from_bytes(content: &[u8]) -> Fallible<Message> {
        let mut message = Self::default();
        message.extend(content).map(|_| message).into()
    }

    pub fn append(&mut self, content: &[u8]) -> Fallible<()> {
        self.extend(content).into()
    }

    fn extend(&mut self, content: &[u8]) -> Result<(), Error> {
        if self.body.len() + content.len() > MAX_MESSAGE_SIZE {
            return Err(TransportError::MessageTooLarge.into());
        }
        self.body
            .try_reserve_exact(content.len())
            .map_err(|_| TransportError::NoMemory)?;
        self.body.extend_from_slice(content);
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.body
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub(crate) fn into_body(self) -> Vec<u8> {
        self.body
    }
}
