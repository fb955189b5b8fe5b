use std::io::{Read, Write};

use bincode::{
    Decode, Encode,
    config::{BigEndian, Configuration, Fixint, Limit},
    decode_from_std_read, encode_to_vec,
};

use crate::Pattern;

use super::TransportError;

/// Largest message body accepted by the transport.
pub const MAX_MESSAGE_SIZE: usize = 1 << 20;

// Body plus the variant tag, request id and length prefix.
const FRAME_LIMIT: usize = MAX_MESSAGE_SIZE + 32;

/// Unit exchanged between two connected sockets.
#[derive(Debug, Encode, Decode, PartialEq, Eq)]
pub(crate) enum Frame {
    /// First frame on every stream; announces the sender's pattern.
    Hello { pattern: Pattern },
    /// Payload frame. `id` correlates a request with its reply and is
    /// zero for patterns without correlation.
    Data { id: u32, body: Vec<u8> },
    /// Sent instead of `Hello` when the sender cannot take another pipe.
    Reject { code: i32 },
}

pub(crate) struct FrameTransport<T> {
    stream: T,
    config: Configuration<BigEndian, Fixint, Limit<FRAME_LIMIT>>,
}

impl<T> FrameTransport<T> {
    pub fn new(stream: T) -> Self {
        let config = bincode::config::standard()
            .with_big_endian()
            .with_fixed_int_encoding()
            .with_limit::<FRAME_LIMIT>();
        Self { stream, config }
    }
}

impl<T: Write> FrameTransport<T> {
    pub fn write_frame(&mut self, frame: &Frame) -> Result<(), TransportError> {
        if let Frame::Data { body, .. } = frame {
            if body.len() > MAX_MESSAGE_SIZE {
                return Err(TransportError::MessageTooLarge);
            }
        }
        // One write per frame keeps concurrent writers from interleaving.
        let bytes = encode_to_vec(frame, self.config)?;
        self.stream.write_all(&bytes)?;
        self.stream.flush()?;
        Ok(())
    }
}

impl<T: Read> FrameTransport<T> {
    pub fn read_frame(&mut self) -> Result<Frame, TransportError> {
        let frame: Frame = decode_from_std_read(&mut self.stream, self.config)?;
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Seek, SeekFrom};

    use super::*;

    #[test]
    fn read_write_hello() {
        let mut transport = FrameTransport::new(Cursor::new(Vec::new()));

        transport
            .write_frame(&Frame::Hello {
                pattern: Pattern::Request,
            })
            .unwrap();
        transport.stream.seek(SeekFrom::Start(0)).unwrap();

        let frame = transport.read_frame().unwrap();
        assert_eq!(
            frame,
            Frame::Hello {
                pattern: Pattern::Request
            }
        );
    }

    #[test]
    fn read_write_data() {
        let mut transport = FrameTransport::new(Cursor::new(Vec::new()));
        let frame = Frame::Data {
            id: 7,
            body: b"ping".to_vec(),
        };

        transport.write_frame(&frame).unwrap();
        transport.stream.seek(SeekFrom::Start(0)).unwrap();

        assert_eq!(transport.read_frame().unwrap(), frame);
    }

    #[test]
    fn oversized_body_is_rejected_before_writing() {
        let mut transport = FrameTransport::new(Cursor::new(Vec::new()));
        let frame = Frame::Data {
            id: 1,
            body: vec![0; MAX_MESSAGE_SIZE + 1],
        };

        let err = transport.write_frame(&frame).unwrap_err();
        assert_eq!(err, TransportError::MessageTooLarge);
        assert!(transport.stream.get_ref().is_empty());
    }

    #[test]
    fn oversized_body_is_rejected_when_reading() {
        let unlimited = bincode::config::standard()
            .with_big_endian()
            .with_fixed_int_encoding();
        let frame = Frame::Data {
            id: 1,
            body: vec![0; FRAME_LIMIT + 1],
        };
        let bytes = encode_to_vec(&frame, unlimited).unwrap();
        let mut transport = FrameTransport::new(Cursor::new(bytes));

        let err = transport.read_frame().unwrap_err();
        assert_eq!(err, TransportError::MessageTooLarge);
    }

    #[test]
    fn read_write_reject() {
        let mut transport = FrameTransport::new(Cursor::new(Vec::new()));
        let frame = Frame::Reject {
            code: TransportError::Busy.code(),
        };

        transport.write_frame(&frame).unwrap();
        transport.stream.seek(SeekFrom::Start(0)).unwrap();

        assert_eq!(transport.read_frame().unwrap(), frame);
    }

    #[test]
    fn truncated_stream_reports_shutdown() {
        let mut transport = FrameTransport::new(Cursor::new(vec![0u8, 0, 0]));

        let err = transport.read_frame().unwrap_err();
        assert_eq!(err, TransportError::ConnectionShutdown);
    }
}
