//! Pipes: established connections between two sockets.
//!
//! A [`Link`] is the sending half of a pipe as seen by its owning [`Core`].
//! Stream links (TCP, IPC) encode frames onto a byte stream and run one reader
//! thread per pipe that feeds decoded frames back into the core. In-process
//! links hand frames straight to the peer core.
use std::{
    io::{self, BufReader, Read, Write},
    net::{Shutdown, TcpStream},
    sync::{
        Arc, Mutex, PoisonError, Weak,
        atomic::{AtomicU32, Ordering},
    },
    thread,
    time::Duration,
};

#[cfg(unix)]
use std::os::unix::net::UnixStream;

use log::{debug, trace, warn};

use super::{
    Core, Reservation, TransportError,
    wire::{Frame, FrameTransport},
};

static NEXT_PIPE: AtomicU32 = AtomicU32::new(1);

/// How long a stream handshake may take when the socket has no send timeout.
pub(crate) const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Pipe ids are unique across every socket in the process.
pub(crate) fn next_pipe_id() -> u32 {
    NEXT_PIPE.fetch_add(1, Ordering::Relaxed)
}

pub(crate) trait Link: Send + Sync {
    fn send(&self, frame: Frame) -> Result<(), TransportError>;

    /// Tears the connection down. Must tolerate being called more than once.
    fn shutdown(&self);
}

/// Byte streams a pipe can run over.
pub(crate) trait Stream: Read + Write + Send + Sync + Sized + 'static {
    fn duplicate(&self) -> io::Result<Self>;
    fn disconnect(&self);
    /// Bounds blocking reads and writes. `None` blocks indefinitely.
    fn set_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;
}

impl Stream for TcpStream {
    fn duplicate(&self) -> io::Result<Self> {
        self.try_clone()
    }

    fn disconnect(&self) {
        let _ = self.shutdown(Shutdown::Both);
    }

    fn set_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)?;
        self.set_write_timeout(timeout)
    }
}

#[cfg(unix)]
impl Stream for UnixStream {
    fn duplicate(&self) -> io::Result<Self> {
        self.try_clone()
    }

    fn disconnect(&self) {
        let _ = self.shutdown(Shutdown::Both);
    }

    fn set_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)?;
        self.set_write_timeout(timeout)
    }
}

struct StreamLink<S: Stream> {
    writer: Mutex<FrameTransport<S>>,
    control: S,
}

impl<S: Stream> Link for StreamLink<S> {
    fn send(&self, frame: Frame) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_frame(&frame)
    }

    fn shutdown(&self) {
        self.control.disconnect();
    }
}

/// Performs the pattern handshake over `stream` and attaches the resulting
/// pipe to `core`.
///
/// Each side claims a pipe slot first and then sends either `Hello` or, when
/// it has no room, `Reject` with the reason. The handshake is bounded by the
/// socket's send timeout, or [`HANDSHAKE_TIMEOUT`] when none is set.
pub(crate) fn establish<S: Stream>(core: &Arc<Core>, stream: S) -> Result<u32, TransportError> {
    let timeout = core.handshake_timeout().unwrap_or(HANDSHAKE_TIMEOUT);
    let outcome = stream
        .set_timeout(Some(timeout))
        .map_err(TransportError::from)
        .and_then(|_| handshake(core, &stream));

    let (reservation, writer, reader) = match outcome {
        Ok(parts) => parts,
        Err(e) => {
            stream.disconnect();
            return Err(e);
        }
    };
    if let Err(e) = stream.set_timeout(None) {
        stream.disconnect();
        return Err(e.into());
    }

    let id = next_pipe_id();
    let link = Arc::new(StreamLink {
        writer: Mutex::new(writer),
        control: stream,
    });

    if let Err(e) = reservation.attach(id, link.clone()) {
        link.shutdown();
        return Err(e);
    }

    let weak = Arc::downgrade(core);
    let spawned = thread::Builder::new()
        .name(format!("tether-pipe-{id}"))
        .spawn(move || read_loop(weak, id, reader));

    if let Err(e) = spawned {
        core.detach(id);
        return Err(e.into());
    }

    debug!("pipe {id} established");
    Ok(id)
}

type Handshake<'a, S> = (Reservation<'a>, FrameTransport<S>, FrameTransport<BufReader<S>>);

fn handshake<'a, S: Stream>(
    core: &'a Core,
    stream: &S,
) -> Result<Handshake<'a, S>, TransportError> {
    let mut writer = FrameTransport::new(stream.duplicate()?);
    let mut reader = FrameTransport::new(BufReader::new(stream.duplicate()?));

    let reservation = match core.reserve() {
        Ok(reservation) => reservation,
        Err(e) => {
            // Best effort: the peer may already be gone. Its greeting is read
            // so the rejection is not lost to a reset on close.
            let _ = writer.write_frame(&Frame::Reject { code: e.code() });
            let _ = reader.read_frame();
            return Err(e);
        }
    };

    writer.write_frame(&Frame::Hello {
        pattern: core.pattern(),
    })?;
    match reader.read_frame()? {
        Frame::Hello { pattern } if core.pattern().peer() == pattern => {
            Ok((reservation, writer, reader))
        }
        Frame::Reject { code } => {
            debug!("peer refused the pipe with code {code}");
            Err(match TransportError::from_code(code) {
                Some(TransportError::Closed) => TransportError::ConnectionRefused,
                Some(e) => e,
                None => TransportError::Protocol,
            })
        }
        frame => {
            debug!("incompatible peer handshake: {frame:?}");
            Err(TransportError::Protocol)
        }
    }
}

fn read_loop<R: Read>(core: Weak<Core>, id: u32, mut reader: FrameTransport<R>) {
    loop {
        match reader.read_frame() {
            Ok(Frame::Data { id: request, body }) => match core.upgrade() {
                Some(core) => core.deliver(id, request, body),
                None => break,
            },
            Ok(frame) => {
                warn!("pipe {id} sent an unexpected frame: {frame:?}");
                break;
            }
            Err(e) => {
                trace!("pipe {id} closed: {e}");
                break;
            }
        }
    }

    if let Some(core) = core.upgrade() {
        core.detach(id);
    }
}

/// One side of an in-process pipe. `pipe` is the id under which the peer
/// core knows this connection.
pub(crate) struct InprocLink {
    peer: Weak<Core>,
    pipe: u32,
}

impl InprocLink {
    pub fn new(peer: &Arc<Core>, pipe: u32) -> Self {
        Self {
            peer: Arc::downgrade(peer),
            pipe,
        }
    }
}

impl Link for InprocLink {
    fn send(&self, frame: Frame) -> Result<(), TransportError> {
        let peer = self.peer.upgrade().ok_or(TransportError::ConnectionShutdown)?;
        match frame {
            Frame::Data { id, body } => {
                peer.deliver(self.pipe, id, body);
                Ok(())
            }
            Frame::Hello { .. } | Frame::Reject { .. } => Err(TransportError::Protocol),
        }
    }

    fn shutdown(&self) {
        if let Some(peer) = self.peer.upgrade() {
            peer.detach(self.pipe);
        }
    }
}
