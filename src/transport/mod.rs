//! Message transport underneath [`Socket`](crate::Socket).
//!
//! Each open socket owns one [`Core`]: the engine that tracks connected pipes,
//! per-exchange context slots, and the queue of inbound messages. The rest of
//! the crate talks to the transport only through `Core` and the numeric codes of
//! [`TransportError`].
//!
//! # Patterns
//!
//! - `Request`: every send allocates a fresh request id and records which context
//!   is waiting for it. Replies are routed to that context; replies nobody waits
//!   for any more are discarded.
//! - `Reply`: inbound requests are queued; a receive assigns the oldest one to the
//!   receiving context, whose next send routes the reply back to the same pipe.
//! - `Push`/`Pull`/`Pair`: plain delivery without correlation. Pair accepts a
//!   single peer.
//!
//! Reply, pull and pair sockets queue at most [`INBOUND_CAPACITY`] messages.
//! Further deliveries wait until a receive makes room or the socket closes.
//!
//! # Addresses
//!
//! - `tcp://host:port`
//! - `ipc://path` (Unix domain sockets)
//! - `inproc://name`
//!
//! # Wire Format
//!
//! Stream transports exchange bincode-encoded [`Frame`](wire::Frame)s, big-endian
//! with fixed-width integers. Both sides send a `Hello` carrying their pattern
//! before any data; incompatible patterns are rejected with
//! [`TransportError::Protocol`]. A side that cannot take the pipe (a pair socket
//! that already has its peer) sends `Reject` with the error code instead.
//! The handshake is bounded by the socket's send timeout, or five seconds.
mod address;
mod error;
mod link;
mod listener;
mod wire;

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    mem,
    net::TcpStream,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use log::{debug, trace, warn};

use crate::Pattern;

use address::Address;
use link::Link;
use listener::Listener;
use wire::Frame;

pub use error::TransportError;
pub use wire::MAX_MESSAGE_SIZE;

/// Context id used by direct socket send/receive.
pub(crate) const SOCKET_CONTEXT: u32 = 0;

/// Messages a socket queues before deliveries block until a receive makes room.
pub(crate) const INBOUND_CAPACITY: usize = 1024;

/// Per-context exchange state.
#[derive(Default)]
struct Slot {
    /// Request id this context is waiting on.
    request: Option<u32>,
    reply: Option<Result<Vec<u8>, TransportError>>,
    /// Pipe and request id of the request this context must answer.
    backtrace: Option<(u32, u32)>,
}

struct Inbound {
    pipe: u32,
    request: u32,
    body: Vec<u8>,
}

#[derive(Default)]
struct State {
    closed: bool,
    pipes: BTreeMap<u32, Arc<dyn Link>>,
    cursor: u32,
    listeners: Vec<Listener>,
    /// Stream pipes still negotiating; each holds a [`Reservation`].
    handshakes: usize,
    inbound: VecDeque<Inbound>,
    contexts: HashMap<u32, Slot>,
    next_context: u32,
    /// request id -> (context id, pipe id)
    outstanding: HashMap<u32, (u32, u32)>,
    next_request: u32,
    recv_timeout: Option<Duration>,
    send_timeout: Option<Duration>,
}

impl State {
    /// Picks the next connected pipe, round-robin by id.
    fn next_pipe(&mut self) -> Option<(u32, Arc<dyn Link>)> {
        let (id, link) = self
            .pipes
            .range(self.cursor.wrapping_add(1)..)
            .next()
            .or_else(|| self.pipes.iter().next())
            .map(|(id, link)| (*id, Arc::clone(link)))?;
        self.cursor = id;
        Some((id, link))
    }

    fn allocate_context(&mut self) -> u32 {
        loop {
            self.next_context = self.next_context.wrapping_add(1);
            let id = self.next_context;
            if id != SOCKET_CONTEXT && !self.contexts.contains_key(&id) {
                self.contexts.insert(id, Slot::default());
                return id;
            }
        }
    }

    fn allocate_request(&mut self) -> u32 {
        loop {
            self.next_request = self.next_request.wrapping_add(1);
            let id = self.next_request;
            if id != 0 && !self.outstanding.contains_key(&id) {
                return id;
            }
        }
    }

    /// Drops any request `ctx` is still waiting on.
    fn abandon(&mut self, ctx: u32) {
        if let Some(slot) = self.contexts.get_mut(&ctx) {
            slot.reply = None;
            if let Some(request) = slot.request.take() {
                self.outstanding.remove(&request);
            }
        }
    }
}

fn deadline(timeout: Option<Duration>) -> Option<Instant> {
    timeout.map(|t| Instant::now() + t)
}

/// The transport engine behind one open socket.
pub(crate) struct Core {
    pattern: Pattern,
    state: Mutex<State>,
    signal: Condvar,
}

impl Core {
    pub fn open(pattern: Pattern) -> Arc<Self> {
        let mut state = State::default();
        state.contexts.insert(SOCKET_CONTEXT, Slot::default());

        Arc::new(Self {
            pattern,
            state: Mutex::new(state),
            signal: Condvar::new(),
        })
    }

    pub fn pattern(&self) -> Pattern {
        self.pattern
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until `ready` holds, the deadline passes, or the socket closes.
    fn wait<'a, F>(
        &'a self,
        mut state: MutexGuard<'a, State>,
        deadline: Option<Instant>,
        mut ready: F,
    ) -> Result<MutexGuard<'a, State>, TransportError>
    where
        F: FnMut(&mut State) -> Result<bool, TransportError>,
    {
        loop {
            if state.closed {
                return Err(TransportError::Closed);
            }
            if ready(&mut state)? {
                return Ok(state);
            }

            state = match deadline {
                None => self
                    .signal
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(TransportError::TimedOut);
                    }
                    self.signal
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    pub fn set_receive_timeout(&self, timeout: Option<Duration>) -> Result<(), TransportError> {
        let mut state = self.state();
        if state.closed {
            return Err(TransportError::Closed);
        }
        state.recv_timeout = timeout;
        Ok(())
    }

    pub fn set_send_timeout(&self, timeout: Option<Duration>) -> Result<(), TransportError> {
        let mut state = self.state();
        if state.closed {
            return Err(TransportError::Closed);
        }
        state.send_timeout = timeout;
        Ok(())
    }

    pub fn listen(self: &Arc<Self>, url: &str) -> Result<(), TransportError> {
        if self.state().closed {
            return Err(TransportError::Closed);
        }

        let listener = match Address::parse(url)? {
            Address::Tcp(address) => Listener::tcp(self, &address)?,
            Address::Ipc(path) => Listener::ipc(self, &path)?,
            Address::Inproc(name) => Listener::inproc(self, &name)?,
        };

        let mut state = self.state();
        if state.closed {
            drop(state);
            listener.shutdown();
            return Err(TransportError::Closed);
        }
        state.listeners.push(listener);
        Ok(())
    }

    pub fn dial(self: &Arc<Self>, url: &str) -> Result<(), TransportError> {
        if self.state().closed {
            return Err(TransportError::Closed);
        }

        match Address::parse(url)? {
            Address::Tcp(address) => {
                let stream = TcpStream::connect(address.as_str())?;
                stream.set_nodelay(true)?;
                link::establish(self, stream)?;
            }
            #[cfg(unix)]
            Address::Ipc(path) => {
                let stream = std::os::unix::net::UnixStream::connect(&path)?;
                link::establish(self, stream)?;
            }
            #[cfg(not(unix))]
            Address::Ipc(_) => return Err(TransportError::NotSupported),
            Address::Inproc(name) => listener::dial_inproc(self, &name)?,
        }

        debug!("dialed {url}");
        Ok(())
    }

    /// Fails with `Busy` when a pair socket already has, or is negotiating, a peer.
    fn admit(&self, state: &State) -> Result<(), TransportError> {
        if state.closed {
            return Err(TransportError::Closed);
        }
        if self.pattern == Pattern::Pair && (!state.pipes.is_empty() || state.handshakes > 0) {
            return Err(TransportError::Busy);
        }
        Ok(())
    }

    /// Registers an established pipe.
    pub(crate) fn attach(&self, pipe: u32, link: Arc<dyn Link>) -> Result<(), TransportError> {
        let mut state = self.state();
        self.admit(&state)?;

        state.pipes.insert(pipe, link);
        self.signal.notify_all();
        Ok(())
    }

    /// Claims room for a pipe before its handshake starts, so a full socket
    /// can refuse the peer during the handshake instead of after it.
    pub(crate) fn reserve(&self) -> Result<Reservation<'_>, TransportError> {
        let mut state = self.state();
        self.admit(&state)?;

        state.handshakes += 1;
        Ok(Reservation {
            core: self,
            held: true,
        })
    }

    /// Bound on a stream handshake: the send timeout, if one is set.
    pub(crate) fn handshake_timeout(&self) -> Option<Duration> {
        self.state().send_timeout
    }

    /// Forgets a pipe and tears its connection down. Idempotent.
    pub(crate) fn detach(&self, pipe: u32) {
        let link = {
            let mut guard = self.state();
            let state = &mut *guard;
            let Some(link) = state.pipes.remove(&pipe) else {
                return;
            };

            let orphaned: Vec<u32> = state
                .outstanding
                .iter()
                .filter(|(_, (_, p))| *p == pipe)
                .map(|(request, _)| *request)
                .collect();
            for request in orphaned {
                if let Some((ctx, _)) = state.outstanding.remove(&request) {
                    if let Some(slot) = state.contexts.get_mut(&ctx) {
                        slot.reply = Some(Err(TransportError::ConnectionShutdown));
                    }
                }
            }

            self.signal.notify_all();
            link
        };

        debug!("pipe {pipe} detached");
        link.shutdown();
    }

    /// Hands a message received on `pipe` to the socket, waiting while the
    /// inbound queue is full.
    pub(crate) fn deliver(&self, pipe: u32, request: u32, body: Vec<u8>) {
        let queued = matches!(self.pattern, Pattern::Reply | Pattern::Pull | Pattern::Pair);
        let waited = self.wait(self.state(), None, |s| {
            Ok(!queued || !s.pipes.contains_key(&pipe) || s.inbound.len() < INBOUND_CAPACITY)
        });
        let Ok(mut guard) = waited else {
            trace!("dropping message from pipe {pipe}");
            return;
        };
        let state = &mut *guard;
        if !state.pipes.contains_key(&pipe) {
            trace!("dropping message from pipe {pipe}");
            return;
        }

        match self.pattern {
            Pattern::Request => {
                let Some((ctx, _)) = state.outstanding.remove(&request) else {
                    trace!("discarding stale reply {request}");
                    return;
                };
                if let Some(slot) = state.contexts.get_mut(&ctx) {
                    if slot.request == Some(request) {
                        slot.reply = Some(Ok(body));
                    }
                }
            }
            Pattern::Reply | Pattern::Pull | Pattern::Pair => {
                state.inbound.push_back(Inbound {
                    pipe,
                    request,
                    body,
                });
            }
            Pattern::Push => {
                warn!("push socket received a message on pipe {pipe}; dropping it");
                return;
            }
        }

        self.signal.notify_all();
    }

    pub fn open_context(&self) -> Result<u32, TransportError> {
        if !self.pattern.supports_contexts() {
            return Err(TransportError::NotSupported);
        }

        let mut state = self.state();
        if state.closed {
            return Err(TransportError::Closed);
        }
        Ok(state.allocate_context())
    }

    pub fn close_context(&self, ctx: u32) {
        let mut state = self.state();
        state.abandon(ctx);
        state.contexts.remove(&ctx);
        trace!("context {ctx} closed");
    }

    pub fn send(&self, ctx: u32, body: Vec<u8>) -> Result<(), TransportError> {
        if body.len() > MAX_MESSAGE_SIZE {
            return Err(TransportError::MessageTooLarge);
        }

        match self.pattern {
            Pattern::Request => self.send_request(ctx, body),
            Pattern::Reply => self.send_reply(ctx, body),
            Pattern::Push | Pattern::Pair => {
                let state = self.state();
                let timeout = deadline(state.send_timeout);
                let mut state = self.wait(state, timeout, |s| Ok(!s.pipes.is_empty()))?;
                let (pipe, link) = state.next_pipe().ok_or(TransportError::Internal)?;
                drop(state);

                self.transmit(pipe, &link, Frame::Data { id: 0, body })
            }
            Pattern::Pull => Err(TransportError::NotSupported),
        }
    }

    pub fn receive(&self, ctx: u32) -> Result<Vec<u8>, TransportError> {
        match self.pattern {
            Pattern::Request => self.receive_reply(ctx),
            Pattern::Reply | Pattern::Pull | Pattern::Pair => self.receive_inbound(ctx),
            Pattern::Push => Err(TransportError::NotSupported),
        }
    }

    fn transmit(
        &self,
        pipe: u32,
        link: &Arc<dyn Link>,
        frame: Frame,
    ) -> Result<(), TransportError> {
        link.send(frame).inspect_err(|e| {
            debug!("send on pipe {pipe} failed: {e}");
            self.detach(pipe);
        })
    }

    fn send_request(&self, ctx: u32, body: Vec<u8>) -> Result<(), TransportError> {
        let state = self.state();
        if !state.contexts.contains_key(&ctx) {
            return Err(TransportError::Closed);
        }

        // Without a send timeout, the receive timeout bounds the whole exchange.
        let timeout = deadline(state.send_timeout.or(state.recv_timeout));
        let mut guard = self.wait(state, timeout, |s| Ok(!s.pipes.is_empty()))?;
        let state = &mut *guard;

        let (pipe, link) = state.next_pipe().ok_or(TransportError::Internal)?;
        let request = state.allocate_request();
        let slot = state
            .contexts
            .get_mut(&ctx)
            .ok_or(TransportError::Closed)?;

        // A new request on a busy context supersedes the old one.
        if let Some(previous) = slot.request.replace(request) {
            state.outstanding.remove(&previous);
        }
        slot.reply = None;
        state.outstanding.insert(request, (ctx, pipe));
        drop(guard);

        trace!("context {ctx} sent request {request} on pipe {pipe}");
        self.transmit(pipe, &link, Frame::Data { id: request, body })
            .inspect_err(|_| self.state().abandon(ctx))
    }

    fn receive_reply(&self, ctx: u32) -> Result<Vec<u8>, TransportError> {
        let state = self.state();
        match state.contexts.get(&ctx) {
            Some(slot) if slot.request.is_some() || slot.reply.is_some() => {}
            Some(_) => return Err(TransportError::IncorrectState),
            None => return Err(TransportError::Closed),
        }

        let timeout = deadline(state.recv_timeout);
        let waited = self.wait(state, timeout, |s| match s.contexts.get(&ctx) {
            Some(slot) => Ok(slot.reply.is_some()),
            None => Err(TransportError::Closed),
        });

        match waited {
            Ok(mut state) => {
                let slot = state
                    .contexts
                    .get_mut(&ctx)
                    .ok_or(TransportError::Closed)?;
                slot.request = None;
                slot.reply.take().unwrap_or(Err(TransportError::Internal))
            }
            Err(e) => {
                if e == TransportError::TimedOut {
                    debug!("context {ctx} timed out waiting for a reply");
                    self.state().abandon(ctx);
                }
                Err(e)
            }
        }
    }

    fn receive_inbound(&self, ctx: u32) -> Result<Vec<u8>, TransportError> {
        let state = self.state();
        if !state.contexts.contains_key(&ctx) {
            return Err(TransportError::Closed);
        }

        let timeout = deadline(state.recv_timeout);
        let mut guard = self.wait(state, timeout, |s| Ok(!s.inbound.is_empty()))?;
        let state = &mut *guard;

        let inbound = state
            .inbound
            .pop_front()
            .ok_or(TransportError::Internal)?;
        self.signal.notify_all();
        if self.pattern == Pattern::Reply {
            let slot = state
                .contexts
                .get_mut(&ctx)
                .ok_or(TransportError::Closed)?;
            if slot.backtrace.is_some() {
                debug!("context {ctx} dropped an unanswered request");
            }
            slot.backtrace = Some((inbound.pipe, inbound.request));
        }

        Ok(inbound.body)
    }

    fn send_reply(&self, ctx: u32, body: Vec<u8>) -> Result<(), TransportError> {
        let mut state = self.state();
        if state.closed {
            return Err(TransportError::Closed);
        }

        let (pipe, request) = state
            .contexts
            .get_mut(&ctx)
            .ok_or(TransportError::Closed)?
            .backtrace
            .take()
            .ok_or(TransportError::IncorrectState)?;
        let link = state.pipes.get(&pipe).cloned();
        drop(state);

        match link {
            Some(link) => self.transmit(pipe, &link, Frame::Data { id: request, body }),
            None => {
                debug!("pipe {pipe} is gone; discarding reply to {request}");
                Ok(())
            }
        }
    }

    /// Closes the socket: wakes every blocked caller and releases all pipes
    /// and listeners. Idempotent.
    pub fn close(&self) {
        let (pipes, listeners) = {
            let mut state = self.state();
            if state.closed {
                return;
            }
            state.closed = true;
            state.inbound.clear();
            state.outstanding.clear();
            self.signal.notify_all();
            (mem::take(&mut state.pipes), mem::take(&mut state.listeners))
        };

        for listener in listeners {
            listener.shutdown();
        }
        for (_, link) in pipes {
            link.shutdown();
        }
        debug!("{:?} socket closed", self.pattern);
    }
}

/// A pipe slot claimed by [`Core::reserve`]. Released on drop unless the
/// pipe was attached.
pub(crate) struct Reservation<'a> {
    core: &'a Core,
    held: bool,
}

impl Reservation<'_> {
    pub fn attach(mut self, pipe: u32, link: Arc<dyn Link>) -> Result<(), TransportError> {
        self.held = false;
        let mut state = self.core.state();
        state.handshakes -= 1;
        if state.closed {
            return Err(TransportError::Closed);
        }

        state.pipes.insert(pipe, link);
        self.core.signal.notify_all();
        Ok(())
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.held {
            self.core.state().handshakes -= 1;
        }
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        self.close();
    }
}
