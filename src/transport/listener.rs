use std::{
    collections::HashMap,
    io,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream},
    sync::{
        Arc, LazyLock, Mutex, PoisonError, Weak,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

#[cfg(unix)]
use std::{
    fs,
    os::unix::net::{UnixListener, UnixStream},
    path::{Path, PathBuf},
};

use log::{debug, info, warn};

use super::{
    Core, TransportError,
    link::{self, InprocLink, Stream},
};

/// Names bound with `inproc://`, process wide.
static INPROC: LazyLock<Mutex<HashMap<String, Weak<Core>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// A bound address owned by a socket.
pub(crate) enum Listener {
    Tcp {
        address: SocketAddr,
        stop: Arc<AtomicBool>,
    },
    #[cfg(unix)]
    Ipc {
        path: PathBuf,
        stop: Arc<AtomicBool>,
    },
    Inproc {
        name: String,
    },
}

impl Listener {
    pub fn tcp(core: &Arc<Core>, address: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(address).map_err(TransportError::from_bind)?;
        let mut local = listener.local_addr()?;
        if local.ip().is_unspecified() {
            let loopback = match local.ip() {
                IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
                IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
            };
            local.set_ip(loopback);
        }

        let stop = Arc::new(AtomicBool::new(false));
        spawn_accept(core, Arc::clone(&stop), move || {
            let (stream, _) = listener.accept()?;
            stream.set_nodelay(true)?;
            Ok(stream)
        })?;

        info!("listening at tcp://{local}");
        Ok(Self::Tcp {
            address: local,
            stop,
        })
    }

    #[cfg(unix)]
    pub fn ipc(core: &Arc<Core>, path: &Path) -> Result<Self, TransportError> {
        if path.exists() {
            if UnixStream::connect(path).is_ok() {
                return Err(TransportError::AddressInUse);
            }
            debug!("removing stale socket file {}", path.display());
            fs::remove_file(path)?;
        }

        let listener = UnixListener::bind(path).map_err(TransportError::from_bind)?;
        let stop = Arc::new(AtomicBool::new(false));
        spawn_accept(core, Arc::clone(&stop), move || {
            let (stream, _) = listener.accept()?;
            Ok(stream)
        })?;

        info!("listening at ipc://{}", path.display());
        Ok(Self::Ipc {
            path: path.to_path_buf(),
            stop,
        })
    }

    #[cfg(not(unix))]
    pub fn ipc(_core: &Arc<Core>, _path: &std::path::Path) -> Result<Self, TransportError> {
        Err(TransportError::NotSupported)
    }

    pub fn inproc(core: &Arc<Core>, name: &str) -> Result<Self, TransportError> {
        let mut names = INPROC.lock().unwrap_or_else(PoisonError::into_inner);
        if names.get(name).is_some_and(|bound| bound.strong_count() > 0) {
            return Err(TransportError::AddressInUse);
        }
        names.insert(name.to_string(), Arc::downgrade(core));

        info!("listening at inproc://{name}");
        Ok(Self::Inproc {
            name: name.to_string(),
        })
    }

    /// Stops accepting connections and releases the address.
    pub fn shutdown(self) {
        match self {
            Self::Tcp { address, stop } => {
                stop.store(true, Ordering::Release);
                // Wake the blocked accept so the thread observes `stop`.
                let _ = TcpStream::connect(address);
            }
            #[cfg(unix)]
            Self::Ipc { path, stop } => {
                stop.store(true, Ordering::Release);
                let _ = UnixStream::connect(&path);
                let _ = fs::remove_file(&path);
            }
            Self::Inproc { name } => {
                INPROC
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&name);
            }
        }
    }
}

/// Connects `core` to the socket bound at `inproc://name`.
pub(crate) fn dial_inproc(core: &Arc<Core>, name: &str) -> Result<(), TransportError> {
    let peer = INPROC
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(name)
        .and_then(Weak::upgrade)
        .ok_or(TransportError::ConnectionRefused)?;

    if core.pattern().peer() != peer.pattern() {
        return Err(TransportError::Protocol);
    }

    let (local, remote) = (link::next_pipe_id(), link::next_pipe_id());
    core.attach(local, Arc::new(InprocLink::new(&peer, remote)))?;
    if let Err(e) = peer.attach(remote, Arc::new(InprocLink::new(core, local))) {
        core.detach(local);
        return Err(e);
    }

    debug!("inproc pipe {local} <-> {remote} established on {name}");
    Ok(())
}

fn spawn_accept<S, A>(core: &Arc<Core>, stop: Arc<AtomicBool>, mut accept: A) -> io::Result<()>
where
    S: Stream,
    A: FnMut() -> io::Result<S> + Send + 'static,
{
    let core = Arc::downgrade(core);
    thread::Builder::new()
        .name("tether-accept".to_string())
        .spawn(move || {
            loop {
                let stream = accept();
                if stop.load(Ordering::Acquire) {
                    break;
                }
                let Some(core) = core.upgrade() else {
                    break;
                };

                match stream {
                    Ok(stream) => {
                        thread::spawn(move || {
                            if let Err(e) = link::establish(&core, stream) {
                                debug!("rejected connection: {e}");
                            }
                        });
                    }
                    Err(e) => warn!("broken connection: {e:?}"),
                }
            }
            debug!("accept loop stopped");
        })?;
    Ok(())
}
