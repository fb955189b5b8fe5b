use std::path::PathBuf;

use super::TransportError;

/// A parsed transport address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Address {
    /// `tcp://host:port`; the remainder is handed to the resolver untouched.
    Tcp(String),
    /// `ipc://path`, a Unix domain socket.
    Ipc(PathBuf),
    /// `inproc://name`, a socket in the same process.
    Inproc(String),
}

impl Address {
    pub fn parse(url: &str) -> Result<Self, TransportError> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or(TransportError::AddressInvalid)?;

        if rest.is_empty() {
            return Err(TransportError::AddressInvalid);
        }

        match scheme {
            "tcp" | "tcp4" | "tcp6" => {
                if !rest.contains(':') {
                    return Err(TransportError::AddressInvalid);
                }
                Ok(Self::Tcp(rest.to_string()))
            }
            "ipc" => Ok(Self::Ipc(PathBuf::from(rest))),
            "inproc" => Ok(Self::Inproc(rest.to_string())),
            _ => Err(TransportError::NotSupported),
        }
    }
}
