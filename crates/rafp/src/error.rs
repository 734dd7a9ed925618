//! Error types for AFP sessions.
//!
//! The taxonomy distinguishes the failure domains a caller actually wants to
//! tell apart: name resolution, the DSI transport, server-reported AFP result
//! codes, request encoding, and authentication.

use std::{fmt, io};

use crate::proto;

/// Failures of the DSI stream itself.
#[derive(Debug)]
pub enum TransportError {
    /// A frame was shorter than the fixed DSI header.
    Truncated { needed: usize, actual: usize },
    /// The peer closed the stream while an exchange was pending.
    Eof,
    /// The session was closed locally (or suspended) with exchanges pending.
    Closed,
    /// Socket-level I/O error.
    Socket(io::Error),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Truncated { needed, actual } => {
                write!(f, "truncated frame: need {} bytes, got {}", needed, actual)
            }
            TransportError::Eof => write!(f, "connection closed mid-exchange"),
            TransportError::Closed => write!(f, "session closed"),
            TransportError::Socket(e) => write!(f, "socket error: {}", e),
        }
    }
}

/// Failures of the UAM negotiation and login exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Client and server UAM masks do not intersect.
    NoCommonUam,
    /// The negotiated UAM is advertised but not implemented by this client.
    UnsupportedUam(&'static str),
    /// The server rejected the credentials with the given AFP result code.
    Rejected(i32),
    /// The login conversation fell out of step: a continuation where the
    /// UAM has none left, or a final result where a stage remained.
    OutOfStep,
    /// The server's proof of the shared key did not check out.
    ServerProofFailed,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::NoCommonUam => write!(f, "no common authentication method"),
            AuthError::UnsupportedUam(name) => write!(f, "UAM {:?} not implemented", name),
            AuthError::Rejected(code) => {
                write!(f, "credentials rejected: {}", proto::strerror(*code))
            }
            AuthError::OutOfStep => {
                write!(f, "login conversation out of step with the server")
            }
            AuthError::ServerProofFailed => {
                write!(f, "server failed to prove the negotiated key")
            }
        }
    }
}

#[derive(Debug)]
pub enum Error {
    /// Hostname lookup failed.
    Resolve(String),
    /// The DSI transport failed or produced a malformed frame.
    Transport(TransportError),
    /// The server returned a non-zero AFP result code on a well-formed reply.
    Afp(i32),
    /// Caller input does not fit the wire field it is destined for.
    Encoding(String),
    /// Authentication failed.
    Auth(AuthError),
    /// A request frame would exceed what the session may send.
    Allocation { requested: usize, limit: usize },
}

impl Error {
    /// The server-reported AFP result code, if that is what this error carries.
    pub fn afp_code(&self) -> Option<i32> {
        match self {
            Error::Afp(code) => Some(*code),
            Error::Auth(AuthError::Rejected(code)) => Some(*code),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Resolve(host) => write!(f, "could not resolve {}", host),
            Error::Transport(e) => write!(f, "transport: {}", e),
            Error::Afp(code) => write!(f, "server error: {}", proto::strerror(*code)),
            Error::Encoding(msg) => write!(f, "encoding: {}", msg),
            Error::Auth(e) => write!(f, "authentication: {}", e),
            Error::Allocation { requested, limit } => {
                write!(f, "request of {} bytes exceeds limit of {}", requested, limit)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Transport(TransportError::Socket(e)) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof => Error::Transport(TransportError::Eof),
            _ => Error::Transport(TransportError::Socket(e)),
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Error::Transport(e)
    }
}

impl From<AuthError> for Error {
    fn from(e: AuthError) -> Self {
        Error::Auth(e)
    }
}
