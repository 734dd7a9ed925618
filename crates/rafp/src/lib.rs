#![forbid(unsafe_code)]
//! Asynchronous AFP (Apple Filing Protocol) client library for Rust.
//!
//! This crate provides a tokio-based client for AFP 2.2 through 3.2 over the
//! DSI stream transport, the protocol spoken by netatalk and classic Mac OS X
//! file servers.
//!
//! # Overview
//!
//! AFP rides on DSI, a thin session layer over TCP: every message carries a
//! fixed 16 byte header with a request id, and replies may arrive in any
//! order. The [`session::DsiSession`] owns one socket, answers server
//! tickles, and routes each reply to the caller that issued its request id.
//!
//! On top of the transport sit the protocol operations ([`ops`]), UAM
//! negotiation and login ([`auth`]), the server registry with its
//! signature-based deduplication ([`server`]), and per-volume file
//! operations ([`volume`]).
//!
//! # Getting Started
//!
//! To talk to a server you:
//!
//! 1. Build a [`ConnectionRequest`] (usually from an `afp://` URL)
//! 2. Connect through a [`Registry`], which probes, deduplicates, and logs in
//! 3. Mount a volume and operate on it
//!
//! ```no_run
//! use rafp::{ConnectionRequest, Registry, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let registry = Registry::new();
//!     let request = ConnectionRequest {
//!         hostname: "fileserver.local".into(),
//!         username: "amanda".into(),
//!         password: "s3cret".into(),
//!         volume: "Media".into(),
//!         ..ConnectionRequest::default()
//!     };
//!
//!     let volume = registry.mount(&request).await?;
//!     let info = volume.stat_root().await?;
//!     println!("root directory holds {} entries", info.offspring_count);
//!
//!     registry.exit().await;
//!     Ok(())
//! }
//! ```
//!
//! # Protocol Details
//!
//! ## Connection Flow
//!
//! 1. **Probe**: a transient connection issues DSIGetStatus; the
//!    FPGetSrvrInfo reply names the machine type, AFP versions, UAMs, the
//!    16 byte server signature, and the server icon
//! 2. **Deduplication**: servers are keyed by signature, so two addresses
//!    reaching the same machine share one logical server
//! 3. **Session**: DSIOpenSession negotiates the reply quantum
//! 4. **Login**: the strongest mutual UAM is driven through
//!    FPLogin/FPLoginCont
//! 5. **Volumes**: FPOpenVol yields a volume id scoping all file operations
//!
//! ## Request Correlation
//!
//! Request ids are 16-bit and assigned per session. The session's reader
//! task holds the id-to-waiter table; closing the socket fails every
//! pending exchange with a transport error rather than leaving callers
//! hanging.
//!
//! # Error Handling
//!
//! All fallible operations return [`Result`]. Server-side failures surface
//! as [`Error::Afp`] with the protocol's negative result code; transport
//! and authentication failures have their own variants so callers can tell
//! a dead socket from a wrong password.
//!
//! # Safety
//!
//! This crate forbids unsafe code (`#![forbid(unsafe_code)]`). Every wire
//! read goes through a bounds-checked cursor, so truncated or hostile
//! replies produce errors instead of panics.
pub mod auth;
pub mod dsi;
pub mod error;
pub mod ops;
pub mod proto;
pub mod server;
pub mod session;
pub mod users;
pub mod volinfo;
pub mod volume;
pub mod wire;
#[macro_use]
pub mod utils;

pub use crate::auth::Credentials;
pub use crate::error::{AuthError, Error, TransportError};
pub use crate::proto::*;
pub use crate::server::{ConnectionRequest, Registry, Server};
pub use crate::session::DsiSession;
pub use crate::utils::Result;
pub use crate::volume::{Fork, SetTarget, Volume};
