//! X server plumbing: connection, extensions, typed property reads, event
//! translation, and the XRender backend.
//!
//! This is the only crate that names x11rb types. Everything it hands to the
//! engine is plain data from `core-events`; everything it receives is the
//! backend trait surface from `core-backend`. The split keeps the whole
//! pipeline testable without a display and keeps protocol churn contained.

use thiserror::Error;

pub mod atoms;
pub mod backend;
pub mod host;
pub mod props;
pub mod serial;
pub mod translate;

pub use backend::XRenderBackend;
pub use host::{WindowSnapshot, XHost};
pub use serial::IgnoreRing;

#[derive(Debug, Error)]
pub enum XhostError {
    #[error("cannot connect to X display: {0}")]
    Connect(String),
    #[error("required extension missing: {0}")]
    ExtensionMissing(&'static str),
    #[error("another composite manager owns {0}")]
    SelectionOwned(String),
    #[error("X protocol error: {0}")]
    Protocol(String),
    #[error("connection error: {0}")]
    Connection(String),
}

impl From<x11rb::errors::ConnectionError> for XhostError {
    fn from(e: x11rb::errors::ConnectionError) -> Self {
        XhostError::Connection(e.to_string())
    }
}

impl From<x11rb::errors::ReplyError> for XhostError {
    fn from(e: x11rb::errors::ReplyError) -> Self {
        XhostError::Protocol(e.to_string())
    }
}

impl From<x11rb::errors::ReplyOrIdError> for XhostError {
    fn from(e: x11rb::errors::ReplyOrIdError) -> Self {
        XhostError::Protocol(e.to_string())
    }
}

impl From<x11rb::errors::ConnectError> for XhostError {
    fn from(e: x11rb::errors::ConnectError) -> Self {
        XhostError::Connect(e.to_string())
    }
}
