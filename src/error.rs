//! Error types shared by the codec, the session loops and the pipeline

use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The peer went away (EOF) or the socket errored before a transfer completed.
    /// Fatal to the session.
    #[error("connection closed while {context}")]
    ConnectionClosed {
        context: &'static str,
        #[source]
        source: Option<io::Error>,
    },
    /// Structurally invalid frame, reported with the offending field
    #[error("protocol error in {field}: {reason}")]
    Protocol { field: &'static str, reason: String },
    /// A length prefix asked for more memory than we are willing (or able) to buffer
    #[error("cannot buffer {requested} bytes for {field}")]
    Allocation { field: &'static str, requested: u64 },
    /// Producer side only: the file that should have been sent does not exist
    #[error("missing resource: {0}")]
    MissingResource(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl Error {
    pub(crate) fn protocol(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Protocol {
            field,
            reason: reason.into(),
        }
    }

    /// Whether this error ends the whole session (as opposed to a single frame or file)
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::MissingResource(_))
    }
}
