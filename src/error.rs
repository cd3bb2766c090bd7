//! Errors raised while reading and decoding the HAT registers.

use std::io;
use thiserror::Error;

use crate::smoothing::Channel;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Bus read or write failed in the transport collaborator.
    #[error("bus transfer on register 0x{register:02X} failed: {source}")]
    Transport {
        register: u8,
        #[source]
        source: io::Error,
    },

    /// The block returned for a register does not have the protocol length.
    #[error("malformed block from register 0x{register:02X}: expected {expected} bytes, got {actual}")]
    MalformedBlock {
        register: u8,
        expected: usize,
        actual: usize,
    },

    /// Median requested from a buffer that has never seen a sample.
    #[error("no samples buffered for {channel}")]
    EmptyBuffer { channel: Channel },
}

/// A refresh cycle that was aborted. The previously published snapshot stays current.
#[derive(Debug, Error)]
#[error("update failed: {source}")]
pub struct UpdateFailed {
    #[from]
    pub source: Error,
}
