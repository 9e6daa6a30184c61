//! Errors reported by the flash programming engine.
use std::fmt;

use crate::device::Region;
use crate::protocol::FlashStatus;

/// The register check that did not hold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    /// FSR.WEN still 0 after WREN
    WriteEnable,
    /// FSR.WEN still 1 after WRDIS
    WriteDisable,
    /// FSR.INFEN did not follow a WRSR setting it
    InfopageEnable,
    /// FSR.INFEN did not follow a WRSR clearing it
    InfopageDisable,
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Check::WriteEnable => write!(f, "write enable"),
            Check::WriteDisable => write!(f, "write disable"),
            Check::InfopageEnable => write!(f, "infopage enable"),
            Check::InfopageDisable => write!(f, "infopage disable"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("program mode is not enabled")]
    InvalidState,
    #[error("{region} image is {actual} bytes, expected {expected}")]
    InvalidArgument {
        region: Region,
        expected: usize,
        actual: usize,
    },
    #[error("invalid command frame: {0}")]
    InvalidFrame(String),
    #[error("SPI transaction failed: {0}")]
    Transport(#[source] anyhow::Error),
    #[error("{check} failed, FSR {observed}")]
    Verification {
        check: Check,
        /// FSR before the change, when one was requested
        original: Option<FlashStatus>,
        observed: FlashStatus,
    },
    #[error("flash still busy after {polls} status reads")]
    Timeout { polls: u32 },
    #[error("read aborted after {read} of {expected} bytes")]
    Incomplete {
        read: usize,
        expected: usize,
        #[source]
        source: anyhow::Error,
    },
    #[error("{failed} of {chunks} program chunks failed")]
    ChunksFailed { failed: usize, chunks: usize },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
