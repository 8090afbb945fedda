//! Error types for awglib.
//!
//! All fallible operations across the library return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport-layer, protocol-layer,
//! calibration and device-reported failures are all captured here.

/// The error type for all awglib operations.
///
/// Variants cover the failure modes encountered when driving an
/// instrument: transport failures (with timeouts kept distinct),
/// malformed replies, flash alignment violations, exhausted calibration
/// budgets, and operations the device itself rejected.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (socket failure, unresolvable device address).
    #[error("transport error: {0}")]
    Transport(String),

    /// Timed out waiting for a reply from the device.
    ///
    /// Timeouts are never retried automatically; the caller decides
    /// whether to re-issue the operation.
    #[error("timeout waiting for response")]
    Timeout,

    /// No connection to the device identity has been opened.
    #[error("not connected")]
    NotConnected,

    /// A protocol-level error (short datagram, unknown opcode, reply that
    /// does not match the request).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A flash operation targeted an address that is not page aligned.
    #[error("address {address:#010x} is not aligned to {alignment:#x} bytes")]
    Alignment {
        /// The offending byte address.
        address: u32,
        /// The required alignment in bytes.
        alignment: u32,
    },

    /// A bounded hardware search (DAC edge, PLL lock wait) ran out of
    /// iterations.
    #[error("calibration timeout: {0}")]
    CalibrationTimeout(String),

    /// Clock synchronization failed on every attempt of its retry budget.
    #[error("clock synchronization failed after {attempts} attempts")]
    SyncFailure {
        /// Number of full synchronization attempts made.
        attempts: u32,
    },

    /// The device replied with a status indicating it rejected the operation.
    #[error("device reported failure during {operation} (status {status:#04x})")]
    DeviceReported {
        /// Short name of the rejected operation (e.g. "flash erase").
        operation: &'static str,
        /// Raw mode/status field of the reply.
        status: u8,
    },

    /// An invalid parameter was passed to a device operation.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` for failures of the transport itself (including
    /// timeouts) as opposed to protocol or device-level failures.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::Timeout | Error::NotConnected | Error::Io(_)
        )
    }
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
