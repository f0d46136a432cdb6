//! Error types for KiranIO
//!
//! # Error Recovery Strategies
//!
//! ## Transport faults (retry or re-open)
//!
//! - **`AdapterSend` / `ConSend`**: datagram could not be sent. Usually a
//!   cabling or routing problem; re-check the adapter IP and retry.
//! - **`ConRecvTimeout`**: the detector did not answer within the channel
//!   deadline. The channel does not retry on its own; the caller decides.
//! - **`GrabberRecv`**: hard receive error on the image socket. The
//!   receiver thread reports it to the image sink and terminates; restart
//!   the grab after fixing the network.
//!
//! ## Protocol faults (log and continue)
//!
//! - **`ConBadFrame`**: a reply failed CRC/framing checks. The frame is
//!   dropped; the next transaction is unaffected.
//! - **`LineLengthMismatch`**: a line payload did not match the configured
//!   geometry. The line is dropped; assembly continues.
//!
//! ## Device faults
//!
//! - **`ConDeviceError`**: the detector rejected a well-formed command.
//!   Inspect the device error code; the channel stays usable.
//!
//! ## Lifecycle faults (fix the call order)
//!
//! - **`AdapterNotOpen` / `ConNotOpen` / `GrabberNotOpen`**: an operation
//!   arrived before `open()`. **`GrabberBusy` / `FrameBusy`**: acquisition
//!   state forbids the operation; stop the grab first.
//!
//! The heartbeat monitor never panics and never tears down the channel:
//! after ten consecutive misses it emits `HeartbeatFail` to the command
//! sink, resets its counter, and keeps probing.

use thiserror::Error;

/// Errors raised across the detector SDK.
///
/// See module-level documentation for recovery strategies. `id()` gives
/// the stable numeric code delivered to sinks.
#[derive(Error, Debug)]
pub enum Error {
    #[error("adapter open failed: {0}")]
    AdapterOpen(String),

    #[error("adapter bind failed: {0}")]
    AdapterBind(String),

    #[error("adapter send failed: {0}")]
    AdapterSend(String),

    #[error("adapter receive timed out")]
    AdapterRecvTimeout,

    #[error("adapter received malformed frame: {0}")]
    AdapterBadFrame(String),

    #[error("adapter not open")]
    AdapterNotOpen,

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("control channel open failed: {0}")]
    ConOpen(String),

    #[error("control channel bind failed: {0}")]
    ConBind(String),

    #[error("control send failed: {0}")]
    ConSend(String),

    #[error("control receive timed out")]
    ConRecvTimeout,

    #[error("control received malformed frame: {0}")]
    ConBadFrame(String),

    #[error("device rejected command with code {0}")]
    ConDeviceError(u8),

    #[error("control channel not open")]
    ConNotOpen,

    #[error("heartbeat failed: {0} consecutive misses")]
    HeartbeatFail(u32),

    #[error("heartbeat start failed: {0}")]
    HeartbeatStart(String),

    #[error("heartbeat did not stop within its grace period")]
    HeartbeatStopAbnormal,

    #[error("image receiver hard receive error: {0}")]
    GrabberRecv(String),

    #[error("image receiver not open")]
    GrabberNotOpen,

    #[error("acquisition already running")]
    GrabberBusy,

    #[error("frame assembler is running")]
    FrameBusy,

    #[error("frame buffer allocation failed: {0}")]
    FrameAllocate(String),

    #[error("line length mismatch: expected {expected} bytes, got {actual}")]
    LineLengthMismatch { expected: usize, actual: usize },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("correction error: {0}")]
    Correction(#[from] shuddhi_correct::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable numeric error id for the sink surface.
    pub fn id(&self) -> u32 {
        match self {
            Error::AdapterOpen(_) => 1,
            Error::AdapterBind(_) => 2,
            Error::AdapterSend(_) => 3,
            Error::AdapterRecvTimeout => 4,
            Error::AdapterBadFrame(_) => 5,
            Error::AdapterNotOpen => 8,
            Error::InvalidParam(_) => 4,
            Error::ConOpen(_) => 12,
            Error::ConBind(_) => 13,
            Error::ConSend(_) => 14,
            Error::ConRecvTimeout => 15,
            Error::ConBadFrame(_) => 16,
            Error::ConDeviceError(_) => 17,
            Error::ConNotOpen => 19,
            Error::HeartbeatFail(_) => 39,
            Error::HeartbeatStart(_) => 40,
            Error::HeartbeatStopAbnormal => 41,
            Error::GrabberRecv(_) => 23,
            Error::GrabberNotOpen => 25,
            Error::GrabberBusy => 26,
            Error::FrameBusy => 32,
            Error::FrameAllocate(_) => 33,
            Error::LineLengthMismatch { .. } => 101,
            Error::Config(_) => 4,
            Error::Correction(_) => 9,
            Error::Io(_) => 3,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
