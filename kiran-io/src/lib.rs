//! KiranIO - acquisition SDK for networked line-scan X-ray detectors
//!
//! KiranIO drives line-scan detectors over UDP: it discovers them on the
//! local network, opens a command channel with CRC-framed transactions,
//! watches liveness with a background heartbeat, streams line packets
//! into assembled frames, and hands completed frames through the
//! radiometric correction engine (`shuddhi-correct`) to the host.
//!
//! ## Architecture
//!
//! Per session, at most three background threads exist alongside the
//! caller:
//!
//! 1. **Heartbeat** (1 Hz): probes GCU housekeeping through the shared
//!    control channel, emits temperature/humidity, counts misses.
//! 2. **Image receiver**: pulls line datagrams off the image socket and
//!    feeds the frame assembler; absorbs receive timeouts, terminates on
//!    hard socket errors.
//! 3. **Completion awaiter**: only inside `snap()`, blocking on the
//!    assembler's frame stream.
//!
//! Control transactions serialize on the channel lock, so replies pair
//! with requests in issue order. The assembler's buffer lock is never
//! held while calling into the control channel.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kiran_io::{Adaptor, Config, Session, LogSink};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let config = Config::default();
//!
//! // Find detectors on the acquisition NIC
//! let mut adaptor = Adaptor::new("192.168.1.100".parse().unwrap());
//! adaptor.open().unwrap();
//! let detectors = adaptor.discover(Duration::from_secs(2)).unwrap();
//!
//! // Open a session on the first one and take a frame
//! let session = Session::open(
//!     detectors[0].clone(),
//!     "192.168.1.100".parse().unwrap(),
//!     &config,
//!     Arc::new(LogSink),
//!     Arc::new(LogSink),
//! )
//! .unwrap();
//! let frame = session.snap().unwrap();
//! println!("{}x{} frame", frame.width(), frame.height());
//! ```

pub mod assembler;
pub mod config;
pub mod control;
pub mod detector;
pub mod discovery;
pub mod error;
pub mod grabber;
pub mod heartbeat;
pub mod mock;
pub mod protocol;
pub mod session;
pub mod sink;
pub mod transport;

// Re-export commonly used types
pub use config::Config;
pub use control::{CmdStatus, ControlChannel, ReadValue};
pub use detector::{Detector, Mac};
pub use discovery::{Adaptor, DiscoveryProbe};
pub use error::{Error, Result};
pub use protocol::params::{Param, SystemOp};
pub use session::Session;
pub use sink::{CommandSink, Event, ImageSink, LogSink};

// The frame type crosses the crate boundary constantly; save hosts the
// extra dependency line
pub use shuddhi_correct::ImageFrame;
