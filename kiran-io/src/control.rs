//! Control channel: serialized command/response with the detector
//!
//! One request is in flight at a time; concurrent callers (host thread
//! plus the heartbeat task) serialize on the channel lock. Each call
//! encodes into a reusable TX frame, sends, and waits up to the channel
//! deadline for a reply whose command code echoes the request. Replies
//! for earlier requests that arrive late are discarded inside the same
//! deadline. Timeouts are not retried here; retry policy belongs to the
//! caller.

use crate::detector::Detector;
use crate::error::{Error, Result};
use crate::protocol::command::{decode_response, TxFrame};
use crate::protocol::params::{self, Param, PayloadWidth, SystemOp};
use crate::protocol::{u16_be, u32_be, MODULE_ALL};
use crate::sink::{CommandSink, LogSink};
use crate::transport::{RecvOutcome, UdpTransport};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default transaction deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Non-error outcome of a write or system operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdStatus {
    /// The detector acknowledged the command.
    Done,
    /// The code has no wire mapping on this protocol generation.
    Unsupported,
}

/// Non-error outcome of a parameter read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadValue {
    Int(u64),
    Text(String),
    Unsupported,
}

impl ReadValue {
    /// Integer value, if this read produced one.
    pub fn as_int(&self) -> Option<u64> {
        match self {
            ReadValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

struct ChannelIo {
    transport: UdpTransport,
    remote: SocketAddr,
    tx: TxFrame,
    rx: Box<[u8; 512]>,
}

struct ChannelState {
    io: Option<ChannelIo>,
    timeout: Duration,
}

/// Serialized request/response channel to one detector.
pub struct ControlChannel {
    state: Mutex<ChannelState>,
    sink: Arc<dyn CommandSink>,
}

impl ControlChannel {
    pub fn new() -> Self {
        Self::with_sink(Arc::new(LogSink))
    }

    pub fn with_sink(sink: Arc<dyn CommandSink>) -> Self {
        Self {
            state: Mutex::new(ChannelState {
                io: None,
                timeout: DEFAULT_TIMEOUT,
            }),
            sink,
        }
    }

    /// Bind an ephemeral local port and aim the channel at the detector's
    /// command endpoint.
    pub fn open(&self, det: &Detector) -> Result<()> {
        let mut state = self.state.lock();
        if state.io.is_some() {
            log::debug!("control channel already open");
            return Ok(());
        }
        let transport = UdpTransport::bind("0.0.0.0:0")
            .map_err(|e| self.report(Error::ConBind(e.to_string())))?;
        let remote = SocketAddr::new(det.ip.into(), det.cmd_port);
        log::info!("control channel open to {}", remote);
        state.io = Some(ChannelIo {
            transport,
            remote,
            tx: TxFrame::new(),
            rx: Box::new([0u8; 512]),
        });
        Ok(())
    }

    /// Close the channel. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.io.take().is_some() {
            log::info!("control channel closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().io.is_some()
    }

    /// Set the transaction deadline in milliseconds.
    pub fn set_timeout(&self, millis: u64) {
        self.state.lock().timeout = Duration::from_millis(millis.max(1));
    }

    /// Issue a system operation (init, restore, save, frame trigger).
    pub fn operate(&self, op: SystemOp) -> Result<CmdStatus> {
        let (code, op_byte) = params::system_op(op);
        self.transact(code, |tx| tx.set_operation(code, op_byte, 0x00))?;
        Ok(CmdStatus::Done)
    }

    /// Read a parameter value.
    ///
    /// `module` addresses one DM for per-module parameters and is ignored
    /// for global ones. Reading with the all-modules index is rejected:
    /// one reply cannot aggregate per-module values.
    pub fn read(&self, param: Param, module: u8) -> Result<ReadValue> {
        let Some(spec) = params::spec(param) else {
            log::debug!("read of uncatalogued parameter {:?}", param);
            return Ok(ReadValue::Unsupported);
        };
        if !spec.readable {
            return Ok(ReadValue::Unsupported);
        }
        if module == MODULE_ALL {
            return Err(self.report(Error::InvalidParam(
                "module index 0xFF is illegal on read".into(),
            )));
        }
        let module = if spec.per_module { module } else { 0x00 };
        let payload = self.transact(spec.code, |tx| tx.set_read(spec.code, module))?;

        match spec.width {
            PayloadWidth::Text => Ok(ReadValue::Text(
                String::from_utf8_lossy(&payload).into_owned(),
            )),
            PayloadWidth::U8 => {
                self.check_width(&payload, 1)?;
                Ok(ReadValue::Int(payload[0] as u64))
            }
            PayloadWidth::U16 => {
                self.check_width(&payload, 2)?;
                Ok(ReadValue::Int(u16_be(&payload) as u64))
            }
            PayloadWidth::U32 => {
                self.check_width(&payload, 4)?;
                Ok(ReadValue::Int(u32_be(&payload) as u64))
            }
            PayloadWidth::Telemetry => Ok(ReadValue::Text(
                String::from_utf8_lossy(&payload).into_owned(),
            )),
        }
    }

    /// Read the raw GCU housekeeping block for firmware-specific parsing.
    ///
    /// `deadline` overrides the channel timeout; the heartbeat monitor
    /// probes with a deadline no longer than its own interval so that a
    /// dead detector cannot pin the channel lock for the full command
    /// timeout.
    pub fn read_telemetry(&self, deadline: Option<Duration>) -> Result<Vec<u8>> {
        let spec = params::spec(Param::GcuInfo).expect("GcuInfo is always catalogued");
        self.transact_with(spec.code, deadline, |tx| tx.set_read(spec.code, 0x00))
    }

    /// Write a parameter value and await the acknowledgement.
    ///
    /// Per-module parameters accept the all-modules index for broadcast
    /// writes; global parameters always go out with module 0.
    pub fn write(&self, param: Param, value: u64, module: u8) -> Result<CmdStatus> {
        let Some(spec) = params::spec(param) else {
            log::debug!("write of uncatalogued parameter {:?}", param);
            return Ok(CmdStatus::Unsupported);
        };
        if !spec.writable {
            return Ok(CmdStatus::Unsupported);
        }
        let width = spec.width.byte_len();
        debug_assert!(width > 0, "writable parameters have fixed widths");
        let module = if spec.per_module { module } else { 0x00 };
        self.transact(spec.code, |tx| tx.set_write(spec.code, module, value, width))?;
        Ok(CmdStatus::Done)
    }

    /// One locked transaction: encode, send, receive-until-echo, decode.
    /// Returns the response payload.
    fn transact(&self, code: u8, build: impl FnOnce(&mut TxFrame)) -> Result<Vec<u8>> {
        self.transact_with(code, None, build)
    }

    fn transact_with(
        &self,
        code: u8,
        deadline: Option<Duration>,
        build: impl FnOnce(&mut TxFrame),
    ) -> Result<Vec<u8>> {
        let mut state = self.state.lock();
        let timeout = deadline.unwrap_or(state.timeout);
        let Some(io) = state.io.as_mut() else {
            drop(state);
            return Err(self.report(Error::ConNotOpen));
        };

        build(&mut io.tx);
        debug_assert_eq!(io.tx.code(), code);

        // Stale replies from a timed-out predecessor may still be queued
        io.transport.drain(&mut io.rx[..]);

        if let Err(e) = io.transport.send_to(io.tx.as_bytes(), io.remote) {
            drop(state);
            return Err(self.report(Error::ConSend(e.to_string())));
        }

        let start = Instant::now();
        let result = loop {
            let Some(remaining) = timeout.checked_sub(start.elapsed()) else {
                break Err(Error::ConRecvTimeout);
            };
            match io.transport.recv(&mut io.rx[..], remaining) {
                Ok(RecvOutcome::Timeout) => break Err(Error::ConRecvTimeout),
                Ok(RecvOutcome::Data(n, peer)) => {
                    if peer != io.remote {
                        log::trace!("ignoring datagram from foreign peer {}", peer);
                        continue;
                    }
                    let n = n.min(io.rx.len());
                    match decode_response(&io.rx[..n]) {
                        Ok(resp) if resp.code != code => {
                            log::debug!(
                                "discarding stale reply for command 0x{:02X} while waiting on 0x{:02X}",
                                resp.code,
                                code
                            );
                            continue;
                        }
                        Ok(resp) if !resp.is_ok() => break Err(Error::ConDeviceError(resp.status)),
                        Ok(resp) => break Ok(resp.payload.to_vec()),
                        Err(e) => break Err(Error::ConBadFrame(e.to_string())),
                    }
                }
                Err(e) => break Err(Error::ConSend(e.to_string())),
            }
        };
        drop(state);
        result.map_err(|e| self.report(e))
    }

    fn check_width(&self, payload: &[u8], expected: usize) -> Result<()> {
        if payload.len() < expected {
            return Err(self.report(Error::ConBadFrame(format!(
                "payload width {} below expected {}",
                payload.len(),
                expected
            ))));
        }
        Ok(())
    }

    fn report(&self, err: Error) -> Error {
        self.sink.on_error(err.id(), &err.to_string());
        err
    }
}

impl Default for ControlChannel {
    fn default() -> Self {
        Self::new()
    }
}
