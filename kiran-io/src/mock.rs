//! Mock detector for hardware-free development and testing
//!
//! `MockDetector` binds a command socket on the loopback interface and
//! answers the wire protocol the way TDI-series firmware does: discovery
//! probes get a device-info record, reads return values from a parameter
//! store, writes update it and ack, system operations ack. Line traffic
//! is pushed explicitly with [`MockDetector::stream_frame`], so tests
//! control exactly what the image path sees.
//!
//! The mock speaks the device side of the protocol; the SDK's own codecs
//! only implement the host side, so the small command parser here is the
//! one place that decodes command frames.

use crate::detector::Detector;
use crate::protocol::image::{
    encode_device_info, encode_line_packet, Energy, LineHeader, DISCOVERY_PROBE,
};
use crate::protocol::params::opcode;
use crate::protocol::{command::encode_response, crc, MAGIC, MODULE_ALL};
use parking_lot::Mutex;
use shuddhi_correct::ImageFrame;
use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Device error code a [`MockDetector`] returns for rejected codes.
pub const MOCK_REJECTION: u8 = 0x06;

/// Parsed device-side view of one command frame.
struct CommandFrame<'a> {
    code: u8,
    operation: u8,
    module: u8,
    payload: &'a [u8],
}

fn parse_command(buf: &[u8]) -> Option<CommandFrame<'_>> {
    if buf.len() < 8 || buf[0] != MAGIC[0] || buf[1] != MAGIC[1] {
        return None;
    }
    let dlen = buf[5] as usize;
    let frame = buf.get(..6 + dlen + 2)?;
    if !crc::verify(frame) {
        return None;
    }
    Some(CommandFrame {
        code: buf[2],
        operation: buf[3],
        module: buf[4],
        payload: &frame[6..6 + dlen],
    })
}

fn payload_to_value(payload: &[u8]) -> u64 {
    let mut value = 0u64;
    for byte in payload {
        value = (value << 8) | *byte as u64;
    }
    value
}

fn value_to_payload(value: u64, width: usize) -> Vec<u8> {
    let be = value.to_be_bytes();
    be[8 - width..].to_vec()
}

/// Simulated detector command endpoint on 127.0.0.1.
///
/// Drop (or [`shutdown`](Self::shutdown)) stops the responder thread.
pub struct MockDetector {
    identity: Detector,
    responder: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    cmd_addr: SocketAddr,
    /// Wire codes the responder rejects with [`MOCK_REJECTION`].
    rejected: Arc<Mutex<Vec<u8>>>,
    params: Arc<Mutex<HashMap<u8, u64>>>,
}

impl MockDetector {
    /// Bind the command socket and start answering.
    ///
    /// The identity's IP and command port are replaced with the actual
    /// bound endpoint; serial, geometry, and image port are advertised
    /// as given.
    pub fn spawn(mut identity: Detector) -> io::Result<Self> {
        let socket = UdpSocket::bind("127.0.0.1:0")?;
        socket.set_read_timeout(Some(Duration::from_millis(50)))?;
        let cmd_addr = socket.local_addr()?;
        identity.ip = Ipv4Addr::LOCALHOST;
        identity.cmd_port = cmd_addr.port();

        let shutdown = Arc::new(AtomicBool::new(false));
        let rejected: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let params: Arc<Mutex<HashMap<u8, u64>>> = Arc::new(Mutex::new(HashMap::new()));

        let responder = thread::Builder::new().name("mock-detector".to_string()).spawn({
            let identity = identity.clone();
            let shutdown = Arc::clone(&shutdown);
            let rejected = Arc::clone(&rejected);
            let params = Arc::clone(&params);
            move || responder_loop(socket, identity, shutdown, rejected, params)
        })?;

        Ok(Self {
            identity,
            responder: Some(responder),
            shutdown,
            cmd_addr,
            rejected,
            params,
        })
    }

    /// The detector record a host should use to reach this mock.
    pub fn detector(&self) -> Detector {
        self.identity.clone()
    }

    pub fn cmd_addr(&self) -> SocketAddr {
        self.cmd_addr
    }

    /// Make the responder reject a wire code with a device error.
    pub fn reject_code(&self, code: u8) {
        self.rejected.lock().push(code);
    }

    /// Value last written for a wire code, if any.
    pub fn written_value(&self, code: u8) -> Option<u64> {
        self.params.lock().get(&code).copied()
    }

    /// Push one frame of header-mode line packets at a host image
    /// endpoint, one datagram per row.
    pub fn stream_frame(
        &self,
        frame: &ImageFrame,
        host: SocketAddr,
        first_packet_id: u32,
    ) -> io::Result<()> {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))?;
        let bpp = frame.bytes_per_pixel();
        for y in 0..frame.height() {
            let mut payload = Vec::with_capacity(frame.line_byte_len());
            for px in frame.row(y) {
                if bpp == 2 {
                    payload.extend_from_slice(&px.to_le_bytes());
                } else {
                    payload.push(*px as u8);
                }
            }
            let header = LineHeader {
                packet_id: first_packet_id + y,
                line_id: y as u16,
                timestamp_us: y * 100,
                energy: Energy::Low,
                module_id: 0,
                payload_len: payload.len() as u16,
            };
            socket.send_to(&encode_line_packet(&header, &payload), host)?;
            // Pace the datagrams so loopback buffers never overrun
            thread::sleep(Duration::from_micros(200));
        }
        Ok(())
    }

    /// Stop the responder and join it.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.responder.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MockDetector {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Payload width the firmware uses for each readable wire code.
fn code_width(code: u8) -> usize {
    match code {
        0x20 | 0x25 => 4,
        0x21 | 0x23 | 0x35 | 0x52 | 0x53 | 0x55 | 0x60 | 0x64 | 0x68 | 0x69 => 2,
        _ => 1,
    }
}

/// Default readback values per wire code, for codes never written.
fn default_value(code: u8) -> u64 {
    match code {
        0x20 => 1000, // integration time us
        0x68 => 0x0201,
        _ => 0,
    }
}

fn responder_loop(
    socket: UdpSocket,
    identity: Detector,
    shutdown: Arc<AtomicBool>,
    rejected: Arc<Mutex<Vec<u8>>>,
    params: Arc<Mutex<HashMap<u8, u64>>>,
) {
    let mut buf = [0u8; 512];
    let info_record = encode_device_info(&identity);

    while !shutdown.load(Ordering::Relaxed) {
        let (n, peer) = match socket.recv_from(&mut buf) {
            Ok(v) => v,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                continue;
            }
            Err(e) => {
                log::error!("mock detector socket error: {}", e);
                return;
            }
        };
        let datagram = &buf[..n];

        // ASCII discovery probe
        if datagram == DISCOVERY_PROBE {
            let _ = socket.send_to(&info_record, peer);
            continue;
        }

        let Some(cmd) = parse_command(datagram) else {
            log::debug!("mock detector ignoring unparseable datagram from {}", peer);
            continue;
        };

        // Framed discovery probe: GCU_INFO read addressed to all modules
        if cmd.code == 0x72 && cmd.operation == opcode::READ && cmd.module == MODULE_ALL {
            let _ = socket.send_to(&info_record, peer);
            continue;
        }

        if rejected.lock().contains(&cmd.code) {
            let reply = encode_response(cmd.code, cmd.operation, MOCK_REJECTION, &[]);
            let _ = socket.send_to(&reply, peer);
            continue;
        }

        let reply = match cmd.operation {
            opcode::READ => match cmd.code {
                // GCU serial
                0x62 => encode_response(cmd.code, cmd.operation, 0, identity.serial.as_bytes()),
                // DM serial, suffixed with the module index
                0x63 => {
                    let serial = format!("{}-DM{}", identity.serial, cmd.module);
                    encode_response(cmd.code, cmd.operation, 0, serial.as_bytes())
                }
                // Housekeeping block: 24.0 degC, 40.0% RH, little-endian
                0x72 => encode_response(cmd.code, cmd.operation, 0, &[0xF0, 0x00, 0x90, 0x01]),
                // Pixel count comes from the identity
                0x64 => encode_response(
                    cmd.code,
                    cmd.operation,
                    0,
                    &value_to_payload(identity.pixel_count as u64, 2),
                ),
                code => {
                    let value = params
                        .lock()
                        .get(&code)
                        .copied()
                        .unwrap_or_else(|| default_value(code));
                    let payload = value_to_payload(value, code_width(code));
                    encode_response(cmd.code, cmd.operation, 0, &payload)
                }
            },
            opcode::WRITE => {
                params.lock().insert(cmd.code, payload_to_value(cmd.payload));
                encode_response(cmd.code, cmd.operation, 0, &[])
            }
            opcode::EXECUTE | opcode::LOAD => encode_response(cmd.code, cmd.operation, 0, &[]),
            other => {
                log::debug!("mock detector: unknown operation 0x{:02X}", other);
                encode_response(cmd.code, cmd.operation, 0x01, &[])
            }
        };
        let _ = socket.send_to(&reply, peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_round_trip() {
        let mut tx = crate::protocol::command::TxFrame::new();
        tx.set_write(0x20, 0x00, 1500, 4);
        let cmd = parse_command(tx.as_bytes()).unwrap();
        assert_eq!(cmd.code, 0x20);
        assert_eq!(cmd.operation, opcode::WRITE);
        assert_eq!(payload_to_value(cmd.payload), 1500);
    }

    #[test]
    fn test_parse_command_rejects_damage() {
        let mut tx = crate::protocol::command::TxFrame::new();
        tx.set_read(0x22, 0x00);
        let mut bytes = tx.as_bytes().to_vec();
        bytes[3] ^= 0x40;
        assert!(parse_command(&bytes).is_none());
        assert!(parse_command(&bytes[..4]).is_none());
    }

    #[test]
    fn test_value_payload_round_trip() {
        assert_eq!(payload_to_value(&value_to_payload(0xDEAD, 2)), 0xDEAD);
        assert_eq!(value_to_payload(1500, 4), vec![0x00, 0x00, 0x05, 0xDC]);
    }
}
