//! Image-channel and discovery codecs
//!
//! Line packets carry one detector row per datagram. In header mode each
//! datagram starts with a 16-byte header:
//!
//! ```text
//! offset  size  field
//! 0       4     packet ID (u32 LE, monotonic)
//! 4       2     line ID (u16 BE)
//! 6       4     timestamp microseconds (u32 LE)
//! 10      1     energy flag (0 = low, 1 = high)
//! 11      1     module ID
//! 12      2     payload length (u16 BE)
//! 14      2     CRC16 over bytes 0..14, little-endian
//! 16      ...   payload
//! ```
//!
//! In header-less mode the datagram is the bare payload.
//!
//! Discovery replies carry a 52-byte device-info record; integers inside
//! it are big-endian like command payloads.

use super::crc;
use super::command::DecodeError;
use crate::detector::{Detector, Mac};
use std::net::Ipv4Addr;

/// Byte length of the line-packet header.
pub const LINE_HEADER_LEN: usize = 16;

/// Byte length of the device-info record in discovery replies.
pub const DEVICE_INFO_LEN: usize = 52;

/// Discovery probe accepted by current firmware.
pub const DISCOVERY_PROBE: &[u8] = b"DISCOVER_DETECTOR";

/// Energy flag of a dual-energy line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Energy {
    Low,
    High,
}

impl From<u8> for Energy {
    fn from(value: u8) -> Self {
        if value == 0 {
            Energy::Low
        } else {
            Energy::High
        }
    }
}

/// Parsed line-packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineHeader {
    pub packet_id: u32,
    pub line_id: u16,
    pub timestamp_us: u32,
    pub energy: Energy,
    pub module_id: u8,
    pub payload_len: u16,
}

/// Parse and validate a line-packet header.
///
/// The header CRC covers bytes 0..14 only; payload integrity is left to
/// the application-level length check.
pub fn parse_line_header(buf: &[u8]) -> Result<LineHeader, DecodeError> {
    if buf.len() < LINE_HEADER_LEN {
        return Err(DecodeError::TooShort(buf.len()));
    }
    if !crc::verify(&buf[..LINE_HEADER_LEN]) {
        return Err(DecodeError::BadCrc);
    }
    let header = LineHeader {
        packet_id: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
        line_id: u16::from_be_bytes([buf[4], buf[5]]),
        timestamp_us: u32::from_le_bytes([buf[6], buf[7], buf[8], buf[9]]),
        energy: Energy::from(buf[10]),
        module_id: buf[11],
        payload_len: u16::from_be_bytes([buf[12], buf[13]]),
    };
    let available = buf.len() - LINE_HEADER_LEN;
    if header.payload_len as usize > available {
        return Err(DecodeError::Truncated {
            declared: header.payload_len as usize,
            available,
        });
    }
    Ok(header)
}

/// Encode a line packet; the detector side of the protocol, kept for
/// loopback tests and detector mocks.
pub fn encode_line_packet(header: &LineHeader, payload: &[u8]) -> Vec<u8> {
    debug_assert_eq!(header.payload_len as usize, payload.len());
    let mut buf = Vec::with_capacity(LINE_HEADER_LEN + payload.len());
    buf.extend_from_slice(&header.packet_id.to_le_bytes());
    buf.extend_from_slice(&header.line_id.to_be_bytes());
    buf.extend_from_slice(&header.timestamp_us.to_le_bytes());
    buf.push(match header.energy {
        Energy::Low => 0,
        Energy::High => 1,
    });
    buf.push(header.module_id);
    buf.extend_from_slice(&header.payload_len.to_be_bytes());
    crc::append(&mut buf);
    buf.extend_from_slice(payload);
    buf
}

/// Parse a discovery reply into a [`Detector`].
///
/// The sender address supplies the IP; everything else comes from the
/// record. Replies with an out-of-range pixel depth are rejected.
pub fn parse_device_info(buf: &[u8], peer_ip: Ipv4Addr) -> Result<Detector, DecodeError> {
    if buf.len() < DEVICE_INFO_LEN {
        return Err(DecodeError::TooShort(buf.len()));
    }
    let mut mac = [0u8; 6];
    mac.copy_from_slice(&buf[0..6]);

    let serial_end = buf[10..42].iter().position(|b| *b == 0).unwrap_or(32);
    let serial = String::from_utf8_lossy(&buf[10..10 + serial_end]).into_owned();

    let pixel_depth = buf[49];
    if !(8..=16).contains(&pixel_depth) {
        return Err(DecodeError::BadField("pixel depth"));
    }

    Ok(Detector {
        mac: Mac(mac),
        ip: peer_ip,
        cmd_port: super::u16_be(&buf[6..8]),
        img_port: super::u16_be(&buf[8..10]),
        serial,
        pixel_count: super::u32_be(&buf[42..46]),
        module_count: buf[46],
        card_type: buf[47],
        pixel_size: buf[48],
        pixel_depth,
        firmware_version: super::u16_be(&buf[50..52]),
    })
}

/// Encode a device-info record; the detector side of discovery.
pub fn encode_device_info(det: &Detector) -> Vec<u8> {
    let mut buf = Vec::with_capacity(DEVICE_INFO_LEN);
    buf.extend_from_slice(&det.mac.0);
    buf.extend_from_slice(&det.cmd_port.to_be_bytes());
    buf.extend_from_slice(&det.img_port.to_be_bytes());
    let mut serial = [0u8; 32];
    let n = det.serial.len().min(32);
    serial[..n].copy_from_slice(&det.serial.as_bytes()[..n]);
    buf.extend_from_slice(&serial);
    buf.extend_from_slice(&det.pixel_count.to_be_bytes());
    buf.push(det.module_count);
    buf.push(det.card_type);
    buf.push(det.pixel_size);
    buf.push(det.pixel_depth);
    buf.extend_from_slice(&det.firmware_version.to_be_bytes());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_header_round_trip() {
        let header = LineHeader {
            packet_id: 7,
            line_id: 513,
            timestamp_us: 123_456,
            energy: Energy::High,
            module_id: 3,
            payload_len: 4,
        };
        let packet = encode_line_packet(&header, &[1, 2, 3, 4]);
        assert_eq!(packet.len(), LINE_HEADER_LEN + 4);
        // Line ID is big-endian on the wire
        assert_eq!(&packet[4..6], &[0x02, 0x01]);
        let parsed = parse_line_header(&packet).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_line_header_crc_damage() {
        let header = LineHeader {
            packet_id: 1,
            line_id: 0,
            timestamp_us: 0,
            energy: Energy::Low,
            module_id: 0,
            payload_len: 2,
        };
        let mut packet = encode_line_packet(&header, &[9, 9]);
        packet[4] ^= 0x01;
        assert_eq!(parse_line_header(&packet), Err(DecodeError::BadCrc));
    }

    #[test]
    fn test_line_header_truncated_payload() {
        let header = LineHeader {
            packet_id: 1,
            line_id: 0,
            timestamp_us: 0,
            energy: Energy::Low,
            module_id: 0,
            payload_len: 16,
        };
        let packet = encode_line_packet(&header, &[0u8; 16]);
        assert!(matches!(
            parse_line_header(&packet[..LINE_HEADER_LEN + 8]),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn test_device_info_round_trip() {
        let det = Detector {
            mac: Mac([0xAA, 0xBB, 0xCC, 0x00, 0x11, 0x22]),
            ip: Ipv4Addr::new(192, 168, 1, 50),
            cmd_port: 3000,
            img_port: 4001,
            serial: "TDI04-8S-0042".into(),
            pixel_count: 4608,
            module_count: 8,
            card_type: 2,
            pixel_size: 8,
            pixel_depth: 16,
            firmware_version: 0x0203,
        };
        let record = encode_device_info(&det);
        assert_eq!(record.len(), DEVICE_INFO_LEN);
        let parsed = parse_device_info(&record, det.ip).unwrap();
        assert_eq!(parsed, det);
    }

    #[test]
    fn test_device_info_rejects_bad_depth() {
        let mut det = Detector::default();
        det.pixel_depth = 16;
        let mut record = encode_device_info(&det);
        record[49] = 24;
        assert!(parse_device_info(&record, det.ip).is_err());
    }
}
