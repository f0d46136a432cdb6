//! Command frame builder and response decoder
//!
//! The transmit side reuses one fixed buffer for every command so the
//! control channel allocates nothing per transaction. The receive side
//! validates magic and CRC before exposing any field; a nonzero device
//! error byte is a valid frame, distinguished from framing damage.

use super::{crc, MAGIC};

/// Largest frame: 6-byte header, 255-byte payload, 2-byte CRC.
const MAX_FRAME_SIZE: usize = 6 + 255 + 2;

/// Shortest well-formed response: header plus CRC, no payload.
const MIN_RESPONSE_SIZE: usize = 8;

/// Reusable TX frame buffer with the magic pre-filled.
///
/// Configure with one of the `set_*` builders, then hand
/// [`as_bytes`](Self::as_bytes) to the transport. Reuse freely.
pub struct TxFrame {
    data: [u8; MAX_FRAME_SIZE],
    len: usize,
}

impl TxFrame {
    pub const fn new() -> Self {
        let mut data = [0u8; MAX_FRAME_SIZE];
        data[0] = MAGIC[0];
        data[1] = MAGIC[1];
        Self { data, len: 0 }
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Read request for a parameter code.
    pub fn set_read(&mut self, code: u8, module: u8) {
        self.set_header(code, super::params::opcode::READ, module, 0);
        self.finalize(0);
    }

    /// Write request carrying a big-endian value of `width` bytes (1..=8).
    pub fn set_write(&mut self, code: u8, module: u8, value: u64, width: usize) {
        debug_assert!((1..=8).contains(&width));
        self.set_header(code, super::params::opcode::WRITE, module, width as u8);
        let be = value.to_be_bytes();
        self.data[6..6 + width].copy_from_slice(&be[8 - width..]);
        self.finalize(width);
    }

    /// Execute or load request with an empty payload.
    pub fn set_operation(&mut self, code: u8, op: u8, module: u8) {
        self.set_header(code, op, module, 0);
        self.finalize(0);
    }

    /// Arbitrary payload, used for vendor blocks.
    pub fn set_raw(&mut self, code: u8, op: u8, module: u8, payload: &[u8]) {
        debug_assert!(payload.len() <= 255);
        self.set_header(code, op, module, payload.len() as u8);
        self.data[6..6 + payload.len()].copy_from_slice(payload);
        self.finalize(payload.len());
    }

    /// Command code of the frame currently in the buffer.
    pub fn code(&self) -> u8 {
        self.data[2]
    }

    #[inline]
    fn set_header(&mut self, code: u8, op: u8, module: u8, dlen: u8) {
        self.data[2] = code;
        self.data[3] = op;
        self.data[4] = module;
        self.data[5] = dlen;
    }

    #[inline]
    fn finalize(&mut self, payload_len: usize) {
        let crc_pos = 6 + payload_len;
        let crc = crc::checksum(&self.data[..crc_pos]);
        self.data[crc_pos] = (crc & 0xFF) as u8;
        self.data[crc_pos + 1] = (crc >> 8) as u8;
        self.len = crc_pos + 2;
    }
}

impl Default for TxFrame {
    fn default() -> Self {
        Self::new()
    }
}

/// Framing damage on a received buffer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("frame too short: {0} bytes")]
    TooShort(usize),
    #[error("bad magic: {0:02X} {1:02X}")]
    BadMagic(u8, u8),
    #[error("CRC mismatch")]
    BadCrc,
    #[error("payload truncated: header declares {declared} bytes, frame carries {available}")]
    Truncated { declared: usize, available: usize },
    #[error("implausible field: {0}")]
    BadField(&'static str),
}

/// Decoded response frame. The payload borrows from the receive buffer.
#[derive(Debug, PartialEq, Eq)]
pub struct Response<'a> {
    /// Command code echo.
    pub code: u8,
    /// Operation byte echo.
    pub operation: u8,
    /// Device error code; zero is success.
    pub status: u8,
    pub payload: &'a [u8],
}

impl Response<'_> {
    pub fn is_ok(&self) -> bool {
        self.status == 0
    }
}

/// Decode and validate a response frame.
pub fn decode_response(buf: &[u8]) -> Result<Response<'_>, DecodeError> {
    if buf.len() < MIN_RESPONSE_SIZE {
        return Err(DecodeError::TooShort(buf.len()));
    }
    if buf[0] != MAGIC[0] || buf[1] != MAGIC[1] {
        return Err(DecodeError::BadMagic(buf[0], buf[1]));
    }
    let declared = buf[5] as usize;
    if buf.len() < 6 + declared + 2 {
        return Err(DecodeError::Truncated {
            declared,
            available: buf.len().saturating_sub(8),
        });
    }
    let frame = &buf[..6 + declared + 2];
    if !crc::verify(frame) {
        return Err(DecodeError::BadCrc);
    }
    Ok(Response {
        code: buf[2],
        operation: buf[3],
        status: buf[4],
        payload: &frame[6..6 + declared],
    })
}

/// Encode a response frame; the device side of the protocol.
///
/// The SDK itself only decodes responses, but tests and detector mocks
/// need the emit side as well.
pub fn encode_response(code: u8, operation: u8, status: u8, payload: &[u8]) -> Vec<u8> {
    debug_assert!(payload.len() <= 255);
    let mut frame = Vec::with_capacity(8 + payload.len());
    frame.extend_from_slice(&MAGIC);
    frame.push(code);
    frame.push(operation);
    frame.push(status);
    frame.push(payload.len() as u8);
    frame.extend_from_slice(payload);
    crc::append(&mut frame);
    frame
}

#[cfg(test)]
mod tests {
    use super::super::params::opcode;
    use super::*;

    #[test]
    fn test_integration_time_write_frame() {
        // write(0x20, 1500) -> 55 AA 20 01 00 04 00 00 05 DC <crc>
        let mut tx = TxFrame::new();
        tx.set_write(0x20, 0x00, 1500, 4);
        let bytes = tx.as_bytes();
        assert_eq!(
            &bytes[..10],
            &[0x55, 0xAA, 0x20, 0x01, 0x00, 0x04, 0x00, 0x00, 0x05, 0xDC]
        );
        assert!(crc::verify(bytes));
    }

    #[test]
    fn test_read_frame_layout() {
        let mut tx = TxFrame::new();
        tx.set_read(0x64, 0x02);
        let bytes = tx.as_bytes();
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..6], &[0x55, 0xAA, 0x64, opcode::READ, 0x02, 0x00]);
        assert!(crc::verify(bytes));
    }

    #[test]
    fn test_frame_reuse() {
        let mut tx = TxFrame::new();
        tx.set_write(0x20, 0x00, 1500, 4);
        assert_eq!(tx.as_bytes().len(), 12);
        tx.set_read(0x22, 0x00);
        assert_eq!(tx.as_bytes().len(), 8);
        assert!(crc::verify(tx.as_bytes()));
    }

    #[test]
    fn test_response_round_trip() {
        let frame = encode_response(0x20, opcode::READ, 0, &[0x00, 0x00, 0x05, 0xDC]);
        let resp = decode_response(&frame).unwrap();
        assert_eq!(resp.code, 0x20);
        assert!(resp.is_ok());
        assert_eq!(resp.payload, &[0x00, 0x00, 0x05, 0xDC]);
    }

    #[test]
    fn test_write_ack_frame() {
        // Ack for an integration-time write: no payload, echoed op byte
        let frame = encode_response(0x20, opcode::WRITE, 0, &[]);
        assert_eq!(&frame[..6], &[0x55, 0xAA, 0x20, 0x01, 0x00, 0x00]);
        let resp = decode_response(&frame).unwrap();
        assert!(resp.is_ok());
        assert!(resp.payload.is_empty());
    }

    #[test]
    fn test_device_rejection_is_valid_frame() {
        let frame = encode_response(0x35, opcode::WRITE, 0x06, &[]);
        let resp = decode_response(&frame).unwrap();
        assert!(!resp.is_ok());
        assert_eq!(resp.status, 0x06);
    }

    #[test]
    fn test_decode_rejects_damage() {
        let mut frame = encode_response(0x20, opcode::READ, 0, &[0x01]);
        assert!(decode_response(&frame[..5]).is_err());
        frame[0] = 0xAA;
        assert!(matches!(
            decode_response(&frame),
            Err(DecodeError::BadMagic(0xAA, 0xAA))
        ));
        frame[0] = 0x55;
        frame[6] ^= 0xFF;
        assert_eq!(decode_response(&frame), Err(DecodeError::BadCrc));
    }

    #[test]
    fn test_decode_rejects_truncated_payload() {
        let frame = encode_response(0x62, opcode::READ, 0, b"SN12345678");
        assert!(matches!(
            decode_response(&frame[..12]),
            Err(DecodeError::Truncated { .. })
        ));
    }
}
