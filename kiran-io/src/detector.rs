//! Detector identity and endpoint description
//!
//! A [`Detector`] is the immutable description of one line-scan sensor for
//! the life of a session: how to reach it (IP plus command/image ports)
//! and what it is (serial, geometry, firmware). Instances normally come
//! out of discovery; hosts on static networks can also build one by hand.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Hardware (MAC) address of a detector's network interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Mac(pub [u8; 6]);

impl fmt::Display for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for Mac {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut mac = [0u8; 6];
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(format!("malformed MAC address: {}", s));
        }
        for (out, part) in mac.iter_mut().zip(parts) {
            *out = u8::from_str_radix(part, 16)
                .map_err(|_| format!("malformed MAC address: {}", s))?;
        }
        Ok(Mac(mac))
    }
}

/// Default command-channel UDP port on the detector.
pub const DEFAULT_CMD_PORT: u16 = 3000;
/// Default image-channel UDP port on the detector.
pub const DEFAULT_IMG_PORT: u16 = 4001;
/// Factory-default detector address after a settings restore.
pub const DEFAULT_DETECTOR_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 2);

/// Identity, endpoint, and hardware description of one detector.
#[derive(Debug, Clone, PartialEq)]
pub struct Detector {
    pub mac: Mac,
    pub ip: Ipv4Addr,
    pub cmd_port: u16,
    pub img_port: u16,
    pub serial: String,
    /// Total pixels per line across all modules.
    pub pixel_count: u32,
    /// Number of detector modules (DMs) behind the GCU.
    pub module_count: u8,
    pub card_type: u8,
    /// Pixel pitch in tenths of a millimeter.
    pub pixel_size: u8,
    /// Bits per pixel, 8..=16.
    pub pixel_depth: u8,
    pub firmware_version: u16,
}

impl Default for Detector {
    fn default() -> Self {
        Self {
            mac: Mac::default(),
            ip: DEFAULT_DETECTOR_IP,
            cmd_port: DEFAULT_CMD_PORT,
            img_port: DEFAULT_IMG_PORT,
            serial: String::new(),
            pixel_count: 0,
            module_count: 0,
            card_type: 0,
            pixel_size: 0,
            pixel_depth: 16,
            firmware_version: 0,
        }
    }
}

impl Detector {
    /// Detector at a known address with default ports.
    pub fn at(ip: Ipv4Addr) -> Self {
        Self {
            ip,
            ..Self::default()
        }
    }
}

impl fmt::Display for Detector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at {} (cmd {}, img {}, {} px, {} modules)",
            self.mac, self.ip, self.cmd_port, self.img_port, self.pixel_count, self.module_count
        )
    }
}
