//! Detector discovery and network configuration
//!
//! The adaptor owns a broadcast-capable socket on the host's acquisition
//! NIC. Discovery sends one probe to the limited-broadcast address and
//! collects device-info replies under a rolling deadline; detectors are
//! deduplicated by MAC because a multi-homed host can hear the same reply
//! on several routes.
//!
//! Two probe dialects exist in the field: older GCUs answer the ASCII
//! probe, newer ones a framed `GCU_INFO` read addressed to all modules.
//! The dialect is per-firmware, not negotiated, so it is a configuration
//! choice here.

use crate::detector::{Detector, Mac, DEFAULT_CMD_PORT};
use crate::error::{Error, Result};
use crate::protocol::image::{parse_device_info, DISCOVERY_PROBE};
use crate::protocol::{command::TxFrame, params};
use crate::sink::{CommandSink, Event, LogSink};
use crate::transport::{RecvOutcome, UdpTransport};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default reply-collection window.
pub const DISCOVERY_WINDOW: Duration = Duration::from_secs(2);

/// Probe dialect the target firmware answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryProbe {
    /// Literal `DISCOVER_DETECTOR` datagram.
    #[default]
    Ascii,
    /// `GCU_INFO` read frame addressed to all modules.
    Framed,
}

/// Network adaptor: discovery plus out-of-session device configuration.
pub struct Adaptor {
    local_ip: Ipv4Addr,
    cmd_port: u16,
    probe: DiscoveryProbe,
    transport: Option<UdpTransport>,
    sink: Arc<dyn CommandSink>,
}

impl Adaptor {
    /// Adaptor bound to nothing yet, reporting through the log sink.
    pub fn new(local_ip: Ipv4Addr) -> Self {
        Self {
            local_ip,
            cmd_port: DEFAULT_CMD_PORT,
            probe: DiscoveryProbe::default(),
            transport: None,
            sink: Arc::new(LogSink),
        }
    }

    pub fn set_sink(&mut self, sink: Arc<dyn CommandSink>) {
        self.sink = sink;
    }

    pub fn set_probe(&mut self, probe: DiscoveryProbe) {
        self.probe = probe;
    }

    /// Override the command port probed during discovery.
    pub fn set_cmd_port(&mut self, port: u16) {
        self.cmd_port = port;
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// Bind the discovery socket on the adapter IP.
    pub fn open(&mut self) -> Result<()> {
        if self.transport.is_some() {
            return Ok(());
        }
        let transport = UdpTransport::bind((self.local_ip, 0))
            .map_err(|e| self.report(Error::AdapterBind(e.to_string())))?;
        transport
            .enable_broadcast()
            .map_err(|e| self.report(Error::AdapterOpen(e.to_string())))?;
        log::info!("adaptor open on {}", self.local_ip);
        self.transport = Some(transport);
        Ok(())
    }

    /// Drop the discovery socket. Idempotent.
    pub fn close(&mut self) {
        if self.transport.take().is_some() {
            log::info!("adaptor closed");
        }
    }

    /// Broadcast a probe and collect detector replies for `window`.
    ///
    /// An empty result is not an error; a silent network and a timeout
    /// look the same on UDP.
    pub fn discover(&mut self, window: Duration) -> Result<Vec<Detector>> {
        let transport = self
            .transport
            .as_ref()
            .ok_or_else(|| self.report(Error::AdapterNotOpen))?;

        let broadcast = SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), self.cmd_port);
        let probe = self.probe_bytes();
        transport
            .send_to(&probe, broadcast)
            .map_err(|e| self.report(Error::AdapterSend(e.to_string())))?;
        log::debug!("discovery probe ({:?}) sent to {}", self.probe, broadcast);

        let mut found: BTreeMap<Mac, Detector> = BTreeMap::new();
        let mut buf = [0u8; 512];
        let start = Instant::now();
        while let Some(remaining) = window.checked_sub(start.elapsed()) {
            if remaining.is_zero() {
                break;
            }
            match transport.recv(&mut buf, remaining) {
                Ok(RecvOutcome::Timeout) => break,
                Ok(RecvOutcome::Data(n, peer)) => {
                    let IpAddr::V4(peer_ip) = peer.ip() else {
                        continue;
                    };
                    if peer_ip == self.local_ip {
                        // Our own broadcast echoed back
                        continue;
                    }
                    match parse_device_info(&buf[..n], peer_ip) {
                        Ok(det) => {
                            log::info!("discovered {}", det);
                            found.entry(det.mac).or_insert(det);
                        }
                        Err(e) => {
                            log::debug!("ignoring malformed reply from {}: {}", peer, e);
                        }
                    }
                }
                Err(e) => {
                    return Err(self.report(Error::AdapterSend(e.to_string())));
                }
            }
        }

        let detectors: Vec<Detector> = found.into_values().collect();
        self.sink
            .on_event(Event::DeviceCount(detectors.len() as u32));
        log::info!("discovery window closed: {} detector(s)", detectors.len());
        Ok(detectors)
    }

    /// Push a new network identity to a detector.
    ///
    /// The device applies the change and reboots; allow a few seconds
    /// before rediscovering it at the new address.
    pub fn configure_device(&mut self, det: &Detector) -> Result<()> {
        let transport = self
            .transport
            .as_ref()
            .ok_or_else(|| self.report(Error::AdapterNotOpen))?;
        let msg = format!(
            "CONFIGURE_DETECTOR:{}:{}:{}:{}",
            det.mac, det.ip, det.cmd_port, det.img_port
        );
        let broadcast = SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), self.cmd_port);
        transport
            .send_to(msg.as_bytes(), broadcast)
            .map_err(|e| self.report(Error::AdapterSend(e.to_string())))?;
        log::info!("configuration pushed to {}; device will reboot", det.mac);
        Ok(())
    }

    /// Ask detectors to restore their factory network settings
    /// (192.168.1.2, command 3000, image 4001).
    pub fn restore(&mut self, detectors: &[Detector]) -> Result<()> {
        let transport = self
            .transport
            .as_ref()
            .ok_or_else(|| self.report(Error::AdapterNotOpen))?;
        let broadcast = SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), self.cmd_port);
        for det in detectors {
            let msg = format!("RESTORE_DETECTOR:{}", det.mac);
            transport
                .send_to(msg.as_bytes(), broadcast)
                .map_err(|e| self.report(Error::AdapterSend(e.to_string())))?;
            log::info!("restore requested for {}", det.mac);
        }
        Ok(())
    }

    fn probe_bytes(&self) -> Vec<u8> {
        match self.probe {
            DiscoveryProbe::Ascii => DISCOVERY_PROBE.to_vec(),
            DiscoveryProbe::Framed => {
                let mut tx = TxFrame::new();
                let spec = params::spec(params::Param::GcuInfo)
                    .expect("GcuInfo is always catalogued");
                tx.set_operation(spec.code, params::opcode::READ, crate::protocol::MODULE_ALL);
                tx.as_bytes().to_vec()
            }
        }
    }

    fn report(&self, err: Error) -> Error {
        self.sink.on_error(err.id(), &err.to_string());
        err
    }
}

impl Drop for Adaptor {
    fn drop(&mut self) {
        self.close();
    }
}
