//! Image receiver
//!
//! A dedicated thread pulls line datagrams off the image socket and feeds
//! the frame assembler. Receive timeouts are expected during beam-off
//! periods and absorbed silently; hard socket errors are reported to the
//! image sink and terminate the grab. Packet loss is detected through
//! gaps in the monotonic packet ID and counted, never fatal.
//!
//! `grab(0)` runs until stopped; `grab(n)` stops after `n` completed
//! frames; `snap()` is a blocking single-frame acquisition.

use crate::assembler::FrameAssembler;
use crate::detector::Detector;
use crate::error::{Error, Result};
use crate::protocol::image::{parse_line_header, LINE_HEADER_LEN};
use crate::sink::{report_image_error, ImageSink, LogSink};
use crate::transport::{RecvOutcome, UdpTransport};
use crossbeam_channel::RecvTimeoutError;
use parking_lot::Mutex;
use shuddhi_correct::ImageFrame;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Default per-receive deadline.
pub const DEFAULT_IMAGE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Receive buffer size; covers the largest line a 16-bit detector emits.
const RX_BUFFER_SIZE: usize = 65536;

/// Running counters for one grab.
#[derive(Debug, Default)]
pub struct GrabStats {
    pub packets_received: AtomicU64,
    pub packets_lost: AtomicU64,
    pub lines_received: AtomicU64,
}

/// Point-in-time copy of the grab counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GrabStatsSnapshot {
    pub packets_received: u64,
    pub packets_lost: u64,
    pub lines_received: u64,
}

impl GrabStats {
    fn snapshot(&self) -> GrabStatsSnapshot {
        GrabStatsSnapshot {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_lost: self.packets_lost.load(Ordering::Relaxed),
            lines_received: self.lines_received.load(Ordering::Relaxed),
        }
    }
}

struct GrabberSetup {
    detector: Detector,
    local_ip: Ipv4Addr,
}

/// Image-channel receiver bound to one detector.
pub struct Grabber {
    setup: Mutex<Option<GrabberSetup>>,
    assembler: Arc<FrameAssembler>,
    sink: Mutex<Arc<dyn ImageSink>>,
    header_mode: AtomicBool,
    timeout_ms: AtomicU64,
    grabbing: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
    stats: Arc<GrabStats>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Grabber {
    pub fn new(assembler: Arc<FrameAssembler>) -> Self {
        Self {
            setup: Mutex::new(None),
            assembler,
            sink: Mutex::new(Arc::new(LogSink)),
            header_mode: AtomicBool::new(false),
            timeout_ms: AtomicU64::new(DEFAULT_IMAGE_TIMEOUT.as_millis() as u64),
            grabbing: Arc::new(AtomicBool::new(false)),
            stop_requested: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(GrabStats::default()),
            handle: Mutex::new(None),
        }
    }

    pub fn set_sink(&self, sink: Arc<dyn ImageSink>) {
        *self.sink.lock() = sink;
    }

    /// Select header-mode parsing of line packets.
    pub fn set_header_mode(&self, enable: bool) {
        self.header_mode.store(enable, Ordering::Relaxed);
    }

    /// Per-receive deadline in milliseconds.
    pub fn set_timeout(&self, millis: u64) {
        self.timeout_ms.store(millis.max(1), Ordering::Relaxed);
    }

    /// Associate the grabber with a detector and the local adapter IP the
    /// image socket binds on.
    pub fn open(&self, detector: &Detector, local_ip: Ipv4Addr) -> Result<()> {
        let mut setup = self.setup.lock();
        if setup.is_some() {
            log::debug!("grabber already open");
            return Ok(());
        }
        *setup = Some(GrabberSetup {
            detector: detector.clone(),
            local_ip,
        });
        log::info!(
            "grabber open for {} (image port {})",
            detector.mac,
            detector.img_port
        );
        Ok(())
    }

    /// Stop any running grab and forget the detector. Idempotent.
    pub fn close(&self) {
        let _ = self.stop();
        if self.setup.lock().take().is_some() {
            let stats = self.stats.snapshot();
            log::info!(
                "grabber closed: {} packets, {} lost, {} lines",
                stats.packets_received,
                stats.packets_lost,
                stats.lines_received
            );
        }
    }

    pub fn is_open(&self) -> bool {
        self.setup.lock().is_some()
    }

    pub fn is_grabbing(&self) -> bool {
        self.grabbing.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> GrabStatsSnapshot {
        self.stats.snapshot()
    }

    /// Start acquisition. `frames == 0` grabs until stopped, otherwise
    /// the receiver exits after that many completed frames.
    pub fn grab(&self, frames: u32) -> Result<()> {
        let setup = self.setup.lock();
        let Some(setup_ref) = setup.as_ref() else {
            return Err(self.report(Error::GrabberNotOpen));
        };
        if self.grabbing.swap(true, Ordering::SeqCst) {
            return Err(self.report(Error::GrabberBusy));
        }

        let detector = setup_ref.detector.clone();
        let local_ip = setup_ref.local_ip;
        drop(setup);

        // Reap a receiver that exited on its own after reaching its frame
        // target, and release that grab's assembler buffer
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
        self.assembler.stop();

        // Bind the image socket before starting the assembler so a bind
        // failure leaves nothing running
        let transport = match UdpTransport::bind((local_ip, detector.img_port)) {
            Ok(t) => t,
            Err(e) => {
                self.grabbing.store(false, Ordering::SeqCst);
                return Err(self.report(Error::ConBind(e.to_string())));
            }
        };

        if let Err(e) = self
            .assembler
            .start(detector.pixel_count, detector.pixel_depth)
        {
            self.grabbing.store(false, Ordering::SeqCst);
            return Err(self.report(e));
        }

        self.stop_requested.store(false, Ordering::SeqCst);
        self.stats.packets_received.store(0, Ordering::Relaxed);
        self.stats.packets_lost.store(0, Ordering::Relaxed);
        self.stats.lines_received.store(0, Ordering::Relaxed);

        let ctx = GrabContext {
            transport,
            detector_ip: detector.ip,
            assembler: Arc::clone(&self.assembler),
            sink: self.sink.lock().clone(),
            stats: Arc::clone(&self.stats),
            grabbing: Arc::clone(&self.grabbing),
            stop_requested: Arc::clone(&self.stop_requested),
            header_mode: self.header_mode.load(Ordering::Relaxed),
            timeout: Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed)),
            frames_target: frames as u64,
        };

        let handle = thread::Builder::new()
            .name("kiran-grabber".to_string())
            .spawn(move || grab_loop(ctx))
            .map_err(|e| {
                self.assembler.stop();
                self.grabbing.store(false, Ordering::SeqCst);
                self.report(Error::GrabberRecv(format!("spawn failed: {}", e)))
            })?;

        *self.handle.lock() = Some(handle);
        log::info!(
            "acquisition started (target {} frames)",
            if frames == 0 { "unbounded".into() } else { frames.to_string() }
        );
        Ok(())
    }

    /// Single-frame blocking acquisition: grab one frame, wait for it,
    /// stop, and return the frame.
    pub fn snap(&self) -> Result<ImageFrame> {
        let frame_rx = self.assembler.frame_stream();
        self.grab(1)?;

        // Generous bound: several receive deadlines plus assembly time
        let timeout = Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed))
            .saturating_mul(4)
            .max(Duration::from_secs(1));
        let result = match frame_rx.recv_timeout(timeout) {
            Ok(frame) => Ok(frame),
            Err(RecvTimeoutError::Timeout) => Err(Error::AdapterRecvTimeout),
            Err(RecvTimeoutError::Disconnected) => {
                Err(Error::GrabberRecv("assembler stream closed".into()))
            }
        };
        self.stop()?;
        result.map_err(|e| self.report(e))
    }

    /// Request stop, join the receiver thread, then stop the assembler.
    pub fn stop(&self) -> Result<()> {
        self.stop_requested.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                log::error!("grabber thread panicked");
            }
        }
        self.assembler.stop();
        self.grabbing.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn report(&self, err: Error) -> Error {
        let sink = self.sink.lock().clone();
        report_image_error(&sink, &err);
        err
    }
}

struct GrabContext {
    transport: UdpTransport,
    detector_ip: Ipv4Addr,
    assembler: Arc<FrameAssembler>,
    sink: Arc<dyn ImageSink>,
    stats: Arc<GrabStats>,
    grabbing: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
    header_mode: bool,
    timeout: Duration,
    frames_target: u64,
}

/// Receiver loop: pull datagrams, parse, hand lines to the assembler.
fn grab_loop(ctx: GrabContext) {
    log::debug!("grabber thread running");
    let mut buf = vec![0u8; RX_BUFFER_SIZE];
    let mut last_packet_id: Option<u32> = None;
    let mut line_counter: u32 = 0;

    while !ctx.stop_requested.load(Ordering::Relaxed) {
        if ctx.frames_target > 0 && ctx.assembler.frames_completed() >= ctx.frames_target {
            log::info!("frame target reached");
            break;
        }

        let (n, peer) = match ctx.transport.recv(&mut buf, ctx.timeout) {
            Ok(RecvOutcome::Data(n, peer)) => (n, peer),
            Ok(RecvOutcome::Timeout) => continue,
            Err(e) => {
                let err = Error::GrabberRecv(e.to_string());
                log::error!("{}", err);
                report_image_error(&ctx.sink, &err);
                break;
            }
        };

        // Only the paired detector feeds this socket
        if peer.ip() != IpAddr::V4(ctx.detector_ip) {
            log::trace!("ignoring image datagram from {}", peer);
            continue;
        }

        ctx.stats.packets_received.fetch_add(1, Ordering::Relaxed);
        let datagram = &buf[..n];

        if ctx.header_mode {
            match parse_line_header(datagram) {
                Ok(header) => {
                    if let Some(last) = last_packet_id {
                        let gap = header.packet_id.wrapping_sub(last);
                        // Reordered packets produce a huge wrapped gap;
                        // only plausible forward gaps count as loss
                        if (2..1 << 20).contains(&gap) {
                            ctx.stats
                                .packets_lost
                                .fetch_add(u64::from(gap - 1), Ordering::Relaxed);
                            log::debug!("packet gap: {} missing", gap - 1);
                        }
                    }
                    last_packet_id = Some(header.packet_id);

                    let payload =
                        &datagram[LINE_HEADER_LEN..LINE_HEADER_LEN + header.payload_len as usize];
                    ctx.stats.lines_received.fetch_add(1, Ordering::Relaxed);
                    let _ = ctx.assembler.add_line(payload, u32::from(header.line_id));
                }
                Err(e) => {
                    ctx.stats.packets_lost.fetch_add(1, Ordering::Relaxed);
                    log::debug!("dropping undecodable line packet: {}", e);
                }
            }
        } else {
            ctx.stats.lines_received.fetch_add(1, Ordering::Relaxed);
            let _ = ctx.assembler.add_line(datagram, line_counter);
            line_counter = line_counter.wrapping_add(1);
        }
    }

    ctx.grabbing.store(false, Ordering::SeqCst);
    let stats = ctx.stats.snapshot();
    log::info!(
        "grabber thread exiting: {} packets, {} lost, {} lines",
        stats.packets_received,
        stats.packets_lost,
        stats.lines_received
    );
}
