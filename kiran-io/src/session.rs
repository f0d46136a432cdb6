//! Acquisition session
//!
//! A session owns everything attached to one detector: the control
//! channel, the heartbeat monitor, the frame assembler, the image
//! receiver, an optional correction engine, and the two sinks. The
//! lifecycle is strict:
//!
//! ```text
//! open -> [configure / calibrate] -> start_grab / snap -> stop_grab -> close
//! ```
//!
//! `close` tears down in reverse dependency order: image receiver first
//! (join, then assembler stop), then the heartbeat (bounded grace), then
//! the control channel. Calibration entry points refuse to run while a
//! grab is active; the engine's planes are read-only during acquisition.
//!
//! When a corrector is installed, completed frames pass through it before
//! reaching the caller's image sink. Frames that fail correction are
//! reported and dropped rather than delivered raw.

use crate::assembler::FrameAssembler;
use crate::config::{Config, SessionConfig};
use crate::control::{CmdStatus, ControlChannel, ReadValue};
use crate::detector::Detector;
use crate::error::{Error, Result};
use crate::grabber::{GrabStatsSnapshot, Grabber};
use crate::heartbeat::HeartbeatMonitor;
use crate::protocol::params::{Param, SystemOp};
use crate::sink::{CommandSink, Event, ImageSink, LogSink};
use parking_lot::Mutex;
use shuddhi_correct::{CalibrationSet, Corrector, ImageFrame};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

/// Correction hook between the assembler and the caller's image sink.
struct CorrectingSink {
    engine: Arc<Mutex<Option<Corrector>>>,
    inner: Arc<dyn ImageSink>,
}

impl ImageSink for CorrectingSink {
    fn on_error(&self, id: u32, message: &str) {
        self.inner.on_error(id, message);
    }

    fn on_event(&self, event: Event) {
        self.inner.on_event(event);
    }

    fn on_frame(&self, frame: &ImageFrame) {
        let guard = self.engine.lock();
        match guard.as_ref() {
            Some(corrector) => match corrector.apply(frame) {
                Ok(corrected) => {
                    drop(guard);
                    self.inner.on_frame(&corrected);
                }
                Err(e) => {
                    drop(guard);
                    let err = Error::Correction(e);
                    log::error!("frame dropped: {}", err);
                    self.inner.on_error(err.id(), &err.to_string());
                }
            },
            None => {
                drop(guard);
                self.inner.on_frame(frame);
            }
        }
    }
}

/// One open detector connection with its acquisition machinery.
pub struct Session {
    detector: Detector,
    local_ip: Ipv4Addr,
    config: SessionConfig,
    control: Arc<ControlChannel>,
    heartbeat: Mutex<HeartbeatMonitor>,
    assembler: Arc<FrameAssembler>,
    grabber: Grabber,
    engine: Arc<Mutex<Option<Corrector>>>,
    cmd_sink: Arc<dyn CommandSink>,
    closed: Mutex<bool>,
}

impl Session {
    /// Open a session: control channel up, heartbeat running (unless
    /// disabled), acquisition idle.
    pub fn open(
        detector: Detector,
        local_ip: Ipv4Addr,
        config: &Config,
        cmd_sink: Arc<dyn CommandSink>,
        img_sink: Arc<dyn ImageSink>,
    ) -> Result<Session> {
        let session_cfg = config.session.clone();

        let control = Arc::new(ControlChannel::with_sink(Arc::clone(&cmd_sink)));
        control.open(&detector)?;
        control.set_timeout(session_cfg.command_timeout_ms);

        let engine: Arc<Mutex<Option<Corrector>>> = Arc::new(Mutex::new(None));

        let assembler = Arc::new(FrameAssembler::new());
        assembler.set_lines(session_cfg.lines_per_frame)?;
        assembler.set_sink(Arc::new(CorrectingSink {
            engine: Arc::clone(&engine),
            inner: img_sink,
        }));

        let grabber = Grabber::new(Arc::clone(&assembler));
        grabber.set_header_mode(session_cfg.header_mode);
        grabber.set_timeout(session_cfg.image_timeout_ms);
        grabber.open(&detector, local_ip)?;

        let mut heartbeat =
            HeartbeatMonitor::with_interval(Duration::from_millis(session_cfg.heartbeat_interval_ms));
        if session_cfg.heartbeat {
            heartbeat.start(Arc::clone(&control), Arc::clone(&cmd_sink))?;
        }

        log::info!("session open for {}", detector);
        Ok(Session {
            detector,
            local_ip,
            config: session_cfg,
            control,
            heartbeat: Mutex::new(heartbeat),
            assembler,
            grabber,
            engine,
            cmd_sink,
            closed: Mutex::new(false),
        })
    }

    pub fn detector(&self) -> &Detector {
        &self.detector
    }

    /// The serialized command channel, for parameter access beyond the
    /// convenience wrappers.
    pub fn control(&self) -> &ControlChannel {
        &self.control
    }

    /// Issue a system operation on the detector.
    pub fn operate(&self, op: SystemOp) -> Result<CmdStatus> {
        self.control.operate(op)
    }

    /// Read a detector parameter.
    ///
    /// `PixelDepth` is answered locally from the discovery record rather
    /// than the wire; firmware hard-codes the wire variant.
    pub fn read(&self, param: Param, module: u8) -> Result<ReadValue> {
        if param == Param::PixelDepth {
            return Ok(ReadValue::Int(self.detector.pixel_depth as u64));
        }
        self.control.read(param, module)
    }

    /// Write a detector parameter.
    pub fn write(&self, param: Param, value: u64, module: u8) -> Result<CmdStatus> {
        self.control.write(param, value, module)
    }

    /// Start or stop the liveness monitor.
    pub fn enable_heartbeat(&self, enable: bool) -> Result<()> {
        let mut heartbeat = self.heartbeat.lock();
        if enable {
            heartbeat.start(Arc::clone(&self.control), Arc::clone(&self.cmd_sink))
        } else {
            heartbeat.stop()
        }
    }

    /// Install (or replace) the correction engine applied to completed
    /// frames. Refused while grabbing.
    pub fn set_corrector(&self, corrector: Option<Corrector>) -> Result<()> {
        if self.grabber.is_grabbing() {
            return Err(Error::GrabberBusy);
        }
        *self.engine.lock() = corrector;
        Ok(())
    }

    /// Derive a corrector from dark-field frames, honoring the correction
    /// stages configured for this session. Refused while grabbing.
    pub fn calibrate_from_darks(
        &self,
        darks: &[&ImageFrame],
        correction: &crate::config::CorrectionConfig,
    ) -> Result<()> {
        if self.grabber.is_grabbing() {
            return Err(Error::GrabberBusy);
        }
        let mut cal = CalibrationSet::uncalibrated(
            self.detector.pixel_count,
            self.config.lines_per_frame,
            self.detector.pixel_depth,
        );
        cal.calibrate_offset(darks)?;
        let mut corrector = Corrector::new(cal);
        corrector.set_stages(correction.offset, correction.gain, correction.baseline);
        corrector.set_target_baseline(correction.target_baseline);
        *self.engine.lock() = Some(corrector);
        log::info!("offset calibration installed from {} dark frames", darks.len());
        Ok(())
    }

    /// Mutable access to the installed corrector's calibration, for gain
    /// and baseline passes. Refused while grabbing.
    pub fn with_calibration<T>(
        &self,
        f: impl FnOnce(&mut Corrector) -> Result<T>,
    ) -> Result<T> {
        if self.grabber.is_grabbing() {
            return Err(Error::GrabberBusy);
        }
        let mut guard = self.engine.lock();
        let Some(corrector) = guard.as_mut() else {
            return Err(Error::InvalidParam("no corrector installed".into()));
        };
        f(corrector)
    }

    /// Begin continuous acquisition; `frames == 0` runs until
    /// [`stop_grab`](Self::stop_grab).
    pub fn start_grab(&self, frames: u32) -> Result<()> {
        self.grabber.grab(frames)
    }

    /// Stop acquisition: join the receiver, then stop the assembler.
    pub fn stop_grab(&self) -> Result<()> {
        self.grabber.stop()
    }

    /// Blocking single-frame acquisition, corrected when an engine is
    /// installed.
    pub fn snap(&self) -> Result<ImageFrame> {
        let raw = self.grabber.snap()?;
        let guard = self.engine.lock();
        match guard.as_ref() {
            Some(corrector) => Ok(corrector.apply(&raw)?),
            None => Ok(raw),
        }
    }

    pub fn is_grabbing(&self) -> bool {
        self.grabber.is_grabbing()
    }

    /// Bounded stream of completed raw frames for hosts that poll instead
    /// of sinking callbacks. Corrected delivery stays on the image sink.
    pub fn raw_frame_stream(&self) -> crossbeam_channel::Receiver<ImageFrame> {
        self.assembler.frame_stream()
    }

    pub fn grab_stats(&self) -> GrabStatsSnapshot {
        self.grabber.stats()
    }

    /// Local adapter address this session receives images on.
    pub fn local_ip(&self) -> Ipv4Addr {
        self.local_ip
    }

    /// Tear the session down. Idempotent; also runs on drop.
    ///
    /// A heartbeat thread that overruns its stop grace is reported as
    /// `HeartbeatStopAbnormal` and detached; teardown proceeds.
    pub fn close(&self) {
        let mut closed = self.closed.lock();
        if *closed {
            return;
        }
        *closed = true;

        log::info!("closing session for {}", self.detector.mac);
        self.grabber.close();

        if let Err(e) = self.heartbeat.lock().stop() {
            self.cmd_sink.on_error(e.id(), &e.to_string());
        }

        self.control.close();
        log::info!("session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// Convenience constructor: session with log-only sinks.
pub fn open_with_log_sinks(
    detector: Detector,
    local_ip: Ipv4Addr,
    config: &Config,
) -> Result<Session> {
    Session::open(
        detector,
        local_ip,
        config,
        Arc::new(LogSink),
        Arc::new(LogSink),
    )
}
