//! Heartbeat monitor for detector liveness
//!
//! A dedicated thread probes the GCU housekeeping block once per interval
//! through the shared control channel. A reply proves the command path is
//! alive and usually carries temperature and humidity, which are emitted
//! as events. Misses are counted; the tenth consecutive miss raises one
//! `HeartbeatFail` on the command sink and resets the counter so a dead
//! link does not flood the host. The monitor never closes the channel;
//! deciding what a lost detector means is the host's call.

use crate::control::ControlChannel;
use crate::error::Error;
use crate::sink::{report_command_error, CommandSink, Event};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Default probe interval.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Consecutive misses that raise a heartbeat failure.
const MISS_LIMIT: u32 = 10;

/// Slice length for the interruptible inter-probe sleep.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Background liveness monitor. Idle until [`start`](Self::start); one
/// monitor drives one control channel.
pub struct HeartbeatMonitor {
    interval: Duration,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    done_rx: Option<Receiver<()>>,
}

impl HeartbeatMonitor {
    pub fn new() -> Self {
        Self::with_interval(HEARTBEAT_INTERVAL)
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(10)),
            shutdown: Arc::new(AtomicBool::new(false)),
            handle: None,
            done_rx: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Spawn the monitor thread against an open control channel.
    pub fn start(
        &mut self,
        channel: Arc<ControlChannel>,
        sink: Arc<dyn CommandSink>,
    ) -> crate::error::Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }
        self.shutdown.store(false, Ordering::Relaxed);
        let (done_tx, done_rx) = bounded(1);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.interval;

        let handle = thread::Builder::new()
            .name("kiran-heartbeat".to_string())
            .spawn(move || {
                heartbeat_loop(channel, shutdown, sink, interval);
                let _ = done_tx.send(());
            })
            .map_err(|e| Error::HeartbeatStart(e.to_string()))?;

        self.handle = Some(handle);
        self.done_rx = Some(done_rx);
        log::info!("heartbeat monitor started ({:?} interval)", self.interval);
        Ok(())
    }

    /// Stop the monitor and join its thread.
    ///
    /// The thread notices the stop flag within one interval. If it fails
    /// to exit within twice the interval the handle is detached and
    /// `HeartbeatStopAbnormal` is returned; the leaked thread holds only
    /// its channel reference.
    pub fn stop(&mut self) -> crate::error::Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        self.shutdown.store(true, Ordering::Relaxed);

        let grace = self.interval * 2;
        let done_rx = self.done_rx.take();
        let exited = match done_rx {
            Some(rx) => match rx.recv_timeout(grace) {
                Ok(()) => true,
                Err(RecvTimeoutError::Timeout) => false,
                Err(RecvTimeoutError::Disconnected) => true,
            },
            None => true,
        };

        if exited {
            let _ = handle.join();
            log::info!("heartbeat monitor stopped");
            Ok(())
        } else {
            log::error!("heartbeat thread missed its stop grace period, detaching");
            drop(handle);
            Err(Error::HeartbeatStopAbnormal)
        }
    }
}

impl Default for HeartbeatMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Monitor loop: sleep one interval, probe, account for misses.
fn heartbeat_loop(
    channel: Arc<ControlChannel>,
    shutdown: Arc<AtomicBool>,
    sink: Arc<dyn CommandSink>,
    interval: Duration,
) {
    log::debug!("heartbeat thread running");
    let mut missed: u32 = 0;

    'run: while !shutdown.load(Ordering::Relaxed) {
        // Sleep in slices so stop() takes effect within one interval
        let mut slept = Duration::ZERO;
        while slept < interval {
            if shutdown.load(Ordering::Relaxed) {
                break 'run;
            }
            let slice = SLEEP_SLICE.min(interval - slept);
            thread::sleep(slice);
            slept += slice;
        }

        match channel.read_telemetry(Some(interval)) {
            Ok(payload) => {
                missed = 0;
                if let Some((temperature, humidity)) = parse_telemetry(&payload) {
                    log::trace!(
                        "heartbeat ok: {:.1} degC, {:.1}% RH",
                        temperature,
                        humidity
                    );
                    sink.on_event(Event::Temperature(temperature));
                    sink.on_event(Event::Humidity(humidity));
                } else {
                    log::trace!("heartbeat ok, telemetry block too short to parse");
                }
            }
            Err(e) => {
                missed += 1;
                log::warn!("heartbeat miss {}/{}: {}", missed, MISS_LIMIT, e);
                if missed >= MISS_LIMIT {
                    report_command_error(&sink, &Error::HeartbeatFail(missed));
                    missed = 0;
                }
            }
        }
    }

    log::debug!("heartbeat thread exiting");
}

/// Decode temperature and humidity from a GCU housekeeping block.
///
/// Firmware-specific: two little-endian u16 words at offsets 0 and 2,
/// both scaled by ten. Keep every firmware quirk inside this function.
fn parse_telemetry(payload: &[u8]) -> Option<(f32, f32)> {
    if payload.len() < 4 {
        return None;
    }
    let temperature = u16::from_le_bytes([payload[0], payload[1]]) as f32 / 10.0;
    let humidity = u16::from_le_bytes([payload[2], payload[3]]) as f32 / 10.0;
    Some((temperature, humidity))
}
