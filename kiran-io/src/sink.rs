//! Event sinks for command and image channels
//!
//! The SDK reports asynchronous conditions through two capability traits,
//! one per channel. Implementations must be `Send + Sync`: errors and
//! events arrive from the heartbeat and image receiver threads, never on a
//! guaranteed thread. Callbacks should return quickly; `on_frame` in
//! particular runs on the acquisition path and holds up line assembly
//! while it executes.

use crate::error::Error;
use shuddhi_correct::ImageFrame;
use std::sync::Arc;

/// Events delivered alongside errors on either channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event {
    /// Number of detectors a discovery pass found.
    DeviceCount(u32),
    /// GCU housekeeping temperature in degrees Celsius.
    Temperature(f32),
    /// GCU housekeeping relative humidity in percent.
    Humidity(f32),
}

impl Event {
    /// Stable numeric event id for hosts that key on codes.
    pub fn id(&self) -> u32 {
        match self {
            Event::DeviceCount(_) => 101,
            Event::Temperature(_) => 107,
            Event::Humidity(_) => 108,
        }
    }
}

/// Receiver for command-channel errors and housekeeping events.
pub trait CommandSink: Send + Sync {
    fn on_error(&self, id: u32, message: &str);
    fn on_event(&self, event: Event);
}

/// Receiver for image-channel errors, events, and completed frames.
///
/// The frame reference is only valid for the duration of the call; the
/// assembler reuses the buffer for the next frame afterwards. Clone the
/// frame to keep it.
pub trait ImageSink: Send + Sync {
    fn on_error(&self, id: u32, message: &str);
    fn on_event(&self, event: Event);
    fn on_frame(&self, frame: &ImageFrame);
}

/// Sink that forwards everything to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl CommandSink for LogSink {
    fn on_error(&self, id: u32, message: &str) {
        log::error!("command channel error {}: {}", id, message);
    }

    fn on_event(&self, event: Event) {
        log::debug!("command channel event: {:?}", event);
    }
}

impl ImageSink for LogSink {
    fn on_error(&self, id: u32, message: &str) {
        log::error!("image channel error {}: {}", id, message);
    }

    fn on_event(&self, event: Event) {
        log::debug!("image channel event: {:?}", event);
    }

    fn on_frame(&self, frame: &ImageFrame) {
        log::debug!(
            "frame ready: {}x{} @ {} bits",
            frame.width(),
            frame.height(),
            frame.bit_depth()
        );
    }
}

pub(crate) fn report_command_error(sink: &Arc<dyn CommandSink>, err: &Error) {
    sink.on_error(err.id(), &err.to_string());
}

pub(crate) fn report_image_error(sink: &Arc<dyn ImageSink>, err: &Error) {
    sink.on_error(err.id(), &err.to_string());
}
