//! Frame assembly from line payloads
//!
//! The assembler turns a stream of wire line payloads into fixed-height
//! frames. One mutex covers the cursor, running flag, and frame buffer;
//! only the image receiver produces lines, so `add_line` contends only
//! with `start`/`stop`.
//!
//! Completed frames are delivered two ways, mirroring the hot/cold split
//! of sensor delivery elsewhere in the stack: the image sink receives a
//! borrow (valid only for the callback), and an optional bounded stream
//! channel receives owned clones for consumers that poll at their own
//! pace. When the stream backs up, frames are dropped with a counter
//! rather than stalling acquisition.

use crate::error::{Error, Result};
use crate::sink::{report_image_error, ImageSink};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use shuddhi_correct::ImageFrame;
use std::sync::Arc;

/// Default frame height in lines.
pub const DEFAULT_LINES: u32 = 1024;

/// Capacity of the completed-frame stream channel.
const FRAME_STREAM_DEPTH: usize = 4;

#[derive(Default)]
struct AsmState {
    running: bool,
    lines_per_frame: u32,
    current_line: u32,
    frames_completed: u64,
    frames_dropped: u64,
    frame: Option<ImageFrame>,
    stream: Option<Sender<ImageFrame>>,
}

/// Line-to-frame assembler.
pub struct FrameAssembler {
    state: Mutex<AsmState>,
    sink: Mutex<Option<Arc<dyn ImageSink>>>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(AsmState {
                lines_per_frame: DEFAULT_LINES,
                ..AsmState::default()
            }),
            sink: Mutex::new(None),
        }
    }

    /// Install the sink that receives frame borrows and errors.
    pub fn set_sink(&self, sink: Arc<dyn ImageSink>) {
        *self.sink.lock() = Some(sink);
    }

    /// Open a bounded stream of completed-frame clones.
    ///
    /// Each call replaces the previous stream receiver.
    pub fn frame_stream(&self) -> Receiver<ImageFrame> {
        let (tx, rx) = bounded(FRAME_STREAM_DEPTH);
        self.state.lock().stream = Some(tx);
        rx
    }

    /// Configure the frame height. Rejected while running.
    pub fn set_lines(&self, lines: u32) -> Result<()> {
        let mut state = self.state.lock();
        if state.running {
            return Err(Error::FrameBusy);
        }
        if lines == 0 {
            return Err(Error::InvalidParam("frame height must be nonzero".into()));
        }
        state.lines_per_frame = lines;
        Ok(())
    }

    pub fn lines(&self) -> u32 {
        self.state.lock().lines_per_frame
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Frames completed since the last `start`.
    pub fn frames_completed(&self) -> u64 {
        self.state.lock().frames_completed
    }

    /// Allocate the frame buffer and begin accepting lines.
    pub fn start(&self, width: u32, pixel_depth: u8) -> Result<()> {
        let mut state = self.state.lock();
        if state.running {
            return Ok(());
        }
        let frame = ImageFrame::new(width, state.lines_per_frame, pixel_depth)
            .map_err(|e| Error::FrameAllocate(e.to_string()))?;
        log::info!(
            "frame assembly started: {}x{} @ {} bits",
            width,
            state.lines_per_frame,
            pixel_depth
        );
        state.frame = Some(frame);
        state.current_line = 0;
        state.frames_completed = 0;
        state.frames_dropped = 0;
        state.running = true;
        Ok(())
    }

    /// Release the frame buffer and return to idle. Idempotent.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if !state.running {
            return;
        }
        state.running = false;
        state.current_line = 0;
        state.frame = None;
        log::info!(
            "frame assembly stopped ({} frames, {} dropped from stream)",
            state.frames_completed,
            state.frames_dropped
        );
    }

    /// Append one line payload at the current row.
    ///
    /// Lines land in arrival order; `line_id` is diagnostic only. A
    /// payload whose length does not match the configured geometry is
    /// dropped with a `LineLengthMismatch` report. Returns `true` when
    /// this line completed a frame.
    pub fn add_line(&self, payload: &[u8], line_id: u32) -> Result<bool> {
        let mut state = self.state.lock();
        if !state.running {
            return Ok(false);
        }
        let row = state.current_line;
        let Some(frame) = state.frame.as_mut() else {
            return Ok(false);
        };

        let expected = frame.line_byte_len();
        if payload.len() != expected {
            drop(state);
            let err = Error::LineLengthMismatch {
                expected,
                actual: payload.len(),
            };
            log::warn!("dropping line {}: {}", line_id, err);
            if let Some(sink) = self.sink.lock().as_ref() {
                report_image_error(sink, &err);
            }
            return Err(err);
        }

        frame
            .write_line(row, payload)
            .map_err(Error::Correction)?;
        log::trace!("line {} placed at row {}", line_id, row);
        state.current_line += 1;

        if state.current_line >= state.lines_per_frame {
            self.complete_frame(&mut state);
            return Ok(true);
        }
        Ok(false)
    }

    /// Deliver the completed frame, then reset for the next one.
    fn complete_frame(&self, state: &mut AsmState) {
        state.frames_completed += 1;
        let completed = state.frames_completed;
        let Some(frame) = state.frame.as_mut() else {
            return;
        };

        if let Some(sink) = self.sink.lock().as_ref() {
            sink.on_frame(frame);
        }
        let mut receiver_gone = false;
        if let Some(stream) = state.stream.as_ref() {
            match stream.try_send(frame.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    state.frames_dropped += 1;
                    log::warn!("frame stream full, dropping frame {}", completed);
                }
                Err(TrySendError::Disconnected(_)) => {
                    log::debug!("frame stream receiver gone");
                    receiver_gone = true;
                }
            }
        }
        if receiver_gone {
            state.stream = None;
        }

        frame.clear();
        state.current_line = 0;
        log::debug!("frame {} complete", completed);
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct CountingSink {
        frames: AtomicU32,
        errors: AtomicU32,
    }

    impl ImageSink for CountingSink {
        fn on_error(&self, _id: u32, _message: &str) {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        fn on_event(&self, _event: crate::sink::Event) {}
        fn on_frame(&self, _frame: &ImageFrame) {
            self.frames.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_frame_completes_at_height() {
        // height 4, width 2, depth 16: four 4-byte lines complete one frame
        let asm = FrameAssembler::new();
        let sink = Arc::new(CountingSink::default());
        asm.set_sink(sink.clone());
        asm.set_lines(4).unwrap();
        let rx = asm.frame_stream();
        asm.start(2, 16).unwrap();

        for i in 0..4u8 {
            let payload = [i, 0, i, 1];
            let completed = asm.add_line(&payload, i as u32).unwrap();
            assert_eq!(completed, i == 3);
        }

        assert_eq!(sink.frames.load(Ordering::Relaxed), 1);
        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.pixels().len(), 8);
        // Row i carries pixels [i, 0x0100 + i] little-endian
        assert_eq!(frame.row(2), &[2, 0x0102]);
        assert_eq!(asm.frames_completed(), 1);
    }

    #[test]
    fn test_next_line_starts_new_frame() {
        let asm = FrameAssembler::new();
        asm.set_lines(2).unwrap();
        let rx = asm.frame_stream();
        asm.start(1, 16).unwrap();

        for i in 0..3u32 {
            asm.add_line(&[i as u8, 0], i).unwrap();
        }
        let first = rx.try_recv().unwrap();
        assert_eq!(first.pixels(), &[0, 1]);
        // Third line opened frame two, which is still incomplete
        assert!(rx.try_recv().is_err());
        asm.add_line(&[9, 0], 3).unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(second.pixels(), &[2, 9]);
    }

    #[test]
    fn test_short_line_dropped_with_report() {
        let asm = FrameAssembler::new();
        let sink = Arc::new(CountingSink::default());
        asm.set_sink(sink.clone());
        asm.set_lines(2).unwrap();
        asm.start(2, 16).unwrap();

        let err = asm.add_line(&[1, 2, 3], 0).unwrap_err();
        assert!(matches!(
            err,
            Error::LineLengthMismatch {
                expected: 4,
                actual: 3
            }
        ));
        assert_eq!(sink.errors.load(Ordering::Relaxed), 1);
        // The bad line consumed no row
        asm.add_line(&[0, 0, 0, 0], 1).unwrap();
        assert!(asm.add_line(&[0, 0, 0, 0], 2).unwrap());
    }

    #[test]
    fn test_set_lines_rejected_while_running() {
        let asm = FrameAssembler::new();
        asm.start(4, 12).unwrap();
        assert!(matches!(asm.set_lines(512), Err(Error::FrameBusy)));
        asm.stop();
        asm.set_lines(512).unwrap();
        assert_eq!(asm.lines(), 512);
    }

    #[test]
    fn test_lines_ignored_when_idle() {
        let asm = FrameAssembler::new();
        assert!(!asm.add_line(&[0, 0], 0).unwrap());
    }
}
