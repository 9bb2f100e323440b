//! Test-pattern capture backend
//!
//! Produces frames on its own thread at a fixed rate, the way a platform
//! display stream calls back on an OS-managed thread. Each frame starts with a
//! [`PatternStamp`] followed by a moving gradient.

use crate::backend::{CaptureBackend, FrameSink, SinkOutcome, StartRejected};
use crate::display::DisplayMode;
use crate::error::CaptureError;
use bytemuck::{Pod, Zeroable};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Header written at the start of every synthetic frame
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct PatternStamp {
    pub frame: u64,
    pub width: u32,
    pub height: u32,
}

impl PatternStamp {
    pub const SIZE: usize = std::mem::size_of::<PatternStamp>();

    /// Stamp at the start of a frame, `None` if the frame is too short
    pub fn read(frame: &[u8]) -> Option<Self> {
        frame
            .get(..Self::SIZE)
            .map(bytemuck::pod_read_unaligned::<PatternStamp>)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SyntheticConfig {
    pub mode: DisplayMode,
    /// Frames per second; 0 produces as fast as possible
    pub fps: u32,
    /// Pin the stream thread to this core id
    pub pin_core: Option<usize>,
    /// Stop producing after this many frames (the stream stays up)
    pub frame_limit: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            mode: DisplayMode::new(1280, 720, 60),
            fps: 60,
            pin_core: None,
            frame_limit: None,
        }
    }
}

pub struct SyntheticBackend {
    config: SyntheticConfig,
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<FrameSink>>,
}

impl SyntheticBackend {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            stop_tx: None,
            thread: None,
        }
    }

    fn frame_interval(&self) -> Duration {
        if self.config.fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(1_000_000_000 / self.config.fps as u64)
        }
    }
}

fn pin_current_thread(core: usize) {
    let target = core_affinity::get_core_ids()
        .and_then(|ids| ids.into_iter().find(|id| id.id == core));

    match target {
        Some(id) if core_affinity::set_for_current(id) => {
            log::info!("Synthetic capture thread pinned to core {}", core);
        }
        _ => log::warn!("Could not pin synthetic capture thread to core {}", core),
    }
}

/// Stamp plus a diagonal gradient that shifts by one pixel per frame
fn render_pattern(slot: &mut [u8], mode: DisplayMode, frame: u64) {
    let components = slot.len() / (mode.width as usize * mode.height as usize).max(1);
    let shift = frame as usize;

    for (i, pixel) in slot.chunks_exact_mut(components.max(1)).enumerate() {
        let x = i % mode.width as usize;
        let y = i / mode.width as usize;
        pixel.fill((x + y + shift) as u8);
    }

    let stamp = PatternStamp {
        frame,
        width: mode.width,
        height: mode.height,
    };
    if let Some(head) = slot.get_mut(..PatternStamp::SIZE) {
        head.copy_from_slice(bytemuck::bytes_of(&stamp));
    }
}

/// Wait out one frame interval, true once a stop was requested. With nothing
/// left to produce, block until the stop arrives.
fn wait_for_stop(stop_rx: &Receiver<()>, interval: Duration, exhausted: bool) -> bool {
    if exhausted {
        let _ = stop_rx.recv();
        return true;
    }

    match stop_rx.recv_timeout(interval) {
        Err(RecvTimeoutError::Timeout) => false,
        Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
    }
}

impl CaptureBackend for SyntheticBackend {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn display_mode(&self) -> Result<DisplayMode, CaptureError> {
        Ok(self.config.mode)
    }

    fn start(&mut self, mut sink: FrameSink) -> Result<(), StartRejected> {
        if self.thread.is_some() {
            return Err(StartRejected {
                sink: Some(sink),
                error: CaptureError::AlreadyRunning,
            });
        }

        let (stop_tx, stop_rx) = channel::bounded::<()>(1);
        let interval = self.frame_interval();
        let SyntheticConfig {
            mode,
            pin_core,
            frame_limit,
            ..
        } = self.config;

        let spawned = thread::Builder::new()
            .name("sc-synthetic-capture".to_string())
            .spawn(move || {
                if let Some(core) = pin_core {
                    pin_current_thread(core);
                }

                let len = sink.frame_bytes();
                let mut frame = 0u64;
                let mut dropped = 0u64;

                loop {
                    let exhausted = frame_limit.map_or(false, |limit| frame >= limit);
                    if !exhausted {
                        // Stream clock: frame index scaled to the nominal interval
                        let timestamp = frame * interval.as_nanos() as u64;
                        let outcome = sink.fill_frame(len, Some(timestamp), |slot| {
                            render_pattern(slot, mode, frame)
                        });
                        if let SinkOutcome::Dropped(_) = outcome {
                            dropped += 1;
                        }
                        frame += 1;
                    }

                    if wait_for_stop(&stop_rx, interval, exhausted) {
                        break;
                    }
                }

                log::info!(
                    "Synthetic capture thread exiting after {} frames ({} dropped)",
                    frame,
                    dropped
                );
                sink
            });

        match spawned {
            Ok(handle) => {
                self.stop_tx = Some(stop_tx);
                self.thread = Some(handle);
                Ok(())
            }
            // The closure, and the sink with it, is gone
            Err(err) => Err(StartRejected {
                sink: None,
                error: CaptureError::backend("synthetic", err.to_string()),
            }),
        }
    }

    fn stop(&mut self) -> Result<FrameSink, CaptureError> {
        let handle = self.thread.take().ok_or(CaptureError::NotRunning)?;
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.try_send(());
        }

        handle
            .join()
            .map_err(|_| CaptureError::backend("synthetic", "capture thread panicked"))
    }
}

impl Drop for SyntheticBackend {
    fn drop(&mut self) {
        if self.thread.is_some() {
            let _ = self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::SessionOptions;
    use crate::session::CaptureSession;
    use std::time::Instant;

    fn small_config(fps: u32, frame_limit: Option<u64>) -> SyntheticConfig {
        SyntheticConfig {
            mode: DisplayMode::new(16, 8, 60),
            fps,
            pin_core: None,
            frame_limit,
        }
    }

    #[test]
    fn test_pattern_stamp() {
        let mode = DisplayMode::new(8, 4, 60);
        let mut frame = vec![0u8; 8 * 4 * 4];
        render_pattern(&mut frame, mode, 9);

        let stamp = PatternStamp::read(&frame).unwrap();
        assert_eq!(stamp, PatternStamp { frame: 9, width: 8, height: 4 });
        // Past the stamp, pixel (x, y) holds x + y + frame
        let pixel = 5; // x = 5, y = 0
        assert_eq!(&frame[pixel * 4..pixel * 4 + 4], &[14; 4]);
        assert!(PatternStamp::read(&frame[..4]).is_none());
    }

    #[test]
    fn test_exhausted_stream_blocks_until_stop() {
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);
        assert!(!wait_for_stop(&stop_rx, Duration::ZERO, false));

        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            stop_tx.send(()).unwrap();
        });

        // Zero interval, but no spinning once the limit is reached
        let started = Instant::now();
        assert!(wait_for_stop(&stop_rx, Duration::ZERO, true));
        assert!(started.elapsed() >= Duration::from_millis(40));
        stopper.join().unwrap();
    }

    #[test]
    fn test_frames_arrive_in_order() {
        let backend = SyntheticBackend::new(small_config(0, Some(20)));
        let (mut session, mut consumer) = CaptureSession::open(backend, SessionOptions::default()).unwrap();
        session.start().unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        let mut frames = Vec::new();
        while Instant::now() < deadline {
            let stats = session.stats();
            match consumer.acquire_next() {
                Some(frame) => {
                    let stamp = PatternStamp::read(frame.data()).unwrap();
                    assert_eq!((stamp.width, stamp.height), (16, 8));
                    frames.push(stamp.frame);
                    frame.release();
                }
                None if stats.published + stats.dropped() == 20 && stats.ready == 0 => break,
                None => thread::yield_now(),
            }
        }
        session.stop().unwrap();

        let stats = session.stats();
        assert_eq!(stats.published + stats.dropped(), 20);
        assert_eq!(frames.len() as u64, stats.published);
        assert!(frames.windows(2).all(|w| w[0] < w[1]), "out of order: {:?}", frames);
    }

    #[test]
    fn test_stop_is_prompt_and_restartable() {
        let backend = SyntheticBackend::new(small_config(1, None));
        let (mut session, _consumer) = CaptureSession::open(backend, SessionOptions::default()).unwrap();

        session.start().unwrap();
        let started = Instant::now();
        session.stop().unwrap();
        assert!(started.elapsed() < Duration::from_millis(900));

        session.start().unwrap();
        session.stop().unwrap();
        assert!(session.stats().published >= 1);
    }

    #[test]
    fn test_unconsumed_stream_drops_instead_of_blocking() {
        let backend = SyntheticBackend::new(small_config(0, Some(50)));
        let (mut session, _consumer) = CaptureSession::open(backend, SessionOptions::default()).unwrap();
        session.start().unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while session.stats().published + session.stats().dropped() < 50 && Instant::now() < deadline {
            thread::yield_now();
        }
        session.stop().unwrap();

        let stats = session.stats();
        assert_eq!(stats.published, 5);
        assert_eq!(stats.dropped_exhausted, 45);
        assert_eq!(stats.ready, 5);
    }
}
