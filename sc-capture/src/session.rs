//! Capture session controller
//!
//! Owns a backend and moves the producer capability into it on start and back
//! out on stop. Starting and stopping never touch buffer residency: frames
//! already queued stay queued, and checked-out frames stay checked out.

use crate::backend::{CaptureBackend, FrameSink, StartRejected};
use crate::display::{DisplayMode, SessionOptions};
use crate::error::CaptureError;
use sc_queue::{ConsumerHandle, FramePool, PoolMonitor, PoolStats, ProducerHandle};

enum SessionState {
    /// Stopped, holding the sink until the next start
    Idle(FrameSink),
    /// The backend holds the sink
    Running,
    /// A backend failure lost the sink; no further start is possible
    Faulted,
}

pub struct CaptureSession<B: CaptureBackend> {
    backend: B,
    state: SessionState,
    monitor: PoolMonitor,
}

impl<B: CaptureBackend> CaptureSession<B> {
    /// Query the backend's display mode, size a pool for it and return the
    /// session together with the consumer capability.
    pub fn open(backend: B, options: SessionOptions) -> Result<(Self, ConsumerHandle), CaptureError> {
        let mode = backend.display_mode()?;
        let config = mode.pool_config(options.format, options.frame_count);
        let (producer, consumer) = FramePool::create(config)?;

        log::info!(
            "Opened {} capture session at {}x{}@{}Hz",
            backend.name(),
            mode.width,
            mode.height,
            mode.refresh_hz
        );

        Ok((Self::with_producer(backend, producer), consumer))
    }

    /// Session over an existing pool
    pub fn with_producer(backend: B, producer: ProducerHandle) -> Self {
        let monitor = producer.monitor();
        Self {
            backend,
            state: SessionState::Idle(FrameSink::new(producer)),
            monitor,
        }
    }

    pub fn start(&mut self) -> Result<(), CaptureError> {
        let sink = match std::mem::replace(&mut self.state, SessionState::Running) {
            SessionState::Idle(sink) => sink,
            SessionState::Running => return Err(CaptureError::AlreadyRunning),
            SessionState::Faulted => {
                self.state = SessionState::Faulted;
                return Err(CaptureError::Faulted);
            }
        };

        match self.backend.start(sink) {
            Ok(()) => {
                log::info!("{} capture started", self.backend.name());
                Ok(())
            }
            Err(StartRejected { sink, error }) => {
                self.state = match sink {
                    Some(sink) => SessionState::Idle(sink),
                    None => SessionState::Faulted,
                };
                log::error!("{} capture failed to start: {}", self.backend.name(), error);
                Err(error)
            }
        }
    }

    /// Stop new publishes. Queued frames remain available to the consumer.
    pub fn stop(&mut self) -> Result<(), CaptureError> {
        if !self.is_running() {
            return Err(CaptureError::NotRunning);
        }

        match self.backend.stop() {
            Ok(sink) => {
                log::info!(
                    "{} capture stopped ({} callbacks skipped)",
                    self.backend.name(),
                    sink.skipped()
                );
                self.state = SessionState::Idle(sink);
                Ok(())
            }
            Err(err) => {
                log::error!("{} capture failed to stop: {}", self.backend.name(), err);
                self.state = SessionState::Faulted;
                Err(err)
            }
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, SessionState::Running)
    }

    pub fn display_mode(&self) -> Result<DisplayMode, CaptureError> {
        self.backend.display_mode()
    }

    pub fn stats(&self) -> PoolStats {
        self.monitor.stats()
    }

    pub fn monitor(&self) -> PoolMonitor {
        self.monitor.clone()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

impl<B: CaptureBackend> Drop for CaptureSession<B> {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
    }
}
