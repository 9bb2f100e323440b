//! Screen Capture FFI - C Foreign Function Interface
//!
//! C-compatible API over the capture session and the frame queue. The
//! platform layer supplies start/stop callbacks and feeds frames through
//! [`sc_on_frame_available`] from its stream thread; the application polls
//! [`sc_acquire_next_frame`] / [`sc_release_frame`] from its render loop.

use libc::{c_char, c_int, c_void, size_t};
use parking_lot::Mutex;
use sc_capture::{
    CaptureBackend, CaptureError, CaptureSession, DisplayMode, FrameSink, FrameStatus,
    SinkOutcome, StartRejected,
};
use sc_queue::{
    ConsumerHandle, FramePool, FrameTicket, PoolConfig, PoolMonitor, DEFAULT_FRAME_COUNT,
};
use std::ptr;

/// Opaque handle to a capture queue (C-compatible)
pub struct ScCaptureQueue {
    _private: [u8; 0],
}

/// Opaque producer handle passed to the platform start callback (C-compatible)
pub struct ScProducer {
    _private: [u8; 0],
}

/// Capture geometry. `frame_count` 0 selects the default of 5.
#[repr(C)]
pub struct ScConfig {
    pub width: u32,
    pub height: u32,
    pub pixel_components: u32,
    pub frame_count: u32,
    pub refresh_hz: u32,
}

/// A checked-out frame. `data` stays valid until the frame is released.
#[repr(C)]
pub struct ScFrame {
    pub data: *const u8,
    pub data_size: size_t,
    pub slot: u32,
    pub sequence: u64,
    /// Platform timestamp, 0 when the platform supplied none
    pub capture_time: u64,
}

#[repr(C)]
pub struct ScStats {
    pub capacity: u32,
    pub free: u32,
    pub filling: u32,
    pub ready: u32,
    pub checked_out: u32,
    pub published: u64,
    pub released: u64,
    pub dropped_exhausted: u64,
    pub dropped_overflow: u64,
}

/// Starts the platform stream. Returns non-zero on success; from then on the
/// platform may call `sc_on_frame_available` with `producer`.
pub type ScStartFn = unsafe extern "C" fn(user_data: *mut c_void, producer: *mut ScProducer) -> c_int;

/// Stops the platform stream. Returns non-zero once no further
/// `sc_on_frame_available` call can happen.
pub type ScStopFn = unsafe extern "C" fn(user_data: *mut c_void) -> c_int;

#[repr(C)]
pub struct ScPlatformCallbacks {
    pub user_data: *mut c_void,
    pub start: Option<ScStartFn>,
    pub stop: Option<ScStopFn>,
}

// ============================================================================
// PLATFORM BACKEND
// ============================================================================

/// Backend whose stream lives on the C side
struct ForeignBackend {
    mode: DisplayMode,
    user_data: *mut c_void,
    start: Option<ScStartFn>,
    stop: Option<ScStopFn>,
    running: *mut FrameSink,
}

// SAFETY: the C side promises its callbacks may be invoked from any thread;
// `running` is only reclaimed after the platform confirms its stream stopped.
unsafe impl Send for ForeignBackend {}

impl CaptureBackend for ForeignBackend {
    fn name(&self) -> &str {
        "platform"
    }

    fn display_mode(&self) -> Result<DisplayMode, CaptureError> {
        Ok(self.mode)
    }

    fn start(&mut self, sink: FrameSink) -> Result<(), StartRejected> {
        let Some(start) = self.start else {
            return Err(StartRejected {
                sink: Some(sink),
                error: CaptureError::backend("platform", "no start callback"),
            });
        };

        let raw = Box::into_raw(Box::new(sink));
        if unsafe { start(self.user_data, raw as *mut ScProducer) } == 0 {
            // SAFETY: the platform refused, so it holds no copy of `raw`.
            let sink = unsafe { Box::from_raw(raw) };
            return Err(StartRejected {
                sink: Some(*sink),
                error: CaptureError::backend("platform", "start callback failed"),
            });
        }

        self.running = raw;
        Ok(())
    }

    fn stop(&mut self) -> Result<FrameSink, CaptureError> {
        if self.running.is_null() {
            return Err(CaptureError::NotRunning);
        }

        if let Some(stop) = self.stop {
            if unsafe { stop(self.user_data) } == 0 {
                // Stream may still call back: the sink has to stay where it is
                self.running = ptr::null_mut();
                return Err(CaptureError::backend("platform", "stop callback failed"));
            }
        }

        let raw = std::mem::replace(&mut self.running, ptr::null_mut());
        // SAFETY: the stream has stopped; nothing else references `raw`.
        Ok(*unsafe { Box::from_raw(raw) })
    }
}

struct CaptureQueue {
    /// Held across the platform start/stop callbacks
    session: Mutex<CaptureSession<ForeignBackend>>,
    consumer: Mutex<ConsumerHandle>,
    monitor: PoolMonitor,
}

// ============================================================================
// QUEUE LIFECYCLE
// ============================================================================

/// Allocate the frame pool and bind the platform callbacks.
///
/// Returns null on invalid arguments or allocation failure.
///
/// # Safety
/// `config` and `callbacks` must be valid pointers. `callbacks.user_data`
/// must outlive the returned queue.
#[no_mangle]
pub unsafe extern "C" fn sc_allocate(
    config: *const ScConfig,
    callbacks: *const ScPlatformCallbacks,
) -> *mut ScCaptureQueue {
    if config.is_null() || callbacks.is_null() {
        return ptr::null_mut();
    }
    let config = &*config;
    let callbacks = &*callbacks;

    let frame_count = match config.frame_count {
        0 => DEFAULT_FRAME_COUNT,
        n => n as usize,
    };
    let pool_config = PoolConfig::new(config.width, config.height, config.pixel_components)
        .with_frame_count(frame_count);

    let (producer, consumer) = match FramePool::create(pool_config) {
        Ok(handles) => handles,
        Err(err) => {
            log::error!("sc_allocate: {}", err);
            return ptr::null_mut();
        }
    };

    let backend = ForeignBackend {
        mode: DisplayMode::new(config.width, config.height, config.refresh_hz),
        user_data: callbacks.user_data,
        start: callbacks.start,
        stop: callbacks.stop,
        running: ptr::null_mut(),
    };

    let monitor = consumer.monitor();
    let queue = Box::new(CaptureQueue {
        session: Mutex::new(CaptureSession::with_producer(backend, producer)),
        consumer: Mutex::new(consumer),
        monitor,
    });
    Box::into_raw(queue) as *mut ScCaptureQueue
}

/// Stop capture if running and free the queue.
///
/// # Safety
/// `ptr` must come from `sc_allocate` and not be freed already. No frame may
/// still be checked out, and no other thread may use the queue.
#[no_mangle]
pub unsafe extern "C" fn sc_free(ptr: *mut ScCaptureQueue) {
    if !ptr.is_null() {
        let _ = Box::from_raw(ptr as *mut CaptureQueue);
    }
}

/// Start the platform stream. Returns 1 on success.
///
/// # Safety
/// `ptr` must be a valid queue.
#[no_mangle]
pub unsafe extern "C" fn sc_start_capture(ptr: *mut ScCaptureQueue) -> c_int {
    if ptr.is_null() {
        return 0;
    }
    let queue = &*(ptr as *const CaptureQueue);

    match queue.session.lock().start() {
        Ok(()) => 1,
        Err(err) => {
            log::error!("sc_start_capture: {}", err);
            0
        }
    }
}

/// Stop the platform stream. Queued frames stay available. Returns 1 on success.
///
/// # Safety
/// `ptr` must be a valid queue.
#[no_mangle]
pub unsafe extern "C" fn sc_stop_capture(ptr: *mut ScCaptureQueue) -> c_int {
    if ptr.is_null() {
        return 0;
    }
    let queue = &*(ptr as *const CaptureQueue);

    match queue.session.lock().stop() {
        Ok(()) => 1,
        Err(err) => {
            log::error!("sc_stop_capture: {}", err);
            0
        }
    }
}

// ============================================================================
// PRODUCER API (platform stream thread)
// ============================================================================

/// Offer one stream callback's pixels. Returns 1 if the frame was queued,
/// 0 if it was skipped or dropped.
///
/// `status` is 0 for a complete frame; anything else is skipped. `timestamp`
/// 0 means none.
///
/// # Safety
/// `producer` must be the pointer given to the start callback, used from one
/// thread at a time, and only between a successful start and stop. `data`
/// must point to `byte_count` readable bytes, or be null.
#[no_mangle]
pub unsafe extern "C" fn sc_on_frame_available(
    producer: *mut ScProducer,
    status: u32,
    data: *const u8,
    byte_count: size_t,
    timestamp: u64,
) -> c_int {
    if producer.is_null() {
        return 0;
    }
    let sink = &mut *(producer as *mut FrameSink);

    let Some(status) = FrameStatus::from_raw(status) else {
        log::error!("sc_on_frame_available: unknown status {}", status);
        return 0;
    };
    let pixels = if data.is_null() {
        None
    } else {
        Some(std::slice::from_raw_parts(data, byte_count))
    };
    let timestamp = if timestamp == 0 { None } else { Some(timestamp) };

    match sink.on_frame_available(status, pixels, timestamp) {
        SinkOutcome::Published(_) => 1,
        SinkOutcome::Skipped | SinkOutcome::Dropped(_) => 0,
    }
}

// ============================================================================
// CONSUMER API (application thread)
// ============================================================================

/// Peek at the oldest captured frame. Returns 1 and fills `frame_out` if one
/// is ready; repeated calls return the same frame until it is released.
///
/// # Safety
/// `ptr` must be a valid queue and `frame_out` a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn sc_acquire_next_frame(
    ptr: *mut ScCaptureQueue,
    frame_out: *mut ScFrame,
) -> c_int {
    if ptr.is_null() || frame_out.is_null() {
        return 0;
    }
    let queue = &*(ptr as *const CaptureQueue);

    let Some(mut consumer) = queue.consumer.try_lock() else {
        log::error!("sc_acquire_next_frame: called from two threads at once");
        return 0;
    };

    let Some(ticket) = consumer.acquire_ticket() else {
        return 0;
    };
    let (payload, meta) = match (consumer.ticket_payload(&ticket), consumer.ticket_meta(&ticket)) {
        (Ok(payload), Ok(meta)) => (payload, meta),
        _ => return 0,
    };

    *frame_out = ScFrame {
        data: payload.as_ptr(),
        data_size: payload.len(),
        slot: ticket.slot,
        sequence: ticket.sequence,
        capture_time: meta.capture_time.unwrap_or(0),
    };
    1
}

/// Release a frame obtained from `sc_acquire_next_frame`. Returns 1 on
/// success, 0 if the frame is not the one currently checked out (for
/// example, a second release of the same frame).
///
/// # Safety
/// `ptr` must be a valid queue and `frame` a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn sc_release_frame(ptr: *mut ScCaptureQueue, frame: *const ScFrame) -> c_int {
    if ptr.is_null() || frame.is_null() {
        return 0;
    }
    let queue = &*(ptr as *const CaptureQueue);

    let Some(mut consumer) = queue.consumer.try_lock() else {
        log::error!("sc_release_frame: called from two threads at once");
        return 0;
    };

    let ticket = FrameTicket::new((*frame).slot, (*frame).sequence);
    match consumer.release_ticket(ticket) {
        Ok(()) => 1,
        Err(err) => {
            log::error!("sc_release_frame: {}", err);
            0
        }
    }
}

/// Snapshot of pool residency and drop counters. Takes no lock, so it may be
/// called from any thread, including from inside the platform callbacks.
///
/// # Safety
/// `ptr` must be a valid queue and `stats_out` a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn sc_get_stats(ptr: *const ScCaptureQueue, stats_out: *mut ScStats) -> c_int {
    if ptr.is_null() || stats_out.is_null() {
        return 0;
    }
    let queue = &*(ptr as *const CaptureQueue);
    let stats = queue.monitor.stats();

    *stats_out = ScStats {
        capacity: stats.capacity as u32,
        free: stats.free as u32,
        filling: stats.filling as u32,
        ready: stats.ready as u32,
        checked_out: stats.checked_out as u32,
        published: stats.published,
        released: stats.released,
        dropped_exhausted: stats.dropped_exhausted,
        dropped_overflow: stats.dropped_overflow,
    };
    1
}

/// Library version string
#[no_mangle]
pub extern "C" fn sc_version() -> *const c_char {
    "0.1.0\0".as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;

    /// Stand-in for the platform capture layer
    struct Platform {
        producer: *mut ScProducer,
        starts: u32,
        stops: u32,
        refuse_start: bool,
        /// Queue to sample from inside the stop callback
        queue: *mut ScCaptureQueue,
        published_at_stop: Option<u64>,
    }

    unsafe extern "C" fn platform_start(user_data: *mut c_void, producer: *mut ScProducer) -> c_int {
        let platform = &mut *(user_data as *mut Platform);
        if platform.refuse_start {
            return 0;
        }
        platform.producer = producer;
        platform.starts += 1;
        1
    }

    unsafe extern "C" fn platform_stop(user_data: *mut c_void) -> c_int {
        let platform = &mut *(user_data as *mut Platform);
        platform.producer = ptr::null_mut();
        platform.stops += 1;
        if !platform.queue.is_null() {
            let mut stats: ScStats = std::mem::zeroed();
            if sc_get_stats(platform.queue, &mut stats) == 1 {
                platform.published_at_stop = Some(stats.published);
            }
        }
        1
    }

    fn empty_frame() -> ScFrame {
        ScFrame {
            data: ptr::null(),
            data_size: 0,
            slot: 0,
            sequence: 0,
            capture_time: 0,
        }
    }

    unsafe fn setup(platform: *mut Platform, frame_count: u32) -> *mut ScCaptureQueue {
        let config = ScConfig {
            width: 4,
            height: 2,
            pixel_components: 4,
            frame_count,
            refresh_hz: 60,
        };
        let callbacks = ScPlatformCallbacks {
            user_data: platform as *mut c_void,
            start: Some(platform_start),
            stop: Some(platform_stop),
        };
        sc_allocate(&config, &callbacks)
    }

    fn new_platform() -> Box<Platform> {
        Box::new(Platform {
            producer: ptr::null_mut(),
            starts: 0,
            stops: 0,
            refuse_start: false,
            queue: ptr::null_mut(),
            published_at_stop: None,
        })
    }

    #[test]
    fn test_capture_round_trip() {
        unsafe {
            let platform = Box::into_raw(new_platform());
            let queue = setup(platform, 0);
            assert!(!queue.is_null());

            assert_eq!(sc_start_capture(queue), 1);
            assert_eq!((*platform).starts, 1);

            let pixels = [9u8; 32];
            let producer = (*platform).producer;
            assert_eq!(sc_on_frame_available(producer, 0, pixels.as_ptr(), 32, 1234), 1);

            let mut frame = empty_frame();
            assert_eq!(sc_acquire_next_frame(queue, &mut frame), 1);
            assert_eq!(frame.data_size, 32);
            assert_eq!(std::slice::from_raw_parts(frame.data, frame.data_size), &pixels);
            assert_eq!(frame.capture_time, 1234);
            assert_eq!(frame.sequence, 0);

            assert_eq!(sc_release_frame(queue, &frame), 1);
            assert_eq!(sc_release_frame(queue, &frame), 0, "double release must be rejected");

            assert_eq!(sc_stop_capture(queue), 1);
            assert_eq!((*platform).stops, 1);
            assert!((*platform).producer.is_null());

            let mut stats: ScStats = std::mem::zeroed();
            assert_eq!(sc_get_stats(queue, &mut stats), 1);
            assert_eq!(stats.capacity, 5);
            assert_eq!(stats.free, 5);
            assert_eq!(stats.published, 1);
            assert_eq!(stats.released, 1);

            sc_free(queue);
            drop(Box::from_raw(platform));
        }
    }

    #[test]
    fn test_skips_and_drops() {
        unsafe {
            let platform = Box::into_raw(new_platform());
            let queue = setup(platform, 1);
            assert_eq!(sc_start_capture(queue), 1);
            let producer = (*platform).producer;

            let pixels = [1u8; 64];
            // Idle status, null data, oversized payload
            assert_eq!(sc_on_frame_available(producer, 1, pixels.as_ptr(), 32, 0), 0);
            assert_eq!(sc_on_frame_available(producer, 0, ptr::null(), 32, 0), 0);
            assert_eq!(sc_on_frame_available(producer, 0, pixels.as_ptr(), 64, 0), 0);
            assert_eq!(sc_on_frame_available(producer, 42, pixels.as_ptr(), 32, 0), 0);
            // Pool of one: second complete frame is dropped
            assert_eq!(sc_on_frame_available(producer, 0, pixels.as_ptr(), 32, 0), 1);
            assert_eq!(sc_on_frame_available(producer, 0, pixels.as_ptr(), 32, 0), 0);

            let mut stats: ScStats = std::mem::zeroed();
            sc_get_stats(queue, &mut stats);
            assert_eq!(stats.dropped_overflow, 1);
            assert_eq!(stats.dropped_exhausted, 1);
            assert_eq!(stats.ready, 1);

            // Freeing while running stops the platform stream first
            sc_free(queue);
            assert_eq!((*platform).stops, 1);
            drop(Box::from_raw(platform));
        }
    }

    #[test]
    fn test_stats_readable_inside_stop_callback() {
        unsafe {
            let platform = Box::into_raw(new_platform());
            let queue = setup(platform, 0);
            (*platform).queue = queue;

            assert_eq!(sc_start_capture(queue), 1);
            let pixels = [5u8; 32];
            assert_eq!(sc_on_frame_available((*platform).producer, 0, pixels.as_ptr(), 32, 0), 1);

            // The session lock is held for the whole stop callback
            assert_eq!(sc_stop_capture(queue), 1);
            assert_eq!((*platform).published_at_stop, Some(1));

            (*platform).queue = ptr::null_mut();
            sc_free(queue);
            drop(Box::from_raw(platform));
        }
    }

    #[test]
    fn test_refused_start() {
        unsafe {
            let platform = Box::into_raw(new_platform());
            (*platform).refuse_start = true;
            let queue = setup(platform, 0);

            assert_eq!(sc_start_capture(queue), 0);
            assert_eq!(sc_stop_capture(queue), 0);

            (*platform).refuse_start = false;
            assert_eq!(sc_start_capture(queue), 1);

            sc_free(queue);
            drop(Box::from_raw(platform));
        }
    }

    #[test]
    fn test_invalid_arguments() {
        unsafe {
            let config = ScConfig {
                width: 0,
                height: 2,
                pixel_components: 4,
                frame_count: 0,
                refresh_hz: 60,
            };
            let callbacks = ScPlatformCallbacks {
                user_data: ptr::null_mut(),
                start: None,
                stop: None,
            };
            assert!(sc_allocate(&config, &callbacks).is_null());
            assert!(sc_allocate(ptr::null(), &callbacks).is_null());

            let mut frame = empty_frame();
            assert_eq!(sc_acquire_next_frame(ptr::null_mut(), &mut frame), 0);
            assert_eq!(sc_release_frame(ptr::null_mut(), &frame), 0);
            assert_eq!(sc_on_frame_available(ptr::null_mut(), 0, ptr::null(), 0, 0), 0);
        }
    }

    #[test]
    fn test_version() {
        unsafe {
            let version = sc_version();
            assert!(!version.is_null());

            let version_str = CStr::from_ptr(version).to_str().unwrap();
            assert_eq!(version_str, "0.1.0");
        }
    }
}
