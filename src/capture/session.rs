//! Capture session: owns the frame pool and swap chain and runs the
//! per-frame delivery procedure

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use log::{debug, info};
use parking_lot::{Mutex, RwLock};

use crate::capture::mailbox::PendingFormat;
use crate::capture::presenter::FramePresenter;
use crate::capture::traits::{CaptureControl, CaptureItem, FramePool, GraphicsDevice};
use crate::error::{CaptureError, CaptureResult};
use crate::persistence::{
    Clock, FileSink, PersistenceSidecar, PersistenceSink, RecordOutcome, SystemClock,
};
use crate::types::{Frame, PixelFormat, SessionConfig, Size, BUFFER_COUNT};

/// What a single delivery did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDelivery {
    pub resized: bool,
    pub format_changed: bool,
    /// The frame pool was recreated at the new size/format
    pub recreated: bool,
    pub recorded: RecordOutcome,
}

/// Resources touched by the delivery thread
struct DeliveryState<D: GraphicsDevice> {
    presenter: FramePresenter<D::SwapChain>,
    frame_pool: D::FramePool,
    /// The swap chain changed shape but the frame pool has not followed yet
    pool_stale: bool,
}

/// Resources touched by control calls
struct Controls<D: GraphicsDevice> {
    session: D::Session,
    item: Arc<D::Item>,
}

/// Clears the delivering-thread marker when a delivery ends
struct DeliveryGuard<'a> {
    slot: &'a Mutex<Option<ThreadId>>,
}

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        *self.slot.lock() = None;
    }
}

/// Re-presents captured frames through a double-buffered swap chain and
/// optionally records them.
///
/// Frames arrive through [`CaptureSession::on_frame_arrived`] on the frame
/// pool's thread. Every other method may be called from any thread.
pub struct CaptureSession<D: GraphicsDevice> {
    device: Arc<D>,
    closed: AtomicBool,
    pending_format: PendingFormat,
    persistence: PersistenceSidecar,
    delivery: Mutex<Option<DeliveryState<D>>>,
    controls: RwLock<Option<Controls<D>>>,
    delivering_thread: Mutex<Option<ThreadId>>,
    /// Size and format the swap chain last took, readable without the
    /// delivery lock
    applied: RwLock<(Size, PixelFormat)>,
    frames_delivered: AtomicU64,
}

impl<D: GraphicsDevice> CaptureSession<D> {
    /// Create a session with default configuration
    pub fn new(device: Arc<D>, item: Arc<D::Item>, format: PixelFormat) -> CaptureResult<Arc<Self>> {
        CaptureSessionBuilder::new().build(device, item, format)
    }

    fn with_parts(
        device: Arc<D>,
        item: Arc<D::Item>,
        format: PixelFormat,
        config: SessionConfig,
        persistence: PersistenceSidecar,
    ) -> CaptureResult<Arc<Self>> {
        config.validate().map_err(CaptureError::InvalidConfiguration)?;

        let size = item.size()?;
        let swap_chain = device.create_swap_chain(size, format, BUFFER_COUNT)?;
        let frame_pool = device.create_frame_pool(format, BUFFER_COUNT, size)?;
        let session = device.create_capture_session(&frame_pool, &item)?;

        info!(
            "Capture session for '{}' at {} {}",
            item.display_name(),
            size,
            format
        );

        let capture = Arc::new(Self {
            device,
            closed: AtomicBool::new(false),
            pending_format: PendingFormat::new(),
            persistence,
            delivery: Mutex::new(Some(DeliveryState {
                presenter: FramePresenter::new(swap_chain, size, format, config.sync_interval),
                frame_pool,
                pool_stale: false,
            })),
            controls: RwLock::new(Some(Controls { session, item })),
            delivering_thread: Mutex::new(None),
            applied: RwLock::new((size, format)),
            frames_delivered: AtomicU64::new(0),
        });

        let weak: Weak<Self> = Arc::downgrade(&capture);
        let handler = Box::new(move |frame: Frame<D::Surface>| match weak.upgrade() {
            Some(capture) => capture.on_frame_arrived(frame).map(|_| ()),
            None => Err(CaptureError::ObjectClosed),
        });
        if let Some(state) = capture.delivery.lock().as_mut() {
            state.frame_pool.on_frame_arrived(handler)?;
        }

        Ok(capture)
    }

    fn check_closed(&self) -> CaptureResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(CaptureError::ObjectClosed)
        } else {
            Ok(())
        }
    }

    fn with_controls<T>(&self, f: impl FnOnce(&Controls<D>) -> CaptureResult<T>) -> CaptureResult<T> {
        self.check_closed()?;
        match self.controls.read().as_ref() {
            Some(controls) => f(controls),
            None => Err(CaptureError::ObjectClosed),
        }
    }


    /// Begin frame delivery
    pub fn start_capture(&self) -> CaptureResult<()> {
        self.with_controls(|controls| controls.session.start_capture())
    }

    /// Wrap the swap chain for display by `compositor`.
    ///
    /// Waits for an in-flight delivery to finish, so it must not be called
    /// from inside a frame handler.
    pub fn create_surface(&self, compositor: &D::Compositor) -> CaptureResult<D::CompositionSurface> {
        self.check_closed()?;
        match self.delivery.lock().as_ref() {
            Some(state) => self
                .device
                .create_composition_surface(compositor, state.presenter.swap_chain()),
            None => Err(CaptureError::ObjectClosed),
        }
    }

    pub fn capture_item(&self) -> CaptureResult<Arc<D::Item>> {
        self.with_controls(|controls| Ok(Arc::clone(&controls.item)))
    }

    pub fn is_cursor_capture_enabled(&self) -> CaptureResult<bool> {
        self.with_controls(|controls| controls.session.is_cursor_capture_enabled())
    }

    pub fn set_cursor_capture_enabled(&self, enabled: bool) -> CaptureResult<()> {
        self.with_controls(|controls| controls.session.set_cursor_capture_enabled(enabled))
    }

    pub fn is_border_required(&self) -> CaptureResult<bool> {
        self.with_controls(|controls| controls.session.is_border_required())
    }

    pub fn set_border_required(&self, required: bool) -> CaptureResult<()> {
        self.with_controls(|controls| controls.session.set_border_required(required))
    }

    /// Request a new pixel format. Takes effect after the next delivery
    /// presents; a newer request replaces an unconsumed older one.
    pub fn set_pixel_format(&self, format: PixelFormat) -> CaptureResult<()> {
        self.check_closed()?;
        if let Some(replaced) = self.pending_format.request(format) {
            debug!("Pixel format request {} replaced by {}", replaced, format);
        }
        Ok(())
    }

    /// Format the swap chain and frame pool currently use
    pub fn pixel_format(&self) -> CaptureResult<PixelFormat> {
        self.check_closed()?;
        Ok(self.applied.read().1)
    }

    /// Content size the swap chain was last sized to
    pub fn last_size(&self) -> CaptureResult<Size> {
        self.check_closed()?;
        Ok(self.applied.read().0)
    }

    pub fn is_snapshotting(&self) -> CaptureResult<bool> {
        self.check_closed()?;
        Ok(self.persistence.is_snapshotting())
    }

    pub fn set_snapshotting(&self, enabled: bool) -> CaptureResult<()> {
        self.check_closed()?;
        self.persistence.set_snapshotting(enabled);
        Ok(())
    }

    pub fn is_streaming(&self) -> CaptureResult<bool> {
        self.check_closed()?;
        Ok(self.persistence.is_streaming())
    }

    pub fn set_streaming(&self, enabled: bool) -> CaptureResult<()> {
        self.check_closed()?;
        self.persistence.set_streaming(enabled);
        Ok(())
    }

    pub fn persistence(&self) -> &PersistenceSidecar {
        &self.persistence
    }

    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Handle one delivered frame: resize, copy, record, present, apply a
    /// pending format, recreate the pool. A device error aborts the rest of
    /// the delivery and is returned to the frame source.
    pub fn on_frame_arrived(&self, frame: Frame<D::Surface>) -> CaptureResult<FrameDelivery> {
        self.check_closed()?;

        let mut delivery = self.delivery.lock();
        let state = delivery.as_mut().ok_or(CaptureError::ObjectClosed)?;

        // Only the lock holder may claim the marker
        *self.delivering_thread.lock() = Some(thread::current().id());
        let guard = DeliveryGuard {
            slot: &self.delivering_thread,
        };
        let result = self.deliver(state, frame);
        *self.applied.write() = (state.presenter.size(), state.presenter.format());

        // close() from inside this delivery left teardown to us
        if self.closed.load(Ordering::Acquire) {
            if let Some(state) = delivery.take() {
                Self::release(state);
            }
        }
        drop(guard);

        if result.is_ok() {
            self.frames_delivered.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    fn deliver(
        &self,
        state: &mut DeliveryState<D>,
        frame: Frame<D::Surface>,
    ) -> CaptureResult<FrameDelivery> {
        let mut resized = false;
        let current = state.presenter.size();
        if frame.content_size != current {
            debug!("Content size {} -> {}", current, frame.content_size);
            state
                .presenter
                .resize(frame.content_size, state.presenter.format())?;
            state.pool_stale = true;
            resized = true;
        }

        state
            .presenter
            .copy_frame(self.device.as_ref(), &frame.surface)?;

        let recorded = if self.persistence.is_active() {
            self.persistence.record(self.device.as_ref(), &frame.surface)
        } else {
            RecordOutcome::Idle
        };
        drop(frame);

        state.presenter.present()?;

        let mut format_changed = false;
        if let Some(format) = self.pending_format.take() {
            if format != state.presenter.format() {
                debug!("Pixel format {} -> {}", state.presenter.format(), format);
                if let Err(e) = state.presenter.resize(state.presenter.size(), format) {
                    // Retried on the next delivery unless a newer request arrived
                    self.pending_format.restore(format);
                    return Err(e);
                }
                state.pool_stale = true;
                format_changed = true;
            }
        }

        let recreated = state.pool_stale;
        if recreated {
            state.frame_pool.recreate(
                state.presenter.format(),
                BUFFER_COUNT,
                state.presenter.size(),
            )?;
            state.pool_stale = false;
        }

        Ok(FrameDelivery {
            resized,
            format_changed,
            recreated,
            recorded,
        })
    }

    fn release(mut state: DeliveryState<D>) {
        state.frame_pool.close();
        debug!("Released frame pool and swap chain");
    }

    /// Stop capture and release every resource. Only the first call does any
    /// work; later and concurrent calls return immediately.
    pub fn close(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        info!("Closing capture session");

        let controls = self.controls.write().take();
        if let Some(controls) = controls {
            controls.session.close();
        }

        // Inside a delivery the lock is already held by this thread
        let on_delivery_thread = *self.delivering_thread.lock() == Some(thread::current().id());
        if !on_delivery_thread {
            let state = self.delivery.lock().take();
            if let Some(state) = state {
                Self::release(state);
            }
        }

        self.persistence.shutdown();
    }
}

impl<D: GraphicsDevice> Drop for CaptureSession<D> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Builder for [`CaptureSession`]
pub struct CaptureSessionBuilder {
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn PersistenceSink>,
}

impl CaptureSessionBuilder {
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
            clock: Arc::new(SystemClock),
            sink: Arc::new(FileSink),
        }
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Directory for snapshots and streams
    pub fn save_directory(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.config.persistence.save_directory = dir.into();
        self
    }

    pub fn snapshot_interval(mut self, interval: std::time::Duration) -> Self {
        self.config.persistence.snapshot_interval = interval;
        self
    }

    pub fn stream_time_limit(mut self, limit: std::time::Duration) -> Self {
        self.config.persistence.stream_time_limit = limit;
        self
    }

    pub fn sync_interval(mut self, interval: u32) -> Self {
        self.config.sync_interval = interval;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn PersistenceSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Create the swap chain, frame pool and capture session, and subscribe
    /// to frame delivery
    pub fn build<D: GraphicsDevice>(
        self,
        device: Arc<D>,
        item: Arc<D::Item>,
        format: PixelFormat,
    ) -> CaptureResult<Arc<CaptureSession<D>>> {
        let persistence =
            PersistenceSidecar::new(self.config.persistence.clone(), self.clock, self.sink);
        CaptureSession::with_parts(device, item, format, self.config, persistence)
    }
}

impl Default for CaptureSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}
