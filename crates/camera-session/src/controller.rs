//! Camera session lifecycle owned by a single actor thread.
//!
//! Commands from the UI side and completions from the hardware are both turned
//! into [`Message`]s on one mailbox, so every state mutation happens on the
//! actor thread. The [`CaptureSession`] handle only exposes the readiness,
//! in-flight and flash flags across threads.

use std::{
    fmt, io,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU8, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    hardware::{CameraHardware, HardwareEvent, HardwareSink, SurfaceInfo},
    permit::{OpenClosePermit, PERMIT_TIMEOUT, PermitGuard},
    request::{
        CaptureRequestSpec, DeviceHandle, ReaderHandle, STILL_JPEG_QUALITY, SessionHandle,
        SurfaceTarget,
    },
    size::{DEFAULT_PREVIEW_SIZE, MAX_PREVIEW_SIZE, choose_optimal_size},
    types::{CameraDescriptor, DeviceErrorCode, Facing, FrameBuffer, HardwareError, Size},
};

/// Consecutive transient open failures tolerated before giving up.
pub const MAX_RETRY_ATTEMPTS: u32 = 3;
/// Delay between open attempts.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Closed = 0,
    Opening = 1,
    Opened = 2,
    Closing = 3,
    Error = 4,
}

impl SessionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => SessionState::Opening,
            2 => SessionState::Opened,
            3 => SessionState::Closing,
            4 => SessionState::Error,
            _ => SessionState::Closed,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SessionState::Closed => "closed",
            SessionState::Opening => "opening",
            SessionState::Opened => "opened",
            SessionState::Closing => "closing",
            SessionState::Error => "error",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Attempt counter for transient open failures.
#[derive(Clone, Debug)]
pub struct RetryBudget {
    attempts: u32,
    max_attempts: u32,
    backoff: Duration,
}

impl RetryBudget {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts: 0,
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Count one failure and report whether the budget is now spent.
    pub fn record_failure(&mut self) -> bool {
        self.attempts = self.attempts.saturating_add(1);
        self.is_exhausted()
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }
}

/// Tunables for one controller instance.
#[derive(Clone, Debug)]
pub struct ControllerSettings {
    pub max_retry_attempts: u32,
    pub retry_backoff: Duration,
    pub permit_timeout: Duration,
    pub preferred_facing: Facing,
    pub max_preview: Size,
    pub jpeg_quality: u8,
    /// Flash directive in effect before the first light sample arrives.
    pub initial_flash: bool,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            max_retry_attempts: MAX_RETRY_ATTEMPTS,
            retry_backoff: RETRY_BACKOFF,
            permit_timeout: PERMIT_TIMEOUT,
            preferred_facing: Facing::Back,
            max_preview: MAX_PREVIEW_SIZE,
            jpeg_quality: STILL_JPEG_QUALITY,
            initial_flash: true,
        }
    }
}

/// Why an open attempt did not produce a device.
#[derive(Debug, Error)]
pub enum OpenFailure {
    #[error("timed out waiting to lock camera opening")]
    PermitTimeout,
    #[error("no cameras available on this device")]
    NoCamera,
    #[error(transparent)]
    Hardware(#[from] HardwareError),
    #[error("{0}")]
    Device(DeviceErrorCode),
}

impl OpenFailure {
    pub fn is_transient(&self) -> bool {
        match self {
            OpenFailure::PermitTimeout => true,
            OpenFailure::NoCamera => false,
            OpenFailure::Hardware(err) => err.is_transient(),
            OpenFailure::Device(code) => code.is_transient(),
        }
    }
}

/// Failures that park the controller in [`SessionState::Error`].
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("failed to open camera after {attempts} attempts")]
    RetryExhausted { attempts: u32 },
    #[error("camera cannot be opened: {0}")]
    Open(OpenFailure),
    #[error("unrecoverable camera error: {0}")]
    Device(DeviceErrorCode),
}

/// Failure of a single request; the session stays usable.
#[derive(Debug, Error)]
pub enum OperationError {
    #[error("display surface is not valid")]
    InvalidSurface,
    #[error("failed to create capture reader: {0}")]
    Reader(HardwareError),
    #[error("failed to configure camera: {0}")]
    Configure(HardwareError),
    #[error("camera capture session configuration failed")]
    ConfigureFailed,
    #[error("failed to start camera preview: {0}")]
    Preview(HardwareError),
    #[error("failed to update flash mode: {0}")]
    Flash(HardwareError),
    #[error("capture rejected: {0}")]
    CaptureRejected(CaptureRejected),
    #[error("failed to capture image: {0}")]
    CaptureFailed(String),
}

/// Everything the controller reports as an error event.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("camera open failed (attempt {attempt}/{max}), retrying: {cause}")]
    Transient {
        attempt: u32,
        max: u32,
        cause: OpenFailure,
    },
    #[error(transparent)]
    Fatal(FatalError),
    #[error(transparent)]
    Operation(OperationError),
}

/// Reasons a capture request is refused before reaching the hardware.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum CaptureRejected {
    #[error("camera not ready yet")]
    NotReady,
    #[error("processing previous capture")]
    InFlight,
    #[error("camera session has stopped")]
    Stopped,
}

/// Notifications produced by the controller, in order.
#[derive(Debug)]
pub enum SessionEvent {
    State(SessionState),
    PreviewStarted { size: Size },
    Frame(CapturedFrame),
    Error(SessionError),
}

#[derive(Debug, Default)]
struct SharedFlags {
    ready: AtomicBool,
    capturing: AtomicBool,
    flash: AtomicBool,
    state: AtomicU8,
}

/// Marks one capture as in flight; the mark is cleared when the ticket drops.
pub struct CaptureTicket {
    flags: Arc<SharedFlags>,
}

impl fmt::Debug for CaptureTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureTicket").finish_non_exhaustive()
    }
}

impl Drop for CaptureTicket {
    fn drop(&mut self) {
        self.flags.capturing.store(false, Ordering::SeqCst);
    }
}

/// Still frame produced by a capture request.
///
/// The capture stays "in flight" until this value (or its ticket) is dropped,
/// so holding it across detection keeps further captures out.
#[derive(Debug)]
pub struct CapturedFrame {
    pub frame: FrameBuffer,
    /// Flash directive the request was submitted with.
    pub flash_used: bool,
    pub ticket: CaptureTicket,
}

pub(crate) enum Command {
    Open,
    Close,
    Capture(CaptureTicket),
    SetFlash(bool),
    SurfaceChanged(SurfaceInfo),
    Shutdown,
}

pub(crate) enum Message {
    Command(Command),
    Hardware { epoch: u64, event: HardwareEvent },
}

/// Cross-thread handle to a running controller.
///
/// Dropping the handle shuts the controller down and releases every hardware
/// resource it still holds.
pub struct CaptureSession {
    tx: Sender<Message>,
    flags: Arc<SharedFlags>,
    worker: Option<thread::JoinHandle<()>>,
}

impl CaptureSession {
    /// Start a controller thread driving `hardware`.
    ///
    /// Returns the handle plus the stream of [`SessionEvent`]s.
    pub fn spawn<H: CameraHardware>(
        hardware: H,
        settings: ControllerSettings,
        surface: SurfaceInfo,
        permit: OpenClosePermit,
    ) -> io::Result<(Self, Receiver<SessionEvent>)> {
        let (tx, rx) = unbounded();
        let (events_tx, events_rx) = unbounded();
        let flags = Arc::new(SharedFlags::default());
        flags.flash.store(settings.initial_flash, Ordering::SeqCst);

        let controller = Controller {
            budget: RetryBudget::new(settings.max_retry_attempts, settings.retry_backoff),
            hardware,
            settings,
            surface,
            permit,
            mailbox: tx.clone(),
            events: events_tx,
            flags: flags.clone(),
            state: SessionState::Closed,
            epoch: 0,
            retry_at: None,
            resources: SessionResources::default(),
            preview_size: None,
            awaiting_device: false,
            reopen_requested: false,
            pending_capture: None,
        };

        let dispatch = tracing::dispatcher::get_default(|current| current.clone());
        let worker = thread::Builder::new()
            .name("camera-session".into())
            .spawn(move || tracing::dispatcher::with_default(&dispatch, || controller.run(rx)))?;

        Ok((
            Self {
                tx,
                flags,
                worker: Some(worker),
            },
            events_rx,
        ))
    }

    pub fn open(&self) {
        self.send(Command::Open);
    }

    pub fn close(&self) {
        self.send(Command::Close);
    }

    /// Request a still capture.
    ///
    /// Only one capture may be outstanding; the in-flight mark is set here and
    /// cleared when the resulting [`CapturedFrame`] is dropped or the capture
    /// fails.
    pub fn capture(&self) -> Result<(), CaptureRejected> {
        if !self.flags.ready.load(Ordering::SeqCst) {
            return Err(CaptureRejected::NotReady);
        }
        if self
            .flags
            .capturing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CaptureRejected::InFlight);
        }
        let ticket = CaptureTicket {
            flags: self.flags.clone(),
        };
        self.tx
            .send(Message::Command(Command::Capture(ticket)))
            .map_err(|_| CaptureRejected::Stopped)
    }

    /// Replace the flash directive used by subsequent requests.
    pub fn set_flash(&self, use_flash: bool) {
        self.send(Command::SetFlash(use_flash));
    }

    pub fn surface_changed(&self, surface: SurfaceInfo) {
        self.send(Command::SurfaceChanged(surface));
    }

    /// Whether the preview is running and captures are accepted.
    pub fn is_ready(&self) -> bool {
        self.flags.ready.load(Ordering::SeqCst)
    }

    pub fn is_capturing(&self) -> bool {
        self.flags.capturing.load(Ordering::SeqCst)
    }

    pub fn flash_enabled(&self) -> bool {
        self.flags.flash.load(Ordering::SeqCst)
    }

    /// Last state published by the actor. Advisory only; it may already be stale.
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.flags.state.load(Ordering::SeqCst))
    }

    /// Stop the controller and wait for its thread to release everything.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn send(&self, command: Command) {
        if self.tx.send(Message::Command(command)).is_err() {
            warn!("camera session controller has already stopped");
        }
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = self.tx.send(Message::Command(Command::Shutdown));
            if worker.join().is_err() {
                error!("camera session thread panicked");
            }
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Hardware resources held while a session is open.
#[derive(Default)]
struct SessionResources {
    device: Option<DeviceHandle>,
    session: Option<SessionHandle>,
    reader: Option<ReaderHandle>,
    repeating: bool,
    permit: Option<PermitGuard>,
}

impl SessionResources {
    /// Best-effort release: stop repeating, close session, device and reader,
    /// then return the permit. A failing step is logged and the rest still run.
    fn release<H: CameraHardware>(&mut self, hardware: &mut H) {
        if let Some(session) = self.session.take() {
            if self.repeating {
                if let Err(err) = hardware.stop_repeating(session) {
                    warn!("failed to stop repeating request: {err}");
                }
            }
            if let Err(err) = hardware.close_session(session) {
                warn!("exception closing capture session: {err}");
            }
        }
        self.repeating = false;
        if let Some(device) = self.device.take() {
            if let Err(err) = hardware.close_device(device) {
                warn!("exception closing camera device: {err}");
            }
        }
        if let Some(reader) = self.reader.take() {
            if let Err(err) = hardware.close_reader(reader) {
                warn!("exception closing capture reader: {err}");
            }
        }
        self.permit.take();
    }
}

struct PendingCapture {
    ticket: CaptureTicket,
    flash: bool,
}

struct Controller<H: CameraHardware> {
    hardware: H,
    settings: ControllerSettings,
    surface: SurfaceInfo,
    permit: OpenClosePermit,
    mailbox: Sender<Message>,
    events: Sender<SessionEvent>,
    flags: Arc<SharedFlags>,
    state: SessionState,
    budget: RetryBudget,
    /// Bumped on every open attempt and teardown; older callbacks are stale.
    epoch: u64,
    retry_at: Option<Instant>,
    resources: SessionResources,
    preview_size: Option<Size>,
    awaiting_device: bool,
    reopen_requested: bool,
    pending_capture: Option<PendingCapture>,
}

impl<H: CameraHardware> Controller<H> {
    fn run(mut self, rx: Receiver<Message>) {
        let span = tracing::info_span!("camera.session");
        let _guard = span.enter();

        loop {
            let message = match self.retry_at {
                Some(deadline) => match rx.recv_deadline(deadline) {
                    Ok(message) => message,
                    Err(RecvTimeoutError::Timeout) => {
                        self.retry_at = None;
                        if self.state == SessionState::Opening && !self.awaiting_device {
                            self.try_open();
                        }
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match rx.recv() {
                    Ok(message) => message,
                    Err(_) => break,
                },
            };

            match message {
                Message::Command(Command::Shutdown) => break,
                Message::Command(command) => self.handle_command(command),
                Message::Hardware { epoch, event } => self.handle_hardware(epoch, event),
            }
        }

        self.shutdown();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Open => self.on_open_request(),
            Command::Close => self.on_close_request(),
            Command::Capture(ticket) => self.on_capture_request(ticket),
            Command::SetFlash(use_flash) => self.on_flash_change(use_flash),
            Command::SurfaceChanged(surface) => self.on_surface_changed(surface),
            Command::Shutdown => {}
        }
    }

    fn on_open_request(&mut self) {
        match self.state {
            SessionState::Closed | SessionState::Error => self.begin_open(),
            SessionState::Closing => {
                debug!("open requested while closing; reopening once closed");
                self.reopen_requested = true;
            }
            state => warn!("camera already in state: {state}"),
        }
    }

    fn begin_open(&mut self) {
        self.budget.reset();
        self.retry_at = None;
        self.set_state(SessionState::Opening);
        self.try_open();
    }

    fn try_open(&mut self) {
        metrics::counter!("camera_open_attempts_total").increment(1);

        let Some(guard) = self.permit.try_acquire_for(self.settings.permit_timeout) else {
            return self.open_failed(OpenFailure::PermitTimeout);
        };

        let camera = match self.select_camera() {
            Ok(camera) => camera,
            Err(failure) => {
                drop(guard);
                return self.open_failed(failure);
            }
        };

        let size = choose_optimal_size(
            &camera.output_sizes,
            self.surface.size,
            self.settings.max_preview,
        );
        debug!(camera = %camera.id, "selected camera preview size: {size}");

        self.epoch += 1;
        self.flags.ready.store(false, Ordering::SeqCst);
        let sink = self.sink();
        match self.hardware.open(&camera.id, sink) {
            Ok(()) => {
                self.resources.permit = Some(guard);
                self.preview_size = Some(size);
                self.awaiting_device = true;
            }
            Err(err) => {
                drop(guard);
                self.open_failed(OpenFailure::Hardware(err));
            }
        }
    }

    fn select_camera(&mut self) -> Result<CameraDescriptor, OpenFailure> {
        let mut cameras = self.hardware.enumerate_devices()?;
        if cameras.is_empty() {
            return Err(OpenFailure::NoCamera);
        }
        let preferred = self.settings.preferred_facing;
        match cameras.iter().position(|c| c.facing == preferred) {
            Some(index) => Ok(cameras.swap_remove(index)),
            None => {
                let fallback = cameras.swap_remove(0);
                warn!("no {preferred:?} camera found, using camera: {}", fallback.id);
                Ok(fallback)
            }
        }
    }

    fn open_failed(&mut self, failure: OpenFailure) {
        self.awaiting_device = false;
        self.resources.release(&mut self.hardware);

        if !failure.is_transient() {
            return self.enter_error(FatalError::Open(failure));
        }

        let exhausted = self.budget.record_failure();
        let attempt = self.budget.attempts();
        let max = self.budget.max_attempts();
        metrics::counter!("camera_open_failures_total", "kind" => "transient").increment(1);
        warn!("camera open failed ({attempt}/{max}): {failure}");
        self.emit(SessionEvent::Error(SessionError::Transient {
            attempt,
            max,
            cause: failure,
        }));

        if exhausted {
            self.enter_error(FatalError::RetryExhausted { attempts: attempt });
        } else {
            self.retry_at = Some(Instant::now() + self.budget.backoff());
        }
    }

    fn enter_error(&mut self, fatal: FatalError) {
        self.retry_at = None;
        self.awaiting_device = false;
        self.resources.release(&mut self.hardware);
        self.pending_capture = None;
        self.flags.ready.store(false, Ordering::SeqCst);
        self.epoch += 1;
        metrics::counter!("camera_open_failures_total", "kind" => "fatal").increment(1);
        error!("{fatal}");
        self.set_state(SessionState::Error);
        self.emit(SessionEvent::Error(SessionError::Fatal(fatal)));
    }

    fn on_close_request(&mut self) {
        match self.state {
            SessionState::Closed | SessionState::Error | SessionState::Closing => {
                debug!("close ignored in state {}", self.state);
            }
            SessionState::Opening if self.awaiting_device => {
                // The device is closed as soon as the hardware hands it over.
                self.retry_at = None;
                self.set_state(SessionState::Closing);
            }
            SessionState::Opening => {
                self.retry_at = None;
                self.finish_close();
            }
            SessionState::Opened => {
                self.set_state(SessionState::Closing);
                self.finish_close();
            }
        }
    }

    fn finish_close(&mut self) {
        if self.resources.permit.is_none() {
            self.resources.permit = self.permit.try_acquire_for(self.settings.permit_timeout);
            if self.resources.permit.is_none() {
                warn!("closing camera without the open/close permit");
            }
        }
        self.resources.release(&mut self.hardware);
        self.pending_capture = None;
        self.awaiting_device = false;
        self.flags.ready.store(false, Ordering::SeqCst);
        self.epoch += 1;
        self.set_state(SessionState::Closed);

        if std::mem::take(&mut self.reopen_requested) {
            self.begin_open();
        }
    }

    fn on_capture_request(&mut self, ticket: CaptureTicket) {
        let ready = self.state == SessionState::Opened && self.flags.ready.load(Ordering::SeqCst);
        let (Some(session), Some(reader), true) =
            (self.resources.session, self.resources.reader, ready)
        else {
            debug!("cannot capture, camera not ready");
            return self.emit(SessionEvent::Error(SessionError::Operation(
                OperationError::CaptureRejected(CaptureRejected::NotReady),
            )));
        };
        if self.pending_capture.is_some() {
            return self.emit(SessionEvent::Error(SessionError::Operation(
                OperationError::CaptureRejected(CaptureRejected::InFlight),
            )));
        }

        let flash = self.flags.flash.load(Ordering::SeqCst);
        let request = CaptureRequestSpec::still(reader, flash, self.settings.jpeg_quality);
        let sink = self.sink();
        match self.hardware.submit_capture(session, &request, sink) {
            Ok(()) => {
                debug!(flash, "still capture submitted");
                self.pending_capture = Some(PendingCapture { ticket, flash });
            }
            Err(err) => {
                metrics::counter!("camera_capture_failures_total").increment(1);
                self.emit(SessionEvent::Error(SessionError::Operation(
                    OperationError::CaptureFailed(err.to_string()),
                )));
            }
        }
    }

    fn on_flash_change(&mut self, use_flash: bool) {
        self.flags.flash.store(use_flash, Ordering::SeqCst);
        if self.state != SessionState::Opened || !self.resources.repeating {
            debug!(use_flash, "flash directive stored; no active preview to update");
            return;
        }
        info!(use_flash, "updating flash mode");
        self.start_preview();
    }

    fn on_surface_changed(&mut self, surface: SurfaceInfo) {
        self.surface = surface;
        if self.state != SessionState::Opened {
            return;
        }
        if let Some(session) = self.resources.session.take() {
            if self.resources.repeating {
                if let Err(err) = self.hardware.stop_repeating(session) {
                    warn!("failed to stop repeating: {err}");
                }
            }
            if let Err(err) = self.hardware.close_session(session) {
                warn!("exception closing capture session: {err}");
            }
            self.resources.repeating = false;
        }
        self.flags.ready.store(false, Ordering::SeqCst);
        self.configure_session();
    }

    fn handle_hardware(&mut self, epoch: u64, event: HardwareEvent) {
        if epoch != self.epoch {
            return self.discard_stale(epoch, event);
        }

        match event {
            HardwareEvent::DeviceOpened { device } => self.on_device_opened(device),
            HardwareEvent::OpenFailed(err) => {
                self.awaiting_device = false;
                if self.state == SessionState::Closing {
                    self.finish_close();
                } else if self.state == SessionState::Opening {
                    self.open_failed(OpenFailure::Hardware(err));
                }
            }
            HardwareEvent::DeviceDisconnected => {
                warn!("camera device disconnected");
                self.retry_at = None;
                self.finish_close();
            }
            HardwareEvent::DeviceError(code) => self.on_device_error(code),
            HardwareEvent::SessionConfigured { session } => self.on_session_configured(session),
            HardwareEvent::SessionConfigureFailed => {
                error!("camera capture session configuration failed");
                self.flags.ready.store(false, Ordering::SeqCst);
                self.emit(SessionEvent::Error(SessionError::Operation(
                    OperationError::ConfigureFailed,
                )));
            }
            HardwareEvent::CaptureCompleted { frame } => self.on_capture_completed(frame),
            HardwareEvent::CaptureFailed { reason } => {
                self.pending_capture = None;
                metrics::counter!("camera_capture_failures_total").increment(1);
                error!("image capture failed: {reason}");
                self.emit(SessionEvent::Error(SessionError::Operation(
                    OperationError::CaptureFailed(reason),
                )));
            }
        }
    }

    /// Callbacks from an abandoned epoch: close whatever they hand us, drop the rest.
    fn discard_stale(&mut self, epoch: u64, event: HardwareEvent) {
        debug!(
            epoch,
            current = self.epoch,
            "ignoring stale {} callback",
            event.label()
        );
        match event {
            HardwareEvent::DeviceOpened { device } => {
                if let Err(err) = self.hardware.close_device(device) {
                    warn!("failed to close stale camera device: {err}");
                }
            }
            HardwareEvent::SessionConfigured { session } => {
                if let Err(err) = self.hardware.close_session(session) {
                    warn!("failed to close stale capture session: {err}");
                }
            }
            _ => {}
        }
    }

    fn on_device_opened(&mut self, device: DeviceHandle) {
        self.awaiting_device = false;
        self.resources.device = Some(device);
        match self.state {
            SessionState::Closing => self.finish_close(),
            SessionState::Opening => {
                self.resources.permit = None;
                self.set_state(SessionState::Opened);
                self.configure_session();
            }
            state => {
                warn!("camera device opened in unexpected state {state}; closing it");
                self.resources.device = None;
                if let Err(err) = self.hardware.close_device(device) {
                    warn!("failed to close camera device: {err}");
                }
            }
        }
    }

    fn on_device_error(&mut self, code: DeviceErrorCode) {
        match self.state {
            SessionState::Closing => {
                self.awaiting_device = false;
                self.finish_close();
            }
            SessionState::Opening | SessionState::Opened if code.is_transient() => {
                error!("camera error: {code}, retrying");
                self.pending_capture = None;
                self.flags.ready.store(false, Ordering::SeqCst);
                self.epoch += 1;
                self.set_state(SessionState::Opening);
                self.open_failed(OpenFailure::Device(code));
            }
            SessionState::Opening | SessionState::Opened => {
                self.enter_error(FatalError::Device(code));
            }
            SessionState::Closed | SessionState::Error => {
                debug!("device error {code} ignored in state {}", self.state);
            }
        }
    }

    fn configure_session(&mut self) {
        let Some(device) = self.resources.device else {
            error!("cannot create preview, camera device is missing");
            return;
        };
        if !self.surface.valid {
            error!("surface is invalid; preview not started");
            return self.emit(SessionEvent::Error(SessionError::Operation(
                OperationError::InvalidSurface,
            )));
        }

        if self.resources.reader.is_none() {
            let size = self.preview_size.unwrap_or(DEFAULT_PREVIEW_SIZE);
            let sink = self.sink();
            match self.hardware.create_reader(size, sink) {
                Ok(reader) => self.resources.reader = Some(reader),
                Err(err) => {
                    error!("failed to set up capture reader: {err}");
                    self.emit(SessionEvent::Error(SessionError::Operation(
                        OperationError::Reader(err),
                    )));
                }
            }
        }

        let mut targets = vec![SurfaceTarget::Preview];
        if let Some(reader) = self.resources.reader {
            targets.push(SurfaceTarget::Reader(reader));
        }
        let sink = self.sink();
        if let Err(err) = self.hardware.create_session(device, &targets, sink) {
            error!("error creating camera preview: {err}");
            self.emit(SessionEvent::Error(SessionError::Operation(
                OperationError::Configure(err),
            )));
        }
    }

    fn on_session_configured(&mut self, session: SessionHandle) {
        if self.state != SessionState::Opened {
            if let Err(err) = self.hardware.close_session(session) {
                warn!("failed to close capture session: {err}");
            }
            return;
        }
        if let Some(previous) = self.resources.session.replace(session) {
            if let Err(err) = self.hardware.close_session(previous) {
                warn!("failed to close replaced capture session: {err}");
            }
        }
        self.start_preview();
    }

    /// Build and submit the repeating preview request with the current flash directive.
    fn start_preview(&mut self) {
        let Some(session) = self.resources.session else {
            return;
        };
        let request = CaptureRequestSpec::preview(self.flags.flash.load(Ordering::SeqCst));
        let was_repeating = self.resources.repeating;
        match self.hardware.submit_repeating(session, &request) {
            Ok(()) => {
                self.resources.repeating = true;
                self.flags.ready.store(true, Ordering::SeqCst);
                if !was_repeating {
                    let size = self.preview_size.unwrap_or(DEFAULT_PREVIEW_SIZE);
                    info!("camera preview started at {size}");
                    self.emit(SessionEvent::PreviewStarted { size });
                }
            }
            Err(err) => {
                error!("failed to submit repeating request: {err}");
                let failure = if was_repeating {
                    OperationError::Flash(err)
                } else {
                    self.flags.ready.store(false, Ordering::SeqCst);
                    OperationError::Preview(err)
                };
                self.emit(SessionEvent::Error(SessionError::Operation(failure)));
            }
        }
    }

    fn on_capture_completed(&mut self, frame: FrameBuffer) {
        match self.pending_capture.take() {
            Some(PendingCapture { ticket, flash }) if self.state == SessionState::Opened => {
                debug!(
                    width = frame.width,
                    height = frame.height,
                    "image captured successfully"
                );
                metrics::counter!("camera_captures_total").increment(1);
                self.emit(SessionEvent::Frame(CapturedFrame {
                    frame,
                    flash_used: flash,
                    ticket,
                }));
            }
            _ => debug!("dropping frame with no outstanding capture"),
        }
    }

    fn sink(&self) -> HardwareSink {
        HardwareSink::new(self.epoch, self.mailbox.clone())
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        debug!("camera state {} -> {}", self.state, state);
        self.state = state;
        self.flags.state.store(state as u8, Ordering::SeqCst);
        metrics::gauge!("camera_session_state").set(f64::from(state as u8));
        self.emit(SessionEvent::State(state));
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn shutdown(&mut self) {
        self.retry_at = None;
        self.reopen_requested = false;
        self.resources.release(&mut self.hardware);
        self.pending_capture = None;
        self.flags.ready.store(false, Ordering::SeqCst);
        if self.state != SessionState::Error {
            self.set_state(SessionState::Closed);
        }
        debug!("camera session controller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_exhausts_at_max() {
        let mut budget = RetryBudget::new(3, Duration::from_millis(1));
        assert!(!budget.record_failure());
        assert!(!budget.record_failure());
        assert!(budget.record_failure());
        assert_eq!(budget.attempts(), 3);
        budget.reset();
        assert_eq!(budget.attempts(), 0);
        assert!(!budget.is_exhausted());
    }

    #[test]
    fn budget_never_allows_zero_attempts() {
        let budget = RetryBudget::new(0, Duration::ZERO);
        assert_eq!(budget.max_attempts(), 1);
    }

    #[test]
    fn permit_timeout_is_transient() {
        assert!(OpenFailure::PermitTimeout.is_transient());
        assert!(!OpenFailure::NoCamera.is_transient());
        assert!(OpenFailure::Device(DeviceErrorCode::CameraInUse).is_transient());
        assert!(!OpenFailure::Device(DeviceErrorCode::CameraDisabled).is_transient());
    }

    #[test]
    fn state_round_trips_through_atomic_repr() {
        for state in [
            SessionState::Closed,
            SessionState::Opening,
            SessionState::Opened,
            SessionState::Closing,
            SessionState::Error,
        ] {
            assert_eq!(SessionState::from_u8(state as u8), state);
        }
    }
}
