//! Boundary to the platform camera service.
//!
//! Calls on [`CameraHardware`] return as soon as the request is accepted. Their
//! outcome arrives later as a [`HardwareEvent`] pushed through the
//! [`HardwareSink`] passed with the call, which feeds the controller's mailbox.

use crossbeam_channel::Sender;

use crate::{
    controller::Message,
    request::{CaptureRequestSpec, DeviceHandle, ReaderHandle, SessionHandle, SurfaceTarget},
    types::{CameraDescriptor, CameraId, DeviceErrorCode, FrameBuffer, HardwareError, Size},
};

/// Pixel dimensions and validity of the display surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceInfo {
    pub size: Size,
    pub valid: bool,
}

impl SurfaceInfo {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: Size::new(width, height),
            valid: true,
        }
    }

    pub fn invalid() -> Self {
        Self {
            size: Size::new(0, 0),
            valid: false,
        }
    }
}

/// Asynchronous completions reported by the hardware.
#[derive(Debug)]
pub enum HardwareEvent {
    DeviceOpened { device: DeviceHandle },
    /// Open was accepted but failed before a handle was produced.
    OpenFailed(HardwareError),
    DeviceDisconnected,
    DeviceError(DeviceErrorCode),
    SessionConfigured { session: SessionHandle },
    SessionConfigureFailed,
    CaptureCompleted { frame: FrameBuffer },
    CaptureFailed { reason: String },
}

impl HardwareEvent {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            HardwareEvent::DeviceOpened { .. } => "device-opened",
            HardwareEvent::OpenFailed(_) => "open-failed",
            HardwareEvent::DeviceDisconnected => "device-disconnected",
            HardwareEvent::DeviceError(_) => "device-error",
            HardwareEvent::SessionConfigured { .. } => "session-configured",
            HardwareEvent::SessionConfigureFailed => "session-configure-failed",
            HardwareEvent::CaptureCompleted { .. } => "capture-completed",
            HardwareEvent::CaptureFailed { .. } => "capture-failed",
        }
    }
}

/// Delivery channel for hardware callbacks.
///
/// Every sink is stamped with the open epoch it was created for; events from
/// an earlier epoch are treated as stale by the controller.
#[derive(Clone)]
pub struct HardwareSink {
    epoch: u64,
    tx: Sender<Message>,
}

impl HardwareSink {
    pub(crate) fn new(epoch: u64, tx: Sender<Message>) -> Self {
        Self { epoch, tx }
    }

    /// Push `event` to the controller. Returns `false` once the controller is gone.
    pub fn deliver(&self, event: HardwareEvent) -> bool {
        self.tx
            .send(Message::Hardware {
                epoch: self.epoch,
                event,
            })
            .is_ok()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

/// Operations the controller needs from a camera service.
pub trait CameraHardware: Send + 'static {
    fn enumerate_devices(&mut self) -> Result<Vec<CameraDescriptor>, HardwareError>;

    /// Start opening `id`; completion is reported as `DeviceOpened`,
    /// `OpenFailed` or `DeviceError`.
    fn open(&mut self, id: &CameraId, sink: HardwareSink) -> Result<(), HardwareError>;

    /// Create the still-capture reader; completed captures arrive on `sink`.
    fn create_reader(
        &mut self,
        size: Size,
        sink: HardwareSink,
    ) -> Result<ReaderHandle, HardwareError>;

    /// Start configuring a session over `targets`; reported as
    /// `SessionConfigured` or `SessionConfigureFailed`.
    fn create_session(
        &mut self,
        device: DeviceHandle,
        targets: &[SurfaceTarget],
        sink: HardwareSink,
    ) -> Result<(), HardwareError>;

    fn submit_repeating(
        &mut self,
        session: SessionHandle,
        request: &CaptureRequestSpec,
    ) -> Result<(), HardwareError>;

    fn stop_repeating(&mut self, session: SessionHandle) -> Result<(), HardwareError>;

    /// Submit a one-shot request; the frame lands on the reader's sink and a
    /// failure is reported as `CaptureFailed`.
    fn submit_capture(
        &mut self,
        session: SessionHandle,
        request: &CaptureRequestSpec,
        sink: HardwareSink,
    ) -> Result<(), HardwareError>;

    fn close_session(&mut self, session: SessionHandle) -> Result<(), HardwareError>;

    fn close_device(&mut self, device: DeviceHandle) -> Result<(), HardwareError>;

    fn close_reader(&mut self, reader: ReaderHandle) -> Result<(), HardwareError>;
}
