//! Camera acquisition lifecycle: device open with bounded retry, session
//! configuration, repeating preview, still capture and ordered teardown.

pub mod controller;
pub mod hardware;
pub mod permit;
pub mod request;
pub mod sim;
pub mod size;
pub mod types;

pub use controller::{
    CaptureRejected, CaptureSession, CaptureTicket, CapturedFrame, ControllerSettings,
    FatalError, MAX_RETRY_ATTEMPTS, OpenFailure, OperationError, RETRY_BACKOFF, RetryBudget,
    SessionError, SessionEvent, SessionState,
};
pub use hardware::{CameraHardware, HardwareEvent, HardwareSink, SurfaceInfo};
pub use permit::{OpenClosePermit, PERMIT_TIMEOUT, PermitGuard};
pub use request::{CaptureRequestSpec, FlashMode, STILL_JPEG_QUALITY};
pub use sim::{OpenOutcome, SimCall, SimControl, SimulatedCamera};
pub use size::{DEFAULT_PREVIEW_SIZE, MAX_PREVIEW_SIZE, choose_optimal_size};
pub use types::{
    BufferTracker, CameraDescriptor, CameraId, DeviceErrorCode, Facing, FrameBuffer, FrameFormat,
    HardwareError, Rotation, Size,
};
