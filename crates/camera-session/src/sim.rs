//! In-process camera service with scriptable outcomes.
//!
//! [`SimulatedCamera`] is moved into the controller; the paired [`SimControl`]
//! stays with the caller to script failures, hold device opens, inject
//! disconnects and inspect the hardware call log.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use anyhow::anyhow;
use tracing::trace;

use crate::{
    hardware::{CameraHardware, HardwareEvent, HardwareSink},
    request::{CaptureRequestSpec, DeviceHandle, ReaderHandle, SessionHandle, SurfaceTarget},
    types::{
        BufferTracker, CameraDescriptor, CameraId, DeviceErrorCode, Facing, FrameBuffer,
        FrameFormat, HardwareError, Rotation, Size,
    },
};

/// Result of one scripted `open` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OpenOutcome {
    Succeed,
    /// The call itself is rejected with a busy device.
    Busy,
    /// Access to the service is denied.
    Denied,
    /// The call is accepted, then the device reports an error.
    DeviceError(DeviceErrorCode),
    /// The call is accepted, then fails asynchronously.
    FailAsync,
    /// Service is gone; not worth retrying.
    Unavailable,
}

/// Hardware call as observed by the simulator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SimCall {
    Enumerate,
    Open(CameraId),
    CreateReader(Size),
    CreateSession {
        device: DeviceHandle,
        targets: Vec<SurfaceTarget>,
    },
    SubmitRepeating {
        session: SessionHandle,
        flash: bool,
    },
    StopRepeating(SessionHandle),
    SubmitCapture {
        session: SessionHandle,
        flash: bool,
        quality: Option<u8>,
    },
    CloseSession(SessionHandle),
    CloseDevice(DeviceHandle),
    CloseReader(ReaderHandle),
}

impl SimCall {
    /// Whether this call releases a hardware resource.
    pub fn is_teardown(&self) -> bool {
        matches!(
            self,
            SimCall::StopRepeating(_)
                | SimCall::CloseSession(_)
                | SimCall::CloseDevice(_)
                | SimCall::CloseReader(_)
        )
    }
}

struct SimState {
    cameras: Vec<CameraDescriptor>,
    open_script: VecDeque<OpenOutcome>,
    hold_opens: bool,
    held_opens: Vec<(DeviceHandle, HardwareSink)>,
    device_sink: Option<HardwareSink>,
    readers: HashMap<ReaderHandle, (Size, HardwareSink)>,
    fail_configure: bool,
    fail_capture: Option<String>,
    frame_rotation: Rotation,
    calls: Vec<SimCall>,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            cameras: vec![
                CameraDescriptor {
                    id: CameraId("front-0".into()),
                    facing: Facing::Front,
                    output_sizes: vec![Size::new(640, 480), Size::new(1280, 720)],
                },
                CameraDescriptor {
                    id: CameraId("back-0".into()),
                    facing: Facing::Back,
                    output_sizes: vec![
                        Size::new(1920, 1080),
                        Size::new(1280, 720),
                        Size::new(960, 540),
                        Size::new(640, 480),
                        Size::new(320, 240),
                    ],
                },
            ],
            open_script: VecDeque::new(),
            hold_opens: false,
            held_opens: Vec::new(),
            device_sink: None,
            readers: HashMap::new(),
            fail_configure: false,
            fail_capture: None,
            frame_rotation: Rotation::Deg0,
            calls: Vec::new(),
        }
    }
}

/// Test-side handle to a [`SimulatedCamera`].
#[derive(Clone)]
pub struct SimControl {
    state: Arc<Mutex<SimState>>,
    tracker: BufferTracker,
}

impl SimControl {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the enumerated cameras.
    pub fn set_cameras(&self, cameras: Vec<CameraDescriptor>) {
        self.lock().cameras = cameras;
    }

    /// Queue outcomes for the next `open` calls; once drained, opens succeed.
    pub fn script_opens(&self, outcomes: impl IntoIterator<Item = OpenOutcome>) {
        self.lock().open_script.extend(outcomes);
    }

    /// Keep successful opens pending until [`SimControl::release_opens`].
    pub fn hold_opens(&self, hold: bool) {
        self.lock().hold_opens = hold;
    }

    /// Deliver every held device. Returns how many were released.
    pub fn release_opens(&self) -> usize {
        let held = std::mem::take(&mut self.lock().held_opens);
        let count = held.len();
        for (device, sink) in held {
            sink.deliver(HardwareEvent::DeviceOpened { device });
        }
        count
    }

    pub fn fail_configure(&self, fail: bool) {
        self.lock().fail_configure = fail;
    }

    /// Make the next captures fail with `reason`; `None` restores success.
    pub fn fail_captures(&self, reason: Option<&str>) {
        self.lock().fail_capture = reason.map(str::to_owned);
    }

    pub fn set_frame_rotation(&self, rotation: Rotation) {
        self.lock().frame_rotation = rotation;
    }

    /// Report a disconnect of the open device.
    pub fn disconnect(&self) -> bool {
        let sink = self.lock().device_sink.clone();
        sink.is_some_and(|sink| sink.deliver(HardwareEvent::DeviceDisconnected))
    }

    /// Report an asynchronous device error on the open device.
    pub fn raise_device_error(&self, code: DeviceErrorCode) -> bool {
        let sink = self.lock().device_sink.clone();
        sink.is_some_and(|sink| sink.deliver(HardwareEvent::DeviceError(code)))
    }

    pub fn calls(&self) -> Vec<SimCall> {
        self.lock().calls.clone()
    }

    pub fn open_calls(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| matches!(call, SimCall::Open(_)))
            .count()
    }

    /// Tracker shared by every frame the simulator produces.
    pub fn tracker(&self) -> &BufferTracker {
        &self.tracker
    }
}

/// [`CameraHardware`] implementation backed by in-memory state.
pub struct SimulatedCamera {
    control: SimControl,
    next_handle: u64,
}

impl SimulatedCamera {
    pub fn new() -> (Self, SimControl) {
        let control = SimControl {
            state: Arc::new(Mutex::new(SimState::default())),
            tracker: BufferTracker::new(),
        };
        (
            Self {
                control: control.clone(),
                next_handle: 1,
            },
            control,
        )
    }

    fn next_handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn record(&self, call: SimCall) {
        trace!(?call, "simulated camera call");
        self.control.lock().calls.push(call);
    }
}

/// Synthetic RGBA gradient so detectors and enhancement have real pixels.
fn synthetic_frame(size: Size) -> Vec<u8> {
    let (width, height) = (size.width.max(1), size.height.max(1));
    let mut data = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            data.push((x * 255 / width) as u8);
            data.push((y * 255 / height) as u8);
            data.push(96);
            data.push(255);
        }
    }
    data
}

impl CameraHardware for SimulatedCamera {
    fn enumerate_devices(&mut self) -> Result<Vec<CameraDescriptor>, HardwareError> {
        self.record(SimCall::Enumerate);
        Ok(self.control.lock().cameras.clone())
    }

    fn open(&mut self, id: &CameraId, sink: HardwareSink) -> Result<(), HardwareError> {
        self.record(SimCall::Open(id.clone()));
        let device = DeviceHandle(self.next_handle());
        let mut state = self.control.lock();
        let outcome = state.open_script.pop_front().unwrap_or(OpenOutcome::Succeed);

        match outcome {
            OpenOutcome::Busy => Err(HardwareError::Busy(id.clone())),
            OpenOutcome::Denied => Err(HardwareError::AccessDenied(format!(
                "camera {id} is restricted"
            ))),
            OpenOutcome::Unavailable => Err(HardwareError::Unavailable),
            OpenOutcome::DeviceError(code) => {
                sink.deliver(HardwareEvent::DeviceError(code));
                Ok(())
            }
            OpenOutcome::FailAsync => {
                sink.deliver(HardwareEvent::OpenFailed(HardwareError::Other(anyhow!(
                    "simulated open failure on {id}"
                ))));
                Ok(())
            }
            OpenOutcome::Succeed => {
                state.device_sink = Some(sink.clone());
                if state.hold_opens {
                    state.held_opens.push((device, sink));
                } else {
                    drop(state);
                    sink.deliver(HardwareEvent::DeviceOpened { device });
                }
                Ok(())
            }
        }
    }

    fn create_reader(
        &mut self,
        size: Size,
        sink: HardwareSink,
    ) -> Result<ReaderHandle, HardwareError> {
        self.record(SimCall::CreateReader(size));
        let reader = ReaderHandle(self.next_handle());
        self.control.lock().readers.insert(reader, (size, sink));
        Ok(reader)
    }

    fn create_session(
        &mut self,
        device: DeviceHandle,
        targets: &[SurfaceTarget],
        sink: HardwareSink,
    ) -> Result<(), HardwareError> {
        self.record(SimCall::CreateSession {
            device,
            targets: targets.to_vec(),
        });
        let session = SessionHandle(self.next_handle());
        if self.control.lock().fail_configure {
            sink.deliver(HardwareEvent::SessionConfigureFailed);
        } else {
            sink.deliver(HardwareEvent::SessionConfigured { session });
        }
        Ok(())
    }

    fn submit_repeating(
        &mut self,
        session: SessionHandle,
        request: &CaptureRequestSpec,
    ) -> Result<(), HardwareError> {
        self.record(SimCall::SubmitRepeating {
            session,
            flash: request.uses_flash(),
        });
        Ok(())
    }

    fn stop_repeating(&mut self, session: SessionHandle) -> Result<(), HardwareError> {
        self.record(SimCall::StopRepeating(session));
        Ok(())
    }

    fn submit_capture(
        &mut self,
        session: SessionHandle,
        request: &CaptureRequestSpec,
        sink: HardwareSink,
    ) -> Result<(), HardwareError> {
        self.record(SimCall::SubmitCapture {
            session,
            flash: request.uses_flash(),
            quality: request.jpeg_quality,
        });

        let state = self.control.lock();
        if let Some(reason) = state.fail_capture.clone() {
            drop(state);
            sink.deliver(HardwareEvent::CaptureFailed { reason });
            return Ok(());
        }

        let reader = request.targets.iter().find_map(|target| match target {
            SurfaceTarget::Reader(reader) => state.readers.get(reader).cloned(),
            SurfaceTarget::Preview => None,
        });
        let Some((size, reader_sink)) = reader else {
            return Err(HardwareError::Closed);
        };
        let rotation = state.frame_rotation;
        drop(state);

        let frame = FrameBuffer::new(
            synthetic_frame(size),
            size.width,
            size.height,
            FrameFormat::Rgba8,
        )
        .with_rotation(rotation)
        .tracked(&self.control.tracker);
        reader_sink.deliver(HardwareEvent::CaptureCompleted { frame });
        Ok(())
    }

    fn close_session(&mut self, session: SessionHandle) -> Result<(), HardwareError> {
        self.record(SimCall::CloseSession(session));
        Ok(())
    }

    fn close_device(&mut self, device: DeviceHandle) -> Result<(), HardwareError> {
        self.record(SimCall::CloseDevice(device));
        self.control.lock().device_sink = None;
        Ok(())
    }

    fn close_reader(&mut self, reader: ReaderHandle) -> Result<(), HardwareError> {
        self.record(SimCall::CloseReader(reader));
        self.control.lock().readers.remove(&reader);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_frame_is_rgba_sized() {
        let data = synthetic_frame(Size::new(8, 4));
        assert_eq!(data.len(), 8 * 4 * 4);
        assert_eq!(data[3], 255);
    }

    #[test]
    fn teardown_calls_are_classified() {
        assert!(SimCall::CloseReader(ReaderHandle(1)).is_teardown());
        assert!(!SimCall::Enumerate.is_teardown());
    }
}
