use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use anyhow::Error;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Width/height pair in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Width over height; zero-height sizes report a ratio of zero.
    pub fn aspect_ratio(self) -> f32 {
        if self.height == 0 {
            0.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Lens direction reported by the hardware.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    Front,
    Back,
    External,
}

/// Opaque camera identifier handed out by the hardware service.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CameraId(pub String);

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Physical camera as enumerated at the start of an open attempt.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CameraDescriptor {
    pub id: CameraId,
    pub facing: Facing,
    pub output_sizes: Vec<Size>,
}

/// Clockwise rotation needed to bring a frame upright.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Map a display rotation in degrees onto the nearest quarter turn.
    pub fn from_degrees(degrees: i32) -> Self {
        match degrees.rem_euclid(360) {
            45..=134 => Rotation::Deg90,
            135..=224 => Rotation::Deg180,
            225..=314 => Rotation::Deg270,
            _ => Rotation::Deg0,
        }
    }

    pub fn degrees(self) -> i32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// Quarter turns swap the axes of the frame.
    pub fn swaps_axes(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    /// Tightly packed 8-bit RGBA.
    Rgba8,
    /// Encoded JPEG still, as produced by a still-capture reader.
    Jpeg,
}

/// Counts frame buffers that are still alive.
///
/// Buffers created with a tracker hold a lease that is returned on drop, so a
/// non-zero [`BufferTracker::live`] after teardown means something kept a frame.
#[derive(Clone, Debug, Default)]
pub struct BufferTracker {
    live: Arc<AtomicUsize>,
}

impl BufferTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    fn lease(&self) -> BufferLease {
        self.live.fetch_add(1, Ordering::SeqCst);
        BufferLease {
            live: self.live.clone(),
        }
    }
}

#[derive(Debug)]
struct BufferLease {
    live: Arc<AtomicUsize>,
}

impl Drop for BufferLease {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Raw frame captured from a camera reader.
///
/// Ownership moves from the hardware callback to whoever processes the frame;
/// the pixel memory is released when the value is dropped.
#[derive(Debug)]
pub struct FrameBuffer {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub rotation: Rotation,
    pub timestamp_ms: i64,
    pub format: FrameFormat,
    lease: Option<BufferLease>,
}

impl FrameBuffer {
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: FrameFormat) -> Self {
        Self {
            data,
            width,
            height,
            rotation: Rotation::Deg0,
            timestamp_ms: Utc::now().timestamp_millis(),
            format,
            lease: None,
        }
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    /// Register the buffer with `tracker` until it is dropped.
    pub fn tracked(mut self, tracker: &BufferTracker) -> Self {
        self.lease = Some(tracker.lease());
        self
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

/// Failure reported by a hardware camera service call.
#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("camera {0} is busy")]
    Busy(CameraId),
    #[error("camera access denied: {0}")]
    AccessDenied(String),
    #[error("camera service is unavailable")]
    Unavailable,
    #[error("camera handle is no longer valid")]
    Closed,
    #[error(transparent)]
    Other(#[from] Error),
}

impl HardwareError {
    /// Whether retrying the same call shortly is expected to help.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            HardwareError::Busy(_) | HardwareError::AccessDenied(_) | HardwareError::Other(_)
        )
    }
}

/// Error codes delivered through the asynchronous device error callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceErrorCode {
    CameraInUse,
    MaxCamerasInUse,
    CameraDisabled,
    CameraDevice,
    CameraService,
}

impl DeviceErrorCode {
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            DeviceErrorCode::CameraInUse | DeviceErrorCode::MaxCamerasInUse
        )
    }

    pub fn describe(self) -> &'static str {
        match self {
            DeviceErrorCode::CameraInUse => "camera already in use",
            DeviceErrorCode::MaxCamerasInUse => "max cameras in use",
            DeviceErrorCode::CameraDisabled => "camera disabled by policy",
            DeviceErrorCode::CameraDevice => "fatal camera device error",
            DeviceErrorCode::CameraService => "fatal camera service error",
        }
    }
}

impl fmt::Display for DeviceErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_counts_live_buffers() {
        let tracker = BufferTracker::new();
        let a = FrameBuffer::new(vec![0; 4], 1, 1, FrameFormat::Rgba8).tracked(&tracker);
        let b = FrameBuffer::new(vec![0; 4], 1, 1, FrameFormat::Rgba8).tracked(&tracker);
        assert_eq!(tracker.live(), 2);
        drop(a);
        assert_eq!(tracker.live(), 1);
        drop(b);
        assert_eq!(tracker.live(), 0);
    }

    #[test]
    fn rotation_snaps_to_quarter_turns() {
        assert_eq!(Rotation::from_degrees(0), Rotation::Deg0);
        assert_eq!(Rotation::from_degrees(90), Rotation::Deg90);
        assert_eq!(Rotation::from_degrees(-90), Rotation::Deg270);
        assert_eq!(Rotation::from_degrees(540), Rotation::Deg180);
        assert!(Rotation::Deg270.swaps_axes());
        assert!(!Rotation::Deg180.swaps_axes());
    }

    #[test]
    fn zero_height_has_zero_ratio() {
        assert_eq!(Size::new(640, 0).aspect_ratio(), 0.0);
    }
}
