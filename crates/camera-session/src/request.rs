//! Capture request configuration submitted to the hardware.

/// Output surfaces a request can target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceTarget {
    /// The display surface the preview is bound to.
    Preview,
    /// The still-capture reader created for the session.
    Reader(ReaderHandle),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestTemplate {
    Preview,
    StillCapture,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AutofocusMode {
    Off,
    ContinuousPicture,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AutoExposureMode {
    Off,
    On,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlashMode {
    Off,
    Torch,
}

impl FlashMode {
    pub fn from_directive(use_flash: bool) -> Self {
        if use_flash {
            FlashMode::Torch
        } else {
            FlashMode::Off
        }
    }
}

/// Quality used for still captures.
pub const STILL_JPEG_QUALITY: u8 = 95;

/// Hardware handle of an opened device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub u64);

/// Hardware handle of a configured capture session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionHandle(pub u64);

/// Hardware handle of a still-capture reader.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ReaderHandle(pub u64);

/// Configuration bundle for one repeating or one-shot request.
///
/// Specs are rebuilt for every submission and never modified afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureRequestSpec {
    pub template: RequestTemplate,
    pub targets: Vec<SurfaceTarget>,
    pub autofocus: AutofocusMode,
    pub auto_exposure: AutoExposureMode,
    pub flash: FlashMode,
    pub jpeg_quality: Option<u8>,
}

impl CaptureRequestSpec {
    /// Repeating preview request against the display surface.
    pub fn preview(use_flash: bool) -> Self {
        Self {
            template: RequestTemplate::Preview,
            targets: vec![SurfaceTarget::Preview],
            autofocus: AutofocusMode::ContinuousPicture,
            auto_exposure: AutoExposureMode::On,
            flash: FlashMode::from_directive(use_flash),
            jpeg_quality: None,
        }
    }

    /// One-shot still request delivered to `reader`.
    pub fn still(reader: ReaderHandle, use_flash: bool, jpeg_quality: u8) -> Self {
        Self {
            template: RequestTemplate::StillCapture,
            targets: vec![SurfaceTarget::Reader(reader)],
            autofocus: AutofocusMode::ContinuousPicture,
            auto_exposure: AutoExposureMode::On,
            flash: FlashMode::from_directive(use_flash),
            jpeg_quality: Some(jpeg_quality.clamp(1, 100)),
        }
    }

    pub fn uses_flash(&self) -> bool {
        self.flash == FlashMode::Torch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn still_request_targets_reader_only() {
        let spec = CaptureRequestSpec::still(ReaderHandle(7), true, 95);
        assert_eq!(spec.targets, vec![SurfaceTarget::Reader(ReaderHandle(7))]);
        assert_eq!(spec.flash, FlashMode::Torch);
        assert_eq!(spec.jpeg_quality, Some(95));
    }

    #[test]
    fn preview_request_follows_flash_directive() {
        assert_eq!(CaptureRequestSpec::preview(false).flash, FlashMode::Off);
        assert!(CaptureRequestSpec::preview(true).uses_flash());
    }
}
