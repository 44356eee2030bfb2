//! Ambient-light driven flash directive.

use std::{
    io,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use camera_session::CaptureSession;
use crossbeam_channel::Receiver;
use tracing::{debug, info};

use crate::telemetry;

/// Below this illuminance the flash is wanted.
pub const MIN_LUX_FOR_NO_FLASH: f32 = 50.0;
/// Minimum spacing between two evaluated samples.
pub const LIGHT_CHECK_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Clone, Copy, Debug)]
pub struct LightSample {
    pub lux: f32,
    pub at: Instant,
}

impl LightSample {
    pub fn now(lux: f32) -> Self {
        Self {
            lux,
            at: Instant::now(),
        }
    }
}

/// Rate-limited threshold policy deciding whether the flash should be on.
#[derive(Clone, Debug)]
pub struct LightAdaptiveFlashPolicy {
    use_flash: bool,
    threshold_lux: f32,
    interval: Duration,
    last_check: Option<Instant>,
    last_lux: Option<f32>,
    evaluations: u64,
}

impl Default for LightAdaptiveFlashPolicy {
    fn default() -> Self {
        Self::new(true)
    }
}

impl LightAdaptiveFlashPolicy {
    pub fn new(initial: bool) -> Self {
        Self {
            use_flash: initial,
            threshold_lux: MIN_LUX_FOR_NO_FLASH,
            interval: LIGHT_CHECK_INTERVAL,
            last_check: None,
            last_lux: None,
            evaluations: 0,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_threshold(mut self, lux: f32) -> Self {
        self.threshold_lux = lux;
        self
    }

    pub fn use_flash(&self) -> bool {
        self.use_flash
    }

    /// Latest reading outside the rate-limit window, ready or not.
    pub fn last_lux(&self) -> Option<f32> {
        self.last_lux
    }

    /// Number of samples that were actually evaluated.
    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    /// Feed one sample. Returns the new directive when it changed.
    ///
    /// Samples inside the rate-limit window are ignored. A sample outside it
    /// opens a new window even when the session is not ready; only the
    /// directive update is skipped then.
    pub fn observe(&mut self, sample: LightSample, session_ready: bool) -> Option<bool> {
        if let Some(last) = self.last_check {
            if sample.at.saturating_duration_since(last) <= self.interval {
                return None;
            }
        }
        self.last_check = Some(sample.at);
        self.last_lux = Some(sample.lux);
        if !session_ready {
            return None;
        }
        self.evaluations += 1;

        let wanted = sample.lux < self.threshold_lux;
        if wanted == self.use_flash {
            return None;
        }
        self.use_flash = wanted;
        Some(wanted)
    }
}

/// Receiver of flash directive changes.
pub trait FlashTarget: Send + Sync {
    fn is_ready(&self) -> bool;
    fn set_flash(&self, use_flash: bool);
}

impl FlashTarget for CaptureSession {
    fn is_ready(&self) -> bool {
        CaptureSession::is_ready(self)
    }

    fn set_flash(&self, use_flash: bool) {
        CaptureSession::set_flash(self, use_flash);
    }
}

/// Consume `samples` on a background thread and push directive changes to
/// `target`. The thread ends when the sample channel closes and hands the
/// policy back.
pub fn spawn_light_monitor<T: FlashTarget + 'static>(
    target: Arc<T>,
    samples: Receiver<LightSample>,
    mut policy: LightAdaptiveFlashPolicy,
) -> io::Result<thread::JoinHandle<LightAdaptiveFlashPolicy>> {
    telemetry::spawn_thread("light-monitor", move || {
        for sample in samples.iter() {
            if let Some(use_flash) = policy.observe(sample, target.is_ready()) {
                info!(lux = sample.lux, use_flash, "light level changed flash directive");
                metrics::counter!("vision_flash_toggles_total").increment(1);
                target.set_flash(use_flash);
            }
        }
        debug!(evaluations = policy.evaluations(), "light monitor stopped");
        policy
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use crossbeam_channel::unbounded;

    use super::*;

    #[test]
    fn samples_inside_window_are_not_evaluated() {
        let mut policy = LightAdaptiveFlashPolicy::default();
        let start = Instant::now();
        assert_eq!(
            policy.observe(LightSample { lux: 200.0, at: start }, true),
            Some(false)
        );
        let early = start + Duration::from_millis(400);
        assert_eq!(policy.observe(LightSample { lux: 5.0, at: early }, true), None);
        assert_eq!(policy.evaluations(), 1);
        assert!(!policy.use_flash());

        let late = start + Duration::from_millis(1001);
        assert_eq!(policy.observe(LightSample { lux: 5.0, at: late }, true), Some(true));
        assert_eq!(policy.evaluations(), 2);
    }

    #[test]
    fn exactly_one_interval_is_still_inside_the_window() {
        let mut policy = LightAdaptiveFlashPolicy::new(false);
        let start = Instant::now();
        policy.observe(LightSample { lux: 100.0, at: start }, true);
        let edge = start + LIGHT_CHECK_INTERVAL;
        assert_eq!(policy.observe(LightSample { lux: 1.0, at: edge }, true), None);
        assert_eq!(policy.evaluations(), 1);
    }

    #[test]
    fn threshold_is_strict() {
        let mut policy = LightAdaptiveFlashPolicy::new(true);
        let sample = LightSample::now(MIN_LUX_FOR_NO_FLASH);
        assert_eq!(policy.observe(sample, true), Some(false));
    }

    #[test]
    fn nothing_happens_while_not_ready() {
        let mut policy = LightAdaptiveFlashPolicy::new(true);
        assert_eq!(policy.observe(LightSample::now(500.0), false), None);
        assert_eq!(policy.evaluations(), 0);
        assert_eq!(policy.last_lux(), Some(500.0));
        assert!(policy.use_flash());
    }

    #[test]
    fn sample_while_not_ready_still_opens_the_window() {
        let mut policy = LightAdaptiveFlashPolicy::new(true);
        let start = Instant::now();
        assert_eq!(policy.observe(LightSample { lux: 500.0, at: start }, false), None);

        let inside = start + Duration::from_millis(300);
        assert_eq!(policy.observe(LightSample { lux: 500.0, at: inside }, true), None);
        assert_eq!(policy.evaluations(), 0);
        assert!(policy.use_flash());

        let after = start + Duration::from_millis(1001);
        assert_eq!(policy.observe(LightSample { lux: 500.0, at: after }, true), Some(false));
        assert_eq!(policy.evaluations(), 1);
    }

    #[derive(Default)]
    struct RecordingTarget {
        changes: Mutex<Vec<bool>>,
    }

    impl FlashTarget for RecordingTarget {
        fn is_ready(&self) -> bool {
            true
        }

        fn set_flash(&self, use_flash: bool) {
            self.changes.lock().unwrap().push(use_flash);
        }
    }

    #[test]
    fn monitor_forwards_changes_until_channel_closes() {
        let target = Arc::new(RecordingTarget::default());
        let (tx, rx) = unbounded();
        let policy = LightAdaptiveFlashPolicy::new(true).with_interval(Duration::ZERO);
        let handle = spawn_light_monitor(target.clone(), rx, policy).unwrap();

        let start = Instant::now();
        for (i, lux) in [10.0, 300.0, 280.0, 3.0].into_iter().enumerate() {
            tx.send(LightSample {
                lux,
                at: start + Duration::from_millis(i as u64 + 1),
            })
            .unwrap();
        }
        drop(tx);

        let policy = handle.join().unwrap();
        assert_eq!(policy.evaluations(), 4);
        assert_eq!(*target.changes.lock().unwrap(), vec![false, true]);
    }
}
