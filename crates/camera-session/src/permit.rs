//! Binary open/close permit shared by every controller that drives the same
//! physical camera.

use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};

/// Default wait before giving up on the permit.
pub const PERMIT_TIMEOUT: Duration = Duration::from_millis(2_500);

/// Single-token permit guarding open and close operations.
///
/// The token lives in a one-slot channel: acquiring takes it out, dropping the
/// guard puts it back.
#[derive(Clone)]
pub struct OpenClosePermit {
    give: Sender<()>,
    take: Receiver<()>,
}

impl Default for OpenClosePermit {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenClosePermit {
    pub fn new() -> Self {
        let (give, take) = bounded(1);
        give.send(()).ok();
        Self { give, take }
    }

    /// Wait up to `timeout` for the token.
    pub fn try_acquire_for(&self, timeout: Duration) -> Option<PermitGuard> {
        self.take.recv_timeout(timeout).ok().map(|()| PermitGuard {
            give: self.give.clone(),
        })
    }

    /// Whether the token is currently free.
    pub fn is_available(&self) -> bool {
        !self.take.is_empty()
    }
}

/// Holds the permit until dropped.
#[derive(Debug)]
pub struct PermitGuard {
    give: Sender<()>,
}

impl Drop for PermitGuard {
    fn drop(&mut self) {
        let _ = self.give.try_send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_times_out_until_release() {
        let permit = OpenClosePermit::new();
        let guard = permit
            .try_acquire_for(Duration::from_millis(10))
            .expect("first acquire");
        assert!(!permit.is_available());
        assert!(permit.try_acquire_for(Duration::from_millis(10)).is_none());
        drop(guard);
        assert!(permit.is_available());
        assert!(permit.try_acquire_for(Duration::from_millis(10)).is_some());
    }

    #[test]
    fn clones_share_one_token() {
        let permit = OpenClosePermit::new();
        let other = permit.clone();
        let _guard = permit.try_acquire_for(Duration::from_millis(10)).unwrap();
        assert!(other.try_acquire_for(Duration::from_millis(10)).is_none());
    }
}
