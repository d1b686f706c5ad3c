// SPDX-License-Identifier: CEPL-1.0
//! What the frame orchestrator does after the swapchain answers an acquire
//! or a present.

use crate::RenderSize;

/// Swapchain health as reported by acquire or present.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceStatus {
    Optimal,
    /// Still usable, but no longer matches the surface exactly.
    Suboptimal,
    OutOfDate,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SwapchainOutcome<E> {
    Continue,
    Recreate,
    Fatal(E),
}

/// After acquire: an out of date swapchain skips the frame and is rebuilt.
/// A suboptimal one still draws; presentation rebuilds it afterwards.
pub fn acquire_outcome<E>(status: Result<SurfaceStatus, E>) -> SwapchainOutcome<E> {
    match status {
        Ok(SurfaceStatus::Optimal | SurfaceStatus::Suboptimal) => SwapchainOutcome::Continue,
        Ok(SurfaceStatus::OutOfDate) => SwapchainOutcome::Recreate,
        Err(e) => SwapchainOutcome::Fatal(e),
    }
}

/// After present: any staleness, or a resize the window reported since the
/// last rebuild, triggers a rebuild.
pub fn present_outcome<E>(status: Result<SurfaceStatus, E>, resized: bool) -> SwapchainOutcome<E> {
    match status {
        Err(e) => SwapchainOutcome::Fatal(e),
        Ok(SurfaceStatus::Optimal) if !resized => SwapchainOutcome::Continue,
        Ok(_) => SwapchainOutcome::Recreate,
    }
}

/// Tracks a swapchain rebuild that has to wait until the window has a
/// drawable area again.
#[derive(Debug, Default)]
pub struct RecreateGate {
    pending: bool,
}

impl RecreateGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks for a rebuild at `extent`. Returns the extent to build at, or
    /// `None` while the window is minimised; the request then stays pending.
    pub fn request(&mut self, extent: RenderSize) -> Option<RenderSize> {
        self.pending = true;
        (!extent.is_zero()).then_some(extent)
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Marks the requested rebuild as done.
    pub fn complete(&mut self) {
        self.pending = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Outcome = SwapchainOutcome<&'static str>;

    #[test]
    fn acquire_draws_unless_out_of_date() {
        assert_eq!(acquire_outcome::<&str>(Ok(SurfaceStatus::Optimal)), Outcome::Continue);
        assert_eq!(acquire_outcome::<&str>(Ok(SurfaceStatus::Suboptimal)), Outcome::Continue);
        assert_eq!(acquire_outcome::<&str>(Ok(SurfaceStatus::OutOfDate)), Outcome::Recreate);
    }

    #[test]
    fn acquire_errors_are_fatal() {
        assert_eq!(acquire_outcome(Err("device lost")), Outcome::Fatal("device lost"));
    }

    #[test]
    fn present_recreates_on_stale_swapchain() {
        assert_eq!(present_outcome::<&str>(Ok(SurfaceStatus::Suboptimal), false), Outcome::Recreate);
        assert_eq!(present_outcome::<&str>(Ok(SurfaceStatus::OutOfDate), false), Outcome::Recreate);
    }

    #[test]
    fn present_recreates_after_resize() {
        assert_eq!(present_outcome::<&str>(Ok(SurfaceStatus::Optimal), true), Outcome::Recreate);
        assert_eq!(present_outcome::<&str>(Ok(SurfaceStatus::Optimal), false), Outcome::Continue);
    }

    #[test]
    fn present_errors_are_fatal_even_when_resized() {
        assert_eq!(present_outcome(Err("surface lost"), true), Outcome::Fatal("surface lost"));
        assert_eq!(present_outcome(Err("surface lost"), false), Outcome::Fatal("surface lost"));
    }

    #[test]
    fn zero_extent_defers_until_window_has_area() {
        let mut gate = RecreateGate::new();
        assert!(!gate.is_pending());

        assert_eq!(gate.request(RenderSize { width: 0, height: 600 }), None);
        assert!(gate.is_pending());
        assert_eq!(gate.request(RenderSize { width: 800, height: 0 }), None);
        assert!(gate.is_pending());

        let size = RenderSize { width: 800, height: 600 };
        assert_eq!(gate.request(size), Some(size));
        gate.complete();
        assert!(!gate.is_pending());
    }
}
