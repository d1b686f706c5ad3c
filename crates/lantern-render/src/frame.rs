// SPDX-License-Identifier: CEPL-1.0

/// Frames the CPU may record ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FramePhase {
    Idle,
    InProgress { image_index: u32 },
}

/// Bookkeeping half of the frame orchestrator: which phase we are in, which
/// swapchain image the current frame targets and which in-flight slot it
/// records into. Calling out of order is a programming error and panics.
#[derive(Debug)]
pub struct FrameCycle {
    phase: FramePhase,
    frame_index: usize,
}

impl Default for FrameCycle {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCycle {
    pub fn new() -> Self {
        Self {
            phase: FramePhase::Idle,
            frame_index: 0,
        }
    }

    pub fn begin(&mut self, image_index: u32) {
        assert!(
            self.phase == FramePhase::Idle,
            "can't begin a frame while one is already in progress"
        );
        self.phase = FramePhase::InProgress { image_index };
    }

    /// Leaves the in-progress phase, returning the image that was targeted,
    /// and advances the in-flight slot.
    pub fn end(&mut self) -> u32 {
        let FramePhase::InProgress { image_index } = self.phase else {
            panic!("can't end a frame that was never begun");
        };
        self.phase = FramePhase::Idle;
        self.frame_index = (self.frame_index + 1) % MAX_FRAMES_IN_FLIGHT;
        image_index
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self.phase, FramePhase::InProgress { .. })
    }

    /// Image acquired for the current frame.
    ///
    /// Panics when no frame is in progress.
    pub fn image_index(&self) -> u32 {
        match self.phase {
            FramePhase::InProgress { image_index } => image_index,
            FramePhase::Idle => panic!("no frame in progress"),
        }
    }

    /// Slot in `[0, MAX_FRAMES_IN_FLIGHT)`; valid in either phase.
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_cycles_through_frames_in_flight() {
        let mut cycle = FrameCycle::new();
        let mut seen = Vec::new();
        for image in 0..5 {
            seen.push(cycle.frame_index());
            cycle.begin(image % 3);
            assert_eq!(cycle.image_index(), image % 3);
            assert_eq!(cycle.end(), image % 3);
        }
        assert_eq!(seen, vec![0, 1, 0, 1, 0]);
        assert!(!cycle.is_in_progress());
    }

    #[test]
    fn frame_index_is_stable_while_recording() {
        let mut cycle = FrameCycle::new();
        cycle.begin(2);
        assert_eq!(cycle.frame_index(), 0);
        assert_eq!(cycle.phase(), FramePhase::InProgress { image_index: 2 });
    }

    #[test]
    #[should_panic(expected = "already in progress")]
    fn double_begin_panics() {
        let mut cycle = FrameCycle::new();
        cycle.begin(0);
        cycle.begin(1);
    }

    #[test]
    #[should_panic(expected = "never begun")]
    fn end_without_begin_panics() {
        FrameCycle::new().end();
    }

    #[test]
    #[should_panic(expected = "no frame in progress")]
    fn image_index_outside_frame_panics() {
        FrameCycle::new().image_index();
    }
}
