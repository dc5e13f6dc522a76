//! Frame pacing and swapchain-synchronized sequencing
//!
//! [`FrameScheduler`] owns the CPU side of the frames-in-flight protocol:
//! which slot is current, when its fence may be reset, and how swapchain
//! staleness feeds back into recreation. The GPU side is behind
//! [`FrameDevice`] so the sequencing itself stays testable.

/// Result of asking the device for the next swapchain image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Image acquired; value is the swapchain image index
    Acquired(u32),
    /// Swapchain no longer matches the surface
    OutOfDate,
}

/// Result of queueing an image for presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Image queued normally
    Presented,
    /// Image queued, but the swapchain should be rebuilt soon
    Suboptimal,
    /// Swapchain no longer matches the surface
    OutOfDate,
}

/// Outcome of [`FrameScheduler::begin_frame`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameBegin {
    /// Frame slot is free and an image is acquired
    Ready {
        /// Swapchain image index to render into
        image_index: u32,
    },
    /// Acquire failed; recreate the swapchain and skip this frame
    SwapchainOutOfDate,
}

/// Outcome of [`FrameScheduler::end_frame`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameEnd {
    /// Frame submitted and queued for presentation
    Presented,
    /// Frame submitted, but the swapchain must be rebuilt before the next one
    PresentedNeedsRecreate,
}

/// GPU operations the scheduler sequences, keyed by frame slot
///
/// Implementations map `slot` to that frame's fence and semaphores. The
/// contract mirrors the underlying API: a slot's fence starts signaled, a
/// wait blocks until its last submit completes, and a reset must only happen
/// once new work is certain to be submitted for that slot.
pub trait FrameDevice {
    /// Error type surfaced by device calls
    type Error;

    /// Block until slot's previous submission has fully completed
    fn wait_for_fence(&mut self, slot: usize) -> Result<(), Self::Error>;

    /// Acquire the next swapchain image, signaling slot's acquire semaphore
    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome, Self::Error>;

    /// Return slot's fence to the unsignaled state
    fn reset_fence(&mut self, slot: usize) -> Result<(), Self::Error>;

    /// Submit recorded commands for slot, fencing on slot's fence
    fn submit(&mut self, slot: usize, image_index: u32) -> Result<(), Self::Error>;

    /// Queue `image_index` for presentation after slot's render completes
    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome, Self::Error>;
}

/// CPU-side frame pacing state
///
/// Slots advance modulo the frames-in-flight count, and only after a
/// successful submit. A skipped frame leaves the slot untouched so its
/// still-signaled fence is reused on the next attempt.
pub struct FrameScheduler {
    frames_in_flight: usize,
    current_frame: usize,
    frame_number: u64,
    resize_generation: u64,
    handled_resize_generation: u64,
    pending_extent: Option<(u32, u32)>,
}

impl FrameScheduler {
    /// Create a scheduler for `frames_in_flight` slots
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            frames_in_flight: frames_in_flight.max(1),
            current_frame: 0,
            frame_number: 0,
            resize_generation: 0,
            handled_resize_generation: 0,
            pending_extent: None,
        }
    }

    /// Frame slot the next frame will use
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// Total frames submitted since creation
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Number of frame slots
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Record a new framebuffer size reported by the windowing system
    ///
    /// Safe to call at any point; the size is applied at the next
    /// [`Self::take_pending_resize`]. Repeated calls coalesce, keeping only
    /// the latest extent.
    pub fn notify_resize(&mut self, width: u32, height: u32) {
        self.pending_extent = Some((width, height));
        self.resize_generation += 1;
    }

    /// Consume the latest unhandled resize, if any
    ///
    /// Returns `Some` exactly once per burst of resize notifications, so a
    /// drag that fires dozens of events still costs one swapchain rebuild.
    pub fn take_pending_resize(&mut self) -> Option<(u32, u32)> {
        if self.resize_generation == self.handled_resize_generation {
            return None;
        }
        self.handled_resize_generation = self.resize_generation;
        self.pending_extent.take()
    }

    /// Whether a resize notification is waiting to be handled
    pub fn has_pending_resize(&self) -> bool {
        self.resize_generation != self.handled_resize_generation
    }

    /// Run the begin-of-frame sequence for the current slot
    ///
    /// Waits on the slot's fence, acquires an image, and only then resets
    /// the fence. On [`FrameBegin::SwapchainOutOfDate`] nothing was reset
    /// and the slot does not advance.
    pub fn begin_frame<D: FrameDevice>(&mut self, device: &mut D) -> Result<FrameBegin, D::Error> {
        let slot = self.current_frame;
        device.wait_for_fence(slot)?;
        match device.acquire_image(slot)? {
            AcquireOutcome::OutOfDate => Ok(FrameBegin::SwapchainOutOfDate),
            AcquireOutcome::Acquired(image_index) => {
                // Reset only now: an early reset with no matching submit
                // would deadlock the next wait on this slot.
                device.reset_fence(slot)?;
                Ok(FrameBegin::Ready { image_index })
            }
        }
    }

    /// Run the end-of-frame sequence and advance to the next slot
    pub fn end_frame<D: FrameDevice>(
        &mut self,
        device: &mut D,
        image_index: u32,
    ) -> Result<FrameEnd, D::Error> {
        let slot = self.current_frame;
        device.submit(slot, image_index)?;
        let outcome = device.present(slot, image_index)?;

        self.frame_number += 1;
        self.current_frame = (self.current_frame + 1) % self.frames_in_flight;

        Ok(match outcome {
            PresentOutcome::Presented => FrameEnd::Presented,
            PresentOutcome::Suboptimal | PresentOutcome::OutOfDate => {
                FrameEnd::PresentedNeedsRecreate
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        WaitFence(usize),
        Acquire(usize),
        ResetFence(usize),
        Submit(usize, u32),
        Present(usize, u32),
    }

    /// Device double: signaled-state fences, round-robin image indices,
    /// and scriptable acquire/present outcomes.
    struct FakeDevice {
        events: Vec<Event>,
        fence_signaled: Vec<bool>,
        image_count: u32,
        next_image: u32,
        acquire_results: Vec<AcquireOutcome>,
        present_results: Vec<PresentOutcome>,
    }

    impl FakeDevice {
        fn new(frames_in_flight: usize, image_count: u32) -> Self {
            Self {
                events: Vec::new(),
                // Fences are created signaled so frame 0 does not block.
                fence_signaled: vec![true; frames_in_flight],
                image_count,
                next_image: 0,
                acquire_results: Vec::new(),
                present_results: Vec::new(),
            }
        }

        fn script_acquire(&mut self, outcome: AcquireOutcome) {
            self.acquire_results.push(outcome);
        }

        fn script_present(&mut self, outcome: PresentOutcome) {
            self.present_results.push(outcome);
        }

        fn presented_count(&self) -> usize {
            self.events
                .iter()
                .filter(|e| matches!(e, Event::Present(_, _)))
                .count()
        }

        fn slot_sequence(&self) -> Vec<usize> {
            self.events
                .iter()
                .filter_map(|e| match e {
                    Event::Submit(slot, _) => Some(*slot),
                    _ => None,
                })
                .collect()
        }
    }

    impl FrameDevice for FakeDevice {
        type Error = String;

        fn wait_for_fence(&mut self, slot: usize) -> Result<(), String> {
            self.events.push(Event::WaitFence(slot));
            // Real waits block until the GPU signals; here unsignaled means
            // no submit ever followed a reset, which is the deadlock the
            // scheduler must never create.
            if !self.fence_signaled[slot] {
                return Err(format!("deadlock: waiting on unsignaled fence {slot}"));
            }
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome, String> {
            self.events.push(Event::Acquire(slot));
            if let Some(outcome) = self.acquire_results.pop() {
                return Ok(outcome);
            }
            let image = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count;
            Ok(AcquireOutcome::Acquired(image))
        }

        fn reset_fence(&mut self, slot: usize) -> Result<(), String> {
            self.events.push(Event::ResetFence(slot));
            self.fence_signaled[slot] = false;
            Ok(())
        }

        fn submit(&mut self, slot: usize, image_index: u32) -> Result<(), String> {
            self.events.push(Event::Submit(slot, image_index));
            if self.fence_signaled[slot] {
                return Err(format!("submit on slot {slot} without a fence reset"));
            }
            // Work completes immediately; the fence signals.
            self.fence_signaled[slot] = true;
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome, String> {
            self.events.push(Event::Present(slot, image_index));
            if let Some(outcome) = self.present_results.pop() {
                return Ok(outcome);
            }
            Ok(PresentOutcome::Presented)
        }
    }

    fn run_frame(scheduler: &mut FrameScheduler, device: &mut FakeDevice) -> FrameEnd {
        match scheduler.begin_frame(device).unwrap() {
            FrameBegin::Ready { image_index } => scheduler.end_frame(device, image_index).unwrap(),
            FrameBegin::SwapchainOutOfDate => panic!("unexpected out-of-date"),
        }
    }

    #[test]
    fn test_two_frames_in_flight_alternate_slots() {
        let mut scheduler = FrameScheduler::new(2);
        let mut device = FakeDevice::new(2, 3);

        for _ in 0..5 {
            assert_eq!(run_frame(&mut scheduler, &mut device), FrameEnd::Presented);
        }

        assert_eq!(device.slot_sequence(), vec![0, 1, 0, 1, 0]);
        assert_eq!(device.presented_count(), 5);
        assert_eq!(scheduler.frame_number(), 5);
        assert_eq!(scheduler.current_frame(), 1);
    }

    #[test]
    fn test_fence_reset_happens_after_wait_and_before_submit() {
        let mut scheduler = FrameScheduler::new(2);
        let mut device = FakeDevice::new(2, 3);

        for _ in 0..6 {
            run_frame(&mut scheduler, &mut device);
        }

        // Per slot: strict wait -> reset -> submit cycles, no reset without
        // a preceding wait and no second reset before the submit.
        for slot in 0..2 {
            let mut expecting = Event::WaitFence(slot);
            for event in device.events.iter().filter(|e| {
                matches!(e,
                    Event::WaitFence(s) | Event::ResetFence(s) | Event::Submit(s, _) if *s == slot)
            }) {
                match event {
                    Event::WaitFence(_) => {
                        assert_eq!(expecting, Event::WaitFence(slot));
                        expecting = Event::ResetFence(slot);
                    }
                    Event::ResetFence(_) => {
                        assert_eq!(expecting, Event::ResetFence(slot));
                        expecting = Event::Submit(slot, 0);
                    }
                    Event::Submit(_, _) => {
                        assert!(matches!(expecting, Event::Submit(_, _)));
                        expecting = Event::WaitFence(slot);
                    }
                    _ => unreachable!(),
                }
            }
        }
    }

    #[test]
    fn test_out_of_date_acquire_skips_without_reset_or_advance() {
        let mut scheduler = FrameScheduler::new(2);
        let mut device = FakeDevice::new(2, 3);
        device.script_acquire(AcquireOutcome::OutOfDate);

        let begin = scheduler.begin_frame(&mut device).unwrap();
        assert_eq!(begin, FrameBegin::SwapchainOutOfDate);
        assert!(!device.events.contains(&Event::ResetFence(0)));
        assert_eq!(scheduler.current_frame(), 0);
        assert_eq!(scheduler.frame_number(), 0);

        // The very next frame reuses slot 0 and completes normally.
        assert_eq!(run_frame(&mut scheduler, &mut device), FrameEnd::Presented);
        assert_eq!(scheduler.current_frame(), 1);
    }

    #[test]
    fn test_suboptimal_present_still_counts_and_advances() {
        let mut scheduler = FrameScheduler::new(2);
        let mut device = FakeDevice::new(2, 3);
        device.script_present(PresentOutcome::Suboptimal);

        assert_eq!(run_frame(&mut scheduler, &mut device), FrameEnd::PresentedNeedsRecreate);
        assert_eq!(device.presented_count(), 1);
        assert_eq!(scheduler.frame_number(), 1);
        assert_eq!(scheduler.current_frame(), 1);
    }

    #[test]
    fn test_single_frame_in_flight_reuses_slot_zero() {
        let mut scheduler = FrameScheduler::new(1);
        let mut device = FakeDevice::new(1, 2);

        for _ in 0..3 {
            run_frame(&mut scheduler, &mut device);
        }
        assert_eq!(device.slot_sequence(), vec![0, 0, 0]);
    }

    #[test]
    fn test_resize_burst_coalesces_to_one_recreation() {
        let mut scheduler = FrameScheduler::new(2);

        scheduler.notify_resize(317, 200);
        scheduler.notify_resize(355, 251);
        scheduler.notify_resize(400, 300);
        assert!(scheduler.has_pending_resize());

        assert_eq!(scheduler.take_pending_resize(), Some((400, 300)));
        assert_eq!(scheduler.take_pending_resize(), None);
        assert!(!scheduler.has_pending_resize());
    }

    #[test]
    fn test_resize_after_handling_is_seen_again() {
        let mut scheduler = FrameScheduler::new(2);
        scheduler.notify_resize(800, 600);
        assert_eq!(scheduler.take_pending_resize(), Some((800, 600)));

        scheduler.notify_resize(1024, 768);
        assert_eq!(scheduler.take_pending_resize(), Some((1024, 768)));
    }
}
