//! CPU/GPU overlap bookkeeping for the explicit backend.
//!
//! Each of the [`FRAMES_IN_FLIGHT`] slots owns one fence and two semaphores.
//! Before a slot is reused its fence is waited, and before a swapchain image
//! is recorded into, the fence of whichever slot last submitted it is waited
//! too.

use anyhow::Result;

use super::device::ExplicitDevice;

pub const FRAMES_IN_FLIGHT: usize = 2;

#[derive(Debug, Copy, Clone)]
pub struct FrameSlot<F, S> {
    /// Signaled when the slot's last submission retired. Created signaled.
    pub in_flight: F,
    pub image_available: S,
    pub render_finished: S,
}

#[derive(Debug)]
pub struct FrameSync<F, S> {
    slots: Vec<FrameSlot<F, S>>,
    current: usize,
    /// Fence of the submission that last used each swapchain image.
    images_in_flight: Vec<Option<F>>,
}

impl<F: Copy + Eq, S: Copy> FrameSync<F, S> {
    pub fn create<D>(device: &mut D) -> Result<Self>
    where
        D: ExplicitDevice<Fence = F, Semaphore = S>,
    {
        let mut sync = Self {
            slots: Vec::with_capacity(FRAMES_IN_FLIGHT),
            current: 0,
            images_in_flight: Vec::new(),
        };
        for _ in 0..FRAMES_IN_FLIGHT {
            match Self::create_slot(device) {
                Ok(slot) => sync.slots.push(slot),
                Err(err) => {
                    sync.destroy(device);
                    return Err(err);
                }
            }
        }
        Ok(sync)
    }

    fn create_slot<D>(device: &mut D) -> Result<FrameSlot<F, S>>
    where
        D: ExplicitDevice<Fence = F, Semaphore = S>,
    {
        let in_flight = device.create_fence(true)?;
        let image_available = match device.create_semaphore() {
            Ok(s) => s,
            Err(err) => {
                device.destroy_fence(in_flight);
                return Err(err);
            }
        };
        let render_finished = match device.create_semaphore() {
            Ok(s) => s,
            Err(err) => {
                device.destroy_semaphore(image_available);
                device.destroy_fence(in_flight);
                return Err(err);
            }
        };
        Ok(FrameSlot { in_flight, image_available, render_finished })
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current(&self) -> FrameSlot<F, S> {
        self.slots[self.current]
    }

    /// Blocks until the current slot's previous submission has retired.
    pub fn wait_current<D>(&self, device: &mut D, timeout_ns: u64) -> Result<()>
    where
        D: ExplicitDevice<Fence = F, Semaphore = S>,
    {
        device.wait_fence(self.current().in_flight, timeout_ns)
    }

    /// Marks `image` as owned by the current slot, first waiting for the
    /// slot that still has it in flight.
    pub fn claim_image<D>(&mut self, device: &mut D, image: u32, timeout_ns: u64) -> Result<()>
    where
        D: ExplicitDevice<Fence = F, Semaphore = S>,
    {
        let index = image as usize;
        if index >= self.images_in_flight.len() {
            self.images_in_flight.resize(index + 1, None);
        }
        let fence = self.current().in_flight;
        if let Some(previous) = self.images_in_flight[index]
            && previous != fence
        {
            device.wait_fence(previous, timeout_ns)?;
        }
        self.images_in_flight[index] = Some(fence);
        Ok(())
    }

    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.slots.len().max(1);
    }

    /// Forgets image ownership after the swapchain was rebuilt.
    pub fn reset_images(&mut self, image_count: usize) {
        self.images_in_flight.clear();
        self.images_in_flight.resize(image_count, None);
    }

    pub fn destroy<D>(&mut self, device: &mut D)
    where
        D: ExplicitDevice<Fence = F, Semaphore = S>,
    {
        for slot in self.slots.drain(..) {
            device.destroy_semaphore(slot.render_finished);
            device.destroy_semaphore(slot.image_available);
            device.destroy_fence(slot.in_flight);
        }
        self.images_in_flight.clear();
        self.current = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::explicit::mock::MockDevice;

    #[test]
    fn slots_rotate_modulo_frames_in_flight() {
        let mut device = MockDevice::default();
        let mut sync = FrameSync::create(&mut device).unwrap();
        let first = sync.current().in_flight;
        sync.advance();
        assert_eq!(sync.current_index(), 1);
        assert_ne!(sync.current().in_flight, first);
        sync.advance();
        assert_eq!(sync.current().in_flight, first);
    }

    #[test]
    fn fresh_slots_do_not_block() {
        let mut device = MockDevice::default();
        let mut sync = FrameSync::create(&mut device).unwrap();
        for _ in 0..FRAMES_IN_FLIGHT {
            sync.wait_current(&mut device, u64::MAX).unwrap();
            sync.advance();
        }
        assert!(device.waits().iter().all(|(_, blocked)| !blocked));
    }

    #[test]
    fn claiming_an_image_waits_for_the_other_slot() {
        let mut device = MockDevice::default();
        let mut sync = FrameSync::create(&mut device).unwrap();
        sync.reset_images(2);

        let slot0 = sync.current().in_flight;
        sync.claim_image(&mut device, 1, u64::MAX).unwrap();
        device.reset_fence(slot0).unwrap();
        sync.advance();

        sync.claim_image(&mut device, 1, u64::MAX).unwrap();
        assert_eq!(device.waits(), vec![(slot0, true)]);
    }

    #[test]
    fn reclaiming_from_the_same_slot_does_not_wait() {
        let mut device = MockDevice::default();
        let mut sync = FrameSync::create(&mut device).unwrap();
        sync.claim_image(&mut device, 0, u64::MAX).unwrap();
        sync.claim_image(&mut device, 0, u64::MAX).unwrap();
        assert!(device.waits().is_empty());
    }

    #[test]
    fn destroy_releases_every_object() {
        let mut device = MockDevice::default();
        let mut sync = FrameSync::create(&mut device).unwrap();
        assert_eq!(device.fences.len(), FRAMES_IN_FLIGHT);
        assert_eq!(device.semaphores.len(), 2 * FRAMES_IN_FLIGHT);
        sync.destroy(&mut device);
        assert!(device.fences.is_empty());
        assert!(device.semaphores.is_empty());
    }
}
