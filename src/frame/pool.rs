// Frame Resource Pool - fixed ring of per-frame-in-flight resources
//
// Each slot owns a command buffer, an image-available and a render-finished
// semaphore, a fence, and a persistently mapped uniform buffer. Fences start
// signaled so the first wait on every slot returns immediately.

use std::sync::Arc;

use ash::vk;

use super::gpu::FrameDevice;
use crate::error::{FrameError, ObjectKind, ResourceCreationError, SetupError};

/// Smallest supported ring: double buffering.
pub const MIN_FRAMES_IN_FLIGHT: usize = 2;

/// Resources for one frame in flight.
///
/// Must not be re-recorded, nor its uniform buffer rewritten, until
/// `in_flight` has been observed signaled.
pub struct FrameSlot<U> {
    pub command_buffer: vk::CommandBuffer,
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
    pub uniform: U,
}

pub struct FramePool<G: FrameDevice> {
    gpu: Arc<G>,
    slots: Vec<FrameSlot<G::UniformBuffer>>,
}

impl<G: FrameDevice> FramePool<G> {
    /// Create `frames_in_flight` slots, each with a `uniform_size`-byte
    /// uniform buffer.
    pub fn new(
        gpu: Arc<G>,
        frames_in_flight: usize,
        uniform_size: vk::DeviceSize,
    ) -> Result<Self, FrameError> {
        if frames_in_flight < MIN_FRAMES_IN_FLIGHT {
            return Err(SetupError::TooFewFrames(frames_in_flight).into());
        }

        let mut slots = Vec::with_capacity(frames_in_flight);
        for index in 0..frames_in_flight {
            match create_slot(gpu.as_ref(), uniform_size) {
                Ok(slot) => slots.push(slot),
                Err((kind, e)) => {
                    while let Some(slot) = slots.pop() {
                        destroy_slot(gpu.as_ref(), slot);
                    }
                    return Err(ResourceCreationError::at(kind, index, e).into());
                }
            }
        }

        log::info!(
            "Created {} frame slots ({} byte uniform buffers)",
            frames_in_flight,
            uniform_size
        );
        Ok(Self { gpu, slots })
    }

    /// Number of slots, N.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Slot used by frame `frame`: `frame mod N`.
    pub fn slot_index(&self, frame: u64) -> usize {
        (frame % self.slots.len() as u64) as usize
    }

    pub fn slot(&self, frame: u64) -> &FrameSlot<G::UniformBuffer> {
        &self.slots[self.slot_index(frame)]
    }

    pub fn slot_mut(&mut self, frame: u64) -> &mut FrameSlot<G::UniformBuffer> {
        let index = self.slot_index(frame);
        &mut self.slots[index]
    }

    /// Slots whose fence is currently unsignaled.
    #[cfg(test)]
    pub fn in_flight_count(&self) -> ash::prelude::VkResult<usize> {
        let mut count = 0;
        for slot in &self.slots {
            if !self.gpu.fence_status(slot.in_flight)? {
                count += 1;
            }
        }
        Ok(count)
    }
}

impl<G: FrameDevice> Drop for FramePool<G> {
    fn drop(&mut self) {
        while let Some(slot) = self.slots.pop() {
            destroy_slot(self.gpu.as_ref(), slot);
        }
    }
}

// Command buffer -> semaphores -> fence -> uniform buffer. On failure the
// objects already created for this slot are released in reverse.
fn create_slot<G: FrameDevice + ?Sized>(
    gpu: &G,
    uniform_size: vk::DeviceSize,
) -> Result<FrameSlot<G::UniformBuffer>, (ObjectKind, vk::Result)> {
    let command_buffer = gpu
        .allocate_command_buffer()
        .map_err(|e| (ObjectKind::CommandBuffer, e))?;

    let image_available = match gpu.create_semaphore() {
        Ok(semaphore) => semaphore,
        Err(e) => {
            gpu.free_command_buffer(command_buffer);
            return Err((ObjectKind::Semaphore, e));
        }
    };

    let render_finished = match gpu.create_semaphore() {
        Ok(semaphore) => semaphore,
        Err(e) => {
            gpu.destroy_semaphore(image_available);
            gpu.free_command_buffer(command_buffer);
            return Err((ObjectKind::Semaphore, e));
        }
    };

    let in_flight = match gpu.create_fence(true) {
        Ok(fence) => fence,
        Err(e) => {
            gpu.destroy_semaphore(render_finished);
            gpu.destroy_semaphore(image_available);
            gpu.free_command_buffer(command_buffer);
            return Err((ObjectKind::Fence, e));
        }
    };

    let uniform = match gpu.create_uniform_buffer(uniform_size) {
        Ok(buffer) => buffer,
        Err(e) => {
            gpu.destroy_fence(in_flight);
            gpu.destroy_semaphore(render_finished);
            gpu.destroy_semaphore(image_available);
            gpu.free_command_buffer(command_buffer);
            return Err((ObjectKind::UniformBuffer, e));
        }
    };

    Ok(FrameSlot {
        command_buffer,
        image_available,
        render_finished,
        in_flight,
        uniform,
    })
}

fn destroy_slot<G: FrameDevice + ?Sized>(gpu: &G, slot: FrameSlot<G::UniformBuffer>) {
    gpu.destroy_uniform_buffer(slot.uniform);
    gpu.destroy_fence(slot.in_flight);
    gpu.destroy_semaphore(slot.render_finished);
    gpu.destroy_semaphore(slot.image_available);
    gpu.free_command_buffer(slot.command_buffer);
}
