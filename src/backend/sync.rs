// Synchronization primitives and per-frame resources
//
// Fences, semaphores, command buffers and mapped uniform buffers for the
// frame pool, plus the queue submission that ties them together.

use ash::prelude::VkResult;
use ash::vk;

use super::buffer::MappedBuffer;
use super::VulkanDevice;
use crate::frame::gpu::{FrameDevice, Submission};

impl FrameDevice for VulkanDevice {
    type UniformBuffer = MappedBuffer;

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        unsafe { self.device.create_semaphore(&semaphore_info, None) }
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence_info = vk::FenceCreateInfo::builder().flags(flags);
        unsafe { self.device.create_fence(&fence_info, None) }
    }

    fn allocate_command_buffer(&self) -> VkResult<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = unsafe { self.device.allocate_command_buffers(&alloc_info) }?;
        buffers
            .into_iter()
            .next()
            .ok_or(vk::Result::ERROR_OUT_OF_HOST_MEMORY)
    }

    fn create_uniform_buffer(&self, size: vk::DeviceSize) -> VkResult<MappedBuffer> {
        MappedBuffer::new(self, "frame uniforms", size, vk::BufferUsageFlags::UNIFORM_BUFFER)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }

    fn free_command_buffer(&self, command_buffer: vk::CommandBuffer) {
        unsafe {
            self.device
                .free_command_buffers(self.command_pool, &[command_buffer])
        };
    }

    fn destroy_uniform_buffer(&self, buffer: MappedBuffer) {
        buffer.destroy(self);
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> VkResult<()> {
        unsafe { self.device.wait_for_fences(&[fence], true, timeout) }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        unsafe { self.device.reset_fences(&[fence]) }
    }

    fn fence_status(&self, fence: vk::Fence) -> VkResult<bool> {
        unsafe { self.device.get_fence_status(fence) }
    }

    fn submit(&self, queue: vk::Queue, submission: &Submission) -> VkResult<()> {
        let wait_semaphores = [submission.wait];
        let wait_stages = [submission.wait_stage];
        let command_buffers = [submission.command_buffer];
        let signal_semaphores = [submission.signal];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .queue_submit(queue, &[submit_info.build()], submission.fence)
        }
    }
}
