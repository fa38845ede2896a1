//! Device and window boundaries consumed by the frame core.
//!
//! The core never talks to ash directly. It drives these traits, which the
//! Vulkan backend implements for `VulkanDevice` and the test simulator
//! implements for `SimGpu`. Vulkan handle types are the shared vocabulary.

use ash::prelude::VkResult;
use ash::vk;

/// Read-only device context: queues, idle wait and surface capability queries.
pub trait DeviceContext {
    fn graphics_queue(&self) -> vk::Queue;
    fn present_queue(&self) -> vk::Queue;
    fn physical_device(&self) -> vk::PhysicalDevice;

    /// Blocks until all submitted work on the device completes.
    fn wait_idle(&self) -> VkResult<()>;

    fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR>;
    fn surface_formats(&self) -> VkResult<Vec<vk::SurfaceFormatKHR>>;
    fn present_modes(&self) -> VkResult<Vec<vk::PresentModeKHR>>;
}

/// Parameters of one swapchain construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainDesc {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

/// Presentable image chain operations.
pub trait SwapchainDevice {
    /// Creates the swapchain and returns it with its images, in chain order.
    fn create_swapchain(&self, desc: &SwapchainDesc) -> VkResult<(vk::SwapchainKHR, Vec<vk::Image>)>;
    fn create_image_view(&self, image: vk::Image, format: vk::Format) -> VkResult<vk::ImageView>;
    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> VkResult<vk::Framebuffer>;

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);
    fn destroy_image_view(&self, view: vk::ImageView);
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);

    /// Returns `(image_index, suboptimal)`; `ERROR_OUT_OF_DATE_KHR` when stale.
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)>;

    /// Returns `true` when the swapchain is suboptimal.
    fn queue_present(
        &self,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool>;
}

/// Host-visible memory that stays mapped for the lifetime of its buffer.
pub trait HostMapped {
    fn handle(&self) -> vk::Buffer;
    fn size(&self) -> vk::DeviceSize;
    /// Copies `bytes` to the start of the mapping. Coherent memory, no flush.
    fn write(&mut self, bytes: &[u8]) -> VkResult<()>;
}

/// One queue submission: wait on `wait` at `wait_stage`, signal `signal`
/// and, on GPU completion, `fence`.
#[derive(Debug, Clone, Copy)]
pub struct Submission {
    pub command_buffer: vk::CommandBuffer,
    pub wait: vk::Semaphore,
    pub wait_stage: vk::PipelineStageFlags,
    pub signal: vk::Semaphore,
    pub fence: vk::Fence,
}

/// Per-frame synchronization and recording resources.
pub trait FrameDevice {
    type UniformBuffer: HostMapped;

    fn create_semaphore(&self) -> VkResult<vk::Semaphore>;
    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence>;
    fn allocate_command_buffer(&self) -> VkResult<vk::CommandBuffer>;
    fn create_uniform_buffer(&self, size: vk::DeviceSize) -> VkResult<Self::UniformBuffer>;

    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn destroy_fence(&self, fence: vk::Fence);
    fn free_command_buffer(&self, command_buffer: vk::CommandBuffer);
    fn destroy_uniform_buffer(&self, buffer: Self::UniformBuffer);

    fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> VkResult<()>;
    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()>;
    /// `true` when signaled.
    fn fence_status(&self, fence: vk::Fence) -> VkResult<bool>;

    fn submit(&self, queue: vk::Queue, submission: &Submission) -> VkResult<()>;
}

/// Command buffer recording.
pub trait CommandRecorder {
    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()>;
    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()>;
    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()>;

    fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    );
    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer);

    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline);
    fn cmd_bind_vertex_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer);
    fn cmd_bind_index_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer, index_type: vk::IndexType);
    fn cmd_bind_descriptor_set(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    );

    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewport: vk::Viewport);
    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, scissor: vk::Rect2D);
    fn cmd_draw_indexed(&self, cmd: vk::CommandBuffer, index_count: u32);
}

/// Everything the frame core needs from a device.
pub trait Gpu: DeviceContext + SwapchainDevice + FrameDevice + CommandRecorder {}

impl<T> Gpu for T where T: DeviceContext + SwapchainDevice + FrameDevice + CommandRecorder {}

/// Windowing collaborator.
pub trait Drawable {
    /// Current drawable size in pixels; zero on an axis while minimized.
    fn drawable_size(&self) -> (u32, u32);
    /// Processes pending events without blocking.
    fn pump_events(&mut self);
    /// Blocks until at least one event arrives, then processes it.
    fn wait_events(&mut self);
    fn should_close(&self) -> bool;
    /// Whether the drawable was resized since the last call. Clears the flag.
    fn take_resized(&mut self) -> bool;
}
