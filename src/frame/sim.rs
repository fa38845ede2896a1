// Simulated device and window for driving the frame core without a GPU
//
// SimGpu records every call, hands out fresh handles, and models fences:
// a submission stays pending until its fence is waited on or the device is
// idled. It panics on the misuse a validation layer would report (submitting
// with a signaled fence, resetting a command buffer the GPU still owns,
// waiting on a fence nothing will signal, touching a destroyed swapchain).

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::sync::Arc;

use ash::prelude::VkResult;
use ash::vk::{self, Handle};

use super::gpu::{
    CommandRecorder, DeviceContext, Drawable, FrameDevice, HostMapped, Submission,
    SwapchainDesc, SwapchainDevice,
};
use crate::error::{FrameOp, ObjectKind};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    WaitIdle,
    CreateSwapchain {
        extent: vk::Extent2D,
        image_count: u32,
    },
    DestroySwapchain(vk::SwapchainKHR),
    CreateImageView(vk::ImageView),
    DestroyImageView(vk::ImageView),
    CreateFramebuffer {
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
    },
    DestroyFramebuffer(vk::Framebuffer),
    Acquire {
        signal: vk::Semaphore,
    },
    Present {
        queue: vk::Queue,
        image_index: u32,
        wait: vk::Semaphore,
    },
    WaitFence {
        fence: vk::Fence,
        blocked: bool,
    },
    ResetFence(vk::Fence),
    Submit {
        queue: vk::Queue,
        command_buffer: vk::CommandBuffer,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    },
    WriteUniform {
        buffer: vk::Buffer,
        len: usize,
    },
    ResetCommandBuffer(vk::CommandBuffer),
    BeginCommandBuffer(vk::CommandBuffer),
    EndCommandBuffer(vk::CommandBuffer),
    BeginRenderPass {
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    },
    EndRenderPass,
    BindPipeline(vk::Pipeline),
    BindVertexBuffer(vk::Buffer),
    BindIndexBuffer(vk::Buffer, vk::IndexType),
    BindDescriptorSet(vk::DescriptorSet),
    SetViewport {
        width: f32,
        height: f32,
    },
    SetScissor(vk::Rect2D),
    DrawIndexed(u32),
}

impl Call {
    /// Short name, for asserting on call order.
    pub fn name(&self) -> &'static str {
        match self {
            Call::WaitIdle => "wait idle",
            Call::CreateSwapchain { .. } => "create swapchain",
            Call::DestroySwapchain(_) => "destroy swapchain",
            Call::CreateImageView(_) => "create view",
            Call::DestroyImageView(_) => "destroy view",
            Call::CreateFramebuffer { .. } => "create framebuffer",
            Call::DestroyFramebuffer(_) => "destroy framebuffer",
            Call::Acquire { .. } => "acquire",
            Call::Present { .. } => "present",
            Call::WaitFence { .. } => "wait fence",
            Call::ResetFence(_) => "reset fence",
            Call::Submit { .. } => "submit",
            Call::WriteUniform { .. } => "write uniform",
            Call::ResetCommandBuffer(_) => "reset commands",
            Call::BeginCommandBuffer(_) => "begin commands",
            Call::EndCommandBuffer(_) => "end commands",
            Call::BeginRenderPass { .. } => "begin render pass",
            Call::EndRenderPass => "end render pass",
            Call::BindPipeline(_) => "bind pipeline",
            Call::BindVertexBuffer(_) => "bind vertex buffer",
            Call::BindIndexBuffer(..) => "bind index buffer",
            Call::BindDescriptorSet(_) => "bind descriptor set",
            Call::SetViewport { .. } => "set viewport",
            Call::SetScissor(_) => "set scissor",
            Call::DrawIndexed(_) => "draw indexed",
        }
    }
}

struct SimChain {
    image_count: u32,
    next_image: u32,
}

pub struct SimGpu {
    log: Rc<RefCell<Vec<Call>>>,
    next_handle: Cell<u64>,
    caps: RefCell<vk::SurfaceCapabilitiesKHR>,
    formats: RefCell<Vec<vk::SurfaceFormatKHR>>,
    swapchains: RefCell<HashMap<vk::SwapchainKHR, SimChain>>,
    // true = signaled
    fences: RefCell<HashMap<vk::Fence, bool>>,
    pending: RefCell<Vec<(vk::Fence, vk::CommandBuffer)>>,
    max_unsignaled: Cell<usize>,
    acquire_script: RefCell<VecDeque<VkResult<bool>>>,
    present_script: RefCell<VecDeque<VkResult<bool>>>,
    creation_failures: RefCell<HashMap<ObjectKind, (usize, vk::Result)>>,
    op_failures: RefCell<HashMap<FrameOp, vk::Result>>,
    live: RefCell<HashMap<ObjectKind, usize>>,
}

impl SimGpu {
    pub fn new() -> Arc<Self> {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        };
        let formats = vec![
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];

        Arc::new(Self {
            log: Rc::new(RefCell::new(Vec::new())),
            next_handle: Cell::new(0x1000),
            caps: RefCell::new(caps),
            formats: RefCell::new(formats),
            swapchains: RefCell::new(HashMap::new()),
            fences: RefCell::new(HashMap::new()),
            pending: RefCell::new(Vec::new()),
            max_unsignaled: Cell::new(0),
            acquire_script: RefCell::new(VecDeque::new()),
            present_script: RefCell::new(VecDeque::new()),
            creation_failures: RefCell::new(HashMap::new()),
            op_failures: RefCell::new(HashMap::new()),
            live: RefCell::new(HashMap::new()),
        })
    }

    pub fn render_pass() -> vk::RenderPass {
        vk::RenderPass::from_raw(0x52)
    }

    pub fn graphics_queue_handle() -> vk::Queue {
        vk::Queue::from_raw(0x90)
    }

    pub fn present_queue_handle() -> vk::Queue {
        vk::Queue::from_raw(0x91)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.log.borrow().clone()
    }

    pub fn clear_calls(&self) {
        self.log.borrow_mut().clear();
    }

    pub fn set_capabilities(&self, caps: vk::SurfaceCapabilitiesKHR) {
        *self.caps.borrow_mut() = caps;
    }

    /// Results for the next acquires: `Ok(suboptimal)` or an error code.
    /// Unscripted acquires succeed.
    pub fn script_acquire(&self, results: impl IntoIterator<Item = VkResult<bool>>) {
        self.acquire_script.borrow_mut().extend(results);
    }

    /// Results for the next presents, as for `script_acquire`.
    pub fn script_present(&self, results: impl IntoIterator<Item = VkResult<bool>>) {
        self.present_script.borrow_mut().extend(results);
    }

    /// Fail the creation of the `nth` (0-based) `kind` object created from now on.
    pub fn fail_creation(&self, kind: ObjectKind, nth: usize, result: vk::Result) {
        self.creation_failures
            .borrow_mut()
            .insert(kind, (nth, result));
    }

    /// Fail the next device call belonging to `op`.
    pub fn fail_next(&self, op: FrameOp, result: vk::Result) {
        self.op_failures.borrow_mut().insert(op, result);
    }

    /// Number of live objects of `kind`.
    pub fn live(&self, kind: ObjectKind) -> usize {
        self.live.borrow().get(&kind).copied().unwrap_or(0)
    }

    pub fn fence_signaled(&self, fence: vk::Fence) -> bool {
        self.fences.borrow().get(&fence).copied().unwrap_or(false)
    }

    /// Highest number of simultaneously unsignaled fences seen so far.
    pub fn max_unsignaled(&self) -> usize {
        self.max_unsignaled.get()
    }

    fn record(&self, call: Call) {
        self.log.borrow_mut().push(call);
    }

    fn handle<H: Handle>(&self) -> H {
        let raw = self.next_handle.get();
        self.next_handle.set(raw + 1);
        H::from_raw(raw)
    }

    fn take_op_failure(&self, op: FrameOp) -> VkResult<()> {
        match self.op_failures.borrow_mut().remove(&op) {
            Some(result) => Err(result),
            None => Ok(()),
        }
    }

    fn create<H: Handle>(&self, kind: ObjectKind) -> VkResult<H> {
        let mut failures = self.creation_failures.borrow_mut();
        if let Some((remaining, result)) = failures.get_mut(&kind) {
            if *remaining == 0 {
                let result = *result;
                failures.remove(&kind);
                return Err(result);
            }
            *remaining -= 1;
        }
        *self.live.borrow_mut().entry(kind).or_insert(0) += 1;
        Ok(self.handle())
    }

    fn destroy(&self, kind: ObjectKind) {
        let mut live = self.live.borrow_mut();
        let count = live.entry(kind).or_insert(0);
        assert!(*count > 0, "destroyed more {kind} objects than were created");
        *count -= 1;
    }

    fn unsignaled(&self) -> usize {
        self.fences.borrow().values().filter(|&&signaled| !signaled).count()
    }

    fn note_unsignaled(&self) {
        let now = self.unsignaled();
        if now > self.max_unsignaled.get() {
            self.max_unsignaled.set(now);
        }
    }

    fn complete(&self, fence: Option<vk::Fence>) {
        let mut pending = self.pending.borrow_mut();
        let mut fences = self.fences.borrow_mut();
        pending.retain(|&(f, _)| {
            if fence.map_or(true, |wanted| wanted == f) {
                fences.insert(f, true);
                false
            } else {
                true
            }
        });
    }

    fn assert_not_pending(&self, cmd: vk::CommandBuffer) {
        assert!(
            !self.pending.borrow().iter().any(|&(_, c)| c == cmd),
            "command buffer {cmd:?} touched while the GPU still owns it"
        );
    }
}

impl DeviceContext for SimGpu {
    fn graphics_queue(&self) -> vk::Queue {
        Self::graphics_queue_handle()
    }

    fn present_queue(&self) -> vk::Queue {
        Self::present_queue_handle()
    }

    fn physical_device(&self) -> vk::PhysicalDevice {
        vk::PhysicalDevice::from_raw(0x1)
    }

    fn wait_idle(&self) -> VkResult<()> {
        self.record(Call::WaitIdle);
        self.take_op_failure(FrameOp::WaitIdle)?;
        self.complete(None);
        Ok(())
    }

    fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        self.take_op_failure(FrameOp::QuerySurface)?;
        Ok(*self.caps.borrow())
    }

    fn surface_formats(&self) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        Ok(self.formats.borrow().clone())
    }

    fn present_modes(&self) -> VkResult<Vec<vk::PresentModeKHR>> {
        Ok(vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX])
    }
}

impl SwapchainDevice for SimGpu {
    fn create_swapchain(
        &self,
        desc: &SwapchainDesc,
    ) -> VkResult<(vk::SwapchainKHR, Vec<vk::Image>)> {
        let swapchain: vk::SwapchainKHR = self.create(ObjectKind::Swapchain)?;
        let images = (0..desc.image_count).map(|_| self.handle()).collect();
        self.swapchains.borrow_mut().insert(
            swapchain,
            SimChain {
                image_count: desc.image_count,
                next_image: 0,
            },
        );
        self.record(Call::CreateSwapchain {
            extent: desc.extent,
            image_count: desc.image_count,
        });
        Ok((swapchain, images))
    }

    fn create_image_view(&self, _image: vk::Image, _format: vk::Format) -> VkResult<vk::ImageView> {
        let view = self.create(ObjectKind::ImageView)?;
        self.record(Call::CreateImageView(view));
        Ok(view)
    }

    fn create_framebuffer(
        &self,
        _render_pass: vk::RenderPass,
        _view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> VkResult<vk::Framebuffer> {
        let framebuffer = self.create(ObjectKind::Framebuffer)?;
        self.record(Call::CreateFramebuffer {
            framebuffer,
            extent,
        });
        Ok(framebuffer)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.destroy(ObjectKind::Framebuffer);
        self.record(Call::DestroyFramebuffer(framebuffer));
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.destroy(ObjectKind::ImageView);
        self.record(Call::DestroyImageView(view));
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        self.swapchains.borrow_mut().remove(&swapchain);
        self.destroy(ObjectKind::Swapchain);
        self.record(Call::DestroySwapchain(swapchain));
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout: u64,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        self.record(Call::Acquire { signal });
        let mut swapchains = self.swapchains.borrow_mut();
        let chain = swapchains
            .get_mut(&swapchain)
            .unwrap_or_else(|| panic!("acquire on destroyed swapchain {swapchain:?}"));

        let suboptimal = match self.acquire_script.borrow_mut().pop_front() {
            Some(result) => result?,
            None => false,
        };
        let index = chain.next_image;
        chain.next_image = (chain.next_image + 1) % chain.image_count;
        Ok((index, suboptimal))
    }

    fn queue_present(
        &self,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool> {
        self.record(Call::Present {
            queue,
            image_index,
            wait,
        });
        assert!(
            self.swapchains.borrow().contains_key(&swapchain),
            "present on destroyed swapchain {swapchain:?}"
        );
        self.present_script
            .borrow_mut()
            .pop_front()
            .unwrap_or(Ok(false))
    }
}

/// Uniform buffer backed by a plain byte vector.
pub struct SimUniform {
    buffer: vk::Buffer,
    data: Vec<u8>,
    log: Rc<RefCell<Vec<Call>>>,
}

impl SimUniform {
    pub fn contents(&self) -> &[u8] {
        &self.data
    }
}

impl HostMapped for SimUniform {
    fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    fn size(&self) -> vk::DeviceSize {
        self.data.len() as vk::DeviceSize
    }

    fn write(&mut self, bytes: &[u8]) -> VkResult<()> {
        if bytes.len() > self.data.len() {
            return Err(vk::Result::ERROR_MEMORY_MAP_FAILED);
        }
        self.data[..bytes.len()].copy_from_slice(bytes);
        self.log.borrow_mut().push(Call::WriteUniform {
            buffer: self.buffer,
            len: bytes.len(),
        });
        Ok(())
    }
}

impl FrameDevice for SimGpu {
    type UniformBuffer = SimUniform;

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        self.create(ObjectKind::Semaphore)
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let fence = self.create(ObjectKind::Fence)?;
        self.fences.borrow_mut().insert(fence, signaled);
        self.note_unsignaled();
        Ok(fence)
    }

    fn allocate_command_buffer(&self) -> VkResult<vk::CommandBuffer> {
        self.create(ObjectKind::CommandBuffer)
    }

    fn create_uniform_buffer(&self, size: vk::DeviceSize) -> VkResult<SimUniform> {
        let buffer = self.create(ObjectKind::UniformBuffer)?;
        Ok(SimUniform {
            buffer,
            data: vec![0; size as usize],
            log: self.log.clone(),
        })
    }

    fn destroy_semaphore(&self, _semaphore: vk::Semaphore) {
        self.destroy(ObjectKind::Semaphore);
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.fences.borrow_mut().remove(&fence);
        self.destroy(ObjectKind::Fence);
    }

    fn free_command_buffer(&self, command_buffer: vk::CommandBuffer) {
        self.assert_not_pending(command_buffer);
        self.destroy(ObjectKind::CommandBuffer);
    }

    fn destroy_uniform_buffer(&self, _buffer: SimUniform) {
        self.destroy(ObjectKind::UniformBuffer);
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout: u64) -> VkResult<()> {
        self.take_op_failure(FrameOp::WaitSlot)?;
        let blocked = !self.fence_signaled(fence);
        self.record(Call::WaitFence { fence, blocked });
        if blocked {
            assert!(
                self.pending.borrow().iter().any(|&(f, _)| f == fence),
                "waiting on fence {fence:?} that no submission will signal"
            );
            self.complete(Some(fence));
        }
        Ok(())
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        self.record(Call::ResetFence(fence));
        self.fences.borrow_mut().insert(fence, false);
        self.note_unsignaled();
        Ok(())
    }

    fn fence_status(&self, fence: vk::Fence) -> VkResult<bool> {
        Ok(self.fence_signaled(fence))
    }

    fn submit(&self, queue: vk::Queue, submission: &Submission) -> VkResult<()> {
        self.take_op_failure(FrameOp::Submit)?;
        assert!(
            !self.fence_signaled(submission.fence),
            "submit with signaled fence {:?}",
            submission.fence
        );
        self.assert_not_pending(submission.command_buffer);
        assert_eq!(
            submission.wait_stage,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );
        self.record(Call::Submit {
            queue,
            command_buffer: submission.command_buffer,
            wait: submission.wait,
            signal: submission.signal,
            fence: submission.fence,
        });
        self.pending
            .borrow_mut()
            .push((submission.fence, submission.command_buffer));
        self.note_unsignaled();
        Ok(())
    }
}

impl CommandRecorder for SimGpu {
    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        self.take_op_failure(FrameOp::Record)?;
        self.assert_not_pending(cmd);
        self.record(Call::ResetCommandBuffer(cmd));
        Ok(())
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        self.assert_not_pending(cmd);
        self.record(Call::BeginCommandBuffer(cmd));
        Ok(())
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        self.record(Call::EndCommandBuffer(cmd));
        Ok(())
    }

    fn cmd_begin_render_pass(
        &self,
        _cmd: vk::CommandBuffer,
        _render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    ) {
        self.record(Call::BeginRenderPass {
            framebuffer,
            extent,
            clear_color,
        });
    }

    fn cmd_end_render_pass(&self, _cmd: vk::CommandBuffer) {
        self.record(Call::EndRenderPass);
    }

    fn cmd_bind_pipeline(&self, _cmd: vk::CommandBuffer, pipeline: vk::Pipeline) {
        self.record(Call::BindPipeline(pipeline));
    }

    fn cmd_bind_vertex_buffer(&self, _cmd: vk::CommandBuffer, buffer: vk::Buffer) {
        self.record(Call::BindVertexBuffer(buffer));
    }

    fn cmd_bind_index_buffer(
        &self,
        _cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        index_type: vk::IndexType,
    ) {
        self.record(Call::BindIndexBuffer(buffer, index_type));
    }

    fn cmd_bind_descriptor_set(
        &self,
        _cmd: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    ) {
        self.record(Call::BindDescriptorSet(set));
    }

    fn cmd_set_viewport(&self, _cmd: vk::CommandBuffer, viewport: vk::Viewport) {
        self.record(Call::SetViewport {
            width: viewport.width,
            height: viewport.height,
        });
    }

    fn cmd_set_scissor(&self, _cmd: vk::CommandBuffer, scissor: vk::Rect2D) {
        self.record(Call::SetScissor(scissor));
    }

    fn cmd_draw_indexed(&self, _cmd: vk::CommandBuffer, index_count: u32) {
        self.record(Call::DrawIndexed(index_count));
    }
}

/// Window with a scripted drawable size.
pub struct SimWindow {
    size: (u32, u32),
    queued_sizes: VecDeque<(u32, u32)>,
    waits: usize,
    pumps: usize,
    close_after_waits: Option<usize>,
    close_after_pumps: Option<usize>,
    closed: bool,
    resized: bool,
}

impl SimWindow {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: (width, height),
            queued_sizes: VecDeque::new(),
            waits: 0,
            pumps: 0,
            close_after_waits: None,
            close_after_pumps: None,
            closed: false,
            resized: false,
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.size = (width, height);
        self.resized = true;
    }

    /// Sizes reported after each successive `wait_events`.
    pub fn queue_sizes(&mut self, sizes: impl IntoIterator<Item = (u32, u32)>) {
        self.queued_sizes.extend(sizes);
    }

    /// Request close once `wait_events` has run `waits` more times.
    pub fn close_after_waits(&mut self, waits: usize) {
        self.close_after_waits = Some(self.waits + waits);
    }

    /// Request close once `pump_events` has run `pumps` more times.
    pub fn close_after_pumps(&mut self, pumps: usize) {
        self.close_after_pumps = Some(self.pumps + pumps);
    }

    pub fn waits(&self) -> usize {
        self.waits
    }

    pub fn pumps(&self) -> usize {
        self.pumps
    }
}

impl Drawable for SimWindow {
    fn drawable_size(&self) -> (u32, u32) {
        self.size
    }

    fn pump_events(&mut self) {
        self.pumps += 1;
        if self.close_after_pumps == Some(self.pumps) {
            self.closed = true;
        }
    }

    fn wait_events(&mut self) {
        self.waits += 1;
        if let Some(size) = self.queued_sizes.pop_front() {
            self.resized |= size != self.size;
            self.size = size;
        }
        if self.close_after_waits == Some(self.waits) {
            self.closed = true;
        }
    }

    fn should_close(&self) -> bool {
        self.closed
    }

    fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.resized)
    }
}
