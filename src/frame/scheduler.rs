// Frame Scheduler - one render-loop iteration per call
//
// WaitSlot -> AcquireImage -> UpdateState -> Record -> Submit -> Present.
// A stale acquire ends the iteration before anything is reset or submitted;
// stale or suboptimal results only ever invalidate the swapchain, which is
// rebuilt at the start of the next iteration.

use std::sync::Arc;
use std::time::Instant;

use ash::vk;

use super::gpu::{Drawable, Gpu, HostMapped, Submission};
use super::pool::FramePool;
use super::swapchain::{AcquireOutcome, SwapchainManager};
use crate::error::{FrameError, FrameOp, SetupError, TransientPresentationError};
use crate::mesh::UniformBufferObject;

/// Everything one frame binds and draws.
#[derive(Debug, Clone)]
pub struct DrawResources {
    pub pipeline: vk::Pipeline,
    pub pipeline_layout: vk::PipelineLayout,
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
    /// One per frame slot, indexed like the pool
    pub descriptor_sets: Vec<vk::DescriptorSet>,
    pub clear_color: [f32; 4],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Work was submitted and the image handed to the presentation engine.
    Presented,
    /// The swapchain went stale at acquire; nothing was submitted.
    Aborted,
    /// The window closed while minimized; no swapchain to draw into.
    Skipped,
}

pub struct FrameScheduler<G: Gpu> {
    gpu: Arc<G>,
    swapchain: SwapchainManager<G>,
    pool: FramePool<G>,
    draw: DrawResources,
    frame_counter: u64,
    started: Instant,
}

impl<G: Gpu> FrameScheduler<G> {
    /// `draw` must carry one descriptor set per pool slot.
    pub fn new(
        gpu: Arc<G>,
        swapchain: SwapchainManager<G>,
        pool: FramePool<G>,
        draw: DrawResources,
    ) -> Result<Self, FrameError> {
        if draw.descriptor_sets.len() != pool.len() {
            return Err(SetupError::DescriptorSetCount {
                slots: pool.len(),
                sets: draw.descriptor_sets.len(),
            }
            .into());
        }

        Ok(Self {
            gpu,
            swapchain,
            pool,
            draw,
            frame_counter: 0,
            started: Instant::now(),
        })
    }

    /// Iterations started so far, including aborted and skipped ones.
    #[cfg(test)]
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    #[cfg(test)]
    pub fn swapchain(&self) -> &SwapchainManager<G> {
        &self.swapchain
    }

    #[cfg(test)]
    pub fn pool(&self) -> &FramePool<G> {
        &self.pool
    }

    /// Run one iteration of the render loop.
    pub fn draw_frame<W: Drawable + ?Sized>(
        &mut self,
        window: &mut W,
    ) -> Result<FrameOutcome, FrameError> {
        let frame = self.frame_counter;
        self.frame_counter += 1;

        if window.take_resized() {
            self.swapchain
                .invalidate(TransientPresentationError::OutOfDate);
        }
        if !self.swapchain.is_valid() {
            if !self.swapchain.rebuild(window)? {
                return Ok(FrameOutcome::Skipped);
            }
            // Resizes seen while rebuilding are already reflected
            window.take_resized();
        }

        let slot_index = self.pool.slot_index(frame);
        let slot = self.pool.slot(frame);
        let (command_buffer, image_available, render_finished, in_flight) = (
            slot.command_buffer,
            slot.image_available,
            slot.render_finished,
            slot.in_flight,
        );

        // WaitSlot
        self.gpu
            .wait_for_fence(in_flight, u64::MAX)
            .map_err(|e| FrameError::fatal(FrameOp::WaitSlot, e))?;

        // AcquireImage
        let (image, acquired_suboptimal) = match self.swapchain.acquire(image_available)? {
            AcquireOutcome::Ready { image, suboptimal } => (image, suboptimal),
            AcquireOutcome::Stale => {
                self.swapchain
                    .invalidate(TransientPresentationError::OutOfDate);
                return Ok(FrameOutcome::Aborted);
            }
        };
        let framebuffer = match self.swapchain.framebuffer(image) {
            Some(framebuffer) => framebuffer,
            None => {
                self.swapchain
                    .invalidate(TransientPresentationError::OutOfDate);
                return Ok(FrameOutcome::Aborted);
            }
        };
        let extent = self.swapchain.extent();

        // UpdateState
        let ubo = UniformBufferObject::at(self.started.elapsed().as_secs_f32(), extent);
        self.pool
            .slot_mut(frame)
            .uniform
            .write(bytemuck::bytes_of(&ubo))
            .map_err(|e| FrameError::fatal(FrameOp::UpdateState, e))?;

        // Record
        self.record(
            command_buffer,
            framebuffer,
            extent,
            self.draw.descriptor_sets[slot_index],
        )
        .map_err(|e| FrameError::fatal(FrameOp::Record, e))?;

        // Submit
        self.gpu
            .reset_fence(in_flight)
            .map_err(|e| FrameError::fatal(FrameOp::Submit, e))?;
        let submission = Submission {
            command_buffer,
            wait: image_available,
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            signal: render_finished,
            fence: in_flight,
        };
        self.gpu
            .submit(self.gpu.graphics_queue(), &submission)
            .map_err(|e| FrameError::fatal(FrameOp::Submit, e))?;

        // Present
        let presented = self
            .swapchain
            .present(self.gpu.present_queue(), image, render_finished)?;
        let reason = presented.or(acquired_suboptimal.then_some(TransientPresentationError::Suboptimal));
        if let Some(reason) = reason {
            self.swapchain.invalidate(reason);
        }

        Ok(FrameOutcome::Presented)
    }

    /// Host loop: pump events and draw until the window asks to close.
    ///
    /// `after_frame` runs after every iteration. Returns the number of
    /// frames presented.
    pub fn run<W, F>(&mut self, window: &mut W, mut after_frame: F) -> Result<u64, FrameError>
    where
        W: Drawable + ?Sized,
        F: FnMut(&mut W, FrameOutcome),
    {
        let mut presented = 0;
        while !window.should_close() {
            window.pump_events();
            if window.should_close() {
                break;
            }

            let outcome = self.draw_frame(window)?;
            if outcome == FrameOutcome::Presented {
                presented += 1;
            }
            after_frame(window, outcome);
        }
        Ok(presented)
    }

    fn record(
        &self,
        cmd: vk::CommandBuffer,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        descriptor_set: vk::DescriptorSet,
    ) -> ash::prelude::VkResult<()> {
        let gpu = self.gpu.as_ref();
        let draw = &self.draw;

        gpu.reset_command_buffer(cmd)?;
        gpu.begin_command_buffer(cmd)?;

        gpu.cmd_begin_render_pass(
            cmd,
            self.swapchain.render_pass(),
            framebuffer,
            extent,
            draw.clear_color,
        );
        gpu.cmd_bind_pipeline(cmd, draw.pipeline);
        gpu.cmd_bind_vertex_buffer(cmd, draw.vertex_buffer);
        gpu.cmd_bind_index_buffer(cmd, draw.index_buffer, vk::IndexType::UINT16);
        gpu.cmd_bind_descriptor_set(cmd, draw.pipeline_layout, descriptor_set);

        // Extent changes across rebuilds, so viewport and scissor are dynamic
        gpu.cmd_set_viewport(
            cmd,
            vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            },
        );
        gpu.cmd_set_scissor(
            cmd,
            vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
        );

        gpu.cmd_draw_indexed(cmd, draw.index_count);
        gpu.cmd_end_render_pass(cmd);

        gpu.end_command_buffer(cmd)
    }
}

impl<G: Gpu> Drop for FrameScheduler<G> {
    fn drop(&mut self) {
        // Drain the GPU before the pool and swapchain fields are destroyed
        if let Err(e) = self.gpu.wait_idle() {
            log::error!("Failed to wait for device idle on shutdown: {}", e);
        }
        log::info!("Frame scheduler stopped after {} frames", self.frame_counter);
    }
}
