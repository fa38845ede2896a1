// Render Context - the Vulkan ownership graph, built leaves first
//
// device -> render pass -> swapchain manager -> frame pool -> pipeline,
// descriptor sets and mesh buffers -> scheduler. Fields are declared so they
// drop in the reverse order: the scheduler (which drains the GPU first), then
// everything it referenced, then the device.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::gpu::{DeviceContext, Drawable, HostMapped};
use super::pool::FramePool;
use super::scheduler::{DrawResources, FrameOutcome, FrameScheduler};
use super::swapchain::{choose_surface_format, SwapchainManager};
use crate::backend::buffer::GpuBuffer;
use crate::backend::pipeline::{ColorPass, QuadPipeline};
use crate::backend::shader::load_spirv;
use crate::backend::VulkanDevice;
use crate::config::Config;
use crate::error::{FrameError, FrameOp, SetupError};
use crate::mesh::{UniformBufferObject, QUAD_INDICES, QUAD_VERTICES};
use crate::window::WindowHost;

pub struct RenderContext {
    scheduler: FrameScheduler<VulkanDevice>,
    _pipeline: QuadPipeline,
    _index_buffer: GpuBuffer,
    _vertex_buffer: GpuBuffer,
    _render_pass: ColorPass,
    _device: Arc<VulkanDevice>,
}

impl RenderContext {
    pub fn new(config: &Config, window: &mut WindowHost) -> Result<Self> {
        log::info!("Initializing Vulkan...");

        // Validation layers only in debug builds
        let enable_validation = cfg!(debug_assertions) && config.debug.validation_layers;
        let device = VulkanDevice::new(&config.window.title, window.window(), enable_validation)?;

        // The surface format is fixed for the life of the render pass
        let formats = device
            .surface_formats()
            .map_err(|e| FrameError::fatal(FrameOp::QuerySurface, e))?;
        let surface_format = choose_surface_format(&formats, config.preferred_surface_format())
            .ok_or(SetupError::NoSurfaceFormats)?;
        log::info!(
            "Surface format: {:?} / {:?}",
            surface_format.format,
            surface_format.color_space
        );

        let render_pass = ColorPass::new(&device, surface_format.format)
            .context("Failed to create render pass")?;

        let swapchain =
            SwapchainManager::new(device.clone(), render_pass.handle, surface_format, window)
                .context("Failed to create swapchain")?;

        let pool = FramePool::new(
            device.clone(),
            config.graphics.max_frames_in_flight,
            UniformBufferObject::SIZE,
        )
        .context("Failed to create frame resources")?;

        let vert_code = load_spirv(&config.assets.vertex_shader)?;
        let frag_code = load_spirv(&config.assets.fragment_shader)?;
        let uniform_buffers: Vec<(vk::Buffer, vk::DeviceSize)> = (0..pool.len() as u64)
            .map(|frame| {
                let uniform = &pool.slot(frame).uniform;
                (uniform.handle(), uniform.size())
            })
            .collect();
        let pipeline = QuadPipeline::new(
            &device,
            render_pass.handle,
            &vert_code,
            &frag_code,
            &uniform_buffers,
        )
        .context("Failed to create graphics pipeline")?;

        let vertex_buffer = GpuBuffer::upload(
            &device,
            "quad vertices",
            vk::BufferUsageFlags::VERTEX_BUFFER,
            bytemuck::cast_slice(&QUAD_VERTICES),
        )?;
        let index_buffer = GpuBuffer::upload(
            &device,
            "quad indices",
            vk::BufferUsageFlags::INDEX_BUFFER,
            bytemuck::cast_slice(&QUAD_INDICES),
        )?;

        let draw = DrawResources {
            pipeline: pipeline.pipeline,
            pipeline_layout: pipeline.layout,
            vertex_buffer: vertex_buffer.buffer,
            index_buffer: index_buffer.buffer,
            index_count: QUAD_INDICES.len() as u32,
            descriptor_sets: pipeline.descriptor_sets.clone(),
            clear_color: config.graphics.clear_color,
        };
        let scheduler = FrameScheduler::new(device.clone(), swapchain, pool, draw)?;

        log::info!("Vulkan initialized successfully!");
        Ok(Self {
            scheduler,
            _pipeline: pipeline,
            _index_buffer: index_buffer,
            _vertex_buffer: vertex_buffer,
            _render_pass: render_pass,
            _device: device,
        })
    }

    /// Drive the render loop until `window` asks to close.
    ///
    /// Returns the number of frames presented.
    pub fn run<W, F>(&mut self, window: &mut W, after_frame: F) -> Result<u64, FrameError>
    where
        W: Drawable + ?Sized,
        F: FnMut(&mut W, FrameOutcome),
    {
        self.scheduler.run(window, after_frame)
    }
}
