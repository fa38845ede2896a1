// Graphics pipeline creation and management
//
// One colour-only render pass targeting the swapchain format, and the quad
// pipeline: vertex input, one uniform buffer per frame slot through its own
// descriptor set, no depth, and viewport/scissor left dynamic so the pipeline
// survives swapchain rebuilds.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::shader::create_shader_module;
use super::VulkanDevice;
use crate::error::{ObjectKind, ResourceCreationError};
use crate::mesh::Vertex;

/// Render pass with a single colour attachment, cleared and presented
pub struct ColorPass {
    pub handle: vk::RenderPass,
    device: Arc<VulkanDevice>,
}

impl ColorPass {
    pub fn new(device: &Arc<VulkanDevice>, format: vk::Format) -> Result<Self> {
        // Color attachment (the swapchain image)
        let color_attachment = vk::AttachmentDescription::builder()
            .format(format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .build();

        let color_attachment_ref = vk::AttachmentReference::builder()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .build();

        let color_attachments = &[color_attachment_ref];
        let subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(color_attachments)
            .build();

        // The acquire semaphore is waited on at colour output, so the layout
        // transition has to wait for that stage too
        let dependency = vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .build();

        let attachments = &[color_attachment];
        let subpasses = &[subpass];
        let dependencies = &[dependency];

        let render_pass_info = vk::RenderPassCreateInfo::builder()
            .attachments(attachments)
            .subpasses(subpasses)
            .dependencies(dependencies);

        let handle = unsafe { device.device.create_render_pass(&render_pass_info, None) }
            .map_err(|e| ResourceCreationError::new(ObjectKind::RenderPass, e))?;

        Ok(Self {
            handle,
            device: device.clone(),
        })
    }
}

impl Drop for ColorPass {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_render_pass(self.handle, None) };
    }
}

/// The quad pipeline and its descriptor sets.
///
/// Handles are filled in as construction proceeds; dropping a partially
/// built value destroys only what exists.
pub struct QuadPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    /// One per uniform buffer, in the order they were given
    pub descriptor_sets: Vec<vk::DescriptorSet>,
    set_layout: vk::DescriptorSetLayout,
    descriptor_pool: vk::DescriptorPool,
    device: Arc<VulkanDevice>,
}

impl QuadPipeline {
    /// Build the pipeline for `render_pass` from SPIR-V words, with a
    /// descriptor set pointing at each of `uniform_buffers`
    pub fn new(
        device: &Arc<VulkanDevice>,
        render_pass: vk::RenderPass,
        vert_code: &[u32],
        frag_code: &[u32],
        uniform_buffers: &[(vk::Buffer, vk::DeviceSize)],
    ) -> Result<Self> {
        let mut this = Self {
            pipeline: vk::Pipeline::null(),
            layout: vk::PipelineLayout::null(),
            descriptor_sets: Vec::new(),
            set_layout: vk::DescriptorSetLayout::null(),
            descriptor_pool: vk::DescriptorPool::null(),
            device: device.clone(),
        };

        this.set_layout = create_descriptor_set_layout(device)?;
        this.descriptor_pool = create_descriptor_pool(device, uniform_buffers.len() as u32)?;
        this.descriptor_sets =
            allocate_descriptor_sets(device, this.descriptor_pool, this.set_layout, uniform_buffers)?;

        let set_layouts = [this.set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);
        this.layout = unsafe { device.device.create_pipeline_layout(&layout_info, None) }
            .map_err(|e| ResourceCreationError::new(ObjectKind::PipelineLayout, e))?;

        // Modules are only needed until the pipeline exists
        let vert_module = create_shader_module(device, vert_code).context("Vertex shader")?;
        let frag_module = match create_shader_module(device, frag_code) {
            Ok(module) => module,
            Err(e) => {
                unsafe { device.device.destroy_shader_module(vert_module, None) };
                return Err(e.context("Fragment shader"));
            }
        };

        let pipeline = create_graphics_pipeline(
            device,
            render_pass,
            this.layout,
            vert_module,
            frag_module,
        );
        unsafe {
            device.device.destroy_shader_module(vert_module, None);
            device.device.destroy_shader_module(frag_module, None);
        }
        this.pipeline = pipeline?;

        log::info!(
            "Created graphics pipeline with {} descriptor sets",
            this.descriptor_sets.len()
        );
        Ok(this)
    }
}

impl Drop for QuadPipeline {
    fn drop(&mut self) {
        // Null handles are ignored by vkDestroy*; sets go with their pool
        unsafe {
            let device = &self.device.device;
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
            device.destroy_descriptor_pool(self.descriptor_pool, None);
            device.destroy_descriptor_set_layout(self.set_layout, None);
        }
    }
}

/// Binding 0: one uniform buffer read by the vertex stage
fn create_descriptor_set_layout(device: &VulkanDevice) -> Result<vk::DescriptorSetLayout> {
    let binding = vk::DescriptorSetLayoutBinding::builder()
        .binding(0)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .descriptor_count(1)
        .stage_flags(vk::ShaderStageFlags::VERTEX)
        .build();

    let bindings = [binding];
    let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);

    let layout = unsafe { device.device.create_descriptor_set_layout(&layout_info, None) }
        .map_err(|e| ResourceCreationError::new(ObjectKind::DescriptorSetLayout, e))?;
    Ok(layout)
}

fn create_descriptor_pool(device: &VulkanDevice, set_count: u32) -> Result<vk::DescriptorPool> {
    let pool_sizes = [vk::DescriptorPoolSize {
        ty: vk::DescriptorType::UNIFORM_BUFFER,
        descriptor_count: set_count,
    }];
    let pool_info = vk::DescriptorPoolCreateInfo::builder()
        .pool_sizes(&pool_sizes)
        .max_sets(set_count);

    let pool = unsafe { device.device.create_descriptor_pool(&pool_info, None) }
        .map_err(|e| ResourceCreationError::new(ObjectKind::DescriptorPool, e))?;
    Ok(pool)
}

fn allocate_descriptor_sets(
    device: &VulkanDevice,
    pool: vk::DescriptorPool,
    layout: vk::DescriptorSetLayout,
    uniform_buffers: &[(vk::Buffer, vk::DeviceSize)],
) -> Result<Vec<vk::DescriptorSet>> {
    let layouts = vec![layout; uniform_buffers.len()];
    let alloc_info = vk::DescriptorSetAllocateInfo::builder()
        .descriptor_pool(pool)
        .set_layouts(&layouts);

    let sets = unsafe { device.device.allocate_descriptor_sets(&alloc_info) }
        .map_err(|e| ResourceCreationError::new(ObjectKind::DescriptorSet, e))?;

    for (&set, &(buffer, range)) in sets.iter().zip(uniform_buffers) {
        let buffer_info = [vk::DescriptorBufferInfo {
            buffer,
            offset: 0,
            range,
        }];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(0)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(&buffer_info)
            .build();

        unsafe { device.device.update_descriptor_sets(&[write], &[]) };
    }

    Ok(sets)
}

fn create_graphics_pipeline(
    device: &VulkanDevice,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    vert_shader: vk::ShaderModule,
    frag_shader: vk::ShaderModule,
) -> Result<vk::Pipeline> {
    // Shader stages
    let entry_point = c"main";

    let vert_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::VERTEX)
        .module(vert_shader)
        .name(entry_point)
        .build();

    let frag_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::FRAGMENT)
        .module(frag_shader)
        .name(entry_point)
        .build();

    let shader_stages = &[vert_stage, frag_stage];

    // Vertex input
    let bindings = [Vertex::binding_description()];
    let attributes = Vertex::attribute_descriptions();
    let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);

    // Input assembly
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    // Viewport and scissor are set per frame; only their counts live here
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewport_count(1)
        .scissor_count(1);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

    // Rasterization
    let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::NONE)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .depth_bias_enable(false);

    // Multisampling (disabled)
    let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    // Color blending (no blending, opaque)
    let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(false)
        .build();

    let color_blend_attachments = &[color_blend_attachment];
    let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .attachments(color_blend_attachments);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(shader_stages)
        .vertex_input_state(&vertex_input_info)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterizer)
        .multisample_state(&multisampling)
        .color_blend_state(&color_blending)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0)
        .build();

    let pipelines = unsafe {
        device
            .device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    }
    .map_err(|(_, e)| ResourceCreationError::new(ObjectKind::Pipeline, e))?;

    pipelines
        .into_iter()
        .next()
        .context("Driver returned no pipeline")
}
