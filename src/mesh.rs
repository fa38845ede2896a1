// Mesh data and per-frame transforms
//
// A single coloured quad, drawn indexed, plus the model/view/projection
// block every frame writes into its slot's uniform buffer.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 2],
    pub color: [f32; 3],
}

impl Vertex {
    const fn new(pos: [f32; 2], color: [f32; 3]) -> Self {
        Self { pos, color }
    }

    /// One interleaved binding at slot 0
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(std::mem::size_of::<Self>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()
    }

    /// Position at location 0, colour at location 1
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
        let pos = vk::VertexInputAttributeDescription::builder()
            .binding(0)
            .location(0)
            .format(vk::Format::R32G32_SFLOAT)
            .offset(0)
            .build();

        let color = vk::VertexInputAttributeDescription::builder()
            .binding(0)
            .location(1)
            .format(vk::Format::R32G32B32_SFLOAT)
            .offset(std::mem::size_of::<[f32; 2]>() as u32)
            .build();

        [pos, color]
    }
}

pub const QUAD_VERTICES: [Vertex; 4] = [
    Vertex::new([-0.5, -0.5], [1.0, 0.0, 0.0]),
    Vertex::new([0.5, -0.5], [0.0, 1.0, 0.0]),
    Vertex::new([0.5, 0.5], [0.0, 0.0, 1.0]),
    Vertex::new([-0.5, 0.5], [1.0, 1.0, 1.0]),
];

pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 2, 3, 0];

/// Matches the vertex shader's `binding = 0` uniform block.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct UniformBufferObject {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl UniformBufferObject {
    pub const SIZE: vk::DeviceSize = std::mem::size_of::<Self>() as vk::DeviceSize;

    /// Transforms `elapsed` seconds after start for a target of `extent`.
    ///
    /// The quad spins 90 degrees per second about +Z, seen from (2, 2, 2).
    pub fn at(elapsed: f32, extent: vk::Extent2D) -> Self {
        let model = Mat4::from_rotation_z(elapsed * 90f32.to_radians());
        let view = Mat4::look_at_rh(Vec3::splat(2.0), Vec3::ZERO, Vec3::Z);

        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let mut proj = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 10.0);
        // Vulkan clip space has +Y pointing down
        proj.y_axis.y *= -1.0;

        Self { model, view, proj }
    }
}
