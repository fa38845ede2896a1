//! Error taxonomy for the frame core.
//!
//! Setup and resource-creation failures are fatal. Stale or suboptimal
//! surfaces are not errors for the caller: they only ever travel as the
//! reason a swapchain was invalidated, and are recovered by a rebuild.

use std::fmt;

use ash::vk;
use thiserror::Error;

/// The kind of GPU object whose creation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Swapchain,
    ImageView,
    Framebuffer,
    RenderPass,
    DescriptorSetLayout,
    DescriptorPool,
    DescriptorSet,
    PipelineLayout,
    Pipeline,
    ShaderModule,
    CommandBuffer,
    Semaphore,
    Fence,
    UniformBuffer,
    Buffer,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectKind::Swapchain => "swapchain",
            ObjectKind::ImageView => "image view",
            ObjectKind::Framebuffer => "framebuffer",
            ObjectKind::RenderPass => "render pass",
            ObjectKind::DescriptorSetLayout => "descriptor set layout",
            ObjectKind::DescriptorPool => "descriptor pool",
            ObjectKind::DescriptorSet => "descriptor set",
            ObjectKind::PipelineLayout => "pipeline layout",
            ObjectKind::Pipeline => "graphics pipeline",
            ObjectKind::ShaderModule => "shader module",
            ObjectKind::CommandBuffer => "command buffer",
            ObjectKind::Semaphore => "semaphore",
            ObjectKind::Fence => "fence",
            ObjectKind::UniformBuffer => "uniform buffer",
            ObjectKind::Buffer => "buffer",
        };
        f.write_str(name)
    }
}

/// One step of a frame-loop iteration, used to name the failing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameOp {
    WaitSlot,
    AcquireImage,
    UpdateState,
    Record,
    Submit,
    Present,
    WaitIdle,
    QuerySurface,
}

impl fmt::Display for FrameOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameOp::WaitSlot => "wait for frame slot",
            FrameOp::AcquireImage => "acquire swapchain image",
            FrameOp::UpdateState => "update frame state",
            FrameOp::Record => "record command buffer",
            FrameOp::Submit => "submit command buffer",
            FrameOp::Present => "present swapchain image",
            FrameOp::WaitIdle => "wait for device idle",
            FrameOp::QuerySurface => "query surface support",
        };
        f.write_str(name)
    }
}

/// Fatal failure before the render loop starts.
#[derive(Error, Debug)]
pub enum SetupError {
    /// Failed to load the Vulkan library
    #[error("Failed to load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),

    /// No device offers graphics, present and swapchain support for the surface
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// The surface reports no formats at all
    #[error("Surface reports no supported formats")]
    NoSurfaceFormats,

    /// Frame pool sized below double buffering
    #[error("At least 2 frames in flight are required, got {0}")]
    TooFewFrames(usize),

    /// Draw resources carry a descriptor set count different from the pool size
    #[error("Expected one descriptor set per frame slot ({slots}), got {sets}")]
    DescriptorSetCount { slots: usize, sets: usize },

    /// Any other Vulkan call failing during setup
    #[error("Vulkan setup failed while trying to {step}: {source}")]
    Vulkan {
        step: &'static str,
        #[source]
        source: vk::Result,
    },
}

/// Failure creating a GPU object.
///
/// `index` is set when the object is one of a sequence (the n-th image view,
/// the n-th frame slot's fence, ...).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to create {kind}{}: {source}", index_suffix(.index))]
pub struct ResourceCreationError {
    pub kind: ObjectKind,
    pub index: Option<usize>,
    #[source]
    pub source: vk::Result,
}

impl ResourceCreationError {
    pub fn new(kind: ObjectKind, source: vk::Result) -> Self {
        Self {
            kind,
            index: None,
            source,
        }
    }

    pub fn at(kind: ObjectKind, index: usize, source: vk::Result) -> Self {
        Self {
            kind,
            index: Some(index),
            source,
        }
    }
}

fn index_suffix(index: &Option<usize>) -> String {
    index.map(|i| format!(" #{i}")).unwrap_or_default()
}

/// Presentation-engine signal that the swapchain must be rebuilt.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientPresentationError {
    #[error("swapchain out of date")]
    OutOfDate,
    #[error("swapchain suboptimal")]
    Suboptimal,
}

impl TransientPresentationError {
    /// Maps a Vulkan error code to a transient signal, if it is one.
    pub fn from_vk(result: vk::Result) -> Option<Self> {
        match result {
            vk::Result::ERROR_OUT_OF_DATE_KHR => Some(Self::OutOfDate),
            vk::Result::SUBOPTIMAL_KHR => Some(Self::Suboptimal),
            _ => None,
        }
    }
}

/// Anything that stops the frame loop.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error(transparent)]
    Resource(#[from] ResourceCreationError),

    /// A non-transient failure of acquire, submit, present or a wait
    #[error("Failed to {op}: {source}")]
    FatalPresentation {
        op: FrameOp,
        #[source]
        source: vk::Result,
    },
}

impl FrameError {
    pub fn fatal(op: FrameOp, source: vk::Result) -> Self {
        FrameError::FatalPresentation { op, source }
    }

    /// The failing frame operation, for fatal presentation errors.
    #[cfg(test)]
    pub fn op(&self) -> Option<FrameOp> {
        match self {
            FrameError::FatalPresentation { op, .. } => Some(*op),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_error_names_kind_and_index() {
        let err = ResourceCreationError::at(
            ObjectKind::ImageView,
            2,
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
        );
        let message = err.to_string();
        assert!(message.starts_with("Failed to create image view #2"), "{message}");

        let err = ResourceCreationError::new(ObjectKind::Swapchain, vk::Result::ERROR_INITIALIZATION_FAILED);
        assert!(err.to_string().starts_with("Failed to create swapchain:"));
    }

    #[test]
    fn transient_mapping_only_covers_stale_and_suboptimal() {
        assert_eq!(
            TransientPresentationError::from_vk(vk::Result::ERROR_OUT_OF_DATE_KHR),
            Some(TransientPresentationError::OutOfDate)
        );
        assert_eq!(
            TransientPresentationError::from_vk(vk::Result::SUBOPTIMAL_KHR),
            Some(TransientPresentationError::Suboptimal)
        );
        assert_eq!(TransientPresentationError::from_vk(vk::Result::ERROR_SURFACE_LOST_KHR), None);
        assert_eq!(TransientPresentationError::from_vk(vk::Result::ERROR_DEVICE_LOST), None);
    }

    #[test]
    fn fatal_error_reports_operation() {
        let err = FrameError::fatal(FrameOp::Present, vk::Result::ERROR_SURFACE_LOST_KHR);
        assert_eq!(err.op(), Some(FrameOp::Present));
        assert!(err.to_string().starts_with("Failed to present swapchain image"));
    }
}
