// Backend module - Vulkan implementation of the frame core's device traits
//
// VulkanDevice is the device context; the other modules implement the
// swapchain, frame-resource and recording traits on it, plus the setup-time
// helpers (buffers, shaders, pipeline) the render context needs.

pub mod buffer;
pub mod command;
pub mod device;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use device::VulkanDevice;
