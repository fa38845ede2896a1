// Shader module loading
//
// Vulkan consumes SPIR-V words. Blobs are read from disk at startup and
// realigned to u32 by `ash::util::read_spv`.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;
use std::path::Path;

use super::VulkanDevice;
use crate::error::{ObjectKind, ResourceCreationError};

/// Read a compiled SPIR-V file into words
pub fn load_spirv(path: &Path) -> Result<Vec<u32>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read shader {}", path.display()))?;
    parse_spirv(&bytes).with_context(|| format!("Invalid SPIR-V in {}", path.display()))
}

fn parse_spirv(bytes: &[u8]) -> Result<Vec<u32>> {
    let words = ash::util::read_spv(&mut Cursor::new(bytes))?;
    Ok(words)
}

/// Create a shader module from SPIR-V words
pub fn create_shader_module(device: &VulkanDevice, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

    let module = unsafe { device.device.create_shader_module(&create_info, None) }
        .map_err(|e| ResourceCreationError::new(ObjectKind::ShaderModule, e))?;
    Ok(module)
}
