// Buffer utilities for vertex, index, and uniform buffers
//
// Memory comes from gpu-allocator. Geometry is uploaded once through a
// host-visible staging buffer into device-local memory; uniform buffers
// live in host-visible, coherent memory and stay mapped until destroyed.

use anyhow::{Context, Result};
use ash::prelude::VkResult;
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::{AllocationError, MemoryLocation};
use std::sync::Arc;

use super::VulkanDevice;
use crate::error::{ObjectKind, ResourceCreationError};
use crate::frame::gpu::HostMapped;

/// Create a buffer and bind freshly allocated memory to it
fn create_allocated_buffer(
    device: &VulkanDevice,
    name: &str,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    location: MemoryLocation,
) -> VkResult<(vk::Buffer, Allocation)> {
    let buffer_info = vk::BufferCreateInfo::builder()
        .size(size)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }?;
    let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

    let allocation = device.allocator.lock().allocate(&AllocationCreateDesc {
        name,
        requirements,
        location,
        linear: true,
        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
    });
    let allocation = match allocation {
        Ok(allocation) => allocation,
        Err(e) => {
            log::error!("Failed to allocate memory for {}: {}", name, e);
            unsafe { device.device.destroy_buffer(buffer, None) };
            return Err(to_vk_error(&e));
        }
    };

    let bound = unsafe {
        device
            .device
            .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
    };
    if let Err(e) = bound {
        free_allocation(device, allocation);
        unsafe { device.device.destroy_buffer(buffer, None) };
        return Err(e);
    }

    Ok((buffer, allocation))
}

fn free_allocation(device: &VulkanDevice, allocation: Allocation) {
    if let Err(e) = device.allocator.lock().free(allocation) {
        log::warn!("Failed to free buffer memory: {}", e);
    }
}

fn to_vk_error(e: &AllocationError) -> vk::Result {
    match e {
        AllocationError::OutOfMemory => vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
        _ => vk::Result::ERROR_INITIALIZATION_FAILED,
    }
}

/// Host-visible buffer that stays mapped for its whole lifetime.
///
/// Destroyed through the device that created it.
pub struct MappedBuffer {
    buffer: vk::Buffer,
    allocation: Allocation,
    size: vk::DeviceSize,
}

impl MappedBuffer {
    pub fn new(
        device: &VulkanDevice,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> VkResult<Self> {
        let (buffer, allocation) =
            create_allocated_buffer(device, name, size, usage, MemoryLocation::CpuToGpu)?;

        Ok(Self {
            buffer,
            allocation,
            size,
        })
    }

    pub fn destroy(self, device: &VulkanDevice) {
        free_allocation(device, self.allocation);
        unsafe { device.device.destroy_buffer(self.buffer, None) };
    }
}

impl HostMapped for MappedBuffer {
    fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    fn size(&self) -> vk::DeviceSize {
        self.size
    }

    fn write(&mut self, bytes: &[u8]) -> VkResult<()> {
        let mapped = self
            .allocation
            .mapped_slice_mut()
            .ok_or(vk::Result::ERROR_MEMORY_MAP_FAILED)?;
        let target = mapped
            .get_mut(..bytes.len())
            .ok_or(vk::Result::ERROR_MEMORY_MAP_FAILED)?;

        // Coherent memory: visible to the GPU without a flush
        target.copy_from_slice(bytes);
        Ok(())
    }
}

/// Device-local buffer, freed when dropped
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl GpuBuffer {
    /// Upload `bytes` into a new device-local buffer with `usage`
    ///
    /// The data goes through a temporary staging buffer and a one-off
    /// transfer on the graphics queue.
    pub fn upload(
        device: &Arc<VulkanDevice>,
        name: &str,
        usage: vk::BufferUsageFlags,
        bytes: &[u8],
    ) -> Result<Self> {
        let size = bytes.len() as vk::DeviceSize;
        anyhow::ensure!(size > 0, "Cannot upload empty buffer {}", name);

        let mut staging = MappedBuffer::new(
            device,
            "staging",
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
        )
        .with_context(|| format!("Failed to create staging buffer for {}", name))?;

        let uploaded = staging
            .write(bytes)
            .context("Failed to fill staging buffer")
            .and_then(|_| {
                Self::allocate(
                    device,
                    name,
                    size,
                    usage | vk::BufferUsageFlags::TRANSFER_DST,
                    MemoryLocation::GpuOnly,
                )
            })
            .and_then(|target| {
                let region = vk::BufferCopy {
                    src_offset: 0,
                    dst_offset: 0,
                    size,
                };
                device.submit_once(|d, cmd| unsafe {
                    d.cmd_copy_buffer(cmd, staging.handle(), target.buffer, &[region]);
                })?;
                Ok(target)
            });

        staging.destroy(device);

        let target = uploaded.with_context(|| format!("Failed to upload {}", name))?;
        log::debug!("Uploaded {} ({} bytes)", name, size);
        Ok(target)
    }

    fn allocate(
        device: &Arc<VulkanDevice>,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<Self> {
        let (buffer, allocation) = create_allocated_buffer(device, name, size, usage, location)
            .map_err(|e| ResourceCreationError::new(ObjectKind::Buffer, e))
            .with_context(|| format!("Buffer {}", name))?;

        Ok(Self {
            buffer,
            allocation: Some(allocation),
            device: device.clone(),
        })
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            free_allocation(&self.device, allocation);
        }
        unsafe { self.device.device.destroy_buffer(self.buffer, None) };
    }
}
