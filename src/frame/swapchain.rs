// Swapchain Manager - presentable image chain and its recreation
//
// The chain (swapchain, one image view and one framebuffer per image) is one
// unit: it is built forward, torn down in reverse, and replaced as a whole.
// Each replacement bumps a generation, and image tokens from an older
// generation are refused.

use std::sync::Arc;

use ash::vk;

use super::gpu::{DeviceContext, Drawable, SwapchainDesc, SwapchainDevice};
use crate::error::{
    FrameError, FrameOp, ObjectKind, ResourceCreationError, TransientPresentationError,
};

/// Format/colour-space pair preferred when the surface offers it.
pub const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Pick `preferred` if supported, else the first supported entry.
pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    preferred: Option<vk::SurfaceFormatKHR>,
) -> Option<vk::SurfaceFormatKHR> {
    preferred
        .and_then(|wanted| formats.iter().copied().find(|&f| f == wanted))
        .or_else(|| formats.first().copied())
}

/// FIFO: vsynced, never tears, and always supported.
pub fn choose_present_mode() -> vk::PresentModeKHR {
    vk::PresentModeKHR::FIFO
}

/// Use the surface's current extent unless it is the "any size" sentinel,
/// in which case clamp the drawable size into the supported range.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, drawable: (u32, u32)) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }

    vk::Extent2D {
        width: drawable
            .0
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: drawable
            .1
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// One more than the minimum, capped by the maximum when there is one
/// (`max_image_count == 0` means unbounded).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        count.min(caps.max_image_count)
    } else {
        count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainState {
    Valid,
    Invalidated(TransientPresentationError),
    Rebuilding,
}

/// An acquired image index, tied to the chain generation it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    index: u32,
    generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Ready { image: AcquiredImage, suboptimal: bool },
    /// The surface no longer matches the chain; nothing was acquired.
    Stale,
}

struct SwapchainChain {
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
    extent: vk::Extent2D,
}

pub struct SwapchainManager<G: DeviceContext + SwapchainDevice> {
    gpu: Arc<G>,
    render_pass: vk::RenderPass,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    chain: Option<SwapchainChain>,
    state: SwapchainState,
    generation: u64,
}

impl<G: DeviceContext + SwapchainDevice> SwapchainManager<G> {
    /// Build the first chain for `render_pass`, whose colour attachment
    /// uses `surface_format`.
    ///
    /// Goes through the regular rebuild path, so a window that starts
    /// minimized is waited for. If the window is closed during that wait
    /// the manager is returned without a chain, still `Invalidated`.
    pub fn new<W: Drawable + ?Sized>(
        gpu: Arc<G>,
        render_pass: vk::RenderPass,
        surface_format: vk::SurfaceFormatKHR,
        window: &mut W,
    ) -> Result<Self, FrameError> {
        let mut manager = Self {
            gpu,
            render_pass,
            surface_format,
            present_mode: choose_present_mode(),
            chain: None,
            state: SwapchainState::Invalidated(TransientPresentationError::OutOfDate),
            generation: 0,
        };
        manager.rebuild(window)?;
        Ok(manager)
    }

    #[cfg(test)]
    pub fn state(&self) -> SwapchainState {
        self.state
    }

    pub fn is_valid(&self) -> bool {
        self.state == SwapchainState::Valid
    }

    #[cfg(test)]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Extent of the current chain, zero when there is none.
    pub fn extent(&self) -> vk::Extent2D {
        self.chain
            .as_ref()
            .map(|chain| chain.extent)
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub fn image_count(&self) -> usize {
        self.chain.as_ref().map_or(0, |chain| chain.images.len())
    }

    /// Mark the chain stale. Only a `Valid` chain transitions; returns
    /// whether it did.
    pub fn invalidate(&mut self, reason: TransientPresentationError) -> bool {
        if self.state != SwapchainState::Valid {
            return false;
        }
        log::debug!("Swapchain invalidated: {}", reason);
        self.state = SwapchainState::Invalidated(reason);
        true
    }

    /// Replace the chain to match the current surface.
    ///
    /// Returns `Ok(false)` when the window asked to close while minimized;
    /// the state is then left `Invalidated` and no chain exists.
    pub fn rebuild<W: Drawable + ?Sized>(&mut self, window: &mut W) -> Result<bool, FrameError> {
        let reason = match self.state {
            SwapchainState::Invalidated(reason) => reason,
            _ => TransientPresentationError::OutOfDate,
        };
        self.state = SwapchainState::Rebuilding;

        // Minimized: never build against a zero-sized surface
        let mut size = window.drawable_size();
        if size.0 == 0 || size.1 == 0 {
            log::info!("Window minimized, waiting.");
        }
        while size.0 == 0 || size.1 == 0 {
            if window.should_close() {
                self.state = SwapchainState::Invalidated(reason);
                return Ok(false);
            }
            window.wait_events();
            size = window.drawable_size();
        }

        // No in-flight command buffer may still reference the old chain
        self.gpu
            .wait_idle()
            .map_err(|e| FrameError::fatal(FrameOp::WaitIdle, e))?;

        if let Some(old) = self.chain.take() {
            self.destroy_chain(old);
        }

        let chain = self.create_chain(size)?;
        log::info!(
            "Recreated swapchain: {}x{}, {} images ({:?}, {:?})",
            chain.extent.width,
            chain.extent.height,
            chain.images.len(),
            self.surface_format.format,
            self.present_mode,
        );

        self.chain = Some(chain);
        self.generation += 1;
        self.state = SwapchainState::Valid;
        Ok(true)
    }

    /// Acquire the next image, signalling `signal` when it is ready.
    pub fn acquire(&self, signal: vk::Semaphore) -> Result<AcquireOutcome, FrameError> {
        let chain = match (&self.chain, self.state) {
            (Some(chain), SwapchainState::Valid) => chain,
            _ => return Ok(AcquireOutcome::Stale),
        };

        match self
            .gpu
            .acquire_next_image(chain.swapchain, u64::MAX, signal)
        {
            Ok((index, suboptimal)) => Ok(AcquireOutcome::Ready {
                image: AcquiredImage {
                    index,
                    generation: self.generation,
                },
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::Stale),
            Err(e) => Err(FrameError::fatal(FrameOp::AcquireImage, e)),
        }
    }

    /// Framebuffer for `image`, or `None` if the image predates the
    /// current chain.
    pub fn framebuffer(&self, image: AcquiredImage) -> Option<vk::Framebuffer> {
        if image.generation != self.generation || !self.is_valid() {
            return None;
        }
        self.chain
            .as_ref()
            .and_then(|chain| chain.framebuffers.get(image.index as usize).copied())
    }

    /// Present `image` once `wait` is signaled.
    ///
    /// Returns the transient signal, if any, that the chain needs rebuilding.
    pub fn present(
        &self,
        queue: vk::Queue,
        image: AcquiredImage,
        wait: vk::Semaphore,
    ) -> Result<Option<TransientPresentationError>, FrameError> {
        let chain = match &self.chain {
            Some(chain) if image.generation == self.generation => chain,
            _ => return Ok(Some(TransientPresentationError::OutOfDate)),
        };

        match self
            .gpu
            .queue_present(queue, chain.swapchain, image.index, wait)
        {
            Ok(false) => Ok(None),
            Ok(true) => Ok(Some(TransientPresentationError::Suboptimal)),
            Err(e) => match TransientPresentationError::from_vk(e) {
                Some(transient) => Ok(Some(transient)),
                None => Err(FrameError::fatal(FrameOp::Present, e)),
            },
        }
    }

    // Swapchain -> image views -> framebuffers. A failure tears down what
    // was built so far and reports the failing object.
    fn create_chain(&self, drawable: (u32, u32)) -> Result<SwapchainChain, FrameError> {
        let caps = self
            .gpu
            .surface_capabilities()
            .map_err(|e| FrameError::fatal(FrameOp::QuerySurface, e))?;

        let desc = SwapchainDesc {
            surface_format: self.surface_format,
            present_mode: self.present_mode,
            extent: choose_extent(&caps, drawable),
            image_count: choose_image_count(&caps),
            pre_transform: caps.current_transform,
        };

        let (swapchain, images) = self
            .gpu
            .create_swapchain(&desc)
            .map_err(|e| ResourceCreationError::new(ObjectKind::Swapchain, e))?;

        let mut image_views = Vec::with_capacity(images.len());
        for (i, &image) in images.iter().enumerate() {
            match self.gpu.create_image_view(image, desc.surface_format.format) {
                Ok(view) => image_views.push(view),
                Err(e) => {
                    self.teardown(&[], &image_views, swapchain);
                    return Err(ResourceCreationError::at(ObjectKind::ImageView, i, e).into());
                }
            }
        }

        let mut framebuffers = Vec::with_capacity(image_views.len());
        for (i, &view) in image_views.iter().enumerate() {
            match self
                .gpu
                .create_framebuffer(self.render_pass, view, desc.extent)
            {
                Ok(framebuffer) => framebuffers.push(framebuffer),
                Err(e) => {
                    self.teardown(&framebuffers, &image_views, swapchain);
                    return Err(ResourceCreationError::at(ObjectKind::Framebuffer, i, e).into());
                }
            }
        }

        Ok(SwapchainChain {
            swapchain,
            images,
            image_views,
            framebuffers,
            extent: desc.extent,
        })
    }

    fn destroy_chain(&self, chain: SwapchainChain) {
        self.teardown(&chain.framebuffers, &chain.image_views, chain.swapchain);
    }

    // Framebuffers -> image views -> swapchain
    fn teardown(
        &self,
        framebuffers: &[vk::Framebuffer],
        image_views: &[vk::ImageView],
        swapchain: vk::SwapchainKHR,
    ) {
        for &framebuffer in framebuffers {
            self.gpu.destroy_framebuffer(framebuffer);
        }
        for &view in image_views {
            self.gpu.destroy_image_view(view);
        }
        self.gpu.destroy_swapchain(swapchain);
    }
}

impl<G: DeviceContext + SwapchainDevice> Drop for SwapchainManager<G> {
    fn drop(&mut self) {
        if let Some(chain) = self.chain.take() {
            self.destroy_chain(chain);
        }
    }
}
