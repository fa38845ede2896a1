// =============================================================================
// WINDOW - winit window driven by pumping the event loop
// =============================================================================
//
// The render loop owns control flow. Instead of handing the thread to
// `EventLoop::run_app`, events are pumped once per frame (non-blocking) or
// waited for while minimized (blocking).

use anyhow::{Context, Result};
use std::time::{Duration, Instant};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    error::OsError,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{Window, WindowAttributes, WindowId},
};

use crate::config::WindowConfig;
use crate::frame::gpu::Drawable;

/// Receives events during a pump and records what the host needs to know
struct EventState {
    /// Taken when the window is created on the first resume
    attributes: Option<WindowAttributes>,
    created: Option<Window>,
    creation_error: Option<OsError>,
    close_requested: bool,
    resized: bool,
}

impl ApplicationHandler for EventState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(attributes) = self.attributes.take() {
            match event_loop.create_window(attributes) {
                Ok(window) => self.created = Some(window),
                Err(e) => self.creation_error = Some(e),
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.close_requested = true;
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                // Not every platform reports out-of-date after a resize
                log::debug!("Window resized to {}x{}", size.width, size.height);
                self.resized = true;
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    log::info!("ESC pressed, exiting...");
                    self.close_requested = true;
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }
}

/// The application window plus the event loop that feeds it
pub struct WindowHost {
    window: Window,
    title: String,
    state: EventState,
    event_loop: EventLoop<()>,
}

impl WindowHost {
    pub fn new(config: &WindowConfig) -> Result<Self> {
        let mut event_loop = EventLoop::new().context("Failed to create event loop")?;

        let attributes = WindowAttributes::default()
            .with_title(&config.title)
            .with_inner_size(PhysicalSize::new(config.width, config.height));
        let mut state = EventState {
            attributes: Some(attributes),
            created: None,
            creation_error: None,
            close_requested: false,
            resized: false,
        };

        // The window can only be created once the loop has resumed
        let window = loop {
            let status = event_loop.pump_app_events(Some(Duration::from_millis(10)), &mut state);
            if let Some(e) = state.creation_error.take() {
                return Err(e).context("Failed to create window");
            }
            if let Some(window) = state.created.take() {
                break window;
            }
            if let PumpStatus::Exit(code) = status {
                anyhow::bail!("Event loop exited with code {} before the window opened", code);
            }
        };

        let size = window.inner_size();
        log::info!("Window: {}x{}", size.width, size.height);
        // The first swapchain is built at this size
        state.resized = false;

        Ok(Self {
            window,
            title: config.title.clone(),
            state,
            event_loop,
        })
    }

    /// The underlying window, for surface creation
    pub fn window(&self) -> &Window {
        &self.window
    }

    /// Show `fps` after the configured title
    pub fn show_fps(&self, fps: f64) {
        self.window
            .set_title(&format!("{} - {:.0} FPS", self.title, fps));
    }

    fn pump(&mut self, timeout: Option<Duration>) {
        let status = self.event_loop.pump_app_events(timeout, &mut self.state);
        if let PumpStatus::Exit(code) = status {
            log::debug!("Event loop exited with code {}", code);
            self.state.close_requested = true;
        }
    }
}

impl Drawable for WindowHost {
    fn drawable_size(&self) -> (u32, u32) {
        if self.window.is_minimized() == Some(true) {
            return (0, 0);
        }
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    fn pump_events(&mut self) {
        self.pump(Some(Duration::ZERO));
    }

    fn wait_events(&mut self) {
        self.pump(None);
    }

    fn should_close(&self) -> bool {
        self.state.close_requested
    }

    fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.state.resized)
    }
}

/// Counts presented frames and reports the rate about once a second
pub struct FpsCounter {
    frames: u32,
    since: Instant,
}

impl FpsCounter {
    const INTERVAL: Duration = Duration::from_secs(1);

    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    fn starting_at(since: Instant) -> Self {
        Self { frames: 0, since }
    }

    /// Count one frame; returns the frame rate when an interval has elapsed
    pub fn tick(&mut self) -> Option<f64> {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> Option<f64> {
        self.frames += 1;

        let elapsed = now.duration_since(self.since);
        if elapsed < Self::INTERVAL {
            return None;
        }

        let fps = f64::from(self.frames) / elapsed.as_secs_f64();
        self.frames = 0;
        self.since = now;
        Some(fps)
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}
