// =============================================================================
// QUAD RENDERER - spinning quad with frames in flight and swapchain recreation
// =============================================================================
//
// STARTUP:
// 1. Load config.toml (defaults when missing)
// 2. Initialize logging
// 3. Open the window
// 4. Build the render context (device, swapchain, frame pool, pipeline)
// 5. Pump events and draw until the window closes
//
// The render loop owns the thread; winit is pumped once per frame instead
// of running its own loop.

mod backend;
mod config;
mod error;
mod frame;
mod mesh;
mod window;

use anyhow::Result;
use std::process::ExitCode;

use config::Config;
use frame::scheduler::FrameOutcome;
use frame::RenderContext;
use window::{FpsCounter, WindowHost};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    // Load configuration from config.toml
    let (config, loaded) = Config::load();

    init_logging(&config);
    log::info!("Starting quad renderer");
    loaded.log();
    log::debug!("Config: {:?}", config);
    log::info!(
        "{} frames in flight, validation {}",
        config.graphics.max_frames_in_flight,
        if cfg!(debug_assertions) && config.debug.validation_layers {
            "on"
        } else {
            "off"
        }
    );

    // The window must outlive the surface, so it is declared first
    let mut window = WindowHost::new(&config.window)?;
    let mut context = RenderContext::new(&config, &mut window)?;

    let mut fps = FpsCounter::new();
    let show_fps = config.debug.show_fps;
    let presented = context.run(&mut window, |window, outcome| {
        if show_fps && outcome == FrameOutcome::Presented {
            if let Some(rate) = fps.tick() {
                window.show_fps(rate);
            }
        }
    })?;

    log::info!("Presented {} frames, shutting down", presented);
    drop(context);
    log::info!("Cleanup complete");
    Ok(())
}

/// Initialize logging at the configured level; `RUST_LOG` overrides it
fn init_logging(config: &Config) {
    use env_logger::{Builder, Env};

    let mut builder = Builder::new();
    builder.filter_level(config.log_level());
    builder.parse_env(Env::default());
    builder.init();
}
