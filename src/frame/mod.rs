// Frame core - swapchain recreation and frames-in-flight scheduling
//
// Everything except `context` is generic over the `gpu` traits and runs
// against the simulated device in tests.

pub mod context;
pub mod gpu;
pub mod pool;
pub mod scheduler;
pub mod swapchain;

#[cfg(test)]
mod sim;

pub use context::RenderContext;
