/// Swapchain module - device side of direct-to-display presentation

// Module declarations
pub mod config;
pub mod device_dispatch;
pub mod format_negotiation;
pub mod external_memory;
pub mod present_fence;
pub mod image_state;
pub mod display_swapchain;

// Re-export everything from display_swapchain.rs
pub use display_swapchain::*;

// Re-export from other modules
pub use config::*;
pub use device_dispatch::*;
pub use format_negotiation::*;
pub use external_memory::*;
pub use present_fence::*;
pub use image_state::*;
