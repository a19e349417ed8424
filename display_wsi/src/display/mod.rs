/// Display module - kernel mode-setting side of direct-to-display presentation

// Module declarations
pub mod drm_display;
pub mod display_mode;
pub mod framebuffer;
pub mod present_scheduler;

// Re-export everything from drm_display.rs
pub use drm_display::*;

// Re-export from other modules
pub use display_mode::*;
pub use framebuffer::*;
pub use present_scheduler::*;
