/// Display WSI layer - process-wide state
///
/// Holds the singletons shared by every swapchain in the process: the DRM
/// display handle and the logger. Both live in thread-safe static storage
/// with RwLock for concurrent readers.

use std::sync::{OnceLock, RwLock, Arc};
use std::time::SystemTime;
use crate::display::DrmDisplay;
use crate::error::{Result, Error};
use crate::log::{Logger, LogEntry, LogSeverity, DefaultLogger};

// ===== INTERNAL STATE =====

/// Global display slot (None until the first successful initialization)
static DISPLAY: OnceLock<RwLock<Option<Arc<DrmDisplay>>>> = OnceLock::new();

/// Global logger (initialized with DefaultLogger)
static LOGGER: OnceLock<RwLock<Box<dyn Logger>>> = OnceLock::new();

fn display_slot() -> &'static RwLock<Option<Arc<DrmDisplay>>> {
    DISPLAY.get_or_init(|| RwLock::new(None))
}

fn logger_slot() -> &'static RwLock<Box<dyn Logger>> {
    LOGGER.get_or_init(|| RwLock::new(Box::new(DefaultLogger::from_env())))
}

// ===== PUBLIC API =====

/// Process-wide entry point of the display WSI layer
///
/// Swapchains never own the display: they query it through [`Layer::display`]
/// each time they need it and must handle its absence.
///
/// # Example
///
/// ```no_run
/// use display_wsi::wsi::Layer;
///
/// if let Some(display) = Layer::display() {
///     println!("CRTC {}", display.crtc_id().0);
/// }
/// ```
pub struct Layer;

impl Layer {
    /// Get the display, if one has been initialized
    pub fn display() -> Option<Arc<DrmDisplay>> {
        display_slot().read().ok().and_then(|lock| lock.clone())
    }

    /// Get the display, initializing it on first use
    ///
    /// `init` runs at most once per successful initialization; if it fails the
    /// slot stays empty and a later call may retry.
    ///
    /// # Errors
    ///
    /// Returns the error produced by `init`, or `BackendError` if the lock is poisoned.
    pub fn display_or_init<F>(init: F) -> Result<Arc<DrmDisplay>>
    where
        F: FnOnce() -> Result<DrmDisplay>,
    {
        if let Some(display) = Self::display() {
            return Ok(display);
        }

        let mut lock = display_slot().write()
            .map_err(|_| crate::wsi_err!("wsi::Layer", "Display lock poisoned"))?;

        // Another thread may have won the race while we waited for the lock
        if let Some(display) = lock.as_ref() {
            return Ok(display.clone());
        }

        let display = Arc::new(init()?);
        crate::wsi_info!(
            "wsi::Layer",
            "DRM display initialized (crtc {}, connector {}, {}x{})",
            display.crtc_id().0,
            display.connector_id().0,
            display.mode().width,
            display.mode().height
        );
        *lock = Some(display.clone());
        Ok(display)
    }

    /// Install an already-built display, replacing nothing
    ///
    /// # Errors
    ///
    /// Returns `InitializationFailed` if a display is already installed.
    pub fn install_display(display: DrmDisplay) -> Result<Arc<DrmDisplay>> {
        let mut lock = display_slot().write()
            .map_err(|_| crate::wsi_err!("wsi::Layer", "Display lock poisoned"))?;

        if lock.is_some() {
            crate::wsi_error!("wsi::Layer", "Display already installed");
            return Err(Error::InitializationFailed(
                "Display already installed. Call Layer::teardown_display() first.".to_string(),
            ));
        }

        let display = Arc::new(display);
        *lock = Some(display.clone());
        Ok(display)
    }

    /// Drop the process-wide display reference (driver unload)
    ///
    /// Swapchains still holding an `Arc` keep it alive until they release it.
    pub fn teardown_display() {
        if let Ok(mut lock) = display_slot().write() {
            if lock.take().is_some() {
                crate::wsi_info!("wsi::Layer", "DRM display torn down");
            }
        }
    }

    // ===== LOGGING API =====

    /// Set a custom logger
    pub fn set_logger<L: Logger + 'static>(logger: L) {
        if let Ok(mut lock) = logger_slot().write() {
            *lock = Box::new(logger);
        }
    }

    /// Reset logger to the stderr logger configured from the environment
    pub fn reset_logger() {
        if let Ok(mut lock) = logger_slot().write() {
            *lock = Box::new(DefaultLogger::from_env());
        }
    }

    /// Internal logging method (for simple logs without file:line)
    ///
    /// Used by macros like wsi_info!, wsi_warn!, etc.
    pub fn log(severity: LogSeverity, source: &str, message: String) {
        if let Ok(lock) = logger_slot().read() {
            lock.log(&LogEntry {
                severity,
                timestamp: SystemTime::now(),
                source: source.to_string(),
                message,
                file: None,
                line: None,
            });
        }
    }

    /// Internal logging method with file:line information (for ERROR logs)
    pub fn log_detailed(
        severity: LogSeverity,
        source: &str,
        message: String,
        file: &'static str,
        line: u32,
    ) {
        if let Ok(lock) = logger_slot().read() {
            lock.log(&LogEntry {
                severity,
                timestamp: SystemTime::now(),
                source: source.to_string(),
                message,
                file: Some(file),
                line: Some(line),
            });
        }
    }
}
