//! Integration tests for the layer logging system
//!
//! These tests verify custom loggers, the logging macros and the diagnostics
//! emitted by the presentation engine. No GPU required.
//!
//! Run with: cargo test --test logging_integration_tests


use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use display_wsi::wsi::log::{LogEntry, LogSeverity, Logger};
use display_wsi::wsi::swapchain::{
    DisplaySwapchain, ImageStatus, PendingPresent, StandardSwapchainOwner, SwapchainConfig, SwapchainOwner,
};
use display_wsi::wsi::{Error, Layer};
use display_wsi::{wsi_debug, wsi_err, wsi_error, wsi_info, wsi_trace, wsi_warn};
use serial_test::serial;
use test_doubles::{test_display, xrgb_image, FakeAllocator, FakeDevice, FakeKms};

// ============================================================================
// TEST LOGGER IMPLEMENTATION
// ============================================================================

/// Test logger that captures log entries for verification
struct TestLogger {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl TestLogger {
    fn new() -> (Self, Arc<Mutex<Vec<LogEntry>>>) {
        let entries = Arc::new(Mutex::new(Vec::new()));
        (Self { entries: entries.clone() }, entries)
    }
}

impl Logger for TestLogger {
    fn log(&self, entry: &LogEntry) {
        self.entries.lock().unwrap().push(entry.clone());
    }
}

// ============================================================================
// LOGGING TESTS
// ============================================================================

#[test]
#[serial]
fn test_integration_custom_logger() {
    let (test_logger, entries) = TestLogger::new();
    Layer::set_logger(test_logger);

    Layer::log(LogSeverity::Info, "test::module", "Test info message".to_string());
    Layer::log(LogSeverity::Warn, "test::module", "Test warning message".to_string());

    {
        let captured = entries.lock().unwrap();
        assert_eq!(captured.len(), 2);
        assert_eq!(captured[0].severity, LogSeverity::Info);
        assert_eq!(captured[0].source, "test::module");
        assert_eq!(captured[0].message, "Test info message");
        assert_eq!(captured[1].severity, LogSeverity::Warn);
        assert_eq!(captured[1].file, None);
    }

    Layer::reset_logger();
}

#[test]
#[serial]
fn test_integration_macros_route_through_layer() {
    let (test_logger, entries) = TestLogger::new();
    Layer::set_logger(test_logger);

    wsi_trace!("test::macros", "trace {}", 1);
    wsi_debug!("test::macros", "debug {}", 2);
    wsi_info!("test::macros", "info {}", 3);
    wsi_warn!("test::macros", "warn {}", 4);
    wsi_error!("test::macros", "error {}", 5);

    {
        let captured = entries.lock().unwrap();
        let severities: Vec<_> = captured.iter().map(|entry| entry.severity).collect();
        assert_eq!(
            severities,
            vec![LogSeverity::Trace, LogSeverity::Debug, LogSeverity::Info, LogSeverity::Warn, LogSeverity::Error]
        );
        assert_eq!(captured[2].message, "info 3");
        // Only errors carry a location
        assert!(captured[..4].iter().all(|entry| entry.line.is_none()));
        assert!(captured[4].file.unwrap().ends_with("logging_integration_tests.rs"));
        assert!(captured[4].line.is_some());
    }

    Layer::reset_logger();
}

#[test]
#[serial]
fn test_integration_err_macro_builds_backend_error() {
    let (test_logger, entries) = TestLogger::new();
    Layer::set_logger(test_logger);

    let err = wsi_err!("test::err", "ioctl {} failed", "ADDFB2");

    assert!(matches!(&err, Error::BackendError(message) if message == "ioctl ADDFB2 failed"));
    {
        let captured = entries.lock().unwrap();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].severity, LogSeverity::Error);
        assert_eq!(captured[0].message, "ioctl ADDFB2 failed");
    }

    Layer::reset_logger();
}

#[test]
#[serial]
fn test_integration_logger_reset() {
    let (test_logger, entries) = TestLogger::new();
    Layer::set_logger(test_logger);
    Layer::log(LogSeverity::Info, "test", "Message 1".to_string());

    Layer::reset_logger();
    Layer::log(LogSeverity::Info, "test", "Message 2".to_string());

    // Only the first message reached the custom logger
    let captured = entries.lock().unwrap();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].message, "Message 1");
}

// ============================================================================
// ENGINE DIAGNOSTICS
// ============================================================================

#[test]
#[serial]
fn test_integration_page_flip_failure_is_logged() {
    Layer::teardown_display();
    let kms = Arc::new(FakeKms::default());
    Layer::install_display(test_display(kms.clone())).unwrap();

    let owner = Arc::new(StandardSwapchainOwner::new(2).unwrap());
    let swapchain = DisplaySwapchain::new(
        Arc::new(FakeDevice::default()),
        Box::new(FakeAllocator),
        owner.clone(),
        SwapchainConfig::default(),
    )
    .unwrap();
    for index in 0..2 {
        swapchain.create_swapchain_image(&xrgb_image(640, 480), index).unwrap();
        swapchain.allocate_and_bind_swapchain_image(index).unwrap();
    }
    swapchain.present_image(&PendingPresent { image_index: 0, present_id: None });

    let (test_logger, entries) = TestLogger::new();
    Layer::set_logger(test_logger);
    kms.fail_page_flip.store(true, Ordering::SeqCst);
    owner.images().set_status(1, ImageStatus::Acquired);
    swapchain.present_image(&PendingPresent { image_index: 1, present_id: None });
    Layer::reset_logger();

    let captured = entries.lock().unwrap();
    assert!(captured.iter().any(|entry| entry.severity == LogSeverity::Error && entry.source == "wsi::display"));
    assert!(owner.error_state().unwrap().is_surface_lost());

    drop(swapchain);
    Layer::teardown_display();
}
