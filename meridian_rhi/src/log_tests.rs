//! Unit tests for log.rs
//!
//! Tests Logger trait, LogEntry, LogSeverity, DefaultLogger and the error helper macros.

use crate::log::{Logger, LogEntry, LogSeverity, DefaultLogger};
use crate::error::{Error, Result};
use std::time::SystemTime;

fn entry(severity: LogSeverity, file: Option<&'static str>, line: Option<u32>) -> LogEntry {
    LogEntry {
        severity,
        timestamp: SystemTime::now(),
        source: "meridian::IndexBuffer".to_string(),
        message: format!("{:?} message", severity),
        file,
        line,
    }
}

// ============================================================================
// LOG SEVERITY TESTS
// ============================================================================

#[test]
fn test_log_severity_ordering() {
    assert!(LogSeverity::Trace < LogSeverity::Debug);
    assert!(LogSeverity::Debug < LogSeverity::Info);
    assert!(LogSeverity::Info < LogSeverity::Warn);
    assert!(LogSeverity::Warn < LogSeverity::Error);
}

#[test]
fn test_log_severity_u8_roundtrip_preserves_order() {
    let all = [
        LogSeverity::Trace,
        LogSeverity::Debug,
        LogSeverity::Info,
        LogSeverity::Warn,
        LogSeverity::Error,
    ];
    for pair in all.windows(2) {
        assert!(pair[0].as_u8() < pair[1].as_u8());
    }
    for severity in all {
        assert_eq!(LogSeverity::from_u8(severity.as_u8()), severity);
    }
    // Out-of-range values saturate to Error
    assert_eq!(LogSeverity::from_u8(200), LogSeverity::Error);
}

// ============================================================================
// LOG ENTRY TESTS
// ============================================================================

#[test]
fn test_log_entry_creation_with_file_line() {
    let entry = entry(LogSeverity::Error, Some("index_buffer.rs"), Some(42));

    assert_eq!(entry.severity, LogSeverity::Error);
    assert_eq!(entry.source, "meridian::IndexBuffer");
    assert_eq!(entry.file, Some("index_buffer.rs"));
    assert_eq!(entry.line, Some(42));
}

#[test]
fn test_log_entry_clone() {
    let entry1 = entry(LogSeverity::Warn, Some("test.rs"), Some(10));
    let entry2 = entry1.clone();

    assert_eq!(entry1.severity, entry2.severity);
    assert_eq!(entry1.source, entry2.source);
    assert_eq!(entry1.message, entry2.message);
    assert_eq!(entry1.file, entry2.file);
    assert_eq!(entry1.line, entry2.line);
}

// ============================================================================
// DEFAULT LOGGER TESTS
// ============================================================================

#[test]
fn test_default_logger_format_without_file_line() {
    colored::control::set_override(false);
    let formatted = DefaultLogger::format_entry(&entry(LogSeverity::Info, None, None));

    assert!(formatted.contains("[INFO ]"));
    assert!(formatted.contains("[meridian::IndexBuffer]"));
    assert!(formatted.ends_with("Info message"));
}

#[test]
fn test_default_logger_format_with_file_line() {
    colored::control::set_override(false);
    let formatted = DefaultLogger::format_entry(&entry(LogSeverity::Error, Some("vulkan_context.rs"), Some(123)));

    assert!(formatted.contains("[ERROR]"));
    assert!(formatted.ends_with("(vulkan_context.rs:123)"));
}

#[test]
fn test_default_logger_all_severities() {
    let logger = DefaultLogger;
    for severity in [
        LogSeverity::Trace,
        LogSeverity::Debug,
        LogSeverity::Info,
        LogSeverity::Warn,
        LogSeverity::Error,
    ] {
        // Just verify it doesn't panic
        logger.log(&entry(severity, None, None));
        logger.log(&entry(severity, Some("test.rs"), Some(7)));
    }
}

#[test]
fn test_logger_trait_is_send_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<DefaultLogger>();
}

// ============================================================================
// ERROR HELPER MACROS
// ============================================================================

#[test]
fn test_engine_err_defaults_to_backend_error() {
    let err = crate::engine_err!("meridian::test", "vkQueueSubmit failed: {}", -4);
    assert_eq!(err, Error::BackendError("vkQueueSubmit failed: -4".to_string()));
}

#[test]
fn test_engine_err_with_variant_selector() {
    let err = crate::engine_err!("meridian::test", UsageViolation => "Not mappable ({} bytes)", 64);
    assert_eq!(err, Error::UsageViolation("Not mappable (64 bytes)".to_string()));

    let err = crate::engine_err!("meridian::test", FlushFailure => "flush");
    assert!(matches!(err, Error::FlushFailure(_)));
}

#[test]
fn test_engine_bail_returns_early() {
    fn check(size: u64) -> Result<u64> {
        if size == 0 {
            crate::engine_bail!("meridian::test", AllocationFailure => "zero-sized buffer");
        }
        Ok(size * 2)
    }

    assert_eq!(check(4), Ok(8));
    assert_eq!(
        check(0),
        Err(Error::AllocationFailure("zero-sized buffer".to_string()))
    );
}
