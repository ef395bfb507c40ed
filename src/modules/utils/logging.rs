use env_logger::{Builder, WriteStyle};
use log::{error, info, warn, LevelFilter};
use std::fs::OpenOptions;

/// Initialize the logging system with file output
pub fn initialize_logging() -> Result<(), Box<dyn std::error::Error>> {
    // Create or append to log file with proper permissions
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("latchkey.log")?;

    // Configure the logging system
    Builder::new()
        // Set default log level
        .filter_level(LevelFilter::Info)
        // Enable timestamps
        .format_timestamp_secs()
        // Enable module path in logs
        .format_module_path(true)
        // Set colored output for console
        .write_style(WriteStyle::Auto)
        // Write to the log file
        .target(env_logger::Target::Pipe(Box::new(file)))
        .init();

    info!("Logging system initialized");
    Ok(())
}

/// Helper function to format sensitive data for logging
fn format_sensitive(text: &str) -> String {
    if text.len() <= 4 {
        return "*".repeat(text.len());
    }
    format!("{}***{}", &text[0..2], &text[text.len() - 2..])
}

/// Add structured logging for authentication events
pub fn log_auth_event(event_type: &str, subject: &str, success: bool, details: Option<&str>) {
    if success {
        info!(
            "Auth event: type={}, subject={}, success=true, details={:?}",
            event_type,
            format_sensitive(subject),
            details
        );
    } else {
        warn!(
            "Auth event: type={}, subject={}, success=false, details={:?}",
            event_type,
            format_sensitive(subject),
            details
        );
    }
}

/// Add structured logging for record store operations
pub fn log_store_operation(operation: &str, record: &str, success: bool, details: Option<&str>) {
    if success {
        info!(
            "Store operation: op={}, record={}, success=true, details={:?}",
            operation, record, details
        );
    } else {
        error!(
            "Store operation: op={}, record={}, success=false, details={:?}",
            operation, record, details
        );
    }
}
