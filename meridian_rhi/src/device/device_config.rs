/// Device context configuration

/// Validation message severity forwarded to the engine log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugSeverity {
    ErrorsOnly,
    ErrorsAndWarnings,
    All,
}

/// Device context configuration
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Application name reported to the driver
    pub app_name: String,
    /// Application version (major, minor, patch)
    pub app_version: (u32, u32, u32),
    /// Enable validation/debug layers
    pub enable_validation: bool,
    /// Minimum severity of validation messages that reach the log
    pub debug_severity: DebugSeverity,
    /// Attach debug names to created objects
    pub enable_debug_names: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            app_name: "Meridian Application".to_string(),
            app_version: (1, 0, 0),
            enable_validation: cfg!(debug_assertions),
            debug_severity: DebugSeverity::ErrorsAndWarnings,
            enable_debug_names: cfg!(debug_assertions),
        }
    }
}
