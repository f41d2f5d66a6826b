/// Error code registry for leadmetrics
///
/// Error codes are organized by category:
/// - 1000-1999: Configuration errors
/// - 3000-3999: Repository errors
/// - 4000-4999: Scheduler errors
/// - 5000-5999: Event errors
/// - 9000-9999: Other errors
#[allow(dead_code)]
pub struct ErrorCode;

impl ErrorCode {
    // Configuration errors (1000-1999)
    pub const CONFIG_GENERIC: u16 = 1000;
    pub const CONFIG_NOT_FOUND: u16 = 1001;
    pub const CONFIG_INVALID_YAML: u16 = 1002;
    pub const CONFIG_INVALID_VALUE: u16 = 1005;
    pub const CONFIG_VALIDATION_FAILED: u16 = 1008;

    // Repository errors (3000-3999)
    pub const REPOSITORY_GENERIC: u16 = 3000;
    pub const REPOSITORY_IO_ERROR: u16 = 3001;
    pub const REPOSITORY_UNAVAILABLE: u16 = 3002;
    pub const REPOSITORY_TIMEOUT: u16 = 3003;
    pub const REPOSITORY_SERIALIZATION_ERROR: u16 = 3011;

    // Scheduler errors (4000-4999)
    pub const SCHEDULER_HANDLER_FAILED: u16 = 4001;
    pub const SCHEDULER_HANDLER_PANICKED: u16 = 4002;

    // Event errors (5000-5999)
    pub const EVENT_MALFORMED: u16 = 5001;
    pub const EVENT_UNKNOWN_NAME: u16 = 5002;

    // Other errors (9000-9999)
    pub const OTHER_GENERIC: u16 = 9000;
}

/// Get a human-readable description for an error code
pub fn describe_error_code(code: u16) -> &'static str {
    match code {
        ErrorCode::CONFIG_GENERIC => "General configuration error",
        ErrorCode::CONFIG_NOT_FOUND => "Configuration file not found",
        ErrorCode::CONFIG_INVALID_YAML => "Configuration file is not valid YAML",
        ErrorCode::CONFIG_INVALID_VALUE => "Configuration value is out of range",
        ErrorCode::CONFIG_VALIDATION_FAILED => "Configuration validation failed",

        ErrorCode::REPOSITORY_GENERIC => "General repository error",
        ErrorCode::REPOSITORY_IO_ERROR => "Repository I/O failure",
        ErrorCode::REPOSITORY_UNAVAILABLE => "Repository is unavailable",
        ErrorCode::REPOSITORY_TIMEOUT => "Repository operation timed out",
        ErrorCode::REPOSITORY_SERIALIZATION_ERROR => "Failed to encode or decode stored data",

        ErrorCode::SCHEDULER_HANDLER_FAILED => "Cadence handler returned an error",
        ErrorCode::SCHEDULER_HANDLER_PANICKED => "Cadence handler panicked",

        ErrorCode::EVENT_MALFORMED => "Event is missing a required field",
        ErrorCode::EVENT_UNKNOWN_NAME => "Event name is not recognized",

        ErrorCode::OTHER_GENERIC => "Unexpected error",
        _ => "Unknown error code",
    }
}
