//! System-wide constants for the execution-engine bridge.
//!
//! Buffer sizes here are the defaults used when a `BridgeConfig` does not
//! override them. Status codes and framing sizes are part of the call
//! protocol and must not change.

// =============================================================================
// Status Codes
// =============================================================================

/// Status returned by the engine when a call succeeded.
pub const STATUS_SUCCESS: i64 = 0;

/// Status returned by the engine when a call failed.
///
/// Any other negative value is treated the same way after the error buffer
/// has been consulted.
pub const STATUS_ERROR: i64 = 1;

// =============================================================================
// Buffer Sizes
// =============================================================================

/// Initial capacity of the per-engine request (parameter set) buffer (256 KB).
pub const DEFAULT_REQUEST_BUFFER_SIZE: usize = 256 * 1024;

/// Capacity of the response buffer the engine writes results into (10 MB).
///
/// This is also the largest result set that can be returned without the
/// engine allocating a fallback buffer.
pub const DEFAULT_RESPONSE_BUFFER_SIZE: usize = 10 * 1024 * 1024;

/// Capacity of the buffer the engine serializes errors into (5 MB).
pub const DEFAULT_ERROR_BUFFER_SIZE: usize = 5 * 1024 * 1024;

/// Largest buffer that can be addressed across the call boundary.
///
/// Buffer offsets travel as `i32` on the wire.
pub const MAX_BUFFER_CAPACITY: usize = i32::MAX as usize;

/// Default hard limit for a single result table (50,000,000 bytes).
pub const DEFAULT_MAX_TABLE_SIZE: usize = 50_000_000;

/// Alignment of every buffer handed to the engine.
pub const BUFFER_ALIGNMENT: usize = 64;

// =============================================================================
// Framing
// =============================================================================

/// Size of an `i32` length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Size of the response header: `[i32 totalSize][bool dirty]`.
pub const RESPONSE_HEADER_SIZE: usize = LENGTH_PREFIX_SIZE + 1;

/// Size of one dependency record header: `[i32 depCount][i32 depId][i32 tableSize]`.
pub const DEPENDENCY_HEADER_SIZE: usize = 12;

/// Dependency count every fragment result must carry.
pub const DEPENDENCIES_PER_FRAGMENT: i32 = 1;

// =============================================================================
// Engine Tuning
// =============================================================================

/// Default table block compaction threshold (percent full).
///
/// Valid values are 0-99; 0 disables compaction.
pub const DEFAULT_COMPACTION_THRESHOLD: u8 = 95;

/// Default temp table memory limit in megabytes.
pub const DEFAULT_TEMP_TABLE_MEMORY_MB: usize = 100;

/// Default DR buffer size in bytes (512 KB).
pub const DEFAULT_DR_BUFFER_SIZE: usize = 512 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_defaults() {
        assert!(DEFAULT_REQUEST_BUFFER_SIZE < DEFAULT_RESPONSE_BUFFER_SIZE);
        assert!(DEFAULT_RESPONSE_BUFFER_SIZE <= MAX_BUFFER_CAPACITY);
        assert!(DEFAULT_ERROR_BUFFER_SIZE <= MAX_BUFFER_CAPACITY);
        assert!(BUFFER_ALIGNMENT.is_power_of_two());
    }

    #[test]
    fn test_table_limit_fits_wire() {
        assert!(DEFAULT_MAX_TABLE_SIZE <= MAX_BUFFER_CAPACITY);
        assert!(DEFAULT_COMPACTION_THRESHOLD <= 99);
    }
}
