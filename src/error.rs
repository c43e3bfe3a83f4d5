//! Custom error types for the application.
//!
//! This module defines the primary error type, `OpoDaqError`, used across the
//! crate. Hardware drivers report recoverable faults through the status
//! message channel (see [`crate::messages`]) and return null/zero results
//! instead of propagating errors upward; the variants here cover the cases
//! where a caller genuinely needs to branch on failure, such as configuration
//! loading or a rejected motion request.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type OpoResult<T> = std::result::Result<T, OpoDaqError>;

#[derive(Error, Debug)]
pub enum OpoDaqError {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tuning stage is not connected")]
    OpoNotConnected,

    #[error("Requested wavelength {requested:.3}nm is out of set bounds of {lower} - {upper}")]
    WavelengthOutOfBounds {
        requested: f64,
        lower: f64,
        upper: f64,
    },

    #[error("No wavemeter channel selected for the {0} laser")]
    WavemeterChannelUnset(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_bounds_message_includes_window() {
        let err = OpoDaqError::WavelengthOutOfBounds {
            requested: 900.123,
            lower: 710.0,
            upper: 880.0,
        };
        let msg = err.to_string();
        assert!(msg.contains("900.123"));
        assert!(msg.contains("710"));
        assert!(msg.contains("880"));
    }

    #[test]
    fn channel_unset_names_the_laser() {
        let err = OpoDaqError::WavemeterChannelUnset("excitation".into());
        assert!(err.to_string().contains("excitation"));
    }
}
