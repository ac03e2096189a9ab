/// Errors raised by the capture pipeline and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum FuseError {
    #[error("Device error: {0}")]
    Device(String),

    #[error("Timeout waiting for data")]
    Timeout,

    #[error("Body tracker error: {0}")]
    Tracker(String),

    #[error("Stream stopped")]
    StreamStopped,

    #[error("Channel disconnected")]
    ChannelDisconnected,

    #[error("Image encoding failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(String),

    #[error("Worker panicked: {0}")]
    Panic(String),
}

impl FuseError {
    /// Whether this error must halt the worker threads.
    ///
    /// Device and tracker failures are fatal. Encoding and configuration
    /// problems are reported but only affect the current operation.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FuseError::Device(_)
                | FuseError::Timeout
                | FuseError::Tracker(_)
                | FuseError::StreamStopped
                | FuseError::ChannelDisconnected
                | FuseError::Panic(_)
        )
    }

    /// A failed acquire is always fatal, whatever the provider reported.
    pub(crate) fn into_device_failure(self) -> FuseError {
        if self.is_fatal() {
            self
        } else {
            FuseError::Device(self.to_string())
        }
    }
}

/// Errors returned by a remote detector.
///
/// These never stop the pipeline; the analytics trigger logs them and keeps
/// its previous detection result.
#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Prediction quota exceeded")]
    Quota,

    #[error("Malformed detector response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Detector unavailable")]
    Unavailable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(FuseError::Device("unplugged".into()).is_fatal());
        assert!(FuseError::Timeout.is_fatal());
        assert!(FuseError::Tracker("gpu lost".into()).is_fatal());
        assert!(!FuseError::InvalidImage("odd stride".into()).is_fatal());
        assert!(!FuseError::Config("bad fps".into()).is_fatal());
        assert!(FuseError::Panic("boom".into()).is_fatal());
    }

    #[test]
    fn test_into_device_failure() {
        let err = FuseError::InvalidImage("short buffer".into()).into_device_failure();
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "Device error: Invalid image: short buffer");
        assert!(matches!(FuseError::Timeout.into_device_failure(), FuseError::Timeout));
    }

    #[test]
    fn test_detector_parse_error_converts() {
        let err = serde_json::from_str::<u32>("nope").unwrap_err();
        let err: DetectorError = err.into();
        assert!(err.to_string().starts_with("Malformed detector response"));
    }
}
