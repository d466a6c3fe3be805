#[cfg(test)]
mod error_tests {
    use rigstream::errors::RigError;
    use std::error::Error;

    #[test]
    fn test_actuator_timeout_message() {
        let error = RigError::ActuatorTimeout("lens stuck at 0.40".to_string());
        assert!(error.to_string().contains("did not settle"));
        assert!(error.to_string().contains("lens stuck at 0.40"));
    }

    #[test]
    fn test_source_disconnected_message() {
        let error = RigError::SourceDisconnected("USB reset".to_string());
        assert_eq!(error.to_string(), "Frame source disconnected: USB reset");
    }

    #[test]
    fn test_dimension_mismatch_display() {
        let error = RigError::DimensionMismatch {
            expected: (640, 480),
            got: (320, 240),
        };
        assert_eq!(
            error.to_string(),
            "Frame dimension mismatch: expected 640x480, got 320x240"
        );
    }

    #[test]
    fn test_all_error_variants() {
        let errors = vec![
            RigError::QueueShutdown,
            RigError::ActuatorTimeout("timeout".to_string()),
            RigError::SourceDisconnected("gone".to_string()),
            RigError::FrameNotHeld,
            RigError::FrameNotReleased,
            RigError::DimensionMismatch {
                expected: (1, 1),
                got: (2, 2),
            },
            RigError::InvalidConfig("bad".to_string()),
            RigError::InvalidTransition("Idle -> Scanning".to_string()),
            RigError::WorkerPanicked("processing".to_string()),
            RigError::Timeout("join".to_string()),
            RigError::Config("parse".to_string()),
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
            assert!(!format!("{:?}", error).is_empty());
        }
    }

    #[test]
    fn test_io_error_conversion_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "rigstream.toml");
        let error: RigError = io.into();
        assert!(matches!(error, RigError::Io(_)));
        assert!(error.source().is_some());
    }

    #[test]
    fn test_plain_errors_have_no_source() {
        let error = RigError::FrameNotReleased;
        let _error_trait: &dyn Error = &error;
        assert!(error.source().is_none());
    }
}
