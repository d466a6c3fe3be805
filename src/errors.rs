use thiserror::Error;

#[derive(Debug, Error)]
pub enum RigError {
    #[error("Frame queue has been shut down")]
    QueueShutdown,
    #[error("Focus actuator did not settle: {0}")]
    ActuatorTimeout(String),
    #[error("Frame source disconnected: {0}")]
    SourceDisconnected(String),
    #[error("No composite frame is currently held by the renderer")]
    FrameNotHeld,
    #[error("Previous composite frame has not been released")]
    FrameNotReleased,
    #[error("Frame dimension mismatch: expected {}x{}, got {}x{}", expected.0, expected.1, got.0, got.1)]
    DimensionMismatch {
        expected: (u32, u32),
        got: (u32, u32),
    },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Invalid session transition: {0}")]
    InvalidTransition(String),
    #[error("Worker thread panicked: {0}")]
    WorkerPanicked(String),
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("Configuration file error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type RigResult<T> = Result<T, RigError>;
