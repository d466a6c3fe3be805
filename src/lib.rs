//! rigstream: real-time frame stabilisation and autofocus depth mapping for
//! fixed optical imaging rigs.
//!
//! Camera frames enter a [`FrameQueue`], the [`FrameProcessor`] stabilises
//! them against motion on a dedicated worker and publishes corrected
//! composites to a single renderer. In map mode a [`DepthMapScanner`] drives
//! the focus actuator over a raster of cells and records, per cell, the focus
//! position with the sharpest image.
//!
//! # Features
//! - Two interchangeable stabilisers: template correlation and phase correlation
//! - Single-slot worker hand-offs with clean, bounded shutdown
//! - Variance-of-Laplacian, Tenengrad and Brenner sharpness metrics
//! - Cancellable depth scans with partial results
//! - TOML configuration
//!
//! # Usage
//! ```rust,ignore
//! use rigstream::{RigConfig, RigSession};
//!
//! let session = RigSession::open(RigConfig::load_or_default())?;
//! let sink = session.start_streaming()?;
//! sink.push(frame)?;
//! if let Some(processor) = session.processor() {
//!     let composite = processor.get_frame();
//!     processor.release_frame()?;
//! }
//! session.close()?;
//! ```
pub mod config;
pub mod depth_map;
pub mod errors;
pub mod invariants;
pub mod processor;
pub mod queue;
pub mod session;
pub mod sharpness;
pub mod stabilise;
pub mod timing;
pub mod types;

// Testing utilities - synthetic frames and a simulated focus rig
pub mod testing;

// Re-exports for convenience
pub use config::RigConfig;
pub use depth_map::{
    CancelToken, DepthCell, DepthMapData, DepthMapScanner, FocusActuator, ScanPlan, ScanReport,
    ScanStatus, SettledFrameSource,
};
pub use errors::{RigError, RigResult};
pub use processor::{Composite, FrameProcessor, ProcessorPhase, ProcessorStats, StopReason};
pub use queue::FrameQueue;
pub use session::{FrameSink, RigSession, SessionEvent, SessionState};
pub use sharpness::{SharpnessAnalyzer, SharpnessMetric};
pub use stabilise::{BlendPolicy, EngineKind, StabilisationEngine};
pub use timing::FrameClock;
pub use types::{Frame, Offset, PixelFormat, RasterPosition, Region};

/// Initialize logging for the pipeline
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "rigstream=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn test_crate_info() {
        let info = get_info();
        assert_eq!(info.name, "rigstream");
        assert!(!info.version.is_empty());
        assert!(!info.description.is_empty());
    }

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging();
        init_logging();
        assert!(std::env::var("RUST_LOG").is_ok());
    }
}
