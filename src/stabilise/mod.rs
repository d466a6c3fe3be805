/// Motion stabilisation engines
///
/// Two interchangeable strategies estimate the 2D translation of the current
/// frame against a reference:
/// 1. Correlation: frame-to-frame search against an accumulated template,
///    producing increments that are added to the running offset
/// 2. Phase correlation: cross-power spectrum against one fixed reference,
///    producing an absolute offset blended into the running offset
///
/// The engine plus the running offset form the [`StabiliserState`], which the
/// frame processor guards with its own lock.
pub mod correlation;
pub mod fft;
pub mod phase_corr;

pub use correlation::CorrelationStabiliser;
pub use phase_corr::PhaseCorrStabiliser;

use crate::config::StabilisationConfig;
use crate::errors::RigResult;
use crate::types::{Frame, Offset};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineKind {
    Correlation,
    PhaseCorrelation,
}

impl EngineKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineKind::Correlation => "correlation",
            EngineKind::PhaseCorrelation => "phase",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "correlation" | "corr" => Some(EngineKind::Correlation),
            "phase" | "phasecorr" | "phase_correlation" => Some(EngineKind::PhaseCorrelation),
            _ => None,
        }
    }
}

/// How a measured offset combines with the running offset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BlendPolicy {
    /// Measurement is a delta added to the running offset
    Incremental,
    /// Measurement is absolute; `running + blend_factor * (measured - running)`.
    /// A factor of 1.0 replaces the running offset outright.
    Absolute { blend_factor: f64 },
}

impl BlendPolicy {
    pub fn apply(&self, running: Offset, measured: Offset) -> Offset {
        match *self {
            BlendPolicy::Incremental => running + measured,
            BlendPolicy::Absolute { blend_factor } => {
                if blend_factor >= 1.0 {
                    measured
                } else {
                    running + (measured - running).scale(blend_factor)
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum StabilisationEngine {
    Correlation(CorrelationStabiliser),
    PhaseCorrelation(PhaseCorrStabiliser),
}

impl StabilisationEngine {
    pub fn from_config(kind: EngineKind, config: &StabilisationConfig) -> Self {
        match kind {
            EngineKind::Correlation => StabilisationEngine::Correlation(CorrelationStabiliser::new(
                config.correlation_search_radius,
                config.correlation_template_weight,
            )),
            EngineKind::PhaseCorrelation => StabilisationEngine::PhaseCorrelation(
                PhaseCorrStabiliser::new(config.phase_block_size, config.phase_blend_factor),
            ),
        }
    }

    pub fn kind(&self) -> EngineKind {
        match self {
            StabilisationEngine::Correlation(_) => EngineKind::Correlation,
            StabilisationEngine::PhaseCorrelation(_) => EngineKind::PhaseCorrelation,
        }
    }

    pub fn reset(&mut self) {
        match self {
            StabilisationEngine::Correlation(e) => e.reset(),
            StabilisationEngine::PhaseCorrelation(e) => e.reset(),
        }
    }

    pub fn compute_offset(&mut self, frame: &Frame) -> RigResult<Offset> {
        match self {
            StabilisationEngine::Correlation(e) => e.compute_offset(frame),
            StabilisationEngine::PhaseCorrelation(e) => e.compute_offset(frame),
        }
    }

    pub fn blend_policy(&self) -> BlendPolicy {
        match self {
            StabilisationEngine::Correlation(e) => e.blend_policy(),
            StabilisationEngine::PhaseCorrelation(e) => e.blend_policy(),
        }
    }

    /// Whether the engine holds a baseline (reference or template).
    pub fn has_reference(&self) -> bool {
        match self {
            StabilisationEngine::Correlation(e) => e.has_template(),
            StabilisationEngine::PhaseCorrelation(e) => e.has_reference(),
        }
    }
}

/// Engine together with the cumulative offset it drives.
#[derive(Debug, Clone)]
pub struct StabiliserState {
    engine: StabilisationEngine,
    config: StabilisationConfig,
    cumulative: Offset,
}

impl StabiliserState {
    pub fn new(config: &StabilisationConfig) -> Self {
        Self {
            engine: StabilisationEngine::from_config(config.engine, config),
            config: config.clone(),
            cumulative: Offset::ZERO,
        }
    }

    /// Measure `frame` and fold the result into the cumulative offset.
    /// A failed measurement leaves the cumulative offset unchanged.
    pub fn stabilise(&mut self, frame: &Frame) -> RigResult<Offset> {
        let measured = self.engine.compute_offset(frame)?;
        self.cumulative = self.engine.blend_policy().apply(self.cumulative, measured);
        Ok(self.cumulative)
    }

    /// Swap to a fresh engine of `kind`. The cumulative offset restarts at zero
    /// because the new engine has no baseline yet.
    pub fn select(&mut self, kind: EngineKind) {
        self.engine = StabilisationEngine::from_config(kind, &self.config);
        self.cumulative = Offset::ZERO;
    }

    /// Drop the baseline and the cumulative offset.
    pub fn reset(&mut self) {
        self.engine.reset();
        self.cumulative = Offset::ZERO;
    }

    pub fn zero_offset(&mut self) {
        self.cumulative = Offset::ZERO;
    }

    pub fn kind(&self) -> EngineKind {
        self.engine.kind()
    }

    pub fn has_reference(&self) -> bool {
        self.engine.has_reference()
    }

    pub fn cumulative(&self) -> Offset {
        self.cumulative
    }

    pub fn engine(&self) -> &StabilisationEngine {
        &self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RigConfig;
    use crate::testing::shifted_frame;

    #[test]
    fn test_blend_policies() {
        let running = Offset::new(2.0, 2.0);
        let measured = Offset::new(4.0, -2.0);
        assert_eq!(BlendPolicy::Incremental.apply(running, measured), Offset::new(6.0, 0.0));
        assert_eq!(
            BlendPolicy::Absolute { blend_factor: 1.0 }.apply(running, measured),
            measured
        );
        assert_eq!(
            BlendPolicy::Absolute { blend_factor: 0.5 }.apply(running, measured),
            Offset::new(3.0, 0.0)
        );
    }

    #[test]
    fn test_engine_kind_parse() {
        assert_eq!(EngineKind::parse("phase"), Some(EngineKind::PhaseCorrelation));
        assert_eq!(EngineKind::parse("Correlation"), Some(EngineKind::Correlation));
        assert_eq!(EngineKind::parse("optical-flow"), None);
    }

    #[test]
    fn test_select_resets_cumulative() {
        let mut config = RigConfig::default().stabilisation;
        config.engine = EngineKind::Correlation;
        config.correlation_search_radius = 8;
        let mut state = StabiliserState::new(&config);

        state.stabilise(&shifted_frame(64, 64, 3, 0, 0)).unwrap();
        state.stabilise(&shifted_frame(64, 64, 3, 4, 0)).unwrap();
        assert!(state.cumulative().x > 3.0);

        state.select(EngineKind::PhaseCorrelation);
        assert_eq!(state.cumulative(), Offset::ZERO);
        assert!(!state.has_reference());
        assert_eq!(state.kind(), EngineKind::PhaseCorrelation);
    }
}
