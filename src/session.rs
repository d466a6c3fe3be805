//! Streaming session: owns the queue, processor and scan thread for one
//! camera connection and enforces which operations are legal when.

use crate::config::RigConfig;
use crate::depth_map::{CancelToken, DepthMapData, DepthMapScanner, FocusActuator, ScanReport};
use crate::errors::{RigError, RigResult};
use crate::processor::{CompositeFrameSource, FrameProcessor};
use crate::queue::FrameQueue;
use crate::sharpness::SharpnessAnalyzer;
use crate::stabilise::EngineKind;
use crate::timing::FrameClock;
use crate::types::Frame;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Streaming { stabilising: bool },
    Scanning { stabilising: bool },
    Disconnected,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    StartStreaming,
    StopStreaming,
    EnableStabilisation,
    DisableStabilisation,
    StartScan,
    ScanFinished,
    SourceLost,
    Close,
}

impl SessionState {
    /// State after `event`, or `InvalidTransition` if the event is not
    /// allowed here.
    pub fn transition(self, event: SessionEvent) -> RigResult<SessionState> {
        use SessionEvent as E;
        use SessionState as S;

        let next = match (self, event) {
            (S::Closed, _) => None,
            (_, E::Close) => Some(S::Closed),

            (S::Idle | S::Disconnected, E::StartStreaming) => Some(S::Streaming { stabilising: false }),
            (S::Streaming { .. } | S::Disconnected, E::StopStreaming) => Some(S::Idle),

            (S::Streaming { .. }, E::EnableStabilisation) => Some(S::Streaming { stabilising: true }),
            (S::Streaming { .. }, E::DisableStabilisation) => Some(S::Streaming { stabilising: false }),
            (S::Scanning { .. }, E::EnableStabilisation) => Some(S::Scanning { stabilising: true }),
            (S::Scanning { .. }, E::DisableStabilisation) => Some(S::Scanning { stabilising: false }),

            (S::Streaming { stabilising }, E::StartScan) => Some(S::Scanning { stabilising }),
            (S::Scanning { stabilising }, E::ScanFinished) => Some(S::Streaming { stabilising }),

            (S::Streaming { .. } | S::Scanning { .. }, E::SourceLost) => Some(S::Disconnected),
            _ => None,
        };

        next.ok_or_else(|| RigError::InvalidTransition(format!("{:?} while {:?}", event, self)))
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, SessionState::Streaming { .. } | SessionState::Scanning { .. })
    }
}

/// Producer handle: stamps sequence and capture time, then queues the frame.
#[derive(Clone)]
pub struct FrameSink {
    queue: Arc<FrameQueue<Frame>>,
    clock: FrameClock,
    next_sequence: Arc<AtomicU64>,
    frame_size: (u32, u32),
}

impl FrameSink {
    /// Queue `frame`, returning the sequence number it was given.
    pub fn push(&self, frame: Frame) -> RigResult<u64> {
        let timestamp_us = self.clock.now_us();
        self.push_stamped(frame, timestamp_us)
    }

    fn push_stamped(&self, frame: Frame, timestamp_us: u64) -> RigResult<u64> {
        if frame.dimensions() != self.frame_size {
            return Err(RigError::DimensionMismatch {
                expected: self.frame_size,
                got: frame.dimensions(),
            });
        }
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let frame = frame
            .with_sequence(sequence)
            .with_timestamp_us(timestamp_us);
        self.queue.push(frame).map_err(|(e, _)| e)?;
        Ok(sequence)
    }

    /// Queue `frame` stamped with the moment it was captured rather than
    /// the moment it arrived.
    pub fn push_captured_at(&self, frame: Frame, captured_at: Instant) -> RigResult<u64> {
        let timestamp_us = self.clock.us_at(captured_at);
        self.push_stamped(frame, timestamp_us)
    }

    /// No more frames will follow. Queued frames are abandoned and the
    /// processing worker stops.
    pub fn close(&self) {
        self.queue.shutdown();
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_shutdown()
    }

    /// Frames discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }

    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }
}

struct ScanJob {
    handle: JoinHandle<RigResult<ScanReport>>,
    cancel: CancelToken,
}

pub struct RigSession {
    config: RigConfig,
    clock: FrameClock,
    state: Arc<Mutex<SessionState>>,
    engine: Mutex<EngineKind>,
    processor: Mutex<Option<Arc<FrameProcessor>>>,
    scan: Mutex<Option<ScanJob>>,
    depth_map: Arc<Mutex<Option<DepthMapData>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// `Scanning -> Streaming`; any other state is left alone.
fn finish_scan(state: &Mutex<SessionState>) {
    let mut state = lock(state);
    if let SessionState::Scanning { .. } = *state {
        if let Ok(next) = state.transition(SessionEvent::ScanFinished) {
            log::debug!("Session {:?} -> {:?}", *state, next);
            *state = next;
        }
    }
}

impl RigSession {
    pub fn open(config: RigConfig) -> RigResult<Self> {
        config.validate()?;
        log::info!(
            "Opening session: {}x{} frames, {} engine",
            config.stream.frame_width,
            config.stream.frame_height,
            config.stabilisation.engine.as_str()
        );
        Ok(Self {
            engine: Mutex::new(config.stabilisation.engine),
            config,
            clock: FrameClock::new(),
            state: Arc::new(Mutex::new(SessionState::Idle)),
            processor: Mutex::new(None),
            scan: Mutex::new(None),
            depth_map: Arc::new(Mutex::new(None)),
        })
    }

    pub fn config(&self) -> &RigConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }

    fn apply(&self, event: SessionEvent) -> RigResult<SessionState> {
        let mut state = lock(&self.state);
        let next = state.transition(event)?;
        log::debug!("Session {:?} -> {:?}", *state, next);
        *state = next;
        Ok(next)
    }

    /// Start the processor over a fresh queue and return the producer handle.
    pub fn start_streaming(&self) -> RigResult<FrameSink> {
        let mut state = lock(&self.state);
        let mut next = state.transition(SessionEvent::StartStreaming)?;

        let queue = Arc::new(match self.config.stream.queue_capacity {
            0 => FrameQueue::new(),
            n => FrameQueue::with_capacity(n),
        });
        let processor = Arc::new(FrameProcessor::new(Arc::clone(&queue), &self.config));
        processor.select_engine(*lock(&self.engine));
        processor.start()?;

        if self.config.stabilisation.enabled {
            next = next.transition(SessionEvent::EnableStabilisation)?;
        }
        *lock(&self.processor) = Some(processor);
        *state = next;
        log::info!("Streaming started");

        Ok(FrameSink {
            queue,
            clock: self.clock.clone(),
            next_sequence: Arc::new(AtomicU64::new(0)),
            frame_size: (self.config.stream.frame_width, self.config.stream.frame_height),
        })
    }

    /// Stop streaming. A running scan is cancelled and waited for first.
    pub fn stop_streaming(&self) -> RigResult<()> {
        if lock(&self.scan).is_some() {
            self.cancel_scan();
            if let Err(e) = self.wait_scan() {
                log::warn!("Scan ended with error while stopping: {}", e);
            }
        }

        self.apply(SessionEvent::StopStreaming)?;
        let processor = lock(&self.processor).take();
        if let Some(processor) = processor {
            processor.stop()?;
        }
        log::info!("Streaming stopped");
        Ok(())
    }

    pub fn set_stabilising(&self, enabled: bool) -> RigResult<()> {
        let event = if enabled {
            SessionEvent::EnableStabilisation
        } else {
            SessionEvent::DisableStabilisation
        };
        self.apply(event)?;
        if let Some(processor) = self.processor() {
            processor.set_stabilising(enabled);
        }
        Ok(())
    }

    /// Choose the engine; applies immediately when streaming and to every
    /// later stream.
    pub fn select_engine(&self, kind: EngineKind) -> RigResult<()> {
        if self.state() == SessionState::Closed {
            return Err(RigError::InvalidTransition("session is closed".into()));
        }
        *lock(&self.engine) = kind;
        if let Some(processor) = self.processor() {
            processor.select_engine(kind);
        }
        Ok(())
    }

    pub fn engine(&self) -> EngineKind {
        *lock(&self.engine)
    }

    pub fn reset_engine(&self) {
        if let Some(processor) = self.processor() {
            processor.reset_engine();
        }
    }

    pub fn processor(&self) -> Option<Arc<FrameProcessor>> {
        lock(&self.processor).clone()
    }

    /// Run a depth scan on a background thread, reading settled frames from
    /// the processor's output. The actuator is released when the scan ends,
    /// and the session returns to `Streaming` on its own.
    ///
    /// [`depth_map`](Self::depth_map) follows the scan cell by cell.
    pub fn start_depth_scan(&self, mut actuator: Box<dyn FocusActuator>) -> RigResult<()> {
        let processor = self
            .processor()
            .ok_or_else(|| RigError::InvalidTransition("depth scan needs an active stream".into()))?;
        self.apply(SessionEvent::StartScan)?;

        // A scan that ended on its own is still waiting to be joined
        let previous = lock(&self.scan).take();
        if let Some(job) = previous {
            match job.handle.join() {
                Ok(Ok(report)) => log::debug!("Previous scan ended {:?}", report.status),
                Ok(Err(e)) => log::warn!("Previous scan failed: {}", e),
                Err(_) => log::error!("Previous scan thread panicked"),
            }
        }

        processor.reset_raster();
        let grid = &self.config.depth_map;
        *lock(&self.depth_map) = Some(DepthMapData::new(grid.grid_width, grid.grid_height));

        let cancel = CancelToken::new();
        let mut scanner = DepthMapScanner::new(
            &self.config.depth_map,
            SharpnessAnalyzer::new(self.config.sharpness.metric),
        );
        let mut source = CompositeFrameSource::new(
            Arc::clone(&processor),
            self.clock.clone(),
            Duration::from_millis(self.config.depth_map.frame_timeout_ms),
        );
        let token = cancel.clone();
        let depth_map = Arc::clone(&self.depth_map);
        let state = Arc::clone(&self.state);

        let spawned = std::thread::Builder::new()
            .name("rigstream-scan".into())
            .spawn(move || {
                let result = scanner.scan(actuator.as_mut(), &mut source, &token, |position, map| {
                    processor.set_raster_position(position);
                    *lock(&depth_map) = Some(map.clone());
                });
                *lock(&depth_map) = Some(scanner.into_map());
                finish_scan(&state);
                result
            });

        match spawned {
            Ok(handle) => {
                *lock(&self.scan) = Some(ScanJob { handle, cancel });
                Ok(())
            }
            Err(e) => {
                self.apply(SessionEvent::ScanFinished)?;
                Err(RigError::WorkerPanicked(format!("scan spawn failed: {e}")))
            }
        }
    }

    /// Ask a running scan to stop at the next focus move.
    pub fn cancel_scan(&self) {
        if let Some(job) = lock(&self.scan).as_ref() {
            log::info!("Cancelling depth scan");
            job.cancel.cancel();
        }
    }

    /// Wait for the scan thread and return its report.
    pub fn wait_scan(&self) -> RigResult<ScanReport> {
        let job = lock(&self.scan)
            .take()
            .ok_or_else(|| RigError::InvalidTransition("no depth scan is running".into()))?;

        let result = job
            .handle
            .join()
            .map_err(|_| RigError::WorkerPanicked("scan".into()))
            .and_then(|r| r);

        finish_scan(&self.state);
        result
    }

    /// True while the scan thread is still running.
    pub fn is_scanning(&self) -> bool {
        lock(&self.scan)
            .as_ref()
            .is_some_and(|job| !job.handle.is_finished())
    }

    /// Map of the current or most recent scan. While a scan runs this is the
    /// partial grid, with `is_valid` false.
    pub fn depth_map(&self) -> Option<DepthMapData> {
        lock(&self.depth_map).clone()
    }

    /// The camera went away: stop processing, cancel any scan and move to
    /// `Disconnected`.
    pub fn source_disconnected(&self, reason: &str) -> RigResult<()> {
        self.apply(SessionEvent::SourceLost)?;
        if let Some(job) = lock(&self.scan).as_ref() {
            job.cancel.cancel();
        }

        let processor = lock(&self.processor).take();
        let stopped = match processor {
            Some(processor) => processor.source_disconnected(reason),
            None => Ok(()),
        };

        let job = lock(&self.scan).take();
        if let Some(job) = job {
            match job.handle.join() {
                Ok(Ok(report)) => log::info!("Scan ended by disconnect: {:?}", report.status),
                Ok(Err(e)) => log::warn!("Scan failed during disconnect: {}", e),
                Err(_) => log::error!("Scan thread panicked during disconnect"),
            }
        }
        stopped
    }

    pub fn close(&self) -> RigResult<()> {
        if self.state() == SessionState::Closed {
            return Err(RigError::InvalidTransition("session is already closed".into()));
        }
        if self.state().is_streaming() {
            if let Err(e) = self.stop_streaming() {
                log::warn!("Error stopping stream during close: {}", e);
            }
        }
        let processor = lock(&self.processor).take();
        if let Some(processor) = processor {
            processor.stop()?;
        }
        self.apply(SessionEvent::Close)?;
        log::info!("Session closed");
        Ok(())
    }
}

impl Drop for RigSession {
    fn drop(&mut self) {
        if self.state() != SessionState::Closed {
            if let Err(e) = self.close() {
                log::warn!("Error closing session in drop: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streaming_transitions() {
        let s = SessionState::Idle.transition(SessionEvent::StartStreaming).unwrap();
        assert_eq!(s, SessionState::Streaming { stabilising: false });
        let s = s.transition(SessionEvent::EnableStabilisation).unwrap();
        let s = s.transition(SessionEvent::StartScan).unwrap();
        assert_eq!(s, SessionState::Scanning { stabilising: true });
        let s = s.transition(SessionEvent::ScanFinished).unwrap();
        assert_eq!(s, SessionState::Streaming { stabilising: true });
        assert_eq!(s.transition(SessionEvent::StopStreaming).unwrap(), SessionState::Idle);
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let idle = SessionState::Idle;
        assert!(idle.transition(SessionEvent::StartScan).is_err());
        assert!(idle.transition(SessionEvent::EnableStabilisation).is_err());
        assert!(idle.transition(SessionEvent::SourceLost).is_err());

        let scanning = SessionState::Scanning { stabilising: false };
        assert!(scanning.transition(SessionEvent::StopStreaming).is_err());
        assert!(scanning.transition(SessionEvent::StartScan).is_err());

        let closed = SessionState::Closed;
        assert!(matches!(
            closed.transition(SessionEvent::StartStreaming),
            Err(RigError::InvalidTransition(_))
        ));
        assert!(closed.transition(SessionEvent::Close).is_err());
    }

    #[test]
    fn test_disconnect_and_recover() {
        let s = SessionState::Scanning { stabilising: false }
            .transition(SessionEvent::SourceLost)
            .unwrap();
        assert_eq!(s, SessionState::Disconnected);
        assert!(s.transition(SessionEvent::ScanFinished).is_err());
        assert!(s.transition(SessionEvent::StartStreaming).is_ok());
        assert_eq!(s.transition(SessionEvent::Close).unwrap(), SessionState::Closed);
    }

    #[test]
    fn test_sink_rejects_wrong_size() {
        let mut config = RigConfig::default();
        config.stream.frame_width = 32;
        config.stream.frame_height = 32;
        config.depth_map.grid_width = 4;
        config.depth_map.grid_height = 4;
        config.stabilisation.phase_block_size = 4;
        let session = RigSession::open(config).unwrap();
        let sink = session.start_streaming().unwrap();

        let err = sink.push(crate::testing::textured_frame(16, 16, 1)).unwrap_err();
        assert!(matches!(err, RigError::DimensionMismatch { .. }));
        assert_eq!(sink.push(crate::testing::textured_frame(32, 32, 1)).unwrap(), 0);

        session.close().unwrap();
        assert_eq!(session.state(), SessionState::Closed);
    }
}
