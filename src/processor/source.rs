//! Settled frames for the depth scan, taken from the processor's output.

use super::{FrameProcessor, ProcessorPhase};
use crate::depth_map::SettledFrameSource;
use crate::errors::{RigError, RigResult};
use crate::timing::FrameClock;
use crate::types::Frame;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Reads composites as the renderer would: waits for a composite captured
/// after the request, copies it, then releases it so processing continues.
pub struct CompositeFrameSource {
    processor: Arc<FrameProcessor>,
    signal: Receiver<u64>,
    clock: FrameClock,
    timeout: Duration,
}

impl CompositeFrameSource {
    /// `clock` must be the clock that stamps the incoming frames.
    pub fn new(processor: Arc<FrameProcessor>, clock: FrameClock, timeout: Duration) -> Self {
        let signal = processor.new_frame_signal();
        Self {
            processor,
            signal,
            clock,
            timeout,
        }
    }

    fn release(&self) {
        // Nothing held is fine: the renderer or a previous read already released it
        let _ = self.processor.release_frame();
    }
}

impl SettledFrameSource for CompositeFrameSource {
    fn settled_frame(&mut self) -> RigResult<Frame> {
        let requested_at = self.clock.now_us();
        let deadline = Instant::now() + self.timeout;

        // A composite captured before the request may still be held
        self.release();

        loop {
            if self.processor.phase() == ProcessorPhase::Stopped {
                return Err(RigError::SourceDisconnected("frame processor stopped".into()));
            }

            match self.signal.recv_timeout(POLL_INTERVAL) {
                Ok(_) => {
                    let Some(composite) = self.processor.get_frame() else {
                        continue;
                    };
                    self.release();
                    if composite.timestamp_us >= requested_at {
                        return Ok(composite.to_frame());
                    }
                    log::trace!("Skipping composite {} captured before settle", composite.sequence);
                }
                Err(RecvTimeoutError::Timeout) => {
                    if Instant::now() >= deadline {
                        return Err(RigError::SourceDisconnected(format!(
                            "no frame within {} ms",
                            self.timeout.as_millis()
                        )));
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(RigError::SourceDisconnected("frame signal closed".into()));
                }
            }
        }
    }
}
