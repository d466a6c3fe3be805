/// Frame processor
///
/// Pulls frames from the queue, stabilises them and publishes a corrected
/// composite for a single renderer. Two long-lived workers cooperate:
/// - processing: AwaitingFrame -> (Stabilizing) -> Compositing -> AwaitingRelease
/// - stabilisation: runs the engine for each frame the processing worker hands over
///
/// Hand-offs are single-slot mailboxes. Stopping clears the running flag,
/// shuts the queue down and closes the shutdown channel, which releases every
/// blocking point.
///
/// Lock domains: `general` (composite, release flag, zoom, raster, phase) and
/// `engine` (stabiliser and cumulative offset). They are never held together.
mod composite;
pub mod source;
mod worker;

pub use composite::Composite;
pub use source::CompositeFrameSource;

use crate::assert_invariant;
use crate::config::RigConfig;
use crate::errors::{RigError, RigResult};
use crate::queue::FrameQueue;
use crate::stabilise::{EngineKind, StabiliserState};
use crate::types::{Frame, Offset, RasterPosition, Region};
use crossbeam_channel::{bounded, Receiver, Sender};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProcessorPhase {
    AwaitingFrame,
    Stabilizing,
    Compositing,
    AwaitingRelease,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StopReason {
    Requested,
    QueueClosed,
    SourceDisconnected(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessorStats {
    pub frames_processed: u64,
    pub frames_stabilised: u64,
    pub stabilise_failures: u64,
    pub releases: u64,
}

struct General {
    composite: Option<Arc<Composite>>,
    /// Latest composite handed out and not yet released
    outstanding: bool,
    zoom: Option<Region>,
    raster: RasterPosition,
    phase: ProcessorPhase,
    stop_reason: Option<StopReason>,
    stats: ProcessorStats,
    stabilising: bool,
}

pub(crate) struct Shared {
    queue: Arc<FrameQueue<Frame>>,
    general: Mutex<General>,
    engine: Mutex<StabiliserState>,
    running: AtomicBool,
    frame_ready_tx: Sender<u64>,
    frame_ready_rx: Receiver<u64>,
    released_tx: Sender<()>,
    released_rx: Receiver<()>,
}

struct Workers {
    processing: JoinHandle<()>,
    stabilisation: JoinHandle<()>,
    /// Dropped on stop; closing it wakes every worker select
    shutdown_tx: Sender<()>,
}

pub struct FrameProcessor {
    shared: Arc<Shared>,
    workers: Mutex<Option<Workers>>,
    join_timeout: Duration,
    frame_size: (u32, u32),
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn general(&self) -> MutexGuard<'_, General> {
        lock(&self.general)
    }

    fn set_phase(&self, phase: ProcessorPhase) {
        let mut g = self.general();
        if g.phase != ProcessorPhase::Stopped {
            log::debug!("Processor phase {:?} -> {:?}", g.phase, phase);
            g.phase = phase;
        }
    }

    fn is_stabilising(&self) -> bool {
        self.general().stabilising
    }

    fn is_outstanding(&self) -> bool {
        self.general().outstanding
    }

    fn current_offset(&self) -> Offset {
        lock(&self.engine).cumulative()
    }

    /// Measure `frame` under the engine lock only.
    fn stabilise(&self, frame: &Frame) -> RigResult<Offset> {
        let result = lock(&self.engine).stabilise(frame);
        let mut g = self.general();
        match &result {
            Ok(_) => g.stats.frames_stabilised += 1,
            Err(_) => g.stats.stabilise_failures += 1,
        }
        result
    }

    /// Offset from a stabiliser result, falling back to the last known offset.
    fn offset_or_last(&self, result: RigResult<Offset>, sequence: u64) -> Offset {
        match result {
            Ok(offset) => offset,
            Err(e) => {
                log::warn!("Stabilisation of frame {} failed: {}", sequence, e);
                self.current_offset()
            }
        }
    }

    /// Composite `frame` and make it the current output.
    fn publish(&self, frame: &Frame, offset: Offset) -> Arc<Composite> {
        let (zoom, raster) = {
            let g = self.general();
            (g.zoom, g.raster)
        };

        let composite = Arc::new(Composite::build(frame, offset, zoom, raster));

        {
            let mut g = self.general();
            assert_invariant!(
                !g.outstanding,
                "A composite is published only after the previous one is released",
                "processor::publish"
            );
            g.composite = Some(Arc::clone(&composite));
            g.outstanding = true;
            g.stats.frames_processed += 1;
        }

        // Renderer may still be busy with the last signal; it will see the
        // newest composite when it calls get_frame
        let _ = self.frame_ready_tx.try_send(composite.sequence);
        log::trace!(
            "Published composite {} (offset {:.2}, {:.2})",
            composite.sequence,
            offset.x,
            offset.y
        );
        composite
    }

    fn mark_stopped(&self, reason: StopReason) {
        let mut g = self.general();
        g.phase = ProcessorPhase::Stopped;
        if g.stop_reason.is_none() {
            g.stop_reason = Some(reason);
        }
    }
}

impl FrameProcessor {
    pub fn new(queue: Arc<FrameQueue<Frame>>, config: &RigConfig) -> Self {
        let (frame_ready_tx, frame_ready_rx) = bounded(1);
        let (released_tx, released_rx) = bounded(1);
        let shared = Shared {
            queue,
            general: Mutex::new(General {
                composite: None,
                outstanding: false,
                zoom: None,
                raster: RasterPosition::ORIGIN,
                phase: ProcessorPhase::AwaitingFrame,
                stop_reason: None,
                stats: ProcessorStats::default(),
                stabilising: config.stabilisation.enabled,
            }),
            engine: Mutex::new(StabiliserState::new(&config.stabilisation)),
            running: AtomicBool::new(false),
            frame_ready_tx,
            frame_ready_rx,
            released_tx,
            released_rx,
        };
        Self {
            shared: Arc::new(shared),
            workers: Mutex::new(None),
            join_timeout: Duration::from_millis(config.stream.join_timeout_ms),
            frame_size: (config.stream.frame_width, config.stream.frame_height),
        }
    }

    pub fn queue(&self) -> &Arc<FrameQueue<Frame>> {
        &self.shared.queue
    }

    /// Spawn the processing and stabilisation workers.
    pub fn start(&self) -> RigResult<()> {
        let mut workers = lock(&self.workers);
        if workers.is_some() {
            return Err(RigError::InvalidTransition("processor is already running".into()));
        }
        if self.phase() == ProcessorPhase::Stopped || self.shared.queue.is_shutdown() {
            return Err(RigError::InvalidTransition("processor has been stopped".into()));
        }

        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let (stab_new_tx, stab_new_rx) = bounded::<Arc<Frame>>(1);
        let (stab_done_tx, stab_done_rx) = bounded::<RigResult<Offset>>(1);

        self.shared.running.store(true, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let shutdown = shutdown_rx.clone();
        let stabilisation = std::thread::Builder::new()
            .name("rigstream-stabilise".into())
            .spawn(move || worker::stabilisation_loop(shared, stab_new_rx, stab_done_tx, shutdown))
            .map_err(|e| RigError::WorkerPanicked(format!("spawn failed: {e}")))?;

        let shared = Arc::clone(&self.shared);
        let processing = match std::thread::Builder::new()
            .name("rigstream-process".into())
            .spawn(move || worker::processing_loop(shared, stab_new_tx, stab_done_rx, shutdown_rx))
        {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                drop(shutdown_tx);
                let _ = stabilisation.join();
                return Err(RigError::WorkerPanicked(format!("spawn failed: {e}")));
            }
        };

        *workers = Some(Workers {
            processing,
            stabilisation,
            shutdown_tx,
        });
        log::info!("Frame processor started");
        Ok(())
    }

    /// Stop both workers and wait for them, bounded by the join timeout.
    /// The queue is shut down as part of stopping.
    pub fn stop(&self) -> RigResult<()> {
        let Some(workers) = lock(&self.workers).take() else {
            self.shared.mark_stopped(StopReason::Requested);
            return Ok(());
        };

        self.shared.running.store(false, Ordering::SeqCst);
        {
            let mut g = self.shared.general();
            if g.stop_reason.is_none() {
                g.stop_reason = Some(StopReason::Requested);
            }
        }
        self.shared.queue.shutdown();
        drop(workers.shutdown_tx);

        let deadline = Instant::now() + self.join_timeout;
        let mut failures = Vec::new();
        for (name, handle) in [
            ("processing", workers.processing),
            ("stabilisation", workers.stabilisation),
        ] {
            match join_until(handle, deadline) {
                JoinOutcome::Joined => {}
                JoinOutcome::Panicked => failures.push(RigError::WorkerPanicked(name.into())),
                JoinOutcome::TimedOut => failures.push(RigError::Timeout(format!(
                    "{} worker did not stop within {} ms",
                    name,
                    self.join_timeout.as_millis()
                ))),
            }
        }

        self.shared.mark_stopped(StopReason::Requested);
        log::info!("Frame processor stopped");
        match failures.into_iter().next() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// The camera went away: drop queued frames and the held composite, then stop.
    pub fn source_disconnected(&self, reason: &str) -> RigResult<()> {
        log::warn!("Frame source disconnected: {}", reason);
        {
            let mut g = self.shared.general();
            if g.stop_reason.is_none() {
                g.stop_reason = Some(StopReason::SourceDisconnected(reason.to_string()));
            }
        }
        self.shared.queue.shutdown();
        let discarded = self.shared.queue.drain();
        if !discarded.is_empty() {
            log::debug!("Discarded {} queued frames", discarded.len());
        }
        let result = self.stop();
        {
            let mut g = self.shared.general();
            g.composite = None;
            g.outstanding = false;
        }
        result
    }

    /// One full processing cycle on the calling thread. Fails with
    /// `FrameNotReleased` while the previous composite is still held.
    pub fn process_frame(&self) -> RigResult<Arc<Composite>> {
        if lock(&self.workers).is_some() {
            return Err(RigError::InvalidTransition(
                "processing worker owns the queue while running".into(),
            ));
        }
        if self.phase() == ProcessorPhase::Stopped {
            return Err(RigError::QueueShutdown);
        }
        if self.shared.is_outstanding() {
            return Err(RigError::FrameNotReleased);
        }

        let frame = self.shared.queue.pop()?;
        let offset = if self.shared.is_stabilising() {
            self.shared.set_phase(ProcessorPhase::Stabilizing);
            let result = self.shared.stabilise(&frame);
            self.shared.offset_or_last(result, frame.sequence)
        } else {
            self.shared.current_offset()
        };

        self.shared.set_phase(ProcessorPhase::Compositing);
        let composite = self.shared.publish(&frame, offset);
        self.shared.set_phase(ProcessorPhase::AwaitingRelease);
        Ok(composite)
    }

    /// Run the active engine on `frame` and fold the result into the
    /// cumulative offset.
    pub fn stabilise(&self, frame: &Frame) -> RigResult<Offset> {
        self.shared.stabilise(frame)
    }

    /// Hand the current composite back. Exactly one release per composite.
    pub fn release_frame(&self) -> RigResult<()> {
        {
            let mut g = self.shared.general();
            if !g.outstanding {
                return Err(RigError::FrameNotHeld);
            }
            g.outstanding = false;
            g.stats.releases += 1;
            assert_invariant!(
                g.stats.releases <= g.stats.frames_processed,
                "Composite is released at most once",
                "processor::release_frame"
            );
            if g.phase == ProcessorPhase::AwaitingRelease && !self.is_running() {
                g.phase = ProcessorPhase::AwaitingFrame;
            }
        }
        // Worker re-checks the flag, so a token left over from inline use is harmless
        let _ = self.shared.released_tx.try_send(());
        Ok(())
    }

    /// Current composite, if one has been produced.
    pub fn get_frame(&self) -> Option<Arc<Composite>> {
        self.shared.general().composite.clone()
    }

    /// Receives the sequence number of each newly published composite.
    pub fn new_frame_signal(&self) -> Receiver<u64> {
        self.shared.frame_ready_rx.clone()
    }

    /// Zero the raster cursor and the cumulative offset.
    pub fn reset_raster(&self) {
        self.shared.general().raster = RasterPosition::ORIGIN;
        lock(&self.shared.engine).zero_offset();
        log::debug!("Raster and offset reset");
    }

    pub fn set_raster_position(&self, position: RasterPosition) {
        self.shared.general().raster = position;
    }

    pub fn raster_position(&self) -> RasterPosition {
        self.shared.general().raster
    }

    pub fn reset_zoom(&self) {
        self.shared.general().zoom = None;
    }

    /// Crop subsequent composites to `region`, which must lie inside the
    /// configured frame size.
    pub fn set_zoom(&self, region: Region) -> RigResult<()> {
        let (frame_width, frame_height) = self.frame_size;
        if !region.fits_within(frame_width, frame_height) {
            return Err(RigError::InvalidConfig(format!(
                "zoom {}x{}+{}+{} does not fit a {}x{} frame",
                region.width, region.height, region.x, region.y, frame_width, frame_height
            )));
        }
        self.shared.general().zoom = Some(region);
        Ok(())
    }

    pub fn zoom(&self) -> Option<Region> {
        self.shared.general().zoom
    }

    pub fn set_stabilising(&self, enabled: bool) {
        let mut g = self.shared.general();
        if g.stabilising != enabled {
            log::info!("Stabilisation {}", if enabled { "enabled" } else { "disabled" });
        }
        g.stabilising = enabled;
    }

    pub fn is_stabilising(&self) -> bool {
        self.shared.is_stabilising()
    }

    /// Switch engines. The new engine starts without a baseline and the
    /// cumulative offset restarts at zero.
    pub fn select_engine(&self, kind: EngineKind) {
        let mut engine = lock(&self.shared.engine);
        if engine.kind() != kind {
            log::info!("Stabilisation engine {} -> {}", engine.kind().as_str(), kind.as_str());
        }
        engine.select(kind);
    }

    pub fn engine_kind(&self) -> EngineKind {
        lock(&self.shared.engine).kind()
    }

    /// Drop the engine's reference/template and the cumulative offset.
    pub fn reset_engine(&self) {
        lock(&self.shared.engine).reset();
        log::debug!("Stabilisation engine reset");
    }

    pub fn has_reference(&self) -> bool {
        lock(&self.shared.engine).has_reference()
    }

    pub fn current_offset(&self) -> Offset {
        self.shared.current_offset()
    }

    pub fn phase(&self) -> ProcessorPhase {
        self.shared.general().phase
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.shared.general().stop_reason.clone()
    }

    pub fn stats(&self) -> ProcessorStats {
        self.shared.general().stats
    }
}

impl Drop for FrameProcessor {
    fn drop(&mut self) {
        if lock(&self.workers).is_some() {
            if let Err(e) = self.stop() {
                log::warn!("Error stopping processor in drop: {}", e);
            }
        }
    }
}

enum JoinOutcome {
    Joined,
    Panicked,
    TimedOut,
}

fn join_until(handle: JoinHandle<()>, deadline: Instant) -> JoinOutcome {
    loop {
        if handle.is_finished() {
            return match handle.join() {
                Ok(()) => JoinOutcome::Joined,
                Err(_) => JoinOutcome::Panicked,
            };
        }
        if Instant::now() >= deadline {
            // Detach rather than hang; the worker exits once it observes shutdown
            return JoinOutcome::TimedOut;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}
