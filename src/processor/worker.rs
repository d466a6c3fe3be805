//! Processing and stabilisation worker loops.

use super::{ProcessorPhase, Shared, StopReason};
use crate::errors::RigResult;
use crate::types::{Frame, Offset};
use crossbeam_channel::{select, Receiver, Sender};
use std::sync::atomic::Ordering;
use std::sync::Arc;

pub(super) fn processing_loop(
    shared: Arc<Shared>,
    stab_new_frame: Sender<Arc<Frame>>,
    stab_complete: Receiver<RigResult<Offset>>,
    shutdown: Receiver<()>,
) {
    log::debug!("Processing worker started");

    let reason = loop {
        if !shared.running.load(Ordering::SeqCst) {
            break StopReason::Requested;
        }

        shared.set_phase(ProcessorPhase::AwaitingFrame);
        let frame = match shared.queue.pop() {
            Ok(frame) => Arc::new(frame),
            Err(_) if shared.running.load(Ordering::SeqCst) => break StopReason::QueueClosed,
            Err(_) => break StopReason::Requested,
        };

        let offset = if shared.is_stabilising() {
            shared.set_phase(ProcessorPhase::Stabilizing);
            let handed_over = select! {
                send(stab_new_frame, Arc::clone(&frame)) -> sent => sent.is_ok(),
                recv(shutdown) -> _ => false,
            };
            if !handed_over {
                break StopReason::Requested;
            }
            let completed = select! {
                recv(stab_complete) -> msg => msg.ok(),
                recv(shutdown) -> _ => None,
            };
            let Some(result) = completed else {
                break StopReason::Requested;
            };
            shared.offset_or_last(result, frame.sequence)
        } else {
            shared.current_offset()
        };

        shared.set_phase(ProcessorPhase::Compositing);
        shared.publish(&frame, offset);

        shared.set_phase(ProcessorPhase::AwaitingRelease);
        let released = loop {
            if !shared.is_outstanding() {
                break true;
            }
            let woken = select! {
                recv(shared.released_rx) -> _ => true,
                recv(shutdown) -> _ => false,
            };
            if !woken {
                break false;
            }
        };
        if !released {
            break StopReason::Requested;
        }
    };

    shared.mark_stopped(reason.clone());
    log::debug!("Processing worker stopped ({:?})", reason);
}

pub(super) fn stabilisation_loop(
    shared: Arc<Shared>,
    stab_new_frame: Receiver<Arc<Frame>>,
    stab_complete: Sender<RigResult<Offset>>,
    shutdown: Receiver<()>,
) {
    log::debug!("Stabilisation worker started");
    loop {
        let next = select! {
            recv(stab_new_frame) -> msg => msg.ok(),
            recv(shutdown) -> _ => None,
        };
        let Some(frame) = next else { break };
        let result = shared.stabilise(&frame);
        if stab_complete.send(result).is_err() {
            break;
        }
    }
    log::debug!("Stabilisation worker stopped");
}
