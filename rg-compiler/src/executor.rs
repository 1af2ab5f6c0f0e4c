//! Executor: walks a compiled schedule batch by batch, issuing
//! transitions, cross-queue waits/signals, and pass execution in order.

use std::collections::BTreeMap;

use rg_core::{Error, Result};
use rg_sync::{PipelineTimeline, QueueKind};

use crate::barrier::ResourceTransition;
use crate::graph::{Batch, CompiledSchedule, SignalPhase, WaitPhase};
use crate::pass::Pass;
use crate::recorder::{replay, RecordedOp};
use crate::resource::ResourceRegistry;

/// Backend hooks the executor drives; a real backend implements this against
/// its command-list API. Kept minimal and ordering-only — the executor
/// itself holds no GPU state.
pub trait Backend {
    /// Acquire (or recycle) a command list for `queue`.
    fn begin_command_list(&mut self, queue: QueueKind);

    /// Record a resource barrier batch.
    fn record_transitions(&mut self, queue: QueueKind, transitions: &[ResourceTransition]);

    /// Dispatch one op from a pass's recorded bytecode. Called for every op
    /// in declaration order, before [`Backend::execute_pass`] runs that
    /// pass's user body.
    fn dispatch_op(&mut self, op: &RecordedOp);

    /// Run the user body for `pass`, after its recorded bytecode (if any)
    /// has already been dispatched.
    fn execute_pass(&mut self, pass: &Pass);

    /// Submit the open command list, returning nothing — waits/signals are
    /// issued through the dedicated hooks below so the backend can batch
    /// them onto the same submission.
    fn submit(&mut self, queue: QueueKind);

    fn wait(&mut self, queue: QueueKind, src_queue: QueueKind, value: u64);
    fn signal(&mut self, queue: QueueKind, value: u64);
}

/// Execute one compiled frame against `backend`, advancing `timeline`'s
/// wait bookkeeping as it goes.
pub fn execute(
    schedule: &CompiledSchedule,
    passes: &[Pass],
    registry: &ResourceRegistry,
    timeline: &PipelineTimeline,
    backend: &mut impl Backend,
) -> Result<()> {
    for batch in &schedule.batches {
        run_batch(batch, passes, registry, timeline, backend)?;
    }
    Ok(())
}

/// The first requirement of `pass` whose handle no longer resolves against
/// `registry`, if any.
fn stale_requirement(pass: &Pass, registry: &ResourceRegistry) -> Option<u64> {
    pass.requirements
        .iter()
        .find(|req| registry.resolve(req.handle).is_none())
        .map(|req| req.handle.global_id)
}

fn run_batch(
    batch: &Batch,
    passes: &[Pass],
    registry: &ResourceRegistry,
    timeline: &PipelineTimeline,
    backend: &mut impl Backend,
) -> Result<()> {
    let queues_in_batch: Vec<QueueKind> = batch.lanes.keys().copied().collect();

    for &queue in &queues_in_batch {
        backend.begin_command_list(queue);

        for wait in waits_for(batch, queue, WaitPhase::BeforeTransitions) {
            backend.wait(queue, wait.src_queue, wait.value);
            timeline.wait(wait.src_queue, wait.value);
        }

        if let Some(transitions) = batch.transitions_before.get(&queue) {
            backend.record_transitions(queue, transitions);
        }

        for signal in signals_for(batch, queue, SignalPhase::AfterTransitions) {
            backend.signal(queue, signal.value);
            timeline.signal(queue, signal.value);
        }

        for wait in waits_for(batch, queue, WaitPhase::BeforeExecution) {
            backend.wait(queue, wait.src_queue, wait.value);
            timeline.wait(wait.src_queue, wait.value);
        }

        for &pass_index in batch.lanes.get(&queue).into_iter().flatten() {
            let pass = &passes[pass_index];

            if let Some(resource) = stale_requirement(pass, registry) {
                if pass.allow_failure {
                    log::warn!(
                        "pass `{}`: stale handle on resource {} treated as no-op (allow_failure)",
                        pass.name,
                        resource
                    );
                    continue;
                }
                log::error!("pass `{}`: stale handle on resource {}", pass.name, resource);
                return Err(Error::StaleHandle { resource });
            }

            replay(&pass.ops, |op| backend.dispatch_op(op));
            backend.execute_pass(pass);
        }

        if let Some(transitions) = batch.transitions_after.get(&queue) {
            backend.record_transitions(queue, transitions);
        }

        backend.submit(queue);

        for signal in signals_for(batch, queue, SignalPhase::AfterCompletion) {
            backend.signal(queue, signal.value);
            timeline.signal(queue, signal.value);
        }
    }

    Ok(())
}

fn waits_for(batch: &Batch, queue: QueueKind, phase: WaitPhase) -> Vec<crate::graph::WaitEntry> {
    batch
        .waits
        .iter()
        .filter(|w| w.dst_queue == queue && w.phase == phase)
        .copied()
        .collect()
}

fn signals_for(batch: &Batch, queue: QueueKind, phase: SignalPhase) -> Vec<crate::graph::SignalEntry> {
    batch
        .signals
        .iter()
        .filter(|s| s.queue == queue && s.phase == phase)
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pass::{PassBuilder, PassKind};
    use crate::resource::{Resource, ResourceRegistry};
    use rg_core::ResourceIdentifier;

    #[derive(Default)]
    struct RecordingBackend {
        events: Vec<String>,
    }

    impl Backend for RecordingBackend {
        fn begin_command_list(&mut self, queue: QueueKind) {
            self.events.push(format!("begin:{queue}"));
        }
        fn record_transitions(&mut self, queue: QueueKind, transitions: &[ResourceTransition]) {
            self.events
                .push(format!("barriers:{queue}:{}", transitions.len()));
        }
        fn dispatch_op(&mut self, op: &crate::recorder::RecordedOp) {
            self.events.push(format!("dispatch:{op:?}"));
        }
        fn execute_pass(&mut self, pass: &Pass) {
            self.events.push(format!("exec:{}", pass.name));
        }
        fn submit(&mut self, queue: QueueKind) {
            self.events.push(format!("submit:{queue}"));
        }
        fn wait(&mut self, queue: QueueKind, src_queue: QueueKind, value: u64) {
            self.events.push(format!("wait:{queue}<-{src_queue}@{value}"));
        }
        fn signal(&mut self, queue: QueueKind, value: u64) {
            self.events.push(format!("signal:{queue}@{value}"));
        }
    }

    #[test]
    fn cross_queue_schedule_executes_in_dependency_order() {
        let mut registry = ResourceRegistry::new();
        let t = registry.register_or_update(&ResourceIdentifier::parse("T"), Resource::new_texture(1, 1));

        let mut g = PassBuilder::new("g", PassKind::Render, &registry);
        g.write_color(t);
        let g = g.finalize();

        let mut c = PassBuilder::new("c", PassKind::Compute, &registry);
        c.read_texture(t);
        c.record_immediate(|rec| {
            rec.writer().clear_uav_float(t, [1.0, 1.0, 1.0, 1.0]);
        });
        let c = c.finalize();

        let passes = vec![g, c];
        let timeline = PipelineTimeline::new();
        let schedule = crate::graph::compile(&passes, &timeline).unwrap();

        let mut backend = RecordingBackend::default();
        execute(&schedule, &passes, &registry, &timeline, &mut backend).unwrap();

        let exec_g = backend.events.iter().position(|e| e == "exec:g").unwrap();
        let exec_c = backend.events.iter().position(|e| e == "exec:c").unwrap();
        assert!(exec_g < exec_c);
        assert!(backend.events.iter().any(|e| e.starts_with("wait:compute<-graphics")));

        // c's recorded clear must actually reach the backend, and before
        // c's own `execute_pass` call.
        let dispatch_c = backend
            .events
            .iter()
            .position(|e| e.starts_with("dispatch:ClearUavFloat"))
            .unwrap();
        assert!(dispatch_c < exec_c);
    }

    #[test]
    fn stale_handle_is_noop_when_allow_failure() {
        let mut registry = ResourceRegistry::new();
        let t = registry.register_or_update(&ResourceIdentifier::parse("T"), Resource::new_texture(1, 1));

        let mut p = PassBuilder::new("p", PassKind::Compute, &registry);
        p.storage_image(t);
        p.allow_failure(true);
        let p = p.finalize();

        registry.unregister(t);

        let passes = vec![p];
        let timeline = PipelineTimeline::new();
        let schedule = crate::graph::compile(&passes, &timeline).unwrap();

        let mut backend = RecordingBackend::default();
        execute(&schedule, &passes, &registry, &timeline, &mut backend).unwrap();
        assert!(!backend.events.iter().any(|e| e == "exec:p"));
    }

    #[test]
    fn stale_handle_fails_pass_without_allow_failure() {
        let mut registry = ResourceRegistry::new();
        let t = registry.register_or_update(&ResourceIdentifier::parse("T"), Resource::new_texture(1, 1));

        let mut p = PassBuilder::new("p", PassKind::Compute, &registry);
        p.storage_image(t);
        let p = p.finalize();

        registry.unregister(t);

        let passes = vec![p];
        let timeline = PipelineTimeline::new();
        let schedule = crate::graph::compile(&passes, &timeline).unwrap();

        let mut backend = RecordingBackend::default();
        let result = execute(&schedule, &passes, &registry, &timeline, &mut backend);
        assert!(matches!(result, Err(rg_core::Error::StaleHandle { .. })));
        assert!(!backend.events.iter().any(|e| e == "exec:p"));
    }
}
