//! Background persistence of finished traces.
//!
//! `end_trace` hands the finished trace to a bounded channel and returns.
//! A single worker thread drains the channel into a [`TraceSink`], each
//! write running under the `database` circuit breaker. A full channel drops
//! the trace rather than blocking the pipeline.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use sightline_core::{TraceEvent, TraceSession};
use sightline_settings::DATABASE_BREAKER;
use sightline_store::{MetricSample, StoreError, TraceDatabase};
use sightline_telemetry::PerformanceManager;
use tracing::{debug, error, warn};

/// A trace ready to be written.
#[derive(Clone, Debug, PartialEq)]
pub struct FinishedTrace {
    /// Final session state.
    pub session: TraceSession,
    /// Events in sequence order.
    pub events: Vec<TraceEvent>,
    /// Performance samples taken when the trace ended.
    pub metrics: Vec<MetricSample>,
}

/// Durable destination for finished traces.
pub trait TraceSink: Send + Sync {
    /// Write one trace.
    fn persist(&self, trace: &FinishedTrace) -> Result<(), StoreError>;
}

impl TraceSink for TraceDatabase {
    fn persist(&self, trace: &FinishedTrace) -> Result<(), StoreError> {
        self.store_finished(&trace.session, &trace.events)?;
        let _ = self.store_metrics(Some(&trace.session.trace_id), &trace.metrics)?;
        Ok(())
    }
}

/// Owns the channel and the worker thread.
#[derive(Debug)]
pub(crate) struct PersistWorker {
    queue: Option<Sender<FinishedTrace>>,
    thread: Option<JoinHandle<()>>,
}

impl PersistWorker {
    pub(crate) fn spawn(
        sink: Arc<dyn TraceSink>,
        performance: Arc<PerformanceManager>,
        capacity: usize,
    ) -> std::io::Result<Self> {
        let (queue, rx) = bounded(capacity.max(1));
        let thread = std::thread::Builder::new()
            .name("sightline-persist".into())
            .spawn(move || drain(&rx, sink.as_ref(), &performance))?;
        Ok(Self { queue: Some(queue), thread: Some(thread) })
    }

    /// Enqueue without blocking. Returns `false` if the trace was dropped.
    pub(crate) fn submit(&self, trace: FinishedTrace) -> bool {
        let Some(queue) = &self.queue else {
            return false;
        };
        match queue.try_send(trace) {
            Ok(()) => true,
            Err(TrySendError::Full(trace)) => {
                warn!(trace_id = %trace.session.trace_id, "persistence queue full, dropping trace");
                false
            }
            Err(TrySendError::Disconnected(trace)) => {
                warn!(trace_id = %trace.session.trace_id, "persistence worker gone, dropping trace");
                false
            }
        }
    }

    /// Close the queue, let the worker drain it and join.
    pub(crate) fn shutdown(&mut self) {
        drop(self.queue.take());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("persistence worker panicked");
            }
        }
    }
}

impl Drop for PersistWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn drain(rx: &Receiver<FinishedTrace>, sink: &dyn TraceSink, performance: &PerformanceManager) {
    for trace in rx {
        let trace_id = &trace.session.trace_id;
        match performance.execute_with_protection(DATABASE_BREAKER, || sink.persist(&trace)) {
            Ok(()) => debug!(trace_id = %trace_id, events = trace.events.len(), "trace persisted"),
            Err(e) if e.is_circuit_open() => {
                warn!(trace_id = %trace_id, "database circuit open, trace not persisted");
            }
            Err(e) => warn!(trace_id = %trace_id, error = %e, "failed to persist trace"),
        }
    }
    debug!("persistence worker stopped");
}
