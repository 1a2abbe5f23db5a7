//! Runs one handler for one recorded event and stores the outcome.

use std::{sync::Arc, time::Duration};

use serde_json::Value;
use tollgate_core::{Clock, DispatchOutcome, EventLog, IngestEvent, IngestObserver};
use tracing::{debug, warn};

use crate::{
    error::HandlerError,
    registry::{DispatchContext, EventHandler},
};

/// A recorded event waiting for its handler.
#[derive(Debug, Clone)]
pub struct DispatchJob {
    /// Event identity and arrival time.
    pub context: DispatchContext,
    /// Parsed payload handed to the handler.
    pub payload: Value,
    /// Handler registered for the event type.
    pub handler: Arc<dyn EventHandler>,
}

/// Executes dispatch jobs.
///
/// The handler runs on its own task so a panic or a timeout is contained
/// and recorded as `dispatched_error` like any other failure.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    event_log: Arc<dyn EventLog>,
    observer: Arc<dyn IngestObserver>,
    clock: Arc<dyn Clock>,
    handler_timeout: Duration,
}

impl Dispatcher {
    /// Creates a dispatcher.
    pub fn new(
        event_log: Arc<dyn EventLog>,
        observer: Arc<dyn IngestObserver>,
        clock: Arc<dyn Clock>,
        handler_timeout: Duration,
    ) -> Self {
        Self { event_log, observer, clock, handler_timeout }
    }

    /// The event log outcomes are written to.
    pub fn event_log(&self) -> &Arc<dyn EventLog> {
        &self.event_log
    }

    /// The observer milestones are published to.
    pub fn observer(&self) -> &Arc<dyn IngestObserver> {
        &self.observer
    }

    /// The clock used for timestamps.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Runs the job's handler and records the result.
    ///
    /// Never fails: handler errors become `DispatchedError`, and a failure to
    /// store the outcome is logged and leaves the record `pending`.
    pub async fn run(&self, job: DispatchJob) -> DispatchOutcome {
        let DispatchJob { context, payload, handler } = job;
        let started = self.clock.now();

        let result = {
            let context = context.clone();
            let mut task = tokio::spawn(async move { handler.handle(&context, &payload).await });

            match tokio::time::timeout(self.handler_timeout, &mut task).await {
                Ok(Ok(result)) => result,
                Ok(Err(join_error)) => {
                    Err(HandlerError::Other(format!("handler panicked: {join_error}")))
                },
                Err(_elapsed) => {
                    task.abort();
                    Err(HandlerError::Timeout(self.handler_timeout))
                },
            }
        };

        let elapsed = self.clock.now().saturating_duration_since(started);
        let (outcome, detail) = match &result {
            Ok(()) => (DispatchOutcome::DispatchedOk, None),
            Err(e) => (DispatchOutcome::DispatchedError, Some(e.to_string())),
        };

        if let Err(e) = self
            .event_log
            .record_outcome(&context.key, outcome, detail.clone(), self.clock.now_utc())
            .await
        {
            warn!(
                sender = %context.key.sender,
                event_id = %context.key.event_id,
                outcome = %outcome,
                error = %e,
                "failed to record dispatch outcome"
            );
        }

        let milestone = match detail {
            None => {
                debug!(
                    event_id = %context.key.event_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "handler finished"
                );
                IngestEvent::Dispatched { key: context.key, event_type: context.event_type, elapsed }
            },
            Some(error) => IngestEvent::DispatchFailed {
                key: context.key,
                event_type: context.event_type,
                error,
            },
        };
        self.observer.observe(milestone).await;

        outcome
    }
}
