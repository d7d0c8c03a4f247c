use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cli::ErrorPolicy;
use crate::error::DeliveryError;
use crate::filter::SelectionCriteria;
use crate::output::{LineSink, RenderedLine};
use crate::record::{self, LogRecord};
use crate::summary::summarize;
use crate::transport::{Disposition, MessageHandler};

/// Number of received messages after which a session stops on its own.
pub const DEFAULT_BUDGET_LIMIT: u64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Running,
    BudgetExceeded,
    Stopped,
}

/// Outcome of counting one inbound message against the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// `first` is set only for the message that moved the budget to exceeded.
    Exhausted { first: bool },
}

#[derive(Debug)]
struct BudgetState {
    count: u64,
    state: ControllerState,
}

/// Counter of inbound messages shared by all concurrent delivery cycles.
#[derive(Debug)]
pub struct ProcessingBudget {
    limit: u64,
    inner: Mutex<BudgetState>,
}

impl ProcessingBudget {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            inner: Mutex::new(BudgetState {
                count: 0,
                state: ControllerState::Running,
            }),
        }
    }

    /// Count one message and report whether it may be processed.
    ///
    /// The message whose count reaches the limit is the first one refused.
    pub fn admit(&self) -> Admission {
        let mut inner = self.inner.lock();
        inner.count = inner.count.saturating_add(1);
        if inner.count < self.limit {
            return Admission::Admitted;
        }

        let first = inner.state == ControllerState::Running;
        if first {
            inner.state = ControllerState::BudgetExceeded;
        }
        Admission::Exhausted { first }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn count(&self) -> u64 {
        self.inner.lock().count
    }

    pub fn state(&self) -> ControllerState {
        self.inner.lock().state
    }

    fn stop(&self) {
        self.inner.lock().state = ControllerState::Stopped;
    }
}

/// Runs the decode, filter, summarize and render cycle for each message and
/// decides whether the transport acknowledges or rejects it.
pub struct DeliveryController {
    criteria: SelectionCriteria,
    budget: ProcessingBudget,
    sink: Arc<dyn LineSink>,
    policy: ErrorPolicy,
    cancel: CancellationToken,
}

impl DeliveryController {
    pub fn new(
        criteria: SelectionCriteria,
        sink: Arc<dyn LineSink>,
        limit: u64,
        policy: ErrorPolicy,
    ) -> Self {
        Self {
            criteria,
            budget: ProcessingBudget::new(limit),
            sink,
            policy,
            cancel: CancellationToken::new(),
        }
    }

    /// Token cancelled once the budget is exhausted. The receive loop watches
    /// it, and interrupt handling cancels it too.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> ControllerState {
        self.budget.state()
    }

    pub fn received(&self) -> u64 {
        self.budget.count()
    }

    /// Mark the controller stopped after the receive loop has unwound.
    pub fn stop(&self) {
        self.cancel.cancel();
        self.budget.stop();
    }

    /// One delivery cycle for a raw message payload.
    pub fn process(&self, data: &[u8]) -> Result<Disposition, DeliveryError> {
        if let Admission::Exhausted { first } = self.budget.admit() {
            if first {
                info!(
                    "Received {} messages, stopping subscription",
                    self.budget.limit()
                );
            }
            self.cancel.cancel();
            return Ok(Disposition::Nack);
        }

        let record = match record::decode(data) {
            Ok(record) => record,
            Err(e) => {
                warn!("Error parsing message: {}", e);
                LogRecord::default()
            }
        };

        if !self.criteria.in_scope(&record) {
            return Ok(Disposition::Ack);
        }

        let summary = summarize(&record);
        let line = RenderedLine {
            timestamp: record.timestamp.clone(),
            pod_name: record.pod_name.clone(),
            summary,
        };

        if let Err(e) = self.sink.write_line(&line) {
            match self.policy {
                ErrorPolicy::Fatal => return Err(e.into()),
                ErrorPolicy::Skip => {
                    warn!("Skipping record from pod {}: {}", line.pod_name, e);
                }
            }
        } else {
            debug!(
                "Printed record from pod {} (project {}, zone {})",
                line.pod_name, record.project_id, record.zone
            );
        }

        Ok(Disposition::Ack)
    }
}

impl MessageHandler for DeliveryController {
    fn handle(&self, data: &[u8]) -> Result<Disposition, DeliveryError> {
        self.process(data)
    }
}

impl std::fmt::Debug for DeliveryController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryController")
            .field("criteria", &self.criteria)
            .field("budget", &self.budget)
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::MemorySink;
    use crate::summary::UNKNOWN_SUMMARY;
    use std::sync::Barrier;

    fn controller(criteria: SelectionCriteria, limit: u64) -> (DeliveryController, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::default());
        let controller = DeliveryController::new(criteria, sink.clone(), limit, ErrorPolicy::Fatal);
        (controller, sink)
    }

    #[test]
    fn test_budget_exhausts_exactly_once_under_contention() {
        let workers = 5;
        let budget = ProcessingBudget::new(5);
        let barrier = Barrier::new(workers);

        let outcomes: Vec<Admission> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        budget.admit()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(budget.count(), 5);
        assert_eq!(budget.state(), ControllerState::BudgetExceeded);
        let first = outcomes
            .iter()
            .filter(|a| **a == Admission::Exhausted { first: true })
            .count();
        let admitted = outcomes.iter().filter(|a| **a == Admission::Admitted).count();
        assert_eq!(first, 1);
        assert_eq!(admitted, 4);
    }

    #[test]
    fn test_budget_keeps_refusing_after_limit() {
        let budget = ProcessingBudget::new(2);
        assert_eq!(budget.admit(), Admission::Admitted);
        assert_eq!(budget.admit(), Admission::Exhausted { first: true });
        assert_eq!(budget.admit(), Admission::Exhausted { first: false });
        assert_eq!(budget.count(), 3);
    }

    #[test]
    fn test_exhausted_budget_rejects_and_cancels() {
        let (controller, sink) = controller(SelectionCriteria::default(), 2);
        let token = controller.cancellation_token();
        let data = br#"{"textPayload":"hello","labels":{"container.googleapis.com/pod_name":"p"}}"#;

        assert_eq!(controller.process(data).unwrap(), Disposition::Ack);
        assert!(!token.is_cancelled());

        assert_eq!(controller.process(data).unwrap(), Disposition::Nack);
        assert!(token.is_cancelled());
        assert_eq!(controller.state(), ControllerState::BudgetExceeded);
        assert_eq!(sink.lines(), vec![" [p]: hello".to_string()]);

        controller.stop();
        assert_eq!(controller.state(), ControllerState::Stopped);
    }

    #[test]
    fn test_out_of_scope_is_acked_silently() {
        let criteria = SelectionCriteria::new("app", "", "").unwrap();
        let (controller, sink) = controller(criteria, DEFAULT_BUDGET_LIMIT);
        let data = br#"{"textPayload":"x","resource":{"labels":{"container_name":"sidecar"}}}"#;

        assert_eq!(controller.process(data).unwrap(), Disposition::Ack);
        assert!(sink.lines().is_empty());
        assert_eq!(controller.received(), 1);
    }

    #[test]
    fn test_malformed_payload_prints_fallback() {
        let (controller, sink) = controller(SelectionCriteria::default(), DEFAULT_BUDGET_LIMIT);
        assert_eq!(controller.process(b"\x00garbage").unwrap(), Disposition::Ack);
        assert_eq!(sink.lines(), vec![format!(" []: {}", UNKNOWN_SUMMARY)]);
    }

    #[test]
    fn test_malformed_payload_out_of_scope_with_filter() {
        let criteria = SelectionCriteria::new("", "prod", "").unwrap();
        let (controller, sink) = controller(criteria, DEFAULT_BUDGET_LIMIT);
        assert_eq!(controller.process(b"{").unwrap(), Disposition::Ack);
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn test_mistyped_field_still_prints_in_scope_record() {
        let criteria = SelectionCriteria::new("app", "", "").unwrap();
        let (controller, sink) = controller(criteria, DEFAULT_BUDGET_LIMIT);
        let data = br#"{"textPayload":"hi","timestamp":1700000000,"labels":{"container.googleapis.com/pod_name":"app-1"},"resource":{"labels":{"container_name":"app"}}}"#;

        assert_eq!(controller.process(data).unwrap(), Disposition::Ack);
        assert_eq!(sink.lines(), vec![" [app-1]: hi".to_string()]);
    }

    #[test]
    fn test_invalid_utf8_still_prints_in_scope_record() {
        let criteria = SelectionCriteria::new("app", "", "").unwrap();
        let (controller, sink) = controller(criteria, DEFAULT_BUDGET_LIMIT);
        let data = b"{\"textPayload\":\"bad \xff byte\",\"timestamp\":\"t\",\"labels\":{\"container.googleapis.com/pod_name\":\"app-1\"},\"resource\":{\"labels\":{\"container_name\":\"app\"}}}";

        assert_eq!(controller.process(data).unwrap(), Disposition::Ack);
        assert_eq!(sink.lines(), vec!["t [app-1]: bad \u{fffd} byte".to_string()]);
    }

    #[test]
    fn test_render_failure_is_fatal_by_default() {
        let controller = DeliveryController::new(
            SelectionCriteria::default(),
            Arc::new(MemorySink::broken()),
            DEFAULT_BUDGET_LIMIT,
            ErrorPolicy::Fatal,
        );
        let err = controller.process(br#"{"textPayload":"x"}"#).unwrap_err();
        assert!(matches!(err, DeliveryError::Render(_)));
    }

    #[test]
    fn test_render_failure_can_be_skipped() {
        let controller = DeliveryController::new(
            SelectionCriteria::default(),
            Arc::new(MemorySink::broken()),
            DEFAULT_BUDGET_LIMIT,
            ErrorPolicy::Skip,
        );
        assert_eq!(
            controller.process(br#"{"textPayload":"x"}"#).unwrap(),
            Disposition::Ack
        );
    }
}
