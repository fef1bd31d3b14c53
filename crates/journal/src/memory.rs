use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{
    InsertOutcome, Journal, JournalError, Result, StepRecord, StepSeq, WorkflowId, WorkflowQuery,
    WorkflowRecord, WorkflowStatus,
};

#[derive(Default)]
struct JournalState {
    workflows: HashMap<WorkflowId, WorkflowRecord>,
    /// Insertion order, used for stable listings.
    order: Vec<WorkflowId>,
    steps: HashMap<WorkflowId, BTreeMap<StepSeq, StepRecord>>,
    events: HashMap<(WorkflowId, String), serde_json::Value>,
    signals: HashMap<(WorkflowId, String), VecDeque<serde_json::Value>>,
}

/// In-memory journal implementation for tests and single-process demos.
///
/// Provides the same interface and atomicity as the PostgreSQL
/// implementation; every call takes the state lock exactly once.
#[derive(Clone, Default)]
pub struct InMemoryJournal {
    state: Arc<RwLock<JournalState>>,
}

impl InMemoryJournal {
    /// Creates a new empty in-memory journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of step records stored.
    pub async fn step_count(&self) -> usize {
        self.state.read().await.steps.values().map(BTreeMap::len).sum()
    }

    /// Returns the number of undelivered signals for a topic.
    pub async fn pending_signals(&self, id: &WorkflowId, topic: &str) -> usize {
        self.state
            .read()
            .await
            .signals
            .get(&(id.clone(), topic.to_string()))
            .map_or(0, VecDeque::len)
    }
}

#[async_trait]
impl Journal for InMemoryJournal {
    async fn insert_workflow(&self, record: WorkflowRecord) -> Result<InsertOutcome> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.workflows.get(&record.id) {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }
        state.order.push(record.id.clone());
        state.workflows.insert(record.id.clone(), record);
        Ok(InsertOutcome::Created)
    }

    async fn get_workflow(&self, id: &WorkflowId) -> Result<Option<WorkflowRecord>> {
        Ok(self.state.read().await.workflows.get(id).cloned())
    }

    async fn transition_status(
        &self,
        id: &WorkflowId,
        from: &[WorkflowStatus],
        to: WorkflowStatus,
        error: Option<String>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let record = state
            .workflows
            .get_mut(id)
            .ok_or_else(|| JournalError::WorkflowNotFound(id.clone()))?;
        if !from.contains(&record.status) {
            tracing::debug!(workflow_id = %id, status = %record.status, target = %to, "status transition skipped");
            return Ok(false);
        }
        record.status = to;
        if error.is_some() {
            record.error = error;
        }
        record.updated_at = Utc::now();
        Ok(true)
    }

    async fn complete_workflow(
        &self,
        id: &WorkflowId,
        status: WorkflowStatus,
        output: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<WorkflowStatus> {
        let mut state = self.state.write().await;
        let record = state
            .workflows
            .get_mut(id)
            .ok_or_else(|| JournalError::WorkflowNotFound(id.clone()))?;
        if record.status != WorkflowStatus::Cancelled {
            record.status = status;
            record.output = output;
            record.error = error;
        }
        let now = Utc::now();
        record.updated_at = now;
        record.completed_at = Some(now);
        Ok(record.status)
    }

    async fn list_workflows(&self, query: WorkflowQuery) -> Result<Vec<WorkflowRecord>> {
        let state = self.state.read().await;
        let records = state
            .order
            .iter()
            .filter_map(|id| state.workflows.get(id))
            .filter(|r| query.matches(r))
            .skip(query.offset.unwrap_or(0))
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(records)
    }

    async fn append_step(&self, record: StepRecord) -> Result<()> {
        let mut state = self.state.write().await;
        let steps = state.steps.entry(record.workflow_id.clone()).or_default();
        if steps.contains_key(&record.seq) {
            tracing::debug!(workflow_id = %record.workflow_id, seq = %record.seq, "step already recorded");
            return Err(JournalError::StepConflict {
                workflow_id: record.workflow_id,
                seq: record.seq,
            });
        }
        steps.insert(record.seq, record);
        Ok(())
    }

    async fn get_step(&self, id: &WorkflowId, seq: StepSeq) -> Result<Option<StepRecord>> {
        Ok(self
            .state
            .read()
            .await
            .steps
            .get(id)
            .and_then(|steps| steps.get(&seq))
            .cloned())
    }

    async fn list_steps(&self, id: &WorkflowId) -> Result<Vec<StepRecord>> {
        Ok(self
            .state
            .read()
            .await
            .steps
            .get(id)
            .map(|steps| steps.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn copy_steps(
        &self,
        from: &WorkflowId,
        to: &WorkflowId,
        before: StepSeq,
    ) -> Result<usize> {
        let mut state = self.state.write().await;
        let copied: Vec<StepRecord> = state
            .steps
            .get(from)
            .map(|steps| {
                steps
                    .range(..before)
                    .map(|(_, s)| StepRecord {
                        workflow_id: to.clone(),
                        ..s.clone()
                    })
                    .collect()
            })
            .unwrap_or_default();

        let target = state.steps.entry(to.clone()).or_default();
        if let Some(seq) = copied.iter().map(|s| s.seq).find(|seq| target.contains_key(seq)) {
            return Err(JournalError::StepConflict {
                workflow_id: to.clone(),
                seq,
            });
        }
        let count = copied.len();
        target.extend(copied.into_iter().map(|s| (s.seq, s)));
        Ok(count)
    }

    async fn set_event(
        &self,
        id: &WorkflowId,
        key: &str,
        value: serde_json::Value,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let slot = (id.clone(), key.to_string());
        if state.events.contains_key(&slot) {
            return Ok(false);
        }
        state.events.insert(slot, value);
        Ok(true)
    }

    async fn get_event(&self, id: &WorkflowId, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self
            .state
            .read()
            .await
            .events
            .get(&(id.clone(), key.to_string()))
            .cloned())
    }

    async fn push_signal(
        &self,
        id: &WorkflowId,
        topic: &str,
        payload: serde_json::Value,
    ) -> Result<()> {
        self.state
            .write()
            .await
            .signals
            .entry((id.clone(), topic.to_string()))
            .or_default()
            .push_back(payload);
        Ok(())
    }

    async fn pop_signal(&self, id: &WorkflowId, topic: &str) -> Result<Option<serde_json::Value>> {
        let payload = self
            .state
            .write()
            .await
            .signals
            .get_mut(&(id.clone(), topic.to_string()))
            .and_then(VecDeque::pop_front);
        if payload.is_some() {
            tracing::debug!(workflow_id = %id, topic, "signal consumed");
        }
        Ok(payload)
    }

    async fn receive_signal(
        &self,
        id: &WorkflowId,
        topic: &str,
        seq: StepSeq,
        name: &str,
    ) -> Result<Option<serde_json::Value>> {
        let mut state = self.state.write().await;
        let state = &mut *state;
        let inbox = (id.clone(), topic.to_string());
        if state.signals.get(&inbox).is_none_or(VecDeque::is_empty) {
            return Ok(None);
        }

        let steps = state.steps.entry(id.clone()).or_default();
        if steps.contains_key(&seq) {
            tracing::debug!(workflow_id = %id, %seq, topic, "receive step already recorded");
            return Err(JournalError::StepConflict {
                workflow_id: id.clone(),
                seq,
            });
        }
        let Some(payload) = state.signals.get_mut(&inbox).and_then(VecDeque::pop_front) else {
            return Ok(None);
        };
        steps.insert(
            seq,
            StepRecord::success(id.clone(), seq, name, payload.clone()),
        );
        tracing::debug!(workflow_id = %id, %seq, topic, "signal received");
        Ok(Some(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JournalExt;
    use serde_json::json;

    fn record(id: &str, name: &str) -> WorkflowRecord {
        WorkflowRecord::new(WorkflowId::new(id), name, json!(null))
    }

    #[tokio::test]
    async fn insert_is_idempotent_per_id() {
        let journal = InMemoryJournal::new();

        let first = journal.insert_workflow(record("k1", "checkout")).await.unwrap();
        assert!(first.is_created());

        let second = journal.insert_workflow(record("k1", "other")).await.unwrap();
        match second {
            InsertOutcome::Existing(existing) => assert_eq!(existing.name, "checkout"),
            InsertOutcome::Created => panic!("expected existing workflow"),
        }
        assert_eq!(journal.list_workflows(WorkflowQuery::new()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn append_and_replay_steps_in_order() {
        let journal = InMemoryJournal::new();
        let id = WorkflowId::new("wf");

        journal
            .append_step(StepRecord::success(id.clone(), StepSeq::new(2), "b", json!(2)))
            .await
            .unwrap();
        journal
            .append_step(StepRecord::success(id.clone(), StepSeq::new(1), "a", json!(1)))
            .await
            .unwrap();

        let steps = journal.list_steps(&id).await.unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].name, "a");
        assert_eq!(steps[1].name, "b");
        assert_eq!(journal.last_seq(&id).await.unwrap(), StepSeq::new(2));

        let step = journal.get_step(&id, StepSeq::new(1)).await.unwrap().unwrap();
        assert_eq!(step.output, Some(json!(1)));
    }

    #[tokio::test]
    async fn duplicate_step_is_a_conflict() {
        let journal = InMemoryJournal::new();
        let id = WorkflowId::new("wf");

        journal
            .append_step(StepRecord::success(id.clone(), StepSeq::first(), "a", json!(1)))
            .await
            .unwrap();
        let result = journal
            .append_step(StepRecord::success(id.clone(), StepSeq::first(), "a", json!(9)))
            .await;

        assert!(matches!(result, Err(JournalError::StepConflict { .. })));
        let step = journal.get_step(&id, StepSeq::first()).await.unwrap().unwrap();
        assert_eq!(step.output, Some(json!(1)));
    }

    #[tokio::test]
    async fn transition_of_missing_workflow_fails() {
        let journal = InMemoryJournal::new();
        let result = journal
            .transition_status(
                &WorkflowId::new("nope"),
                &[WorkflowStatus::Pending],
                WorkflowStatus::Cancelled,
                None,
            )
            .await;
        assert!(matches!(result, Err(JournalError::WorkflowNotFound(_))));
    }

    #[tokio::test]
    async fn transition_only_applies_from_listed_statuses() {
        let journal = InMemoryJournal::new();
        let id = WorkflowId::new("wf");
        journal
            .insert_workflow(record("wf", "checkout").with_status(WorkflowStatus::Enqueued))
            .await
            .unwrap();

        let moved = journal
            .transition_status(&id, &[WorkflowStatus::Enqueued], WorkflowStatus::Pending, None)
            .await
            .unwrap();
        assert!(moved);

        let moved_again = journal
            .transition_status(&id, &[WorkflowStatus::Enqueued], WorkflowStatus::Pending, None)
            .await
            .unwrap();
        assert!(!moved_again);
        assert_eq!(journal.workflow_status(&id).await.unwrap(), Some(WorkflowStatus::Pending));
    }

    #[tokio::test]
    async fn completing_a_cancelled_workflow_keeps_it_cancelled() {
        let journal = InMemoryJournal::new();
        let id = WorkflowId::new("wf");
        journal.insert_workflow(record("wf", "checkout")).await.unwrap();
        journal
            .transition_status(
                &id,
                &[WorkflowStatus::Pending],
                WorkflowStatus::Cancelled,
                Some("cancelled".to_string()),
            )
            .await
            .unwrap();

        let status = journal
            .complete_workflow(&id, WorkflowStatus::Success, Some(json!("late")), None)
            .await
            .unwrap();
        assert_eq!(status, WorkflowStatus::Cancelled);

        let loaded = journal.get_workflow(&id).await.unwrap().unwrap();
        assert_eq!(loaded.status, WorkflowStatus::Cancelled);
        assert_eq!(loaded.output, None);
        assert_eq!(loaded.error.as_deref(), Some("cancelled"));
        assert!(loaded.completed_at.is_some());
    }

    #[tokio::test]
    async fn receive_signal_consumes_and_records_together() {
        let journal = InMemoryJournal::new();
        let id = WorkflowId::new("wf");

        let empty = journal
            .receive_signal(&id, "topic", StepSeq::first(), "recv")
            .await
            .unwrap();
        assert_eq!(empty, None);
        assert_eq!(journal.step_count().await, 0);

        journal.push_signal(&id, "topic", json!("paid")).await.unwrap();
        let received = journal
            .receive_signal(&id, "topic", StepSeq::first(), "recv")
            .await
            .unwrap();
        assert_eq!(received, Some(json!("paid")));
        assert_eq!(journal.pending_signals(&id, "topic").await, 0);

        let step = journal.get_step(&id, StepSeq::first()).await.unwrap().unwrap();
        assert_eq!(step.name, "recv");
        assert_eq!(step.output, Some(json!("paid")));
    }

    #[tokio::test]
    async fn receive_signal_conflict_leaves_message_in_inbox() {
        let journal = InMemoryJournal::new();
        let id = WorkflowId::new("wf");
        journal
            .append_step(StepRecord::success(id.clone(), StepSeq::first(), "recv", json!(null)))
            .await
            .unwrap();
        journal.push_signal(&id, "topic", json!("paid")).await.unwrap();

        let result = journal
            .receive_signal(&id, "topic", StepSeq::first(), "recv")
            .await;
        assert!(matches!(result, Err(JournalError::StepConflict { .. })));
        assert_eq!(journal.pending_signals(&id, "topic").await, 1);
    }

    #[tokio::test]
    async fn events_are_set_once() {
        let journal = InMemoryJournal::new();
        let id = WorkflowId::new("wf");

        assert!(journal.set_event(&id, "payment_id", json!("wf")).await.unwrap());
        assert!(!journal.set_event(&id, "payment_id", json!("other")).await.unwrap());
        assert_eq!(
            journal.get_event(&id, "payment_id").await.unwrap(),
            Some(json!("wf"))
        );
        assert_eq!(journal.get_event(&id, "order_id").await.unwrap(), None);
    }

    #[tokio::test]
    async fn signals_are_consumed_once_in_fifo_order() {
        let journal = InMemoryJournal::new();
        let id = WorkflowId::new("wf");

        journal.push_signal(&id, "topic", json!("first")).await.unwrap();
        journal.push_signal(&id, "topic", json!("second")).await.unwrap();
        assert_eq!(journal.pending_signals(&id, "topic").await, 2);

        assert_eq!(journal.pop_signal(&id, "topic").await.unwrap(), Some(json!("first")));
        assert_eq!(journal.pop_signal(&id, "topic").await.unwrap(), Some(json!("second")));
        assert_eq!(journal.pop_signal(&id, "topic").await.unwrap(), None);
        assert_eq!(journal.pop_signal(&id, "other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn copy_steps_stops_before_the_fork_point() {
        let journal = InMemoryJournal::new();
        let from = WorkflowId::new("original");
        let to = WorkflowId::new("fork");

        for seq in 1..=4 {
            journal
                .append_step(StepRecord::success(
                    from.clone(),
                    StepSeq::new(seq),
                    format!("step{seq}"),
                    json!(seq),
                ))
                .await
                .unwrap();
        }

        let copied = journal.copy_steps(&from, &to, StepSeq::new(3)).await.unwrap();
        assert_eq!(copied, 2);

        let steps = journal.list_steps(&to).await.unwrap();
        assert_eq!(steps.len(), 2);
        assert!(steps.iter().all(|s| s.workflow_id == to));
        assert_eq!(steps[1].name, "step2");
    }

    #[tokio::test]
    async fn list_workflows_applies_query() {
        let journal = InMemoryJournal::new();
        journal.insert_workflow(record("a", "checkout")).await.unwrap();
        journal.insert_workflow(record("b", "dispatch")).await.unwrap();
        journal.insert_workflow(record("c", "checkout")).await.unwrap();
        journal
            .complete_workflow(&WorkflowId::new("c"), WorkflowStatus::Success, Some(json!("ok")), None)
            .await
            .unwrap();

        let checkouts = journal
            .list_workflows(WorkflowQuery::new().name("checkout"))
            .await
            .unwrap();
        assert_eq!(checkouts.len(), 2);
        assert_eq!(checkouts[0].id, WorkflowId::new("a"));

        let done = journal
            .list_workflows(WorkflowQuery::new().status(WorkflowStatus::Success))
            .await
            .unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].output, Some(json!("ok")));

        let limited = journal
            .list_workflows(WorkflowQuery::new().offset(1).limit(1))
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, WorkflowId::new("b"));
    }
}
