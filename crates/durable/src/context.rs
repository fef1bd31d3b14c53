//! The interface a workflow body uses for every durable operation.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::WorkflowId;
use journal::{StepRecord, StepSeq, WorkflowRecord};
use serde::{Serialize, de::DeserializeOwned};
use tokio::time::Instant;

use crate::config::RetryPolicy;
use crate::hub::WaitKey;
use crate::runtime::Inner;
use crate::workflow::Workflow;
use crate::{DurableError, Result};

const OP_SET_EVENT: &str = "set_event";
const OP_GET_EVENT: &str = "get_event";
const OP_RECV: &str = "recv";
const OP_SEND: &str = "send";
const OP_SLEEP: &str = "sleep";

/// Execution context of one workflow instance.
///
/// Each call takes the next step sequence number. If the journal already
/// holds a record at that number, the recorded result is returned without
/// running anything; otherwise the operation runs and its result is recorded.
/// Calls must therefore be made one at a time, in program order.
pub struct WorkflowContext {
    inner: Arc<Inner>,
    workflow_id: WorkflowId,
    seq: AtomicI32,
}

impl WorkflowContext {
    pub(crate) fn new(inner: Arc<Inner>, workflow_id: WorkflowId) -> Self {
        Self {
            inner,
            workflow_id,
            seq: AtomicI32::new(StepSeq::initial().as_i32()),
        }
    }

    /// Returns the ID of the running instance.
    pub fn workflow_id(&self) -> &WorkflowId {
        &self.workflow_id
    }

    /// Takes the next sequence number and returns any record stored there.
    async fn next_step(&self, name: &str) -> Result<(StepSeq, Option<StepRecord>)> {
        let seq = StepSeq::new(self.seq.fetch_add(1, Ordering::SeqCst) + 1);
        let recorded = self.inner.journal.get_step(&self.workflow_id, seq).await?;

        match recorded {
            Some(record) if record.name != name => Err(DurableError::NonDeterministic {
                workflow_id: self.workflow_id.clone(),
                seq,
                expected: name.to_string(),
                found: record.name,
            }),
            Some(record) => {
                metrics::counter!("durable_steps_replayed").increment(1);
                tracing::debug!(workflow_id = %self.workflow_id, %seq, step = name, "replaying recorded step");
                Ok((seq, Some(record)))
            }
            None => Ok((seq, None)),
        }
    }

    fn replayed<T: DeserializeOwned>(&self, record: StepRecord) -> Result<T> {
        if let Some(reason) = record.error {
            return Err(DurableError::StepFailed {
                step: record.name,
                reason,
            });
        }
        Ok(serde_json::from_value(record.output.unwrap_or_default())?)
    }

    async fn record<T: Serialize>(&self, seq: StepSeq, name: &str, output: &T) -> Result<()> {
        let record = StepRecord::success(
            self.workflow_id.clone(),
            seq,
            name,
            serde_json::to_value(output)?,
        );
        self.inner.journal.append_step(record).await?;
        Ok(())
    }

    async fn ensure_not_cancelled(&self) -> Result<()> {
        if self.inner.is_cancelled(&self.workflow_id).await? {
            return Err(DurableError::Cancelled(self.workflow_id.clone()));
        }
        Ok(())
    }

    /// Runs a step with the runtime's default retry policy.
    pub async fn run_step<T, E, F, Fut>(&self, name: &str, f: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send,
        E: Display + Send,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = std::result::Result<T, E>> + Send,
    {
        let policy = self.inner.config.default_retry.clone();
        self.run_step_with(name, &policy, f).await
    }

    /// Runs a step, retrying failed attempts according to `policy`.
    ///
    /// Only the final outcome is recorded: the output on success, the error
    /// text once every attempt has failed. A recorded failure replays as
    /// `StepFailed` without running `f` again.
    pub async fn run_step_with<T, E, F, Fut>(
        &self,
        name: &str,
        policy: &RetryPolicy,
        mut f: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send,
        E: Display + Send,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = std::result::Result<T, E>> + Send,
    {
        let (seq, recorded) = self.next_step(name).await?;
        if let Some(record) = recorded {
            return self.replayed(record);
        }

        let mut attempt = 1;
        loop {
            let started = std::time::Instant::now();
            let outcome = f().await.map_err(|e| e.to_string());
            metrics::histogram!("durable_step_duration_seconds", "step" => name.to_string())
                .record(started.elapsed().as_secs_f64());

            match outcome {
                Ok(output) => {
                    self.record(seq, name, &output).await?;
                    metrics::counter!("durable_steps_executed").increment(1);
                    return Ok(output);
                }
                Err(reason) if attempt < policy.max_attempts => {
                    let delay = policy.delay_after(attempt);
                    tracing::warn!(
                        workflow_id = %self.workflow_id,
                        %seq,
                        step = name,
                        attempt,
                        error = %reason,
                        "step attempt failed, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(reason) => {
                    tracing::error!(workflow_id = %self.workflow_id, %seq, step = name, attempt, error = %reason, "step failed");
                    metrics::counter!("durable_steps_failed").increment(1);
                    let record = StepRecord::failure(self.workflow_id.clone(), seq, name, &reason);
                    self.inner.journal.append_step(record).await?;
                    return Err(DurableError::StepFailed {
                        step: name.to_string(),
                        reason,
                    });
                }
            }
        }
    }

    /// Publishes a value under `key` in this instance's event namespace.
    ///
    /// Fails with `EventAlreadySet` if the key already holds a different
    /// value.
    pub async fn set_event<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let (seq, recorded) = self.next_step(OP_SET_EVENT).await?;
        if recorded.is_some() {
            return Ok(());
        }

        let value = serde_json::to_value(value)?;
        let journal = &self.inner.journal;
        if !journal.set_event(&self.workflow_id, key, value.clone()).await? {
            // Written by an earlier execution that stopped before recording.
            if journal.get_event(&self.workflow_id, key).await? != Some(value) {
                return Err(DurableError::EventAlreadySet {
                    workflow_id: self.workflow_id.clone(),
                    key: key.to_string(),
                });
            }
        }
        self.record(seq, OP_SET_EVENT, &key).await?;
        self.inner
            .hub
            .notify(&WaitKey::Event(self.workflow_id.clone(), key.to_string()));
        Ok(())
    }

    /// Waits up to `timeout` for an event of another instance.
    pub async fn get_event<T>(&self, target: &WorkflowId, key: &str, timeout: Duration) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        let (seq, recorded) = self.next_step(OP_GET_EVENT).await?;
        if let Some(record) = recorded {
            return self.replayed(record);
        }
        self.ensure_not_cancelled().await?;

        let journal = &self.inner.journal;
        let value = self
            .inner
            .hub
            .wait_until(
                &WaitKey::Event(target.clone(), key.to_string()),
                Some(Instant::now() + timeout),
                self.inner.config.poll_interval,
                || async move {
                    self.ensure_not_cancelled().await?;
                    Ok(journal.get_event(target, key).await?)
                },
            )
            .await?;

        let value: Option<T> = value.map(serde_json::from_value).transpose()?;
        self.record(seq, OP_GET_EVENT, &value).await?;
        Ok(value)
    }

    /// Waits up to `timeout` for the next message on `topic`.
    ///
    /// Returns `Ok(None)` when the timeout elapses without a message. A
    /// received message is consumed: no later `recv` sees it again, and it
    /// leaves the inbox in the same journal write that records it. Fails
    /// with `Cancelled` if the instance is cancelled before or during the
    /// wait.
    pub async fn recv<T>(&self, topic: &str, timeout: Duration) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        let (seq, recorded) = self.next_step(OP_RECV).await?;
        if let Some(record) = recorded {
            return self.replayed(record);
        }
        self.ensure_not_cancelled().await?;

        let journal = &self.inner.journal;
        let id = &self.workflow_id;
        let message = self
            .inner
            .hub
            .wait_until(
                &WaitKey::Signal(id.clone(), topic.to_string()),
                Some(Instant::now() + timeout),
                self.inner.config.poll_interval,
                || async move {
                    self.ensure_not_cancelled().await?;
                    Ok(journal.receive_signal(id, topic, seq, OP_RECV).await?)
                },
            )
            .await?;

        match message {
            // Already recorded together with the removal from the inbox.
            Some(value) => Ok(serde_json::from_value(value)?),
            None => {
                self.record(seq, OP_RECV, &None::<T>).await?;
                Ok(None)
            }
        }
    }

    /// Delivers a message to another instance's inbox for `topic`.
    pub async fn send<T: Serialize>(&self, destination: &WorkflowId, topic: &str, message: &T) -> Result<()> {
        let (seq, recorded) = self.next_step(OP_SEND).await?;
        if recorded.is_some() {
            return Ok(());
        }

        self.inner
            .journal
            .push_signal(destination, topic, serde_json::to_value(message)?)
            .await?;
        self.record(seq, OP_SEND, &destination).await?;
        self.inner
            .hub
            .notify(&WaitKey::Signal(destination.clone(), topic.to_string()));
        Ok(())
    }

    /// Sleeps for `duration`, durably.
    ///
    /// The wake-up time is recorded before sleeping; a replay sleeps only
    /// for whatever is left of it.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        let (seq, recorded) = self.next_step(OP_SLEEP).await?;
        let wake_at: DateTime<Utc> = match recorded {
            Some(record) => self.replayed(record)?,
            None => {
                self.ensure_not_cancelled().await?;
                let wake_at = Utc::now()
                    + chrono::Duration::from_std(duration)
                        .unwrap_or_else(|_| chrono::Duration::days(36_500));
                self.record(seq, OP_SLEEP, &wake_at).await?;
                wake_at
            }
        };

        if let Ok(remaining) = (wake_at - Utc::now()).to_std() {
            tokio::time::sleep(remaining).await;
        }
        Ok(())
    }

    /// Starts a child workflow through the work queue without waiting for it.
    ///
    /// Replays return the recorded child ID and start nothing.
    pub async fn start_child<W: Workflow>(
        &self,
        child_id: WorkflowId,
        input: W::Input,
    ) -> Result<WorkflowId> {
        let (seq, recorded) = self.next_step(W::NAME).await?;
        if let Some(record) = recorded {
            return Ok(record.child_id.unwrap_or(child_id));
        }

        let record = WorkflowRecord::new(child_id.clone(), W::NAME, serde_json::to_value(input)?)
            .with_parent(self.workflow_id.clone());
        self.inner.enqueue_record(record).await?;

        let step = StepRecord::success(
            self.workflow_id.clone(),
            seq,
            W::NAME,
            serde_json::to_value(&child_id)?,
        )
        .with_child(child_id.clone());
        self.inner.journal.append_step(step).await?;

        tracing::info!(workflow_id = %self.workflow_id, %child_id, child = W::NAME, "child workflow enqueued");
        Ok(child_id)
    }
}
