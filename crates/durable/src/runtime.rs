//! Workflow registry, execution and introspection.

use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use common::WorkflowId;
use journal::{
    InsertOutcome, Journal, JournalError, JournalExt, StepRecord, StepSeq, WorkflowQuery,
    WorkflowRecord, WorkflowStatus,
};
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::time::Instant;

use crate::config::RuntimeConfig;
use crate::context::WorkflowContext;
use crate::hub::{NotifyHub, WaitKey};
use crate::workflow::{Runner, Workflow, runner};
use crate::{DurableError, Result};

pub(crate) struct Inner {
    pub(crate) journal: Arc<dyn Journal>,
    pub(crate) config: RuntimeConfig,
    pub(crate) hub: NotifyHub,
    registry: HashMap<&'static str, Runner>,
    queue: mpsc::UnboundedSender<WorkflowId>,
    /// Instances executing in this process.
    running: Mutex<HashSet<WorkflowId>>,
}

impl Inner {
    pub(crate) fn ensure_registered(&self, name: &str) -> Result<()> {
        if self.registry.contains_key(name) {
            Ok(())
        } else {
            Err(DurableError::UnknownWorkflow(name.to_string()))
        }
    }

    /// Records an `Enqueued` instance and hands it to the queue dispatcher.
    pub(crate) async fn enqueue_record(&self, record: WorkflowRecord) -> Result<()> {
        self.ensure_registered(&record.name)?;
        let id = record.id.clone();
        let name = record.name.clone();
        match self
            .journal
            .insert_workflow(record.with_status(WorkflowStatus::Enqueued))
            .await?
        {
            InsertOutcome::Created => {
                metrics::counter!("durable_workflows_enqueued").increment(1);
                tracing::debug!(workflow_id = %id, workflow = %name, "workflow enqueued");
                self.queue.send(id).map_err(|_| DurableError::QueueClosed)
            }
            InsertOutcome::Existing(existing) => check_type(&existing, &name),
        }
    }

    pub(crate) async fn is_cancelled(&self, id: &WorkflowId) -> Result<bool> {
        Ok(self.journal.workflow_status(id).await? == Some(WorkflowStatus::Cancelled))
    }

    /// Stamps an instance that was cancelled before its body ever ran.
    async fn finish_unstarted(&self, id: &WorkflowId) -> Result<()> {
        let status = self
            .journal
            .complete_workflow(id, WorkflowStatus::Cancelled, None, Some("cancelled".to_string()))
            .await?;
        tracing::debug!(workflow_id = %id, %status, "workflow finished without running");
        Ok(())
    }
}

fn check_type(existing: &WorkflowRecord, expected: &str) -> Result<()> {
    if existing.name == expected {
        Ok(())
    } else {
        Err(DurableError::WorkflowTypeMismatch {
            workflow_id: existing.id.clone(),
            expected: expected.to_string(),
            found: existing.name.clone(),
        })
    }
}

/// Builder for a [`DurableRuntime`].
pub struct RuntimeBuilder {
    journal: Arc<dyn Journal>,
    config: RuntimeConfig,
    registry: HashMap<&'static str, Runner>,
}

impl RuntimeBuilder {
    /// Starts a builder over a journal.
    pub fn new(journal: Arc<dyn Journal>) -> Self {
        Self {
            journal,
            config: RuntimeConfig::default(),
            registry: HashMap::new(),
        }
    }

    /// Sets the runtime configuration.
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers a workflow under its `NAME`.
    pub fn register<W: Workflow>(mut self, workflow: W) -> Self {
        self.registry.insert(W::NAME, runner(workflow));
        self
    }

    /// Builds the runtime and spawns its queue dispatcher.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> DurableRuntime {
        let (tx, rx) = mpsc::unbounded_channel();
        let semaphore = Arc::new(Semaphore::new(self.config.worker_concurrency.max(1)));
        let inner = Arc::new(Inner {
            journal: self.journal,
            config: self.config,
            hub: NotifyHub::default(),
            registry: self.registry,
            queue: tx,
            running: Mutex::new(HashSet::new()),
        });
        tokio::spawn(run_queue(Arc::downgrade(&inner), rx, semaphore));
        DurableRuntime { inner }
    }
}

/// Dispatches queued workflows, at most `worker_concurrency` at a time.
async fn run_queue(
    inner: Weak<Inner>,
    mut rx: mpsc::UnboundedReceiver<WorkflowId>,
    semaphore: Arc<Semaphore>,
) {
    while let Some(id) = rx.recv().await {
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match inner.journal.get_workflow(&id).await {
            Ok(Some(record)) if record.status == WorkflowStatus::Enqueued => {
                launch(inner, record, Some(permit));
            }
            Ok(Some(record)) => {
                tracing::debug!(workflow_id = %id, status = %record.status, "skipping dequeued workflow");
            }
            Ok(None) => tracing::warn!(workflow_id = %id, "dequeued workflow does not exist"),
            Err(e) => tracing::error!(workflow_id = %id, error = %e, "failed to load dequeued workflow"),
        }
    }
    tracing::debug!("work queue dispatcher stopped");
}

/// Spawns one execution of an instance unless it is already running here.
fn launch(inner: Arc<Inner>, record: WorkflowRecord, permit: Option<OwnedSemaphorePermit>) {
    let id = record.id.clone();
    {
        let mut running = inner.running.lock().unwrap_or_else(PoisonError::into_inner);
        if !running.insert(id.clone()) {
            tracing::debug!(workflow_id = %id, "workflow already executing");
            return;
        }
    }

    tokio::spawn(async move {
        let _permit = permit;
        if let Err(e) = execute(&inner, record).await {
            tracing::error!(workflow_id = %id, error = %e, "workflow execution aborted");
        }
        inner
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        inner.hub.notify(&WaitKey::Completion(id));
    });
}

#[tracing::instrument(skip(inner, record), fields(workflow_id = %record.id, workflow = %record.name))]
async fn execute(inner: &Arc<Inner>, record: WorkflowRecord) -> Result<()> {
    let runner = inner
        .registry
        .get(record.name.as_str())
        .cloned()
        .ok_or_else(|| DurableError::UnknownWorkflow(record.name.clone()))?;

    if record.status == WorkflowStatus::Enqueued
        && !inner
            .journal
            .transition_status(&record.id, &[WorkflowStatus::Enqueued], WorkflowStatus::Pending, None)
            .await?
    {
        // Cancelled while still queued: there is no body to run.
        inner.finish_unstarted(&record.id).await?;
        return Ok(());
    }

    let started = std::time::Instant::now();
    let ctx = WorkflowContext::new(inner.clone(), record.id.clone());
    let outcome = runner(ctx, record.input).await;

    let (status, output, error) = match outcome {
        Ok(output) => (WorkflowStatus::Success, Some(output), None),
        Err(reason) => (WorkflowStatus::Error, None, Some(reason)),
    };
    let stored = inner
        .journal
        .complete_workflow(&record.id, status, output, error.clone())
        .await?;

    match (stored, error) {
        (WorkflowStatus::Cancelled, _) => tracing::info!("workflow finished after cancellation"),
        (_, Some(reason)) => tracing::error!(error = %reason, "workflow failed"),
        _ => tracing::info!("workflow succeeded"),
    }

    metrics::counter!("durable_workflows_completed", "status" => stored.as_str()).increment(1);
    metrics::histogram!("durable_workflow_duration_seconds").record(started.elapsed().as_secs_f64());
    Ok(())
}

/// Handle to the durable runtime. Cheap to clone.
#[derive(Clone)]
pub struct DurableRuntime {
    inner: Arc<Inner>,
}

impl DurableRuntime {
    /// Starts a builder over a journal.
    pub fn builder(journal: Arc<dyn Journal>) -> RuntimeBuilder {
        RuntimeBuilder::new(journal)
    }

    /// Returns the journal backing this runtime.
    pub fn journal(&self) -> &Arc<dyn Journal> {
        &self.inner.journal
    }

    /// Returns the runtime configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Starts a workflow instance with the given ID, executing immediately.
    ///
    /// If an instance with this ID already exists, no second execution is
    /// started; the returned handle refers to the existing instance.
    #[tracing::instrument(skip(self, input), fields(workflow = W::NAME))]
    pub async fn start_workflow<W: Workflow>(
        &self,
        id: WorkflowId,
        input: W::Input,
    ) -> Result<WorkflowHandle<W::Output>> {
        self.inner.ensure_registered(W::NAME)?;
        let record = WorkflowRecord::new(id.clone(), W::NAME, serde_json::to_value(input)?);

        match self.inner.journal.insert_workflow(record.clone()).await? {
            InsertOutcome::Created => {
                metrics::counter!("durable_workflows_started").increment(1);
                tracing::info!(workflow_id = %id, "workflow started");
                launch(self.inner.clone(), record, None);
            }
            InsertOutcome::Existing(existing) => {
                check_type(&existing, W::NAME)?;
                tracing::debug!(workflow_id = %id, status = %existing.status, "workflow already exists");
            }
        }

        Ok(WorkflowHandle::new(self.clone(), id))
    }

    /// Records a workflow instance for the work queue.
    ///
    /// It runs once a worker slot is free. Enqueueing an existing ID is a no-op.
    pub async fn enqueue<W: Workflow>(
        &self,
        id: WorkflowId,
        input: W::Input,
    ) -> Result<WorkflowHandle<W::Output>> {
        let record = WorkflowRecord::new(id.clone(), W::NAME, serde_json::to_value(input)?);
        self.inner.enqueue_record(record).await?;
        Ok(WorkflowHandle::new(self.clone(), id))
    }

    /// Returns a handle to an existing instance.
    pub fn handle<T>(&self, id: WorkflowId) -> WorkflowHandle<T> {
        WorkflowHandle::new(self.clone(), id)
    }

    /// Resumes every unfinished instance found in the journal.
    ///
    /// `Pending` instances are executed again (replaying their recorded
    /// steps) and `Enqueued` ones are handed back to the work queue.
    /// `Cancelled` instances whose body had started but not returned are
    /// executed again too, so the cleanup they schedule after the
    /// cancellation still runs. Returns the number of instances resumed.
    #[tracing::instrument(skip(self))]
    pub async fn recover(&self) -> Result<usize> {
        let candidates = self
            .inner
            .journal
            .list_workflows(WorkflowQuery::new().statuses(vec![
                WorkflowStatus::Pending,
                WorkflowStatus::Enqueued,
                WorkflowStatus::Cancelled,
            ]))
            .await?;

        let mut count = 0;
        for record in candidates {
            if record.status == WorkflowStatus::Cancelled && record.completed_at.is_some() {
                continue;
            }
            if self.inner.ensure_registered(&record.name).is_err() {
                tracing::warn!(workflow_id = %record.id, workflow = %record.name, "cannot recover unregistered workflow");
                continue;
            }
            count += 1;
            if record.status == WorkflowStatus::Enqueued {
                self.inner
                    .queue
                    .send(record.id)
                    .map_err(|_| DurableError::QueueClosed)?;
            } else {
                launch(self.inner.clone(), record, None);
            }
        }

        tracing::info!(count, "recovered unfinished workflows");
        Ok(count)
    }

    /// Delivers a message to a workflow's inbox for `topic`.
    #[tracing::instrument(skip(self, message))]
    pub async fn send<T: Serialize>(
        &self,
        destination: &WorkflowId,
        topic: &str,
        message: &T,
    ) -> Result<()> {
        if !self.inner.journal.workflow_exists(destination).await? {
            return Err(DurableError::WorkflowNotFound(destination.clone()));
        }
        self.inner
            .journal
            .push_signal(destination, topic, serde_json::to_value(message)?)
            .await?;
        self.inner
            .hub
            .notify(&WaitKey::Signal(destination.clone(), topic.to_string()));
        Ok(())
    }

    /// Waits up to `timeout` for an event published by a workflow.
    ///
    /// Returns `Ok(None)` if the key is still unset when the timeout elapses.
    pub async fn get_event<T: DeserializeOwned>(
        &self,
        id: &WorkflowId,
        key: &str,
        timeout: Duration,
    ) -> Result<Option<T>> {
        let journal = &self.inner.journal;
        let value = self
            .inner
            .hub
            .wait_until(
                &WaitKey::Event(id.clone(), key.to_string()),
                Some(Instant::now() + timeout),
                self.inner.config.poll_interval,
                || async move { Ok(journal.get_event(id, key).await?) },
            )
            .await?;

        value.map(serde_json::from_value).transpose().map_err(Into::into)
    }

    /// Loads an instance record.
    pub async fn get_workflow(&self, id: &WorkflowId) -> Result<Option<WorkflowRecord>> {
        Ok(self.inner.journal.get_workflow(id).await?)
    }

    /// Returns the status of an instance.
    pub async fn status(&self, id: &WorkflowId) -> Result<WorkflowStatus> {
        self.inner
            .journal
            .workflow_status(id)
            .await?
            .ok_or_else(|| DurableError::WorkflowNotFound(id.clone()))
    }

    /// Lists instances matching a query.
    pub async fn list_workflows(&self, query: WorkflowQuery) -> Result<Vec<WorkflowRecord>> {
        Ok(self.inner.journal.list_workflows(query).await?)
    }

    /// Lists the recorded operations of an instance in sequence order.
    pub async fn list_steps(&self, id: &WorkflowId) -> Result<Vec<StepRecord>> {
        if !self.inner.journal.workflow_exists(id).await? {
            return Err(DurableError::WorkflowNotFound(id.clone()));
        }
        Ok(self.inner.journal.list_steps(id).await?)
    }

    /// Cancels an instance.
    ///
    /// Waits started afterwards fail with `Cancelled`; steps already running
    /// finish, and the instance keeps the `Cancelled` status whatever its
    /// body returns. A queued instance that never started is finished on
    /// the spot. Cancelling a finished instance does nothing. Returns true
    /// if the status changed.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, id: &WorkflowId) -> Result<bool> {
        if self.cancel_from(id, WorkflowStatus::Enqueued).await? {
            self.inner.finish_unstarted(id).await?;
        } else if !self.cancel_from(id, WorkflowStatus::Pending).await? {
            return Ok(false);
        }

        self.inner.hub.notify_workflow(id);
        metrics::counter!("durable_workflows_cancelled").increment(1);
        tracing::info!(workflow_id = %id, "workflow cancelled");
        Ok(true)
    }

    async fn cancel_from(&self, id: &WorkflowId, from: WorkflowStatus) -> Result<bool> {
        self.inner
            .journal
            .transition_status(id, &[from], WorkflowStatus::Cancelled, Some("cancelled".to_string()))
            .await
            .map_err(|e| match e {
                JournalError::WorkflowNotFound(id) => DurableError::WorkflowNotFound(id),
                other => other.into(),
            })
    }

    /// Starts a new instance that replays the steps of `id` recorded before
    /// `start_step` and executes the rest anew.
    #[tracing::instrument(skip(self))]
    pub async fn fork(&self, id: &WorkflowId, start_step: i32) -> Result<WorkflowId> {
        let original = self
            .inner
            .journal
            .get_workflow(id)
            .await?
            .ok_or_else(|| DurableError::WorkflowNotFound(id.clone()))?;
        self.inner.ensure_registered(&original.name)?;

        let last = self.inner.journal.last_seq(id).await?;
        if start_step < StepSeq::first().as_i32() || start_step > last.next().as_i32() {
            return Err(DurableError::InvalidFork {
                workflow_id: id.clone(),
                step: start_step,
                reason: format!("must be between 1 and {}", last.next()),
            });
        }

        let fork_id = WorkflowId::generate();
        let record = WorkflowRecord::new(fork_id.clone(), original.name, original.input)
            .with_forked_from(id.clone());
        self.inner.journal.insert_workflow(record.clone()).await?;
        let copied = self
            .inner
            .journal
            .copy_steps(id, &fork_id, StepSeq::new(start_step))
            .await?;

        metrics::counter!("durable_workflows_forked").increment(1);
        tracing::info!(%fork_id, copied, "workflow forked");
        launch(self.inner.clone(), record, None);
        Ok(fork_id)
    }

    async fn wait_for_terminal(&self, id: &WorkflowId) -> Result<WorkflowRecord> {
        let journal = &self.inner.journal;
        let record = self
            .inner
            .hub
            .wait_until(
                &WaitKey::Completion(id.clone()),
                None,
                self.inner.config.poll_interval,
                || async move {
                    let record = journal
                        .get_workflow(id)
                        .await?
                        .ok_or_else(|| DurableError::WorkflowNotFound(id.clone()))?;
                    Ok(record.status.is_terminal().then_some(record))
                },
            )
            .await?;
        record.ok_or_else(|| DurableError::WorkflowNotFound(id.clone()))
    }
}

/// Handle to one workflow instance.
pub struct WorkflowHandle<T> {
    runtime: DurableRuntime,
    id: WorkflowId,
    _output: PhantomData<fn() -> T>,
}

impl<T> WorkflowHandle<T> {
    fn new(runtime: DurableRuntime, id: WorkflowId) -> Self {
        Self {
            runtime,
            id,
            _output: PhantomData,
        }
    }

    /// Returns the instance ID.
    pub fn workflow_id(&self) -> &WorkflowId {
        &self.id
    }

    /// Returns the current status of the instance.
    pub async fn status(&self) -> Result<WorkflowStatus> {
        self.runtime.status(&self.id).await
    }
}

impl<T: DeserializeOwned> WorkflowHandle<T> {
    /// Waits for the instance to finish and returns its output.
    pub async fn result(&self) -> Result<T> {
        let record = self.runtime.wait_for_terminal(&self.id).await?;
        match record.status {
            WorkflowStatus::Success => {
                Ok(serde_json::from_value(record.output.unwrap_or_default())?)
            }
            WorkflowStatus::Cancelled => Err(DurableError::Cancelled(self.id.clone())),
            _ => Err(DurableError::WorkflowFailed {
                workflow_id: self.id.clone(),
                reason: record.error.unwrap_or_default(),
            }),
        }
    }
}
