use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::{Serialize, de::DeserializeOwned};

use crate::{DurableError, WorkflowContext};

/// A durable workflow: deterministic control flow over journaled operations.
///
/// `run` may be executed more than once for the same instance (after a
/// restart or a fork). Every side effect must therefore go through the
/// context (`run_step`, `set_event`, `send`, `start_child`, ...), and the
/// sequence of context calls must depend only on the input and on the values
/// those calls return.
#[async_trait]
pub trait Workflow: Send + Sync + 'static {
    /// Registered name, stored on every instance record.
    const NAME: &'static str;

    /// Workflow input, stored as JSON on the instance record.
    type Input: Serialize + DeserializeOwned + Send + 'static;

    /// Workflow output, stored as JSON once the instance succeeds.
    type Output: Serialize + DeserializeOwned + Send + 'static;

    /// Workflow error; its `Display` text is stored when the instance fails.
    type Error: std::error::Error + From<DurableError> + Send + Sync + 'static;

    /// Runs the workflow body.
    async fn run(
        &self,
        ctx: &WorkflowContext,
        input: Self::Input,
    ) -> Result<Self::Output, Self::Error>;
}

/// Type-erased entry point of a registered workflow.
pub(crate) type Runner =
    Arc<dyn Fn(WorkflowContext, serde_json::Value) -> BoxFuture<'static, Result<serde_json::Value, String>> + Send + Sync>;

pub(crate) fn runner<W: Workflow>(workflow: W) -> Runner {
    let workflow = Arc::new(workflow);
    Arc::new(move |ctx, input| {
        let workflow = workflow.clone();
        Box::pin(async move {
            let input: W::Input = serde_json::from_value(input).map_err(|e| e.to_string())?;
            let output = workflow
                .run(&ctx, input)
                .await
                .map_err(|e| e.to_string())?;
            serde_json::to_value(output).map_err(|e| e.to_string())
        })
    })
}
