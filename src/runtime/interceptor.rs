use async_trait::async_trait;
use anyhow::Result;
use tracing::info;
use crate::runtime::task::Task;

/// Called with every batch of tasks one engine operation produced.
///
/// Runs after the operation committed; a failure is logged and does not
/// change the operation's outcome.
#[async_trait]
pub trait TaskInterceptor: Send + Sync {
    async fn intercept(&self, tasks: &[Task]) -> Result<()>;
}

/// Logs each produced task.
#[derive(Debug, Default)]
pub struct LogInterceptor;

#[async_trait]
impl TaskInterceptor for LogInterceptor {
    async fn intercept(&self, tasks: &[Task]) -> Result<()> {
        for task in tasks {
            info!(
                task_id = %task.id,
                order_id = %task.order_id,
                node = %task.task_name,
                actors = ?task.actor_ids,
                "[TASK] {}", task.display_name
            );
        }
        Ok(())
    }
}
