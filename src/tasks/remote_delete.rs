// src/tasks/remote_delete.rs

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use super::{RunContext, Task, TaskArgs, TaskError};

#[derive(Debug, Deserialize)]
struct RemoteDeleteArgs {
    #[serde(default)]
    file: String,
}

/// REMOTEDELETE: remove a file on the partner through the connection's
/// [`RemoteDeleter`](super::RemoteDeleter).
#[derive(Debug, Default)]
pub struct RemoteDeleteTask;

#[async_trait]
impl Task for RemoteDeleteTask {
    fn validate(&mut self, args: &TaskArgs) -> Result<(), TaskError> {
        args.decode::<RemoteDeleteArgs>().map(|_| ())
    }

    async fn run(&mut self, cx: RunContext<'_>) -> Result<(), TaskError> {
        let raw: RemoteDeleteArgs = cx.args.decode()?;
        let Some(remote) = cx.remote else {
            return Err(TaskError::NotSupported(
                "remote deletion on this connection".to_string(),
            ));
        };

        let target = match raw.file.trim() {
            "" => cx.transfer.transfer.remote_path.clone(),
            file => file.to_string(),
        };
        if target.is_empty() {
            return Err(TaskError::bad_args("no remote file to delete"));
        }

        tokio::select! {
            biased;
            _ = cx.cancel.cancelled() => {
                return Err(TaskError::Cancelled("remote deletion".to_string()));
            }
            deleted = remote.delete(&target) => deleted?,
        }
        info!(file = %target, "remote file deleted");
        Ok(())
    }
}
