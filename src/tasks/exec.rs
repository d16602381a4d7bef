// src/tasks/exec.rs

//! EXEC, EXECMOVE and EXECOUTPUT: run an external program.
//!
//! Exit status 0 is success and 1 a warning; anything else fails the task.
//! The program inherits the process environment plus one `#TOKEN#=value`
//! variable per resolvable interpolation token.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::ContextResolver;

use super::args::de;
use super::{RunContext, Task, TaskArgs, TaskError};

/// Marker EXECOUTPUT looks for on the last line of the program's output.
pub const NEW_FILENAME_MARKER: &str = "NEWFILENAME:";

const OPERATION: &str = "external program";

/// How long output is still collected once the program exited.
/// Descendants that inherited the pipes can hold them open.
const WAIT_DELAY: Duration = Duration::from_secs(10);

/// Bound on output collection after a timeout or a cancel killed the program.
const READER_GRACE: Duration = Duration::from_millis(200);

#[derive(Debug, Deserialize)]
struct RawExecArgs {
    #[serde(default)]
    path: String,

    #[serde(default)]
    args: String,

    #[serde(default, deserialize_with = "de::opt_from_str")]
    delay: Option<i64>,
}

/// Parsed program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecSpec {
    pub program: String,
    pub args: Vec<String>,
    /// `None` means no time limit.
    pub timeout: Option<Duration>,
}

impl ExecSpec {
    pub fn parse(args: &TaskArgs) -> Result<Self, TaskError> {
        let raw: RawExecArgs = args.decode()?;
        if raw.path.trim().is_empty() {
            return Err(TaskError::bad_args("missing program path"));
        }

        let timeout = match raw.delay {
            None | Some(0) => None,
            Some(ms) if ms < 0 => {
                return Err(TaskError::bad_args(
                    "invalid program delay value (must be positive or 0)",
                ));
            }
            Some(ms) => Some(Duration::from_millis(ms as u64)),
        };

        let program_args = shell_words::split(&raw.args)
            .map_err(|e| TaskError::bad_args(format!("invalid program arguments: {}", e)))?;

        Ok(Self {
            program: raw.path,
            args: program_args,
            timeout,
        })
    }
}

/// Captured output of a finished (or killed) program.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    /// Last line of stdout that is not blank.
    pub fn last_line(&self) -> Option<&str> {
        self.stdout.lines().map(str::trim_end).filter(|l| !l.trim().is_empty()).last()
    }
}

async fn read_all<R: tokio::io::AsyncRead + Unpin>(reader: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut r) = reader {
        if let Err(e) = r.read_to_end(&mut buf).await {
            debug!(error = %e, "failed to read program output");
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Run the program, racing its exit against `cancel` and the timeout.
///
/// The output is returned even when the run fails.
pub async fn run_program(
    spec: &ExecSpec,
    env: &[(String, String)],
    cancel: &CancellationToken,
) -> (ExecOutput, Result<(), TaskError>) {
    info!(program = %spec.program, args = ?spec.args, "starting external program");

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            let err = anyhow::anyhow!("failed to start external program {:?}: {}", spec.program, e);
            return (ExecOutput::default(), Err(TaskError::Other(err)));
        }
    };

    // Drain both pipes concurrently so neither can fill up and block the child.
    let stdout_task = tokio::spawn(read_all(child.stdout.take()));
    let stderr_task = tokio::spawn(read_all(child.stderr.take()));

    let deadline = async {
        match spec.timeout {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };

    let mut killed = false;
    let result = tokio::select! {
        status = child.wait() => match status {
            Ok(status) if status.success() => Ok(()),
            Ok(status) if status.code() == Some(1) => {
                Err(TaskError::Warning(format!("{} exited with {}", OPERATION, status)))
            }
            Ok(status) => Err(TaskError::Other(anyhow::anyhow!(
                "{} exited with {}", OPERATION, status
            ))),
            Err(e) => Err(TaskError::Other(anyhow::anyhow!(
                "waiting for {}: {}", OPERATION, e
            ))),
        },
        _ = cancel.cancelled() => {
            halt(&mut child).await;
            killed = true;
            Err(TaskError::Cancelled(OPERATION.to_string()))
        }
        _ = deadline => {
            halt(&mut child).await;
            killed = true;
            Err(TaskError::Timeout(OPERATION.to_string()))
        }
    };

    let grace = if killed { READER_GRACE } else { WAIT_DELAY };
    let output = ExecOutput {
        stdout: collect(stdout_task, grace).await,
        stderr: collect(stderr_task, grace).await,
    };

    match &result {
        Err(TaskError::Other(_)) if !output.stderr.trim().is_empty() => {
            error!(program = %spec.program, stderr = %output.stderr.trim(), "program returned error");
        }
        Err(e) => warn!(program = %spec.program, error = %e, "external program did not succeed"),
        Ok(()) => {}
    }
    for line in output.stdout.lines() {
        debug!(program = %spec.program, "stdout: {}", line);
    }

    (output, result)
}

/// Output gathered by a reader task, abandoned after `grace`.
async fn collect(mut reader: tokio::task::JoinHandle<String>, grace: Duration) -> String {
    match tokio::time::timeout(grace, &mut reader).await {
        Ok(joined) => joined.unwrap_or_default(),
        Err(_) => {
            reader.abort();
            debug!("gave up reading program output, pipe still held open");
            String::new()
        }
    }
}

async fn halt(child: &mut tokio::process::Child) {
    if let Err(e) = child.kill().await {
        warn!(error = %e, "failed to halt external program");
    }
}

async fn execute(cx: &RunContext<'_>, spec: &ExecSpec) -> (ExecOutput, Result<(), TaskError>) {
    let env = match ContextResolver::new(cx.transfer, cx.store.as_ref()).environment() {
        Ok(env) => env,
        Err(e) => return (ExecOutput::default(), Err(TaskError::Interpolation(e))),
    };
    run_program(spec, &env, &cx.cancel).await
}

#[derive(Debug, Default)]
pub struct ExecTask {
    spec: Option<ExecSpec>,
}

#[async_trait]
impl Task for ExecTask {
    fn validate(&mut self, args: &TaskArgs) -> Result<(), TaskError> {
        self.spec = Some(ExecSpec::parse(args)?);
        Ok(())
    }

    async fn run(&mut self, cx: RunContext<'_>) -> Result<(), TaskError> {
        let spec = match self.spec.take() {
            Some(spec) => spec,
            None => ExecSpec::parse(cx.args)?,
        };
        let (_, result) = execute(&cx, &spec).await;
        result
    }
}

/// Runs the program, then points the transfer at the path printed on the
/// last line of its output.
#[derive(Debug, Default)]
pub struct ExecMoveTask {
    spec: Option<ExecSpec>,
}

#[async_trait]
impl Task for ExecMoveTask {
    fn validate(&mut self, args: &TaskArgs) -> Result<(), TaskError> {
        self.spec = Some(ExecSpec::parse(args)?);
        Ok(())
    }

    async fn run(&mut self, cx: RunContext<'_>) -> Result<(), TaskError> {
        let spec = match self.spec.take() {
            Some(spec) => spec,
            None => ExecSpec::parse(cx.args)?,
        };
        let (output, result) = execute(&cx, &spec).await;
        result?;

        let new_path = output
            .last_line()
            .map(|l| PathBuf::from(l.trim()))
            .ok_or_else(|| {
                TaskError::Other(anyhow::anyhow!(
                    "{} did not print the new file path",
                    OPERATION
                ))
            })?;
        if !cx.fs.is_file(&new_path) {
            return Err(TaskError::NotFound(format!("moved file {:?}", new_path)));
        }

        info!(from = ?cx.transfer.transfer.local_path, to = ?new_path, "file moved by external program");
        cx.transfer.transfer.local_path = new_path;
        Ok(())
    }
}

/// Splits output into the message lines and an optional new file path
/// taken from a trailing `NEWFILENAME:` line.
pub fn parse_exec_output(stdout: &str) -> (Vec<&str>, Option<&str>) {
    let mut lines: Vec<&str> = stdout.lines().filter(|l| !l.trim().is_empty()).collect();
    let new_path = match lines.last() {
        Some(last) if last.starts_with(NEW_FILENAME_MARKER) => {
            let path = last[NEW_FILENAME_MARKER.len()..].trim();
            lines.pop();
            (!path.is_empty()).then_some(path)
        }
        _ => None,
    };
    (lines, new_path)
}

/// Runs the program and picks up a renamed file from a trailing
/// `NEWFILENAME:<path>` line. On failure the output becomes the error
/// message.
#[derive(Debug, Default)]
pub struct ExecOutputTask {
    spec: Option<ExecSpec>,
}

#[async_trait]
impl Task for ExecOutputTask {
    fn validate(&mut self, args: &TaskArgs) -> Result<(), TaskError> {
        self.spec = Some(ExecSpec::parse(args)?);
        Ok(())
    }

    async fn run(&mut self, cx: RunContext<'_>) -> Result<(), TaskError> {
        let spec = match self.spec.take() {
            Some(spec) => spec,
            None => ExecSpec::parse(cx.args)?,
        };
        let (output, result) = execute(&cx, &spec).await;
        let (lines, new_path) = parse_exec_output(&output.stdout);

        if let Some(path) = new_path {
            info!(from = ?cx.transfer.transfer.local_path, to = %path, "file renamed by external program");
            cx.transfer.transfer.local_path = PathBuf::from(path);
        }

        match result {
            Ok(()) => Ok(()),
            Err(err) if lines.is_empty() => Err(err),
            Err(TaskError::Warning(_)) => Err(TaskError::Warning(lines.join("\n"))),
            Err(TaskError::Other(_)) => Err(TaskError::Other(anyhow::anyhow!(lines.join("\n")))),
            Err(err) => Err(err),
        }
    }
}
