//! Uniform child-process execution: inherited stdout, captured stderr,
//! cancellation, and a pipe primitive for `mysqlbinlog | mysql` replay.

use pitr_core::error::{PitrError, Result};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio_util::sync::CancellationToken;

async fn capture_stderr(mut stderr: tokio::process::ChildStderr) -> String {
    let mut buf = String::new();
    if let Err(err) = stderr.read_to_string(&mut buf).await {
        tracing::warn!(error = %err, "failed to drain child stderr");
    }
    buf.trim_end().to_string()
}

/// Runs `command` to completion with stdout inherited (so `mysql`'s own
/// progress output is visible) and stderr captured. On non-zero exit the
/// error is the captured stderr verbatim.
pub async fn run_inherited(mut command: Command, cancel: &CancellationToken) -> Result<()> {
    command.stdout(Stdio::inherit()).stderr(Stdio::piped());
    let mut child = command
        .spawn()
        .map_err(|e| PitrError::ToolInvocation(format!("failed to spawn: {e}")))?;
    let stderr = child.stderr.take().expect("stderr piped");
    let stderr_task = tokio::spawn(capture_stderr(stderr));

    let status = tokio::select! {
        status = child.wait() => status.map_err(|e| PitrError::ToolInvocation(e.to_string()))?,
        _ = cancel.cancelled() => {
            let _ = child.kill().await;
            let _ = child.wait().await;
            return Err(PitrError::Cancelled);
        }
    };

    let captured = stderr_task.await.unwrap_or_default();
    if !status.success() {
        return Err(PitrError::ToolInvocation(captured));
    }
    Ok(())
}

/// A spawned child whose stdout is exposed line-by-line while stderr is
/// captured in the background, for `mysqlbinlog` decode modes.
pub struct StreamingChild {
    child: Child,
    reader: BufReader<ChildStdout>,
    stderr_task: tokio::task::JoinHandle<String>,
    cancel: CancellationToken,
}

impl StreamingChild {
    pub fn spawn(mut command: Command, cancel: CancellationToken) -> Result<Self> {
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
        let mut child = command
            .spawn()
            .map_err(|e| PitrError::ToolInvocation(format!("failed to spawn: {e}")))?;
        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");
        let stderr_task = tokio::spawn(capture_stderr(stderr));
        Ok(Self {
            child,
            reader: BufReader::new(stdout),
            stderr_task,
            cancel,
        })
    }

    /// Reads the next line of stdout, or `None` at EOF.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        tokio::select! {
            n = self.reader.read_line(&mut line) => {
                let n = n.map_err(|e| PitrError::ToolInvocation(e.to_string()))?;
                if n == 0 {
                    Ok(None)
                } else {
                    while line.ends_with('\n') || line.ends_with('\r') {
                        line.pop();
                    }
                    Ok(Some(line))
                }
            }
            _ = self.cancel.cancelled() => Err(PitrError::Cancelled),
        }
    }

    /// Kills the child without waiting for natural EOF, for callers that
    /// found what they needed partway through the stream (e.g. the first
    /// event-time line) and have no use for the rest of the output.
    pub async fn kill_and_discard(mut self) {
        let _ = self.child.kill().await;
        let _ = self.child.wait().await;
        let _ = self.stderr_task.await;
    }

    /// Waits for the child to exit and merges its captured stderr into
    /// `prior_err`, if any, rather than discarding it.
    pub async fn finish(mut self, prior_err: Option<PitrError>) -> Result<()> {
        let status = tokio::select! {
            status = self.child.wait() => status.map_err(|e| PitrError::ToolInvocation(e.to_string())),
            _ = self.cancel.cancelled() => {
                let _ = self.child.kill().await;
                let _ = self.child.wait().await;
                Err(PitrError::Cancelled)
            }
        };
        let captured = self.stderr_task.await.unwrap_or_default();

        match (status, prior_err) {
            (Ok(status), None) if status.success() => Ok(()),
            (Ok(_non_zero), None) => Err(PitrError::ToolInvocation(captured)),
            (Ok(status), Some(prior)) if status.success() => {
                Err(attach_stderr(prior, &captured))
            }
            (Ok(_non_zero), Some(prior)) => Err(attach_stderr(prior, &captured)),
            (Err(wait_err), prior) => Err(match prior {
                Some(p) => attach_stderr(p, &wait_err.to_string()),
                None => wait_err,
            }),
        }
    }
}

fn attach_stderr(err: PitrError, stderr: &str) -> PitrError {
    if stderr.is_empty() {
        return err;
    }
    match err {
        PitrError::Parse(msg) => PitrError::Parse(format!("{msg} (stderr: {stderr})")),
        PitrError::ToolInvocation(msg) => {
            PitrError::ToolInvocation(format!("{msg}\n{stderr}"))
        }
        other => other,
    }
}

/// Pipes `producer`'s stdout into `consumer`'s stdin, the way
/// `mysqlbinlog | mysql` is driven during replay. `consumer`'s own stdout is
/// inherited; both stderrs are captured independently.
///
/// Both children are started before either completes. The consumer is
/// awaited first so the producer either reaches natural EOF or is killed on
/// cancellation; the producer's stderr is then merged into any error the
/// consumer already produced rather than replacing it.
pub async fn run_piped(
    mut producer: Command,
    mut consumer: Command,
    cancel: &CancellationToken,
) -> Result<()> {
    producer.stdout(Stdio::piped()).stderr(Stdio::piped());
    consumer
        .stdin(Stdio::piped())
        .stdout(Stdio::inherit())
        .stderr(Stdio::piped());

    let mut producer_child = producer
        .spawn()
        .map_err(|e| PitrError::ToolInvocation(format!("failed to spawn producer: {e}")))?;
    let mut consumer_child = consumer
        .spawn()
        .map_err(|e| PitrError::ToolInvocation(format!("failed to spawn consumer: {e}")))?;

    let mut producer_stdout = producer_child.stdout.take().expect("stdout piped");
    let mut consumer_stdin = consumer_child.stdin.take().expect("stdin piped");
    let producer_stderr_task = tokio::spawn(capture_stderr(
        producer_child.stderr.take().expect("stderr piped"),
    ));
    let consumer_stderr_task = tokio::spawn(capture_stderr(
        consumer_child.stderr.take().expect("stderr piped"),
    ));

    let copy_task = tokio::spawn(async move {
        let result = tokio::io::copy(&mut producer_stdout, &mut consumer_stdin).await;
        drop(consumer_stdin);
        result
    });

    let consumer_status = tokio::select! {
        status = consumer_child.wait() => status.map_err(|e| PitrError::ToolInvocation(e.to_string())),
        _ = cancel.cancelled() => {
            let _ = consumer_child.kill().await;
            let _ = producer_child.kill().await;
            let _ = consumer_child.wait().await;
            Err(PitrError::Cancelled)
        }
    };

    let consumer_stderr = consumer_stderr_task.await.unwrap_or_default();
    let mut result = match consumer_status {
        Ok(status) if status.success() => Ok(()),
        Ok(_) => Err(PitrError::ToolInvocation(consumer_stderr)),
        Err(e) => Err(e),
    };

    let _ = copy_task.await;
    let producer_status = producer_child
        .wait()
        .await
        .map_err(|e| PitrError::ToolInvocation(e.to_string()));
    let producer_stderr = producer_stderr_task.await.unwrap_or_default();

    result = match (result, producer_status) {
        (Ok(()), Ok(status)) if status.success() => Ok(()),
        (Ok(()), _) => Err(PitrError::ToolInvocation(producer_stderr)),
        (Err(existing), _) => Err(attach_stderr(existing, &producer_stderr)),
    };

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_inherited_surfaces_stderr_on_failure() {
        let mut command = Command::new("sh");
        command.arg("-c").arg("echo boom 1>&2; exit 3");
        let cancel = CancellationToken::new();
        let err = run_inherited(command, &cancel).await.unwrap_err();
        match err {
            PitrError::ToolInvocation(msg) => assert!(msg.contains("boom")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn run_inherited_succeeds_on_zero_exit() {
        let mut command = Command::new("sh");
        command.arg("-c").arg("exit 0");
        let cancel = CancellationToken::new();
        run_inherited(command, &cancel).await.unwrap();
    }

    #[tokio::test]
    async fn streaming_child_yields_lines_then_eof() {
        let mut command = Command::new("sh");
        command.arg("-c").arg("printf 'one\\ntwo\\n'");
        let cancel = CancellationToken::new();
        let mut streaming = StreamingChild::spawn(command, cancel).unwrap();
        assert_eq!(streaming.next_line().await.unwrap(), Some("one".to_string()));
        assert_eq!(streaming.next_line().await.unwrap(), Some("two".to_string()));
        assert_eq!(streaming.next_line().await.unwrap(), None);
        streaming.finish(None).await.unwrap();
    }

    #[tokio::test]
    async fn run_piped_connects_producer_stdout_to_consumer_stdin() {
        let mut producer = Command::new("sh");
        producer.arg("-c").arg("printf 'hello\\n'");
        let mut consumer = Command::new("sh");
        consumer.arg("-c").arg("cat > /dev/null");
        let cancel = CancellationToken::new();
        run_piped(producer, consumer, &cancel).await.unwrap();
    }
}
