//! Build pod log streaming via `kubectl logs -f`.

use crate::kubectl::Kubectl;
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use podflow_build::{LogStreamer, PodHandle};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio_util::sync::CancellationToken;

enum Next {
    Line(Option<String>),
    Stop,
}

impl Kubectl {
    fn logs_command(&self, pod: &PodHandle, follow: bool) -> Command {
        let mut cmd = self.command(&pod.namespace);
        cmd.arg("logs");
        if follow {
            cmd.arg("-f");
        }
        cmd.arg("--all-containers=true").arg(&pod.name);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd
    }

    fn spawn_logs(&self, pod: &PodHandle, follow: bool) -> anyhow::Result<(Child, Lines<BufReader<ChildStdout>>)> {
        let mut child = self
            .logs_command(pod, follow)
            .spawn()
            .map_err(|e| self.not_found(e))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("kubectl logs stdout was not captured"))?;

        // stderr must keep being read or a noisy kubectl blocks on a full pipe
        if let Some(stderr) = child.stderr.take() {
            let pod = pod.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(pod = %pod, "kubectl logs: {}", line);
                }
            });
        }

        Ok((child, BufReader::new(stdout).lines()))
    }

    /// Copy whatever is left in `lines`, bounded by the drain timeout.
    /// Returns the number of lines written.
    async fn drain(
        &self,
        pod: &PodHandle,
        lines: &mut Lines<BufReader<ChildStdout>>,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> anyhow::Result<usize> {
        let mut written = 0;
        let drained = tokio::time::timeout(self.drain_timeout, async {
            while let Some(line) = lines.next_line().await? {
                write_line(&mut *sink, &line).await?;
                written += 1;
            }
            Ok::<_, std::io::Error>(())
        })
        .await;

        match drained {
            Ok(result) => result.context("draining pod logs")?,
            Err(_) => {
                tracing::debug!(pod = %pod, "Log drain timed out after {:?}", self.drain_timeout)
            }
        }
        Ok(written)
    }

    /// One-shot `kubectl logs` for when following never got going.
    async fn fetch_remaining(
        &self,
        pod: &PodHandle,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> anyhow::Result<()> {
        let (mut child, mut lines) = self.spawn_logs(pod, false)?;
        self.drain(pod, &mut lines, sink).await?;
        child.kill().await.ok();
        Ok(())
    }
}

#[async_trait]
impl LogStreamer for Kubectl {
    async fn follow(
        &self,
        pod: &PodHandle,
        cancel: &CancellationToken,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> anyhow::Result<()> {
        let mut streamed = false;

        loop {
            let (mut child, mut lines) = self.spawn_logs(pod, true)?;

            loop {
                let next = tokio::select! {
                    biased;
                    line = lines.next_line() => Next::Line(line?),
                    _ = cancel.cancelled() => Next::Stop,
                };

                match next {
                    Next::Line(Some(line)) => {
                        streamed = true;
                        write_line(sink, &line).await?;
                    }
                    Next::Line(None) => break,
                    Next::Stop => {
                        streamed |= self.drain(pod, &mut lines, sink).await? > 0;
                        child.kill().await.ok();
                        if !streamed {
                            self.fetch_remaining(pod, sink).await?;
                        }
                        sink.flush().await?;
                        return Ok(());
                    }
                }
            }

            let status = child.wait().await?;
            if status.success() {
                // All containers have terminated
                sink.flush().await?;
                return Ok(());
            }

            // Typically "container is waiting to start"
            tracing::debug!(pod = %pod, "kubectl logs exited with {}, retrying", status);

            tokio::select! {
                _ = cancel.cancelled() => {
                    if !streamed {
                        self.fetch_remaining(pod, sink).await?;
                    }
                    sink.flush().await?;
                    return Ok(());
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}

async fn write_line(sink: &mut (dyn AsyncWrite + Send + Unpin), line: &str) -> std::io::Result<()> {
    sink.write_all(line.as_bytes()).await?;
    sink.write_all(b"\n").await
}
