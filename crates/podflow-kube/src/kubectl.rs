//! kubectl CLI wrapper
//!
//! Runs `kubectl` with the configured context and namespace. Pod creation,
//! deletion and inspection go through [`Kubectl::run`]; remote commands go
//! through the [`RemoteExec`] implementation, which streams stdin.

use crate::error::{KubeError, Result};
use crate::pod::Pod;
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use podflow_build::{ExecOutput, ExecStdin, PodHandle, RemoteExec};
use podflow_core::ClusterConfig;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tokio_util::sync::CancellationToken;

/// Size of the buffer used to forward stdin to `kubectl exec`.
const STDIN_CHUNK: usize = 64 * 1024;

/// kubectl CLI wrapper
#[derive(Debug, Clone)]
pub struct Kubectl {
    program: String,
    namespace: String,
    context: Option<String>,
    pub(crate) poll_interval: Duration,
    pub(crate) init_timeout: Duration,
    pub(crate) drain_timeout: Duration,
}

impl Kubectl {
    pub fn new(program: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            namespace: namespace.into(),
            context: None,
            poll_interval: Duration::from_secs(1),
            init_timeout: Duration::from_secs(10 * 60),
            drain_timeout: Duration::from_secs(10),
        }
    }

    pub fn from_config(cluster: &ClusterConfig) -> Self {
        Self {
            context: cluster.context.clone(),
            poll_interval: cluster.poll_interval,
            init_timeout: cluster.init_timeout,
            ..Self::new(&cluster.kubectl, &cluster.namespace)
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    /// How long log streaming may keep draining after it was asked to stop
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Base command with `--context` and `--namespace` applied
    pub(crate) fn command(&self, namespace: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        if let Some(context) = &self.context {
            cmd.arg("--context").arg(context);
        }
        cmd.arg("--namespace").arg(namespace);
        cmd.kill_on_drop(true);
        cmd
    }

    pub(crate) fn not_found(&self, e: std::io::Error) -> KubeError {
        if e.kind() == std::io::ErrorKind::NotFound {
            KubeError::KubectlNotFound(self.program.clone())
        } else {
            KubeError::Io(e)
        }
    }

    /// Run a kubectl command and return stdout
    pub async fn run(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<String> {
        let mut cmd = self.command(&self.namespace);
        cmd.args(args);
        cmd.stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tracing::debug!("Running: {} --namespace {} {}", self.program, self.namespace, args.join(" "));

        let mut child = cmd.spawn().map_err(|e| self.not_found(e))?;
        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(KubeError::CommandFailed {
                command: args.first().copied().unwrap_or_default().to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Create a pod from a JSON manifest
    pub async fn create_pod(&self, manifest: &serde_json::Value) -> Result<PodHandle> {
        let body = serde_json::to_vec(manifest)?;
        let output = self
            .run(&["create", "-f", "-", "-o", "json"], Some(&body))
            .await?;

        let pod: Pod = serde_json::from_str(&output)?;
        if pod.metadata.name.is_empty() {
            return Err(KubeError::InvalidManifest(
                "kubectl create returned a pod without a name".to_string(),
            ));
        }

        Ok(PodHandle::new(
            pod.metadata.name,
            pod.metadata
                .namespace
                .unwrap_or_else(|| self.namespace.clone()),
        ))
    }

    /// Delete a pod immediately (grace period 0)
    pub async fn delete_pod(&self, pod: &PodHandle) -> Result<()> {
        let output = self
            .command(&pod.namespace)
            .args([
                "delete",
                "pod",
                pod.name.as_str(),
                "--grace-period=0",
                "--force",
                "--wait=false",
                "--ignore-not-found",
            ])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| self.not_found(e))?;

        if !output.status.success() {
            return Err(KubeError::CommandFailed {
                command: "delete".to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    pub async fn get_pod(&self, pod: &PodHandle) -> Result<Pod> {
        let output = self
            .command(&pod.namespace)
            .args(["get", "pod", pod.name.as_str(), "-o", "json"])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| self.not_found(e))?;

        if !output.status.success() {
            return Err(KubeError::CommandFailed {
                command: "get".to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

#[async_trait]
impl RemoteExec for Kubectl {
    async fn exec(
        &self,
        pod: &PodHandle,
        container: &str,
        cancel: &CancellationToken,
        stdin: Option<ExecStdin>,
        args: &[&str],
    ) -> anyhow::Result<ExecOutput> {
        let mut cmd = self.command(&pod.namespace);
        cmd.arg("exec");
        if stdin.is_some() {
            cmd.arg("-i");
        }
        cmd.arg(&pod.name).arg("-c").arg(container).arg("--").args(args);
        cmd.stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tracing::debug!(pod = %pod, container, "Running in pod: {}", args.join(" "));

        let mut child = cmd.spawn().map_err(|e| self.not_found(e))?;
        let child_stdin = child.stdin.take();
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("kubectl exec stdout was not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("kubectl exec stderr was not captured"))?;

        let run = async move {
            let collect = async {
                let mut out = Vec::new();
                let mut err = Vec::new();
                let (read_out, read_err) =
                    tokio::join!(stdout.read_to_end(&mut out), stderr.read_to_end(&mut err));
                read_out?;
                read_err?;
                out.extend(err);
                Ok::<_, std::io::Error>(out)
            };

            let (fed, collected) = tokio::join!(feed_stdin(stdin, child_stdin), collect);
            let status = child.wait().await?;

            fed.context("reading stdin for kubectl exec")?;
            Ok::<_, anyhow::Error>(ExecOutput {
                status: status.code(),
                output: collected?,
            })
        };

        // Dropping `run` drops the child, which kills it.
        tokio::select! {
            result = run => result,
            _ = cancel.cancelled() => Err(anyhow!("kubectl exec in {pod} was cancelled")),
        }
    }
}

/// Copy `source` into the child's stdin, then close it.
///
/// Only failures to read `source` are errors. A write failure means the remote
/// command stopped reading, and its exit status reports that.
async fn feed_stdin(source: Option<ExecStdin>, sink: Option<ChildStdin>) -> std::io::Result<()> {
    let (Some(mut source), Some(mut sink)) = (source, sink) else {
        return Ok(());
    };

    let mut buf = vec![0u8; STDIN_CHUNK];
    loop {
        let n = source.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        if let Err(e) = sink.write_all(&buf[..n]).await {
            tracing::debug!("Remote command closed stdin early: {}", e);
            return Ok(());
        }
    }

    sink.shutdown().await.ok();
    Ok(())
}
