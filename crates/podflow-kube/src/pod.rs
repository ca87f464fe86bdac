//! The subset of the Pod object podflow reads from `kubectl get pod -o json`.

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pod {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: PodStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum PodPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    #[serde(default)]
    pub phase: PodPhase,
    pub reason: Option<String>,
    pub message: Option<String>,
    #[serde(default)]
    pub init_container_statuses: Vec<ContainerStatus>,
    #[serde(default)]
    pub container_statuses: Vec<ContainerStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerStatus {
    pub name: String,
    #[serde(default)]
    pub state: ContainerState,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerState {
    pub running: Option<serde_json::Value>,
    pub waiting: Option<StateDetail>,
    pub terminated: Option<TerminatedState>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StateDetail {
    pub reason: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminatedState {
    pub exit_code: i32,
    pub reason: Option<String>,
    pub message: Option<String>,
}

impl Pod {
    pub fn phase(&self) -> PodPhase {
        self.status.phase
    }

    /// True once an init container is running, i.e. ready to receive the build context.
    pub fn init_container_running(&self) -> bool {
        self.status
            .init_container_statuses
            .iter()
            .any(|c| c.state.running.is_some())
    }

    /// Best-effort explanation of why the pod failed.
    pub fn failure_reason(&self) -> String {
        let terminated = self
            .status
            .init_container_statuses
            .iter()
            .chain(&self.status.container_statuses)
            .find_map(|c| {
                c.state
                    .terminated
                    .as_ref()
                    .filter(|t| t.exit_code != 0)
                    .map(|t| (c.name.as_str(), t))
            });

        if let Some((name, state)) = terminated {
            let detail = state
                .message
                .as_deref()
                .or(state.reason.as_deref())
                .unwrap_or("no details");
            return format!(
                "container {name} exited with code {}: {}",
                state.exit_code,
                detail.trim()
            );
        }

        self.status
            .message
            .clone()
            .or_else(|| self.status.reason.clone())
            .unwrap_or_else(|| "pod phase is Failed".to_string())
    }

    /// Describes a container stuck waiting, e.g. on `ErrImagePull`.
    pub fn waiting_reason(&self) -> Option<String> {
        self.status
            .init_container_statuses
            .iter()
            .chain(&self.status.container_statuses)
            .find_map(|c| {
                let waiting = c.state.waiting.as_ref()?;
                let reason = waiting.reason.as_deref()?;
                Some(match &waiting.message {
                    Some(message) => format!("{}: {reason} ({message})", c.name),
                    None => format!("{}: {reason}", c.name),
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Pod {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_pending_pod_with_running_init() {
        let pod = parse(
            r#"{
                "metadata": {"name": "podflow-abc", "namespace": "builds"},
                "status": {
                    "phase": "Pending",
                    "initContainerStatuses": [
                        {"name": "kaniko-init-container", "state": {"running": {"startedAt": "2024-01-01T00:00:00Z"}}}
                    ]
                }
            }"#,
        );

        assert_eq!(pod.metadata.name, "podflow-abc");
        assert_eq!(pod.phase(), PodPhase::Pending);
        assert!(pod.init_container_running());
    }

    #[test]
    fn test_failed_pod_reason() {
        let pod = parse(
            r#"{
                "metadata": {"name": "podflow-abc"},
                "status": {
                    "phase": "Failed",
                    "containerStatuses": [
                        {"name": "kaniko", "state": {"terminated": {"exitCode": 1, "reason": "Error", "message": "error building image\n"}}}
                    ]
                }
            }"#,
        );

        assert_eq!(pod.phase(), PodPhase::Failed);
        assert_eq!(
            pod.failure_reason(),
            "container kaniko exited with code 1: error building image"
        );
    }

    #[test]
    fn test_unknown_phase_and_missing_status() {
        let pod = parse(r#"{"metadata": {"name": "p"}, "status": {"phase": "Evicted"}}"#);
        assert_eq!(pod.phase(), PodPhase::Unknown);

        let pod = parse(r#"{"metadata": {"name": "p"}}"#);
        assert_eq!(pod.phase(), PodPhase::Pending);
        assert!(!pod.init_container_running());
        assert_eq!(pod.failure_reason(), "pod phase is Failed");
    }

    #[test]
    fn test_waiting_reason() {
        let pod = parse(
            r#"{
                "status": {
                    "initContainerStatuses": [
                        {"name": "init", "state": {"waiting": {"reason": "ErrImagePull", "message": "not found"}}}
                    ]
                }
            }"#,
        );
        assert_eq!(pod.waiting_reason().as_deref(), Some("init: ErrImagePull (not found)"));
    }
}
