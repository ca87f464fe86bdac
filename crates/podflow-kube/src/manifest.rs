//! Build pod manifest rendering.
//!
//! A manifest is a YAML Pod template rendered with Tera. The resolved build
//! environment is injected into every main container.

use crate::error::{KubeError, Result};
use podflow_build::{ManifestFactory, PodManifest, StagingArea};
use podflow_core::{BuildArtifact, ClusterConfig, EnvVar, TemplateProcessor};
use serde_json::{Map, Value, json};
use std::path::Path;

/// Prefix used when the template does not name the pod
pub const GENERATE_NAME: &str = "podflow-";

/// Kaniko executor pod with a busybox init container that waits for the context.
pub const KANIKO_TEMPLATE: &str = r#"apiVersion: v1
kind: Pod
metadata:
  generateName: podflow-kaniko-
  labels:
    app.kubernetes.io/managed-by: podflow
spec:
  restartPolicy: Never
  initContainers:
    - name: {{ STAGING_CONTAINER }}
      image: busybox
      command: ["sh", "-c", "while [ ! -f {{ MARKER }} ]; do sleep 1; done"]
      volumeMounts:
        - name: build-context
          mountPath: {{ MOUNT_PATH }}
  containers:
    - name: kaniko
      image: gcr.io/kaniko-project/executor:latest
      args:
        - --dockerfile={{ DOCKERFILE }}
        - --context=dir://{{ MOUNT_PATH }}
        - --destination={{ TARGET_TAG }}
{%- for flag in BUILD_ARG_FLAGS %}
        - {{ flag | json_encode() }}
{%- endfor %}
{%- for registry in INSECURE_REGISTRIES %}
        - --insecure-registry={{ registry }}
{%- endfor %}
      volumeMounts:
        - name: build-context
          mountPath: {{ MOUNT_PATH }}
  volumes:
    - name: build-context
      emptyDir: {}
"#;

/// Renders the build pod manifest from a template
#[derive(Debug, Clone)]
pub struct ManifestTemplate {
    source: String,
    staging: StagingArea,
    insecure_registries: Vec<String>,
}

impl ManifestTemplate {
    pub fn new(source: impl Into<String>, cluster: &ClusterConfig) -> Self {
        Self {
            source: source.into(),
            staging: StagingArea::from(cluster),
            insecure_registries: cluster.insecure_registries.clone(),
        }
    }

    /// The built-in Kaniko manifest
    pub fn kaniko(cluster: &ClusterConfig) -> Self {
        Self::new(KANIKO_TEMPLATE, cluster)
    }

    pub fn from_file(path: &Path, cluster: &ClusterConfig) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Ok(Self::new(source, cluster))
    }

    pub fn render(&self, artifact: &BuildArtifact, env: &[EnvVar], tag: &str) -> Result<Value> {
        let mut processor = TemplateProcessor::new();

        // Fixed variables are added last and win on a name clash
        processor.add_variables(env.iter().map(|e| (e.name.as_str(), e.value.as_str())));
        processor.add_variables([
            ("TARGET_TAG", tag),
            ("STAGING_CONTAINER", self.staging.init_container.as_str()),
            ("MOUNT_PATH", self.staging.mount_path.as_str()),
            ("MARKER", self.staging.marker_path.as_str()),
        ]);
        processor.add_variable(
            "DOCKERFILE",
            Value::String(artifact.dockerfile.to_string_lossy().replace('\\', "/")),
        );
        processor.add_variable("BUILD_ARGS", json!(artifact.build_args));
        processor.add_variable(
            "BUILD_ARG_FLAGS",
            json!(
                artifact
                    .build_args
                    .iter()
                    .map(|(k, v)| format!("--build-arg={k}={v}"))
                    .collect::<Vec<_>>()
            ),
        );
        processor.add_variable("INSECURE_REGISTRIES", json!(self.insecure_registries));

        let rendered = processor.render_str(&self.source)?;
        tracing::trace!("Rendered manifest:\n{}", rendered);

        let mut manifest: Value = serde_yaml::from_str(&rendered)?;
        prepare(&mut manifest, env)?;
        Ok(manifest)
    }
}

impl ManifestFactory for ManifestTemplate {
    fn manifest(
        &self,
        artifact: &BuildArtifact,
        env: &[EnvVar],
        tag: &str,
    ) -> anyhow::Result<PodManifest> {
        Ok(PodManifest(self.render(artifact, env, tag)?))
    }
}

/// Validate the Pod, name it if needed, and inject `env` into its containers
fn prepare(manifest: &mut Value, env: &[EnvVar]) -> Result<()> {
    let root = manifest
        .as_object_mut()
        .ok_or_else(|| KubeError::InvalidManifest("expected a YAML mapping".to_string()))?;

    match root.get("kind").and_then(Value::as_str) {
        Some("Pod") => {}
        Some(other) => {
            return Err(KubeError::InvalidManifest(format!(
                "expected kind Pod, got {other}"
            )));
        }
        None => return Err(KubeError::InvalidManifest("missing kind".to_string())),
    }

    let metadata = root
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| KubeError::InvalidManifest("metadata must be a mapping".to_string()))?;
    if !metadata.contains_key("name") && !metadata.contains_key("generateName") {
        metadata.insert("generateName".to_string(), json!(GENERATE_NAME));
    }

    let containers = root
        .get_mut("spec")
        .and_then(|spec| spec.get_mut("containers"))
        .and_then(Value::as_array_mut)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| KubeError::InvalidManifest("spec.containers is empty".to_string()))?;

    for container in containers {
        let vars = container
            .as_object_mut()
            .ok_or_else(|| KubeError::InvalidManifest("container must be a mapping".to_string()))?
            .entry("env")
            .or_insert_with(|| Value::Array(Vec::new()))
            .as_array_mut()
            .ok_or_else(|| KubeError::InvalidManifest("container env must be a list".to_string()))?;

        for var in env {
            let present = vars
                .iter()
                .any(|v| v.get("name").and_then(Value::as_str) == Some(var.name.as_str()));
            if !present {
                vars.push(json!({"name": var.name, "value": var.value}));
            }
        }
    }

    Ok(())
}
