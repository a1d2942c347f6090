//! Cluster access: pod discovery and remote exec.
//!
//! [`KubectlCluster`] shells out to `kubectl`. Anything else that can list
//! pods and hand back a byte tunnel into a container can stand in for it.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use downsync_core::ImageTag;
use downsync_tunnel::{BoxedTunnel, TunnelConnection};
use serde::Deserialize;
use tokio::process::{Child, Command};

use crate::error::SyncError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub name: String,
    pub image: ImageTag,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pod {
    pub name: String,
    pub containers: Vec<Container>,
}

/// A byte tunnel into one container, plus the process carrying it (if any).
pub struct Tunnel {
    pub transport: BoxedTunnel,
    pub process: Option<Child>,
}

/// Kill a tunnel's carrying process and reap it.
pub async fn kill_tunnel_process(mut process: Child) {
    if let Err(err) = process.kill().await {
        tracing::debug!(error = %err, "tunnel process already gone");
    }
}

#[async_trait]
pub trait Cluster: Send + Sync + 'static {
    /// Running pods in `namespace`.
    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, SyncError>;

    /// Run `command` inside `container` of `pod` with its stdio as a tunnel.
    async fn open_tunnel(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: &[String],
    ) -> Result<Tunnel, SyncError>;
}

/// [`Cluster`] backed by the `kubectl` binary.
#[derive(Debug, Clone)]
pub struct KubectlCluster {
    kubectl: PathBuf,
    context: Option<String>,
}

impl KubectlCluster {
    pub fn new(kubectl: impl Into<PathBuf>, context: Option<String>) -> Self {
        Self {
            kubectl: kubectl.into(),
            context,
        }
    }

    fn command(&self, namespace: &str) -> Command {
        let mut cmd = Command::new(&self.kubectl);
        if let Some(context) = &self.context {
            cmd.arg("--context").arg(context);
        }
        cmd.arg("--namespace").arg(namespace);
        cmd
    }

    fn program(&self) -> String {
        self.kubectl.display().to_string()
    }
}

#[async_trait]
impl Cluster for KubectlCluster {
    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, SyncError> {
        let output = self
            .command(namespace)
            .args(["get", "pods", "--output", "json"])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| SyncError::Spawn {
                program: self.program(),
                source,
            })?;
        if !output.status.success() {
            return Err(SyncError::Kubectl {
                command: format!("{} get pods", self.program()),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        parse_pod_list(&output.stdout)
    }

    async fn open_tunnel(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: &[String],
    ) -> Result<Tunnel, SyncError> {
        let mut child = self
            .command(namespace)
            .arg("exec")
            .arg("-i")
            .arg(format!("pods/{pod}"))
            .arg("-c")
            .arg(container)
            .arg("--")
            .args(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SyncError::Spawn {
                program: self.program(),
                source,
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SyncError::Tunnel("exec stdout not captured".to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SyncError::Tunnel("exec stdin not captured".to_string()))?;

        tracing::debug!(pod, container, ?command, "remote exec started");
        Ok(Tunnel {
            transport: TunnelConnection::new(stdout, stdin).boxed(),
            process: Some(child),
        })
    }
}

#[derive(Debug, Deserialize)]
struct PodListJson {
    #[serde(default)]
    items: Vec<PodJson>,
}

#[derive(Debug, Deserialize)]
struct PodJson {
    metadata: MetadataJson,
    #[serde(default)]
    spec: PodSpecJson,
    #[serde(default)]
    status: PodStatusJson,
}

#[derive(Debug, Deserialize)]
struct MetadataJson {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct PodSpecJson {
    #[serde(default)]
    containers: Vec<ContainerJson>,
}

#[derive(Debug, Deserialize)]
struct ContainerJson {
    name: String,
    #[serde(default)]
    image: String,
}

#[derive(Debug, Default, Deserialize)]
struct PodStatusJson {
    #[serde(default)]
    phase: Option<String>,
}

/// Parse `kubectl get pods -o json`, keeping pods in the `Running` phase.
pub fn parse_pod_list(json: &[u8]) -> Result<Vec<Pod>, SyncError> {
    let list: PodListJson = serde_json::from_slice(json)?;
    Ok(list
        .items
        .into_iter()
        .filter(|pod| pod.status.phase.as_deref() == Some("Running"))
        .map(|pod| Pod {
            name: pod.metadata.name,
            containers: pod
                .spec
                .containers
                .into_iter()
                .map(|c| Container {
                    name: c.name,
                    image: ImageTag(c.image),
                })
                .collect(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const POD_LIST: &str = r#"{
        "apiVersion": "v1",
        "kind": "List",
        "items": [
            {
                "metadata": {"name": "api-7d9f", "namespace": "dev"},
                "spec": {"containers": [
                    {"name": "api", "image": "gcr.io/acme/api:4f1c2e"},
                    {"name": "sidecar", "image": "envoy:1.29"}
                ]},
                "status": {"phase": "Running"}
            },
            {
                "metadata": {"name": "api-old"},
                "spec": {"containers": [{"name": "api", "image": "gcr.io/acme/api:0000"}]},
                "status": {"phase": "Succeeded"}
            },
            {
                "metadata": {"name": "pending"},
                "spec": {"containers": [{"name": "api", "image": "x"}]}
            }
        ]
    }"#;

    #[test]
    fn parses_running_pods_and_their_containers() {
        let pods = parse_pod_list(POD_LIST.as_bytes()).expect("parse");
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].name, "api-7d9f");
        assert_eq!(
            pods[0].containers,
            vec![
                Container {
                    name: "api".into(),
                    image: ImageTag::from("gcr.io/acme/api:4f1c2e"),
                },
                Container {
                    name: "sidecar".into(),
                    image: ImageTag::from("envoy:1.29"),
                },
            ]
        );
    }

    #[test]
    fn empty_list_is_fine() {
        let pods = parse_pod_list(br#"{"items": []}"#).expect("parse");
        assert!(pods.is_empty());
    }

    #[test]
    fn garbage_is_a_json_error() {
        let err = parse_pod_list(b"error: the server doesn't have a resource type").unwrap_err();
        assert!(matches!(err, SyncError::Json(_)));
    }

    #[tokio::test]
    async fn missing_kubectl_is_a_spawn_error() {
        let cluster = KubectlCluster::new("/nonexistent/kubectl", None);
        let err = cluster.list_pods("default").await.unwrap_err();
        assert!(matches!(err, SyncError::Spawn { .. }), "got: {err}");
    }

    #[tokio::test]
    async fn failing_kubectl_reports_stderr() {
        // `false` ignores its arguments and exits 1.
        let cluster = KubectlCluster::new("false", Some("kind-dev".into()));
        let err = cluster.list_pods("default").await.unwrap_err();
        assert!(matches!(err, SyncError::Kubectl { .. }), "got: {err}");
    }
}
