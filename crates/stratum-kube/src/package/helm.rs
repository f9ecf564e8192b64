//! `helm` CLI package tool

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{ApplyOutcome, ApplyRequest, PackageTool};
use crate::error::{KubeError, Result};

/// Helm refuses to adopt resources it does not own
const CONFLICT_MARKER: &str = "exists and cannot be imported into the current release";

/// Helm reports missing releases this way for both `status` and `uninstall`
const NOT_FOUND_MARKER: &str = "not found";

/// Package tool backed by the `helm` binary
#[derive(Debug, Clone)]
pub struct HelmCli {
    binary: PathBuf,
    kube_context: Option<String>,
}

impl Default for HelmCli {
    fn default() -> Self {
        Self::new("helm")
    }
}

impl HelmCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            kube_context: None,
        }
    }

    /// Target a specific kubeconfig context
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.kube_context = Some(context.into());
        self
    }

    fn apply_args(&self, request: &ApplyRequest) -> Vec<String> {
        let mut args = vec![
            "upgrade".to_string(),
            "--install".to_string(),
            request.release.clone(),
            request.chart.clone(),
            "--namespace".to_string(),
            request.namespace.clone(),
            "--create-namespace".to_string(),
            "--values".to_string(),
            "-".to_string(),
        ];
        if let Some(version) = &request.chart_version {
            args.push("--version".to_string());
            args.push(version.clone());
        }
        args
    }

    async fn run(&self, mut args: Vec<String>, stdin: Option<String>) -> std::io::Result<HelmOutput> {
        if let Some(context) = &self.kube_context {
            args.push("--kube-context".to_string());
            args.push(context.clone());
        }

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes()).await?;
            // Closing stdin lets helm finish reading the values
            drop(pipe);
        }

        let output = child.wait_with_output().await?;
        Ok(HelmOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

struct HelmOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

impl HelmOutput {
    fn not_found(&self) -> bool {
        self.stderr.contains(NOT_FOUND_MARKER)
    }

    fn into_error(self, release: &str) -> KubeError {
        let message = self.stderr.trim().to_string();
        if message.contains(CONFLICT_MARKER) {
            KubeError::Conflict {
                release: release.to_string(),
                message,
            }
        } else {
            KubeError::PackageTool {
                release: release.to_string(),
                message,
            }
        }
    }
}

#[async_trait]
impl PackageTool for HelmCli {
    async fn apply(&self, request: &ApplyRequest) -> Result<ApplyOutcome> {
        let values = request.values.to_yaml()?;
        tracing::debug!(
            release = %request.release,
            namespace = %request.namespace,
            chart = %request.chart,
            "Running helm upgrade --install"
        );

        let output = self.run(self.apply_args(request), Some(values)).await?;
        if !output.success {
            return Err(output.into_error(&request.release));
        }

        Ok(ApplyOutcome {
            installed: true,
            logs: output.stdout,
        })
    }

    async fn status(&self, release: &str, namespace: &str) -> Result<bool> {
        let args = vec![
            "status".to_string(),
            release.to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
        ];
        let output = self.run(args, None).await?;
        if output.success {
            Ok(true)
        } else if output.not_found() {
            Ok(false)
        } else {
            Err(output.into_error(release))
        }
    }

    async fn uninstall(&self, release: &str, namespace: &str) -> Result<()> {
        let args = vec![
            "uninstall".to_string(),
            release.to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
        ];
        let output = self.run(args, None).await?;
        if output.success || output.not_found() {
            Ok(())
        } else {
            Err(output.into_error(release))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_core::Values;

    fn request() -> ApplyRequest {
        ApplyRequest {
            release: "ingress".to_string(),
            namespace: "ingress-system".to_string(),
            chart: "charts/ingress".to_string(),
            chart_version: Some("1.2.3".to_string()),
            values: Values::from_yaml("replicas: 2").unwrap(),
        }
    }

    #[test]
    fn test_apply_args() {
        let args = HelmCli::default().apply_args(&request());
        assert_eq!(
            args,
            vec![
                "upgrade",
                "--install",
                "ingress",
                "charts/ingress",
                "--namespace",
                "ingress-system",
                "--create-namespace",
                "--values",
                "-",
                "--version",
                "1.2.3",
            ]
        );
    }

    #[test]
    fn test_error_classification() {
        let output = HelmOutput {
            success: false,
            stdout: String::new(),
            stderr: "Error: rendered manifests contain a resource that already exists. \
                     Unable to continue with install: Service \"web\" in namespace \"ns\" \
                     exists and cannot be imported into the current release"
                .to_string(),
        };
        assert!(matches!(output.into_error("web"), KubeError::Conflict { .. }));

        let output = HelmOutput {
            success: false,
            stdout: String::new(),
            stderr: "Error: Kubernetes cluster unreachable".to_string(),
        };
        let err = output.into_error("web");
        assert!(matches!(err, KubeError::PackageTool { .. }));
        assert!(err.is_retriable());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_against_fake_helm_binary() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("helm");
        std::fs::write(
            &script,
            r#"#!/bin/sh
dir=$(dirname "$0")
echo "$@" >> "$dir/calls.log"
case "$1" in
  upgrade) cat > "$dir/values.yaml"; echo "Release \"$3\" has been upgraded"; exit 0 ;;
  status) [ "$2" = "present" ] && exit 0; echo "Error: release: not found" >&2; exit 1 ;;
  uninstall) echo "Error: uninstall: Release not loaded: $2: release: not found" >&2; exit 1 ;;
esac
exit 2
"#,
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let helm = HelmCli::new(&script);

        let outcome = helm.apply(&request()).await.unwrap();
        assert!(outcome.installed);
        assert!(outcome.logs.contains("has been upgraded"));
        let written = std::fs::read_to_string(dir.path().join("values.yaml")).unwrap();
        assert!(written.contains("replicas: 2"));

        assert!(helm.status("present", "ns").await.unwrap());
        assert!(!helm.status("absent", "ns").await.unwrap());
        helm.uninstall("absent", "ns").await.unwrap();

        let calls = std::fs::read_to_string(dir.path().join("calls.log")).unwrap();
        assert_eq!(calls.lines().count(), 4);
        assert!(calls.starts_with("upgrade --install ingress charts/ingress"));
    }
}
