use crate::builder::ImageBuilder;
use crate::error::SandboxError;
use async_trait::async_trait;
use std::path::Path;
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Image builds through the docker (or a CLI-compatible) binary.
/// The tool's own diagnostics are the caller's only view of compile errors, so they
/// are kept verbatim apart from the host path of the build context.
pub struct DockerCli {
    program: String,
    push: bool,
}

impl DockerCli {
    pub fn new(program: impl Into<String>, push: bool) -> Self {
        Self {
            program: program.into(),
            push,
        }
    }

    async fn run(&self, args: &[&str]) -> std::io::Result<Output> {
        debug!(program = %self.program, ?args, "running build tool");
        Command::new(&self.program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
    }
}

/// Combined tool output with the build context path masked out
pub fn diagnostics(output: &Output, context: Option<&Path>) -> String {
    let mut text = String::from_utf8_lossy(&output.stderr).into_owned();
    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.trim().is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&stdout);
    }
    match context.and_then(|p| p.to_str()) {
        Some(path) if !path.is_empty() => text.replace(path, "."),
        _ => text,
    }
}

#[async_trait]
impl ImageBuilder for DockerCli {
    async fn build_image(&self, context: &Path, tag: &str) -> Result<(), SandboxError> {
        let context_arg = context.to_string_lossy();
        let output = self
            .run(&[
                "build",
                "--rm",
                "--force-rm",
                "--network=none",
                "-t",
                tag,
                &context_arg,
            ])
            .await
            .map_err(|e| {
                SandboxError::build_failed(format!("failed to start {}: {}", self.program, e))
            })?;

        if !output.status.success() {
            return Err(SandboxError::build_failed(diagnostics(&output, Some(context))));
        }
        info!(%tag, "image built");

        if self.push {
            let pushed = self.run(&["push", tag]).await;
            let failure = match pushed {
                Ok(out) if out.status.success() => None,
                Ok(out) => Some(diagnostics(&out, None)),
                Err(e) => Some(format!("failed to start {}: {}", self.program, e)),
            };
            if let Some(text) = failure {
                // The local tag is useless without the push
                if let Err(e) = self.remove_image(tag).await {
                    warn!(error = %e, %tag, "cleanup failed");
                }
                return Err(SandboxError::build_failed(format!(
                    "pushing {} failed:\n{}",
                    tag, text
                )));
            }
            info!(%tag, "image pushed");
        }
        Ok(())
    }

    async fn remove_image(&self, tag: &str) -> Result<(), SandboxError> {
        let output = self
            .run(&["rmi", "--force", tag])
            .await
            .map_err(|e| SandboxError::cleanup(format!("image {}", tag), e))?;
        if output.status.success() {
            return Ok(());
        }
        let text = diagnostics(&output, None);
        if text.contains("No such image") {
            return Ok(());
        }
        Err(SandboxError::cleanup(format!("image {}", tag), text.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;

    fn output(stdout: &str, stderr: &str) -> Output {
        Output {
            status: ExitStatus::from_raw(256),
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_diagnostics_mask_context_path() {
        let out = output(
            "Step 4/7 : RUN python3 -m py_compile solution.py\n",
            "  File \"/tmp/sandexec-build-abc/solution.py\", line 1\nSyntaxError: invalid syntax",
        );
        let text = diagnostics(&out, Some(Path::new("/tmp/sandexec-build-abc")));
        assert!(text.contains("File \"./solution.py\""));
        assert!(text.contains("SyntaxError"));
        assert!(text.contains("Step 4/7"));
        assert!(!text.contains("/tmp/sandexec-build-abc"));
    }

    #[test]
    fn test_diagnostics_without_stdout() {
        let out = output("   \n", "error: boom\n");
        assert_eq!(diagnostics(&out, None), "error: boom\n");
    }

    #[tokio::test]
    async fn test_missing_tool_is_a_build_failure() {
        let cli = DockerCli::new("sandexec-definitely-not-a-binary", false);
        let dir = tempfile::tempdir().unwrap();
        let err = cli.build_image(dir.path(), "sandexec-test:1").await.unwrap_err();
        assert!(matches!(err, SandboxError::ArtifactBuildFailed { .. }));
    }

    #[tokio::test]
    async fn test_failed_push_attempts_tag_removal() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let calls = dir.path().join("calls.log");
        let tool = dir.path().join("fake-docker");
        std::fs::write(
            &tool,
            format!(
                "#!/bin/sh\necho \"$1\" >> {log}\ncase \"$1\" in\n  build) exit 0 ;;\n  push) echo 'denied: requested access' >&2; exit 1 ;;\n  *) echo 'daemon busy' >&2; exit 1 ;;\nesac\n",
                log = calls.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        let cli = DockerCli::new(tool.to_string_lossy(), true);
        let err = cli
            .build_image(dir.path(), "registry.local/sandexec-go:1")
            .await
            .unwrap_err();
        match err {
            SandboxError::ArtifactBuildFailed { diagnostics } => {
                assert!(diagnostics.contains("denied"), "{}", diagnostics)
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let calls = std::fs::read_to_string(calls).unwrap();
        assert_eq!(calls.lines().collect::<Vec<_>>(), vec!["build", "push", "rmi"]);
    }
}
