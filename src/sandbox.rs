use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::SandboxConfig;
use crate::error::{AppError, Result};

/// File names artifacts are materialized under inside a session.
pub const IMPLEMENTATION_FILE: &str = "solution.py";
pub const TEST_FILE: &str = "test_solution.py";

#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout and stderr merged for persistence in `last_command_output`.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
            (false, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (true, true) => String::new(),
        }
    }
}

/// Isolated execution boundary. The isolation technology itself is an
/// external capability; `LocalSandbox` is the process-local stand-in.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Create a session and return its opaque handle.
    async fn create_session(&self) -> Result<String>;

    /// Write a file, relative path, inside the session.
    async fn write_file(&self, sandbox_ref: &str, path: &str, content: &str) -> Result<()>;

    /// Run an argv inside the session.
    async fn exec(&self, sandbox_ref: &str, args: &[String]) -> Result<ExecOutput>;
}

/// Sandbox backed by per-session directories under a base dir.
pub struct LocalSandbox {
    base_dir: PathBuf,
    exec_timeout: Duration,
}

impl LocalSandbox {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            base_dir: config.base_dir.clone(),
            exec_timeout: Duration::from_secs(config.exec_timeout_secs),
        }
    }

    fn session_dir(&self, sandbox_ref: &str) -> Result<PathBuf> {
        if sandbox_ref.is_empty()
            || !sandbox_ref
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(AppError::Sandbox(format!(
                "Invalid sandbox ref: {sandbox_ref:?}"
            )));
        }
        Ok(self.base_dir.join(sandbox_ref))
    }
}

fn validate_relative(path: &str) -> Result<&Path> {
    let p = Path::new(path);
    if p.is_absolute() || p.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
        return Err(AppError::Sandbox(format!(
            "Path must be relative and stay inside the session: {path}"
        )));
    }
    Ok(p)
}

#[async_trait]
impl Sandbox for LocalSandbox {
    async fn create_session(&self) -> Result<String> {
        let sandbox_ref = uuid::Uuid::new_v4().to_string();
        let dir = self.base_dir.join(&sandbox_ref);
        tokio::fs::create_dir_all(&dir).await?;
        tracing::info!(sandbox_ref = %sandbox_ref, "Created sandbox session");
        Ok(sandbox_ref)
    }

    async fn write_file(&self, sandbox_ref: &str, path: &str, content: &str) -> Result<()> {
        let dir = self.session_dir(sandbox_ref)?;
        let rel = validate_relative(path)?;
        let full = dir.join(rel);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, content).await?;
        Ok(())
    }

    async fn exec(&self, sandbox_ref: &str, args: &[String]) -> Result<ExecOutput> {
        let dir = self.session_dir(sandbox_ref)?;
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| AppError::Sandbox("Empty command".to_string()))?;

        tracing::info!(sandbox_ref = %sandbox_ref, command = %program, "Executing sandbox command");

        let output = tokio::time::timeout(
            self.exec_timeout,
            Command::new(program)
                .args(rest)
                .current_dir(&dir)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| {
            AppError::Sandbox(format!(
                "Command '{program}' timed out after {:?}",
                self.exec_timeout
            ))
        })??;

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn local_sandbox(dir: &Path) -> LocalSandbox {
        LocalSandbox::new(&SandboxConfig {
            base_dir: dir.to_path_buf(),
            type_check_command: vec![],
            test_command: vec![],
            exec_timeout_secs: 30,
        })
    }

    #[tokio::test]
    async fn test_session_write_and_exec() {
        let tmp = tempfile::tempdir().unwrap();
        let sandbox = local_sandbox(tmp.path());

        let session = sandbox.create_session().await.unwrap();
        sandbox
            .write_file(&session, "hello.txt", "world")
            .await
            .unwrap();

        let out = sandbox
            .exec(&session, &["cat".to_string(), "hello.txt".to_string()])
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "world");
    }

    #[tokio::test]
    async fn test_failing_command_reports_exit_code() {
        let tmp = tempfile::tempdir().unwrap();
        let sandbox = local_sandbox(tmp.path());

        let session = sandbox.create_session().await.unwrap();
        let out = sandbox
            .exec(&session, &["sh".to_string(), "-c".to_string(), "exit 3".to_string()])
            .await
            .unwrap();
        assert!(!out.success());
        assert_eq!(out.exit_code, 3);
    }

    #[tokio::test]
    async fn test_write_rejects_escaping_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let sandbox = local_sandbox(tmp.path());

        let session = sandbox.create_session().await.unwrap();
        assert!(sandbox
            .write_file(&session, "../outside.txt", "x")
            .await
            .is_err());
        assert!(sandbox
            .write_file(&session, "/etc/hosts", "x")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_invalid_sandbox_ref_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let sandbox = local_sandbox(tmp.path());
        assert!(sandbox.exec("../evil", &["true".to_string()]).await.is_err());
    }

    #[test]
    fn test_combined_output_merges_streams() {
        let out = ExecOutput {
            stdout: "line1".to_string(),
            stderr: "line2".to_string(),
            exit_code: 0,
        };
        assert_eq!(out.combined(), "line1\nline2");
    }
}
