//! Subprocess verifiers over a materialized workspace directory.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use hardloop_core::{Artifact, AuxFile, ToolOutput, Verifier, VerifyRequest};
use tokio::process::Command;

use crate::config::SandboxConfig;
use crate::error::{Result, ToolsError};

/// Record of the files the last materialization wrote.
const MANIFEST: &str = ".hardloop-files";

/// Host directory verifiers read the artifact from.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute form of the root, for bind mounts.
    pub fn absolute_root(&self) -> Result<PathBuf> {
        if self.root.is_absolute() {
            Ok(self.root.clone())
        } else {
            Ok(std::env::current_dir()?.join(&self.root))
        }
    }

    /// Write the artifact and every auxiliary file, UTF-8 with LF endings.
    ///
    /// Files written by an earlier call (this process or a previous run)
    /// that the current call does not carry are removed first. Anything
    /// else in the directory, such as `foundry.toml` or `lib/`, is left
    /// alone.
    pub async fn materialize(&self, artifact: &Artifact, auxiliary: &[AuxFile]) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;

        let current: BTreeSet<&str> = std::iter::once(artifact.name.as_str())
            .chain(auxiliary.iter().map(|f| f.name.as_str()))
            .collect();
        for stale in self.written_files().await? {
            if current.contains(stale.as_str()) {
                continue;
            }
            let Ok(path) = self.resolve(&stale) else {
                continue;
            };
            match tokio::fs::remove_file(&path).await {
                Ok(()) => tracing::debug!(file = %stale, "removed stale workspace file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        let manifest: String = current.iter().map(|name| format!("{name}\n")).collect();
        tokio::fs::write(self.root.join(MANIFEST), manifest).await?;

        self.write_file(&artifact.name, &artifact.source).await?;
        for file in auxiliary {
            self.write_file(&file.name, &file.content).await?;
        }
        Ok(())
    }

    /// Names recorded by the last materialization.
    async fn written_files(&self) -> Result<Vec<String>> {
        match tokio::fs::read_to_string(self.root.join(MANIFEST)).await {
            Ok(text) => Ok(text
                .lines()
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_file(&self, name: &str, content: &str) -> Result<()> {
        let path = self.resolve(name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content.replace("\r\n", "\n")).await?;
        Ok(())
    }

    /// Join `name` under the root, rejecting absolute paths and `..`.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        let relative = Path::new(name);
        let escapes = name.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(ToolsError::UnsafePath(name.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

/// Captured result of one subprocess.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl CommandOutput {
    /// stdout followed by stderr.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

/// Run `command` to completion, killing it after `timeout_secs` (0 = none).
pub async fn run_command(
    label: &str,
    command: &[String],
    timeout_secs: u64,
) -> anyhow::Result<CommandOutput> {
    let start = Instant::now();

    let Some((exe, args)) = command.split_first() else {
        anyhow::bail!("verifier {label} has empty command");
    };

    let child = Command::new(exe)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| anyhow::anyhow!("failed to spawn {exe} for verifier {label}: {e}"))?;

    let output = if timeout_secs > 0 {
        tokio::time::timeout(
            std::time::Duration::from_secs(timeout_secs),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| anyhow::anyhow!("verifier {label} timed out after {timeout_secs} seconds"))??
    } else {
        child.wait_with_output().await?
    };

    Ok(CommandOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

/// Verifier running a shell script against the materialized workspace,
/// either inside a container or directly on the host.
///
/// The script may use two placeholders, expanded per call:
/// - `{dir}`: the workspace as the script sees it (mount point or `.`)
/// - `{artifact}`: the artifact file name
#[derive(Debug, Clone)]
pub struct ShellVerifier {
    name: String,
    script: String,
    fixtures: Vec<AuxFile>,
    sandbox: SandboxConfig,
    workspace: Workspace,
}

impl ShellVerifier {
    pub fn new(name: impl Into<String>, script: impl Into<String>, sandbox: &SandboxConfig) -> Self {
        Self {
            name: name.into(),
            script: script.into(),
            fixtures: Vec::new(),
            workspace: Workspace::new(&sandbox.workspace_dir),
            sandbox: sandbox.clone(),
        }
    }

    /// Write `fixture` alongside every request.
    pub fn with_fixture(mut self, fixture: AuxFile) -> Self {
        self.fixtures.push(fixture);
        self
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    pub fn fixtures(&self) -> &[AuxFile] {
        &self.fixtures
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Full argv for one call against `artifact_name`.
    pub fn argv(&self, artifact_name: &str) -> Result<Vec<String>> {
        let root = self.workspace.absolute_root()?;

        if self.sandbox.use_docker {
            let mount = &self.sandbox.mount_point;
            let script = expand(&self.script, mount, artifact_name);
            Ok(vec![
                "docker".to_string(),
                "run".to_string(),
                "--rm".to_string(),
                "-v".to_string(),
                format!("{}:{mount}", root.display()),
                "-w".to_string(),
                mount.clone(),
                self.sandbox.image.clone(),
                "sh".to_string(),
                "-c".to_string(),
                script,
            ])
        } else {
            let script = expand(&self.script, ".", artifact_name);
            Ok(vec![
                "sh".to_string(),
                "-c".to_string(),
                format!("cd {} && {script}", shell_quote(&root.display().to_string())),
            ])
        }
    }
}

fn expand(script: &str, dir: &str, artifact_name: &str) -> String {
    script
        .replace("{dir}", &shell_quote(dir))
        .replace("{artifact}", &shell_quote(artifact_name))
}

#[async_trait]
impl Verifier for ShellVerifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn verify(&self, request: &VerifyRequest) -> anyhow::Result<ToolOutput> {
        let mut files = self.fixtures.clone();
        files.extend(request.auxiliary.iter().cloned());
        self.workspace.materialize(&request.artifact, &files).await?;

        let argv = self.argv(&request.artifact.name)?;
        let output = run_command(&self.name, &argv, self.sandbox.timeout_secs).await?;

        tracing::debug!(
            verifier = %self.name,
            exit_code = output.exit_code,
            duration_ms = output.duration_ms,
            "verifier finished"
        );

        Ok(ToolOutput::new(output.combined(), output.exit_code))
    }
}

/// Single-quote `part` for `sh -c` unless it is plainly safe.
pub fn shell_quote(part: &str) -> String {
    if !part.is_empty()
        && part
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c))
    {
        return part.to_string();
    }
    format!("'{}'", part.replace('\'', r"'\''"))
}
