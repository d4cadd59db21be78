// External Command Runner
// Runs the external adjustment, archive and stitching programs

use crate::config::CommandSpec;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::debug;

/// Lines of stderr kept for error messages
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Program '{0}' not found on PATH")]
    NotFound(String),

    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with {}: {stderr_tail}", describe_exit(.exit_code))]
    Failed {
        program: String,
        exit_code: Option<i32>,
        stderr_tail: String,
    },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "a signal".to_string(),
    }
}

/// Output collected from a finished command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

/// A configured external program
#[derive(Debug, Clone)]
pub struct ExternalCommand {
    program: PathBuf,
    display_name: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
}

impl ExternalCommand {
    /// Resolve the program on PATH (or as a path) once, up front
    pub fn resolve(spec: &CommandSpec) -> Result<Self, CommandError> {
        let candidate = Path::new(&spec.program);
        let program = if candidate.components().count() > 1 {
            if !candidate.exists() {
                return Err(CommandError::NotFound(spec.program.clone()));
            }
            candidate.to_path_buf()
        } else {
            which::which(&spec.program).map_err(|_| CommandError::NotFound(spec.program.clone()))?
        };

        Ok(Self {
            program,
            display_name: spec.program.clone(),
            args: spec.args.clone(),
            env: spec.env.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.display_name
    }

    /// Run with the configured arguments followed by `extra_args`.
    ///
    /// Output lines are forwarded to the debug log as they arrive.
    pub async fn run(
        &self,
        extra_args: &[String],
        working_dir: Option<&Path>,
    ) -> Result<CommandOutput, CommandError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.args(extra_args);
        cmd.envs(&self.env);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        debug!(program = %self.display_name, args = ?extra_args, "Running external command");

        let mut child = cmd.spawn().map_err(|source| CommandError::Spawn {
            program: self.display_name.clone(),
            source,
        })?;

        let stdout_handle = child
            .stdout
            .take()
            .map(|out| tokio::spawn(collect_lines(out, self.display_name.clone())));
        let stderr_handle = child
            .stderr
            .take()
            .map(|err| tokio::spawn(collect_lines(err, self.display_name.clone())));

        let status = child.wait().await.map_err(|source| CommandError::Spawn {
            program: self.display_name.clone(),
            source,
        })?;

        let stdout = match stdout_handle {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };
        let stderr = match stderr_handle {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };

        let output = CommandOutput {
            stdout,
            stderr,
            exit_code: status.code(),
        };

        if !status.success() {
            return Err(CommandError::Failed {
                program: self.display_name.clone(),
                exit_code: output.exit_code,
                stderr_tail: tail(&output.stderr, STDERR_TAIL_LINES),
            });
        }
        Ok(output)
    }
}

async fn collect_lines(stream: impl AsyncRead + Unpin, program: String) -> String {
    let mut lines = BufReader::new(stream).lines();
    let mut output = String::new();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(program = %program, "{}", line);
        if !output.is_empty() {
            output.push('\n');
        }
        output.push_str(&line);
    }
    output
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}
