// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use std::ffi::OsStr;
use std::fmt;
use tokio::process::Command;
use tracing::{debug, trace, warn};

use crate::error::CommandError;

/// A program plus its arguments, rendered by [`crate::platform::HostPlatform`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
	pub program: String,
	pub args: Vec<String>,
}

impl CommandLine {
	pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
		Self {
			program: program.into(),
			args: args.into_iter().map(Into::into).collect(),
		}
	}
}

impl fmt::Display for CommandLine {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.program)?;
		for arg in &self.args {
			write!(f, " {arg}")?;
		}
		Ok(())
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
	pub stdout: String,
	pub stderr: String,
}

/// Runs external OS commands. Shared by the tunnel and route managers.
#[async_trait]
pub trait CommandRunner: Send + Sync {
	async fn run(&self, command: &CommandLine) -> Result<CommandOutput, CommandError>;
}

/// Runs commands on the host with captured output.
#[derive(Debug, Clone, Default)]
pub struct SystemCommandRunner;

impl SystemCommandRunner {
	pub fn new() -> Self {
		Self
	}
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
	async fn run(&self, command: &CommandLine) -> Result<CommandOutput, CommandError> {
		trace!(cmd = %command, "running command");

		let output = Command::new(OsStr::new(&command.program))
			.args(&command.args)
			.kill_on_drop(true)
			.output()
			.await
			.map_err(|e| {
				if e.kind() == std::io::ErrorKind::NotFound {
					warn!(program = %command.program, "program not found");
					CommandError::NotFound {
						program: command.program.clone(),
					}
				} else {
					CommandError::Io {
						program: command.program.clone(),
						source: e,
					}
				}
			})?;

		let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
		let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

		if output.status.success() {
			debug!(cmd = %command, "command succeeded");
			Ok(CommandOutput { stdout, stderr })
		} else {
			Err(CommandError::Failed {
				command: command.to_string(),
				status: output.status.to_string(),
				stdout,
				stderr,
			})
		}
	}
}
