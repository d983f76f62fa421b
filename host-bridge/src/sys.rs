use crate::error::{BridgeError, BridgeResult};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// System bridge for running external shell commands
pub struct SysBridge {
	cwd: PathBuf,
}

impl SysBridge {
	/// Create a SysBridge whose commands run inside `cwd`
	pub fn new(cwd: impl Into<PathBuf>) -> Self {
		Self { cwd: cwd.into() }
	}

	pub fn cwd(&self) -> &Path {
		&self.cwd
	}

	fn shell(&self, command: &str) -> Command {
		let mut cmd = if cfg!(windows) {
			let mut c = Command::new("cmd");
			c.arg("/C").arg(command);
			c
		} else {
			let mut c = Command::new("sh");
			c.arg("-c").arg(command);
			c
		};
		cmd.current_dir(&self.cwd);
		cmd
	}

	/// Run a shell command.
	///
	/// With `wait` the caller is suspended until the command exits and a
	/// non-zero exit status is an error; stdio is inherited. Without `wait` the
	/// command is started in the background and only a failure to spawn is
	/// reported.
	pub async fn run(&self, command: &str, wait: bool) -> BridgeResult<()> {
		debug!("run (wait={}): {}", wait, command);
		let mut cmd = self.shell(command);

		if wait {
			let status = cmd
				.stdin(Stdio::inherit())
				.stdout(Stdio::inherit())
				.stderr(Stdio::inherit())
				.status()
				.await?;
			if !status.success() {
				return Err(BridgeError::Command(format!("`{}` exited with {}", command, status)));
			}
			return Ok(());
		}

		let mut child = cmd
			.stdin(Stdio::null())
			.stdout(Stdio::null())
			.stderr(Stdio::null())
			.spawn()?;
		let label = command.to_string();
		tokio::spawn(async move {
			match child.wait().await {
				Ok(status) if !status.success() => warn!("Background command `{}` exited with {}", label, status),
				Err(e) => warn!("Background command `{}` failed: {}", label, e),
				_ => {}
			}
		});
		Ok(())
	}
}
