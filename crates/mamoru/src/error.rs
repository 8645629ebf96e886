use std::path::PathBuf;
use thiserror::Error;

/// The OS could not start the executable (bad path, permissions,
/// resource exhaustion). Never retried automatically.
#[derive(Debug, Error)]
#[error("failed to launch {}: {source}", path.display())]
pub struct LaunchError {
	pub path: PathBuf,
	#[source]
	pub source: std::io::Error,
}

#[derive(Debug, Error)]
pub enum SupervisorError {
	#[error(transparent)]
	Launch(#[from] LaunchError),

	/// Crash-restart is disabled or the restart ceiling was reached.
	/// The supervisor is left in `Failed` and will not recover.
	#[error("can not restart service (exit code {exit_code}, {attempts} restarts used)")]
	SupervisionFailed { exit_code: i32, attempts: u32 },
}
