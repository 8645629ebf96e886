use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Everything needed to launch and supervise one service. Supplied
/// already validated by the host; read-only to the supervisor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceSpec {
	pub path: PathBuf,
	#[serde(default)]
	pub args: Vec<String>,
	#[serde(default)]
	pub restart_after_crash: bool,
	#[serde(default)]
	pub max_restart_attempts: u32,
	#[serde(default)]
	pub restart_delay_secs: u64,
	#[serde(default)]
	pub env: HashMap<String, String>,
	#[serde(default)]
	pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SupervisorState {
	Stopped,
	Starting,
	Running,
	Exited,
	Restarting,
	Failed,
}

impl SupervisorState {
	pub fn is_running(&self) -> bool {
		matches!(self, SupervisorState::Running)
	}

	/// Failed is the one state supervision never leaves.
	pub fn is_failed(&self) -> bool {
		matches!(self, SupervisorState::Failed)
	}
}
