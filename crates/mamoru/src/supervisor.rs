use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

use crate::error::SupervisorError;
use crate::process::{ProcessEvent, ProcessHandle};
use crate::sink::{LogChannel, LogSink};
use crate::types::{ServiceSpec, SupervisorState};

/// Supervises one service: owns the current [`ProcessHandle`], routes its
/// captured output to the [`LogSink`], and applies the restart policy
/// when the process exits.
pub struct Supervisor {
	spec: ServiceSpec,
	sink: Arc<dyn LogSink>,
	state: Arc<RwLock<SupervisorState>>,
	fails: Arc<AtomicU32>,
	cancel: Option<watch::Sender<bool>>,
	task: Option<JoinHandle<Result<(), SupervisorError>>>,
}

impl Supervisor {
	pub fn new(spec: ServiceSpec, sink: Arc<dyn LogSink>) -> Self {
		Self {
			spec,
			sink,
			state: Arc::new(RwLock::new(SupervisorState::Stopped)),
			fails: Arc::new(AtomicU32::new(0)),
			cancel: None,
			task: None,
		}
	}

	pub async fn state(&self) -> SupervisorState {
		*self.state.read().await
	}

	/// Crash-triggered relaunches performed so far. Monotonic for the
	/// lifetime of this supervisor; a successful restart does not reset it.
	pub fn fails_count(&self) -> u32 {
		self.fails.load(Ordering::SeqCst)
	}

	/// Launch the service and begin supervising it.
	///
	/// The first launch happens inline, so a bad executable path surfaces
	/// here as [`SupervisorError::Launch`] with nothing left running.
	/// Valid from `Stopped`, including after a normal exit; a no-op while
	/// already supervising; refused from the terminal `Failed` state.
	pub async fn start(&mut self) -> Result<(), SupervisorError> {
		match self.state().await {
			SupervisorState::Failed => return Ok(()),
			SupervisorState::Stopped => self.reap().await,
			// Starting/Running/Exited/Restarting: already supervising
			_ => return Ok(()),
		}

		set_state(&self.state, SupervisorState::Starting).await;
		let handle = match ProcessHandle::launch(&self.spec).await {
			Ok(handle) => handle,
			Err(e) => {
				set_state(&self.state, SupervisorState::Stopped).await;
				return Err(SupervisorError::Launch(e));
			}
		};
		set_state(&self.state, SupervisorState::Running).await;

		let (cancel_tx, cancel_rx) = watch::channel(false);
		self.cancel = Some(cancel_tx);

		let spec = self.spec.clone();
		let sink = Arc::clone(&self.sink);
		let state = Arc::clone(&self.state);
		let fails = Arc::clone(&self.fails);
		self.task = Some(tokio::spawn(async move {
			supervise(handle, spec, sink, state, fails, cancel_rx).await
		}));
		Ok(())
	}

	/// Request termination of the current process and wait for teardown.
	/// Safe to call when already stopped. Leaves a `Failed` supervisor
	/// in `Failed`.
	pub async fn stop(&mut self) {
		if let Some(cancel) = self.cancel.take() {
			let _ = cancel.send(true);
		}
		self.reap().await;
	}

	// Join a supervision loop that has already returned (or was told to).
	// A `Stopped` state is only ever written right before the loop
	// returns, so this completes promptly.
	async fn reap(&mut self) {
		self.cancel = None;
		if let Some(task) = self.task.take() {
			if let Err(e) = task.await {
				tracing::warn!("supervision task join failed: {}", e);
			}
		}
	}

	/// Block until supervision reaches a terminal state: `Ok(())` after a
	/// normal exit or an explicit stop, `Err(SupervisionFailed)` once the
	/// restart policy gives up, `Err(Launch)` if a relaunch could not spawn.
	pub async fn wait(&mut self) -> Result<(), SupervisorError> {
		let Some(task) = self.task.take() else {
			return Ok(());
		};
		match task.await {
			Ok(result) => result,
			Err(e) => {
				tracing::error!("supervision task panicked: {}", e);
				Ok(())
			}
		}
	}
}

impl Drop for Supervisor {
	fn drop(&mut self) {
		// Equivalent of an explicit stop; the loop kills the child and
		// tears down on its own once it sees the cancel.
		if let Some(cancel) = self.cancel.take() {
			let _ = cancel.send(true);
		}
	}
}

enum Wake {
	Exited(i32),
	Cancelled,
}

enum ExitDecision {
	Normal,
	Restart { attempt: u32 },
	GiveUp,
}

fn decide(spec: &ServiceSpec, exit_code: i32, fails: u32) -> ExitDecision {
	if exit_code == 0 {
		return ExitDecision::Normal;
	}
	if spec.restart_after_crash && fails < spec.max_restart_attempts {
		ExitDecision::Restart { attempt: fails + 1 }
	} else {
		ExitDecision::GiveUp
	}
}

async fn supervise(
	mut handle: ProcessHandle,
	spec: ServiceSpec,
	sink: Arc<dyn LogSink>,
	state: Arc<RwLock<SupervisorState>>,
	fails: Arc<AtomicU32>,
	mut cancel: watch::Receiver<bool>,
) -> Result<(), SupervisorError> {
	loop {
		let wake = loop {
			tokio::select! {
				event = handle.next_event() => match event {
					Some(ProcessEvent::Stdout(line)) => sink.info(LogChannel::ServiceStdout, &line),
					Some(ProcessEvent::Stderr(line)) => sink.error(LogChannel::ServiceStderr, &line),
					Some(ProcessEvent::Exited(code)) => break Wake::Exited(code),
					None => break Wake::Exited(-1),
				},
				_ = cancel.changed() => break Wake::Cancelled,
			}
		};

		// Full teardown of the old process (child reaped, readers joined)
		// before anything else; at most one live process at a time.
		handle.shutdown().await;

		let exit_code = match wake {
			Wake::Cancelled => {
				set_state(&state, SupervisorState::Stopped).await;
				return Ok(());
			}
			Wake::Exited(code) => code,
		};

		set_state(&state, SupervisorState::Exited).await;

		match decide(&spec, exit_code, fails.load(Ordering::SeqCst)) {
			ExitDecision::Normal => {
				sink.info(LogChannel::Main, "Service normally terminated");
				set_state(&state, SupervisorState::Stopped).await;
				return Ok(());
			}
			ExitDecision::GiveUp => {
				sink.error(LogChannel::Main, "Service crashed");
				sink.fatal(LogChannel::Main, "Can not restart service");
				set_state(&state, SupervisorState::Failed).await;
				return Err(SupervisorError::SupervisionFailed {
					exit_code,
					attempts: fails.load(Ordering::SeqCst),
				});
			}
			ExitDecision::Restart { attempt } => {
				sink.error(LogChannel::Main, "Service crashed");
				fails.store(attempt, Ordering::SeqCst);
				sink.info(
					LogChannel::Main,
					&format!(
						"Trying to restart service ({}/{})...",
						attempt, spec.max_restart_attempts
					),
				);
				set_state(&state, SupervisorState::Restarting).await;

				if spec.restart_delay_secs > 0 {
					tokio::select! {
						_ = tokio::time::sleep(std::time::Duration::from_secs(spec.restart_delay_secs)) => {}
						_ = cancel.changed() => {
							set_state(&state, SupervisorState::Stopped).await;
							return Ok(());
						}
					}
				}

				set_state(&state, SupervisorState::Starting).await;
				handle = match ProcessHandle::launch(&spec).await {
					Ok(handle) => handle,
					Err(e) => {
						// One restart attempt is one launch; a failed
						// relaunch is terminal, not retried.
						set_state(&state, SupervisorState::Failed).await;
						return Err(SupervisorError::Launch(e));
					}
				};
				sink.info(LogChannel::Main, "Service successfully restarted");
				set_state(&state, SupervisorState::Running).await;
			}
		}
	}
}

async fn set_state(state: &RwLock<SupervisorState>, next: SupervisorState) {
	*state.write().await = next;
}

#[cfg(test)]
mod tests {
	use super::*;

	fn spec(restart: bool, max: u32) -> ServiceSpec {
		ServiceSpec {
			path: "/bin/true".into(),
			restart_after_crash: restart,
			max_restart_attempts: max,
			..Default::default()
		}
	}

	#[test]
	fn normal_exit_never_restarts() {
		assert!(matches!(decide(&spec(true, 5), 0, 0), ExitDecision::Normal));
		assert!(matches!(decide(&spec(false, 0), 0, 3), ExitDecision::Normal));
	}

	#[test]
	fn crash_with_restart_disabled_gives_up() {
		assert!(matches!(decide(&spec(false, 5), 1, 0), ExitDecision::GiveUp));
	}

	#[test]
	fn crash_below_ceiling_restarts_and_counts() {
		match decide(&spec(true, 3), 1, 0) {
			ExitDecision::Restart { attempt } => assert_eq!(attempt, 1),
			_ => panic!("expected restart"),
		}
		match decide(&spec(true, 3), 7, 2) {
			ExitDecision::Restart { attempt } => assert_eq!(attempt, 3),
			_ => panic!("expected restart"),
		}
	}

	#[test]
	fn crash_at_ceiling_gives_up() {
		assert!(matches!(decide(&spec(true, 3), 1, 3), ExitDecision::GiveUp));
		assert!(matches!(decide(&spec(true, 0), 1, 0), ExitDecision::GiveUp));
	}
}
