use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::LaunchError;
use crate::types::ServiceSpec;

const EVENT_BUFFER: usize = 256;

/// Events posted by the stream readers and the exit watcher. All events
/// for one process arrive on a single channel, in order: every captured
/// line precedes `Exited`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
	Stdout(String),
	Stderr(String),
	Exited(i32),
}

/// One launched OS process with redirected stdio.
///
/// Owns the child handle and two pipe-reader tasks; all three are
/// released exactly once, whichever way the process goes away (normal
/// exit, [`terminate`](Self::terminate), or drop).
pub struct ProcessHandle {
	pid: u32,
	events: mpsc::Receiver<ProcessEvent>,
	cancel: Option<watch::Sender<bool>>,
	pump: Option<JoinHandle<()>>,
}

impl ProcessHandle {
	/// Spawn the process described by `spec` and begin async capture of
	/// both stdio streams.
	pub async fn launch(spec: &ServiceSpec) -> Result<Self, LaunchError> {
		let mut cmd = Command::new(&spec.path);
		cmd.args(&spec.args)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true)
			// New process group so termination can reach the whole tree
			.process_group(0);

		if let Some(dir) = &spec.dir {
			cmd.current_dir(dir);
		}
		for (key, val) in &spec.env {
			cmd.env(key, val);
		}

		let mut child = cmd.spawn().map_err(|source| LaunchError {
			path: spec.path.clone(),
			source,
		})?;
		let pid = child.id().unwrap_or(0);

		let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
		let (cancel_tx, cancel_rx) = watch::channel(false);

		let stdout = child.stdout.take();
		let stderr = child.stderr.take();

		let pump = tokio::spawn(pump(child, pid, stdout, stderr, event_tx, cancel_rx));

		Ok(Self {
			pid,
			events: event_rx,
			cancel: Some(cancel_tx),
			pump: Some(pump),
		})
	}

	pub fn pid(&self) -> u32 {
		self.pid
	}

	/// Next captured line or the exit notification. `None` once the pump
	/// is gone.
	pub async fn next_event(&mut self) -> Option<ProcessEvent> {
		self.events.recv().await
	}

	/// Best-effort stop request. Idempotent; a no-op on an already-exited
	/// process.
	pub fn terminate(&mut self) {
		if let Some(cancel) = self.cancel.take() {
			let _ = cancel.send(true);
		}
	}

	/// Terminate and wait until the child is reaped and both stream
	/// readers have joined.
	pub async fn shutdown(mut self) {
		self.terminate();
		// Stop accepting events so the readers can't block on a full
		// channel while we wait for them.
		self.events.close();
		if let Some(pump) = self.pump.take() {
			let _ = pump.await;
		}
	}
}

impl Drop for ProcessHandle {
	fn drop(&mut self) {
		self.terminate();
	}
}

async fn pump(
	mut child: Child,
	pid: u32,
	stdout: Option<tokio::process::ChildStdout>,
	stderr: Option<tokio::process::ChildStderr>,
	events: mpsc::Sender<ProcessEvent>,
	mut cancel: watch::Receiver<bool>,
) {
	let stdout_task =
		stdout.map(|r| tokio::spawn(read_lines(r, events.clone(), ProcessEvent::Stdout)));
	let stderr_task =
		stderr.map(|r| tokio::spawn(read_lines(r, events.clone(), ProcessEvent::Stderr)));

	let status = tokio::select! {
		status = child.wait() => status,
		_ = cancel.changed() => {
			if pid != 0 {
				kill_process_tree(pid);
			}
			let _ = child.kill().await;
			child.wait().await
		}
	};

	// The pipes hit EOF once the child is gone; joining the readers here
	// keeps every buffered line ahead of the exit event.
	if let Some(task) = stdout_task {
		let _ = task.await;
	}
	if let Some(task) = stderr_task {
		let _ = task.await;
	}

	let code = match status {
		Ok(status) => status.code().unwrap_or(-1),
		Err(e) => {
			tracing::warn!("wait failed for pid {}: {}", pid, e);
			-1
		}
	};
	let _ = events.send(ProcessEvent::Exited(code)).await;
}

async fn read_lines<R>(reader: R, events: mpsc::Sender<ProcessEvent>, wrap: fn(String) -> ProcessEvent)
where
	R: AsyncRead + Unpin,
{
	let mut lines = BufReader::new(reader).lines();
	loop {
		match lines.next_line().await {
			Ok(Some(line)) => {
				if events.send(wrap(line)).await.is_err() {
					break;
				}
			}
			Ok(None) => break,
			Err(e) => {
				// Read errors end the stream but never supervision
				tracing::warn!("stream read error: {}", e);
				break;
			}
		}
	}
}

pub fn kill_process_tree(pid: u32) {
	use nix::sys::signal::{killpg, Signal};
	use nix::unistd::Pid;
	let pgid = Pid::from_raw(pid as i32);
	let _ = killpg(pgid, Signal::SIGTERM);
	std::thread::spawn(move || {
		std::thread::sleep(std::time::Duration::from_secs(3));
		// Escalate only while the group still exists; once the child is
		// reaped the pgid may already belong to someone else
		if killpg(pgid, None).is_ok() {
			let _ = killpg(pgid, Signal::SIGKILL);
		}
	});
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sh(command: &str) -> ServiceSpec {
		ServiceSpec {
			path: "/bin/sh".into(),
			args: vec!["-c".into(), command.into()],
			..Default::default()
		}
	}

	#[tokio::test]
	async fn lines_arrive_before_exit() {
		let mut handle = ProcessHandle::launch(&sh("echo one; echo two")).await.unwrap();

		let mut events = Vec::new();
		while let Some(ev) = handle.next_event().await {
			let done = matches!(ev, ProcessEvent::Exited(_));
			events.push(ev);
			if done {
				break;
			}
		}
		handle.shutdown().await;

		assert_eq!(
			events,
			vec![
				ProcessEvent::Stdout("one".into()),
				ProcessEvent::Stdout("two".into()),
				ProcessEvent::Exited(0),
			]
		);
	}

	#[tokio::test]
	async fn stderr_is_captured_separately() {
		let mut handle = ProcessHandle::launch(&sh("echo oops 1>&2; exit 3")).await.unwrap();

		let mut saw_stderr = false;
		let mut exit_code = None;
		while let Some(ev) = handle.next_event().await {
			match ev {
				ProcessEvent::Stderr(line) => {
					assert_eq!(line, "oops");
					saw_stderr = true;
				}
				ProcessEvent::Exited(code) => {
					exit_code = Some(code);
					break;
				}
				ProcessEvent::Stdout(line) => panic!("unexpected stdout: {}", line),
			}
		}
		handle.shutdown().await;

		assert!(saw_stderr);
		assert_eq!(exit_code, Some(3));
	}

	#[tokio::test]
	async fn launch_bad_path_fails() {
		let spec = ServiceSpec {
			path: "/definitely/not/a/real/binary".into(),
			..Default::default()
		};
		let err = ProcessHandle::launch(&spec).await.err().unwrap();
		assert!(err.to_string().contains("/definitely/not/a/real/binary"));
	}

	#[tokio::test]
	async fn terminate_stops_long_running_child() {
		let mut handle = ProcessHandle::launch(&sh("sleep 60")).await.unwrap();
		handle.terminate();

		// Killed by signal, so no exit code is reported
		loop {
			match handle.next_event().await {
				Some(ProcessEvent::Exited(code)) => {
					assert_eq!(code, -1);
					break;
				}
				Some(_) => continue,
				None => panic!("pump ended without exit event"),
			}
		}
		handle.shutdown().await;
	}

	#[tokio::test]
	async fn kill_process_tree_on_reaped_pid_is_noop() {
		let mut handle = ProcessHandle::launch(&sh("exit 0")).await.unwrap();
		let pid = handle.pid();
		loop {
			match handle.next_event().await {
				Some(ProcessEvent::Exited(code)) => {
					assert_eq!(code, 0);
					break;
				}
				Some(_) => continue,
				None => panic!("pump ended without exit event"),
			}
		}
		handle.shutdown().await;

		// Group is already gone; signalling it must stay a no-op
		kill_process_tree(pid);
	}

	#[tokio::test]
	async fn terminate_is_idempotent() {
		let mut handle = ProcessHandle::launch(&sh("sleep 60")).await.unwrap();
		handle.terminate();
		handle.terminate();
		handle.shutdown().await;
	}
}
