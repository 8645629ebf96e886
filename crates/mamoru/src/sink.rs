/// Named log channels. Lifecycle messages go to `Main`, captured child
/// output to the stream-specific channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogChannel {
	Main,
	ServiceStdout,
	ServiceStderr,
}

impl LogChannel {
	pub fn as_str(&self) -> &'static str {
		match self {
			LogChannel::Main => "main",
			LogChannel::ServiceStdout => "service.stdout",
			LogChannel::ServiceStderr => "service.stderr",
		}
	}
}

/// Text-logging collaborator. Implementations must tolerate calls from
/// multiple tasks; the supervisor serializes nothing on their behalf.
pub trait LogSink: Send + Sync + 'static {
	fn info(&self, channel: LogChannel, line: &str);
	fn error(&self, channel: LogChannel, line: &str);
	fn fatal(&self, channel: LogChannel, line: &str);
}

/// Routes sink calls onto `tracing` events carrying the channel name.
pub struct TracingSink;

impl LogSink for TracingSink {
	fn info(&self, channel: LogChannel, line: &str) {
		tracing::info!(channel = channel.as_str(), "{}", line);
	}

	fn error(&self, channel: LogChannel, line: &str) {
		tracing::error!(channel = channel.as_str(), "{}", line);
	}

	fn fatal(&self, channel: LogChannel, line: &str) {
		// tracing has no level above error; mark fatal events explicitly
		tracing::error!(channel = channel.as_str(), fatal = true, "{}", line);
	}
}
