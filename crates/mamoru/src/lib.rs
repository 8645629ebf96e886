//! # mamoru
//!
//! Single-service supervisor: launch one external process, capture its
//! stdout/stderr line by line, and restart it on crash up to a bounded
//! number of attempts.
//!
//! Captured lines and lifecycle messages go to an injected [`LogSink`];
//! the crate itself only decides when to launch, restart, or give up.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use mamoru::{ServiceSpec, Supervisor, TracingSink};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let spec = ServiceSpec {
//! 	path: "/usr/local/bin/osrm-routed".into(),
//! 	args: vec!["map.osrm".into()],
//! 	restart_after_crash: true,
//! 	max_restart_attempts: 5,
//! 	..Default::default()
//! };
//!
//! let mut sup = Supervisor::new(spec, Arc::new(TracingSink));
//! sup.start().await.expect("launch failed");
//!
//! // Blocks until the service exits normally or supervision gives up.
//! if let Err(e) = sup.wait().await {
//! 	eprintln!("supervision failed: {e}");
//! }
//! # }
//! ```

pub mod error;
pub mod process;
pub mod sink;
pub mod supervisor;
pub mod types;

pub use error::{LaunchError, SupervisorError};
pub use process::{ProcessEvent, ProcessHandle};
pub use sink::{LogChannel, LogSink, TracingSink};
pub use supervisor::Supervisor;
pub use types::{ServiceSpec, SupervisorState};
