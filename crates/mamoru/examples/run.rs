use mamoru::{ServiceSpec, Supervisor, TracingSink};
use std::sync::Arc;

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt().init();

	let args: Vec<String> = std::env::args().skip(1).collect();
	let Some((path, rest)) = args.split_first() else {
		eprintln!("usage: run <program> [args...]");
		return;
	};

	let spec = ServiceSpec {
		path: path.into(),
		args: rest.to_vec(),
		restart_after_crash: true,
		max_restart_attempts: 3,
		restart_delay_secs: 1,
		..Default::default()
	};

	let mut sup = Supervisor::new(spec, Arc::new(TracingSink));
	if let Err(e) = sup.start().await {
		eprintln!("error: {e}");
		std::process::exit(1);
	}
	if let Err(e) = sup.wait().await {
		eprintln!("{e}");
		std::process::exit(1);
	}
}
