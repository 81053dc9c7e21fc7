#![allow(dead_code)]

use std::time::{Duration, Instant};

use tokio::time::sleep;

pub const SH: &str = "/bin/sh";

/// Arguments to run `script` with [`SH`].
pub fn script(script: &str) -> [String; 2] {
	["-c".into(), script.into()]
}

pub fn tracing_init() {
	tracing_subscriber::fmt()
		.with_env_filter("procvisor=trace")
		.with_test_writer()
		.try_init()
		.ok();
}

/// Poll `check` until it holds, failing the test after ten seconds.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
	let deadline = Instant::now() + Duration::from_secs(10);
	while !check() {
		assert!(Instant::now() < deadline, "timed out waiting for {what}");
		sleep(Duration::from_millis(20)).await;
	}
}

/// The scheduler state letter of a process, from procfs.
#[cfg(target_os = "linux")]
pub fn proc_state(pid: u32) -> Option<char> {
	let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
	// the command name is parenthesised and may contain spaces
	let (_, rest) = stat.rsplit_once(") ")?;
	rest.chars().next()
}
