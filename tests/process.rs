use std::{
	fs::{self, Permissions},
	os::unix::fs::PermissionsExt,
	path::PathBuf,
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc,
	},
};

use procvisor::{
	error::ProcessError, event::EventName, Dispatcher, LaunchOptions, Phase, Process, Signal,
	StdioMode, SupervisorConfig, Termination, TerminationReason,
};

mod helpers;
use helpers::{script, tracing_init, SH};

// a bare process has nowhere to read pipes from, so it shares ours
fn inherit() -> LaunchOptions {
	LaunchOptions::default().stdio(StdioMode::Inherit)
}

fn sh(body: &str) -> Process {
	let process = Process::new(SH, script(body), None).unwrap();
	process.launch(Vec::<String>::new(), &inherit()).unwrap();
	process
}

#[test]
fn invalid_executables_are_rejected_at_construction() {
	let dir = tempfile::tempdir().unwrap();
	let not_executable = dir.path().join("data.txt");
	fs::write(&not_executable, "not a program").unwrap();
	fs::set_permissions(&not_executable, Permissions::from_mode(0o644)).unwrap();

	for path in [
		PathBuf::from("/bin/mrinvalid"),
		not_executable,
		dir.path().to_owned(),
	] {
		for cwd in [None, Some(dir.path().to_owned())] {
			assert!(
				matches!(
					Process::new(&path, Vec::<String>::new(), cwd),
					Err(ProcessError::InvalidExecutable { path: ref p }) if *p == path
				),
				"{path:?} should be rejected"
			);
		}
	}
}

#[test]
fn pwd_is_known_before_launch() {
	let dir = tempfile::tempdir().unwrap();
	let process = Process::new("/bin/ls", Vec::<String>::new(), Some(dir.path().into())).unwrap();
	assert_eq!(process.pwd(), dir.path());
	assert_eq!(process.executable(), PathBuf::from("/bin/ls"));
	assert!(!process.is_running());
	assert_eq!(process.pid(), None);
	assert!(matches!(process.phase(), Phase::Created));
}

#[test]
fn pwd_defaults_to_current_directory() {
	let process = Process::new("/bin/ls", Vec::<String>::new(), None).unwrap();
	assert_eq!(process.pwd(), std::env::current_dir().unwrap());
}

#[tokio::test]
async fn ls_exits_successfully() {
	tracing_init();
	let process = Process::new("/bin/ls", Vec::<String>::new(), None).unwrap();
	process.launch(["/"], &inherit()).unwrap();
	assert!(process.pid().is_some());

	let termination = process.wait().await.unwrap();
	assert_eq!(termination, Termination::exited(0));
	assert_eq!(process.status(), Some(0));
	assert_eq!(process.reason(), Some(TerminationReason::NormalExit));
	assert_eq!(process.arguments(), vec!["/"]);
}

#[tokio::test]
async fn second_launch_is_refused() {
	let process = Process::new("/bin/ls", Vec::<String>::new(), None).unwrap();
	process.launch(["/"], &inherit()).unwrap();

	for args in [vec!["/"], vec![], vec!["-l", "/tmp"]] {
		assert!(matches!(
			process.launch(args, &inherit()),
			Err(ProcessError::AlreadyLaunched)
		));
	}

	process.wait().await.unwrap();
	assert!(matches!(
		process.launch(["/"], &inherit()),
		Err(ProcessError::AlreadyLaunched)
	));
}

#[tokio::test]
async fn status_and_reason_are_unset_while_running() {
	let process = sh("exec sleep 30");
	assert!(process.is_running());
	assert_eq!(process.status(), None);
	assert_eq!(process.reason(), None);

	process.kill().await.unwrap();
	process.wait().await.unwrap();
}

#[tokio::test]
async fn exit_codes_are_normal_exits() {
	let termination = sh("exit 3").wait().await.unwrap();
	assert_eq!(termination.status, 3);
	assert_eq!(termination.reason, TerminationReason::NormalExit);
}

#[tokio::test]
async fn killed_processes_die_by_uncaught_signal() {
	tracing_init();
	let process = sh("exec sleep 30");
	process.kill().await.unwrap();

	let termination = process.wait().await.unwrap();
	assert_eq!(termination.reason, TerminationReason::UncaughtSignal);
	assert_eq!(termination.signal(), Some(Signal::Terminate));
	assert_eq!(process.status(), Some(15));
	assert!(!process.is_running());
}

#[tokio::test]
async fn interrupt_sends_sigint() {
	let process = sh("exec sleep 30");
	process.interrupt().await.unwrap();
	assert_eq!(
		process.wait().await.unwrap().signal(),
		Some(Signal::Interrupt)
	);
}

#[tokio::test]
async fn signals_to_processes_not_running_are_ignored() {
	let process = Process::new(SH, script("exit 0"), None).unwrap();
	process.kill().await.unwrap();
	process.signal(Signal::ForceStop).await.unwrap();

	process
		.launch(Vec::<String>::new(), &inherit())
		.unwrap();
	process.wait().await.unwrap();

	process.kill().await.unwrap();
	process.interrupt().await.unwrap();
	process.signal(Signal::User1).await.unwrap();
}

#[tokio::test]
async fn invalid_signal_numbers_are_rejected() {
	let process = sh("exec sleep 30");
	assert!(matches!(
		process.signal(Signal::Custom(9999)).await,
		Err(ProcessError::UnsupportedSignal(Signal::Custom(9999)))
	));
	process.signal(Signal::ForceStop).await.unwrap();
	assert_eq!(process.wait().await.unwrap(), Termination::signaled(9));
}

#[tokio::test]
async fn single_suspend_is_not_reentrant() {
	let process = sh("exec sleep 30");
	process.suspend().unwrap();
	assert!(process.is_suspended());
	assert!(matches!(
		process.suspend(),
		Err(ProcessError::AlreadySuspended)
	));

	process.resume().unwrap();
	assert!(!process.is_suspended());
	assert!(matches!(process.resume(), Err(ProcessError::NotSuspended)));

	process.kill().await.unwrap();
	process.wait().await.unwrap();
}

#[tokio::test]
async fn stacked_suspends_need_matching_resumes() {
	let process = sh("exec sleep 30");
	let pid = process.pid().unwrap();

	process.suspend_stacking().unwrap();
	process.suspend_stacking().unwrap();
	assert_eq!(process.suspend_count(), 2);
	#[cfg(target_os = "linux")]
	helpers::eventually("process to stop", || helpers::proc_state(pid) == Some('T')).await;

	process.resume().unwrap();
	assert!(process.is_suspended());
	#[cfg(target_os = "linux")]
	assert_eq!(helpers::proc_state(pid), Some('T'));

	process.resume().unwrap();
	assert_eq!(process.suspend_count(), 0);
	#[cfg(target_os = "linux")]
	helpers::eventually("process to continue", || {
		helpers::proc_state(pid).is_some_and(|state| state != 'T')
	})
	.await;

	process.kill().await.unwrap();
	process.wait().await.unwrap();
	let _ = pid;
}

#[tokio::test]
async fn suspended_processes_can_be_killed() {
	let process = sh("exec sleep 30");
	process.suspend().unwrap();
	process.signal(Signal::ForceStop).await.unwrap();
	assert_eq!(process.wait().await.unwrap(), Termination::signaled(9));
	assert_eq!(process.suspend_count(), 0);
}

#[tokio::test]
async fn suspension_needs_a_running_process() {
	let process = Process::new(SH, script("exit 0"), None).unwrap();
	assert!(matches!(process.suspend(), Err(ProcessError::NotRunning)));
	assert!(matches!(
		process.suspend_stacking(),
		Err(ProcessError::NotRunning)
	));
	assert!(matches!(process.resume(), Err(ProcessError::NotRunning)));
}

#[tokio::test]
async fn waiting_needs_a_launch() {
	let process = Process::new("/bin/ls", Vec::<String>::new(), None).unwrap();
	assert!(matches!(
		process.wait().await,
		Err(ProcessError::NotLaunched)
	));
}

#[tokio::test]
async fn several_waiters_see_the_same_end() {
	let process = sh("exit 7");
	let (one, two) = tokio::join!(process.wait(), process.wait());
	assert_eq!(one.unwrap(), two.unwrap());
}

#[tokio::test]
async fn failed_launches_are_final() {
	let process = Process::new("/bin/ls", Vec::<String>::new(), None).unwrap();
	let options = inherit().working_directory("/nonexistent/procvisor/dir");
	let _ = process.on_terminated(|_| panic!("never started, so never ended"));
	assert_eq!(process.dispatcher().len(), 1);

	assert!(matches!(
		process.launch(Vec::<String>::new(), &options),
		Err(ProcessError::Spawn { .. })
	));
	assert!(matches!(process.phase(), Phase::FailedToStart { .. }));
	assert!(matches!(
		process.wait().await,
		Err(ProcessError::Spawn { .. })
	));
	assert!(matches!(
		process.launch(Vec::<String>::new(), &inherit()),
		Err(ProcessError::AlreadyLaunched)
	));
	assert!(process.dispatcher().is_empty());
}

#[tokio::test]
async fn piped_launches_need_a_supervisor() {
	let process = Process::new("/bin/ls", Vec::<String>::new(), None).unwrap();
	let _ = process.on_terminated(|_| {});

	assert!(matches!(
		process.launch(["/"], &LaunchOptions::default()),
		Err(ProcessError::NoPipes)
	));
	assert!(matches!(process.phase(), Phase::Created));
	assert_eq!(process.pid(), None);
	assert!(process.arguments().is_empty());

	process.launch(["/"], &inherit()).unwrap();
	assert_eq!(process.wait().await.unwrap(), Termination::exited(0));
}

#[tokio::test]
async fn termination_is_published_once() {
	let dispatcher = Dispatcher::new();
	let config = SupervisorConfig::builder()
		.dispatcher(dispatcher.clone())
		.build()
		.unwrap();
	let process = Process::with_config(SH, script("exit 4"), &config).unwrap();

	let seen = Arc::new(AtomicUsize::new(0));
	let _ = dispatcher.subscribe(&process, EventName::Terminated, {
		let seen = seen.clone();
		move |event| {
			assert_eq!(event.termination(), Some(Termination::exited(4)));
			seen.fetch_add(1, Ordering::SeqCst);
		}
	});

	process
		.launch(Vec::<String>::new(), &inherit())
		.unwrap();
	process.wait().await.unwrap();
	helpers::eventually("termination event", || seen.load(Ordering::SeqCst) == 1).await;

	// late subscribers get the recorded end straight away
	let late = Arc::new(AtomicUsize::new(0));
	let _ = process.on_terminated({
		let late = late.clone();
		move |_| {
			late.fetch_add(1, Ordering::SeqCst);
		}
	});
	assert_eq!(late.load(Ordering::SeqCst), 1);
	assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn processes_from_the_same_path_do_not_share_events() {
	let dispatcher = Dispatcher::new();
	let config = SupervisorConfig::builder()
		.dispatcher(dispatcher.clone())
		.build()
		.unwrap();
	let quick = Process::with_config(SH, script("exit 0"), &config).unwrap();
	let slow = Process::with_config(SH, script("exec sleep 30"), &config).unwrap();
	assert_ne!(quick.id(), slow.id());

	let slow_ended = Arc::new(AtomicUsize::new(0));
	let _ = dispatcher.subscribe(&slow, EventName::Terminated, {
		let slow_ended = slow_ended.clone();
		move |_| {
			slow_ended.fetch_add(1, Ordering::SeqCst);
		}
	});

	quick
		.launch(Vec::<String>::new(), &inherit())
		.unwrap();
	slow.launch(Vec::<String>::new(), &inherit())
		.unwrap();
	quick.wait().await.unwrap();
	assert_eq!(slow_ended.load(Ordering::SeqCst), 0);

	slow.kill().await.unwrap();
	slow.wait().await.unwrap();
	helpers::eventually("slow termination", || slow_ended.load(Ordering::SeqCst) == 1).await;
}
