//! Asynchronous supervision of one external process.
//!
//! This crate launches an OS process, exposes its standard streams as event sources, observes its
//! termination, and lets callers suspend, resume and signal it, without blocking unless asked to
//! with [`wait()`](Supervisor::wait).
//!
//! # Usage
//!
//! The entrypoint is the [`Supervisor`], which owns a [`Process`] and its three standard
//! [`Stream`]s:
//!
//! ```no_run
//! use procvisor::{LaunchOptions, Supervisor};
//!
//! #[tokio::main]
//! async fn main() -> miette::Result<()> {
//! 	let supervisor = Supervisor::new("/usr/bin/tail")?;
//! 	supervisor
//! 		.on_output(|text| print!("{text}"))?
//! 		.on_error(|text| eprint!("{text}"))?
//! 		.on_done(|event| println!("ended: {:?}", event.termination()));
//!
//! 	supervisor.launch(["-f", "/var/log/syslog"], LaunchOptions::default())?;
//! 	tokio::time::sleep(std::time::Duration::from_secs(10)).await;
//! 	supervisor.kill().await?;
//! 	supervisor.wait().await?;
//! 	Ok(())
//! }
//! ```
//!
//! # Theory of Operation
//!
//! Everything that happens to a process or its streams is published as a [`NotificationEvent`]
//! on a [`Dispatcher`], keyed by the identity of the source (a [`Process`] or a [`Stream`]) and
//! an [`EventName`](event::EventName). Output callbacks, completion callbacks and termination
//! callbacks are all subscriptions on that bus, and run synchronously on the task which
//! publishes: the stream's reader for chunks, the process's exit watcher for terminations.
//!
//! Each output stream is read by one background task, started by the first read. Chunked readers
//! subscribe to its chunks; full reads wait for the end of the stream and get a cached copy, so
//! the stream can be consumed in both ways at once and is only read from the OS once.
//!
//! The [Tokio](tokio) runtime plays the part of the event loop: launching and reading must be done
//! from within a runtime, which the supervisor never starts or stops.
//!
//! This crate only supports unix platforms.

#![warn(clippy::unwrap_used, missing_docs, rustdoc::unescaped_backticks)]
#![deny(rust_2018_idioms)]

#[cfg(not(unix))]
compile_error!("procvisor relies on unix signals and only supports unix platforms");

#[doc(inline)]
pub use config::{LaunchOptions, SignalRetry, StdioMode, SupervisorConfig, SupervisorConfigBuilder};
#[doc(inline)]
pub use dispatch::{Dispatcher, Notifier, SubscriptionHandle};
#[doc(inline)]
pub use event::NotificationEvent;
#[doc(inline)]
pub use process::{Phase, Process, Termination, TerminationReason};
#[doc(inline)]
pub use signal::Signal;
#[doc(inline)]
pub use stream::{Pipes, ReadMode, Stream, StreamKind};
#[doc(inline)]
pub use supervisor::{Captured, Supervisor};

pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod process;
pub mod signal;
pub mod stream;
pub mod supervisor;
