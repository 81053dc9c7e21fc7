//! Signals which can be sent to a supervised process.

use std::{fmt, str::FromStr};

use nix::sys::signal::Signal as NixSignal;

use crate::error::SignalParseError;

/// A signal sent to a supervised process.
///
/// There are several "first-class" signals which have their own variants, and a generic
/// [`Custom`][Signal::Custom] variant which can be used to send arbitrary signals by number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Signal {
	/// Indicate that the terminal is disconnected (`SIGHUP`).
	///
	/// Despite its nominal purpose, this signal is often used to reload configuration files.
	Hangup,

	/// Indicate to the kernel that the process should stop (`SIGKILL`).
	///
	/// This signal is not handled by the process, but directly by the kernel, and thus cannot be
	/// intercepted. Processes may exit in inconsistent states.
	ForceStop,

	/// Indicate that the process should stop (`SIGINT`).
	///
	/// This signal generally indicates an action taken by the user.
	Interrupt,

	/// Indicate that the process is to stop, the kernel will then dump its core (`SIGQUIT`).
	Quit,

	/// Indicate that the process should stop (`SIGTERM`).
	///
	/// This is what [`kill()`](crate::Process::kill) sends by default.
	Terminate,

	/// Indicate an application-defined behaviour should happen (`SIGUSR1`).
	User1,

	/// Indicate an application-defined behaviour should happen (`SIGUSR2`).
	User2,

	/// Indicate using a custom signal, by raw number.
	///
	/// Numbers which are not valid signals on the current platform are rejected when sending.
	///
	/// ```
	/// use procvisor::Signal;
	/// assert_eq!(Signal::Custom(6), Signal::from(6));
	/// ```
	Custom(i32),
}

impl Signal {
	/// Converts to a [`nix::sys::signal::Signal`] if possible.
	///
	/// This will return `None` if the signal is not supported on the current platform (only for
	/// [`Custom`][Signal::Custom], as the first-class ones are always supported).
	#[must_use]
	pub fn to_nix(self) -> Option<NixSignal> {
		match self {
			Self::Hangup => Some(NixSignal::SIGHUP),
			Self::ForceStop => Some(NixSignal::SIGKILL),
			Self::Interrupt => Some(NixSignal::SIGINT),
			Self::Quit => Some(NixSignal::SIGQUIT),
			Self::Terminate => Some(NixSignal::SIGTERM),
			Self::User1 => Some(NixSignal::SIGUSR1),
			Self::User2 => Some(NixSignal::SIGUSR2),
			Self::Custom(sig) => NixSignal::try_from(sig).ok(),
		}
	}

	/// Converts from a [`nix::sys::signal::Signal`].
	#[must_use]
	pub const fn from_nix(sig: NixSignal) -> Self {
		match sig {
			NixSignal::SIGHUP => Self::Hangup,
			NixSignal::SIGKILL => Self::ForceStop,
			NixSignal::SIGINT => Self::Interrupt,
			NixSignal::SIGQUIT => Self::Quit,
			NixSignal::SIGTERM => Self::Terminate,
			NixSignal::SIGUSR1 => Self::User1,
			NixSignal::SIGUSR2 => Self::User2,
			sig => Self::Custom(sig as i32),
		}
	}
}

impl From<i32> for Signal {
	/// Converts from a raw signal number, using the platform's signal table.
	fn from(raw: i32) -> Self {
		NixSignal::try_from(raw).map_or(Self::Custom(raw), Self::from_nix)
	}
}

impl fmt::Display for Signal {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match (self, self.to_nix()) {
			(_, Some(sig)) => f.write_str(sig.as_str()),
			(Self::Custom(raw), None) => write!(f, "signal {raw}"),
			(other, None) => write!(f, "{other:?}"),
		}
	}
}

impl FromStr for Signal {
	type Err = SignalParseError;

	/// Parse the input as a unix signal.
	///
	/// This parses the input as a signal name, or a signal number, in a case-insensitive manner.
	/// It supports integers, the short name of the signal (like `INT`, `HUP`, `USR1`, etc), and
	/// the long name of the signal (like `SIGINT`, `SIGHUP`, `SIGUSR1`, etc).
	///
	/// ```
	/// # use procvisor::Signal;
	/// assert_eq!(Signal::Hangup, "hup".parse().unwrap());
	/// assert_eq!(Signal::Interrupt, "SIGINT".parse().unwrap());
	/// assert_eq!(Signal::ForceStop, "Kill".parse().unwrap());
	/// assert_eq!(Signal::ForceStop, "9".parse().unwrap());
	/// ```
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if let Ok(raw) = i32::from_str(s) {
			return NixSignal::try_from(raw)
				.map(Self::from_nix)
				.map_err(|_| SignalParseError::new(s, "no such signal number"));
		}

		let upper = s.to_ascii_uppercase();
		NixSignal::from_str(&upper)
			.or_else(|_| NixSignal::from_str(&format!("SIG{upper}")))
			.map(Self::from_nix)
			.map_err(|_| SignalParseError::new(s, "unsupported signal"))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_names_and_numbers() {
		assert_eq!("term".parse::<Signal>().unwrap(), Signal::Terminate);
		assert_eq!("SIGTERM".parse::<Signal>().unwrap(), Signal::Terminate);
		assert_eq!("usr2".parse::<Signal>().unwrap(), Signal::User2);
		assert_eq!(" 2 ".parse::<Signal>().unwrap(), Signal::Interrupt);
		assert_eq!(
			"sigabrt".parse::<Signal>().unwrap(),
			Signal::Custom(NixSignal::SIGABRT as i32)
		);
	}

	#[test]
	fn rejects_garbage() {
		let err = "NOTASIGNAL".parse::<Signal>().unwrap_err();
		assert_eq!(err.input(), "NOTASIGNAL");
		assert!("9999".parse::<Signal>().is_err());
	}

	#[test]
	fn raw_numbers_use_platform_table() {
		assert_eq!(Signal::from(NixSignal::SIGUSR1 as i32), Signal::User1);
		assert_eq!(Signal::from(9), Signal::ForceStop);
		assert_eq!(Signal::Custom(9999).to_nix(), None);
	}

	#[test]
	fn display_uses_os_names() {
		assert_eq!(Signal::Interrupt.to_string(), "SIGINT");
		assert_eq!(Signal::Custom(9999).to_string(), "signal 9999");
	}
}
