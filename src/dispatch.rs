//! In-process publish/subscribe bus.
//!
//! The [`Dispatcher`] routes [`NotificationEvent`]s to the callbacks subscribed to their
//! `(source, event name)` pair. Delivery is synchronous: [`publish`](Dispatcher::publish) returns
//! once every matching callback has returned, and callbacks for one pair run in the order they
//! were subscribed. Nothing is promised about ordering across different sources.
//!
//! A dispatcher is a cheap handle (internally an `Arc`): clone it to share one bus between several
//! [`Supervisor`](crate::Supervisor)s, or let each supervisor make its own.

use std::{
	fmt,
	sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tracing::{trace, warn};

use crate::event::{EventName, NotificationEvent, Payload, SourceId};

/// A subscribed callback.
pub type Callback = Arc<dyn Fn(&NotificationEvent) + Send + Sync + 'static>;

/// Something which publishes events on a [`Dispatcher`].
///
/// Each concrete source type declares the set of event names it can publish; subscribing to a
/// name outside of that set registers a subscription which can never fire, and logs a warning.
pub trait Notifier {
	/// The events this type of source publishes.
	const EVENTS: &'static [EventName];

	/// The identity of this source.
	fn source_id(&self) -> SourceId;
}

/// Returned by [`Dispatcher::subscribe`], used to [unsubscribe](Dispatcher::unsubscribe).
#[must_use = "dropping the handle leaves the subscription in place, but it then cannot be removed"]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

struct Subscription {
	handle: SubscriptionHandle,
	source: SourceId,
	name: EventName,
	callback: Callback,
}

#[derive(Default)]
struct Registry {
	next_handle: u64,
	subscriptions: Vec<Subscription>,
}

/// Publish/subscribe bus keyed by source identity and event name.
#[derive(Clone, Default)]
pub struct Dispatcher(Arc<Mutex<Registry>>);

impl fmt::Debug for Dispatcher {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Dispatcher")
			.field("subscriptions", &self.registry().subscriptions.len())
			.finish_non_exhaustive()
	}
}

impl Dispatcher {
	/// Make a new, empty dispatcher.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	// Callbacks never run while the registry is locked, so a poisoned lock can only come from a
	// panic between two plain Vec operations, which leaves the registry intact.
	fn registry(&self) -> MutexGuard<'_, Registry> {
		self.0.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Subscribe `callback` to `name` events published by `source`.
	///
	/// Subscriptions are independent: subscribing the same source and event several times makes
	/// every callback fire, in subscription order.
	pub fn subscribe<N: Notifier>(
		&self,
		source: &N,
		name: EventName,
		callback: impl Fn(&NotificationEvent) + Send + Sync + 'static,
	) -> SubscriptionHandle {
		if !N::EVENTS.contains(&name) {
			warn!(
				source = ?source.source_id(),
				?name,
				"subscribing to an event this source never publishes"
			);
		}

		self.subscribe_id(source.source_id(), name, Arc::new(callback))
	}

	pub(crate) fn subscribe_id(
		&self,
		source: SourceId,
		name: EventName,
		callback: Callback,
	) -> SubscriptionHandle {
		let mut registry = self.registry();
		registry.next_handle += 1;
		let handle = SubscriptionHandle(registry.next_handle);
		registry.subscriptions.push(Subscription {
			handle,
			source,
			name,
			callback,
		});
		trace!(?source, ?name, ?handle, "subscribed");
		handle
	}

	/// Remove a subscription.
	///
	/// Returns whether it was still present; removing twice is harmless.
	pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
		let mut registry = self.registry();
		let before = registry.subscriptions.len();
		registry.subscriptions.retain(|sub| sub.handle != handle);
		before != registry.subscriptions.len()
	}

	/// Remove every subscription to events from `source`.
	///
	/// Sources call this once they will never publish again. Returns how many were removed.
	pub fn unsubscribe_source(&self, source: SourceId) -> usize {
		let mut registry = self.registry();
		let before = registry.subscriptions.len();
		registry.subscriptions.retain(|sub| sub.source != source);
		let removed = before - registry.subscriptions.len();
		if removed > 0 {
			trace!(?source, removed, "source retired");
		}
		removed
	}

	/// Deliver an event to every subscription matching `(source, name)`.
	///
	/// The set of callbacks is fixed when this is called: callbacks may subscribe or unsubscribe
	/// (including themselves) without deadlocking, and such changes apply from the next publish.
	///
	/// Returns how many callbacks were invoked.
	pub fn publish(&self, source: SourceId, name: EventName, payload: Payload) -> usize {
		self.publish_event(&NotificationEvent::new(source, name, payload))
	}

	/// Deliver an already-built event. See [`publish`](Self::publish).
	pub fn publish_event(&self, event: &NotificationEvent) -> usize {
		let callbacks: Vec<Callback> = self
			.registry()
			.subscriptions
			.iter()
			.filter(|sub| sub.source == event.source && sub.name == event.name)
			.map(|sub| sub.callback.clone())
			.collect();

		trace!(source = ?event.source, name = ?event.name, subscribers = callbacks.len(), "publishing");
		for callback in &callbacks {
			callback(event);
		}

		callbacks.len()
	}

	/// How many subscriptions match `(source, name)`.
	#[must_use]
	pub fn subscribers(&self, source: SourceId, name: EventName) -> usize {
		self.registry()
			.subscriptions
			.iter()
			.filter(|sub| sub.source == source && sub.name == name)
			.count()
	}

	/// How many subscriptions there are, across all sources.
	#[must_use]
	pub fn len(&self) -> usize {
		self.registry().subscriptions.len()
	}

	/// Whether there are no subscriptions at all.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
