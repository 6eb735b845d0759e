//! The connection lifecycle: connect, dispatch frames, and recover from transport loss.
//!
//! [`ConnectionManager`] is a plain state machine.
//! The browser glue in [`web`](`crate::web`) feeds it [`TransportEvent`]s and timer callbacks, one at a time,
//! and it reaches back out only through the [`Connector`] and [`Scheduler`] seams.

use crate::{
	message::Message,
	router::MessageRouter,
	update::Page,
	Error, Result,
};
use core::time::Duration;
use tracing::{debug, error, info, instrument, trace, trace_span, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
	Disconnected,
	Connecting,
	Connected,
	ReconnectPending,
}

/// Something that happened on the current transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
	Open,
	/// One text frame, not yet decoded.
	Message(String),
	Close { code: u16, reason: String },
	Error(String),
}

/// Opens transports to the dev server.
pub trait Connector {
	type Socket;

	/// Starts opening a transport to `url`.
	///
	/// The result is only a handle; success or failure of the connection itself arrives later as [`TransportEvent`]s.
	///
	/// # Errors
	///
	/// Iff no transport could be created at all, for example because `url` is invalid.
	fn open(&mut self, url: &str) -> Result<Self::Socket>;
}

/// One-shot timers that call back into [`ConnectionManager::on_reconnect_timer`].
pub trait Scheduler {
	type Handle;

	/// # Errors
	///
	/// Iff the timer couldn't be registered.
	fn schedule(&mut self, delay: Duration) -> Result<Self::Handle>;

	fn cancel(&mut self, handle: Self::Handle);
}

/// Builds the HMR endpoint URL on the host of `page_url`, the page's `location.href`.
///
/// Secure pages get `wss:`, everything else `ws:`. Query and fragment are dropped.
///
/// # Errors
///
/// Iff `page_url` isn't absolute or has no host to connect to, as for `file:` pages.
pub fn endpoint_url(page_url: &str, path: &str) -> Result<String> {
	let mut url = Url::parse(page_url)?;
	let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
	let has_host = url.host_str().map_or(false, |host| !host.is_empty());
	if !has_host || url.set_scheme(scheme).is_err() {
		return Err(Error::Transport(format!("no WebSocket endpoint for {}", page_url)));
	}
	url.set_path(path);
	url.set_query(None);
	url.set_fragment(None);
	Ok(url.into())
}

/// Owns the transport, the connection state and the reconnect timer.
///
/// At most one reconnect timer is pending at any time.
pub struct ConnectionManager<C: Connector, S: Scheduler, P> {
	url: String,
	reconnect_delay: Duration,
	connector: C,
	scheduler: S,
	socket: Option<C::Socket>,
	state: ConnectionState,
	reconnect_timer: Option<S::Handle>,
	recovering: bool,
	router: MessageRouter<P>,
}

impl<C: Connector, S: Scheduler, P: Page> ConnectionManager<C, S, P> {
	/// Creates a disconnected manager. Call [`connect`](`ConnectionManager::connect`) to start.
	#[must_use]
	pub fn new(url: String, reconnect_delay: Duration, connector: C, scheduler: S, router: MessageRouter<P>) -> Self {
		Self {
			url,
			reconnect_delay,
			connector,
			scheduler,
			socket: None,
			state: ConnectionState::Disconnected,
			reconnect_timer: None,
			recovering: false,
			router,
		}
	}

	#[must_use]
	pub fn url(&self) -> &str {
		&self.url
	}

	#[must_use]
	pub fn state(&self) -> ConnectionState {
		self.state
	}

	#[must_use]
	pub fn socket(&self) -> Option<&C::Socket> {
		self.socket.as_ref()
	}

	#[must_use]
	pub fn reconnect_pending(&self) -> bool {
		self.reconnect_timer.is_some()
	}

	#[must_use]
	pub fn handshake_complete(&self) -> bool {
		self.router.handshake_complete()
	}

	#[must_use]
	pub fn router(&self) -> &MessageRouter<P> {
		&self.router
	}

	#[cfg(test)]
	pub(crate) fn connector_mut(&mut self) -> &mut C {
		&mut self.connector
	}

	#[cfg(test)]
	pub(crate) fn connector(&self) -> &C {
		&self.connector
	}

	#[cfg(test)]
	pub(crate) fn scheduler_mut(&mut self) -> &mut S {
		&mut self.scheduler
	}

	/// Opens a new transport, replacing the current one.
	///
	/// Must not be called while a connection is open or opening unless replacing it is intended.
	#[instrument(skip(self), fields(url = %self.url))]
	pub fn connect(&mut self) {
		self.state = ConnectionState::Connecting;
		match self.connector.open(&self.url) {
			Ok(socket) => {
				debug!("Opening transport.");
				self.socket = Some(socket);
			}
			Err(error) => {
				error!("{}", error);
				self.socket = None;
				self.schedule_reconnect();
			}
		}
	}

	/// Host-driven recovery. Equivalent to [`connect`](`ConnectionManager::connect`).
	pub fn reconnect(&mut self) {
		info!("Manual reconnect.");
		self.connect();
	}

	pub fn handle_event(&mut self, event: TransportEvent) {
		let span = trace_span!("handle_event", state = ?self.state);
		let _enter = span.enter();

		match event {
			TransportEvent::Open => self.on_open(),
			TransportEvent::Message(text) => self.on_frame(&text),
			TransportEvent::Close { code, reason } => self.on_close(code, &reason),
			// The close event that follows takes care of recovery.
			TransportEvent::Error(description) => warn!("Transport error: {}", description),
		}
	}

	/// Called when the timer from the last reconnect scheduling fires.
	#[instrument(skip(self))]
	pub fn on_reconnect_timer(&mut self) {
		// Cleared first so that a failing `connect` can schedule the next attempt.
		if self.reconnect_timer.take().is_none() {
			warn!("Reconnect timer fired without being pending; Ignoring it.");
			return;
		}
		info!("Reconnecting.");
		self.connect();
	}

	fn on_open(&mut self) {
		self.state = ConnectionState::Connected;
		if let Some(timer) = self.reconnect_timer.take() {
			self.scheduler.cancel(timer);
		}
		if self.recovering {
			info!("Connection recovered.");
		} else {
			info!("Connected.");
		}
		self.recovering = false;
	}

	fn on_frame(&mut self, text: &str) {
		let message = match Message::decode(text) {
			Ok(message) => message,
			Err(error) => {
				if cfg!(feature = "dangerous-logging") {
					warn!("Dropping frame {:?}: {}", text, error);
				} else {
					warn!("Dropping frame: {}", error);
				}
				return;
			}
		};
		trace!(kind = message.kind(), "Received.");
		let routed = self.router.route(message);
		debug!(?routed, "Routed.");
	}

	fn on_close(&mut self, code: u16, reason: &str) {
		if self.reconnect_timer.is_some() {
			trace!(code, reason, "Transport closed while a reconnect is already pending.");
			return;
		}
		warn!(code, reason, "Transport closed.");
		self.schedule_reconnect();
	}

	fn schedule_reconnect(&mut self) {
		if self.reconnect_timer.is_some() {
			// The pending timer still governs recovery.
			self.state = ConnectionState::ReconnectPending;
			return;
		}
		match self.scheduler.schedule(self.reconnect_delay) {
			Ok(timer) => {
				info!("Reconnecting in {:?}.", self.reconnect_delay);
				self.reconnect_timer = Some(timer);
				self.state = ConnectionState::ReconnectPending;
				self.recovering = true;
			}
			Err(error) => {
				error!("{}", error);
				self.state = ConnectionState::Disconnected;
			}
		}
	}
}
