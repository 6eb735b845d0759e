//! Browser wiring: a [`WebSocket`] transport, `setTimeout` reconnect timers and the diagnostics handle.

use crate::{
	config::ClientConfig,
	connection::{endpoint_url, ConnectionManager, Connector, Scheduler, TransportEvent},
	dom::DomPage,
	error::{describe, Error},
	router::MessageRouter,
	update::UpdateApplier,
	Result,
};
use core::{convert::TryFrom, time::Duration};
use std::{
	cell::RefCell,
	rc::{Rc, Weak},
};
use tracing::{error, info, trace, warn};
use wasm_bindgen::{closure::Closure, prelude::wasm_bindgen, JsCast, JsValue};
use web_sys::{BinaryType, CloseEvent, Event, MessageEvent, WebSocket, Window};

type WebClient = ConnectionManager<WebConnector, WebScheduler, DomPage>;

thread_local! {
	static CLIENT: RefCell<Option<Rc<RefCell<WebClient>>>> = RefCell::new(None);
}

/// Runs `f` on the client unless it is gone or already borrowed further up the stack.
fn with_client(client: &Weak<RefCell<WebClient>>, f: impl FnOnce(&mut WebClient)) {
	let client = match client.upgrade() {
		Some(client) => client,
		None => {
			trace!("Client dropped; Ignoring callback.");
			return;
		}
	};
	let mut guard = match client.try_borrow_mut() {
		Ok(guard) => guard,
		Err(_) => {
			error!("Re-entrant callback into the HMR client; Dropping it.");
			return;
		}
	};
	f(&mut guard);
}

/// An open or opening [`WebSocket`] with its event handlers attached.
///
/// Dropping it detaches the handlers and closes the socket, so a replaced transport can't report events anymore.
pub struct WebSocketTransport {
	socket: WebSocket,
	_on_open: Closure<dyn FnMut(Event)>,
	_on_message: Closure<dyn FnMut(MessageEvent)>,
	_on_close: Closure<dyn FnMut(CloseEvent)>,
	_on_error: Closure<dyn FnMut(Event)>,
}

impl WebSocketTransport {
	#[must_use]
	pub fn socket(&self) -> &WebSocket {
		&self.socket
	}
}

impl Drop for WebSocketTransport {
	fn drop(&mut self) {
		self.socket.set_onopen(None);
		self.socket.set_onmessage(None);
		self.socket.set_onclose(None);
		self.socket.set_onerror(None);
		let ready_state = self.socket.ready_state();
		if ready_state == WebSocket::CONNECTING || ready_state == WebSocket::OPEN {
			if let Err(thrown) = self.socket.close() {
				warn!("Could not close replaced socket: {}", describe(&thrown));
			}
		}
	}
}

pub struct WebConnector {
	client: Weak<RefCell<WebClient>>,
}

impl Connector for WebConnector {
	type Socket = WebSocketTransport;

	fn open(&mut self, url: &str) -> Result<WebSocketTransport> {
		let socket = WebSocket::new(url).map_err(|thrown| Error::Transport(describe(&thrown)))?;
		socket.set_binary_type(BinaryType::Arraybuffer);

		let client = self.client.clone();
		let on_open = Closure::wrap(Box::new(move |_: Event| with_client(&client, |client| client.handle_event(TransportEvent::Open))) as Box<dyn FnMut(Event)>);

		let client = self.client.clone();
		let on_message = Closure::wrap(Box::new(move |event: MessageEvent| match event.data().as_string() {
			Some(text) => with_client(&client, |client| client.handle_event(TransportEvent::Message(text))),
			None => warn!("Ignoring binary frame."),
		}) as Box<dyn FnMut(MessageEvent)>);

		let client = self.client.clone();
		let on_close = Closure::wrap(Box::new(move |event: CloseEvent| {
			let event = TransportEvent::Close {
				code: event.code(),
				reason: event.reason(),
			};
			with_client(&client, |client| client.handle_event(event));
		}) as Box<dyn FnMut(CloseEvent)>);

		let client = self.client.clone();
		let on_error = Closure::wrap(Box::new(move |event: Event| {
			let event = TransportEvent::Error(format!("`{}` event", event.type_()));
			with_client(&client, |client| client.handle_event(event));
		}) as Box<dyn FnMut(Event)>);

		socket.set_onopen(Some(on_open.as_ref().unchecked_ref()));
		socket.set_onmessage(Some(on_message.as_ref().unchecked_ref()));
		socket.set_onclose(Some(on_close.as_ref().unchecked_ref()));
		socket.set_onerror(Some(on_error.as_ref().unchecked_ref()));

		Ok(WebSocketTransport {
			socket,
			_on_open: on_open,
			_on_message: on_message,
			_on_close: on_close,
			_on_error: on_error,
		})
	}
}

pub struct WebScheduler {
	window: Window,
	client: Weak<RefCell<WebClient>>,
}

impl Scheduler for WebScheduler {
	type Handle = i32;

	fn schedule(&mut self, delay: Duration) -> Result<i32> {
		let client = self.client.clone();
		// Freed when called. A cancelled timer leaks its closure, which only holds a `Weak`.
		let callback = Closure::once_into_js(move || with_client(&client, WebClient::on_reconnect_timer));
		let timeout = i32::try_from(delay.as_millis()).unwrap_or(i32::MAX);
		self.window
			.set_timeout_with_callback_and_timeout_and_arguments_0(callback.unchecked_ref(), timeout)
			.map_err(|thrown| Error::Timer(describe(&thrown)))
	}

	fn cancel(&mut self, handle: i32) {
		self.window.clear_timeout_with_handle(handle);
	}
}

/// Diagnostics handle for the host page: `{ socket, reconnect() }`.
#[wasm_bindgen]
pub struct HmrHandle {
	client: Rc<RefCell<WebClient>>,
}

#[wasm_bindgen]
impl HmrHandle {
	/// The current transport, if one was created.
	#[wasm_bindgen(getter)]
	#[must_use]
	pub fn socket(&self) -> Option<WebSocket> {
		match self.client.try_borrow() {
			Ok(client) => client.socket().map(|transport| transport.socket().clone()),
			Err(_) => None,
		}
	}

	/// Opens a new connection right away, replacing the current one.
	pub fn reconnect(&self) {
		with_client(&Rc::downgrade(&self.client), WebClient::reconnect);
	}
}

fn init_logging() {
	#[cfg(feature = "console_error_panic_hook")]
	console_error_panic_hook::set_once();

	#[cfg(feature = "tracing-wasm")]
	{
		if tracing_wasm::try_set_as_global_default().is_err() {
			trace!("A global tracing subscriber is already set.");
		}
	}
}

/// Starts the client (once per page) and returns its diagnostics handle.
///
/// `config` may be `undefined`, `null` or a partial [`ClientConfig`] object, for example `{ reconnectDelayMs: 500 }`.
/// If the client is already running, the running instance's handle is returned and `config` is ignored.
///
/// # Errors
///
/// Iff `config` is malformed, the page lacks `window`, `document` or `location`,
/// or the page's URL has no host to connect to.
#[wasm_bindgen]
pub fn start(config: JsValue) -> core::result::Result<HmrHandle, JsValue> {
	let config = if config.is_undefined() || config.is_null() {
		ClientConfig::default()
	} else {
		serde_wasm_bindgen::from_value(config).map_err(|error| Error::Config(error.to_string()))?
	};
	Ok(start_with(&config)?)
}

/// [`start`], with an already deserialized configuration.
///
/// # Errors
///
/// Iff the page lacks `window`, `document` or `location`, the page's URL has no host to connect to,
/// or the handle couldn't be installed.
pub fn start_with(config: &ClientConfig) -> Result<HmrHandle> {
	init_logging();

	if let Some(client) = CLIENT.with(|running| running.borrow().clone()) {
		warn!("HMR client already running.");
		return Ok(HmrHandle { client });
	}

	let window = web_sys::window().ok_or(Error::Unavailable("window"))?;
	let page_url = window.location().href().map_err(|thrown| Error::dom(&thrown))?;
	let url = endpoint_url(&page_url, &config.endpoint_path)?;
	let page = DomPage::from_window(&window, config.client_marker())?;
	let reconnect_delay = config.reconnect_delay();

	let client = Rc::new_cyclic(|weak: &Weak<RefCell<WebClient>>| {
		RefCell::new(ConnectionManager::new(
			url,
			reconnect_delay,
			WebConnector { client: weak.clone() },
			WebScheduler {
				window: window.clone(),
				client: weak.clone(),
			},
			MessageRouter::new(UpdateApplier::new(page)),
		))
	});

	if let Some(name) = &config.debug_handle {
		let handle = HmrHandle { client: Rc::clone(&client) };
		js_sys::Reflect::set(&window, &JsValue::from_str(name), &handle.into()).map_err(|thrown| Error::dom(&thrown))?;
	}
	CLIENT.with(|running| *running.borrow_mut() = Some(Rc::clone(&client)));

	info!("Starting HMR client for {}.", client.borrow().url());
	client.borrow_mut().connect();
	Ok(HmrHandle { client })
}

/// Connects with the default configuration as soon as the module is instantiated.
#[cfg(feature = "autostart")]
#[wasm_bindgen(start)]
pub fn autostart() {
	if let Err(error) = start_with(&ClientConfig::default()) {
		error!("HMR client failed to start: {}", error);
	}
}
