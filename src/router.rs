use crate::{
	message::Message,
	update::{Page, UpdateApplier, UpdateReport},
};
use tracing::{info, instrument, warn};

/// How a message was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
	/// The first `connected` since page load.
	Ready,
	/// A later `connected`: the server process restarted and the page was reloaded.
	ServerRestarted,
	Updated(UpdateReport),
	Reloaded,
	Ignored,
}

/// Dispatches decoded messages and remembers whether the initial handshake happened.
#[derive(Debug)]
pub struct MessageRouter<P> {
	first_connection: bool,
	applier: UpdateApplier<P>,
}

impl<P: Page> MessageRouter<P> {
	#[must_use]
	pub fn new(applier: UpdateApplier<P>) -> Self {
		Self {
			first_connection: true,
			applier,
		}
	}

	/// Whether a `connected` message has been seen since page load.
	#[must_use]
	pub fn handshake_complete(&self) -> bool {
		!self.first_connection
	}

	#[must_use]
	pub fn applier(&self) -> &UpdateApplier<P> {
		&self.applier
	}

	pub fn applier_mut(&mut self) -> &mut UpdateApplier<P> {
		&mut self.applier
	}

	#[instrument(skip(self, message), fields(kind = message.kind()))]
	pub fn route(&mut self, message: Message) -> Routed {
		match message {
			Message::Connected if self.first_connection => {
				self.first_connection = false;
				info!("HMR ready.");
				Routed::Ready
			}
			Message::Connected => {
				// The server's module graph may have nothing in common with what this page was built from.
				warn!("Dev server restarted; The page is stale.");
				self.applier.reload_page();
				Routed::ServerRestarted
			}
			Message::Update { changes } => Routed::Updated(self.applier.apply(&changes)),
			Message::FullReload => {
				info!("Full reload requested by the dev server.");
				self.applier.reload_page();
				Routed::Reloaded
			}
			Message::Unknown { kind } => {
				warn!("Ignoring unknown message kind {:?}.", kind);
				Routed::Ignored
			}
		}
	}
}
