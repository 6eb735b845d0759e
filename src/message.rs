//! Frames sent by the dev server.
//!
//! Each frame is one UTF-8 JSON object tagged by its `"type"` field:
//!
//! ```json
//! { "type": "connected" }
//! { "type": "update", "updates": [{ "path": "/src/App.tsx", "timestamp": 1700000000000 }] }
//! { "type": "full-reload" }
//! ```
//!
//! Any other `"type"` decodes to [`Message::Unknown`] so that newer servers can't crash older clients.

use crate::Result;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
	/// Sent once per connection, right after the server accepts the socket.
	Connected,
	/// A batch of changed assets.
	Update { changes: Vec<FileChange> },
	/// The server asks for an unconditional reload.
	FullReload,
	/// A kind this client doesn't know about.
	Unknown { kind: String },
}

/// The server's declaration that the asset at `path` changed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileChange {
	pub path: String,
	/// When the server noticed the change, in milliseconds since the Unix epoch.
	#[serde(default)]
	pub timestamp: Option<u64>,
}

impl FileChange {
	#[must_use]
	pub fn new(path: impl Into<String>) -> Self {
		Self {
			path: path.into(),
			timestamp: None,
		}
	}
}

#[derive(Deserialize)]
struct Envelope {
	#[serde(rename = "type")]
	kind: String,
	#[serde(flatten)]
	payload: serde_json::Map<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct UpdatePayload {
	updates: Vec<FileChange>,
}

impl Message {
	/// Decodes one text frame.
	///
	/// # Errors
	///
	/// Iff `text` isn't a JSON object with a string `"type"`,
	/// or if it is an `"update"` frame without a well-formed `"updates"` array.
	pub fn decode(text: &str) -> Result<Self> {
		let Envelope { kind, payload } = serde_json::from_str(text)?;
		Ok(match kind.as_str() {
			"connected" => Self::Connected,
			"update" => {
				let UpdatePayload { updates } = serde_json::from_value(serde_json::Value::Object(payload))?;
				Self::Update { changes: updates }
			}
			"full-reload" => Self::FullReload,
			_ => Self::Unknown { kind },
		})
	}

	/// The wire name of this message's kind.
	#[must_use]
	pub fn kind(&self) -> &str {
		match self {
			Self::Connected => "connected",
			Self::Update { .. } => "update",
			Self::FullReload => "full-reload",
			Self::Unknown { kind } => kind,
		}
	}
}
