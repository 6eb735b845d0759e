use thiserror::Error;
use wasm_bindgen::JsValue;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Everything that can go wrong inside the client.
///
/// None of these are fatal to the host page.
/// The connection state machine logs them and carries on, and a failed script re-injection escalates to a full reload.
#[derive(Debug, Error)]
pub enum Error {
	#[error("malformed frame: {0}")]
	Decode(#[from] serde_json::Error),

	#[error("invalid URL: {0}")]
	Url(#[from] url::ParseError),

	#[error("could not open transport: {0}")]
	Transport(String),

	#[error("could not schedule reconnect: {0}")]
	Timer(String),

	#[error("DOM operation failed: {0}")]
	Dom(String),

	#[error("invalid configuration: {0}")]
	Config(String),

	#[error("`{0}` is not available in this context")]
	Unavailable(&'static str),
}

impl Error {
	/// Wraps a thrown browser exception as [`Error::Dom`].
	pub(crate) fn dom(thrown: &JsValue) -> Self {
		Self::Dom(describe(thrown))
	}
}

/// Renders a thrown [`JsValue`] for log output.
pub(crate) fn describe(thrown: &JsValue) -> String {
	thrown.as_string().unwrap_or_else(|| format!("{:?}", thrown))
}

impl From<Error> for JsValue {
	fn from(error: Error) -> Self {
		JsValue::from_str(&error.to_string())
	}
}
