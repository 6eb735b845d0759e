use core::time::Duration;
use serde::Deserialize;

/// Client settings.
///
/// Deserialized from the optional object passed to [`start`](`crate::web::start`); every field may be omitted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct ClientConfig {
	/// Path of the dev server's HMR endpoint on the page's own host.
	pub endpoint_path: String,
	/// Delay before a lost connection is retried.
	pub reconnect_delay_ms: u32,
	/// Property of `window` the diagnostics handle is installed as. [`None`] skips installation.
	pub debug_handle: Option<String>,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			endpoint_path: "/__hmr".to_owned(),
			reconnect_delay_ms: 1000,
			debug_handle: Some("__hmr".to_owned()),
		}
	}
}

impl ClientConfig {
	#[must_use]
	pub fn reconnect_delay(&self) -> Duration {
		Duration::from_millis(self.reconnect_delay_ms.into())
	}

	/// The path segment that identifies the client's own script URLs.
	#[must_use]
	pub fn client_marker(&self) -> &str {
		self.endpoint_path.trim_start_matches('/')
	}
}
