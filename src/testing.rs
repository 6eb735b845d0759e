//! In-memory stand-ins for the browser, used by the unit tests.

use crate::{
	connection::{Connector, Scheduler},
	update::{cache_bust, Clock, PageReloader, ScriptAssetReloader, StyleAssetRefresher},
	Error, Result,
};
use core::time::Duration;

#[derive(Debug, Default)]
pub struct MockPage {
	pub stylesheets: Vec<String>,
	pub scripts: Vec<String>,
	pub reloads: usize,
	pub now: u64,
	pub fail_styles: bool,
	pub fail_scripts: bool,
}

impl MockPage {
	pub fn new(stylesheets: &[&str], scripts: &[&str]) -> Self {
		Self {
			stylesheets: stylesheets.iter().copied().map(str::to_owned).collect(),
			scripts: scripts.iter().copied().map(str::to_owned).collect(),
			..Self::default()
		}
	}

	pub fn at(self, now: u64) -> Self {
		Self { now, ..self }
	}
}

impl StyleAssetRefresher for MockPage {
	fn refresh_stylesheets(&mut self, timestamp: u64) -> Result<usize> {
		if self.fail_styles {
			return Err(Error::Dom("querySelectorAll threw".to_owned()));
		}
		for href in &mut self.stylesheets {
			*href = cache_bust(href, timestamp)?;
		}
		Ok(self.stylesheets.len())
	}
}

impl ScriptAssetReloader for MockPage {
	fn reload_module_scripts(&mut self, timestamp: u64) -> Result<usize> {
		if self.fail_scripts {
			return Err(Error::Dom("appendChild refused".to_owned()));
		}
		for src in &mut self.scripts {
			*src = cache_bust(src, timestamp)?;
		}
		Ok(self.scripts.len())
	}
}

impl PageReloader for MockPage {
	fn reload_page(&mut self) -> Result<()> {
		self.reloads += 1;
		Ok(())
	}
}

impl Clock for MockPage {
	fn now_millis(&self) -> u64 {
		self.now
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockSocket(pub usize);

#[derive(Debug, Default)]
pub struct MockConnector {
	pub opened: Vec<String>,
	pub fail: bool,
}

impl Connector for MockConnector {
	type Socket = MockSocket;

	fn open(&mut self, url: &str) -> Result<MockSocket> {
		if self.fail {
			return Err(Error::Transport("SyntaxError".to_owned()));
		}
		self.opened.push(url.to_owned());
		Ok(MockSocket(self.opened.len()))
	}
}

#[derive(Debug, Default)]
pub struct MockScheduler {
	pub pending: Vec<usize>,
	pub scheduled: Vec<Duration>,
	pub cancelled: Vec<usize>,
	pub fail: bool,
}

impl MockScheduler {
	/// Pretends the oldest pending timer fired.
	pub fn fire(&mut self) -> Option<usize> {
		if self.pending.is_empty() {
			None
		} else {
			Some(self.pending.remove(0))
		}
	}
}

impl Scheduler for MockScheduler {
	type Handle = usize;

	fn schedule(&mut self, delay: Duration) -> Result<usize> {
		if self.fail {
			return Err(Error::Timer("setTimeout threw".to_owned()));
		}
		self.scheduled.push(delay);
		let handle = self.scheduled.len();
		self.pending.push(handle);
		Ok(handle)
	}

	fn cancel(&mut self, handle: usize) {
		self.pending.retain(|pending| *pending != handle);
		self.cancelled.push(handle);
	}
}
