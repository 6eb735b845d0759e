//! The live document behind the [`update`](`crate::update`) capability traits.

use crate::{
	error::{describe, Error},
	update::{cache_bust, Clock, PageReloader, ScriptAssetReloader, StyleAssetRefresher},
	Result,
};
use tracing::{instrument, trace, warn};
use wasm_bindgen::JsCast;
use web_sys::{Document, Element, HtmlLinkElement, HtmlScriptElement, Location, Node, NodeList, Window};

/// A browser page, reached through `document` and `location`.
#[derive(Debug, Clone)]
pub struct DomPage {
	document: Document,
	location: Location,
	client_marker: String,
	root: Option<Element>,
}

/// A module script taken out of the page, with what its replacement needs.
struct Detached {
	parent: Option<Node>,
	src: String,
	nonce: String,
	cross_origin: Option<String>,
}

impl DomPage {
	/// `client_marker` identifies the client's own module scripts: any whose `src` contains it is never re-injected.
	#[must_use]
	pub fn new(document: Document, location: Location, client_marker: impl Into<String>) -> Self {
		Self {
			document,
			location,
			client_marker: client_marker.into(),
			root: None,
		}
	}

	/// Limits stylesheet and script lookups to the descendants of `root` instead of the whole document.
	#[must_use]
	pub fn within(self, root: Element) -> Self {
		Self { root: Some(root), ..self }
	}

	/// # Errors
	///
	/// Iff `window` has no `document`.
	pub fn from_window(window: &Window, client_marker: impl Into<String>) -> Result<Self> {
		let document = window.document().ok_or(Error::Unavailable("document"))?;
		Ok(Self::new(document, window.location(), client_marker))
	}

	fn select<T: JsCast>(&self, selector: &str) -> Result<Vec<T>> {
		let nodes: NodeList = match &self.root {
			Some(root) => root.query_selector_all(selector),
			None => self.document.query_selector_all(selector),
		}
		.map_err(|thrown| Error::dom(&thrown))?;
		Ok((0..nodes.length())
			.filter_map(|i| nodes.item(i))
			.filter_map(|node| node.dyn_into::<T>().ok())
			.collect())
	}

	fn module_scripts(&self) -> Result<Vec<HtmlScriptElement>> {
		Ok(self
			.select::<HtmlScriptElement>(r#"script[type="module"][src]"#)?
			.into_iter()
			.filter(|script| !script.src().contains(self.client_marker.as_str()))
			.collect())
	}

	fn fallback_parent(&self) -> Result<Node> {
		match self.document.head() {
			Some(head) => Ok(head.into()),
			None => Err(Error::Unavailable("document.head")),
		}
	}
}

impl StyleAssetRefresher for DomPage {
	#[instrument(skip(self))]
	fn refresh_stylesheets(&mut self, timestamp: u64) -> Result<usize> {
		let links = self.select::<HtmlLinkElement>(r#"link[rel="stylesheet"]"#)?;
		let mut count = 0;
		for link in links {
			let href = link.href();
			if href.is_empty() {
				continue;
			}
			let busted = match cache_bust(&href, timestamp) {
				Ok(busted) => busted,
				Err(error) => {
					warn!("Leaving stylesheet {:?} alone: {}", href, error);
					continue;
				}
			};
			trace!("{} -> {}", href, busted);
			link.set_href(&busted);
			count += 1;
		}
		Ok(count)
	}
}

impl ScriptAssetReloader for DomPage {
	#[instrument(skip(self))]
	fn reload_module_scripts(&mut self, timestamp: u64) -> Result<usize> {
		let detached: Vec<Detached> = self
			.module_scripts()?
			.into_iter()
			.filter_map(|script| {
				let src = match cache_bust(&script.src(), timestamp) {
					Ok(src) => src,
					Err(error) => {
						warn!("Leaving module script {:?} alone: {}", script.src(), error);
						return None;
					}
				};
				// `integrity` isn't carried over: it hashes the content that just changed.
				let detached = Detached {
					parent: script.parent_node(),
					src,
					nonce: script.nonce(),
					cross_origin: script.cross_origin(),
				};
				script.remove();
				Some(detached)
			})
			.collect();

		for detached in &detached {
			let fresh: HtmlScriptElement = self
				.document
				.create_element("script")
				.map_err(|thrown| Error::dom(&thrown))?
				.dyn_into()
				.map_err(|element| Error::Dom(format!("Expected `HtmlScriptElement` but created {}", describe(element.as_ref()))))?;
			fresh.set_type("module");
			if !detached.nonce.is_empty() {
				fresh.set_nonce(&detached.nonce);
			}
			fresh.set_cross_origin(detached.cross_origin.as_deref());
			fresh.set_src(&detached.src);
			trace!("Re-injecting {}", detached.src);

			let parent = match &detached.parent {
				Some(parent) => parent.clone(),
				None => self.fallback_parent()?,
			};
			parent.append_child(&fresh).map_err(|thrown| Error::dom(&thrown))?;
		}

		Ok(detached.len())
	}
}

impl PageReloader for DomPage {
	fn reload_page(&mut self) -> Result<()> {
		self.location.reload().map_err(|thrown| Error::dom(&thrown))
	}
}

impl Clock for DomPage {
	#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
	fn now_millis(&self) -> u64 {
		js_sys::Date::now() as u64
	}
}
