//! Applying a batch of [`FileChange`]s to the page.
//!
//! The page itself is only reached through the capability traits in this module,
//! so the policy can run against something other than a live document.

use crate::{message::FileChange, Result};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

/// What an asset path means for the running page, judged by its extension alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
	Style,
	Script,
	Markup,
	Unknown,
}

const STYLE_EXTENSIONS: &[&str] = &["css", "scss", "sass", "less"];
const SCRIPT_EXTENSIONS: &[&str] = &["js", "mjs", "cjs", "jsx", "ts", "mts", "cts", "tsx"];
const MARKUP_EXTENSIONS: &[&str] = &["html", "htm"];

impl AssetKind {
	#[must_use]
	pub fn of(path: &str) -> Self {
		let path = path.split(|c: char| c == '?' || c == '#').next().unwrap_or(path);
		let file_name = path.rsplit('/').next().unwrap_or(path);
		let extension = match file_name.rfind('.') {
			Some(dot) if dot + 1 < file_name.len() => file_name[dot + 1..].to_ascii_lowercase(),
			_ => return Self::Unknown,
		};

		if STYLE_EXTENSIONS.contains(&extension.as_str()) {
			Self::Style
		} else if SCRIPT_EXTENSIONS.contains(&extension.as_str()) {
			Self::Script
		} else if MARKUP_EXTENSIONS.contains(&extension.as_str()) {
			Self::Markup
		} else {
			Self::Unknown
		}
	}
}

/// The remedies one batch calls for.
///
/// Both can be set at once: stylesheets are refreshed first, then scripts are re-injected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdatePlan {
	pub refresh_styles: bool,
	/// Set by script changes, markup changes and anything unrecognised.
	pub reload_scripts: bool,
}

impl UpdatePlan {
	#[must_use]
	pub fn for_batch(changes: &[FileChange]) -> Self {
		changes.iter().fold(Self::default(), |plan, change| match AssetKind::of(&change.path) {
			AssetKind::Style => Self { refresh_styles: true, ..plan },
			AssetKind::Script | AssetKind::Markup | AssetKind::Unknown => Self { reload_scripts: true, ..plan },
		})
	}

	#[must_use]
	pub fn is_empty(self) -> bool {
		!self.refresh_styles && !self.reload_scripts
	}
}

/// Rewrites the absolute `url` so that its `t` query parameter is `timestamp`.
///
/// An existing `t` parameter is replaced rather than repeated. Other parameters and the fragment are kept.
///
/// # Errors
///
/// Iff `url` isn't an absolute URL.
pub fn cache_bust(url: &str, timestamp: u64) -> Result<String> {
	let mut url = Url::parse(url)?;
	let kept: Vec<(String, String)> = url
		.query_pairs()
		.filter(|(key, _)| key != "t")
		.map(|(key, value)| (key.into_owned(), value.into_owned()))
		.collect();
	url.query_pairs_mut()
		.clear()
		.extend_pairs(&kept)
		.append_pair("t", &timestamp.to_string());
	Ok(url.into())
}

/// Refetches linked stylesheets in place.
pub trait StyleAssetRefresher {
	/// Cache-busts every `<link rel="stylesheet">` with `timestamp`.
	///
	/// Links whose `href` can't be rewritten are skipped.
	///
	/// Returns how many links were rewritten.
	///
	/// # Errors
	///
	/// Iff the page couldn't be queried or modified.
	fn refresh_stylesheets(&mut self, timestamp: u64) -> Result<usize>;
}

/// Re-executes top-level module scripts.
pub trait ScriptAssetReloader {
	/// Replaces each module script (except the client's own) with a fresh element whose `src` is cache-busted with `timestamp`.
	///
	/// Returns how many scripts were re-injected. `0` means there was nothing to re-run.
	///
	/// # Errors
	///
	/// Iff the page couldn't be queried or modified.
	fn reload_module_scripts(&mut self, timestamp: u64) -> Result<usize>;
}

/// Navigates the page to itself.
pub trait PageReloader {
	/// # Errors
	///
	/// Iff the reload couldn't be requested.
	fn reload_page(&mut self) -> Result<()>;
}

/// Source of cache-busting timestamps.
pub trait Clock {
	/// Milliseconds since the Unix epoch.
	fn now_millis(&self) -> u64;
}

/// Everything [`UpdateApplier`] needs from the page.
pub trait Page: StyleAssetRefresher + ScriptAssetReloader + PageReloader + Clock {}
impl<P: StyleAssetRefresher + ScriptAssetReloader + PageReloader + Clock> Page for P {}

/// What applying one batch did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateReport {
	pub stylesheets_refreshed: usize,
	pub scripts_reloaded: usize,
	pub full_reload: bool,
}

/// Chooses and executes the least disruptive remedy for a batch.
#[derive(Debug)]
pub struct UpdateApplier<P> {
	page: P,
}

impl<P: Page> UpdateApplier<P> {
	#[must_use]
	pub fn new(page: P) -> Self {
		Self { page }
	}

	#[must_use]
	pub fn page(&self) -> &P {
		&self.page
	}

	pub fn page_mut(&mut self) -> &mut P {
		&mut self.page
	}

	/// Applies one batch completely before returning.
	///
	/// Style changes refresh *all* linked stylesheets, not just ones whose URL matches a changed path.
	/// Script, markup and unrecognised changes re-inject module scripts, or reload the page if there are none.
	/// A failed stylesheet refresh is logged and doesn't escalate. A failed script re-injection ends in a full reload.
	#[instrument(skip(self, changes), fields(changes = changes.len()))]
	pub fn apply(&mut self, changes: &[FileChange]) -> UpdateReport {
		let plan = UpdatePlan::for_batch(changes);
		let mut report = UpdateReport::default();
		if plan.is_empty() {
			debug!("Nothing to apply.");
			return report;
		}

		for change in changes {
			debug!(path = %change.path, kind = ?AssetKind::of(&change.path), server_timestamp = ?change.timestamp, "Changed");
		}

		let timestamp = self.page.now_millis();

		if plan.refresh_styles {
			match self.page.refresh_stylesheets(timestamp) {
				Ok(count) => {
					info!("Refreshed {} stylesheet(s).", count);
					report.stylesheets_refreshed = count;
				}
				Err(error) => error!("Could not refresh stylesheets: {}", error),
			}
		}

		if plan.reload_scripts {
			match self.page.reload_module_scripts(timestamp) {
				Ok(0) => {
					info!("No module scripts to re-run; Falling back to a full reload.");
					report.full_reload = self.reload_page();
				}
				Ok(count) => {
					info!("Re-injected {} module script(s).", count);
					report.scripts_reloaded = count;
				}
				Err(error) => {
					error!("Could not re-inject module scripts: {}", error);
					report.full_reload = self.reload_page();
				}
			}
		}

		report
	}

	/// Requests a full page reload.
	///
	/// Returns whether the request went through.
	pub fn reload_page(&mut self) -> bool {
		info!("Reloading the page.");
		match self.page.reload_page() {
			Ok(()) => true,
			Err(error) => {
				warn!("Could not reload the page: {}", error);
				false
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{testing::MockPage, Error};

	fn batch(paths: &[&str]) -> Vec<FileChange> {
		paths.iter().copied().map(FileChange::new).collect()
	}

	#[test]
	fn classification() {
		assert_eq!(AssetKind::of("/styles/app.css"), AssetKind::Style);
		assert_eq!(AssetKind::of("/styles/Theme.SCSS"), AssetKind::Style);
		assert_eq!(AssetKind::of("/src/App.tsx"), AssetKind::Script);
		assert_eq!(AssetKind::of("/src/main.js?import"), AssetKind::Script);
		assert_eq!(AssetKind::of("/index.html#top"), AssetKind::Markup);
		assert_eq!(AssetKind::of("/assets/logo.svg"), AssetKind::Unknown);
		assert_eq!(AssetKind::of("/Makefile"), AssetKind::Unknown);
		assert_eq!(AssetKind::of("/dir.css/file"), AssetKind::Unknown);
		assert_eq!(AssetKind::of("/trailing."), AssetKind::Unknown);
	}

	#[test]
	fn plan_is_taken_over_the_whole_batch() {
		assert_eq!(UpdatePlan::for_batch(&[]), UpdatePlan::default());
		assert_eq!(
			UpdatePlan::for_batch(&batch(&["/a.css", "/b.less"])),
			UpdatePlan {
				refresh_styles: true,
				reload_scripts: false
			}
		);
		assert_eq!(
			UpdatePlan::for_batch(&batch(&["/a.css", "/b.ts"])),
			UpdatePlan {
				refresh_styles: true,
				reload_scripts: true
			}
		);
		assert!(UpdatePlan::for_batch(&batch(&["/page.html"])).reload_scripts);
		assert!(UpdatePlan::for_batch(&batch(&["/data.json"])).reload_scripts);
	}

	#[test]
	fn cache_bust_appends() {
		assert_eq!(cache_bust("http://localhost:3000/app.css", 5).unwrap(), "http://localhost:3000/app.css?t=5");
		assert_eq!(cache_bust("http://localhost:3000/app.css?v=2", 5).unwrap(), "http://localhost:3000/app.css?v=2&t=5");
	}

	#[test]
	fn cache_bust_replaces_previous_timestamp() {
		assert_eq!(cache_bust("https://example.dev/main.js?t=1&v=2", 9).unwrap(), "https://example.dev/main.js?v=2&t=9");
		let once = cache_bust("https://example.dev/main.js", 1).unwrap();
		assert_eq!(cache_bust(&once, 2).unwrap(), "https://example.dev/main.js?t=2");
		assert_eq!(cache_bust("https://example.dev/main.js?t", 3).unwrap(), "https://example.dev/main.js?t=3");
		assert_eq!(cache_bust("https://example.dev/main.js?tab=1", 3).unwrap(), "https://example.dev/main.js?tab=1&t=3");
	}

	#[test]
	fn cache_bust_follows_form_urlencoded_rules() {
		// The key decodes to `t=`, which is not `t`.
		assert_eq!(cache_bust("http://localhost/a.css?t%3D=1", 9).unwrap(), "http://localhost/a.css?t%3D=1&t=9");
		// An encoded `t` key is still `t`.
		assert_eq!(cache_bust("http://localhost/a.css?%74=1&x=2", 9).unwrap(), "http://localhost/a.css?x=2&t=9");
		assert_eq!(cache_bust("http://localhost/a.css?x=1&&t=2", 9).unwrap(), "http://localhost/a.css?x=1&t=9");
	}

	#[test]
	fn cache_bust_keeps_fragment() {
		assert_eq!(cache_bust("http://localhost/doc.css#x", 4).unwrap(), "http://localhost/doc.css?t=4#x");
		assert_eq!(cache_bust("http://localhost/doc.css?t=1#x?y", 4).unwrap(), "http://localhost/doc.css?t=4#x?y");
	}

	#[test]
	fn cache_bust_needs_an_absolute_url() {
		assert!(matches!(cache_bust("/app.css", 1), Err(Error::Url(_))));
		assert!(cache_bust("", 1).is_err());
	}

	#[test]
	fn styles_only_refreshes_every_stylesheet_without_reloading() {
		let mut applier = UpdateApplier::new(
			MockPage::new(
				&["http://localhost:3000/styles/app.css", "http://localhost:3000/vendor/reset.css?t=1"],
				&["http://localhost:3000/src/main.js"],
			)
			.at(42),
		);

		let report = applier.apply(&batch(&["/styles/app.css"]));

		assert_eq!(
			report,
			UpdateReport {
				stylesheets_refreshed: 2,
				..UpdateReport::default()
			}
		);
		let page = applier.page();
		assert_eq!(
			page.stylesheets,
			["http://localhost:3000/styles/app.css?t=42", "http://localhost:3000/vendor/reset.css?t=42"]
		);
		assert_eq!(page.scripts, ["http://localhost:3000/src/main.js"]);
		assert_eq!(page.reloads, 0);
	}

	#[test]
	fn failed_stylesheet_refresh_does_not_reload() {
		let mut page = MockPage::new(&["http://localhost:3000/styles/app.css"], &["http://localhost:3000/src/main.js"]);
		page.fail_styles = true;
		let mut applier = UpdateApplier::new(page);

		let report = applier.apply(&batch(&["/styles/app.css"]));

		assert_eq!(report, UpdateReport::default());
		assert_eq!(applier.page().reloads, 0);
		assert_eq!(applier.page().scripts, ["http://localhost:3000/src/main.js"]);
	}

	#[test]
	fn failed_stylesheet_refresh_still_reinjects_scripts() {
		let mut page = MockPage::new(&["http://localhost:3000/a.css"], &["http://localhost:3000/main.js"]).at(8);
		page.fail_styles = true;
		let mut applier = UpdateApplier::new(page);

		let report = applier.apply(&batch(&["/a.css", "/main.ts"]));

		assert_eq!(
			report,
			UpdateReport {
				scripts_reloaded: 1,
				..UpdateReport::default()
			}
		);
		assert_eq!(applier.page().scripts, ["http://localhost:3000/main.js?t=8"]);
		assert_eq!(applier.page().reloads, 0);
	}

	#[test]
	fn script_change_reinjects_module_scripts() {
		let mut applier = UpdateApplier::new(
			MockPage::new(&[], &["http://localhost:3000/src/main.js", "http://localhost:3000/src/vendor.js"]).at(7),
		);

		let report = applier.apply(&batch(&["/src/App.tsx"]));

		assert_eq!(report.scripts_reloaded, 2);
		assert!(!report.full_reload);
		assert_eq!(
			applier.page().scripts,
			["http://localhost:3000/src/main.js?t=7", "http://localhost:3000/src/vendor.js?t=7"]
		);
		assert_eq!(applier.page().reloads, 0);
	}

	#[test]
	fn script_change_without_module_scripts_reloads() {
		let mut applier = UpdateApplier::new(MockPage::new(&["http://localhost:3000/a.css"], &[]));

		let report = applier.apply(&batch(&["/src/App.tsx"]));

		assert!(report.full_reload);
		assert_eq!(applier.page().reloads, 1);
	}

	#[test]
	fn markup_and_unknown_changes_escalate() {
		for path in ["/index.html", "/assets/logo.svg", "/LICENSE"].iter().copied() {
			let mut applier = UpdateApplier::new(MockPage::new(&[], &["http://localhost:3000/src/main.js"]));
			assert_eq!(applier.apply(&batch(&[path])).scripts_reloaded, 1, "{}", path);

			let mut applier = UpdateApplier::new(MockPage::new(&[], &[]));
			assert!(applier.apply(&batch(&[path])).full_reload, "{}", path);
		}
	}

	#[test]
	fn mixed_batch_does_both() {
		let mut applier =
			UpdateApplier::new(MockPage::new(&["http://localhost:3000/a.css"], &["http://localhost:3000/main.js"]).at(3));

		let report = applier.apply(&batch(&["/main.ts", "/a.css"]));

		assert_eq!(
			report,
			UpdateReport {
				stylesheets_refreshed: 1,
				scripts_reloaded: 1,
				full_reload: false
			}
		);
		assert_eq!(applier.page().stylesheets, ["http://localhost:3000/a.css?t=3"]);
		assert_eq!(applier.page().scripts, ["http://localhost:3000/main.js?t=3"]);
	}

	#[test]
	fn empty_batch_touches_nothing() {
		let mut applier =
			UpdateApplier::new(MockPage::new(&["http://localhost:3000/a.css"], &["http://localhost:3000/main.js"]));

		assert_eq!(applier.apply(&[]), UpdateReport::default());
		assert_eq!(applier.page().stylesheets, ["http://localhost:3000/a.css"]);
		assert_eq!(applier.page().reloads, 0);
	}

	#[test]
	fn failed_script_reload_escalates() {
		let mut page = MockPage::new(&[], &["http://localhost:3000/main.js"]);
		page.fail_scripts = true;
		let mut applier = UpdateApplier::new(page);

		let report = applier.apply(&batch(&["/main.js"]));

		assert!(report.full_reload);
		assert_eq!(applier.page().reloads, 1);
	}
}
