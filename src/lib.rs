//! Hot module reload client for pages served by a development server.
//!
//! The client keeps one WebSocket open to `<ws|wss>://<page host>/__hmr` and reacts to the server's frames
//! with the least disruptive remedy available:
//!
//! - stylesheet changes refetch every `<link rel="stylesheet">` in place,
//! - script, markup and unrecognised changes re-inject the page's module scripts
//!   (or reload the page if there are none),
//! - `full-reload` frames and a server restart (a second `connected` frame) reload the page.
//!
//! The protocol logic in [`connection`], [`router`] and [`update`] is independent of the browser;
//! [`dom`] and [`web`] bind it to `web-sys`.

#![doc(html_root_url = "https://docs.rs/hmr-dom/0.1.0")]
#![warn(clippy::pedantic)]

#[cfg(doctest)]
pub mod readme {
	doc_comment::doctest!("../README.md");
}

pub mod config;
pub mod connection;
pub mod dom;
mod error;
pub mod message;
pub mod router;
pub mod update;
pub mod web;

#[cfg(test)]
mod testing;

pub use config::ClientConfig;
pub use error::{Error, Result};
pub use web::{start, start_with, HmrHandle};
