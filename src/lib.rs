//! polychat streams chat replies from OpenRouter-hosted models.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the model catalog, the conversation state machine, and the
//!   background stream plumbing that feeds it.
//! - [`proxy`] is the server side: it validates a transcript, opens one
//!   upstream streaming completion per request, and relays it over HTTP.
//! - [`api`] defines the request/response payloads and the line-oriented wire
//!   framing shared by the proxy and its clients.
//! - [`auth`] keeps the upstream API key in the system keyring.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod api;
pub mod auth;
pub mod cli;
pub mod core;
pub mod proxy;
pub mod utils;
