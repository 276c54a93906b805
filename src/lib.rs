#![recursion_limit = "128"]

#[macro_use]
extern crate diesel;
#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate serde_json;
#[macro_use]
extern crate slog;

pub mod api;
pub mod contexts;
pub mod dag;
pub mod error_helpers;
pub mod errors;
pub mod executor;
pub mod ids;
pub mod mediators;
pub mod merge;
pub mod model;
pub mod network;
pub mod operators;
pub mod paths;
pub mod peer_client;
pub mod queries;
pub mod settings;
pub mod store;
pub mod time_helpers;
pub mod urls;
pub mod web;
pub mod worker;

// Hand-maintained to match `migrations/`: skip rustfmt
#[cfg_attr(rustfmt, rustfmt_skip)]
mod schema;

#[cfg(test)]
mod test_data;
#[cfg(test)]
mod test_helpers;
