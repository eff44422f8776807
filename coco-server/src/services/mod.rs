//! The long-running stages of the router.
//!
//! Data flows from the [`Listener`](listener::Listener) through the `raw` queue into a pool of
//! [`FilterService`](filter::FilterService) workers, and from there through the `filtered` queue
//! into the [`Router`](router::Router). The [`Measure`](measure::Measure) service samples the
//! queues periodically, and the [`HttpServer`](server::HttpServer) exposes the shared state.
//!
//! All stages except the HTTP server run on dedicated threads and block on their inputs.

pub mod filter;
pub mod listener;
pub mod measure;
pub mod router;
pub mod server;
