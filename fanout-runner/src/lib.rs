//! Command-line runner for the fan-out load test.
//!
//! Wires the [`fanout_engine`] to a real HTTP backend: the endpoint [`catalog`] of the shop under
//! test, an HTTP [`Requester`](fanout_engine::Requester) in [`http`], layered [`config`] and the
//! coloured console [`render`]ing of the final report.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod catalog;
pub mod cli;
pub mod config;
pub mod http;
pub mod observability;
pub mod render;
pub mod run;
