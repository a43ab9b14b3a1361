//! The `fanout` load-testing binary.
//!
//! Drives a weighted mix of collection reads, create calls and multi-step shopping flows against a
//! microservice backend and reports which endpoints suffer from *N+1* fan-out latency.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

fn main() -> anyhow::Result<()> {
    fanout_runner::cli::execute()
}
