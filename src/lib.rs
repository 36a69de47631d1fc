// The binary entry point is main.rs; the library exposes the measurement
// engine so integration tests and benchmarks can drive it directly.

pub mod config;
pub mod engine;
pub mod event;
pub mod session;
pub mod store;
