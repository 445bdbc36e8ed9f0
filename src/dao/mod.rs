/// HTTP client for a remote relay.
#[cfg(feature = "http-store")]
pub mod http;
/// In-process board store used by the relay and tests.
pub mod memory;
/// Remote store abstraction polled and written by clients.
pub mod remote_store;
