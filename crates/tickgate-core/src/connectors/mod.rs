//! Built-in [`SourceConnector`](crate::SourceConnector) implementations.
//!
//! | Connector | Use |
//! |-----------|-----|
//! | [`FixtureConnector`] | Scriptable in-memory source for tests and `--mock` runs |
//! | [`HttpJsonConnector`] | Already-normalized JSON served over HTTP |

mod fixture;
mod http_json;

pub use fixture::FixtureConnector;
pub use http_json::HttpJsonConnector;
