//! HTTP transport: the default [`RequestExecutor`](crate::client::RequestExecutor).

mod http;
mod sse;

pub use http::HttpTransport;
