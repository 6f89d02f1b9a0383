//! Admin API surface

mod http;

pub use http::AdminApi;
