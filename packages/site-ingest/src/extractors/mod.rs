//! Extraction capability implementations.

pub mod http;

pub use http::HttpExtractor;
