//! Filtering network proxies.

pub mod filter;
pub mod http;
pub mod socks5;

pub use filter::{AskCallback, NetworkFilter};
pub use http::HttpProxy;
pub use socks5::Socks5Proxy;
