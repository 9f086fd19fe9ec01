//! Cisco IMC XML API (`/nuova`) support.

pub mod session;
pub mod xml;

pub use session::{build_http_client, CimcClient, RawResponse};
