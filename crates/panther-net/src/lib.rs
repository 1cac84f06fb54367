//! PantherVPN control-plane networking.
//!
//! A small async HTTP client used for the short JSON exchanges the
//! provisioning pipeline makes against the registration backend. TLS is
//! rustls (memory-safe, webpki roots), transport is hyper over tokio.
//!
//! This crate knows nothing about tunnels or devices; it moves bytes with
//! bounded timeouts and hands back a status code and a body.

mod client;

pub use client::{HttpClient, HttpClientConfig, HttpError, HttpResponse};
