//! Fuzz testing for client identity resolution.
//!
//! Feeds arbitrary input into everything that parses untrusted text before
//! the rate limiter keys on it:
//!
//! - `CidrRange::parse` on `TRUSTED_PROXIES` entries
//! - `extract_client_ip` / `forwarded_proto` on forwarded headers from a trusted peer
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! # Install cargo-fuzz (requires nightly)
//! cargo +nightly install cargo-fuzz
//!
//! # Run the client IP fuzz target
//! cargo +nightly fuzz run fuzz_client_ip
//!
//! # Run with a time limit (e.g., 60 seconds)
//! cargo +nightly fuzz run fuzz_client_ip -- -max_total_time=60
//! ```

#![no_main]

use std::net::{IpAddr, SocketAddr};

use api_gateway::middleware::ip::CidrRange;
use api_gateway::middleware::{TrustedProxyConfig, extract_client_ip, forwarded_proto};
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{HeaderValue, Request};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        // Parsing and matching must never panic, whatever the prefix length
        if let Some(range) = CidrRange::parse(s) {
            let _ = range.contains(&IpAddr::from([127, 0, 0, 1]));
            let _ = range.contains(&IpAddr::from([0u16, 0, 0, 0, 0, 0xffff, 0x7f00, 1]));
        }
    }

    // Forwarded headers are only read from trusted peers
    let Ok(value) = HeaderValue::from_bytes(data) else {
        return;
    };
    let trusted = TrustedProxyConfig::new(&["127.0.0.0/8".to_string()]);
    let mut request = Request::new(Body::empty());
    request.headers_mut().insert("x-forwarded-for", value.clone());
    request.headers_mut().insert("x-real-ip", value.clone());
    request.headers_mut().insert("x-forwarded-proto", value);
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))));

    let ip = extract_client_ip(&request, &trusted);
    assert!(!ip.is_empty());
    let _ = forwarded_proto(&request, &trusted);
});
