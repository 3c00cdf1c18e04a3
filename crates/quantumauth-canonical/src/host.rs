//! Backend-host ("audience") normalization.

use url::{Host, Url};

use crate::CanonicalError;

/// Normalize a backend host to canonical `hostname[:port]` form.
///
/// - strips scheme, path, query and fragment
/// - lowercases the hostname
/// - drops default ports 80 and 443, preserves any other port
/// - IPv6 literals keep their bracketed form
///
/// Normalization is idempotent. An input that normalizes to nothing is an
/// error.
pub fn normalize_backend_host(input: &str) -> Result<String, CanonicalError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(CanonicalError::InvalidHost);
    }

    // If it already looks like a URL, parse directly; otherwise add a dummy
    // scheme so the URL parser can handle bare host[:port] input.
    let to_parse = if s.contains("://") {
        s.to_string()
    } else {
        format!("http://{s}")
    };

    if let Ok(u) = Url::parse(&to_parse) {
        if let Some(host) = u.host() {
            let host = render_host(&host);
            if host.is_empty() {
                return Err(CanonicalError::InvalidHost);
            }
            // Default ports are stripped regardless of scheme. The parser
            // already drops the scheme's own default (80 for the dummy http).
            return Ok(match u.port().filter(|p| *p != 80 && *p != 443) {
                Some(port) => format!("{host}:{port}"),
                None => host,
            });
        }
    }

    // Fallback for input the URL parser refuses: strip any scheme-like
    // prefix, cut at the first '/', then split host:port by hand.
    let mut raw = s;
    if let Some(i) = raw.find("://") {
        raw = &raw[i + 3..];
    }
    raw = raw.split('/').next().unwrap_or("").trim();

    let (host, port) = split_host_port(raw);
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    if host.is_empty() {
        return Err(CanonicalError::InvalidHost);
    }
    match port.filter(|p| *p != "80" && *p != "443") {
        Some(port) => Ok(format!("{host}:{port}")),
        None => Ok(host),
    }
}

fn render_host(host: &Host<&str>) -> String {
    match host {
        Host::Domain(d) => d.to_ascii_lowercase(),
        Host::Ipv4(a) => a.to_string(),
        Host::Ipv6(a) => format!("[{a}]"),
    }
}

fn split_host_port(raw: &str) -> (&str, Option<&str>) {
    if raw.starts_with('[') {
        // Bracketed IPv6 literal, possibly with a port.
        if let Some(end) = raw.find(']') {
            let after = &raw[end + 1..];
            return match after.strip_prefix(':') {
                Some(port) if !port.is_empty() => (&raw[..=end], Some(port)),
                _ => (raw, None),
            };
        }
        return (raw, None);
    }
    match raw.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
            (host, Some(port))
        }
        _ => (raw, None),
    }
}
