//! Input checks applied before any network or filesystem work.
//!
//! Every function here is pure: no DNS lookups, no I/O. The free functions
//! use the built-in limits, [`ValidationConfig`] applies configured ones.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;

use log::debug;
use url::{Host, Url};

use crate::config::{ValidationConfig, FORBIDDEN_DOMAINS, MAX_DOWNLOAD_SIZE, MIN_FILE_SIZE};

/// MIME types accepted from a server response
pub const ALLOWED_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "image/bmp",
    "image/tiff",
    "image/webp",
];

/// File extensions treated as images
pub const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "tiff", "tif", "webp"];

/// Check that a URL is safe to fetch using the built-in denylist
pub fn validate_url(url: &str) -> bool {
    check_url(url, FORBIDDEN_DOMAINS, false)
}

/// Check that `size` lies within `[MIN_FILE_SIZE, max]`
pub fn validate_file_size(size: u64, max: u64) -> bool {
    size >= MIN_FILE_SIZE && size <= max
}

/// Check a `Content-Type` header value against the image allowlist
pub fn validate_mime_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    ALLOWED_MIME_TYPES.contains(&essence.as_str())
}

/// Check the file extension, ignoring case
pub fn validate_file_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            ALLOWED_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// URL check plus an optional declared size against the download ceiling
pub fn validate_download_request(url: &str, size: Option<u64>) -> bool {
    validate_url(url) && size.map_or(true, |n| validate_file_size(n, MAX_DOWNLOAD_SIZE))
}

impl ValidationConfig {
    pub fn validate_url(&self, url: &str) -> bool {
        check_url(url, &self.forbidden_domains, self.allow_private_hosts)
    }

    pub fn validate_download_size(&self, size: u64) -> bool {
        size >= self.min_file_size && size <= self.max_download_size
    }

    pub fn validate_image_size(&self, size: u64) -> bool {
        size >= self.min_file_size && size <= self.max_image_size
    }

    /// The single gate the fetcher passes before any I/O
    pub fn validate_download_request(&self, url: &str, size: Option<u64>) -> bool {
        self.validate_url(url) && size.map_or(true, |n| self.validate_download_size(n))
    }
}

fn check_url<S: AsRef<str>>(raw: &str, forbidden: &[S], allow_private: bool) -> bool {
    let url = match Url::parse(raw) {
        Ok(url) => url,
        Err(e) => {
            debug!("Rejecting malformed URL {}: {}", raw, e);
            return false;
        }
    };

    if url.scheme() != "http" && url.scheme() != "https" {
        debug!("Rejecting URL with scheme {}: {}", url.scheme(), raw);
        return false;
    }

    let host = match url.host() {
        Some(host) => host,
        None => return false,
    };

    let host_str = url.host_str().unwrap_or_default().to_ascii_lowercase();
    let host_str = host_str.trim_start_matches('[').trim_end_matches(']');
    if !allow_private
        && forbidden
            .iter()
            .any(|d| d.as_ref().eq_ignore_ascii_case(host_str))
    {
        debug!("Rejecting forbidden host {}", host_str);
        return false;
    }

    let ip = match host {
        Host::Domain(_) => return true,
        Host::Ipv4(v4) => IpAddr::V4(v4),
        Host::Ipv6(v6) => IpAddr::V6(v6),
    };

    if !allow_private && is_restricted_ip(&ip) {
        debug!("Rejecting restricted address {}", ip);
        return false;
    }
    true
}

/// Loopback, private, link-local, CGNAT, unspecified and unique-local ranges
pub fn is_restricted_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_restricted_v4(v4),
        IpAddr::V6(v6) => is_restricted_v6(v6),
    }
}

fn is_restricted_v4(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();
    let cgnat = octets[0] == 100 && (octets[1] & 0xc0) == 64;
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || cgnat
}

fn is_restricted_v6(ip: &Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_restricted_v4(&v4);
    }
    let first = ip.segments()[0];
    let unique_local = (first & 0xfe00) == 0xfc00;
    let link_local = (first & 0xffc0) == 0xfe80;
    ip.is_loopback() || ip.is_unspecified() || unique_local || link_local
}
