// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

//! Client configuration and server quirk profiles.

use std::collections::BTreeMap;
use std::path::PathBuf;

/// Authentication scheme selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    /// HTTP Basic authentication.
    Basic,
    /// HTTP Digest authentication (RFC 7616).
    Digest,
    /// Bearer token authentication (OAuth).
    Bearer,
}

/// `CalDAV` client configuration.
///
/// `url` may be a full server URL, or an email address / bare domain, in
/// which case RFC 6764 discovery resolves the service endpoint (unless
/// `enable_rfc6764` is off).
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ClientConfig {
    /// Server URL, email address, or bare domain.
    pub url: String,

    /// Username for authentication.
    #[serde(default)]
    pub username: Option<String>,

    /// Password for authentication.
    #[serde(default)]
    pub password: Option<String>,

    /// Fixed authentication scheme. When absent, the scheme is negotiated
    /// from the server's 401 challenge.
    #[serde(default)]
    pub auth_type: Option<AuthType>,

    /// Per-request timeout in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Verify the server TLS certificate.
    #[serde(default = "default_true")]
    pub ssl_verify_cert: bool,

    /// CA bundle to trust instead of the system roots.
    #[serde(default)]
    pub ssl_ca_bundle: Option<PathBuf>,

    /// Client certificate plus key, PEM-encoded in one file.
    #[serde(default)]
    pub ssl_client_pem: Option<PathBuf>,

    /// Proxy URL.
    #[serde(default)]
    pub proxy: Option<String>,

    /// Extra static headers sent on every request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Name of a built-in quirks profile (see [`quirks_profile`]).
    #[serde(default)]
    pub features: Option<String>,

    /// Explicit quirks map, overriding `features`.
    #[serde(default)]
    pub quirks: Option<Quirks>,

    /// Attempt RFC 6764 discovery for email/domain URLs.
    #[serde(default = "default_true")]
    pub enable_rfc6764: bool,

    /// Only accept TLS endpoints during discovery.
    #[serde(default = "default_true")]
    pub require_tls: bool,

    /// Require DNSSEC-validated answers during discovery.
    #[serde(default)]
    pub require_dnssec: bool,

    /// User agent string.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

const fn default_true() -> bool {
    true
}

fn default_user_agent() -> String {
    concat!("davcal/", env!("CARGO_PKG_VERSION")).to_string()
}

impl ClientConfig {
    /// Creates a configuration for a plain URL with no credentials.
    #[must_use]
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Self::default()
        }
    }

    /// Resolves the active quirks map: explicit map, then named profile,
    /// then conservative defaults.
    #[must_use]
    pub fn resolved_quirks(&self) -> Quirks {
        if let Some(q) = self.quirks {
            return q;
        }
        self.features
            .as_deref()
            .and_then(quirks_profile)
            .unwrap_or_default()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: None,
            password: None,
            auth_type: None,
            timeout_secs: None,
            ssl_verify_cert: true,
            ssl_ca_bundle: None,
            ssl_client_pem: None,
            proxy: None,
            headers: BTreeMap::new(),
            features: None,
            quirks: None,
            enable_rfc6764: true,
            require_tls: true,
            require_dnssec: false,
            user_agent: default_user_agent(),
        }
    }
}

/// Known-broken-server workarounds consulted at decision points.
///
/// Defaults are conservative: no workaround is applied unless the profile
/// turns it on. Repairs that are harmless on healthy servers (href
/// re-decoding, slash-tolerant property matching) are always on and merely
/// logged when they fire, so they need no flag here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct Quirks {
    /// Server omits `Etag` on PUT; fetch it with a follow-up PROPFIND.
    pub etag_missing_after_put: bool,
    /// Server advertises but does not implement `sync-collection`; go
    /// straight to the fake-token fallback.
    pub fake_sync_token_only: bool,
    /// Server rejects `expand` in calendar-query; expand client-side.
    pub expand_unsupported: bool,
}

/// Looks up a built-in quirks profile by server name.
#[must_use]
pub fn quirks_profile(name: &str) -> Option<Quirks> {
    match name.to_ascii_lowercase().as_str() {
        "radicale" | "xandikos" | "davical" => Some(Quirks::default()),
        "icloud" => Some(Quirks {
            fake_sync_token_only: true,
            ..Quirks::default()
        }),
        "owncloud" | "nextcloud" => Some(Quirks {
            etag_missing_after_put: true,
            ..Quirks::default()
        }),
        _ => None,
    }
}
