// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

//! RFC 6764 service discovery.
//!
//! Resolves an email address or bare domain to a `CalDAV` service URL via
//! DNS SRV/TXT records, falling back to the `/.well-known/caldav` URI.
//! Discovered hostnames must stay within the queried domain; anything else
//! smells like DNS hijacking and is rejected.

use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::TokioAsyncResolver;
use tracing::{debug, info, warn};

use crate::error::DavError;

/// One SRV record.
#[derive(Debug, Clone)]
pub struct SrvRecord {
    /// Lower is preferred.
    pub priority: u16,
    /// Higher is preferred within a priority band.
    pub weight: u16,
    /// Service port.
    pub port: u16,
    /// Target FQDN, without the trailing dot.
    pub target: String,
}

/// An SRV answer together with its validation state.
#[derive(Debug, Clone, Default)]
pub struct SrvAnswer {
    /// Records, unsorted.
    pub records: Vec<SrvRecord>,
    /// Whether the answer was DNSSEC-validated.
    pub dnssec_validated: bool,
}

/// DNS lookups needed by discovery. Implemented by the system resolver and
/// by test doubles.
#[async_trait]
pub trait DnsResolver: Send + Sync {
    /// Resolves SRV records for `name`. Missing records are an empty
    /// answer, not an error.
    async fn lookup_srv(&self, name: &str) -> Result<SrvAnswer, DavError>;

    /// Resolves TXT strings for `name`.
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, DavError>;
}

/// System DNS resolver.
#[derive(Debug)]
pub struct SystemResolver {
    resolver: TokioAsyncResolver,
    validating: bool,
}

impl SystemResolver {
    /// Creates a resolver using the default upstream configuration.
    ///
    /// With `require_dnssec`, answers are only accepted when they validate;
    /// unsigned zones then fail discovery instead of silently degrading.
    #[must_use]
    pub fn new(require_dnssec: bool) -> Self {
        let mut opts = ResolverOpts::default();
        opts.validate = require_dnssec;
        Self {
            resolver: TokioAsyncResolver::tokio(ResolverConfig::default(), opts),
            validating: require_dnssec,
        }
    }
}

#[async_trait]
impl DnsResolver for SystemResolver {
    async fn lookup_srv(&self, name: &str) -> Result<SrvAnswer, DavError> {
        match self.resolver.srv_lookup(name).await {
            Ok(lookup) => Ok(SrvAnswer {
                records: lookup
                    .iter()
                    .map(|srv| SrvRecord {
                        priority: srv.priority(),
                        weight: srv.weight(),
                        port: srv.port(),
                        target: srv.target().to_utf8().trim_end_matches('.').to_string(),
                    })
                    .collect(),
                dnssec_validated: self.validating,
            }),
            Err(e) => match e.kind() {
                ResolveErrorKind::NoRecordsFound { .. } => Ok(SrvAnswer::default()),
                _ => Err(DavError::Http(format!("DNS SRV lookup failed: {e}"))),
            },
        }
    }

    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, DavError> {
        match self.resolver.txt_lookup(name).await {
            Ok(lookup) => Ok(lookup
                .iter()
                .map(|txt| {
                    txt.txt_data()
                        .iter()
                        .map(|part| String::from_utf8_lossy(part).into_owned())
                        .collect::<String>()
                })
                .collect()),
            Err(e) => match e.kind() {
                ResolveErrorKind::NoRecordsFound { .. } => Ok(Vec::new()),
                _ => Err(DavError::Http(format!("DNS TXT lookup failed: {e}"))),
            },
        }
    }
}

/// Discovery constraints.
#[derive(Debug, Clone, Copy)]
pub struct DiscoveryOptions {
    /// Only accept TLS endpoints (prevents downgrade to plain HTTP).
    pub require_tls: bool,
    /// Fail hard when SRV answers are not DNSSEC-validated.
    pub require_dnssec: bool,
    /// Verify TLS certificates during the well-known probe.
    pub ssl_verify_cert: bool,
    /// Timeout for the well-known probe, in seconds.
    pub timeout_secs: u64,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            require_tls: true,
            require_dnssec: false,
            ssl_verify_cert: true,
            timeout_secs: 10,
        }
    }
}

/// A discovered `CalDAV` service endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    /// Full service URL.
    pub url: String,
    /// Service hostname.
    pub hostname: String,
    /// Service port.
    pub port: u16,
    /// Context path.
    pub path: String,
    /// Whether the endpoint is TLS.
    pub tls: bool,
    /// Which method produced the result: `srv`, `txt` or `well-known`.
    pub source: &'static str,
    /// Username extracted from an email identifier.
    pub username: Option<String>,
}

/// Splits an identifier into `(domain, username)`.
///
/// Emails split on `@`, URLs use their hostname, anything else is taken as
/// a domain.
#[must_use]
pub fn extract_domain(identifier: &str) -> (String, Option<String>) {
    if identifier.contains("://") {
        let host = url::Url::parse(identifier)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| identifier.to_string());
        return (host, None);
    }
    if let Some((user, domain)) = identifier.rsplit_once('@') {
        let user = user.trim();
        return (
            domain.trim().to_string(),
            if user.is_empty() {
                None
            } else {
                Some(user.to_string())
            },
        );
    }
    (identifier.trim().to_string(), None)
}

/// Whether `discovered` equals or is a subdomain of `original`.
#[must_use]
pub fn is_same_domain_or_subdomain(discovered: &str, original: &str) -> bool {
    let discovered = discovered.to_ascii_lowercase();
    let discovered = discovered.trim_matches('.');
    let original = original.to_ascii_lowercase();
    let original = original.trim_matches('.');
    discovered == original || discovered.ends_with(&format!(".{original}"))
}

/// Extracts `path` from RFC 6764 TXT data (space-separated `key=value`
/// pairs).
#[must_use]
pub fn parse_txt_path(txt: &str) -> Option<String> {
    for pair in txt.split_whitespace() {
        if let Some((key, value)) = pair.split_once('=') {
            if key.trim().eq_ignore_ascii_case("path") {
                return Some(value.trim().to_string());
            }
        }
    }
    None
}

/// Discovers the `CalDAV` service for an email address or domain.
///
/// Tries SRV (TLS first, non-TLS only when allowed), reads the matching
/// TXT record for the context path, and falls back to the well-known URI.
/// Returns `Ok(None)` when every method came up empty.
///
/// # Errors
///
/// Returns an error on hard failures: DNSSEC validation missing while
/// required, or resolver breakage.
pub async fn discover_caldav(
    identifier: &str,
    options: &DiscoveryOptions,
    resolver: &dyn DnsResolver,
) -> Result<Option<ServiceInfo>, DavError> {
    let (domain, username) = extract_domain(identifier);
    info!(domain = %domain, "discovering CalDAV service");

    let tls_options: &[bool] = if options.require_tls {
        &[true]
    } else {
        &[true, false]
    };

    for &tls in tls_options {
        let service = if tls { "_caldavs._tcp" } else { "_caldav._tcp" };
        let srv_name = format!("{service}.{domain}");

        let answer = resolver.lookup_srv(&srv_name).await?;
        if options.require_dnssec && !answer.records.is_empty() && !answer.dnssec_validated {
            return Err(DavError::Discovery {
                domain: domain.clone(),
                reason: format!("SRV answer for {srv_name} is not DNSSEC-validated"),
            });
        }

        let mut records = answer.records;
        records.sort_by_key(|r| (r.priority, std::cmp::Reverse(r.weight)));

        let accepted = records.into_iter().find(|record| {
            if is_same_domain_or_subdomain(&record.target, &domain) {
                true
            } else {
                warn!(
                    target = %record.target,
                    domain = %domain,
                    "rejecting SRV target outside the queried domain"
                );
                false
            }
        });

        let Some(record) = accepted else {
            continue;
        };

        let path = {
            let mut found = None;
            for txt in resolver.lookup_txt(&srv_name).await? {
                if let Some(path) = parse_txt_path(&txt) {
                    found = Some(path);
                    break;
                }
            }
            found.unwrap_or_else(|| "/".to_string())
        };

        let scheme = if tls { "https" } else { "http" };
        let default_port = if tls { 443 } else { 80 };
        let url = if record.port == default_port {
            format!("{scheme}://{}{path}", record.target)
        } else {
            format!("{scheme}://{}:{}{path}", record.target, record.port)
        };

        info!(url = %url, "discovered CalDAV service via SRV");
        return Ok(Some(ServiceInfo {
            url,
            hostname: record.target,
            port: record.port,
            path,
            tls,
            source: "srv",
            username,
        }));
    }

    debug!(domain = %domain, "SRV discovery empty, probing well-known URI");
    if let Some(mut info) = well_known_lookup(&domain, options).await {
        info.username = username;
        return Ok(Some(info));
    }

    warn!(domain = %domain, "CalDAV discovery failed");
    Ok(None)
}

/// Probes `https://<domain>/.well-known/caldav` with redirects disabled.
///
/// A redirect to the same domain (or a subdomain) wins; a 200 means the
/// well-known URI itself is the endpoint.
async fn well_known_lookup(domain: &str, options: &DiscoveryOptions) -> Option<ServiceInfo> {
    let url = format!("https://{domain}/.well-known/caldav");
    debug!(url = %url, "trying well-known URI");

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(std::time::Duration::from_secs(options.timeout_secs))
        .danger_accept_invalid_certs(!options.ssl_verify_cert)
        .build()
        .ok()?;

    let response = match client.get(&url).send().await {
        Ok(r) => r,
        Err(e) => {
            debug!(error = %e, "well-known probe failed");
            return None;
        }
    };

    let status = response.status().as_u16();
    if (301..=308).contains(&status) {
        let location = response.headers().get("Location")?.to_str().ok()?;
        let target = url::Url::parse(&url).ok()?.join(location).ok()?;
        let host = target.host_str()?.to_string();
        if !is_same_domain_or_subdomain(&host, domain) {
            warn!(
                target = %host,
                domain = %domain,
                "rejecting well-known redirect outside the queried domain"
            );
            return None;
        }
        let tls = target.scheme() == "https";
        return Some(ServiceInfo {
            url: target.to_string(),
            port: target
                .port()
                .unwrap_or(if tls { 443 } else { 80 }),
            path: target.path().to_string(),
            hostname: host,
            tls,
            source: "well-known",
            username: None,
        });
    }

    if status == 200 {
        return Some(ServiceInfo {
            url: url.clone(),
            hostname: domain.to_string(),
            port: 443,
            path: "/.well-known/caldav".to_string(),
            tls: true,
            source: "well-known",
            username: None,
        });
    }

    debug!(status, "well-known URI not usable");
    None
}
