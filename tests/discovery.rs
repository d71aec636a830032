// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

//! RFC 6764 discovery tests with an injected resolver.

use std::collections::HashMap;

use async_trait::async_trait;
use davcal::discovery::{
    discover_caldav, extract_domain, is_same_domain_or_subdomain, parse_txt_path,
    DiscoveryOptions, DnsResolver, SrvAnswer, SrvRecord,
};
use davcal::DavError;

#[derive(Default)]
struct MockResolver {
    srv: HashMap<String, SrvAnswer>,
    txt: HashMap<String, Vec<String>>,
}

#[async_trait]
impl DnsResolver for MockResolver {
    async fn lookup_srv(&self, name: &str) -> Result<SrvAnswer, DavError> {
        Ok(self.srv.get(name).cloned().unwrap_or_default())
    }

    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, DavError> {
        Ok(self.txt.get(name).cloned().unwrap_or_default())
    }
}

fn srv(priority: u16, weight: u16, port: u16, target: &str) -> SrvRecord {
    SrvRecord {
        priority,
        weight,
        port,
        target: target.to_string(),
    }
}

#[tokio::test]
async fn discovery_via_srv_and_txt() {
    let mut resolver = MockResolver::default();
    resolver.srv.insert(
        "_caldavs._tcp.example.com".to_string(),
        SrvAnswer {
            records: vec![srv(0, 1, 443, "caldav.example.com")],
            dnssec_validated: false,
        },
    );
    resolver.txt.insert(
        "_caldavs._tcp.example.com".to_string(),
        vec!["path=/dav/".to_string()],
    );

    let info = discover_caldav(
        "user@example.com",
        &DiscoveryOptions::default(),
        &resolver,
    )
    .await
    .expect("discovery failed")
    .expect("service expected");

    assert_eq!(info.url, "https://caldav.example.com/dav/");
    assert_eq!(info.source, "srv");
    assert_eq!(info.username.as_deref(), Some("user"));
    assert_eq!(info.hostname, "caldav.example.com");
    assert_eq!(info.port, 443);
    assert!(info.tls);
}

#[tokio::test]
async fn discovery_nonstandard_port_is_kept_in_url() {
    let mut resolver = MockResolver::default();
    resolver.srv.insert(
        "_caldavs._tcp.example.com".to_string(),
        SrvAnswer {
            records: vec![srv(0, 1, 8443, "cal.example.com")],
            dnssec_validated: false,
        },
    );

    let info = discover_caldav("example.com", &DiscoveryOptions::default(), &resolver)
        .await
        .expect("discovery failed")
        .expect("service expected");

    assert_eq!(info.url, "https://cal.example.com:8443/");
    assert_eq!(info.path, "/");
}

#[tokio::test]
async fn discovery_prefers_lowest_priority_highest_weight() {
    let mut resolver = MockResolver::default();
    resolver.srv.insert(
        "_caldavs._tcp.example.com".to_string(),
        SrvAnswer {
            records: vec![
                srv(10, 1, 443, "backup.example.com"),
                srv(0, 1, 443, "light.example.com"),
                srv(0, 10, 443, "heavy.example.com"),
            ],
            dnssec_validated: false,
        },
    );

    let info = discover_caldav("example.com", &DiscoveryOptions::default(), &resolver)
        .await
        .expect("discovery failed")
        .expect("service expected");

    assert_eq!(info.hostname, "heavy.example.com");
}

#[tokio::test]
async fn discovery_rejects_cross_domain_srv_target() {
    let mut resolver = MockResolver::default();
    resolver.srv.insert(
        "_caldavs._tcp.example.invalid".to_string(),
        SrvAnswer {
            records: vec![srv(0, 1, 443, "evil.hackers.example.org")],
            dnssec_validated: false,
        },
    );

    // The hijacked target is skipped; with nothing else available (and no
    // well-known endpoint on a non-resolvable test domain), discovery
    // comes up empty rather than following the stray record.
    let result = discover_caldav("example.invalid", &DiscoveryOptions::default(), &resolver)
        .await
        .expect("discovery failed");
    assert!(result.is_none());
}

#[tokio::test]
async fn discovery_requires_dnssec_when_asked() {
    let mut resolver = MockResolver::default();
    resolver.srv.insert(
        "_caldavs._tcp.example.com".to_string(),
        SrvAnswer {
            records: vec![srv(0, 1, 443, "caldav.example.com")],
            dnssec_validated: false,
        },
    );

    let options = DiscoveryOptions {
        require_dnssec: true,
        ..DiscoveryOptions::default()
    };
    let result = discover_caldav("example.com", &options, &resolver).await;
    assert!(matches!(result, Err(DavError::Discovery { .. })));
}

#[tokio::test]
async fn discovery_dnssec_validated_answer_passes() {
    let mut resolver = MockResolver::default();
    resolver.srv.insert(
        "_caldavs._tcp.example.com".to_string(),
        SrvAnswer {
            records: vec![srv(0, 1, 443, "caldav.example.com")],
            dnssec_validated: true,
        },
    );

    let options = DiscoveryOptions {
        require_dnssec: true,
        ..DiscoveryOptions::default()
    };
    let info = discover_caldav("example.com", &options, &resolver)
        .await
        .expect("discovery failed")
        .expect("service expected");
    assert_eq!(info.hostname, "caldav.example.com");
}

#[tokio::test]
async fn discovery_non_tls_candidates_only_when_allowed() {
    let mut resolver = MockResolver::default();
    resolver.srv.insert(
        "_caldav._tcp.example.invalid".to_string(),
        SrvAnswer {
            records: vec![srv(0, 1, 80, "plain.example.invalid")],
            dnssec_validated: false,
        },
    );

    // Default: TLS required, the non-TLS record is never consulted.
    let strict = discover_caldav("example.invalid", &DiscoveryOptions::default(), &resolver)
        .await
        .expect("discovery failed");
    assert!(strict.is_none());

    let lax = DiscoveryOptions {
        require_tls: false,
        ..DiscoveryOptions::default()
    };
    let info = discover_caldav("example.invalid", &lax, &resolver)
        .await
        .expect("discovery failed")
        .expect("service expected");
    assert_eq!(info.url, "http://plain.example.invalid/");
    assert!(!info.tls);
}

#[test]
fn discovery_extract_domain_forms() {
    assert_eq!(
        extract_domain("user@example.com"),
        ("example.com".to_string(), Some("user".to_string()))
    );
    assert_eq!(extract_domain("example.com"), ("example.com".to_string(), None));
    assert_eq!(
        extract_domain("https://caldav.example.com/dav/"),
        ("caldav.example.com".to_string(), None)
    );
}

#[test]
fn discovery_same_domain_rule() {
    assert!(is_same_domain_or_subdomain("example.com", "example.com"));
    assert!(is_same_domain_or_subdomain(
        "calendar.example.com",
        "example.com"
    ));
    assert!(is_same_domain_or_subdomain(
        "deep.calendar.example.com",
        "example.com"
    ));
    assert!(!is_same_domain_or_subdomain("evil.com", "example.com"));
    assert!(!is_same_domain_or_subdomain(
        "exampleXcom.evil.com",
        "example.com"
    ));
}

#[test]
fn discovery_txt_path_parsing() {
    assert_eq!(parse_txt_path("path=/caldav/").as_deref(), Some("/caldav/"));
    assert_eq!(
        parse_txt_path("other=x path=/dav/ more=y").as_deref(),
        Some("/dav/")
    );
    assert_eq!(parse_txt_path("no pairs here"), None);
}
