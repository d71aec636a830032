// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

//! Client facade: an authenticated session plus the entry points of the
//! resource model.

use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::calendar::Calendar;
use crate::config::{ClientConfig, Quirks};
use crate::davobject::Principal;
use crate::discovery::{discover_caldav, DiscoveryOptions, DnsResolver, SystemResolver};
use crate::error::DavError;
use crate::http::HttpTransport;
use crate::ops;
use crate::protocol::{DavRequest, DavResponse, Depth, ProtocolClient};
use crate::types::PropValue;
use crate::url::DavUrl;
use crate::xml::QName;

#[derive(Debug)]
struct ClientInner {
    transport: HttpTransport,
    base_url: RwLock<DavUrl>,
    principal_url: RwLock<Option<DavUrl>>,
    quirks: Quirks,
}

/// An authenticated `CalDAV` session.
///
/// Cheap to clone; every resource-model object shares the same underlying
/// HTTP session. Operations are not serialized internally: the client may
/// be used from several tasks at once, and sequencing is the caller's
/// business.
#[derive(Debug, Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Creates a client from a configuration carrying a full server URL.
    ///
    /// Credentials embedded in the URL are honored unless the
    /// configuration provides its own.
    ///
    /// # Errors
    ///
    /// Returns [`DavError::Config`] when the URL is not absolute (use
    /// [`Self::connect`] for email/domain identifiers) or the transport
    /// cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self, DavError> {
        let url = DavUrl::parse(&config.url)?;
        if !url.is_absolute() {
            return Err(DavError::Config(format!(
                "{} is not an absolute URL; use Client::connect for discovery",
                config.url
            )));
        }

        let mut config = config.clone();
        if config.username.is_none() || config.password.is_none() {
            if let Ok(parsed) = url::Url::parse(&config.url) {
                if !parsed.username().is_empty() && config.username.is_none() {
                    config.username = Some(parsed.username().to_string());
                }
                if let (Some(password), None) = (parsed.password(), config.password.as_ref()) {
                    config.password = Some(password.to_string());
                }
            }
        }

        let quirks = config.resolved_quirks();
        let transport = HttpTransport::new(&config)?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                transport,
                base_url: RwLock::new(url.strip_credentials()),
                principal_url: RwLock::new(None),
                quirks,
            }),
        })
    }

    /// Creates a client, running RFC 6764 discovery when the configured
    /// URL is an email address or bare domain.
    ///
    /// # Errors
    ///
    /// Returns [`DavError::Discovery`] when discovery finds no endpoint.
    pub async fn connect(config: &ClientConfig) -> Result<Self, DavError> {
        if config.url.contains("://") {
            return Self::new(config);
        }
        if !config.enable_rfc6764 {
            return Err(DavError::Config(
                "URL is not absolute and RFC 6764 discovery is disabled".to_string(),
            ));
        }
        let resolver = SystemResolver::new(config.require_dnssec);
        Self::connect_with_resolver(config, &resolver).await
    }

    /// Like [`Self::connect`], with an injected DNS resolver.
    ///
    /// # Errors
    ///
    /// See [`Self::connect`].
    pub async fn connect_with_resolver(
        config: &ClientConfig,
        resolver: &dyn DnsResolver,
    ) -> Result<Self, DavError> {
        let options = DiscoveryOptions {
            require_tls: config.require_tls,
            require_dnssec: config.require_dnssec,
            ssl_verify_cert: config.ssl_verify_cert,
            timeout_secs: config.timeout_secs.unwrap_or(10),
        };
        let service = discover_caldav(&config.url, &options, resolver)
            .await?
            .ok_or_else(|| DavError::Discovery {
                domain: config.url.clone(),
                reason: "no SRV record, TXT path or well-known endpoint found".to_string(),
            })?;

        debug!(url = %service.url, source = service.source, "using discovered endpoint");
        let mut config = config.clone();
        if config.username.is_none() {
            config.username.clone_from(&service.username);
        }
        config.url = service.url;
        Self::new(&config)
    }

    /// The current server base URL.
    ///
    /// May change over a session's lifetime when the server farms
    /// principals out to named hosts.
    #[must_use]
    pub fn base_url(&self) -> DavUrl {
        self.inner
            .base_url
            .read()
            .map(|u| u.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    /// Moves the base URL to the host of `url`, keeping the scheme/port of
    /// the target.
    pub(crate) fn rehome_to(&self, url: &DavUrl) -> Result<(), DavError> {
        let scheme = url.scheme().unwrap_or_else(|| "https".to_string());
        let host = url
            .hostname()
            .ok_or_else(|| DavError::Url(format!("{url} has no host")))?;
        let port = url.port().map_or(String::new(), |p| format!(":{p}"));
        let new_base = DavUrl::parse(&format!("{scheme}://{host}{port}/"))?;
        if let Ok(mut base) = self.inner.base_url.write() {
            *base = new_base;
        }
        Ok(())
    }

    /// The active quirks map.
    #[must_use]
    pub fn quirks(&self) -> Quirks {
        self.inner.quirks
    }

    /// The Sans-I/O request factory for the current base URL.
    #[must_use]
    pub fn protocol(&self) -> ProtocolClient {
        ProtocolClient::new(self.base_url())
    }

    /// Executes one protocol request through the transport.
    ///
    /// # Errors
    ///
    /// Propagates transport and authorization errors.
    pub async fn request(&self, request: DavRequest) -> Result<DavResponse, DavError> {
        self.inner.transport.execute(&request).await
    }

    /// Resolves (and caches) the current user's principal.
    ///
    /// # Errors
    ///
    /// Returns [`DavError::Response`] when the server does not advertise a
    /// principal.
    pub async fn principal(&self) -> Result<Principal, DavError> {
        if let Ok(cached) = self.inner.principal_url.read() {
            if let Some(url) = cached.as_ref() {
                return Ok(Principal::new(self.clone(), url.clone()));
            }
        }

        let props = [
            QName::dav("current-user-principal"),
            QName::dav("principal-URL"),
        ];
        let request = self.protocol().propfind_request(
            &self.base_url().to_string(),
            &props,
            Depth::Zero,
        )?;
        let response = self.request(request).await?;
        let results = ProtocolClient::parse_propfind(&response)?;
        let entry = ops::find_object_properties(&results, &self.base_url())?;

        let href = entry
            .properties
            .get(&QName::dav("current-user-principal").to_string())
            .or_else(|| {
                entry
                    .properties
                    .get(&QName::dav("principal-URL").to_string())
            })
            .and_then(PropValue::as_href)
            .ok_or_else(|| {
                DavError::Response("server advertises no principal URL".to_string())
            })?;

        let url = self.base_url().join(href)?.canonicalize();
        if let Ok(mut cached) = self.inner.principal_url.write() {
            *cached = Some(url.clone());
        }
        Ok(Principal::new(self.clone(), url))
    }

    /// Returns a calendar handle for a URL, without touching the network.
    ///
    /// # Errors
    ///
    /// Returns an error when the URL cannot be joined to the base URL.
    pub fn calendar(&self, url: &str) -> Result<Calendar, DavError> {
        Ok(Calendar::new(self.clone(), self.base_url().join(url)?))
    }

    async fn dav_header(&self) -> Result<Option<String>, DavError> {
        let request = self.protocol().options_request(&self.base_url().to_string())?;
        let response = self.request(request).await?;
        Ok(response.header("DAV").map(str::to_string))
    }

    /// The server's `DAV` compliance header.
    ///
    /// # Errors
    ///
    /// Propagates OPTIONS errors.
    pub async fn check_dav_support(&self) -> Result<Option<String>, DavError> {
        self.dav_header().await
    }

    /// Whether the server advertises `calendar-access`.
    ///
    /// # Errors
    ///
    /// Propagates OPTIONS errors.
    pub async fn check_cdav_support(&self) -> Result<bool, DavError> {
        Ok(self
            .dav_header()
            .await?
            .is_some_and(|h| h.contains("calendar-access")))
    }

    /// Whether the server advertises `calendar-auto-schedule`.
    ///
    /// # Errors
    ///
    /// Propagates OPTIONS errors.
    pub async fn check_scheduling_support(&self) -> Result<bool, DavError> {
        Ok(self
            .dav_header()
            .await?
            .is_some_and(|h| h.contains("calendar-auto-schedule")))
    }
}
