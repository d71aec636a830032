// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

//! Asynchronous I/O shell.
//!
//! Moves [`DavRequest`]/[`DavResponse`] bytes over a reqwest client and
//! implements the 401 challenge handshake. No XML is interpreted here.

use std::collections::BTreeMap;
use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use md5::Md5;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::{AuthType, ClientConfig};
use crate::error::DavError;
use crate::protocol::{DavMethod, DavRequest, DavResponse};

/// Challenge parameters of a negotiated Digest scheme.
#[derive(Debug, Clone)]
struct DigestChallenge {
    realm: String,
    nonce: String,
    opaque: Option<String>,
    qop_auth: bool,
    sha256: bool,
}

#[derive(Debug, Clone)]
enum Scheme {
    Basic,
    Bearer,
    Digest(DigestChallenge),
}

#[derive(Debug, Default)]
struct AuthState {
    scheme: Option<Scheme>,
    nonce_count: u32,
    utf8_retry_done: bool,
}

/// HTTP transport shared by every resource-model object of a client.
#[derive(Debug)]
pub(crate) struct HttpTransport {
    http: reqwest::Client,
    username: Option<String>,
    password: Option<Vec<u8>>,
    fixed_auth: Option<AuthType>,
    extra_headers: Vec<(String, String)>,
    state: Mutex<AuthState>,
}

impl HttpTransport {
    /// Builds the transport from the client configuration.
    pub(crate) fn new(config: &ClientConfig) -> Result<Self, DavError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::none());

        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(std::time::Duration::from_secs(secs));
        }
        if !config.ssl_verify_cert {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(bundle) = &config.ssl_ca_bundle {
            let pem = std::fs::read(bundle)
                .map_err(|e| DavError::Config(format!("cannot read CA bundle: {e}")))?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| DavError::Config(format!("invalid CA bundle: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }
        if let Some(identity) = &config.ssl_client_pem {
            let pem = std::fs::read(identity)
                .map_err(|e| DavError::Config(format!("cannot read client certificate: {e}")))?;
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| DavError::Config(format!("invalid client certificate: {e}")))?;
            builder = builder.identity(identity);
        }
        if let Some(proxy) = &config.proxy {
            builder = builder.proxy(
                reqwest::Proxy::all(proxy)
                    .map_err(|e| DavError::Config(format!("invalid proxy: {e}")))?,
            );
        }

        let http = builder.build()?;

        let mut state = AuthState::default();
        // Basic and bearer need no challenge data; digest waits for a nonce.
        match config.auth_type {
            Some(AuthType::Basic) => state.scheme = Some(Scheme::Basic),
            Some(AuthType::Bearer) => state.scheme = Some(Scheme::Bearer),
            _ => {}
        }

        Ok(Self {
            http,
            username: config.username.clone(),
            password: config.password.clone().map(String::into_bytes),
            fixed_auth: config.auth_type,
            extra_headers: config
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            state: Mutex::new(state),
        })
    }

    fn has_credentials(&self) -> bool {
        self.username.is_some() || self.password.is_some()
    }

    /// Executes a request, negotiating authentication on a 401 challenge.
    ///
    /// The negotiated scheme is remembered, so at most the first request of
    /// a session pays the extra round-trip.
    pub(crate) async fn execute(&self, request: &DavRequest) -> Result<DavResponse, DavError> {
        let mut attempts = 0u8;
        loop {
            let response = match self.send(request).await {
                Ok(r) => r,
                Err(e) => {
                    // Some servers sever the connection instead of answering
                    // 401 on an unauthenticated bodyful request. Probe with a
                    // GET to harvest the challenge, then retry.
                    let unsettled = self.state.lock().map(|s| s.scheme.is_none()).unwrap_or(true);
                    if attempts == 0 && unsettled && self.has_credentials() {
                        warn!(url = %request.url, "transport error before auth, probing with GET");
                        let probe = DavRequest::new(DavMethod::Get, &request.url);
                        let probe_response = self.send(&probe).await.map_err(|_| e)?;
                        if probe_response.status != 401 {
                            return Err(DavError::Http(format!(
                                "request failed and probe returned {}",
                                probe_response.status
                            )));
                        }
                        attempts += 1;
                        self.handle_challenge(&probe_response, &request.url)?;
                        continue;
                    }
                    return Err(e);
                }
            };

            if response.status == 401 && attempts < 3 {
                attempts += 1;
                self.handle_challenge(&response, &request.url)?;
                continue;
            }

            if response.status == 401 || response.status == 403 {
                return Err(DavError::Authorization {
                    url: request.url.clone(),
                    reason: format!("server answered {}", response.status),
                });
            }

            return Ok(response);
        }
    }

    async fn send(&self, request: &DavRequest) -> Result<DavResponse, DavError> {
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| DavError::Http(format!("invalid method: {e}")))?;

        let mut builder = self.http.request(method, &request.url);
        for (key, value) in &self.extra_headers {
            builder = builder.header(key, value);
        }
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }
        if let Some(auth) = self.authorization_header(request)? {
            builder = builder.header("Authorization", auth);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        debug!(method = request.method.as_str(), url = %request.url, "sending request");
        let response = builder.send().await?;

        let status = response.status().as_u16();
        let mut headers = BTreeMap::new();
        for (key, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(key.as_str().to_string(), value.to_string());
            }
        }
        let body = response.bytes().await?.to_vec();
        debug!(status, bytes = body.len(), "response received");

        Ok(DavResponse {
            status,
            headers,
            body,
        })
    }

    fn password_string(&self) -> String {
        self.password
            .as_deref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default()
    }

    fn authorization_header(&self, request: &DavRequest) -> Result<Option<String>, DavError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| DavError::Http("auth state poisoned".to_string()))?;
        let Some(scheme) = state.scheme.clone() else {
            return Ok(None);
        };
        match scheme {
            Scheme::Basic => {
                let mut raw = Vec::new();
                raw.extend_from_slice(self.username.as_deref().unwrap_or_default().as_bytes());
                raw.push(b':');
                raw.extend_from_slice(self.password.as_deref().unwrap_or_default());
                Ok(Some(format!("Basic {}", BASE64.encode(raw))))
            }
            Scheme::Bearer => Ok(Some(format!("Bearer {}", self.password_string()))),
            Scheme::Digest(challenge) => {
                state.nonce_count += 1;
                let header = self.digest_header(request, &challenge, state.nonce_count);
                Ok(Some(header))
            }
        }
    }

    fn digest_header(
        &self,
        request: &DavRequest,
        challenge: &DigestChallenge,
        nonce_count: u32,
    ) -> String {
        let hash = |input: &str| -> String {
            if challenge.sha256 {
                hex(&Sha256::digest(input.as_bytes()))
            } else {
                hex(&Md5::digest(input.as_bytes()))
            }
        };

        let username = self.username.as_deref().unwrap_or_default();
        let uri = uri_of(&request.url);
        let ha1 = hash(&format!(
            "{username}:{}:{}",
            challenge.realm,
            self.password_string()
        ));
        let ha2 = hash(&format!("{}:{uri}", request.method.as_str()));

        let algorithm = if challenge.sha256 { "SHA-256" } else { "MD5" };
        let mut header;
        if challenge.qop_auth {
            let cnonce = uuid::Uuid::new_v4().simple().to_string();
            let nc = format!("{nonce_count:08x}");
            let response = hash(&format!(
                "{ha1}:{}:{nc}:{cnonce}:auth:{ha2}",
                challenge.nonce
            ));
            header = format!(
                "Digest username=\"{username}\", realm=\"{}\", nonce=\"{}\", uri=\"{uri}\", \
                 response=\"{response}\", algorithm={algorithm}, qop=auth, nc={nc}, \
                 cnonce=\"{cnonce}\"",
                challenge.realm, challenge.nonce
            );
        } else {
            let response = hash(&format!("{ha1}:{}:{ha2}", challenge.nonce));
            header = format!(
                "Digest username=\"{username}\", realm=\"{}\", nonce=\"{}\", uri=\"{uri}\", \
                 response=\"{response}\", algorithm={algorithm}",
                challenge.realm, challenge.nonce
            );
        }
        if let Some(opaque) = &challenge.opaque {
            header.push_str(&format!(", opaque=\"{opaque}\""));
        }
        header
    }

    /// Digests a 401 response: picks a scheme on the first challenge, falls
    /// back to the UTF-8-decoded password once, and gives up otherwise.
    fn handle_challenge(&self, response: &DavResponse, url: &str) -> Result<(), DavError> {
        let header = response.header("WWW-Authenticate").ok_or_else(|| {
            DavError::Authorization {
                url: url.to_string(),
                reason: "401 without WWW-Authenticate: no supported scheme".to_string(),
            }
        })?;

        let challenges = parse_challenges(header);
        let offered: Vec<&str> = challenges.iter().map(|(s, _)| s.as_str()).collect();

        let mut state = self
            .state
            .lock()
            .map_err(|_| DavError::Http("auth state poisoned".to_string()))?;

        if state.scheme.is_some() {
            // Second 401 with the same credentials: retry once with the
            // UTF-8-decoded password (charset negotiation workaround), after
            // refreshing digest challenge data.
            if !state.utf8_retry_done && self.password.is_some() {
                state.utf8_retry_done = true;
                if let Some(challenge) = find_digest(&challenges) {
                    if matches!(state.scheme, Some(Scheme::Digest(_))) {
                        state.scheme = Some(Scheme::Digest(challenge));
                        state.nonce_count = 0;
                    }
                }
                return Ok(());
            }
            return Err(DavError::Authorization {
                url: url.to_string(),
                reason: format!("credentials rejected (server offers: {})", offered.join(", ")),
            });
        }

        if !self.has_credentials() {
            return Err(DavError::Authorization {
                url: url.to_string(),
                reason: format!(
                    "authentication required (server offers: {})",
                    offered.join(", ")
                ),
            });
        }

        if let Some(fixed) = self.fixed_auth {
            let name = match fixed {
                AuthType::Basic => "basic",
                AuthType::Digest => "digest",
                AuthType::Bearer => "bearer",
            };
            if !offered.contains(&name) {
                return Err(DavError::Authorization {
                    url: url.to_string(),
                    reason: format!(
                        "configured auth type {name} not offered (server offers: {})",
                        offered.join(", ")
                    ),
                });
            }
        }

        let pick_digest = self.username.is_some() && offered.contains(&"digest");
        let pick_basic = self.username.is_some() && offered.contains(&"basic");
        let pick_bearer = self.password.is_some() && offered.contains(&"bearer");

        let scheme = match self.fixed_auth {
            Some(AuthType::Basic) => Some(Scheme::Basic),
            Some(AuthType::Bearer) => Some(Scheme::Bearer),
            Some(AuthType::Digest) => find_digest(&challenges).map(Scheme::Digest),
            None if pick_digest => find_digest(&challenges).map(Scheme::Digest),
            None if pick_basic => Some(Scheme::Basic),
            None if pick_bearer => Some(Scheme::Bearer),
            None => None,
        };

        match scheme {
            Some(scheme) => {
                debug!(scheme = ?offered, "negotiated authentication scheme");
                state.scheme = Some(scheme);
                state.nonce_count = 0;
                Ok(())
            }
            None => Err(DavError::Authorization {
                url: url.to_string(),
                reason: format!(
                    "no supported scheme among: {}",
                    offered.join(", ")
                ),
            }),
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

fn uri_of(url: &str) -> String {
    crate::url::DavUrl::parse(url).map_or_else(|_| url.to_string(), |u| {
        let path = u.path();
        if path.is_empty() {
            "/".to_string()
        } else {
            path
        }
    })
}

fn find_digest(challenges: &[(String, Vec<(String, String)>)]) -> Option<DigestChallenge> {
    let (_, params) = challenges.iter().find(|(s, _)| s == "digest")?;
    let get = |key: &str| {
        params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.clone())
    };
    Some(DigestChallenge {
        realm: get("realm").unwrap_or_default(),
        nonce: get("nonce").unwrap_or_default(),
        opaque: get("opaque"),
        qop_auth: get("qop").is_some_and(|q| q.to_ascii_lowercase().contains("auth")),
        sha256: get("algorithm").is_some_and(|a| a.to_ascii_uppercase().contains("SHA-256")),
    })
}

/// Splits a `WWW-Authenticate` header into `(scheme, params)` challenges.
///
/// Commas separate both challenges and parameters; a part that does not
/// look like `key=value` starts a new challenge.
fn parse_challenges(header: &str) -> Vec<(String, Vec<(String, String)>)> {
    let mut challenges: Vec<(String, Vec<(String, String)>)> = Vec::new();

    for part in split_quoted(header, ',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((first, rest)) = part.split_once(char::is_whitespace) {
            if !first.contains('=') {
                challenges.push((first.to_ascii_lowercase(), Vec::new()));
                if let Some((k, v)) = parse_param(rest) {
                    if let Some(last) = challenges.last_mut() {
                        last.1.push((k, v));
                    }
                }
                continue;
            }
        }
        if part.contains('=') {
            if let (Some((k, v)), Some(last)) = (parse_param(part), challenges.last_mut()) {
                last.1.push((k, v));
            }
        } else {
            challenges.push((part.to_ascii_lowercase(), Vec::new()));
        }
    }

    challenges
}

fn parse_param(s: &str) -> Option<(String, String)> {
    let (key, value) = s.trim().split_once('=')?;
    let value = value.trim().trim_matches('"');
    Some((key.trim().to_string(), value.to_string()))
}

fn split_quoted(s: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for ch in s.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            c if c == sep && !in_quotes => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    parts.push(current);
    parts
}
