// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

//! URL value type for DAV resources.
//!
//! Servers return hrefs in wildly inconsistent forms: with or without a
//! trailing slash, percent-encoded or not, absolute or path-only, sometimes
//! with doubled slashes. Comparing canonical forms is the only safe way to
//! use URLs as keys, so equality and hashing here go through
//! [`DavUrl::canonicalize`].

use std::fmt;
use std::hash::{Hash, Hasher};

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::Url;

use crate::error::DavError;

/// Percent-encoding set matching conventional path quoting: everything
/// except unreserved characters and `/`.
pub(crate) const PATH_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// A parsed absolute or relative DAV URL.
///
/// Relative forms keep only a path (plus optional query/fragment); absolute
/// forms carry scheme, authority and path. The raw textual form given at
/// construction is preserved by [`fmt::Display`].
#[derive(Debug, Clone)]
pub struct DavUrl {
    raw: String,
}

#[derive(Debug, Default, Clone)]
struct Parts {
    scheme: Option<String>,
    username: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    path: String,
    query: Option<String>,
    fragment: Option<String>,
}

impl DavUrl {
    /// Parses a URL, tolerating relative forms.
    ///
    /// # Errors
    ///
    /// Returns an error if an absolute URL fails to parse.
    pub fn parse(s: &str) -> Result<Self, DavError> {
        if s.contains("://") {
            Url::parse(s)?;
        }
        Ok(Self { raw: s.to_string() })
    }

    /// Whether this URL carries a scheme and authority.
    #[must_use]
    pub fn is_absolute(&self) -> bool {
        self.raw.contains("://")
    }

    fn parts(&self) -> Parts {
        if self.is_absolute() {
            match Url::parse(&self.raw) {
                Ok(u) => Parts {
                    scheme: Some(u.scheme().to_string()),
                    username: if u.username().is_empty() {
                        None
                    } else {
                        Some(u.username().to_string())
                    },
                    host: u.host_str().map(str::to_string),
                    port: u.port(),
                    path: u.path().to_string(),
                    query: u.query().map(str::to_string),
                    fragment: u.fragment().map(str::to_string),
                },
                Err(_) => Parts {
                    path: self.raw.clone(),
                    ..Parts::default()
                },
            }
        } else {
            let (rest, fragment) = match self.raw.split_once('#') {
                Some((a, b)) => (a, Some(b.to_string())),
                None => (self.raw.as_str(), None),
            };
            let (path, query) = match rest.split_once('?') {
                Some((a, b)) => (a.to_string(), Some(b.to_string())),
                None => (rest.to_string(), None),
            };
            Parts {
                path,
                query,
                fragment,
                ..Parts::default()
            }
        }
    }

    /// The path component (the whole string for relative URLs).
    #[must_use]
    pub fn path(&self) -> String {
        self.parts().path
    }

    /// The hostname, for absolute URLs.
    #[must_use]
    pub fn hostname(&self) -> Option<String> {
        self.parts().host
    }

    /// The explicit port, for absolute URLs.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.parts().port
    }

    /// The scheme, for absolute URLs.
    #[must_use]
    pub fn scheme(&self) -> Option<String> {
        self.parts().scheme
    }

    /// Joins a path onto this URL.
    ///
    /// A relative `other` is appended to this URL's path, preserving trailing
    /// slashes exactly as the inputs had them. An absolute `other` must agree
    /// with this URL's scheme, host and port. Query and fragment always come
    /// from `other`.
    ///
    /// # Errors
    ///
    /// Returns an error when `other` is absolute and conflicts with this
    /// URL's connection details.
    pub fn join(&self, other: &str) -> Result<Self, DavError> {
        if other.is_empty() {
            return Ok(self.clone());
        }
        let other_url = Self::parse(other)?;
        let a = self.parts();
        let b = other_url.parts();

        let conflict = |x: &Option<String>, y: &Option<String>| {
            x.is_some() && y.is_some() && x != y
        };
        if conflict(&a.scheme, &b.scheme)
            || conflict(&a.host, &b.host)
            || (a.port.is_some() && b.port.is_some() && a.port != b.port)
        {
            return Err(DavError::Url(format!(
                "{self} can't be joined with {other}"
            )));
        }

        let ret_path = if b.path.starts_with('/') {
            b.path.clone()
        } else {
            let sep = if a.path.ends_with('/') { "" } else { "/" };
            format!("{}{}{}", a.path, sep, b.path)
        };

        let scheme = a.scheme.or(b.scheme);
        let host = a.host.or(b.host);
        let port = a.port.or(b.port);
        let username = a.username.or(b.username);

        Ok(Self {
            raw: render(
                scheme.as_deref(),
                username.as_deref(),
                host.as_deref(),
                port,
                &ret_path,
                b.query.as_deref(),
                b.fragment.as_deref(),
            ),
        })
    }

    /// Produces the canonical form used for comparison.
    ///
    /// Credentials are removed, the default port is made explicit, doubled
    /// slashes in the path are collapsed, and the path is re-quoted into a
    /// stable percent-encoded form.
    #[must_use]
    pub fn canonicalize(&self) -> Self {
        let p = self.parts();
        let path = canonical_path(&p.path);
        if let Some(host) = &p.host {
            let scheme = p
                .scheme
                .as_deref()
                .unwrap_or("https")
                .to_ascii_lowercase();
            let port = p.port.or(match scheme.as_str() {
                "https" => Some(443),
                "http" => Some(80),
                _ => None,
            });
            Self {
                raw: render(
                    Some(&scheme),
                    None,
                    Some(&host.to_ascii_lowercase()),
                    port,
                    &path,
                    p.query.as_deref(),
                    p.fragment.as_deref(),
                ),
            }
        } else {
            Self {
                raw: render(
                    None,
                    None,
                    None,
                    None,
                    &path,
                    p.query.as_deref(),
                    p.fragment.as_deref(),
                ),
            }
        }
    }

    /// Returns this URL without a trailing slash on the path.
    #[must_use]
    pub fn strip_trailing_slash(&self) -> Self {
        if self.raw.ends_with('/') {
            Self {
                raw: self.raw[..self.raw.len() - 1].to_string(),
            }
        } else {
            self.clone()
        }
    }

    /// Returns this URL with any userinfo removed.
    #[must_use]
    pub fn strip_credentials(&self) -> Self {
        let p = self.parts();
        if p.username.is_none() {
            return self.clone();
        }
        Self {
            raw: render(
                p.scheme.as_deref(),
                None,
                p.host.as_deref(),
                p.port,
                &p.path.replace("//", "/"),
                p.query.as_deref(),
                p.fragment.as_deref(),
            ),
        }
    }
}

fn canonical_path(path: &str) -> String {
    let mut collapsed = path.to_string();
    while collapsed.contains("//") {
        collapsed = collapsed.replace("//", "/");
    }
    let decoded = percent_decode_str(&collapsed)
        .decode_utf8()
        .map_or(collapsed.clone(), |c| c.into_owned());
    utf8_percent_encode(&decoded, PATH_SET).to_string()
}

fn render(
    scheme: Option<&str>,
    username: Option<&str>,
    host: Option<&str>,
    port: Option<u16>,
    path: &str,
    query: Option<&str>,
    fragment: Option<&str>,
) -> String {
    let mut out = String::new();
    if let (Some(scheme), Some(host)) = (scheme, host) {
        out.push_str(scheme);
        out.push_str("://");
        if let Some(user) = username {
            out.push_str(user);
            out.push('@');
        }
        out.push_str(host);
        if let Some(port) = port {
            out.push(':');
            out.push_str(&port.to_string());
        }
    }
    out.push_str(path);
    if let Some(q) = query {
        out.push('?');
        out.push_str(q);
    }
    if let Some(f) = fragment {
        out.push('#');
        out.push_str(f);
    }
    out
}

impl fmt::Display for DavUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.raw.fmt(f)
    }
}

impl PartialEq for DavUrl {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
            || self.canonicalize().raw == other.canonicalize().raw
    }
}

impl Eq for DavUrl {}

impl Hash for DavUrl {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonicalize().raw.hash(state);
    }
}

impl From<Url> for DavUrl {
    fn from(u: Url) -> Self {
        Self { raw: u.to_string() }
    }
}

impl std::str::FromStr for DavUrl {
    type Err = DavError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
