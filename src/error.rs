// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the `CalDAV` client.

use thiserror::Error;

/// Errors surfaced by the `CalDAV` client.
///
/// Variants carry the resource URL where one applies, so callers can tell
/// which object an operation failed on.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DavError {
    /// 401/403 after authentication negotiation completed.
    #[error("authorization failed for {url}: {reason}")]
    Authorization {
        /// URL the request was sent to.
        url: String,
        /// Server-supplied or negotiated reason.
        reason: String,
    },

    /// 404 from the base protocol or a multistatus entry.
    #[error("resource not found: {url}")]
    NotFound {
        /// URL of the missing resource.
        url: String,
    },

    /// Malformed multistatus or an unexpected status line.
    #[error("unexpected server response: {0}")]
    Response(String),

    /// A PROPPATCH reported per-property failure.
    #[error("property update rejected: {status}")]
    Propset {
        /// The offending per-property status line.
        status: String,
    },

    /// Non-2xx PUT.
    #[error("PUT failed for {url}: {reason}")]
    Put {
        /// URL of the object being written.
        url: String,
        /// Status line or transport reason.
        reason: String,
    },

    /// Non-2xx, non-404 DELETE.
    #[error("DELETE failed for {url}: {reason}")]
    Delete {
        /// URL of the object being deleted.
        url: String,
        /// Status line or transport reason.
        reason: String,
    },

    /// Caller supplied contradictory flags or an impossible request.
    #[error("inconsistent request: {0}")]
    Consistency(String),

    /// RFC 6764 discovery failed under the supplied safety constraints.
    #[error("service discovery failed for {domain}: {reason}")]
    Discovery {
        /// Domain discovery was attempted for.
        domain: String,
        /// Why every method failed.
        reason: String,
    },

    /// HTTP transport failure.
    #[error("HTTP error: {0}")]
    Http(String),

    /// XML parsing/writing error.
    #[error("XML error: {0}")]
    Xml(String),

    /// iCalendar parsing or serialization error.
    #[error("iCalendar error: {0}")]
    Ical(String),

    /// A URL could not be parsed or joined.
    #[error("invalid URL: {0}")]
    Url(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The operation was cancelled before the server answered.
    #[error("operation cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for DavError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

impl From<quick_xml::Error> for DavError {
    fn from(e: quick_xml::Error) -> Self {
        Self::Xml(e.to_string())
    }
}

impl From<std::io::Error> for DavError {
    fn from(e: std::io::Error) -> Self {
        Self::Xml(format!("IO error: {e}"))
    }
}

impl From<url::ParseError> for DavError {
    fn from(e: url::ParseError) -> Self {
        Self::Url(e.to_string())
    }
}
