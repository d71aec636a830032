// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

//! Wire-level value types shared by the protocol engine and the resource model.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;

/// Calendar resource href (path).
///
/// A `Href` represents the path to a resource on a `CalDAV` server, such as
/// `/calendars/user/event1.ics`. Hrefs coming out of the response parsers are
/// percent-decoded and reduced to path form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Href(String);

impl Href {
    /// Creates a new `Href` from a string.
    #[must_use]
    pub const fn new(href: String) -> Self {
        Self(href)
    }

    /// Returns the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for Href {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for Href {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Href {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for Href {
    fn from(href: String) -> Self {
        Self(href)
    }
}

impl From<&str> for Href {
    fn from(href: &str) -> Self {
        Self(href.to_string())
    }
}

/// Entity tag for change detection.
///
/// An `ETag` is the opaque version marker returned by the server, used for
/// optimistic concurrency (`If-Match`) and change detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ETag(String);

impl ETag {
    /// Creates a new `ETag` from a string.
    #[must_use]
    pub const fn new(etag: String) -> Self {
        Self(etag)
    }

    /// Returns the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for ETag {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for ETag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ETag {
    fn from(etag: String) -> Self {
        Self(etag)
    }
}

impl From<&str> for ETag {
    fn from(etag: &str) -> Self {
        Self(etag.to_string())
    }
}

/// A typed property value extracted from a multistatus response.
///
/// Known structured properties are decoded into the matching shape; anything
/// else is kept raw for caller inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropValue {
    /// Property present with no content.
    Empty,
    /// Single text leaf.
    Text(String),
    /// A single nested `DAV:href`.
    Href(String),
    /// Multiple nested `DAV:href` elements, preference-sorted.
    HrefList(Vec<String>),
    /// Component or resource-type names (`resourcetype`,
    /// `supported-calendar-component-set`, `supported-report-set`).
    ComponentList(Vec<String>),
    /// Inner XML of an unrecognized structured property.
    Raw(String),
}

impl PropValue {
    /// The text form, when this value is a simple leaf.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The single-href form, accepting a text leaf as a degenerate href.
    #[must_use]
    pub fn as_href(&self) -> Option<&str> {
        match self {
            Self::Href(s) | Self::Text(s) => Some(s),
            Self::HrefList(v) => v.first().map(String::as_str),
            _ => None,
        }
    }

    /// The list-of-names form.
    #[must_use]
    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::ComponentList(v) | Self::HrefList(v) => Some(v),
            _ => None,
        }
    }
}

/// One resource entry from a PROPFIND multistatus.
#[derive(Debug, Clone)]
pub struct PropfindResult {
    /// Decoded href of the resource.
    pub href: String,
    /// Properties keyed by `{namespace}localname`.
    pub properties: BTreeMap<String, PropValue>,
    /// Per-resource status code (200 when the response carried none).
    pub status: u16,
}

/// One calendar object entry from a calendar-query or multiget REPORT.
#[derive(Debug, Clone)]
pub struct CalendarQueryResult {
    /// Decoded href of the object.
    pub href: String,
    /// `getetag` value, when the server supplied one.
    pub etag: Option<String>,
    /// Raw iCalendar payload.
    pub calendar_data: Option<String>,
    /// Per-resource status code.
    pub status: u16,
}

/// Result of a sync-collection REPORT.
#[derive(Debug, Clone, Default)]
pub struct SyncCollectionResult {
    /// Objects created or modified since the supplied token.
    pub changed: Vec<CalendarQueryResult>,
    /// Hrefs deleted since the supplied token.
    pub deleted: Vec<String>,
    /// The new token to hand back on the next call.
    pub sync_token: Option<String>,
}

/// Principal discovery summary.
#[derive(Debug, Clone, Default)]
pub struct PrincipalInfo {
    /// Principal URL.
    pub url: Option<String>,
    /// Display name.
    pub display_name: Option<String>,
    /// Calendar home set URL.
    pub calendar_home_set: Option<String>,
    /// Calendar user addresses, preference-sorted.
    pub calendar_user_addresses: Vec<String>,
}
