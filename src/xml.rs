// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

//! XML namespaces and qualified names for WebDAV/CalDAV processing.

use std::fmt;

/// XML namespaces used in `CalDAV`.
pub mod ns {
    /// `WebDAV` namespace.
    pub const DAV: &str = "DAV:";

    /// `CalDAV` namespace.
    pub const CALDAV: &str = "urn:ietf:params:xml:ns:caldav";

    /// CalendarServer extensions namespace.
    pub const CALENDARSERVER: &str = "http://calendarserver.org/ns/";

    /// Apple iCal extensions namespace.
    pub const APPLE_ICAL: &str = "http://apple.com/ns/ical/";
}

/// A namespace-qualified XML name, rendered as `{namespace}localname`.
///
/// Both request builders and response parsers address elements by qualified
/// name; namespace prefixes on the wire are not significant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QName {
    ns: String,
    local: String,
}

impl QName {
    /// Creates a qualified name from a namespace URI and a local name.
    #[must_use]
    pub fn new(ns: &str, local: &str) -> Self {
        Self {
            ns: ns.to_string(),
            local: local.to_string(),
        }
    }

    /// Creates a name in the `DAV:` namespace.
    #[must_use]
    pub fn dav(local: &str) -> Self {
        Self::new(ns::DAV, local)
    }

    /// Creates a name in the `CalDAV` namespace.
    #[must_use]
    pub fn caldav(local: &str) -> Self {
        Self::new(ns::CALDAV, local)
    }

    /// Creates a name in the CalendarServer extensions namespace.
    #[must_use]
    pub fn calendarserver(local: &str) -> Self {
        Self::new(ns::CALENDARSERVER, local)
    }

    /// Parses a `{namespace}localname` string back into a qualified name.
    ///
    /// A string without a leading `{` is taken as a `DAV:` name.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        if let Some(rest) = s.strip_prefix('{') {
            if let Some((ns, local)) = rest.split_once('}') {
                return Self::new(ns, local);
            }
        }
        Self::dav(s)
    }

    /// The namespace URI.
    #[must_use]
    pub fn ns(&self) -> &str {
        &self.ns
    }

    /// The local element name.
    #[must_use]
    pub fn local(&self) -> &str {
        &self.local
    }

    /// The conventional prefix used when serializing this name.
    #[must_use]
    pub fn prefix(&self) -> &'static str {
        prefix_for(&self.ns)
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}{}", self.ns, self.local)
    }
}

/// Returns the conventional serialization prefix for a namespace.
///
/// `D:` for DAV, `C:` for CalDAV, `CS:` for calendarserver.org. Anything
/// else gets a catch-all prefix; parsers never rely on prefixes.
#[must_use]
pub fn prefix_for(ns: &str) -> &'static str {
    match ns {
        self::ns::DAV => "D",
        self::ns::CALDAV => "C",
        self::ns::CALENDARSERVER => "CS",
        _ => "X",
    }
}
