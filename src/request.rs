// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

//! Request body builders for WebDAV/CalDAV operations.
//!
//! Every builder is a pure transformation from typed inputs to an XML body:
//! UTF-8, XML declaration included, `D:`/`C:`/`CS:` prefixes for the DAV,
//! CalDAV and CalendarServer namespaces.

use std::io::Cursor;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::error::DavError;
use crate::xml::{ns, prefix_for, QName};

type XmlWriter = Writer<Cursor<Vec<u8>>>;

fn new_writer() -> XmlWriter {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    // The declaration write only fails on I/O, which a Vec sink never does.
    let _ = writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)));
    writer
}

fn finish(writer: XmlWriter) -> Result<String, DavError> {
    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).map_err(|e| DavError::Xml(format!("UTF-8 error: {e}")))
}

fn root_element(name: &str, extra_ns: &[&str]) -> BytesStart<'static> {
    let mut root = BytesStart::new(name.to_string());
    root.push_attribute(("xmlns:D", ns::DAV));
    root.push_attribute(("xmlns:C", ns::CALDAV));
    let mut seen: Vec<&str> = Vec::new();
    for extra in extra_ns {
        if seen.contains(extra) || *extra == ns::DAV || *extra == ns::CALDAV {
            continue;
        }
        seen.push(extra);
        if *extra == ns::CALENDARSERVER {
            root.push_attribute(("xmlns:CS", ns::CALENDARSERVER));
        } else {
            root.push_attribute(("xmlns:X", *extra));
        }
    }
    root
}

fn prefixed(name: &QName) -> String {
    format!("{}:{}", prefix_for(name.ns()), name.local())
}

fn write_empty(writer: &mut XmlWriter, tag: &str) -> Result<(), DavError> {
    writer.write_event(Event::Start(BytesStart::new(tag.to_string())))?;
    writer.write_event(Event::End(BytesEnd::new(tag.to_string())))?;
    Ok(())
}

fn write_text_elem(writer: &mut XmlWriter, tag: &str, text: &str) -> Result<(), DavError> {
    writer.write_event(Event::Start(BytesStart::new(tag.to_string())))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(tag.to_string())))?;
    Ok(())
}

/// PROPFIND request builder.
///
/// With no properties added, the body requests `allprop`.
#[derive(Debug, Default)]
pub struct PropFindRequest {
    props: Vec<QName>,
}

impl PropFindRequest {
    /// Creates a new PROPFIND request.
    #[must_use]
    pub fn new() -> Self {
        Self { props: Vec::new() }
    }

    /// Adds a property to the request.
    pub fn add_property(&mut self, prop: QName) -> &mut Self {
        self.props.push(prop);
        self
    }

    /// The requested properties.
    #[must_use]
    pub fn properties(&self) -> &[QName] {
        &self.props
    }

    /// Builds the XML body for the PROPFIND request.
    ///
    /// # Errors
    ///
    /// Returns an error if XML building fails.
    pub fn build(&self) -> Result<String, DavError> {
        let mut writer = new_writer();
        let extra: Vec<&str> = self.props.iter().map(QName::ns).collect();
        writer.write_event(Event::Start(root_element("D:propfind", &extra)))?;

        if self.props.is_empty() {
            write_empty(&mut writer, "D:allprop")?;
        } else {
            writer.write_event(Event::Start(BytesStart::new("D:prop")))?;
            for prop in &self.props {
                write_empty(&mut writer, &prefixed(prop))?;
            }
            writer.write_event(Event::End(BytesEnd::new("D:prop")))?;
        }

        writer.write_event(Event::End(BytesEnd::new("D:propfind")))?;
        finish(writer)
    }
}

/// PROPPATCH request builder with `set` and `remove` blocks.
#[derive(Debug, Default)]
pub struct PropPatchRequest {
    set: Vec<(QName, String)>,
    remove: Vec<QName>,
}

impl PropPatchRequest {
    /// Creates a new PROPPATCH request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a property to a text value.
    pub fn set_property(&mut self, prop: QName, value: &str) -> &mut Self {
        self.set.push((prop, value.to_string()));
        self
    }

    /// Removes a property.
    pub fn remove_property(&mut self, prop: QName) -> &mut Self {
        self.remove.push(prop);
        self
    }

    /// Builds the XML body for the PROPPATCH request.
    ///
    /// # Errors
    ///
    /// Returns an error if XML building fails.
    pub fn build(&self) -> Result<String, DavError> {
        let mut writer = new_writer();
        let extra: Vec<&str> = self
            .set
            .iter()
            .map(|(p, _)| p.ns())
            .chain(self.remove.iter().map(QName::ns))
            .collect();
        writer.write_event(Event::Start(root_element("D:propertyupdate", &extra)))?;

        if !self.set.is_empty() {
            writer.write_event(Event::Start(BytesStart::new("D:set")))?;
            writer.write_event(Event::Start(BytesStart::new("D:prop")))?;
            for (prop, value) in &self.set {
                write_text_elem(&mut writer, &prefixed(prop), value)?;
            }
            writer.write_event(Event::End(BytesEnd::new("D:prop")))?;
            writer.write_event(Event::End(BytesEnd::new("D:set")))?;
        }

        if !self.remove.is_empty() {
            writer.write_event(Event::Start(BytesStart::new("D:remove")))?;
            writer.write_event(Event::Start(BytesStart::new("D:prop")))?;
            for prop in &self.remove {
                write_empty(&mut writer, &prefixed(prop))?;
            }
            writer.write_event(Event::End(BytesEnd::new("D:prop")))?;
            writer.write_event(Event::End(BytesEnd::new("D:remove")))?;
        }

        writer.write_event(Event::End(BytesEnd::new("D:propertyupdate")))?;
        finish(writer)
    }
}

/// Time range filter, values in iCalendar UTC basic format
/// (`20240601T000000Z`).
#[derive(Debug, Clone)]
pub struct TimeRange {
    /// Start of the range (inclusive).
    pub start: String,
    /// End of the range (exclusive).
    pub end: Option<String>,
}

/// Text/state operator of a property filter.
#[derive(Debug, Clone)]
pub enum FilterOp {
    /// Substring text-match.
    Contains {
        /// Pattern to look for.
        pattern: String,
        /// Use the byte-exact `i;octet` collation instead of the default
        /// case-insensitive `i;ascii-casemap`.
        case_sensitive: bool,
        /// Invert the match.
        negate: bool,
    },
    /// Whole-value text-match (servers treat this as a text-match; the
    /// client-side post filter applies exact equality).
    Equals {
        /// Value to compare against.
        pattern: String,
        /// Use the byte-exact `i;octet` collation.
        case_sensitive: bool,
        /// Invert the match.
        negate: bool,
    },
    /// The property must exist.
    IsDefined,
    /// The property must not exist.
    IsNotDefined,
}

/// Filter on one iCalendar property, optionally with parameter filters
/// (e.g. `PARTSTAT` on `ATTENDEE`).
#[derive(Debug, Clone)]
pub struct PropFilter {
    /// Property name (`SUMMARY`, `UID`, `ATTENDEE`, ...).
    pub name: String,
    /// Operator applied to the property value.
    pub op: FilterOp,
    /// Parameter filters: `(parameter name, optional text-match pattern)`.
    pub param_filters: Vec<(String, Option<String>)>,
}

const COLLATION_CASELESS: &str = "i;ascii-casemap";
const COLLATION_OCTET: &str = "i;octet";

fn write_text_match(
    writer: &mut XmlWriter,
    pattern: &str,
    case_sensitive: bool,
    negate: bool,
) -> Result<(), DavError> {
    let mut tm = BytesStart::new("C:text-match");
    let collation = if case_sensitive {
        COLLATION_OCTET
    } else {
        COLLATION_CASELESS
    };
    tm.push_attribute(("collation", collation));
    if negate {
        tm.push_attribute(("negate-condition", "yes"));
    }
    writer.write_event(Event::Start(tm))?;
    writer.write_event(Event::Text(BytesText::new(pattern)))?;
    writer.write_event(Event::End(BytesEnd::new("C:text-match")))?;
    Ok(())
}

/// Calendar query (REPORT) request builder.
#[derive(Debug, Default)]
pub struct CalendarQueryRequest {
    component: Option<String>,
    time_range: Option<TimeRange>,
    expand: Option<TimeRange>,
    prop_filters: Vec<PropFilter>,
    etags_only: bool,
}

impl CalendarQueryRequest {
    /// Creates a new calendar query request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the component filter (`VEVENT`, `VTODO`, `VJOURNAL`).
    #[must_use]
    pub fn component(mut self, component: &str) -> Self {
        self.component = Some(component.to_string());
        self
    }

    /// Sets the time range filter.
    #[must_use]
    pub fn time_range(mut self, start: &str, end: Option<&str>) -> Self {
        self.time_range = Some(TimeRange {
            start: start.to_string(),
            end: end.map(str::to_string),
        });
        self
    }

    /// Asks the server to expand recurrences inside the given range.
    #[must_use]
    pub fn expand(mut self, start: &str, end: &str) -> Self {
        self.expand = Some(TimeRange {
            start: start.to_string(),
            end: Some(end.to_string()),
        });
        self
    }

    /// Adds a property filter.
    #[must_use]
    pub fn prop_filter(mut self, filter: PropFilter) -> Self {
        self.prop_filters.push(filter);
        self
    }

    /// Requests only `getetag`, no calendar data (used to enumerate a
    /// collection cheaply).
    #[must_use]
    pub fn etags_only(mut self) -> Self {
        self.etags_only = true;
        self
    }

    /// Builds the XML body for the calendar query request.
    ///
    /// # Errors
    ///
    /// Returns an error if XML building fails.
    pub fn build(&self) -> Result<String, DavError> {
        let mut writer = new_writer();
        writer.write_event(Event::Start(root_element("C:calendar-query", &[])))?;

        // <D:prop> with getetag and calendar-data (optionally expanded)
        writer.write_event(Event::Start(BytesStart::new("D:prop")))?;
        write_empty(&mut writer, "D:getetag")?;
        if self.etags_only {
            // no calendar-data requested
        } else if let Some(expand) = &self.expand {
            writer.write_event(Event::Start(BytesStart::new("C:calendar-data")))?;
            let mut exp = BytesStart::new("C:expand");
            exp.push_attribute(("start", expand.start.as_str()));
            if let Some(end) = &expand.end {
                exp.push_attribute(("end", end.as_str()));
            }
            writer.write_event(Event::Empty(exp))?;
            writer.write_event(Event::End(BytesEnd::new("C:calendar-data")))?;
        } else {
            write_empty(&mut writer, "C:calendar-data")?;
        }
        writer.write_event(Event::End(BytesEnd::new("D:prop")))?;

        // <C:filter> with nested comp-filters
        writer.write_event(Event::Start(BytesStart::new("C:filter")))?;
        let mut outer = BytesStart::new("C:comp-filter");
        outer.push_attribute(("name", "VCALENDAR"));
        writer.write_event(Event::Start(outer))?;

        if let Some(component) = &self.component {
            let mut inner = BytesStart::new("C:comp-filter");
            inner.push_attribute(("name", component.as_str()));
            writer.write_event(Event::Start(inner))?;

            if let Some(tr) = &self.time_range {
                let mut time_range = BytesStart::new("C:time-range");
                time_range.push_attribute(("start", tr.start.as_str()));
                if let Some(end) = &tr.end {
                    time_range.push_attribute(("end", end.as_str()));
                }
                writer.write_event(Event::Empty(time_range))?;
            }

            for filter in &self.prop_filters {
                self.write_prop_filter(&mut writer, filter)?;
            }

            writer.write_event(Event::End(BytesEnd::new("C:comp-filter")))?;
        }

        writer.write_event(Event::End(BytesEnd::new("C:comp-filter")))?;
        writer.write_event(Event::End(BytesEnd::new("C:filter")))?;
        writer.write_event(Event::End(BytesEnd::new("C:calendar-query")))?;
        finish(writer)
    }

    fn write_prop_filter(
        &self,
        writer: &mut XmlWriter,
        filter: &PropFilter,
    ) -> Result<(), DavError> {
        let mut pf = BytesStart::new("C:prop-filter");
        pf.push_attribute(("name", filter.name.as_str()));
        writer.write_event(Event::Start(pf))?;

        match &filter.op {
            FilterOp::Contains {
                pattern,
                case_sensitive,
                negate,
            }
            | FilterOp::Equals {
                pattern,
                case_sensitive,
                negate,
            } => write_text_match(writer, pattern, *case_sensitive, *negate)?,
            FilterOp::IsDefined => {}
            FilterOp::IsNotDefined => {
                writer.write_event(Event::Empty(BytesStart::new("C:is-not-defined")))?;
            }
        }

        for (param, pattern) in &filter.param_filters {
            let mut param_filter = BytesStart::new("C:param-filter");
            param_filter.push_attribute(("name", param.as_str()));
            writer.write_event(Event::Start(param_filter))?;
            if let Some(pattern) = pattern {
                write_text_match(writer, pattern, false, false)?;
            }
            writer.write_event(Event::End(BytesEnd::new("C:param-filter")))?;
        }

        writer.write_event(Event::End(BytesEnd::new("C:prop-filter")))?;
        Ok(())
    }
}

/// Calendar multiget (REPORT) request builder.
#[derive(Debug, Default)]
pub struct CalendarMultiGetRequest {
    hrefs: Vec<String>,
}

impl CalendarMultiGetRequest {
    /// Creates a new calendar multiget request.
    #[must_use]
    pub fn new() -> Self {
        Self { hrefs: Vec::new() }
    }

    /// Adds an href to the request.
    pub fn add_href(&mut self, href: &str) -> &mut Self {
        self.hrefs.push(href.to_string());
        self
    }

    /// Builds the XML body for the calendar multiget request.
    ///
    /// # Errors
    ///
    /// Returns an error if XML building fails.
    pub fn build(&self) -> Result<String, DavError> {
        let mut writer = new_writer();
        writer.write_event(Event::Start(root_element("C:calendar-multiget", &[])))?;

        writer.write_event(Event::Start(BytesStart::new("D:prop")))?;
        write_empty(&mut writer, "D:getetag")?;
        write_empty(&mut writer, "C:calendar-data")?;
        writer.write_event(Event::End(BytesEnd::new("D:prop")))?;

        for href in &self.hrefs {
            write_text_elem(&mut writer, "D:href", href)?;
        }

        writer.write_event(Event::End(BytesEnd::new("C:calendar-multiget")))?;
        finish(writer)
    }
}

/// Sync-collection (REPORT) request builder, RFC 6578.
#[derive(Debug, Default)]
pub struct SyncCollectionRequest {
    sync_token: Option<String>,
    props: Vec<QName>,
    infinite: bool,
}

impl SyncCollectionRequest {
    /// Creates a request for an initial or incremental sync.
    ///
    /// A `None` token requests the initial sync.
    #[must_use]
    pub fn new(sync_token: Option<&str>) -> Self {
        Self {
            sync_token: sync_token.map(str::to_string),
            props: Vec::new(),
            infinite: false,
        }
    }

    /// Adds a property to include for changed resources.
    pub fn add_property(&mut self, prop: QName) -> &mut Self {
        self.props.push(prop);
        self
    }

    /// Requests `sync-level` infinite instead of 1.
    pub fn infinite(&mut self) -> &mut Self {
        self.infinite = true;
        self
    }

    /// Builds the XML body for the sync-collection request.
    ///
    /// # Errors
    ///
    /// Returns an error if XML building fails.
    pub fn build(&self) -> Result<String, DavError> {
        let mut writer = new_writer();
        writer.write_event(Event::Start(root_element("D:sync-collection", &[])))?;

        write_text_elem(
            &mut writer,
            "D:sync-token",
            self.sync_token.as_deref().unwrap_or(""),
        )?;
        write_text_elem(
            &mut writer,
            "D:sync-level",
            if self.infinite { "infinite" } else { "1" },
        )?;

        writer.write_event(Event::Start(BytesStart::new("D:prop")))?;
        if self.props.is_empty() {
            write_empty(&mut writer, "D:getetag")?;
            write_empty(&mut writer, "C:calendar-data")?;
        } else {
            for prop in &self.props {
                write_empty(&mut writer, &prefixed(prop))?;
            }
        }
        writer.write_event(Event::End(BytesEnd::new("D:prop")))?;

        writer.write_event(Event::End(BytesEnd::new("D:sync-collection")))?;
        finish(writer)
    }
}

/// Free/busy query (REPORT) request builder.
#[derive(Debug)]
pub struct FreeBusyQueryRequest {
    start: String,
    end: String,
}

impl FreeBusyQueryRequest {
    /// Creates a new free/busy query for the given UTC range.
    #[must_use]
    pub fn new(start: &str, end: &str) -> Self {
        Self {
            start: start.to_string(),
            end: end.to_string(),
        }
    }

    /// Builds the XML body for the free/busy query request.
    ///
    /// # Errors
    ///
    /// Returns an error if XML building fails.
    pub fn build(&self) -> Result<String, DavError> {
        let mut writer = new_writer();
        writer.write_event(Event::Start(root_element("C:free-busy-query", &[])))?;

        let mut time_range = BytesStart::new("C:time-range");
        time_range.push_attribute(("start", self.start.as_str()));
        time_range.push_attribute(("end", self.end.as_str()));
        writer.write_event(Event::Empty(time_range))?;

        writer.write_event(Event::End(BytesEnd::new("C:free-busy-query")))?;
        finish(writer)
    }
}

/// MKCALENDAR request builder.
#[derive(Debug, Default)]
pub struct MkCalendarRequest {
    display_name: Option<String>,
    description: Option<String>,
    supported_components: Vec<String>,
    timezone: Option<String>,
}

impl MkCalendarRequest {
    /// Creates a new MKCALENDAR request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the calendar display name.
    pub fn display_name(&mut self, name: &str) -> &mut Self {
        self.display_name = Some(name.to_string());
        self
    }

    /// Sets the calendar description.
    pub fn description(&mut self, description: &str) -> &mut Self {
        self.description = Some(description.to_string());
        self
    }

    /// Restricts the supported component set (`VEVENT`, `VTODO`, ...).
    pub fn supported_components(&mut self, components: &[&str]) -> &mut Self {
        self.supported_components = components.iter().map(|c| (*c).to_string()).collect();
        self
    }

    /// Sets the calendar timezone (a VTIMEZONE iCalendar snippet).
    pub fn timezone(&mut self, tz: &str) -> &mut Self {
        self.timezone = Some(tz.to_string());
        self
    }

    /// Builds the XML body, or `None` when no property was set (an empty
    /// MKCALENDAR body is sent as no body at all).
    ///
    /// # Errors
    ///
    /// Returns an error if XML building fails.
    pub fn build(&self) -> Result<Option<String>, DavError> {
        if self.display_name.is_none()
            && self.description.is_none()
            && self.supported_components.is_empty()
            && self.timezone.is_none()
        {
            return Ok(None);
        }

        let mut writer = new_writer();
        writer.write_event(Event::Start(root_element("C:mkcalendar", &[])))?;
        writer.write_event(Event::Start(BytesStart::new("D:set")))?;
        writer.write_event(Event::Start(BytesStart::new("D:prop")))?;

        if let Some(name) = &self.display_name {
            write_text_elem(&mut writer, "D:displayname", name)?;
        }
        if let Some(description) = &self.description {
            write_text_elem(&mut writer, "C:calendar-description", description)?;
        }
        if !self.supported_components.is_empty() {
            writer.write_event(Event::Start(BytesStart::new(
                "C:supported-calendar-component-set",
            )))?;
            for comp in &self.supported_components {
                let mut elem = BytesStart::new("C:comp");
                elem.push_attribute(("name", comp.as_str()));
                writer.write_event(Event::Empty(elem))?;
            }
            writer.write_event(Event::End(BytesEnd::new(
                "C:supported-calendar-component-set",
            )))?;
        }
        if let Some(tz) = &self.timezone {
            write_text_elem(&mut writer, "C:calendar-timezone", tz)?;
        }

        writer.write_event(Event::End(BytesEnd::new("D:prop")))?;
        writer.write_event(Event::End(BytesEnd::new("D:set")))?;
        writer.write_event(Event::End(BytesEnd::new("C:mkcalendar")))?;
        finish(writer).map(Some)
    }
}

/// Extended MKCOL request builder (plain WebDAV collection).
#[derive(Debug, Default)]
pub struct MkColRequest {
    display_name: Option<String>,
}

impl MkColRequest {
    /// Creates a new MKCOL request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the collection display name.
    pub fn display_name(&mut self, name: &str) -> &mut Self {
        self.display_name = Some(name.to_string());
        self
    }

    /// Builds the XML body, or `None` when a bare MKCOL suffices.
    ///
    /// # Errors
    ///
    /// Returns an error if XML building fails.
    pub fn build(&self) -> Result<Option<String>, DavError> {
        let Some(name) = &self.display_name else {
            return Ok(None);
        };

        let mut writer = new_writer();
        writer.write_event(Event::Start(root_element("D:mkcol", &[])))?;
        writer.write_event(Event::Start(BytesStart::new("D:set")))?;
        writer.write_event(Event::Start(BytesStart::new("D:prop")))?;
        writer.write_event(Event::Start(BytesStart::new("D:resourcetype")))?;
        writer.write_event(Event::Empty(BytesStart::new("D:collection")))?;
        writer.write_event(Event::End(BytesEnd::new("D:resourcetype")))?;
        write_text_elem(&mut writer, "D:displayname", name)?;
        writer.write_event(Event::End(BytesEnd::new("D:prop")))?;
        writer.write_event(Event::End(BytesEnd::new("D:set")))?;
        writer.write_event(Event::End(BytesEnd::new("D:mkcol")))?;
        finish(writer).map(Some)
    }
}
