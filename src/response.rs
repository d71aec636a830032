// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

//! Response parsers for WebDAV/CalDAV operations.
//!
//! All functions here are pure: XML text in, typed records out. Hrefs are
//! percent-decoded and reduced to path form, and per-resource status lines
//! are validated against the small set multistatus allows.

use std::collections::BTreeMap;

use percent_encoding::percent_decode_str;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;

use crate::error::DavError;
use crate::types::{CalendarQueryResult, PropValue, PropfindResult, SyncCollectionResult};
use crate::url::DavUrl;
use crate::xml::{ns, QName};

type Reader<'a> = NsReader<&'a [u8]>;

/// A parsed 207 Multi-Status body.
#[derive(Debug, Clone, Default)]
pub struct Multistatus {
    /// Per-resource entries.
    pub responses: Vec<PropfindResult>,
    /// Top-level `DAV:sync-token`, when present.
    pub sync_token: Option<String>,
}

fn resolve<'a>(reader: &Reader<'a>, e: &BytesStart<'_>) -> QName {
    let (res, local) = reader.resolve_element(e.name());
    let ns = match res {
        ResolveResult::Bound(Namespace(bytes)) => String::from_utf8_lossy(bytes).into_owned(),
        _ => String::new(),
    };
    QName::new(&ns, &String::from_utf8_lossy(local.as_ref()))
}

fn read_inner_text(reader: &mut Reader<'_>, end_local: &[u8]) -> Result<String, DavError> {
    let mut text = String::new();
    let mut depth = 0u32;
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(_) => depth += 1,
            Event::End(ref e) => {
                if depth == 0 && e.local_name().into_inner() == end_local {
                    break;
                }
                depth = depth.saturating_sub(1);
            }
            Event::Text(e) => {
                let decoded = e.decode().map_err(|e| DavError::Xml(e.to_string()))?;
                let unescaped = quick_xml::escape::unescape(&decoded)
                    .map_err(|e| DavError::Xml(e.to_string()))?;
                text.push_str(&unescaped);
            }
            Event::CData(e) => {
                text.push_str(&String::from_utf8_lossy(&e.into_inner()));
            }
            Event::Eof => return Err(DavError::Xml("unexpected EOF".to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(text)
}

/// Decodes an href the way servers should have sent it: percent-decode and
/// reduce absolute URLs to their path.
///
/// The decode pass also repairs double-encoded hrefs from servers that
/// quote the quoting (`%2540` comes out as `%40`).
#[must_use]
pub fn decode_href(raw: &str) -> String {
    let trimmed = raw.trim();
    let decoded = percent_decode_str(trimmed)
        .decode_utf8()
        .map_or_else(|_| trimmed.to_string(), |c| c.into_owned());
    if decoded.contains("://") {
        if let Ok(url) = DavUrl::parse(&decoded) {
            let path = url.path();
            return percent_decode_str(&path)
                .decode_utf8()
                .map_or(path.clone(), |c| c.into_owned());
        }
    }
    decoded
}

fn validate_status(status: &str) -> Result<(), DavError> {
    const ACCEPTABLE: [&str; 4] = [" 200 ", " 201 ", " 207 ", " 404 "];
    let padded = format!("{} ", status.trim_end());
    if ACCEPTABLE.iter().any(|code| padded.contains(code)) {
        Ok(())
    } else {
        Err(DavError::Response(status.to_string()))
    }
}

fn status_to_code(status: &str) -> u16 {
    status
        .split_whitespace()
        .nth(1)
        .and_then(|c| c.parse().ok())
        .unwrap_or(200)
}

/// Parses a 207 Multi-Status response body.
///
/// Tolerates a surrounding wrapper element around `DAV:multistatus`.
///
/// # Errors
///
/// Returns an error on malformed XML or a per-resource status line outside
/// the allowed set (200/201/207/404).
pub fn parse_multistatus(body: &str) -> Result<Multistatus, DavError> {
    let mut reader = NsReader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut result = Multistatus::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) => {
                let name = resolve(&reader, e);
                match (name.ns(), name.local()) {
                    (ns::DAV, "response") => {
                        let entry = parse_response(&mut reader, body)?;
                        result.responses.push(entry);
                    }
                    (ns::DAV, "sync-token") => {
                        result.sync_token = Some(read_inner_text(&mut reader, b"sync-token")?);
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(result)
}

fn parse_response(reader: &mut Reader<'_>, input: &str) -> Result<PropfindResult, DavError> {
    let mut href = String::new();
    let mut status_code = 200u16;
    let mut properties = BTreeMap::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) => {
                let name = resolve(reader, e);
                match (name.ns(), name.local()) {
                    (ns::DAV, "href") => {
                        href = decode_href(&read_inner_text(reader, b"href")?);
                    }
                    (ns::DAV, "status") => {
                        let status = read_inner_text(reader, b"status")?;
                        validate_status(&status)?;
                        status_code = status_to_code(&status);
                    }
                    (ns::DAV, "propstat") => {
                        parse_propstat(reader, input, &mut properties)?;
                    }
                    _ => {
                        let owned = e.to_owned();
                        reader.read_to_end_into(owned.name(), &mut Vec::new())?;
                    }
                }
            }
            Event::End(ref e) if e.local_name().into_inner() == b"response" => break,
            Event::Eof => return Err(DavError::Xml("unexpected EOF".to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(PropfindResult {
        href,
        properties,
        status: status_code,
    })
}

fn parse_propstat(
    reader: &mut Reader<'_>,
    input: &str,
    out: &mut BTreeMap<String, PropValue>,
) -> Result<(), DavError> {
    let mut collected: Vec<(QName, PropValue)> = Vec::new();
    let mut not_found = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) => {
                let name = resolve(reader, e);
                match (name.ns(), name.local()) {
                    (ns::DAV, "prop") => parse_prop_children(reader, input, &mut collected)?,
                    (ns::DAV, "status") => {
                        let status = read_inner_text(reader, b"status")?;
                        validate_status(&status)?;
                        if status_to_code(&status) == 404 {
                            not_found = true;
                        }
                    }
                    _ => {
                        let owned = e.to_owned();
                        reader.read_to_end_into(owned.name(), &mut Vec::new())?;
                    }
                }
            }
            Event::End(ref e) if e.local_name().into_inner() == b"propstat" => break,
            Event::Eof => return Err(DavError::Xml("unexpected EOF".to_string())),
            _ => {}
        }
        buf.clear();
    }

    if !not_found {
        for (name, value) in collected {
            out.insert(name.to_string(), value);
        }
    }
    Ok(())
}

fn parse_prop_children(
    reader: &mut Reader<'_>,
    input: &str,
    out: &mut Vec<(QName, PropValue)>,
) -> Result<(), DavError> {
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) => {
                let name = resolve(reader, e);
                let value = parse_prop_value(reader, input, &name, e)?;
                out.push((name, value));
            }
            Event::Empty(ref e) => {
                let name = resolve(reader, e);
                out.push((name, PropValue::Empty));
            }
            Event::End(ref e) if e.local_name().into_inner() == b"prop" => break,
            Event::Eof => return Err(DavError::Xml("unexpected EOF".to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(())
}

fn parse_prop_value(
    reader: &mut Reader<'_>,
    input: &str,
    name: &QName,
    start: &BytesStart<'_>,
) -> Result<PropValue, DavError> {
    match (name.ns(), name.local()) {
        (ns::DAV, "resourcetype") => {
            Ok(PropValue::ComponentList(collect_child_names(reader, b"resourcetype")?))
        }
        (ns::CALDAV, "supported-calendar-component-set") => Ok(PropValue::ComponentList(
            collect_name_attributes(reader, b"supported-calendar-component-set")?,
        )),
        (ns::DAV, "supported-report-set") => {
            let names = collect_report_names(reader)?;
            Ok(PropValue::ComponentList(names))
        }
        (ns::CALDAV, "calendar-home-set")
        | (ns::DAV, "current-user-principal")
        | (ns::DAV, "principal-URL")
        | (ns::CALDAV, "schedule-inbox-URL")
        | (ns::CALDAV, "schedule-outbox-URL") => {
            let hrefs = collect_hrefs(reader, start.local_name().into_inner())?;
            match hrefs.len() {
                0 => Ok(PropValue::Empty),
                1 => Ok(PropValue::Href(
                    hrefs.into_iter().next().map(|(h, _)| h).unwrap_or_default(),
                )),
                _ => Ok(PropValue::HrefList(hrefs.into_iter().map(|(h, _)| h).collect())),
            }
        }
        (ns::CALDAV, "calendar-user-address-set") => {
            let mut hrefs = collect_hrefs(reader, b"calendar-user-address-set")?;
            // Highest `preferred` weight first; iCloud marks the primary one.
            hrefs.sort_by_key(|(_, preferred)| std::cmp::Reverse(*preferred));
            Ok(PropValue::HrefList(hrefs.into_iter().map(|(h, _)| h).collect()))
        }
        _ => {
            let owned = start.to_owned();
            let span = reader.read_to_end(owned.name())?;
            let start_pos = usize::try_from(span.start).unwrap_or(0);
            let end_pos = usize::try_from(span.end).unwrap_or(start_pos);
            let inner = input.get(start_pos..end_pos).unwrap_or("").trim();
            if inner.is_empty() {
                Ok(PropValue::Empty)
            } else if inner.contains('<') {
                Ok(PropValue::Raw(inner.to_string()))
            } else {
                let text = quick_xml::escape::unescape(inner)
                    .map_or_else(|_| inner.to_string(), |c| c.into_owned());
                Ok(PropValue::Text(text))
            }
        }
    }
}

fn collect_child_names(reader: &mut Reader<'_>, end_local: &[u8]) -> Result<Vec<String>, DavError> {
    let mut names = Vec::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) | Event::Empty(ref e) => {
                names.push(resolve(reader, e).to_string());
            }
            Event::End(ref e) if e.local_name().into_inner() == end_local => break,
            Event::Eof => return Err(DavError::Xml("unexpected EOF".to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(names)
}

fn collect_name_attributes(
    reader: &mut Reader<'_>,
    end_local: &[u8],
) -> Result<Vec<String>, DavError> {
    let mut names = Vec::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) | Event::Empty(ref e) => {
                if let Ok(Some(attr)) = e.try_get_attribute("name") {
                    names.push(String::from_utf8_lossy(&attr.value).into_owned());
                }
            }
            Event::End(ref e) if e.local_name().into_inner() == end_local => break,
            Event::Eof => return Err(DavError::Xml("unexpected EOF".to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(names)
}

fn collect_report_names(reader: &mut Reader<'_>) -> Result<Vec<String>, DavError> {
    let mut names = Vec::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let local = e.local_name().into_inner().to_vec();
                if local != b"supported-report" && local != b"report" {
                    names.push(String::from_utf8_lossy(&local).into_owned());
                }
            }
            Event::End(ref e) if e.local_name().into_inner() == b"supported-report-set" => break,
            Event::Eof => return Err(DavError::Xml("unexpected EOF".to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(names)
}

/// Collects nested `DAV:href` texts together with their `preferred`
/// attribute weight.
fn collect_hrefs(
    reader: &mut Reader<'_>,
    end_local: &[u8],
) -> Result<Vec<(String, i64)>, DavError> {
    let mut hrefs = Vec::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) => {
                if e.local_name().into_inner() == b"href" {
                    let preferred = e
                        .try_get_attribute("preferred")
                        .ok()
                        .flatten()
                        .and_then(|a| String::from_utf8_lossy(&a.value).parse().ok())
                        .unwrap_or(0);
                    let text = read_inner_text(reader, b"href")?;
                    hrefs.push((text.trim().to_string(), preferred));
                }
            }
            Event::End(ref e) if e.local_name().into_inner() == end_local => break,
            Event::Eof => return Err(DavError::Xml("unexpected EOF".to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(hrefs)
}

/// Parses a PROPFIND response.
///
/// A 404 yields an empty list; an empty body yields an empty list.
///
/// # Errors
///
/// Returns an error on a non-207/200 status or malformed XML.
pub fn parse_propfind_response(body: &str, status: u16) -> Result<Vec<PropfindResult>, DavError> {
    if status == 404 {
        return Ok(Vec::new());
    }
    if status != 200 && status != 207 {
        return Err(DavError::Response(format!(
            "PROPFIND failed with status {status}"
        )));
    }
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(parse_multistatus(body)?.responses)
}

fn query_result_from(entry: PropfindResult) -> CalendarQueryResult {
    let etag = entry
        .properties
        .get(&QName::dav("getetag").to_string())
        .and_then(|v| v.as_text())
        .map(str::to_string);
    let calendar_data = entry
        .properties
        .get(&QName::caldav("calendar-data").to_string())
        .and_then(|v| v.as_text())
        .map(str::to_string);
    CalendarQueryResult {
        href: entry.href,
        etag,
        calendar_data,
        status: entry.status,
    }
}

/// Parses a calendar-query REPORT response.
///
/// # Errors
///
/// Returns an error on a non-207/200 status or malformed XML.
pub fn parse_calendar_query_response(
    body: &str,
    status: u16,
) -> Result<Vec<CalendarQueryResult>, DavError> {
    if status != 200 && status != 207 {
        return Err(DavError::Response(format!(
            "REPORT failed with status {status}"
        )));
    }
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(parse_multistatus(body)?
        .responses
        .into_iter()
        .map(query_result_from)
        .collect())
}

/// Parses a calendar-multiget REPORT response (same wire shape as a
/// calendar-query).
///
/// # Errors
///
/// Returns an error on a non-207/200 status or malformed XML.
pub fn parse_calendar_multiget_response(
    body: &str,
    status: u16,
) -> Result<Vec<CalendarQueryResult>, DavError> {
    parse_calendar_query_response(body, status)
}

/// Parses a sync-collection REPORT response.
///
/// Per-resource 404 entries go to the deleted list; the top-level
/// `sync-token` becomes the new token.
///
/// # Errors
///
/// Returns an error on a non-207/200 status or malformed XML.
pub fn parse_sync_collection_response(
    body: &str,
    status: u16,
) -> Result<SyncCollectionResult, DavError> {
    if status != 200 && status != 207 {
        return Err(DavError::Response(format!(
            "sync-collection failed with status {status}"
        )));
    }
    if body.trim().is_empty() {
        return Ok(SyncCollectionResult::default());
    }

    let multistatus = parse_multistatus(body)?;
    let mut result = SyncCollectionResult {
        sync_token: multistatus.sync_token,
        ..SyncCollectionResult::default()
    };

    for entry in multistatus.responses {
        if entry.status == 404 {
            result.deleted.push(entry.href);
        } else {
            result.changed.push(query_result_from(entry));
        }
    }

    Ok(result)
}
