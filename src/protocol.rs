// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

//! Sans-I/O protocol engine.
//!
//! [`ProtocolClient`] turns typed inputs into [`DavRequest`] values and
//! parses [`DavResponse`] bodies back into typed records. It performs no
//! I/O; the shells in [`crate::http`] and [`crate::blocking`] move the
//! bytes.

use std::collections::BTreeMap;

use crate::error::DavError;
use crate::request::{
    CalendarMultiGetRequest, CalendarQueryRequest, FreeBusyQueryRequest, MkCalendarRequest,
    MkColRequest, PropFindRequest, PropPatchRequest, SyncCollectionRequest,
};
use crate::response;
use crate::types::{CalendarQueryResult, PropfindResult, SyncCollectionResult};
use crate::url::DavUrl;
use crate::xml::QName;

/// WebDAV/CalDAV HTTP methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum DavMethod {
    Get,
    Put,
    Delete,
    PropFind,
    PropPatch,
    Report,
    MkCalendar,
    MkCol,
    Options,
    Head,
    Move,
    Copy,
    Post,
}

impl DavMethod {
    /// The wire name of the method.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::PropFind => "PROPFIND",
            Self::PropPatch => "PROPPATCH",
            Self::Report => "REPORT",
            Self::MkCalendar => "MKCALENDAR",
            Self::MkCol => "MKCOL",
            Self::Options => "OPTIONS",
            Self::Head => "HEAD",
            Self::Move => "MOVE",
            Self::Copy => "COPY",
            Self::Post => "POST",
        }
    }
}

/// `Depth` header value. Only finite depths are ever issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    /// The resource itself.
    Zero,
    /// The resource and its direct children.
    One,
}

impl Depth {
    /// The wire form of the depth.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Zero => "0",
            Self::One => "1",
        }
    }
}

/// An HTTP request to be made. Pure data, no I/O.
#[derive(Debug, Clone)]
pub struct DavRequest {
    /// HTTP method.
    pub method: DavMethod,
    /// Full URL for the request.
    pub url: String,
    /// Headers, in insertion order.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Option<Vec<u8>>,
}

impl DavRequest {
    /// Creates a bodyless request.
    #[must_use]
    pub fn new(method: DavMethod, url: &str) -> Self {
        Self {
            method,
            url: url.to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Returns a copy with one more header.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Returns a copy with the given body.
    #[must_use]
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Looks a header up, case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// An HTTP response received. Pure data, no I/O.
#[derive(Debug, Clone)]
pub struct DavResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: BTreeMap<String, String>,
    /// Response body.
    pub body: Vec<u8>,
}

impl DavResponse {
    /// True if the status indicates success (2xx).
    #[must_use]
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// True for a 207 Multi-Status response.
    #[must_use]
    pub fn is_multistatus(&self) -> bool {
        self.status == 207
    }

    /// Looks a header up, case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The body as UTF-8 text.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";
const CALENDAR_CONTENT_TYPE: &str = "text/calendar; charset=utf-8";
const ACCEPT: &str = "text/xml, text/calendar";

/// Stateless request factory bound to a base URL.
///
/// Paths given to the builders may be absolute URLs, absolute paths, or
/// paths relative to the base URL.
#[derive(Debug, Clone)]
pub struct ProtocolClient {
    base_url: DavUrl,
}

impl ProtocolClient {
    /// Creates a protocol client for a server base URL.
    #[must_use]
    pub fn new(base_url: DavUrl) -> Self {
        Self { base_url }
    }

    /// The base URL requests are resolved against.
    #[must_use]
    pub fn base_url(&self) -> &DavUrl {
        &self.base_url
    }

    /// Resolves a path against the base URL.
    ///
    /// # Errors
    ///
    /// Returns an error when an absolute `path` conflicts with the base
    /// URL's connection details.
    pub fn resolve(&self, path: &str) -> Result<String, DavError> {
        if path.is_empty() {
            return Ok(self.base_url.to_string());
        }
        Ok(self.base_url.join(path)?.to_string())
    }

    fn xml_request(
        &self,
        method: DavMethod,
        path: &str,
        body: String,
    ) -> Result<DavRequest, DavError> {
        Ok(DavRequest::new(method, &self.resolve(path)?)
            .with_header("Content-Type", XML_CONTENT_TYPE)
            .with_header("Accept", ACCEPT)
            .with_body(body.into_bytes()))
    }

    /// Builds a PROPFIND request.
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not resolve or XML building fails.
    pub fn propfind_request(
        &self,
        path: &str,
        props: &[QName],
        depth: Depth,
    ) -> Result<DavRequest, DavError> {
        let mut builder = PropFindRequest::new();
        for prop in props {
            builder.add_property(prop.clone());
        }
        Ok(self
            .xml_request(DavMethod::PropFind, path, builder.build()?)?
            .with_header("Depth", depth.as_str()))
    }

    /// Builds a PROPPATCH request.
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not resolve or XML building fails.
    pub fn proppatch_request(
        &self,
        path: &str,
        set: &[(QName, String)],
        remove: &[QName],
    ) -> Result<DavRequest, DavError> {
        let mut builder = PropPatchRequest::new();
        for (prop, value) in set {
            builder.set_property(prop.clone(), value);
        }
        for prop in remove {
            builder.remove_property(prop.clone());
        }
        self.xml_request(DavMethod::PropPatch, path, builder.build()?)
    }

    /// Builds a calendar-query REPORT request.
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not resolve or XML building fails.
    pub fn calendar_query_request(
        &self,
        path: &str,
        query: &CalendarQueryRequest,
    ) -> Result<DavRequest, DavError> {
        Ok(self
            .xml_request(DavMethod::Report, path, query.build()?)?
            .with_header("Depth", Depth::One.as_str()))
    }

    /// Builds a calendar-multiget REPORT request.
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not resolve or XML building fails.
    pub fn calendar_multiget_request(
        &self,
        path: &str,
        hrefs: &[String],
    ) -> Result<DavRequest, DavError> {
        let mut builder = CalendarMultiGetRequest::new();
        for href in hrefs {
            builder.add_href(href);
        }
        Ok(self
            .xml_request(DavMethod::Report, path, builder.build()?)?
            .with_header("Depth", Depth::One.as_str()))
    }

    /// Builds a sync-collection REPORT request.
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not resolve or XML building fails.
    pub fn sync_collection_request(
        &self,
        path: &str,
        sync_token: Option<&str>,
    ) -> Result<DavRequest, DavError> {
        let builder = SyncCollectionRequest::new(sync_token);
        Ok(self
            .xml_request(DavMethod::Report, path, builder.build()?)?
            .with_header("Depth", Depth::One.as_str()))
    }

    /// Builds a free-busy-query REPORT request.
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not resolve or XML building fails.
    pub fn freebusy_request(
        &self,
        path: &str,
        start: &str,
        end: &str,
    ) -> Result<DavRequest, DavError> {
        let builder = FreeBusyQueryRequest::new(start, end);
        Ok(self
            .xml_request(DavMethod::Report, path, builder.build()?)?
            .with_header("Depth", Depth::One.as_str()))
    }

    /// Builds a MKCALENDAR request.
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not resolve or XML building fails.
    pub fn mkcalendar_request(
        &self,
        path: &str,
        body: &MkCalendarRequest,
    ) -> Result<DavRequest, DavError> {
        let request = DavRequest::new(DavMethod::MkCalendar, &self.resolve(path)?)
            .with_header("Content-Type", "application/xml");
        Ok(match body.build()? {
            Some(xml) => request.with_body(xml.into_bytes()),
            None => request,
        })
    }

    /// Builds a MKCOL request.
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not resolve or XML building fails.
    pub fn mkcol_request(&self, path: &str, body: &MkColRequest) -> Result<DavRequest, DavError> {
        let request = DavRequest::new(DavMethod::MkCol, &self.resolve(path)?)
            .with_header("Content-Type", "application/xml");
        Ok(match body.build()? {
            Some(xml) => request.with_body(xml.into_bytes()),
            None => request,
        })
    }

    /// Builds a GET request.
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not resolve.
    pub fn get_request(&self, path: &str) -> Result<DavRequest, DavError> {
        Ok(DavRequest::new(DavMethod::Get, &self.resolve(path)?)
            .with_header("Accept", ACCEPT))
    }

    /// Builds a PUT request for a calendar object.
    ///
    /// `etag` adds `If-Match` for a conditional update; `no_overwrite` adds
    /// `If-None-Match: *` so an existing object is never replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not resolve.
    pub fn put_request(
        &self,
        path: &str,
        body: Vec<u8>,
        etag: Option<&str>,
        no_overwrite: bool,
    ) -> Result<DavRequest, DavError> {
        let mut request = DavRequest::new(DavMethod::Put, &self.resolve(path)?)
            .with_header("Content-Type", CALENDAR_CONTENT_TYPE)
            .with_body(body);
        if let Some(etag) = etag {
            request = request.with_header("If-Match", etag);
        }
        if no_overwrite {
            request = request.with_header("If-None-Match", "*");
        }
        Ok(request)
    }

    /// Builds a DELETE request, conditional when an etag is given.
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not resolve.
    pub fn delete_request(&self, path: &str, etag: Option<&str>) -> Result<DavRequest, DavError> {
        let mut request = DavRequest::new(DavMethod::Delete, &self.resolve(path)?);
        if let Some(etag) = etag {
            request = request.with_header("If-Match", etag);
        }
        Ok(request)
    }

    /// Builds an OPTIONS request.
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not resolve.
    pub fn options_request(&self, path: &str) -> Result<DavRequest, DavError> {
        Ok(DavRequest::new(DavMethod::Options, &self.resolve(path)?))
    }

    /// Parses a PROPFIND response.
    ///
    /// # Errors
    ///
    /// Propagates parser errors; see [`response::parse_propfind_response`].
    pub fn parse_propfind(response: &DavResponse) -> Result<Vec<PropfindResult>, DavError> {
        response::parse_propfind_response(&response.text(), response.status)
    }

    /// Parses a calendar-query REPORT response.
    ///
    /// # Errors
    ///
    /// Propagates parser errors.
    pub fn parse_calendar_query(
        response: &DavResponse,
    ) -> Result<Vec<CalendarQueryResult>, DavError> {
        response::parse_calendar_query_response(&response.text(), response.status)
    }

    /// Parses a calendar-multiget REPORT response.
    ///
    /// # Errors
    ///
    /// Propagates parser errors.
    pub fn parse_calendar_multiget(
        response: &DavResponse,
    ) -> Result<Vec<CalendarQueryResult>, DavError> {
        response::parse_calendar_multiget_response(&response.text(), response.status)
    }

    /// Parses a sync-collection REPORT response.
    ///
    /// # Errors
    ///
    /// Propagates parser errors.
    pub fn parse_sync_collection(
        response: &DavResponse,
    ) -> Result<SyncCollectionResult, DavError> {
        response::parse_sync_collection_response(&response.text(), response.status)
    }
}
