// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

//! Calendar collections, scheduling mailboxes and synchronization.

use std::collections::BTreeMap;

use jiff::Timestamp;
use tracing::warn;

use crate::client::Client;
use crate::davobject::DavResource;
use crate::error::DavError;
use crate::object::{CalendarObject, ComponentKind};
use crate::ops;
use crate::protocol::{Depth, ProtocolClient};
use crate::request::{CalendarQueryRequest, FilterOp, PropFilter};
use crate::search::CalendarSearcher;
use crate::types::PropValue;
use crate::url::DavUrl;
use crate::xml::QName;

/// A calendar collection on the server.
#[derive(Debug, Clone)]
pub struct Calendar {
    res: DavResource,
    display_name: Option<String>,
}

/// One synchronization delta.
#[derive(Debug, Default)]
pub struct SyncBatch {
    /// Created or changed objects.
    pub objects: Vec<CalendarObject>,
    /// Hrefs that disappeared since the previous token.
    pub deleted: Vec<String>,
    /// Token to pass on the next call.
    pub sync_token: String,
}

impl Calendar {
    pub(crate) fn new(client: Client, url: DavUrl) -> Self {
        Self {
            res: DavResource::new(client, url),
            display_name: None,
        }
    }

    pub(crate) fn with_details(
        client: Client,
        url: DavUrl,
        display_name: Option<String>,
        parent: Option<DavUrl>,
    ) -> Self {
        let mut res = DavResource::new(client, url);
        if let Some(parent) = parent {
            res = res.with_parent(parent);
        }
        Self { res, display_name }
    }

    /// The calendar URL.
    #[must_use]
    pub fn url(&self) -> &DavUrl {
        self.res.url()
    }

    /// The calendar id: the last path segment of its URL.
    #[must_use]
    pub fn id(&self) -> Option<String> {
        ops::calendar_id_from_url(&self.res.url().to_string())
    }

    /// The display name observed when the calendar was listed.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Access to the underlying resource behavior
    /// (properties, children, delete).
    pub fn resource(&mut self) -> &mut DavResource {
        &mut self.res
    }

    pub(crate) fn client(&self) -> &Client {
        self.res.client()
    }

    /// Deletes the calendar.
    ///
    /// # Errors
    ///
    /// See [`DavResource::delete`].
    pub async fn delete(&self) -> Result<(), DavError> {
        self.res.delete().await
    }

    /// The component types this calendar accepts.
    ///
    /// # Errors
    ///
    /// Propagates PROPFIND errors.
    pub async fn get_supported_components(&mut self) -> Result<Vec<String>, DavError> {
        Ok(self
            .res
            .get_property(
                &QName::caldav("supported-calendar-component-set"),
                true,
            )
            .await?
            .and_then(|v| v.as_list().map(<[String]>::to_vec))
            .unwrap_or_default())
    }

    async fn save_object(
        &self,
        kind: ComponentKind,
        data: &str,
    ) -> Result<CalendarObject, DavError> {
        let mut object = CalendarObject::new(
            self.client().clone(),
            self.res.url().clone(),
            kind,
        );
        object.set_raw(data.to_string());
        object.save_default().await?;
        Ok(object)
    }

    /// Stores an event from raw iCalendar text.
    ///
    /// # Errors
    ///
    /// Propagates save errors.
    pub async fn save_event(&self, data: &str) -> Result<CalendarObject, DavError> {
        self.save_object(ComponentKind::Event, data).await
    }

    /// Stores a todo from raw iCalendar text.
    ///
    /// # Errors
    ///
    /// Propagates save errors.
    pub async fn save_todo(&self, data: &str) -> Result<CalendarObject, DavError> {
        self.save_object(ComponentKind::Todo, data).await
    }

    /// Stores a journal from raw iCalendar text.
    ///
    /// # Errors
    ///
    /// Propagates save errors.
    pub async fn save_journal(&self, data: &str) -> Result<CalendarObject, DavError> {
        self.save_object(ComponentKind::Journal, data).await
    }

    /// Runs a query described by a [`CalendarSearcher`].
    ///
    /// # Errors
    ///
    /// Propagates REPORT and parse errors.
    pub async fn search(
        &self,
        searcher: &CalendarSearcher,
    ) -> Result<Vec<CalendarObject>, DavError> {
        crate::search::execute(self, searcher).await
    }

    /// All events of the calendar.
    ///
    /// # Errors
    ///
    /// Propagates search errors.
    pub async fn events(&self) -> Result<Vec<CalendarObject>, DavError> {
        self.search(&CalendarSearcher::new().event()).await
    }

    /// Todos, pending ones only unless `include_completed`, sorted by due
    /// date then priority.
    ///
    /// # Errors
    ///
    /// Propagates search errors.
    pub async fn todos(
        &self,
        include_completed: bool,
    ) -> Result<Vec<CalendarObject>, DavError> {
        let mut searcher = CalendarSearcher::new().todo().sort_by(&["due", "priority"]);
        if include_completed {
            searcher = searcher.include_completed();
        }
        self.search(&searcher).await
    }

    /// All journals of the calendar.
    ///
    /// # Errors
    ///
    /// Propagates search errors.
    pub async fn journals(&self) -> Result<Vec<CalendarObject>, DavError> {
        self.search(&CalendarSearcher::new().journal()).await
    }

    /// Returns an unloaded handle for an object below this calendar,
    /// without touching the network.
    ///
    /// # Errors
    ///
    /// Returns an error when the href cannot be joined.
    pub fn object(&self, href: &str) -> Result<CalendarObject, DavError> {
        CalendarObject::from_query_result(
            self.client().clone(),
            self.res.url().clone(),
            href,
            None,
            None,
        )
    }

    pub(crate) async fn object_by_uid_opt(
        &self,
        kind: Option<ComponentKind>,
        uid: &str,
    ) -> Result<Option<CalendarObject>, DavError> {
        let mut query = CalendarQueryRequest::new().prop_filter(PropFilter {
            name: "UID".to_string(),
            op: FilterOp::Equals {
                pattern: uid.to_string(),
                case_sensitive: true,
                negate: false,
            },
            param_filters: Vec::new(),
        });
        if let Some(kind) = kind {
            query = query.component(kind.component_name());
        }

        let request = self
            .client()
            .protocol()
            .calendar_query_request(&self.res.url().to_string(), &query)?;
        let response = self.client().request(request).await?;
        let results = ProtocolClient::parse_calendar_query(&response)?;

        for entry in results {
            if entry.calendar_data.is_none() {
                continue;
            }
            let object = CalendarObject::from_query_result(
                self.client().clone(),
                self.res.url().clone(),
                &entry.href,
                entry.etag.clone(),
                entry.calendar_data.clone(),
            )?;
            // Broken filter implementations may ignore the UID match.
            if object.uid().as_deref() == Some(uid) {
                return Ok(Some(object));
            }
        }
        Ok(None)
    }

    /// Fetches the object carrying `uid`, optionally restricted to one
    /// component kind.
    ///
    /// # Errors
    ///
    /// Returns [`DavError::NotFound`] when nothing carries the UID.
    pub async fn object_by_uid(
        &self,
        kind: Option<ComponentKind>,
        uid: &str,
    ) -> Result<CalendarObject, DavError> {
        self.object_by_uid_opt(kind, uid)
            .await?
            .ok_or_else(|| DavError::NotFound {
                url: format!("{} (uid {uid})", self.res.url()),
            })
    }

    /// Fetches the event carrying `uid`.
    ///
    /// # Errors
    ///
    /// See [`Self::object_by_uid`].
    pub async fn event_by_uid(&self, uid: &str) -> Result<CalendarObject, DavError> {
        self.object_by_uid(Some(ComponentKind::Event), uid).await
    }

    /// Fetches the todo carrying `uid`.
    ///
    /// # Errors
    ///
    /// See [`Self::object_by_uid`].
    pub async fn todo_by_uid(&self, uid: &str) -> Result<CalendarObject, DavError> {
        self.object_by_uid(Some(ComponentKind::Todo), uid).await
    }

    /// Fetches the journal carrying `uid`.
    ///
    /// # Errors
    ///
    /// See [`Self::object_by_uid`].
    pub async fn journal_by_uid(&self, uid: &str) -> Result<CalendarObject, DavError> {
        self.object_by_uid(Some(ComponentKind::Journal), uid).await
    }

    /// Runs a free-busy-query REPORT over the given range.
    ///
    /// # Errors
    ///
    /// Propagates REPORT errors.
    pub async fn freebusy_request(
        &self,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<CalendarObject, DavError> {
        let request = self.client().protocol().freebusy_request(
            &self.res.url().to_string(),
            &ops::format_ical_utc(start),
            &ops::format_ical_utc(end),
        )?;
        let response = self.client().request(request).await?;
        if !response.ok() && !response.is_multistatus() {
            return Err(DavError::Response(format!(
                "free-busy-query answered {}",
                response.status
            )));
        }
        let mut object = CalendarObject::new(
            self.client().clone(),
            self.res.url().clone(),
            ComponentKind::FreeBusy,
        );
        object.set_raw(response.text());
        Ok(object)
    }

    /// Fetches changes since `sync_token` (`None` for the initial sync).
    ///
    /// Uses the `sync-collection` REPORT when the server offers it; when
    /// the server rejects the report, or a previous call already fell back,
    /// a deterministic stand-in token over `(url, etag)` pairs is used. The
    /// fallback cannot localize deltas: on any change it reports the full
    /// object list as changed, and without etags modifications become
    /// undetectable.
    ///
    /// # Errors
    ///
    /// Propagates REPORT, PROPFIND and parse errors.
    pub async fn objects_by_sync_token(
        &self,
        sync_token: Option<&str>,
        load_objects: bool,
    ) -> Result<SyncBatch, DavError> {
        let fake_only = self.client().quirks().fake_sync_token_only
            || sync_token.is_some_and(ops::is_fake_sync_token);

        if !fake_only {
            let request = self
                .client()
                .protocol()
                .sync_collection_request(&self.res.url().to_string(), sync_token)?;
            let response = self.client().request(request).await?;
            match response.status {
                400 | 403 | 501 => {
                    warn!(
                        status = response.status,
                        "sync-collection rejected, using the fake-token fallback"
                    );
                }
                _ => {
                    let result = ProtocolClient::parse_sync_collection(&response)?;
                    let mut objects = Vec::new();
                    for entry in result.changed {
                        objects.push(CalendarObject::from_query_result(
                            self.client().clone(),
                            self.res.url().clone(),
                            &entry.href,
                            entry.etag,
                            entry.calendar_data,
                        )?);
                    }
                    if load_objects {
                        for object in &mut objects {
                            if !object.is_loaded() {
                                object.load(false).await?;
                            }
                        }
                    }
                    return Ok(SyncBatch {
                        objects,
                        deleted: result.deleted,
                        sync_token: result.sync_token.unwrap_or_default(),
                    });
                }
            }
        }

        self.sync_by_fake_token(sync_token, load_objects).await
    }

    async fn sync_by_fake_token(
        &self,
        sync_token: Option<&str>,
        load_objects: bool,
    ) -> Result<SyncBatch, DavError> {
        let query = CalendarQueryRequest::new().etags_only();
        let request = self
            .client()
            .protocol()
            .calendar_query_request(&self.res.url().to_string(), &query)?;
        let response = self.client().request(request).await?;
        let mut results = ProtocolClient::parse_calendar_query(&response)?;

        if results.iter().any(|r| r.etag.is_none()) {
            let etags = self.fetch_etags().await?;
            for entry in &mut results {
                if entry.etag.is_none() {
                    entry.etag = etags.get(&entry.href).cloned();
                }
            }
            if results.iter().any(|r| r.etag.is_none()) {
                warn!("etags unavailable, sync degrades to URL-only digesting");
            }
        }

        let mut pairs = Vec::new();
        for entry in &results {
            let url = self.res.url().join(&entry.href)?;
            pairs.push((
                url.canonicalize().to_string(),
                entry.etag.clone().unwrap_or_default(),
            ));
        }
        let new_token = ops::generate_fake_sync_token(&pairs);

        if sync_token == Some(new_token.as_str()) {
            return Ok(SyncBatch {
                objects: Vec::new(),
                deleted: Vec::new(),
                sync_token: new_token,
            });
        }

        let mut objects = Vec::new();
        for entry in &results {
            objects.push(CalendarObject::from_query_result(
                self.client().clone(),
                self.res.url().clone(),
                &entry.href,
                entry.etag.clone(),
                entry.calendar_data.clone(),
            )?);
        }
        if load_objects {
            for object in &mut objects {
                if !object.is_loaded() {
                    object.load(false).await?;
                }
            }
        }

        Ok(SyncBatch {
            objects,
            deleted: Vec::new(),
            sync_token: new_token,
        })
    }

    async fn fetch_etags(&self) -> Result<BTreeMap<String, String>, DavError> {
        let request = self.client().protocol().propfind_request(
            &self.res.url().to_string(),
            &[QName::dav("getetag")],
            Depth::One,
        )?;
        let response = self.client().request(request).await?;
        let results = ProtocolClient::parse_propfind(&response)?;
        let key = QName::dav("getetag").to_string();
        Ok(results
            .into_iter()
            .filter_map(|entry| {
                let etag = entry
                    .properties
                    .get(&key)
                    .and_then(PropValue::as_text)
                    .map(str::to_string)?;
                Some((entry.href, etag))
            })
            .collect())
    }
}

/// The scheduling inbox: incoming invitations and replies (RFC 6638).
#[derive(Debug, Clone)]
pub struct ScheduleInbox {
    calendar: Calendar,
}

impl ScheduleInbox {
    pub(crate) fn new(calendar: Calendar) -> Self {
        Self { calendar }
    }

    /// The underlying calendar collection.
    #[must_use]
    pub fn calendar(&self) -> &Calendar {
        &self.calendar
    }

    /// Lists inbox items, loading their payloads when `load` is set.
    ///
    /// # Errors
    ///
    /// Propagates PROPFIND and GET errors.
    pub async fn get_items(&mut self, load: bool) -> Result<Vec<CalendarObject>, DavError> {
        mailbox_items(&mut self.calendar, load).await
    }
}

/// The scheduling outbox: where free-busy requests are posted (RFC 6638).
#[derive(Debug, Clone)]
pub struct ScheduleOutbox {
    calendar: Calendar,
}

impl ScheduleOutbox {
    pub(crate) fn new(calendar: Calendar) -> Self {
        Self { calendar }
    }

    /// The underlying calendar collection.
    #[must_use]
    pub fn calendar(&self) -> &Calendar {
        &self.calendar
    }

    /// Lists outbox items, loading their payloads when `load` is set.
    ///
    /// # Errors
    ///
    /// Propagates PROPFIND and GET errors.
    pub async fn get_items(&mut self, load: bool) -> Result<Vec<CalendarObject>, DavError> {
        mailbox_items(&mut self.calendar, load).await
    }
}

async fn mailbox_items(
    calendar: &mut Calendar,
    load: bool,
) -> Result<Vec<CalendarObject>, DavError> {
    let children = calendar.res.children(None).await?;
    let mut items = Vec::new();
    for child in children {
        if !child.href.ends_with(".ics") {
            continue;
        }
        let mut object = CalendarObject::from_query_result(
            calendar.client().clone(),
            calendar.res.url().clone(),
            &child.href,
            None,
            None,
        )?;
        if load {
            object.load(false).await?;
        }
        items.push(object);
    }
    Ok(items)
}
