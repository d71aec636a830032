// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

//! Calendar objects: events, todos, journals and free/busy results.
//!
//! A [`CalendarObject`] keeps its payload in one of three states: nothing
//! loaded, raw iCalendar text, or the parsed tree. Exactly one state is
//! authoritative at a time; accessors transition between them and
//! invalidate whatever was derived before, so structured edits must go
//! through [`CalendarObject::icalendar_mut`] rather than long-lived
//! references.

use jiff::{SignedDuration, Timestamp};
use tracing::warn;

use crate::calendar::Calendar;
use crate::client::Client;
use crate::error::DavError;
use crate::ops::{self, DeadlinePolicy};
use crate::protocol::{Depth, ProtocolClient};
use crate::url::DavUrl;
use crate::xml::QName;

/// The component kind an object holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    /// A VEVENT.
    Event,
    /// A VTODO.
    Todo,
    /// A VJOURNAL.
    Journal,
    /// A VFREEBUSY.
    FreeBusy,
}

impl ComponentKind {
    /// The iCalendar component name.
    #[must_use]
    pub const fn component_name(self) -> &'static str {
        match self {
            Self::Event => "VEVENT",
            Self::Todo => "VTODO",
            Self::Journal => "VJOURNAL",
            Self::FreeBusy => "VFREEBUSY",
        }
    }

    /// The end-property name paired with DTSTART for this kind.
    #[must_use]
    pub const fn end_property(self) -> &'static str {
        match self {
            Self::Todo => "DUE",
            _ => "DTEND",
        }
    }

    /// Maps a component name back to a kind.
    #[must_use]
    pub fn from_component_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "VEVENT" => Some(Self::Event),
            "VTODO" => Some(Self::Todo),
            "VJOURNAL" => Some(Self::Journal),
            "VFREEBUSY" => Some(Self::FreeBusy),
            _ => None,
        }
    }
}

/// The authoritative payload state.
#[derive(Debug, Default)]
pub enum ObjectData {
    /// Nothing loaded yet.
    #[default]
    Empty,
    /// Raw iCalendar text is authoritative.
    Raw(String),
    /// The parsed tree is authoritative.
    Parsed(icalendar::Calendar),
}

impl Clone for ObjectData {
    fn clone(&self) -> Self {
        match self {
            Self::Empty => Self::Empty,
            Self::Raw(raw) => Self::Raw(raw.clone()),
            Self::Parsed(cal) => Self::Parsed(ops::clone_calendar(cal)),
        }
    }
}

/// Which part of a recurrence set a save touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecurrenceScope {
    /// Write only the override carrying this RECURRENCE-ID.
    #[default]
    OnlyThis,
    /// Rebase the whole series on this instance.
    AllRecurrences,
}

/// How to complete a recurring task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RruleMode {
    /// Complete the master and spawn an uncompleted next instance.
    #[default]
    Safe,
    /// Move the whole series forward to the next occurrence.
    ThisAndFuture,
}

/// Options for [`CalendarObject::save`].
#[derive(Debug, Clone, Copy)]
pub struct SaveOptions {
    /// Fail instead of replacing an existing object.
    pub no_overwrite: bool,
    /// Fail instead of creating a missing object.
    pub no_create: bool,
    /// Send `If-Schedule-Tag-Match` with the cached schedule tag.
    pub if_schedule_tag_match: bool,
    /// Recurrence handling for overrides.
    pub scope: RecurrenceScope,
    /// Bump an existing `SEQUENCE` before writing.
    pub increase_seqno: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            no_overwrite: false,
            no_create: false,
            if_schedule_tag_match: false,
            scope: RecurrenceScope::OnlyThis,
            increase_seqno: true,
        }
    }
}

/// An attendee being added to an object.
#[derive(Debug, Clone)]
pub enum Attendee {
    /// A bare email, a `mailto:` URI, or any CAL-ADDRESS value.
    Address(String),
    /// A display name with an email address.
    Named {
        /// Common name (`CN` parameter).
        name: String,
        /// Email address.
        email: String,
    },
}

/// A stored calendar entity: one `.ics` resource on the server.
#[derive(Debug, Clone)]
pub struct CalendarObject {
    client: Client,
    parent: DavUrl,
    url: Option<DavUrl>,
    kind: ComponentKind,
    id: Option<String>,
    etag: Option<String>,
    schedule_tag: Option<String>,
    data: ObjectData,
}

impl CalendarObject {
    /// Creates an empty object below a parent calendar.
    #[must_use]
    pub fn new(client: Client, parent: DavUrl, kind: ComponentKind) -> Self {
        Self {
            client,
            parent,
            url: None,
            kind,
            id: None,
            etag: None,
            schedule_tag: None,
            data: ObjectData::Empty,
        }
    }

    pub(crate) fn from_query_result(
        client: Client,
        parent: DavUrl,
        href: &str,
        etag: Option<String>,
        data: Option<String>,
    ) -> Result<Self, DavError> {
        let url = parent.join(href)?;
        let kind = data
            .as_deref()
            .and_then(ops::detect_component_kind)
            .and_then(ComponentKind::from_component_name)
            .unwrap_or(ComponentKind::Event);
        // The payload UID is authoritative; the path basename is only a
        // guess for servers that name objects after their UID.
        let id = data
            .as_deref()
            .and_then(|raw| {
                raw.lines()
                    .find_map(|line| line.strip_prefix("UID:"))
                    .map(|uid| uid.trim().to_string())
            })
            .or_else(|| ops::extract_uid_from_path(href));
        Ok(Self {
            client,
            parent,
            url: Some(url),
            kind,
            id,
            etag,
            schedule_tag: None,
            data: data.map_or(ObjectData::Empty, ObjectData::Raw),
        })
    }

    /// The object URL, when one is known.
    #[must_use]
    pub fn url(&self) -> Option<&DavUrl> {
        self.url.as_ref()
    }

    /// The parent calendar URL.
    #[must_use]
    pub fn parent_url(&self) -> &DavUrl {
        &self.parent
    }

    /// The component kind.
    #[must_use]
    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    /// The stable object id (iCalendar UID).
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// The etag cached from the last GET/PUT.
    #[must_use]
    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    /// The schedule tag cached from the last GET/PUT.
    #[must_use]
    pub fn schedule_tag(&self) -> Option<&str> {
        self.schedule_tag.as_deref()
    }

    /// Replaces the payload with raw iCalendar text.
    pub fn set_raw(&mut self, data: String) -> &mut Self {
        self.data = ObjectData::Raw(data);
        self
    }

    /// Replaces the payload with a parsed tree.
    pub fn set_icalendar(&mut self, cal: icalendar::Calendar) -> &mut Self {
        self.data = ObjectData::Parsed(cal);
        self
    }

    /// Whether any payload is present.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        match &self.data {
            ObjectData::Empty => false,
            ObjectData::Raw(raw) => raw.matches("BEGIN:").count() > 1,
            ObjectData::Parsed(cal) => !cal.components.is_empty(),
        }
    }

    /// The raw iCalendar text. Serializes a parsed tree and makes the raw
    /// form authoritative.
    #[must_use]
    pub fn to_raw(&mut self) -> Option<String> {
        match &self.data {
            ObjectData::Empty => None,
            ObjectData::Raw(raw) => Some(raw.clone()),
            ObjectData::Parsed(cal) => {
                let raw = cal.to_string();
                self.data = ObjectData::Raw(raw.clone());
                Some(raw)
            }
        }
    }

    /// Mutable access to the parsed tree. Parses raw data if needed and
    /// makes the tree authoritative.
    ///
    /// # Errors
    ///
    /// Returns [`DavError::Consistency`] when no data is loaded, or an
    /// [`DavError::Ical`] parse error.
    pub fn icalendar_mut(&mut self) -> Result<&mut icalendar::Calendar, DavError> {
        if let ObjectData::Raw(raw) = &self.data {
            let parsed = ops::parse_ics(raw)?;
            self.data = ObjectData::Parsed(parsed);
        }
        match &mut self.data {
            ObjectData::Parsed(cal) => Ok(cal),
            ObjectData::Empty => Err(DavError::Consistency(
                "object has no calendar data".to_string(),
            )),
            ObjectData::Raw(_) => unreachable!("raw state was just parsed"),
        }
    }

    /// Read access to the parsed tree; same state transition as
    /// [`Self::icalendar_mut`].
    ///
    /// # Errors
    ///
    /// Same as [`Self::icalendar_mut`].
    pub fn icalendar(&mut self) -> Result<&icalendar::Calendar, DavError> {
        Ok(self.icalendar_mut()?)
    }

    /// The object's UID, from the id or the payload.
    #[must_use]
    pub fn uid(&self) -> Option<String> {
        if let Some(id) = &self.id {
            return Some(id.clone());
        }
        match &self.data {
            ObjectData::Parsed(cal) => ops::primary_property(cal, "UID"),
            ObjectData::Raw(raw) => raw
                .lines()
                .find_map(|line| line.strip_prefix("UID:"))
                .map(|uid| uid.trim().to_string()),
            ObjectData::Empty => None,
        }
    }

    fn parent_calendar(&self) -> Calendar {
        Calendar::new(self.client.clone(), self.parent.clone())
    }

    fn require_url(&self) -> Result<DavUrl, DavError> {
        self.url.clone().ok_or_else(|| {
            DavError::Consistency("object has no URL yet; save it first".to_string())
        })
    }

    fn record_tags(&mut self, response_headers: &std::collections::BTreeMap<String, String>) {
        for (key, value) in response_headers {
            if key.eq_ignore_ascii_case("etag") {
                self.etag = Some(value.clone());
            } else if key.eq_ignore_ascii_case("schedule-tag") {
                self.schedule_tag = Some(value.clone());
            }
        }
    }

    /// (Re)loads the payload from the server.
    ///
    /// On transport trouble other than 404, falls back to a
    /// calendar-multiget on the own URL.
    ///
    /// # Errors
    ///
    /// Returns [`DavError::NotFound`] when the object is gone.
    pub async fn load(&mut self, only_if_unloaded: bool) -> Result<(), DavError> {
        if only_if_unloaded && self.is_loaded() {
            return Ok(());
        }
        let url = self.require_url()?;
        let request = self.client.protocol().get_request(&url.to_string())?;
        match self.client.request(request).await {
            Ok(response) if response.status == 404 => Err(DavError::NotFound {
                url: url.to_string(),
            }),
            Ok(response) if response.ok() => {
                let raw = response.text();
                if let Some(kind) = ops::detect_component_kind(&raw)
                    .and_then(ComponentKind::from_component_name)
                {
                    self.kind = kind;
                }
                self.data = ObjectData::Raw(raw);
                self.record_tags(&response.headers);
                Ok(())
            }
            Ok(_) | Err(_) => {
                warn!(url = %url, "GET failed, falling back to calendar-multiget");
                self.load_by_multiget().await
            }
        }
    }

    async fn load_by_multiget(&mut self) -> Result<(), DavError> {
        let url = self.require_url()?;
        let request = self
            .client
            .protocol()
            .calendar_multiget_request(&self.parent.to_string(), &[url.path()])?;
        let response = self.client.request(request).await?;
        let results = ProtocolClient::parse_calendar_multiget(&response)?;
        let entry = results
            .into_iter()
            .find(|r| r.calendar_data.is_some())
            .ok_or_else(|| DavError::NotFound {
                url: url.to_string(),
            })?;
        if let Some(etag) = entry.etag {
            self.etag = Some(etag);
        }
        self.data = entry
            .calendar_data
            .map_or(ObjectData::Empty, ObjectData::Raw);
        Ok(())
    }

    /// Deletes the object. A 404 counts as success.
    ///
    /// # Errors
    ///
    /// Returns [`DavError::Delete`] on any other non-2xx answer.
    pub async fn delete(&mut self) -> Result<(), DavError> {
        let url = self.require_url()?;
        let request = self
            .client
            .protocol()
            .delete_request(&url.to_string(), self.etag.as_deref())?;
        let response = self.client.request(request).await?;
        match response.status {
            200 | 204 | 404 => Ok(()),
            status => Err(DavError::Delete {
                url: url.to_string(),
                reason: format!("server answered {status}"),
            }),
        }
    }

    /// Saves the object with default options.
    ///
    /// # Errors
    ///
    /// See [`Self::save`].
    pub async fn save_default(&mut self) -> Result<(), DavError> {
        self.save(&SaveOptions::default()).await
    }

    /// Saves the object.
    ///
    /// Generates UID and URL when absent, bumps `SEQUENCE` when asked,
    /// sends the conditional headers derived from cached tags and the
    /// options, and rewrites recurrence sets when the payload is a
    /// per-instance override.
    ///
    /// # Errors
    ///
    /// Returns [`DavError::Consistency`] on contradictory flags and
    /// [`DavError::Put`] when the server refuses the write.
    pub async fn save(&mut self, opts: &SaveOptions) -> Result<(), DavError> {
        if matches!(self.data, ObjectData::Empty) {
            return Ok(());
        }

        let uid_hint = self.uid();

        if opts.no_overwrite || opts.no_create {
            if uid_hint.is_none() && opts.no_create {
                return Err(DavError::Consistency(
                    "no_create set, but the object has no id".to_string(),
                ));
            }
            let existing = match &uid_hint {
                Some(uid) => {
                    self.parent_calendar()
                        .object_by_uid_opt(Some(self.kind), uid)
                        .await?
                }
                None => None,
            };
            if opts.no_overwrite && existing.is_some() {
                return Err(DavError::Consistency(
                    "no_overwrite set, but the object already exists".to_string(),
                ));
            }
            if opts.no_create && existing.is_none() {
                return Err(DavError::Consistency(
                    "no_create set, but the object does not exist".to_string(),
                ));
            }
        }

        let has_recurrence_id =
            ops::primary_property(self.icalendar_mut()?, "RECURRENCE-ID").is_some();
        if has_recurrence_id {
            if let Some(uid) = &uid_hint {
                let master = self
                    .parent_calendar()
                    .object_by_uid_opt(Some(self.kind), uid)
                    .await?;
                if let Some(mut master) = master {
                    let ours = ops::clone_calendar(self.icalendar_mut()?);
                    let merged = match opts.scope {
                        RecurrenceScope::OnlyThis => {
                            ops::merge_override(master.icalendar_mut()?, &ours)?
                        }
                        RecurrenceScope::AllRecurrences => {
                            ops::merge_all_recurrences(master.icalendar_mut()?, &ours)?
                        }
                    };
                    master.set_icalendar(merged);
                    master.put_object(opts).await?;
                    self.url = master.url.clone();
                    self.etag = master.etag.clone();
                    self.schedule_tag = master.schedule_tag.clone();
                    self.data = master.data;
                    return Ok(());
                }
            }
        }

        self.put_object(opts).await
    }

    async fn put_object(&mut self, opts: &SaveOptions) -> Result<(), DavError> {
        let existing_path = self.url.as_ref().map(DavUrl::path);
        let given_id = self.id.clone();
        let path = {
            let cal = self.icalendar_mut()?;
            if opts.increase_seqno {
                if let Some(seqno) = ops::primary_property(cal, "SEQUENCE")
                    .and_then(|v| v.parse::<i64>().ok())
                {
                    ops::set_primary_property(cal, "SEQUENCE", &(seqno + 1).to_string());
                }
            }
            let (uid, path) = ops::find_id_and_path(
                cal,
                given_id.as_deref(),
                existing_path.as_deref(),
                None,
            );
            self.id = Some(uid);
            path
        };

        if self.url.is_none() {
            self.url = Some(self.parent.join(&path)?);
        }
        let url = self.require_url()?;

        let body = self
            .to_raw()
            .ok_or_else(|| DavError::Consistency("object has no calendar data".to_string()))?;

        let etag = if opts.no_overwrite {
            None
        } else {
            self.etag.clone()
        };
        let mut request = self.client.protocol().put_request(
            &url.to_string(),
            body.clone().into_bytes(),
            etag.as_deref(),
            opts.no_overwrite,
        )?;
        if opts.if_schedule_tag_match {
            if let Some(tag) = &self.schedule_tag {
                request = request.with_header("If-Schedule-Tag-Match", tag);
            }
        }

        let mut response = self.client.request(request).await?;
        if response.status == 302 {
            if let Some(location) = response.header("Location").map(str::to_string) {
                warn!(location = %location, "PUT redirected, retrying at new location");
                let target = self.client.base_url().join(&location)?;
                self.url = Some(target.clone());
                let mut retry = self.client.protocol().put_request(
                    &target.to_string(),
                    body.into_bytes(),
                    etag.as_deref(),
                    opts.no_overwrite,
                )?;
                if opts.if_schedule_tag_match {
                    if let Some(tag) = &self.schedule_tag {
                        retry = retry.with_header("If-Schedule-Tag-Match", tag);
                    }
                }
                response = self.client.request(retry).await?;
            }
        }

        if !response.ok() {
            return Err(DavError::Put {
                url: url.to_string(),
                reason: format!("server answered {}", response.status),
            });
        }
        self.record_tags(&response.headers);

        if self.etag.is_none() && self.client.quirks().etag_missing_after_put {
            self.fetch_etag().await?;
        }
        Ok(())
    }

    async fn fetch_etag(&mut self) -> Result<(), DavError> {
        let url = self.require_url()?;
        let request = self.client.protocol().propfind_request(
            &url.to_string(),
            &[QName::dav("getetag")],
            Depth::Zero,
        )?;
        let response = self.client.request(request).await?;
        let results = ProtocolClient::parse_propfind(&response)?;
        if let Ok(entry) = ops::find_object_properties(&results, &url) {
            self.etag = entry
                .properties
                .get(&QName::dav("getetag").to_string())
                .and_then(|v| v.as_text())
                .map(str::to_string);
        }
        Ok(())
    }

    /// Produces a copy, with a fresh UID unless `keep_uid`, homed under
    /// `new_parent` when given.
    ///
    /// # Errors
    ///
    /// Returns an error when URL generation fails.
    pub fn copy(
        &mut self,
        keep_uid: bool,
        new_parent: Option<&DavUrl>,
    ) -> Result<Self, DavError> {
        let parent = new_parent.unwrap_or(&self.parent).clone();
        let mut object = Self::new(self.client.clone(), parent.clone(), self.kind);
        if let Some(raw) = self.to_raw() {
            object.set_raw(raw);
        }
        let uid = if keep_uid {
            self.uid().unwrap_or_else(ops::generate_uid)
        } else {
            ops::generate_uid()
        };
        if let Ok(cal) = object.icalendar_mut() {
            ops::set_uid_everywhere(cal, &uid);
        }
        object.id = Some(uid.clone());
        if keep_uid && new_parent.is_none() {
            object.url = self.url.clone();
        } else {
            object.url = Some(ops::generate_object_url(&parent, &uid)?);
        }
        Ok(object)
    }

    /// Adds an attendee with the conventional default parameters
    /// (`PARTSTAT=NEEDS-ACTION`, `CUTYPE=UNKNOWN`, `RSVP=TRUE`,
    /// `ROLE=REQ-PARTICIPANT`), overridable via `params`.
    ///
    /// # Errors
    ///
    /// Propagates codec errors.
    pub fn add_attendee(
        &mut self,
        attendee: &Attendee,
        with_defaults: bool,
        params: &[(String, String)],
    ) -> Result<(), DavError> {
        let cal = ops::clone_calendar(self.icalendar_mut()?);
        let updated = match attendee {
            Attendee::Address(address) => {
                ops::add_attendee(&cal, address, None, with_defaults, params)?
            }
            Attendee::Named { name, email } => {
                ops::add_attendee(&cal, email, Some(name), with_defaults, params)?
            }
        };
        self.set_icalendar(updated);
        Ok(())
    }

    /// Adds an attendee from a principal's calendar user address.
    ///
    /// # Errors
    ///
    /// Propagates principal lookups and codec errors.
    pub async fn add_attendee_principal(
        &mut self,
        principal: &mut crate::davobject::Principal,
        with_defaults: bool,
        params: &[(String, String)],
    ) -> Result<(), DavError> {
        let (address, address_params) = principal.get_vcal_address().await?;
        let mut merged = address_params;
        merged.extend(params.iter().cloned());
        let cal = ops::clone_calendar(self.icalendar_mut()?);
        let updated = ops::add_attendee(&cal, &address, None, with_defaults, &merged)?;
        self.set_icalendar(updated);
        Ok(())
    }

    /// Sets `ORGANIZER` from the client principal's calendar user address.
    ///
    /// # Errors
    ///
    /// Propagates principal lookups and codec errors.
    pub async fn add_organizer(&mut self) -> Result<(), DavError> {
        let mut principal = self.client.principal().await?;
        let (address, _) = principal.get_vcal_address().await?;
        let value = if address.contains(':') {
            address
        } else {
            format!("mailto:{address}")
        };
        let cal = self.icalendar_mut()?;
        ops::set_primary_property(cal, "ORGANIZER", &value);
        Ok(())
    }

    /// The object's duration; see [`ops::get_duration`].
    ///
    /// # Errors
    ///
    /// Propagates codec errors.
    pub fn get_duration(&mut self) -> Result<SignedDuration, DavError> {
        let end = self.kind.end_property();
        Ok(ops::get_duration(self.icalendar_mut()?, end))
    }

    /// Re-times the object to the given duration.
    ///
    /// # Errors
    ///
    /// Propagates codec errors.
    pub fn set_duration(
        &mut self,
        duration: SignedDuration,
        movable: &str,
    ) -> Result<(), DavError> {
        let end = self.kind.end_property();
        let cal = ops::clone_calendar(self.icalendar_mut()?);
        let updated = ops::set_duration(&cal, duration, movable, end)?;
        self.set_icalendar(updated);
        Ok(())
    }

    /// The due instant of a todo.
    ///
    /// # Errors
    ///
    /// Propagates codec errors.
    pub fn get_due(&mut self) -> Result<Option<ops::IcalTime>, DavError> {
        Ok(ops::get_due(self.icalendar_mut()?))
    }

    /// Whether the todo is still pending.
    ///
    /// # Errors
    ///
    /// Propagates codec errors.
    pub fn is_pending(&mut self) -> Result<bool, DavError> {
        Ok(ops::is_task_pending(self.icalendar_mut()?))
    }

    /// Completes a todo.
    ///
    /// With `handle_rrule` and a recurring task, either spawns the next
    /// instance (safe mode) or moves the series forward (this-and-future
    /// mode); otherwise simply marks the task completed. Saves afterwards.
    ///
    /// # Errors
    ///
    /// Propagates codec and save errors.
    pub async fn complete(
        &mut self,
        timestamp: Option<Timestamp>,
        handle_rrule: bool,
        mode: RruleMode,
    ) -> Result<(), DavError> {
        let ts = timestamp.unwrap_or_else(Timestamp::now);
        let recurring = ops::primary_property(self.icalendar_mut()?, "RRULE").is_some();

        if recurring && handle_rrule {
            match mode {
                RruleMode::Safe => self.complete_recurring_safe(ts).await,
                RruleMode::ThisAndFuture => self.complete_recurring_thisandfuture(ts).await,
            }
        } else {
            ops::mark_task_completed(self.icalendar_mut()?, ts);
            self.save_default().await
        }
    }

    fn completion_policy(&mut self) -> Result<DeadlinePolicy, DavError> {
        // A task with its own DTSTART stays anchored to its schedule; only
        // unanchored tasks step relative to the completion instant.
        Ok(
            if ops::primary_property(self.icalendar_mut()?, "DTSTART").is_some() {
                DeadlinePolicy::Fixed
            } else {
                DeadlinePolicy::Auto
            },
        )
    }

    async fn complete_recurring_safe(&mut self, ts: Timestamp) -> Result<(), DavError> {
        let policy = self.completion_policy()?;
        let next = ops::calculate_next_recurrence(self.icalendar_mut()?, ts, policy)?;
        let duration = self.get_duration()?;
        ops::mark_task_completed(self.icalendar_mut()?, ts);

        let Some(next) = next else {
            return self.save_default().await;
        };
        if !ops::reduce_rrule_count(self.icalendar_mut()?) {
            return self.save_default().await;
        }

        let end_property = self.kind.end_property();
        let cal = ops::clone_calendar(self.icalendar_mut()?);
        let with_next = ops::append_next_instance(&cal, next, duration, end_property)?;
        self.set_icalendar(with_next);
        self.save_default().await
    }

    async fn complete_recurring_thisandfuture(&mut self, ts: Timestamp) -> Result<(), DavError> {
        let policy = self.completion_policy()?;
        let next = ops::calculate_next_recurrence(self.icalendar_mut()?, ts, policy)?;
        let duration = self.get_duration()?;

        let Some(next) = next else {
            ops::mark_task_completed(self.icalendar_mut()?, ts);
            return self.save_default().await;
        };
        if !ops::reduce_rrule_count(self.icalendar_mut()?) {
            ops::mark_task_completed(self.icalendar_mut()?, ts);
            return self.save_default().await;
        }

        let end_property = self.kind.end_property();
        let cal = self.icalendar_mut()?;
        ops::retime_primary(cal, next, duration, end_property);
        self.save_default().await
    }

    /// Reverts a completed todo to pending and saves.
    ///
    /// # Errors
    ///
    /// Propagates codec and save errors.
    pub async fn uncomplete(&mut self) -> Result<(), DavError> {
        let cal = ops::clone_calendar(self.icalendar_mut()?);
        let updated = ops::mark_task_uncompleted(&cal)?;
        self.set_icalendar(updated);
        self.save_default().await
    }

    fn method_is(&mut self, method: &str) -> bool {
        self.to_raw()
            .is_some_and(|raw| raw.lines().any(|l| l.trim() == format!("METHOD:{method}")))
    }

    /// Whether this inbox item is a scheduling invitation.
    #[must_use]
    pub fn is_invite_request(&mut self) -> bool {
        self.method_is("REQUEST")
    }

    /// Whether this inbox item is a reply to an invitation.
    #[must_use]
    pub fn is_invite_reply(&mut self) -> bool {
        self.method_is("REPLY")
    }

    /// Accepts an invitation: sets our `PARTSTAT` to `ACCEPTED` and saves.
    ///
    /// # Errors
    ///
    /// See [`Self::partstat_reply`].
    pub async fn accept_invite(&mut self) -> Result<(), DavError> {
        self.partstat_reply("ACCEPTED").await
    }

    /// Declines an invitation.
    ///
    /// # Errors
    ///
    /// See [`Self::partstat_reply`].
    pub async fn decline_invite(&mut self) -> Result<(), DavError> {
        self.partstat_reply("DECLINED").await
    }

    /// Tentatively accepts an invitation.
    ///
    /// # Errors
    ///
    /// See [`Self::partstat_reply`].
    pub async fn tentatively_accept_invite(&mut self) -> Result<(), DavError> {
        self.partstat_reply("TENTATIVE").await
    }

    /// Mutates the `PARTSTAT` of the attendee entry matching the client
    /// principal's calendar user addresses and saves.
    ///
    /// # Errors
    ///
    /// Returns [`DavError::Consistency`] when no attendee matches.
    pub async fn partstat_reply(&mut self, partstat: &str) -> Result<(), DavError> {
        let mut principal = self.client.principal().await?;
        let addresses = principal.calendar_user_address_set().await?;
        let cal = ops::clone_calendar(self.icalendar_mut()?);
        let (updated, matched) = ops::set_attendee_partstat(&cal, &addresses, partstat)?;
        if !matched {
            return Err(DavError::Consistency(
                "no attendee matches the principal's calendar user addresses".to_string(),
            ));
        }
        self.set_icalendar(updated);
        self.save_default().await
    }
}
