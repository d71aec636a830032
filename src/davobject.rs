// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

//! Base DAV resource behavior, principals and calendar home sets.

use std::collections::BTreeMap;

use percent_encoding::utf8_percent_encode;
use tracing::warn;

use crate::calendar::{Calendar, ScheduleInbox, ScheduleOutbox};
use crate::client::Client;
use crate::error::DavError;
use crate::object::{CalendarObject, ComponentKind};
use crate::ops::{self, ChildInfo};
use crate::protocol::{DavMethod, DavRequest, Depth, ProtocolClient};
use crate::types::PropValue;
use crate::url::DavUrl;
use crate::xml::QName;

/// Shared state and behavior of every DAV resource: a client handle, the
/// canonical URL, a non-owning parent URL, and the property cache.
///
/// The cache is authoritative only for keys observed by the most recent
/// `get_properties` call; it is a single-writer structure.
#[derive(Debug, Clone)]
pub struct DavResource {
    client: Client,
    url: DavUrl,
    parent: Option<DavUrl>,
    props: BTreeMap<String, PropValue>,
}

impl DavResource {
    pub(crate) fn new(client: Client, url: DavUrl) -> Self {
        Self {
            client,
            url,
            parent: None,
            props: BTreeMap::new(),
        }
    }

    pub(crate) fn with_parent(mut self, parent: DavUrl) -> Self {
        self.parent = Some(parent);
        self
    }

    /// The resource URL.
    #[must_use]
    pub fn url(&self) -> &DavUrl {
        &self.url
    }

    /// The parent collection URL, when known.
    #[must_use]
    pub fn parent_url(&self) -> Option<&DavUrl> {
        self.parent.as_ref()
    }

    /// The owning client.
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// The current property cache snapshot.
    #[must_use]
    pub fn cached_properties(&self) -> &BTreeMap<String, PropValue> {
        &self.props
    }

    /// Fetches properties via PROPFIND and refreshes the cache.
    ///
    /// With `use_cached`, returns cached values without touching the
    /// network when every requested key is already present.
    ///
    /// # Errors
    ///
    /// Returns [`DavError::NotFound`] on 404 and [`DavError::Response`]
    /// when no multistatus entry matches this resource.
    pub async fn get_properties(
        &mut self,
        props: &[QName],
        depth: Depth,
        use_cached: bool,
    ) -> Result<BTreeMap<String, PropValue>, DavError> {
        if use_cached && props.iter().all(|p| self.props.contains_key(&p.to_string())) {
            return Ok(props
                .iter()
                .filter_map(|p| {
                    let key = p.to_string();
                    self.props.get(&key).map(|v| (key, v.clone()))
                })
                .collect());
        }

        let request = self
            .client
            .protocol()
            .propfind_request(&self.url.to_string(), props, depth)?;
        let response = self.client.request(request).await?;
        if response.status == 404 {
            return Err(DavError::NotFound {
                url: self.url.to_string(),
            });
        }
        let results = ProtocolClient::parse_propfind(&response)?;
        let entry = ops::find_object_properties(&results, &self.url)?;
        for (key, value) in &entry.properties {
            self.props.insert(key.clone(), value.clone());
        }
        Ok(entry.properties.clone())
    }

    /// Fetches one property, optionally through the cache.
    ///
    /// # Errors
    ///
    /// Propagates [`Self::get_properties`] errors.
    pub async fn get_property(
        &mut self,
        prop: &QName,
        use_cached: bool,
    ) -> Result<Option<PropValue>, DavError> {
        let key = prop.to_string();
        if use_cached {
            if let Some(value) = self.props.get(&key) {
                return Ok(Some(value.clone()));
            }
        }
        let map = self
            .get_properties(std::slice::from_ref(prop), Depth::Zero, false)
            .await?;
        Ok(map.get(&key).cloned())
    }

    /// Applies a PROPPATCH.
    ///
    /// # Errors
    ///
    /// Returns [`DavError::Propset`] when the server rejects any property.
    pub async fn set_properties(
        &mut self,
        set: &[(QName, String)],
        remove: &[QName],
    ) -> Result<(), DavError> {
        let request = self
            .client
            .protocol()
            .proppatch_request(&self.url.to_string(), set, remove)?;
        let response = self.client.request(request).await?;
        if !response.ok() && !response.is_multistatus() {
            return Err(DavError::Propset {
                status: format!("PROPPATCH answered {}", response.status),
            });
        }
        if response.is_multistatus() {
            // Any non-2xx propstat line inside the multistatus means the
            // update was rejected for that property.
            match crate::response::parse_multistatus(&response.text()) {
                Ok(_) => {}
                Err(DavError::Response(status)) => {
                    return Err(DavError::Propset { status });
                }
                Err(e) => return Err(e),
            }
        }
        for (prop, value) in set {
            self.props
                .insert(prop.to_string(), PropValue::Text(value.clone()));
        }
        for prop in remove {
            self.props.remove(&prop.to_string());
        }
        Ok(())
    }

    /// Lists direct children via a depth-1 PROPFIND.
    ///
    /// # Errors
    ///
    /// Propagates PROPFIND and parse errors.
    pub async fn children(&self, filter: Option<&QName>) -> Result<Vec<ChildInfo>, DavError> {
        let props = [QName::dav("displayname"), QName::dav("resourcetype")];
        let request = self
            .client
            .protocol()
            .propfind_request(&self.url.to_string(), &props, Depth::One)?;
        let response = self.client.request(request).await?;
        let results = ProtocolClient::parse_propfind(&response)?;
        Ok(ops::resolve_children(&results, &self.url, filter))
    }

    /// Deletes the resource. A 404 counts as success.
    ///
    /// # Errors
    ///
    /// Returns [`DavError::Delete`] on any other non-2xx answer.
    pub async fn delete(&self) -> Result<(), DavError> {
        let request = self
            .client
            .protocol()
            .delete_request(&self.url.to_string(), None)?;
        let response = self.client.request(request).await?;
        match response.status {
            200 | 204 | 404 => Ok(()),
            status => Err(DavError::Delete {
                url: self.url.to_string(),
                reason: format!("server answered {status}"),
            }),
        }
    }

    /// The resource display name, cached.
    ///
    /// # Errors
    ///
    /// Propagates [`Self::get_property`] errors.
    pub async fn get_display_name(&mut self) -> Result<Option<String>, DavError> {
        Ok(self
            .get_property(&QName::dav("displayname"), true)
            .await?
            .and_then(|v| v.as_text().map(str::to_string)))
    }
}

/// A WebDAV principal: the entry point of a user's calendar tree.
#[derive(Debug, Clone)]
pub struct Principal {
    res: DavResource,
}

impl Principal {
    pub(crate) fn new(client: Client, url: DavUrl) -> Self {
        Self {
            res: DavResource::new(client, url),
        }
    }

    /// The principal URL.
    #[must_use]
    pub fn url(&self) -> &DavUrl {
        self.res.url()
    }

    /// Access to the underlying resource behavior.
    pub fn resource(&mut self) -> &mut DavResource {
        &mut self.res
    }

    /// Resolves the principal's calendar home set.
    ///
    /// Applies the owncloud `@`-quoting fix, and rehomes the client's base
    /// URL when the home set lives on a different host (iCloud load
    /// balancing).
    ///
    /// # Errors
    ///
    /// Returns [`DavError::Response`] when the server reports no
    /// calendar-home-set.
    pub async fn calendar_home_set(&mut self) -> Result<CalendarSet, DavError> {
        let value = self
            .res
            .get_property(&QName::caldav("calendar-home-set"), true)
            .await?;
        let href = value
            .as_ref()
            .and_then(PropValue::as_href)
            .ok_or_else(|| DavError::Response("no calendar-home-set advertised".to_string()))?;
        let sanitized = ops::sanitize_calendar_home_set_url(href);

        let client = self.res.client().clone();
        let url = if sanitized.contains("://") {
            DavUrl::parse(&sanitized)?
        } else {
            client.base_url().join(&sanitized)?
        };

        if let (Some(home_host), Some(base_host)) = (url.hostname(), client.base_url().hostname())
        {
            if home_host != base_host {
                warn!(
                    host = %home_host,
                    "calendar home set lives on another host, rehoming client"
                );
                client.rehome_to(&url)?;
            }
        }

        Ok(CalendarSet {
            res: DavResource::new(client, url).with_parent(self.res.url().clone()),
        })
    }

    /// Lists the principal's calendars.
    ///
    /// # Errors
    ///
    /// Propagates home-set resolution and PROPFIND errors.
    pub async fn calendars(&mut self) -> Result<Vec<Calendar>, DavError> {
        self.calendar_home_set().await?.calendars().await
    }

    /// Creates a calendar in the home set.
    ///
    /// # Errors
    ///
    /// Propagates MKCALENDAR errors.
    pub async fn make_calendar(
        &mut self,
        name: &str,
        cal_id: Option<&str>,
        supported_components: &[&str],
    ) -> Result<Calendar, DavError> {
        self.calendar_home_set()
            .await?
            .make_calendar(name, cal_id, supported_components)
            .await
    }

    /// Looks a calendar up by display name or id.
    ///
    /// # Errors
    ///
    /// Returns [`DavError::NotFound`] when nothing matches.
    pub async fn calendar(
        &mut self,
        name: Option<&str>,
        cal_id: Option<&str>,
    ) -> Result<Calendar, DavError> {
        self.calendar_home_set().await?.calendar(name, cal_id).await
    }

    /// The principal's calendar user addresses, preference-sorted.
    ///
    /// # Errors
    ///
    /// Propagates PROPFIND errors.
    pub async fn calendar_user_address_set(&mut self) -> Result<Vec<String>, DavError> {
        Ok(self
            .res
            .get_property(&QName::caldav("calendar-user-address-set"), true)
            .await?
            .and_then(|v| v.as_list().map(<[String]>::to_vec))
            .unwrap_or_default())
    }

    /// The scheduling inbox.
    ///
    /// # Errors
    ///
    /// Returns [`DavError::Response`] when the server advertises none.
    pub async fn schedule_inbox(&mut self) -> Result<ScheduleInbox, DavError> {
        let url = self
            .schedule_mailbox_url(&QName::caldav("schedule-inbox-URL"))
            .await?;
        Ok(ScheduleInbox::new(Calendar::new(
            self.res.client().clone(),
            url,
        )))
    }

    /// The scheduling outbox.
    ///
    /// # Errors
    ///
    /// Returns [`DavError::Response`] when the server advertises none.
    pub async fn schedule_outbox(&mut self) -> Result<ScheduleOutbox, DavError> {
        let url = self
            .schedule_mailbox_url(&QName::caldav("schedule-outbox-URL"))
            .await?;
        Ok(ScheduleOutbox::new(Calendar::new(
            self.res.client().clone(),
            url,
        )))
    }

    async fn schedule_mailbox_url(&mut self, prop: &QName) -> Result<DavUrl, DavError> {
        let value = self.res.get_property(prop, true).await?;
        let href = value
            .as_ref()
            .and_then(PropValue::as_href)
            .ok_or_else(|| {
                DavError::Response(format!("server advertises no {}", prop.local()))
            })?;
        self.res.client().base_url().join(href)
    }

    /// Builds the iCalendar CAL-ADDRESS for this principal: the primary
    /// calendar user address plus `CN`/`CUTYPE` parameters.
    ///
    /// # Errors
    ///
    /// Returns [`DavError::Response`] when the principal has no calendar
    /// user address.
    pub async fn get_vcal_address(
        &mut self,
    ) -> Result<(String, Vec<(String, String)>), DavError> {
        let addresses = self.calendar_user_address_set().await?;
        let address = addresses.into_iter().next().ok_or_else(|| {
            DavError::Response("principal has no calendar user address".to_string())
        })?;
        let display_name = self.res.get_display_name().await.unwrap_or(None);
        let cutype = self
            .res
            .get_property(&QName::caldav("calendar-user-type"), true)
            .await
            .ok()
            .flatten()
            .and_then(|v| v.as_text().map(str::to_string));
        Ok((
            address,
            ops::vcal_address_params(display_name.as_deref(), cutype.as_deref()),
        ))
    }

    /// Issues a free-busy request for the given attendees through the
    /// scheduling outbox (RFC 6638) and returns the raw scheduling
    /// response wrapped as a free-busy object.
    ///
    /// # Errors
    ///
    /// Propagates outbox resolution and POST errors.
    pub async fn freebusy_request(
        &mut self,
        start: jiff::Timestamp,
        end: jiff::Timestamp,
        attendees: &[&str],
    ) -> Result<CalendarObject, DavError> {
        let outbox = self.schedule_outbox().await?;
        let (organizer, _) = self.get_vcal_address().await?;

        let mut body = String::new();
        body.push_str("BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//davcal//EN\r\n");
        body.push_str("METHOD:REQUEST\r\nBEGIN:VFREEBUSY\r\n");
        body.push_str(&format!("UID:{}\r\n", ops::generate_uid()));
        body.push_str(&format!(
            "DTSTAMP:{}\r\n",
            ops::format_ical_utc(jiff::Timestamp::now())
        ));
        body.push_str(&format!("DTSTART:{}\r\n", ops::format_ical_utc(start)));
        body.push_str(&format!("DTEND:{}\r\n", ops::format_ical_utc(end)));
        body.push_str(&format!("ORGANIZER:{organizer}\r\n"));
        for attendee in attendees {
            if attendee.contains(':') {
                body.push_str(&format!("ATTENDEE:{attendee}\r\n"));
            } else {
                body.push_str(&format!("ATTENDEE:mailto:{attendee}\r\n"));
            }
        }
        body.push_str("END:VFREEBUSY\r\nEND:VCALENDAR\r\n");

        let client = self.res.client().clone();
        let request = DavRequest::new(
            DavMethod::Post,
            &client.protocol().resolve(&outbox.calendar().url().to_string())?,
        )
        .with_header("Content-Type", "text/calendar; charset=utf-8")
        .with_body(body.into_bytes());
        let response = client.request(request).await?;
        if !response.ok() && !response.is_multistatus() {
            return Err(DavError::Response(format!(
                "free-busy request answered {}",
                response.status
            )));
        }

        let mut object = CalendarObject::new(
            client,
            outbox.calendar().url().clone(),
            ComponentKind::FreeBusy,
        );
        object.set_raw(response.text());
        Ok(object)
    }
}

/// The collection holding a user's calendars.
#[derive(Debug, Clone)]
pub struct CalendarSet {
    res: DavResource,
}

impl CalendarSet {
    pub(crate) fn new(client: Client, url: DavUrl) -> Self {
        Self {
            res: DavResource::new(client, url),
        }
    }

    /// The home set URL.
    #[must_use]
    pub fn url(&self) -> &DavUrl {
        self.res.url()
    }

    /// Access to the underlying resource behavior.
    pub fn resource(&mut self) -> &mut DavResource {
        &mut self.res
    }

    /// Lists calendars: children carrying the `calendar` resource type.
    ///
    /// # Errors
    ///
    /// Propagates PROPFIND errors.
    pub async fn calendars(&self) -> Result<Vec<Calendar>, DavError> {
        let filter = ops::calendar_resource_type();
        let children = self.res.children(Some(&filter)).await?;
        let mut calendars = Vec::new();
        for child in children {
            let url = self.res.url().join(&child.href)?;
            calendars.push(Calendar::with_details(
                self.res.client().clone(),
                url,
                child.display_name,
                Some(self.res.url().clone()),
            ));
        }
        Ok(calendars)
    }

    /// Creates a calendar via MKCALENDAR and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`DavError::Response`] when the server refuses the
    /// MKCALENDAR.
    pub async fn make_calendar(
        &self,
        name: &str,
        cal_id: Option<&str>,
        supported_components: &[&str],
    ) -> Result<Calendar, DavError> {
        let id = cal_id.map_or_else(ops::generate_uid, str::to_string);
        let quoted = utf8_percent_encode(&id, crate::url::PATH_SET).to_string();
        let url = self.res.url().join(&format!("{quoted}/"))?;

        let mut body = crate::request::MkCalendarRequest::new();
        body.display_name(name);
        if !supported_components.is_empty() {
            body.supported_components(supported_components);
        }

        let request = self
            .res
            .client()
            .protocol()
            .mkcalendar_request(&url.to_string(), &body)?;
        let response = self.res.client().request(request).await?;
        if !response.ok() {
            return Err(DavError::Response(format!(
                "MKCALENDAR answered {}",
                response.status
            )));
        }

        Ok(Calendar::with_details(
            self.res.client().clone(),
            url,
            Some(name.to_string()),
            Some(self.res.url().clone()),
        ))
    }

    /// Returns a calendar by id (no network) or by display name (one
    /// PROPFIND).
    ///
    /// # Errors
    ///
    /// Returns [`DavError::NotFound`] when a name search finds nothing.
    pub async fn calendar(
        &self,
        name: Option<&str>,
        cal_id: Option<&str>,
    ) -> Result<Calendar, DavError> {
        if let Some(id) = cal_id {
            let quoted = utf8_percent_encode(id, crate::url::PATH_SET).to_string();
            let url = self.res.url().join(&format!("{quoted}/"))?;
            return Ok(Calendar::with_details(
                self.res.client().clone(),
                url,
                None,
                Some(self.res.url().clone()),
            ));
        }
        if let Some(name) = name {
            for calendar in self.calendars().await? {
                if calendar.display_name() == Some(name) {
                    return Ok(calendar);
                }
            }
            return Err(DavError::NotFound {
                url: format!("{} (calendar named {name})", self.res.url()),
            });
        }
        Err(DavError::Consistency(
            "calendar() needs a name or a cal_id".to_string(),
        ))
    }
}
