// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

//! `CalDAV` client library (RFC 4791): a Sans-I/O protocol engine, a typed
//! resource model over principals, calendars and calendar objects, and
//! RFC 6764 service discovery.
//!
//! The protocol engine ([`ProtocolClient`]) turns typed inputs into
//! [`DavRequest`] values and parses [`DavResponse`] bodies, without any
//! I/O. Two shells move the bytes: the async [`Client`] and the thin
//! [`blocking::Client`] wrapper. Calendar payloads go through the
//! `icalendar` codec; recurrence rules are evaluated by the `rrule` crate.
//!
//! # Example
//!
//! ```ignore
//! use davcal::{CalendarSearcher, Client, ClientConfig};
//!
//! # async fn example() -> Result<(), davcal::DavError> {
//! let config = ClientConfig {
//!     url: "https://cal.example.com/dav/".to_string(),
//!     username: Some("user".to_string()),
//!     password: Some("pass".to_string()),
//!     ..ClientConfig::default()
//! };
//! let client = Client::connect(&config).await?;
//! let mut principal = client.principal().await?;
//! for calendar in principal.calendars().await? {
//!     let events = calendar
//!         .search(&CalendarSearcher::new().event().summary("standup"))
//!         .await?;
//!     println!("{}: {} events", calendar.url(), events.len());
//! }
//! # Ok(())
//! # }
//! ```

#![warn(
    trivial_casts,
    trivial_numeric_casts,
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    clippy::dbg_macro,
    clippy::pedantic
)]
// Allow certain clippy lints that are too restrictive for this crate
#![allow(
    clippy::module_name_repetitions,
    clippy::similar_names,
    clippy::single_match_else,
    clippy::too_many_lines
)]

pub mod blocking;
mod calendar;
mod client;
mod config;
mod davobject;
pub mod discovery;
mod error;
mod http;
pub mod ops;
mod object;
mod protocol;
pub mod request;
pub mod response;
mod search;
mod types;
mod url;
pub mod xml;

pub use crate::calendar::{Calendar, ScheduleInbox, ScheduleOutbox, SyncBatch};
pub use crate::client::Client;
pub use crate::config::{quirks_profile, AuthType, ClientConfig, Quirks};
pub use crate::discovery::{discover_caldav, DiscoveryOptions, ServiceInfo};
pub use crate::davobject::{CalendarSet, DavResource, Principal};
pub use crate::error::DavError;
pub use crate::object::{
    Attendee, CalendarObject, ComponentKind, ObjectData, RecurrenceScope, RruleMode, SaveOptions,
};
pub use crate::protocol::{DavMethod, DavRequest, DavResponse, Depth, ProtocolClient};
pub use crate::search::CalendarSearcher;
pub use crate::types::{
    CalendarQueryResult, ETag, Href, PrincipalInfo, PropValue, PropfindResult,
    SyncCollectionResult,
};
pub use crate::url::DavUrl;
