// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

//! Pure business logic shared by both I/O shells.
//!
//! Everything in this module transforms parsed data; nothing talks to the
//! network. Calendar payloads are handled through the `icalendar` codec:
//! component-level reads and single-valued writes use the typed model,
//! while surgery on multi-valued properties and removals goes through the
//! parser-level tree, which keeps every property and parameter intact.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use icalendar::parser;
use icalendar::{CalendarComponent, Component, Property};
use jiff::civil;
use jiff::tz::TimeZone;
use jiff::{SignedDuration, Timestamp};
use percent_encoding::utf8_percent_encode;
use rrule::RRuleSet;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::DavError;
use crate::types::{PropValue, PropfindResult};
use crate::url::DavUrl;
use crate::xml::{ns, QName};

/// Clones an [`icalendar::Calendar`], which does not itself implement
/// `Clone`, by cloning its (public) fields.
pub(crate) fn clone_calendar(cal: &icalendar::Calendar) -> icalendar::Calendar {
    icalendar::Calendar {
        properties: cal.properties.clone(),
        components: cal.components.clone(),
    }
}

/// Dispatches a [`Component`]-trait expression over every concrete variant
/// of [`CalendarComponent`]. Yields `None` for unknown variants.
macro_rules! on_component {
    ($comp:expr, $c:ident => $body:expr) => {
        match $comp {
            icalendar::CalendarComponent::Event($c) => Some($body),
            icalendar::CalendarComponent::Todo($c) => Some($body),
            icalendar::CalendarComponent::Venue($c) => Some($body),
            icalendar::CalendarComponent::Other($c) => Some($body),
            _ => None,
        }
    };
}

pub(crate) use on_component;

// ---------------------------------------------------------------------------
// Children and property lookup

/// One child resource of a collection.
#[derive(Debug, Clone)]
pub struct ChildInfo {
    /// Decoded href of the child.
    pub href: String,
    /// Qualified resource type names.
    pub resource_types: Vec<String>,
    /// `displayname`, when the server supplied one.
    pub display_name: Option<String>,
}

fn canonical_path_of(href: &str) -> String {
    let path = if href.contains("://") {
        DavUrl::parse(href).map_or_else(|_| href.to_string(), |u| u.path())
    } else {
        href.to_string()
    };
    path.trim_end_matches('/').to_string()
}

/// Turns a depth-1 PROPFIND result into a child list, excluding the parent
/// itself and optionally filtering by resource type.
#[must_use]
pub fn resolve_children(
    results: &[PropfindResult],
    parent_url: &DavUrl,
    filter_type: Option<&QName>,
) -> Vec<ChildInfo> {
    let parent_canonical = canonical_path_of(&parent_url.path());
    let filter = filter_type.map(QName::to_string);
    let mut children = Vec::new();

    for entry in results {
        let resource_types = entry
            .properties
            .get(&QName::dav("resourcetype").to_string())
            .and_then(PropValue::as_list)
            .map(<[String]>::to_vec)
            .unwrap_or_default();
        if let Some(filter) = &filter {
            if !resource_types.contains(filter) {
                continue;
            }
        }
        if canonical_path_of(&entry.href) == parent_canonical {
            continue;
        }
        let display_name = entry
            .properties
            .get(&QName::dav("displayname").to_string())
            .and_then(|v| v.as_text())
            .map(str::to_string);
        children.push(ChildInfo {
            href: entry.href.clone(),
            resource_types,
            display_name,
        });
    }

    children
}

/// Locates the entry for `object_url` in a PROPFIND result, working around
/// trailing-slash mismatches, absolute-vs-path hrefs, doubled slashes and
/// iCloud's `/principal/` aliasing. When exactly one entry came back, it is
/// assumed to be the right one.
///
/// # Errors
///
/// Returns a [`DavError::Response`] when no entry can be matched.
pub fn find_object_properties<'a>(
    results: &'a [PropfindResult],
    object_url: &DavUrl,
) -> Result<&'a PropfindResult, DavError> {
    let path = object_url.path();
    let exchange_path = if path.ends_with('/') {
        path.trim_end_matches('/').to_string()
    } else {
        format!("{path}/")
    };

    if let Some(entry) = results.iter().find(|r| r.href == path) {
        return Ok(entry);
    }

    if let Some(entry) = results.iter().find(|r| r.href == exchange_path) {
        warn!(
            expected = %path,
            found = %exchange_path,
            "href matched only after toggling the trailing slash"
        );
        return Ok(entry);
    }

    let full = object_url.to_string();
    if let Some(entry) = results.iter().find(|r| r.href == full) {
        return Ok(entry);
    }

    if path.ends_with("/principal/") {
        if let Some(entry) = results.iter().find(|r| r.href == "/principal/") {
            warn!("applying the /principal/ alias workaround");
            return Ok(entry);
        }
    }

    if path.contains("//") {
        let collapsed = path.replace("//", "/");
        if let Some(entry) = results.iter().find(|r| r.href == collapsed) {
            warn!(expected = %path, "href contained doubled slashes");
            return Ok(entry);
        }
    }

    if results.len() == 1 {
        warn!(
            expected = %path,
            found = %results[0].href,
            "single mismatched entry in PROPFIND result, assuming it is ours"
        );
        return Ok(&results[0]);
    }

    Err(DavError::Response(format!(
        "no PROPFIND entry matched {path}; got {:?}",
        results.iter().map(|r| r.href.as_str()).collect::<Vec<_>>()
    )))
}

// ---------------------------------------------------------------------------
// Object URLs and UIDs

/// Generates a fresh object UID.
#[must_use]
pub fn generate_uid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Builds the canonical `.ics` URL for an object below its parent
/// collection. Slashes inside the UID are double-quoted so they survive
/// path handling.
///
/// # Errors
///
/// Returns an error when the parent URL cannot be joined.
pub fn generate_object_url(parent_url: &DavUrl, uid: &str) -> Result<DavUrl, DavError> {
    let quoted = utf8_percent_encode(&uid.replace('/', "%2F"), crate::url::PATH_SET)
        .to_string();
    let parent = if parent_url.to_string().ends_with('/') {
        parent_url.clone()
    } else {
        DavUrl::parse(&format!("{parent_url}/"))?
    };
    parent.join(&format!("{quoted}.ics"))
}

/// Extracts the UID portion of a `.ics` path.
#[must_use]
pub fn extract_uid_from_path(path: &str) -> Option<String> {
    let stem = path.strip_suffix(".ics")?;
    let basename = stem.rsplit('/').next().unwrap_or(stem);
    if basename.is_empty() {
        None
    } else {
        Some(basename.to_string())
    }
}

/// Settles the UID and relative path for an object about to be saved.
///
/// Precedence: explicit id, id already on the object, UID in the payload,
/// UID embedded in the path, then a freshly generated one. The chosen UID is
/// stamped onto every non-VTIMEZONE subcomponent so recurrence sets stay
/// correlated.
#[must_use]
pub fn find_id_and_path(
    cal: &mut icalendar::Calendar,
    given_id: Option<&str>,
    given_path: Option<&str>,
    existing_id: Option<&str>,
) -> (String, String) {
    let uid = given_id
        .map(str::to_string)
        .or_else(|| existing_id.map(str::to_string))
        .or_else(|| {
            primary_component(cal)
                .and_then(|c| component_property(c, "UID"))
        })
        .or_else(|| given_path.and_then(extract_uid_from_path))
        .unwrap_or_else(generate_uid);

    set_uid_everywhere(cal, &uid);

    let path = given_path.map_or_else(
        || {
            format!(
                "{}.ics",
                utf8_percent_encode(&uid.replace('/', "%2F"), crate::url::PATH_SET)
            )
        },
        str::to_string,
    );

    (uid, path)
}

/// Stamps `uid` onto every non-VTIMEZONE subcomponent.
pub fn set_uid_everywhere(cal: &mut icalendar::Calendar, uid: &str) {
    for comp in &mut cal.components {
        if component_kind(comp) == "VTIMEZONE" {
            continue;
        }
        let _ = on_component!(comp, c => {
            c.append_property(Property::new("UID", uid));
        });
    }
}

// ---------------------------------------------------------------------------
// Component access

/// The kind string (`VEVENT`, `VTODO`, ...) of a component.
#[must_use]
pub fn component_kind(comp: &CalendarComponent) -> String {
    match comp {
        CalendarComponent::Event(_) => "VEVENT".to_string(),
        CalendarComponent::Todo(_) => "VTODO".to_string(),
        CalendarComponent::Venue(_) => "VENUE".to_string(),
        CalendarComponent::Other(o) => o.component_kind(),
        _ => String::new(),
    }
}

/// The first non-VTIMEZONE subcomponent, which carries the object's data.
#[must_use]
pub fn primary_component(cal: &icalendar::Calendar) -> Option<&CalendarComponent> {
    cal.components
        .iter()
        .find(|c| component_kind(c) != "VTIMEZONE")
}

/// Reads a property value off any component variant.
#[must_use]
pub fn component_property(comp: &CalendarComponent, name: &str) -> Option<String> {
    on_component!(comp, c => c.property_value(name).map(str::to_string)).flatten()
}

/// Reads a property of the primary component.
#[must_use]
pub fn primary_property(cal: &icalendar::Calendar, name: &str) -> Option<String> {
    primary_component(cal).and_then(|c| component_property(c, name))
}

/// Sets a single-valued property on the primary component.
pub fn set_primary_property(cal: &mut icalendar::Calendar, name: &str, value: &str) {
    for comp in &mut cal.components {
        if component_kind(comp) == "VTIMEZONE" {
            continue;
        }
        let _ = on_component!(comp, c => {
            c.append_property(Property::new(name, value));
        });
        break;
    }
}

/// Parses iCalendar text through the codec.
///
/// # Errors
///
/// Returns an error when the payload is not valid iCalendar.
pub fn parse_ics(data: &str) -> Result<icalendar::Calendar, DavError> {
    data.parse::<icalendar::Calendar>().map_err(DavError::Ical)
}

/// Wraps a single component into a VCALENDAR.
#[must_use]
pub fn wrap_component(comp: CalendarComponent) -> icalendar::Calendar {
    let mut cal = icalendar::Calendar::new();
    cal.push(comp);
    cal
}

/// Detects the primary component kind in raw iCalendar text without
/// parsing.
#[must_use]
pub fn detect_component_kind(data: &str) -> Option<&'static str> {
    for kind in ["VEVENT", "VTODO", "VJOURNAL", "VFREEBUSY"] {
        if data.contains(&format!("BEGIN:{kind}")) {
            return Some(kind);
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Parser-level surgery

pub(crate) fn rebuild_calendar(pcal: parser::Calendar<'_>) -> icalendar::Calendar {
    let mut cal = icalendar::Calendar::new();
    for prop in pcal.properties {
        cal.append_property(Property::new(prop.name.as_str(), prop.val.as_str()));
    }
    for comp in pcal.components {
        cal.components.push(CalendarComponent::from(comp));
    }
    cal
}

pub(crate) fn read_parser_calendar(unfolded: &str) -> Result<parser::Calendar<'_>, DavError> {
    parser::read_calendar(unfolded).map_err(|e| DavError::Ical(format!("{e}")))
}

fn premove(comp: &mut parser::Component<'_>, names: &[&str]) {
    comp.properties
        .retain(|p| !names.iter().any(|n| p.name.as_str().eq_ignore_ascii_case(n)));
}

fn pset<'a>(comp: &mut parser::Component<'a>, name: &'a str, val: &'a str) {
    premove(comp, &[name]);
    comp.properties.push(parser::Property {
        name: name.into(),
        val: val.into(),
        params: Vec::new(),
    });
}

fn is_parser_timezone(comp: &parser::Component<'_>) -> bool {
    comp.name.as_str().eq_ignore_ascii_case("VTIMEZONE")
}

// ---------------------------------------------------------------------------
// Date/time handling

/// A parsed iCalendar date or datetime, normalized to UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcalTime {
    /// The instant, in UTC.
    pub ts: Timestamp,
    /// True when the source value was a bare date.
    pub date_only: bool,
}

/// Parses `20240601`, `20240601T100000` or `20240601T100000Z`.
///
/// Floating datetimes are taken as UTC.
#[must_use]
pub fn parse_ical_datetime(value: &str) -> Option<IcalTime> {
    let s = value.trim();
    if s.len() == 8 && !s.contains('T') {
        let date = civil::Date::strptime("%Y%m%d", s).ok()?;
        let zoned = date.at(0, 0, 0, 0).to_zoned(TimeZone::UTC).ok()?;
        return Some(IcalTime {
            ts: zoned.timestamp(),
            date_only: true,
        });
    }
    let naked = s.strip_suffix('Z').unwrap_or(s);
    let dt = civil::DateTime::strptime("%Y%m%dT%H%M%S", naked).ok()?;
    let zoned = dt.to_zoned(TimeZone::UTC).ok()?;
    Some(IcalTime {
        ts: zoned.timestamp(),
        date_only: false,
    })
}

/// Formats a timestamp in iCalendar UTC basic format.
#[must_use]
pub fn format_ical_utc(ts: Timestamp) -> String {
    ts.to_zoned(TimeZone::UTC)
        .strftime("%Y%m%dT%H%M%SZ")
        .to_string()
}

/// Formats a timestamp as an iCalendar date.
#[must_use]
pub fn format_ical_date(ts: Timestamp) -> String {
    ts.to_zoned(TimeZone::UTC).strftime("%Y%m%d").to_string()
}

/// Formats an [`IcalTime`] back in the shape it was parsed from.
#[must_use]
pub fn format_ical_time(t: &IcalTime) -> String {
    if t.date_only {
        format_ical_date(t.ts)
    } else {
        format_ical_utc(t.ts)
    }
}

/// Parses an RFC 5545 duration value (`P1D`, `-PT15M`, `P2W`, ...).
#[must_use]
pub fn parse_ical_duration(value: &str) -> Option<SignedDuration> {
    let s = value.trim();
    let (sign, rest) = match s.strip_prefix('-') {
        Some(rest) => (-1i64, rest),
        None => (1i64, s.strip_prefix('+').unwrap_or(s)),
    };
    let rest = rest.strip_prefix('P')?;

    let mut seconds = 0i64;
    let mut number = String::new();
    let mut in_time = false;
    for ch in rest.chars() {
        match ch {
            'T' => in_time = true,
            '0'..='9' => number.push(ch),
            'W' | 'D' | 'H' | 'M' | 'S' => {
                let n: i64 = number.parse().ok()?;
                number.clear();
                seconds += match (ch, in_time) {
                    ('W', _) => n * 7 * 86_400,
                    ('D', _) => n * 86_400,
                    ('H', true) => n * 3_600,
                    ('M', true) => n * 60,
                    ('S', true) => n,
                    _ => return None,
                };
            }
            _ => return None,
        }
    }
    if !number.is_empty() {
        return None;
    }
    Some(SignedDuration::from_secs(sign * seconds))
}

/// Formats a duration as an RFC 5545 duration value.
#[must_use]
pub fn format_ical_duration(duration: SignedDuration) -> String {
    let total = duration.as_secs();
    let sign = if total < 0 { "-" } else { "" };
    let mut secs = total.abs();

    let days = secs / 86_400;
    secs %= 86_400;
    let hours = secs / 3_600;
    secs %= 3_600;
    let minutes = secs / 60;
    secs %= 60;

    let mut out = format!("{sign}P");
    if days > 0 {
        let _ = write!(out, "{days}D");
    }
    if hours > 0 || minutes > 0 || secs > 0 {
        out.push('T');
        if hours > 0 {
            let _ = write!(out, "{hours}H");
        }
        if minutes > 0 {
            let _ = write!(out, "{minutes}M");
        }
        if secs > 0 {
            let _ = write!(out, "{secs}S");
        }
    }
    if out.ends_with('P') {
        out.push_str("T0S");
    }
    out
}

// ---------------------------------------------------------------------------
// Durations on components

/// Computes the duration of the primary component.
///
/// `DURATION` wins; otherwise the distance from `DTSTART` to `end_property`
/// (`DTEND` for events, `DUE` for todos). A date-form `DTSTART` alone means
/// one day; anything else means zero.
#[must_use]
pub fn get_duration(cal: &icalendar::Calendar, end_property: &str) -> SignedDuration {
    let Some(comp) = primary_component(cal) else {
        return SignedDuration::ZERO;
    };
    if let Some(d) = component_property(comp, "DURATION").and_then(|v| parse_ical_duration(&v)) {
        return d;
    }
    let start = component_property(comp, "DTSTART").and_then(|v| parse_ical_datetime(&v));
    let end = component_property(comp, end_property).and_then(|v| parse_ical_datetime(&v));
    match (start, end) {
        (Some(start), Some(end)) => end.ts.duration_since(start.ts),
        (Some(start), None) if start.date_only => SignedDuration::from_secs(86_400),
        _ => SignedDuration::ZERO,
    }
}

/// The due instant of a todo: `DUE`, else `DTEND`, else `DTSTART+DURATION`.
#[must_use]
pub fn get_due(cal: &icalendar::Calendar) -> Option<IcalTime> {
    let comp = primary_component(cal)?;
    if let Some(due) = component_property(comp, "DUE").and_then(|v| parse_ical_datetime(&v)) {
        return Some(due);
    }
    if let Some(end) = component_property(comp, "DTEND").and_then(|v| parse_ical_datetime(&v)) {
        return Some(end);
    }
    let start = component_property(comp, "DTSTART").and_then(|v| parse_ical_datetime(&v))?;
    let duration = component_property(comp, "DURATION").and_then(|v| parse_ical_duration(&v))?;
    Some(IcalTime {
        ts: start.ts + duration,
        date_only: start.date_only,
    })
}

/// Re-times the primary component so its span equals `duration`, moving
/// `movable` (`DTSTART` or the end property) and leaving the other end
/// fixed.
///
/// # Errors
///
/// Returns an error when the payload cannot be re-parsed.
pub fn set_duration(
    cal: &icalendar::Calendar,
    duration: SignedDuration,
    movable: &str,
    end_property: &str,
) -> Result<icalendar::Calendar, DavError> {
    let comp = primary_component(cal);
    let start = comp
        .and_then(|c| component_property(c, "DTSTART"))
        .and_then(|v| parse_ical_datetime(&v));
    let end = comp
        .and_then(|c| component_property(c, end_property))
        .and_then(|v| parse_ical_datetime(&v));
    let has_duration = comp
        .and_then(|c| component_property(c, "DURATION"))
        .is_some();

    let raw = cal.to_string();
    let unfolded = parser::unfold(&raw);

    let new_start = end.map(|e| format_ical_utc(e.ts - duration));
    let new_end = start.map(|s| format_ical_utc(s.ts + duration));
    let duration_value = format_ical_duration(duration);

    let mut pcal = read_parser_calendar(&unfolded)?;
    if let Some(comp) = pcal
        .components
        .iter_mut()
        .find(|c| !is_parser_timezone(c))
    {
        let has_end = end.is_some() || has_duration;
        if has_end && start.is_some() {
            if movable.eq_ignore_ascii_case("DTSTART") {
                if let Some(v) = new_start.as_deref() {
                    pset(comp, "DTSTART", v);
                }
            } else {
                premove(comp, &["DURATION"]);
                if let Some(v) = new_end.as_deref() {
                    pset(comp, end_property_name(end_property), v);
                }
            }
        } else if end.is_some() {
            if let Some(v) = new_start.as_deref() {
                pset(comp, "DTSTART", v);
            }
        } else if start.is_some() {
            if let Some(v) = new_end.as_deref() {
                pset(comp, end_property_name(end_property), v);
            }
        } else {
            premove(comp, &["DURATION"]);
            pset(comp, "DURATION", &duration_value);
        }
    }
    Ok(rebuild_calendar(pcal))
}

fn end_property_name(name: &str) -> &'static str {
    if name.eq_ignore_ascii_case("DUE") {
        "DUE"
    } else {
        "DTEND"
    }
}

// ---------------------------------------------------------------------------
// Task state

/// Whether a VTODO is still pending.
///
/// Pending means no `COMPLETED` property and a status of `NEEDS-ACTION`,
/// `IN-PROCESS`, or nothing at all.
#[must_use]
pub fn is_task_pending(cal: &icalendar::Calendar) -> bool {
    let Some(comp) = primary_component(cal) else {
        return false;
    };
    if component_property(comp, "COMPLETED").is_some() {
        return false;
    }
    match component_property(comp, "STATUS").as_deref() {
        None | Some("NEEDS-ACTION" | "IN-PROCESS") => true,
        Some("COMPLETED" | "CANCELLED") => false,
        Some(_) => true,
    }
}

/// Marks a VTODO completed in place. Idempotent.
pub fn mark_task_completed(cal: &mut icalendar::Calendar, ts: Timestamp) {
    set_primary_property(cal, "STATUS", "COMPLETED");
    set_primary_property(cal, "COMPLETED", &format_ical_utc(ts));
}

/// Reverts a VTODO to pending: `STATUS:NEEDS-ACTION`, no `COMPLETED`.
/// Idempotent.
///
/// # Errors
///
/// Returns an error when the payload cannot be re-parsed.
pub fn mark_task_uncompleted(cal: &icalendar::Calendar) -> Result<icalendar::Calendar, DavError> {
    let raw = cal.to_string();
    let unfolded = parser::unfold(&raw);
    let mut pcal = read_parser_calendar(&unfolded)?;
    if let Some(comp) = pcal
        .components
        .iter_mut()
        .find(|c| !is_parser_timezone(c))
    {
        premove(comp, &["COMPLETED"]);
        pset(comp, "STATUS", "NEEDS-ACTION");
    }
    Ok(rebuild_calendar(pcal))
}

// ---------------------------------------------------------------------------
// Recurrence

/// Policy for picking the recurrence base when completing recurring tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeadlinePolicy {
    /// Fixed deadlines when the rule carries any `BY*` part, completion-based
    /// otherwise.
    #[default]
    Auto,
    /// Next occurrence is computed from the component's own schedule.
    Fixed,
    /// Next occurrence is computed from the completion instant.
    FromCompletion,
}

/// Computes the next occurrence of the primary component's `RRULE` strictly
/// after the completion instant.
///
/// The rule's `COUNT` is ignored here; series termination is handled by
/// [`reduce_rrule_count`].
///
/// # Errors
///
/// Returns an error when the rule cannot be evaluated by the recurrence
/// engine.
pub fn calculate_next_recurrence(
    cal: &icalendar::Calendar,
    completion: Timestamp,
    policy: DeadlinePolicy,
) -> Result<Option<Timestamp>, DavError> {
    let Some(comp) = primary_component(cal) else {
        return Ok(None);
    };
    let Some(rrule) = component_property(comp, "RRULE") else {
        return Ok(None);
    };

    let fixed = match policy {
        DeadlinePolicy::Auto => rrule
            .split(';')
            .any(|part| part.trim_start().to_ascii_uppercase().starts_with("BY")),
        DeadlinePolicy::Fixed => true,
        DeadlinePolicy::FromCompletion => false,
    };

    let dtstart = if fixed {
        component_property(comp, "DTSTART")
            .and_then(|v| parse_ical_datetime(&v))
            .map_or(completion, |t| t.ts)
    } else {
        completion - get_duration(cal, "DUE")
    };

    let rule = strip_rrule_part(&rrule, "COUNT");
    let rule_text = format!(
        "DTSTART:{}\nRRULE:{}",
        format_ical_utc(dtstart),
        rule
    );
    let set: RRuleSet = rule_text
        .parse()
        .map_err(|e| DavError::Ical(format!("RRULE evaluation failed: {e}")))?;

    let bound = completion.as_second().max(dtstart.as_second());
    for occurrence in set.into_iter().take(10_000) {
        if occurrence.timestamp() > bound {
            let ts = Timestamp::from_second(occurrence.timestamp())
                .map_err(|e| DavError::Ical(e.to_string()))?;
            return Ok(Some(ts));
        }
    }
    Ok(None)
}

fn strip_rrule_part(rrule: &str, key: &str) -> String {
    rrule
        .split(';')
        .filter(|part| {
            !part
                .trim_start()
                .to_ascii_uppercase()
                .starts_with(&format!("{key}="))
        })
        .collect::<Vec<_>>()
        .join(";")
}

/// Decrements `COUNT` in the primary component's `RRULE`.
///
/// Returns `false` when the count reached zero, meaning the series is over
/// and the caller should stop spawning occurrences.
#[must_use]
pub fn reduce_rrule_count(cal: &mut icalendar::Calendar) -> bool {
    let Some(rrule) = primary_property(cal, "RRULE") else {
        return true;
    };
    let Some(count) = rrule.split(';').find_map(|part| {
        part.trim()
            .strip_prefix("COUNT=")
            .or_else(|| part.trim().strip_prefix("count="))
            .and_then(|v| v.parse::<i64>().ok())
    }) else {
        return true;
    };
    if count <= 1 {
        return false;
    }
    let rewritten = rrule
        .split(';')
        .map(|part| {
            if part.trim().to_ascii_uppercase().starts_with("COUNT=") {
                format!("COUNT={}", count - 1)
            } else {
                part.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(";");
    set_primary_property(cal, "RRULE", &rewritten);
    true
}

// ---------------------------------------------------------------------------
// Relations

const RELTYPE_REVERSE: [(&str, &str); 5] = [
    ("PARENT", "CHILD"),
    ("CHILD", "PARENT"),
    ("SIBLING", "SIBLING"),
    ("DEPENDS-ON", "FINISHTOSTART"),
    ("FINISHTOSTART", "DEPENDENT"),
];

/// The reverse of an RFC 9253 relation type.
#[must_use]
pub fn reverse_reltype(reltype: &str) -> Option<&'static str> {
    let upper = reltype.to_ascii_uppercase();
    RELTYPE_REVERSE
        .iter()
        .find(|(from, _)| *from == upper)
        .map(|(_, to)| *to)
}

/// Extracts `RELATED-TO` relations as a reltype-to-UIDs map. A missing
/// `RELTYPE` parameter means `PARENT`.
///
/// # Errors
///
/// Returns an error when the payload cannot be re-parsed.
pub fn extract_relations(
    cal: &icalendar::Calendar,
    reltypes: Option<&[&str]>,
) -> Result<BTreeMap<String, BTreeSet<String>>, DavError> {
    let raw = cal.to_string();
    let unfolded = parser::unfold(&raw);
    let pcal = read_parser_calendar(&unfolded)?;

    let mut relations: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for comp in &pcal.components {
        if is_parser_timezone(comp) {
            continue;
        }
        for prop in &comp.properties {
            if !prop.name.as_str().eq_ignore_ascii_case("RELATED-TO") {
                continue;
            }
            let reltype = prop
                .params
                .iter()
                .find(|p| p.key.as_str().eq_ignore_ascii_case("RELTYPE"))
                .and_then(|p| p.val.as_ref().map(|v| v.as_str().to_ascii_uppercase()))
                .unwrap_or_else(|| "PARENT".to_string());
            if let Some(wanted) = reltypes {
                if !wanted.iter().any(|w| w.eq_ignore_ascii_case(&reltype)) {
                    continue;
                }
            }
            eprintln!("DEBUG reltype={:?} val={:?}", reltype, prop.val.as_str());
            relations
                .entry(reltype)
                .or_default()
                .insert(prop.val.as_str().to_string());
        }
    }
    Ok(relations)
}

// ---------------------------------------------------------------------------
// Quirk repair and sync tokens

/// Percent-encodes an unquoted `@` in relative calendar-home-set paths
/// (owncloud returns them raw).
#[must_use]
pub fn sanitize_calendar_home_set_url(url: &str) -> String {
    if url.contains('@') && !url.contains("://") && !url.contains("%40") {
        url.replace('@', "%40")
    } else {
        url.to_string()
    }
}

/// Computes a deterministic stand-in sync token over `(url, etag)` pairs.
///
/// Order-independent: any permutation of the input produces the same token.
/// Used when the server lacks `sync-collection` support.
#[must_use]
pub fn generate_fake_sync_token(objects: &[(String, String)]) -> String {
    let mut lines: Vec<String> = objects
        .iter()
        .map(|(url, etag)| format!("{url}\0{etag}\n"))
        .collect();
    lines.sort();

    let mut hasher = Sha256::new();
    for line in &lines {
        hasher.update(line.as_bytes());
    }
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(64);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    format!("fake-{hex}")
}

/// True when a token came from [`generate_fake_sync_token`].
#[must_use]
pub fn is_fake_sync_token(token: &str) -> bool {
    token.starts_with("fake-")
}

// ---------------------------------------------------------------------------
// Attendees (parser-level because ATTENDEE is multi-valued)

/// Default parameters applied to a newly added attendee unless overridden.
const ATTENDEE_DEFAULTS: [(&str, &str); 4] = [
    ("PARTSTAT", "NEEDS-ACTION"),
    ("CUTYPE", "UNKNOWN"),
    ("RSVP", "TRUE"),
    ("ROLE", "REQ-PARTICIPANT"),
];

/// Adds an `ATTENDEE` line to the primary component.
///
/// `params` override the defaults (`PARTSTAT=NEEDS-ACTION`,
/// `CUTYPE=UNKNOWN`, `RSVP=TRUE`, `ROLE=REQ-PARTICIPANT`); pass
/// `with_defaults=false` to skip the defaults entirely.
///
/// # Errors
///
/// Returns an error when the payload cannot be re-parsed.
pub fn add_attendee(
    cal: &icalendar::Calendar,
    address: &str,
    common_name: Option<&str>,
    with_defaults: bool,
    params: &[(String, String)],
) -> Result<icalendar::Calendar, DavError> {
    let raw = cal.to_string();
    let unfolded = parser::unfold(&raw);

    let value = if address.contains(':') {
        address.to_string()
    } else {
        format!("mailto:{address}")
    };

    let mut combined: Vec<(String, String)> = Vec::new();
    if let Some(cn) = common_name {
        combined.push(("CN".to_string(), cn.to_string()));
    }
    if with_defaults {
        for (key, val) in ATTENDEE_DEFAULTS {
            if !params.iter().any(|(k, _)| k.eq_ignore_ascii_case(key)) {
                combined.push((key.to_string(), val.to_string()));
            }
        }
    }
    combined.extend(params.iter().cloned());

    let mut pcal = read_parser_calendar(&unfolded)?;
    if let Some(comp) = pcal
        .components
        .iter_mut()
        .find(|c| !is_parser_timezone(c))
    {
        let mut prop = parser::Property {
            name: "ATTENDEE".into(),
            val: value.as_str().into(),
            params: Vec::new(),
        };
        for (key, val) in &combined {
            prop.params.push(parser::Parameter {
                key: key.as_str().into(),
                val: Some(val.as_str().into()),
            });
        }
        comp.properties.push(prop);
    }
    Ok(rebuild_calendar(pcal))
}

/// Sets `PARTSTAT` on the `ATTENDEE` entry matching one of the given
/// calendar user addresses. Returns the updated calendar and whether a
/// matching attendee was found.
///
/// # Errors
///
/// Returns an error when the payload cannot be re-parsed.
pub fn set_attendee_partstat(
    cal: &icalendar::Calendar,
    addresses: &[String],
    partstat: &str,
) -> Result<(icalendar::Calendar, bool), DavError> {
    let raw = cal.to_string();
    let unfolded = parser::unfold(&raw);
    let mut pcal = read_parser_calendar(&unfolded)?;
    let mut matched = false;

    for comp in &mut pcal.components {
        if is_parser_timezone(comp) {
            continue;
        }
        for prop in &mut comp.properties {
            if !prop.name.as_str().eq_ignore_ascii_case("ATTENDEE") {
                continue;
            }
            let value = prop.val.as_str().to_ascii_lowercase();
            if !addresses
                .iter()
                .any(|a| value == a.to_ascii_lowercase() || value.ends_with(&a.to_ascii_lowercase()))
            {
                continue;
            }
            matched = true;
            prop.params
                .retain(|p| !p.key.as_str().eq_ignore_ascii_case("PARTSTAT"));
            prop.params.push(parser::Parameter {
                key: "PARTSTAT".into(),
                val: Some(partstat.into()),
            });
        }
    }
    Ok((rebuild_calendar(pcal), matched))
}

// ---------------------------------------------------------------------------
// Recurrence sets

/// Writes a per-instance override into its master's recurrence set: the
/// subcomponent with the same `RECURRENCE-ID` is replaced, or the override
/// is appended when the instance had no override yet.
///
/// # Errors
///
/// Returns an error when the override carries no `RECURRENCE-ID`.
pub fn merge_override(
    master: &icalendar::Calendar,
    ours: &icalendar::Calendar,
) -> Result<icalendar::Calendar, DavError> {
    let our_comp = primary_component(ours)
        .ok_or_else(|| DavError::Ical("override has no component".to_string()))?;
    let rid = component_property(our_comp, "RECURRENCE-ID")
        .ok_or_else(|| DavError::Ical("override has no RECURRENCE-ID".to_string()))?;

    let mut merged = clone_calendar(master);
    let existing = merged.components.iter().position(|c| {
        component_property(c, "RECURRENCE-ID").as_deref() == Some(rid.as_str())
    });
    match existing {
        Some(index) => merged.components[index] = our_comp.clone(),
        None => merged.components.push(our_comp.clone()),
    }
    Ok(merged)
}

/// Rebases a whole recurrence set on an edited instance.
///
/// The edited instance's offset from its `RECURRENCE-ID` is applied to the
/// master's `DTSTART` and to every override's `RECURRENCE-ID`; the master's
/// recurrence rules (`RRULE`/`RDATE`/`EXDATE`/`EXRULE`) survive, everything
/// else comes from the edited instance.
///
/// # Errors
///
/// Returns an error when the instance lacks `RECURRENCE-ID`/`DTSTART` or a
/// payload cannot be re-parsed.
pub fn merge_all_recurrences(
    master: &icalendar::Calendar,
    ours: &icalendar::Calendar,
) -> Result<icalendar::Calendar, DavError> {
    const RULE_PROPS: [&str; 4] = ["RRULE", "RDATE", "EXDATE", "EXRULE"];
    const TIME_PROPS: [&str; 5] = ["RECURRENCE-ID", "DTSTART", "DTEND", "DUE", "DURATION"];

    let our_comp = primary_component(ours)
        .ok_or_else(|| DavError::Ical("instance has no component".to_string()))?;
    let rid = component_property(our_comp, "RECURRENCE-ID")
        .and_then(|v| parse_ical_datetime(&v))
        .ok_or_else(|| DavError::Ical("instance has no RECURRENCE-ID".to_string()))?;
    let our_start = component_property(our_comp, "DTSTART")
        .and_then(|v| parse_ical_datetime(&v))
        .ok_or_else(|| DavError::Ical("instance has no DTSTART".to_string()))?;
    let diff = our_start.ts.duration_since(rid.ts);

    let end_property = if component_property(our_comp, "DUE").is_some() {
        "DUE"
    } else {
        "DTEND"
    };
    let duration = get_duration(ours, end_property);

    let master_comp = master
        .components
        .iter()
        .find(|c| {
            component_kind(c) != "VTIMEZONE" && component_property(c, "RECURRENCE-ID").is_none()
        })
        .ok_or_else(|| DavError::Ical("recurrence set has no master".to_string()))?;
    let master_start = component_property(master_comp, "DTSTART")
        .and_then(|v| parse_ical_datetime(&v))
        .ok_or_else(|| DavError::Ical("master has no DTSTART".to_string()))?;

    let new_start = IcalTime {
        ts: master_start.ts + diff,
        date_only: master_start.date_only && our_start.date_only,
    };
    let new_start_str = format_ical_time(&new_start);
    let new_end_str = format_ical_time(&IcalTime {
        ts: new_start.ts + duration,
        date_only: new_start.date_only,
    });

    // Shifted RECURRENCE-IDs for the other overrides, keyed by their
    // current value.
    let mut shifted: Vec<(String, String)> = Vec::new();
    for comp in &master.components {
        if let Some(old) = component_property(comp, "RECURRENCE-ID") {
            if let Some(parsed) = parse_ical_datetime(&old) {
                let new = format_ical_time(&IcalTime {
                    ts: parsed.ts + diff,
                    date_only: parsed.date_only,
                });
                shifted.push((old, new));
            }
        }
    }

    let rules: Vec<(String, String)> = RULE_PROPS
        .iter()
        .filter_map(|name| {
            component_property(master_comp, name).map(|v| ((*name).to_string(), v))
        })
        .collect();

    let ours_raw = ours.to_string();
    let ours_unfolded = parser::unfold(&ours_raw);
    let master_raw = master.to_string();
    let master_unfolded = parser::unfold(&master_raw);

    let ours_pcal = read_parser_calendar(&ours_unfolded)?;
    let mut master_pcal = read_parser_calendar(&master_unfolded)?;

    let new_primary = ours_pcal
        .components
        .iter()
        .find(|c| !is_parser_timezone(c))
        .cloned();

    for comp in &mut master_pcal.components {
        if is_parser_timezone(comp) {
            continue;
        }
        if comp
            .properties
            .iter()
            .any(|p| p.name.as_str().eq_ignore_ascii_case("RECURRENCE-ID"))
        {
            // Shift override anchors along with the series.
            for prop in &mut comp.properties {
                if prop.name.as_str().eq_ignore_ascii_case("RECURRENCE-ID") {
                    if let Some((_, new)) = shifted
                        .iter()
                        .find(|(old, _)| old.as_str() == prop.val.as_str())
                    {
                        prop.val = new.as_str().into();
                    }
                }
            }
            continue;
        }

        // The master is rebuilt from the edited instance.
        if let Some(new_primary) = &new_primary {
            comp.properties = new_primary.properties.clone();
        }
        premove(comp, &TIME_PROPS);
        premove(comp, &RULE_PROPS);
        pset(comp, "DTSTART", new_start_str.as_str());
        pset(comp, end_property, new_end_str.as_str());
        for (name, value) in &rules {
            comp.properties.push(parser::Property {
                name: name.as_str().into(),
                val: value.as_str().into(),
                params: Vec::new(),
            });
        }
    }

    Ok(rebuild_calendar(master_pcal))
}

/// Appends the next uncompleted instance of a recurring task: a copy of
/// the master anchored at `next` via `RECURRENCE-ID`, retimed to the same
/// duration, status `NEEDS-ACTION`, no rule of its own.
///
/// # Errors
///
/// Returns an error when the payload cannot be re-parsed.
pub fn append_next_instance(
    cal: &icalendar::Calendar,
    next: Timestamp,
    duration: SignedDuration,
    end_property: &str,
) -> Result<icalendar::Calendar, DavError> {
    let comp = primary_component(cal)
        .ok_or_else(|| DavError::Ical("task has no component".to_string()))?;
    let date_only = component_property(comp, "DTSTART")
        .and_then(|v| parse_ical_datetime(&v))
        .is_some_and(|t| t.date_only);
    let has_end = component_property(comp, end_property).is_some()
        || component_property(comp, "DURATION").is_some();

    let next_time = IcalTime {
        ts: next,
        date_only,
    };
    let next_str = format_ical_time(&next_time);
    let due_str = format_ical_time(&IcalTime {
        ts: next + duration,
        date_only,
    });

    let raw = cal.to_string();
    let unfolded = parser::unfold(&raw);
    let pcal = read_parser_calendar(&unfolded)?;

    let master = pcal
        .components
        .iter()
        .find(|c| {
            !is_parser_timezone(c)
                && !c
                    .properties
                    .iter()
                    .any(|p| p.name.as_str().eq_ignore_ascii_case("RECURRENCE-ID"))
        })
        .ok_or_else(|| DavError::Ical("task has no master component".to_string()))?;

    let mut instance = master.clone();
    premove(
        &mut instance,
        &["RRULE", "RDATE", "EXDATE", "EXRULE", "COMPLETED", "DURATION"],
    );
    pset(&mut instance, "RECURRENCE-ID", next_str.as_str());
    pset(&mut instance, "DTSTART", next_str.as_str());
    if has_end {
        pset(&mut instance, end_property_name(end_property), due_str.as_str());
    }
    pset(&mut instance, "STATUS", "NEEDS-ACTION");

    let mut result = rebuild_calendar(pcal);
    result.components.push(CalendarComponent::from(instance));
    Ok(result)
}

/// Moves the primary component to start at `next`, keeping its duration.
pub fn retime_primary(
    cal: &mut icalendar::Calendar,
    next: Timestamp,
    duration: SignedDuration,
    end_property: &str,
) {
    let Some(comp) = primary_component(cal) else {
        return;
    };
    let date_only = component_property(comp, "DTSTART")
        .and_then(|v| parse_ical_datetime(&v))
        .is_some_and(|t| t.date_only);
    let has_end = component_property(comp, end_property).is_some()
        || component_property(comp, "DTEND").is_some();

    let next_str = format_ical_time(&IcalTime {
        ts: next,
        date_only,
    });
    set_primary_property(cal, "DTSTART", &next_str);
    if has_end {
        let due_str = format_ical_time(&IcalTime {
            ts: next + duration,
            date_only,
        });
        set_primary_property(cal, end_property_name(end_property), &due_str);
    }
}

/// Expands a recurrence set into per-occurrence calendars within
/// `[start, end)`. Overrides replace their generated instances; VTIMEZONE
/// components are carried into every occurrence.
///
/// A component without a rule yields itself when it overlaps the range.
///
/// # Errors
///
/// Returns an error when the payload cannot be re-parsed or the rule
/// cannot be evaluated.
pub fn expand_occurrences(
    cal: &icalendar::Calendar,
    start: Timestamp,
    end: Timestamp,
) -> Result<Vec<icalendar::Calendar>, DavError> {
    let Some(master) = cal.components.iter().find(|c| {
        component_kind(c) != "VTIMEZONE" && component_property(c, "RECURRENCE-ID").is_none()
    }) else {
        return Ok(vec![clone_calendar(cal)]);
    };

    let dtstart = component_property(master, "DTSTART").and_then(|v| parse_ical_datetime(&v));
    let rrule = component_property(master, "RRULE");

    let (Some(dtstart), Some(rrule)) = (dtstart, rrule) else {
        return Ok(vec![clone_calendar(cal)]);
    };

    let end_property = if component_property(master, "DUE").is_some() {
        "DUE"
    } else {
        "DTEND"
    };
    let duration = get_duration(cal, end_property);
    let has_end = component_property(master, end_property).is_some();

    let rule_text = format!(
        "DTSTART:{}\nRRULE:{}",
        format_ical_utc(dtstart.ts),
        rrule
    );
    let set: RRuleSet = rule_text
        .parse()
        .map_err(|e| DavError::Ical(format!("RRULE evaluation failed: {e}")))?;

    // Precompute the occurrence strings so the parser-level pass can
    // borrow them.
    let mut occurrences: Vec<(String, String)> = Vec::new();
    for occurrence in set.into_iter().take(10_000) {
        let ts = Timestamp::from_second(occurrence.timestamp())
            .map_err(|e| DavError::Ical(e.to_string()))?;
        if ts >= end {
            break;
        }
        if ts < start && ts + duration <= start {
            continue;
        }
        let at = IcalTime {
            ts,
            date_only: dtstart.date_only,
        };
        let until = IcalTime {
            ts: ts + duration,
            date_only: dtstart.date_only,
        };
        occurrences.push((format_ical_time(&at), format_ical_time(&until)));
    }

    let raw = cal.to_string();
    let unfolded = parser::unfold(&raw);
    let pcal = read_parser_calendar(&unfolded)?;

    let timezones: Vec<parser::Component<'_>> = pcal
        .components
        .iter()
        .filter(|c| is_parser_timezone(c))
        .cloned()
        .collect();
    let pmaster = pcal
        .components
        .iter()
        .find(|c| {
            !is_parser_timezone(c)
                && !c
                    .properties
                    .iter()
                    .any(|p| p.name.as_str().eq_ignore_ascii_case("RECURRENCE-ID"))
        })
        .ok_or_else(|| DavError::Ical("recurrence set has no master".to_string()))?;
    let overrides: Vec<&parser::Component<'_>> = pcal
        .components
        .iter()
        .filter(|c| {
            c.properties
                .iter()
                .any(|p| p.name.as_str().eq_ignore_ascii_case("RECURRENCE-ID"))
        })
        .collect();

    let mut out = Vec::new();
    for (at, until) in &occurrences {
        let instance = overrides
            .iter()
            .find(|c| {
                c.properties.iter().any(|p| {
                    p.name.as_str().eq_ignore_ascii_case("RECURRENCE-ID")
                        && p.val.as_str() == at.as_str()
                })
            })
            .map_or_else(
                || {
                    let mut inst = pmaster.clone();
                    premove(&mut inst, &["RRULE", "RDATE", "EXDATE", "EXRULE", "DURATION"]);
                    pset(&mut inst, "RECURRENCE-ID", at.as_str());
                    pset(&mut inst, "DTSTART", at.as_str());
                    if has_end {
                        pset(&mut inst, end_property_name(end_property), until.as_str());
                    }
                    inst
                },
                |c| (*c).clone(),
            );

        let mut occurrence_cal = icalendar::Calendar::new();
        for tz in &timezones {
            occurrence_cal
                .components
                .push(CalendarComponent::from(tz.clone()));
        }
        occurrence_cal
            .components
            .push(CalendarComponent::from(instance));
        out.push(occurrence_cal);
    }

    Ok(out)
}

/// Splits a calendar with several non-VTIMEZONE components into one
/// calendar per component, carrying VTIMEZONEs along.
#[must_use]
pub fn split_components(cal: &icalendar::Calendar) -> Vec<icalendar::Calendar> {
    let timezones: Vec<&CalendarComponent> = cal
        .components
        .iter()
        .filter(|c| component_kind(c) == "VTIMEZONE")
        .collect();
    let payload: Vec<&CalendarComponent> = cal
        .components
        .iter()
        .filter(|c| component_kind(c) != "VTIMEZONE")
        .collect();
    if payload.len() <= 1 {
        return vec![clone_calendar(cal)];
    }
    payload
        .into_iter()
        .map(|comp| {
            let mut split = icalendar::Calendar::new();
            for tz in &timezones {
                split.components.push((*tz).clone());
            }
            split.components.push(comp.clone());
            split
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Principal helpers

/// Extracts principal data from a PROPFIND entry.
#[must_use]
pub fn principal_info_from(entry: &PropfindResult) -> crate::types::PrincipalInfo {
    let get = |name: &QName| entry.properties.get(&name.to_string());
    crate::types::PrincipalInfo {
        url: get(&QName::dav("principal-URL"))
            .or_else(|| get(&QName::dav("current-user-principal")))
            .and_then(PropValue::as_href)
            .map(str::to_string),
        display_name: get(&QName::dav("displayname"))
            .and_then(|v| v.as_text())
            .map(str::to_string),
        calendar_home_set: get(&QName::caldav("calendar-home-set"))
            .and_then(PropValue::as_href)
            .map(sanitize_calendar_home_set_url),
        calendar_user_addresses: get(&QName::caldav("calendar-user-address-set"))
            .and_then(PropValue::as_list)
            .map(<[String]>::to_vec)
            .unwrap_or_default(),
    }
}

/// Builds an iCalendar CAL-ADDRESS value line for a principal: the address
/// plus optional `CN` and `CUTYPE` parameters, pre-rendered for direct
/// insertion as `ORGANIZER`/`ATTENDEE` parameters.
#[must_use]
pub fn vcal_address_params(
    display_name: Option<&str>,
    cutype: Option<&str>,
) -> Vec<(String, String)> {
    let mut params = Vec::new();
    if let Some(cn) = display_name {
        params.push(("CN".to_string(), cn.to_string()));
    }
    if let Some(cutype) = cutype {
        params.push(("CUTYPE".to_string(), cutype.to_string()));
    }
    params
}

/// Extracts the calendar id (last path segment) from a calendar URL.
#[must_use]
pub fn calendar_id_from_url(url: &str) -> Option<String> {
    let trimmed = url.trim_end_matches('/');
    let id = trimmed.rsplit('/').next().unwrap_or_default();
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// The resource type qualified name marking calendar collections.
#[must_use]
pub fn calendar_resource_type() -> QName {
    QName::new(ns::CALDAV, "calendar")
}
