// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

//! Calendar search: server-side query construction plus a client-side
//! post-filter.
//!
//! Plenty of servers implement calendar-query filters incompletely, so by
//! default the same predicates are re-applied on the returned objects. The
//! post-filter works on the parser-level property list, which sees
//! multi-valued properties (ATTENDEE, CATEGORIES) that the component map
//! hides.

use std::cmp::Ordering;

use icalendar::parser;
use jiff::Timestamp;

use crate::calendar::Calendar;
use crate::error::DavError;
use crate::object::{CalendarObject, ComponentKind};
use crate::ops;
use crate::protocol::ProtocolClient;
use crate::request::{CalendarQueryRequest, FilterOp, PropFilter};

/// One client-side sort key: a property name, optionally `-`-prefixed for
/// descending order.
#[derive(Debug, Clone)]
struct SortKey {
    prop: String,
    descending: bool,
}

/// Builder-style query descriptor for [`Calendar::search`].
#[derive(Debug, Clone, Default)]
pub struct CalendarSearcher {
    kind: Option<ComponentKind>,
    start: Option<Timestamp>,
    end: Option<Timestamp>,
    expand: bool,
    filters: Vec<PropFilter>,
    include_completed: bool,
    skip_post_filter: bool,
    split_expanded: bool,
    sort_keys: Vec<SortKey>,
}

impl CalendarSearcher {
    /// Creates an empty searcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects events.
    #[must_use]
    pub fn event(mut self) -> Self {
        self.kind = Some(ComponentKind::Event);
        self
    }

    /// Selects todos.
    #[must_use]
    pub fn todo(mut self) -> Self {
        self.kind = Some(ComponentKind::Todo);
        self
    }

    /// Selects journals.
    #[must_use]
    pub fn journal(mut self) -> Self {
        self.kind = Some(ComponentKind::Journal);
        self
    }

    /// Restricts to a time range.
    #[must_use]
    pub fn time_range(mut self, start: Timestamp, end: Timestamp) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    /// Asks for recurrence expansion inside the time range.
    #[must_use]
    pub fn expand(mut self) -> Self {
        self.expand = true;
        self
    }

    /// Includes completed todos.
    #[must_use]
    pub fn include_completed(mut self) -> Self {
        self.include_completed = true;
        self
    }

    /// Splits multi-occurrence results into one object per occurrence.
    #[must_use]
    pub fn split_expanded(mut self) -> Self {
        self.split_expanded = true;
        self
    }

    /// Trusts the server filters; skips the client-side re-check.
    #[must_use]
    pub fn no_post_filter(mut self) -> Self {
        self.skip_post_filter = true;
        self
    }

    /// Sorts results by the given property names; a `-` prefix reverses a
    /// key. Objects missing a key sort last.
    #[must_use]
    pub fn sort_by(mut self, keys: &[&str]) -> Self {
        self.sort_keys = keys
            .iter()
            .map(|key| match key.strip_prefix('-') {
                Some(prop) => SortKey {
                    prop: prop.to_ascii_uppercase(),
                    descending: true,
                },
                None => SortKey {
                    prop: key.to_ascii_uppercase(),
                    descending: false,
                },
            })
            .collect();
        self
    }

    /// Adds a substring filter on a property.
    #[must_use]
    pub fn prop_contains(mut self, name: &str, pattern: &str, case_sensitive: bool) -> Self {
        self.filters.push(PropFilter {
            name: name.to_ascii_uppercase(),
            op: FilterOp::Contains {
                pattern: pattern.to_string(),
                case_sensitive,
                negate: false,
            },
            param_filters: Vec::new(),
        });
        self
    }

    /// Adds an equality filter on a property.
    #[must_use]
    pub fn prop_equals(mut self, name: &str, pattern: &str, case_sensitive: bool) -> Self {
        self.filters.push(PropFilter {
            name: name.to_ascii_uppercase(),
            op: FilterOp::Equals {
                pattern: pattern.to_string(),
                case_sensitive,
                negate: false,
            },
            param_filters: Vec::new(),
        });
        self
    }

    /// Requires a property to exist.
    #[must_use]
    pub fn prop_defined(mut self, name: &str) -> Self {
        self.filters.push(PropFilter {
            name: name.to_ascii_uppercase(),
            op: FilterOp::IsDefined,
            param_filters: Vec::new(),
        });
        self
    }

    /// Requires a property to be absent.
    #[must_use]
    pub fn prop_not_defined(mut self, name: &str) -> Self {
        self.filters.push(PropFilter {
            name: name.to_ascii_uppercase(),
            op: FilterOp::IsNotDefined,
            param_filters: Vec::new(),
        });
        self
    }

    /// Adds a parameter filter on a property (e.g. `PARTSTAT` on
    /// `ATTENDEE`).
    #[must_use]
    pub fn param_filter(mut self, prop: &str, param: &str, pattern: Option<&str>) -> Self {
        self.filters.push(PropFilter {
            name: prop.to_ascii_uppercase(),
            op: FilterOp::IsDefined,
            param_filters: vec![(param.to_ascii_uppercase(), pattern.map(str::to_string))],
        });
        self
    }

    /// Substring filter on `SUMMARY`.
    #[must_use]
    pub fn summary(self, pattern: &str) -> Self {
        self.prop_contains("SUMMARY", pattern, false)
    }

    /// Substring filter on `CATEGORIES`.
    #[must_use]
    pub fn category(self, pattern: &str) -> Self {
        self.prop_contains("CATEGORIES", pattern, false)
    }

    /// Equality filter on `UID`.
    #[must_use]
    pub fn uid(self, uid: &str) -> Self {
        self.prop_equals("UID", uid, true)
    }

    /// Substring filter on `COMMENT`.
    #[must_use]
    pub fn comment(self, pattern: &str) -> Self {
        self.prop_contains("COMMENT", pattern, false)
    }

    /// Substring filter on `DESCRIPTION`.
    #[must_use]
    pub fn description(self, pattern: &str) -> Self {
        self.prop_contains("DESCRIPTION", pattern, false)
    }

    /// Equality filter on `CLASS`.
    #[must_use]
    pub fn classification(self, pattern: &str) -> Self {
        self.prop_equals("CLASS", pattern, false)
    }

    /// Substring filter on `LOCATION`.
    #[must_use]
    pub fn location(self, pattern: &str) -> Self {
        self.prop_contains("LOCATION", pattern, false)
    }

    /// Substring filter on `RESOURCES`.
    #[must_use]
    pub fn resources(self, pattern: &str) -> Self {
        self.prop_contains("RESOURCES", pattern, false)
    }

    /// Equality filter on `STATUS`.
    #[must_use]
    pub fn status(self, pattern: &str) -> Self {
        self.prop_equals("STATUS", pattern, false)
    }

    /// Equality filter on `TRANSP`.
    #[must_use]
    pub fn transparency(self, pattern: &str) -> Self {
        self.prop_equals("TRANSP", pattern, false)
    }

    /// Equality filter on `PRIORITY`.
    #[must_use]
    pub fn priority(self, pattern: &str) -> Self {
        self.prop_equals("PRIORITY", pattern, false)
    }

    /// Substring filter on `ORGANIZER`.
    #[must_use]
    pub fn organizer(self, pattern: &str) -> Self {
        self.prop_contains("ORGANIZER", pattern, false)
    }

    /// Substring filter on `ATTENDEE`.
    #[must_use]
    pub fn attendee(self, pattern: &str) -> Self {
        self.prop_contains("ATTENDEE", pattern, false)
    }
}

/// One property of the primary component, parser-level: name, value,
/// parameters.
type PropEntry = (String, String, Vec<(String, String)>);

fn primary_props(cal: &icalendar::Calendar) -> Result<Vec<PropEntry>, DavError> {
    let raw = cal.to_string();
    let unfolded = parser::unfold(&raw);
    let pcal = ops::read_parser_calendar(&unfolded)?;
    let Some(comp) = pcal
        .components
        .iter()
        .find(|c| !c.name.as_str().eq_ignore_ascii_case("VTIMEZONE"))
    else {
        return Ok(Vec::new());
    };
    Ok(comp
        .properties
        .iter()
        .map(|p| {
            (
                p.name.as_str().to_ascii_uppercase(),
                p.val.as_str().to_string(),
                p.params
                    .iter()
                    .map(|param| {
                        (
                            param.key.as_str().to_ascii_uppercase(),
                            param
                                .val
                                .as_ref()
                                .map(|v| v.as_str().to_string())
                                .unwrap_or_default(),
                        )
                    })
                    .collect(),
            )
        })
        .collect())
}

fn text_matches(value: &str, pattern: &str, case_sensitive: bool, equals: bool) -> bool {
    if case_sensitive {
        if equals {
            value == pattern
        } else {
            value.contains(pattern)
        }
    } else {
        let value = value.to_ascii_lowercase();
        let pattern = pattern.to_ascii_lowercase();
        if equals {
            value == pattern
        } else {
            value.contains(&pattern)
        }
    }
}

fn filter_matches(props: &[PropEntry], filter: &PropFilter) -> bool {
    let entries: Vec<&PropEntry> = props.iter().filter(|(n, _, _)| *n == filter.name).collect();

    let op_ok = match &filter.op {
        FilterOp::IsDefined => !entries.is_empty(),
        FilterOp::IsNotDefined => entries.is_empty(),
        FilterOp::Contains {
            pattern,
            case_sensitive,
            negate,
        } => {
            let hit = entries
                .iter()
                .any(|(_, v, _)| text_matches(v, pattern, *case_sensitive, false));
            hit != *negate
        }
        FilterOp::Equals {
            pattern,
            case_sensitive,
            negate,
        } => {
            let hit = entries
                .iter()
                .any(|(_, v, _)| text_matches(v, pattern, *case_sensitive, true));
            hit != *negate
        }
    };
    if !op_ok {
        return false;
    }

    filter.param_filters.iter().all(|(param, pattern)| {
        entries.iter().any(|(_, _, params)| {
            params.iter().any(|(key, value)| {
                key == param
                    && pattern
                        .as_ref()
                        .is_none_or(|p| text_matches(value, p, false, false))
            })
        })
    })
}

fn prop_time(props: &[PropEntry], name: &str) -> Option<ops::IcalTime> {
    props
        .iter()
        .find(|(n, _, _)| n == name)
        .and_then(|(_, v, _)| ops::parse_ical_datetime(v))
}

/// RFC 4791 §9.9 overlap test, reduced to the properties this client
/// handles.
fn in_time_range(
    kind: &str,
    props: &[PropEntry],
    cal: &icalendar::Calendar,
    start: Timestamp,
    end: Timestamp,
) -> bool {
    if props.iter().any(|(n, _, _)| n == "RRULE") {
        return ops::expand_occurrences(cal, start, end)
            .map(|occurrences| !occurrences.is_empty())
            .unwrap_or(true);
    }

    let dtstart = prop_time(props, "DTSTART");
    match kind {
        "VEVENT" => {
            let Some(dtstart) = dtstart else { return false };
            let event_end = prop_time(props, "DTEND").map_or_else(
                || {
                    let duration = props
                        .iter()
                        .find(|(n, _, _)| n == "DURATION")
                        .and_then(|(_, v, _)| ops::parse_ical_duration(v))
                        .unwrap_or_else(|| {
                            if dtstart.date_only {
                                jiff::SignedDuration::from_secs(86_400)
                            } else {
                                jiff::SignedDuration::ZERO
                            }
                        });
                    dtstart.ts + duration
                },
                |e| e.ts,
            );
            (start < event_end && end > dtstart.ts)
                || (event_end == dtstart.ts && start <= dtstart.ts && end > dtstart.ts)
        }
        "VTODO" => {
            let due = prop_time(props, "DUE");
            match (dtstart, due) {
                (Some(dtstart), Some(due)) => {
                    (start < due.ts || start <= dtstart.ts) && (end > dtstart.ts || end >= due.ts)
                }
                (Some(dtstart), None) => start <= dtstart.ts && end > dtstart.ts,
                (None, Some(due)) => start < due.ts && end >= due.ts,
                (None, None) => {
                    let completed = prop_time(props, "COMPLETED");
                    let created = prop_time(props, "CREATED");
                    match (completed, created) {
                        (Some(completed), Some(created)) => {
                            (start <= created.ts || start <= completed.ts)
                                && (end >= created.ts || end >= completed.ts)
                        }
                        (Some(completed), None) => start <= completed.ts && end >= completed.ts,
                        (None, Some(created)) => end > created.ts,
                        (None, None) => true,
                    }
                }
            }
        }
        "VJOURNAL" => dtstart.is_some_and(|d| start <= d.ts && end > d.ts),
        _ => true,
    }
}

fn matches(searcher: &CalendarSearcher, object: &mut CalendarObject) -> Result<bool, DavError> {
    let cal = ops::clone_calendar(object.icalendar_mut()?);
    let Some(primary) = ops::primary_component(&cal) else {
        return Ok(false);
    };
    let kind = ops::component_kind(primary);

    if let Some(wanted) = searcher.kind {
        if kind != wanted.component_name() {
            return Ok(false);
        }
    }

    let props = primary_props(&cal)?;

    if let (Some(start), Some(end)) = (searcher.start, searcher.end) {
        if !in_time_range(&kind, &props, &cal, start, end) {
            return Ok(false);
        }
    }

    for filter in &searcher.filters {
        if !filter_matches(&props, filter) {
            return Ok(false);
        }
    }

    Ok(true)
}

fn sort_value(object: &mut CalendarObject, key: &SortKey) -> Option<String> {
    if key.prop == "DUE" {
        return object
            .get_due()
            .ok()
            .flatten()
            .map(|t| ops::format_ical_utc(t.ts));
    }
    let cal = object.icalendar_mut().ok()?;
    let value = ops::primary_property(cal, &key.prop)?;
    if key.prop == "PRIORITY" {
        return Some(format!("{:0>3}", value.trim()));
    }
    Some(value)
}

pub(crate) async fn execute(
    calendar: &Calendar,
    searcher: &CalendarSearcher,
) -> Result<Vec<CalendarObject>, DavError> {
    let quirks = calendar.client().quirks();
    let server_expand = searcher.expand && !quirks.expand_unsupported;

    let mut query = CalendarQueryRequest::new();
    if let Some(kind) = searcher.kind {
        query = query.component(kind.component_name());
    }
    let range = match (searcher.start, searcher.end) {
        (Some(start), Some(end)) => {
            let start_str = ops::format_ical_utc(start);
            let end_str = ops::format_ical_utc(end);
            query = query.time_range(&start_str, Some(&end_str));
            if server_expand {
                query = query.expand(&start_str, &end_str);
            }
            Some((start, end))
        }
        _ => None,
    };
    for filter in &searcher.filters {
        query = query.prop_filter(filter.clone());
    }

    let request = calendar
        .client()
        .protocol()
        .calendar_query_request(&calendar.url().to_string(), &query)?;
    let response = calendar.client().request(request).await?;
    let results = ProtocolClient::parse_calendar_query(&response)?;

    let mut objects = Vec::new();
    for entry in results {
        if entry.calendar_data.is_none() {
            continue;
        }
        objects.push(CalendarObject::from_query_result(
            calendar.client().clone(),
            calendar.url().clone(),
            &entry.href,
            entry.etag,
            entry.calendar_data,
        )?);
    }

    // Client-side expansion for servers that reject <expand>.
    if searcher.expand && quirks.expand_unsupported {
        if let Some((start, end)) = range {
            let mut expanded = Vec::new();
            for mut object in objects {
                let cal = ops::clone_calendar(object.icalendar_mut()?);
                let occurrences = ops::expand_occurrences(&cal, start, end)?;
                let mut merged = icalendar::Calendar::new();
                for occurrence in occurrences {
                    for comp in occurrence.components {
                        merged.components.push(comp);
                    }
                }
                object.set_icalendar(merged);
                expanded.push(object);
            }
            objects = expanded;
        }
    }

    if !searcher.skip_post_filter {
        let mut kept = Vec::new();
        for mut object in objects {
            if matches(searcher, &mut object)? {
                kept.push(object);
            }
        }
        objects = kept;
    }

    if searcher.kind == Some(ComponentKind::Todo) && !searcher.include_completed {
        let mut kept = Vec::new();
        for mut object in objects {
            if ops::is_task_pending(object.icalendar_mut()?) {
                kept.push(object);
            }
        }
        objects = kept;
    }

    if searcher.split_expanded {
        let mut split = Vec::new();
        for mut object in objects {
            let cal = ops::clone_calendar(object.icalendar_mut()?);
            for part in ops::split_components(&cal) {
                let mut clone = object.clone();
                clone.set_icalendar(part);
                split.push(clone);
            }
        }
        objects = split;
    }

    if !searcher.sort_keys.is_empty() {
        let keys = searcher.sort_keys.clone();
        let mut decorated: Vec<(Vec<Option<String>>, CalendarObject)> = objects
            .into_iter()
            .map(|mut object| {
                let values = keys
                    .iter()
                    .map(|key| sort_value(&mut object, key))
                    .collect();
                (values, object)
            })
            .collect();
        decorated.sort_by(|(a, _), (b, _)| {
            for (index, key) in keys.iter().enumerate() {
                let ordering = match (&a[index], &b[index]) {
                    (Some(x), Some(y)) => x.cmp(y),
                    // Missing keys sort last regardless of direction.
                    (None, Some(_)) => return Ordering::Greater,
                    (Some(_), None) => return Ordering::Less,
                    (None, None) => Ordering::Equal,
                };
                let ordering = if key.descending {
                    ordering.reverse()
                } else {
                    ordering
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
        objects = decorated.into_iter().map(|(_, object)| object).collect();
    }

    Ok(objects)
}
