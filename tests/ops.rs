// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

//! Operations layer tests: pure business logic, no I/O.

use davcal::ops::{
    add_attendee, append_next_instance, calculate_next_recurrence, calendar_id_from_url,
    extract_relations, extract_uid_from_path, find_id_and_path, find_object_properties,
    format_ical_duration, format_ical_utc, generate_fake_sync_token, generate_object_url,
    get_due, get_duration, is_task_pending, mark_task_completed, mark_task_uncompleted,
    parse_ical_datetime, parse_ical_duration, parse_ics, primary_property, reduce_rrule_count,
    resolve_children, reverse_reltype, sanitize_calendar_home_set_url, set_attendee_partstat,
    DeadlinePolicy,
};
use davcal::{DavUrl, PropValue, PropfindResult};
use jiff::civil;
use jiff::tz::TimeZone;
use jiff::Timestamp;

fn ts(s: &str) -> Timestamp {
    civil::DateTime::strptime("%Y%m%dT%H%M%SZ", s)
        .expect("bad test datetime")
        .to_zoned(TimeZone::UTC)
        .expect("bad test zone")
        .timestamp()
}

fn vtodo(extra: &str) -> icalendar::Calendar {
    let ics = format!(
        "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//test//EN\r\nBEGIN:VTODO\r\nUID:todo-1\r\n{extra}SUMMARY:water plants\r\nEND:VTODO\r\nEND:VCALENDAR\r\n"
    );
    parse_ics(&ics).expect("bad test calendar")
}

// -- task state -------------------------------------------------------------

#[test]
fn ops_task_pending_by_default() {
    let cal = vtodo("");
    assert!(is_task_pending(&cal));
}

#[test]
fn ops_task_with_completed_property_is_not_pending() {
    let cal = vtodo("COMPLETED:20240601T120000Z\r\n");
    assert!(!is_task_pending(&cal));
}

#[test]
fn ops_task_cancelled_is_not_pending() {
    let cal = vtodo("STATUS:CANCELLED\r\n");
    assert!(!is_task_pending(&cal));
}

#[test]
fn ops_task_in_process_is_pending() {
    let cal = vtodo("STATUS:IN-PROCESS\r\n");
    assert!(is_task_pending(&cal));
}

#[test]
fn ops_complete_then_uncomplete_roundtrip() {
    let mut cal = vtodo("");
    mark_task_completed(&mut cal, ts("20240601T120000Z"));
    assert!(!is_task_pending(&cal));
    assert_eq!(
        primary_property(&cal, "STATUS").as_deref(),
        Some("COMPLETED")
    );
    assert!(primary_property(&cal, "COMPLETED").is_some());

    let cal = mark_task_uncompleted(&cal).expect("uncomplete failed");
    assert!(is_task_pending(&cal));
    assert!(primary_property(&cal, "COMPLETED").is_none());
    assert_eq!(
        primary_property(&cal, "STATUS").as_deref(),
        Some("NEEDS-ACTION")
    );
}

#[test]
fn ops_complete_is_idempotent() {
    let mut cal = vtodo("");
    mark_task_completed(&mut cal, ts("20240601T120000Z"));
    mark_task_completed(&mut cal, ts("20240601T130000Z"));
    assert!(!is_task_pending(&cal));
}

// -- durations and datetimes ------------------------------------------------

#[test]
fn ops_parse_ical_datetime_forms() {
    let utc = parse_ical_datetime("20240601T100000Z").expect("utc parse");
    assert!(!utc.date_only);
    assert_eq!(format_ical_utc(utc.ts), "20240601T100000Z");

    let date = parse_ical_datetime("20240601").expect("date parse");
    assert!(date.date_only);

    let floating = parse_ical_datetime("20240601T100000").expect("floating parse");
    assert_eq!(floating.ts, utc.ts);
}

#[test]
fn ops_parse_ical_duration_forms() {
    assert_eq!(
        parse_ical_duration("P1D").map(|d| d.as_secs()),
        Some(86_400)
    );
    assert_eq!(
        parse_ical_duration("PT1H30M").map(|d| d.as_secs()),
        Some(5_400)
    );
    assert_eq!(
        parse_ical_duration("-PT15M").map(|d| d.as_secs()),
        Some(-900)
    );
    assert_eq!(
        parse_ical_duration("P2W").map(|d| d.as_secs()),
        Some(14 * 86_400)
    );
    assert!(parse_ical_duration("garbage").is_none());
}

#[test]
fn ops_format_ical_duration_roundtrip() {
    for value in ["P1D", "PT1H30M", "P2DT3H", "PT45S"] {
        let parsed = parse_ical_duration(value).expect("parse failed");
        let formatted = format_ical_duration(parsed);
        assert_eq!(parse_ical_duration(&formatted), Some(parsed));
    }
}

#[test]
fn ops_duration_from_dtstart_and_due() {
    let cal = vtodo("DTSTART:20240601T100000Z\r\nDUE:20240601T113000Z\r\n");
    assert_eq!(get_duration(&cal, "DUE").as_secs(), 5_400);
}

#[test]
fn ops_duration_property_wins() {
    let cal = vtodo("DTSTART:20240601T100000Z\r\nDURATION:PT2H\r\n");
    assert_eq!(get_duration(&cal, "DUE").as_secs(), 7_200);
}

#[test]
fn ops_date_only_dtstart_means_one_day() {
    let cal = vtodo("DTSTART;VALUE=DATE:20240601\r\n");
    assert_eq!(get_duration(&cal, "DUE").as_secs(), 86_400);
}

#[test]
fn ops_no_times_means_zero_duration() {
    let cal = vtodo("");
    assert_eq!(get_duration(&cal, "DUE").as_secs(), 0);
}

#[test]
fn ops_get_due_prefers_due_property() {
    let cal = vtodo("DTSTART:20240601T100000Z\r\nDUE:20240602T100000Z\r\n");
    let due = get_due(&cal).expect("due expected");
    assert_eq!(format_ical_utc(due.ts), "20240602T100000Z");
}

#[test]
fn ops_get_due_from_duration() {
    let cal = vtodo("DTSTART:20240601T100000Z\r\nDURATION:PT4H\r\n");
    let due = get_due(&cal).expect("due expected");
    assert_eq!(format_ical_utc(due.ts), "20240601T140000Z");
}

// -- recurrence -------------------------------------------------------------

#[test]
fn ops_next_recurrence_weekly_fixed() {
    let cal = vtodo(
        "DTSTART;VALUE=DATE:20240601\r\nDUE;VALUE=DATE:20240602\r\nRRULE:FREQ=WEEKLY;COUNT=3\r\n",
    );
    let next = calculate_next_recurrence(&cal, ts("20240601T120000Z"), DeadlinePolicy::Fixed)
        .expect("evaluation failed")
        .expect("next occurrence expected");
    assert_eq!(format_ical_utc(next), "20240608T000000Z");
}

#[test]
fn ops_next_recurrence_without_rrule_is_none() {
    let cal = vtodo("DTSTART:20240601T100000Z\r\n");
    assert!(calculate_next_recurrence(&cal, ts("20240601T120000Z"), DeadlinePolicy::Auto)
        .expect("evaluation failed")
        .is_none());
}

#[test]
fn ops_next_recurrence_ignores_count() {
    // COUNT=1 would exhaust the series, but the evaluator ignores COUNT;
    // series termination is reduce_rrule_count's business.
    let cal = vtodo("DTSTART:20240601T100000Z\r\nRRULE:FREQ=DAILY;COUNT=1\r\n");
    let next = calculate_next_recurrence(&cal, ts("20240601T120000Z"), DeadlinePolicy::Fixed)
        .expect("evaluation failed")
        .expect("next occurrence expected");
    assert_eq!(format_ical_utc(next), "20240602T100000Z");
}

#[test]
fn ops_reduce_rrule_count() {
    let mut cal = vtodo("DTSTART:20240601T100000Z\r\nRRULE:FREQ=WEEKLY;COUNT=3\r\n");
    assert!(reduce_rrule_count(&mut cal));
    assert_eq!(
        primary_property(&cal, "RRULE").as_deref(),
        Some("FREQ=WEEKLY;COUNT=2")
    );
}

#[test]
fn ops_reduce_rrule_count_exhausts_at_one() {
    let mut cal = vtodo("DTSTART:20240601T100000Z\r\nRRULE:FREQ=WEEKLY;COUNT=1\r\n");
    assert!(!reduce_rrule_count(&mut cal));
}

#[test]
fn ops_reduce_rrule_count_without_count_is_fine() {
    let mut cal = vtodo("DTSTART:20240601T100000Z\r\nRRULE:FREQ=WEEKLY\r\n");
    assert!(reduce_rrule_count(&mut cal));
}

#[test]
fn ops_safe_completion_shape() {
    // The recurring-todo completion scenario: weekly task completed on the
    // first occurrence spawns an uncompleted override one week later.
    let mut cal = vtodo(
        "DTSTART;VALUE=DATE:20240601\r\nDUE;VALUE=DATE:20240602\r\nRRULE:FREQ=WEEKLY;COUNT=3\r\n",
    );
    let completion = ts("20240601T120000Z");
    let next = calculate_next_recurrence(&cal, completion, DeadlinePolicy::Fixed)
        .expect("evaluation failed")
        .expect("next occurrence expected");
    mark_task_completed(&mut cal, completion);
    assert!(reduce_rrule_count(&mut cal));
    let duration = get_duration(&cal, "DUE");
    let result = append_next_instance(&cal, next, duration, "DUE").expect("append failed");

    let raw = result.to_string();
    assert!(raw.contains("RRULE:FREQ=WEEKLY;COUNT=2"));
    assert!(raw.contains("RECURRENCE-ID:20240608"));
    assert!(raw.contains("DTSTART:20240608"));
    assert!(raw.contains("DUE:20240609"));

    // The new instance is pending and carries no rule of its own.
    let todos: Vec<_> = result
        .components
        .iter()
        .filter(|c| davcal::ops::component_kind(c) == "VTODO")
        .collect();
    assert_eq!(todos.len(), 2);
    let instance = todos
        .iter()
        .find(|c| davcal::ops::component_property(c, "RECURRENCE-ID").is_some())
        .expect("override expected");
    assert_eq!(
        davcal::ops::component_property(instance, "STATUS").as_deref(),
        Some("NEEDS-ACTION")
    );
    assert!(davcal::ops::component_property(instance, "COMPLETED").is_none());
    assert!(davcal::ops::component_property(instance, "RRULE").is_none());
}

// -- relations --------------------------------------------------------------

#[test]
fn ops_reverse_reltype_table() {
    assert_eq!(reverse_reltype("PARENT"), Some("CHILD"));
    assert_eq!(reverse_reltype("CHILD"), Some("PARENT"));
    assert_eq!(reverse_reltype("SIBLING"), Some("SIBLING"));
    assert_eq!(reverse_reltype("DEPENDS-ON"), Some("FINISHTOSTART"));
    assert_eq!(reverse_reltype("FINISHTOSTART"), Some("DEPENDENT"));
    assert_eq!(reverse_reltype("bogus"), None);
}

#[test]
fn ops_reverse_reltype_is_involutive_for_symmetric_types() {
    for reltype in ["PARENT", "CHILD", "SIBLING"] {
        let reversed = reverse_reltype(reltype).expect("known type");
        assert_eq!(reverse_reltype(reversed), Some(reltype));
    }
}

#[test]
fn ops_extract_relations_defaults_to_parent() {
    let cal = vtodo("RELATED-TO:other-uid\r\nRELATED-TO;RELTYPE=CHILD:child-uid\r\n");
    let relations = extract_relations(&cal, None).expect("extract failed");
    assert!(relations["PARENT"].contains("other-uid"));
    assert!(relations["CHILD"].contains("child-uid"));

    let only_children = extract_relations(&cal, Some(&["CHILD"])).expect("extract failed");
    assert!(!only_children.contains_key("PARENT"));
    assert!(only_children.contains_key("CHILD"));
}

// -- urls and uids ----------------------------------------------------------

#[test]
fn ops_generate_object_url_quotes_uid() {
    let parent = DavUrl::parse("https://cal.example.com/cal/work/").unwrap();
    let url = generate_object_url(&parent, "uid/with/slashes").unwrap();
    let rendered = url.to_string();
    assert!(rendered.ends_with(".ics"));
    assert!(rendered.contains("%252F"));
    assert!(!rendered[8..].contains("with/"));
}

#[test]
fn ops_extract_uid_from_path() {
    assert_eq!(
        extract_uid_from_path("/cal/work/ev-42.ics").as_deref(),
        Some("ev-42")
    );
    assert_eq!(extract_uid_from_path("ev-42.ics").as_deref(), Some("ev-42"));
    assert_eq!(extract_uid_from_path("/cal/work/"), None);
}

#[test]
fn ops_find_id_and_path_prefers_given_id() {
    let mut cal = vtodo("");
    let (uid, path) = find_id_and_path(&mut cal, Some("explicit"), None, Some("existing"));
    assert_eq!(uid, "explicit");
    assert_eq!(path, "explicit.ics");
    assert_eq!(primary_property(&cal, "UID").as_deref(), Some("explicit"));
}

#[test]
fn ops_find_id_and_path_takes_component_uid() {
    let mut cal = vtodo("");
    let (uid, _) = find_id_and_path(&mut cal, None, None, None);
    assert_eq!(uid, "todo-1");
}

#[test]
fn ops_find_id_and_path_extracts_from_path() {
    let ics = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nBEGIN:VEVENT\r\nSUMMARY:x\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";
    let mut cal = parse_ics(ics).expect("parse failed");
    let (uid, _) = find_id_and_path(&mut cal, None, Some("/cal/from-path.ics"), None);
    assert_eq!(uid, "from-path");
}

#[test]
fn ops_find_id_and_path_generates_fresh_uid() {
    let ics = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nBEGIN:VEVENT\r\nSUMMARY:x\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";
    let mut cal = parse_ics(ics).expect("parse failed");
    let (uid, path) = find_id_and_path(&mut cal, None, None, None);
    assert!(!uid.is_empty());
    assert_eq!(path, format!("{uid}.ics"));
    assert_eq!(primary_property(&cal, "UID"), Some(uid));
}

#[test]
fn ops_sanitize_calendar_home_set_quotes_at() {
    assert_eq!(
        sanitize_calendar_home_set_url("/remote.php/dav/calendars/user@example.com/"),
        "/remote.php/dav/calendars/user%40example.com/"
    );
    // Absolute URLs and already-quoted paths stay untouched.
    assert_eq!(
        sanitize_calendar_home_set_url("https://cal.example.com/user@x/"),
        "https://cal.example.com/user@x/"
    );
    assert_eq!(
        sanitize_calendar_home_set_url("/cal/user%40example.com/"),
        "/cal/user%40example.com/"
    );
}

#[test]
fn ops_calendar_id_from_url() {
    assert_eq!(
        calendar_id_from_url("https://cal.example.com/dav/work/").as_deref(),
        Some("work")
    );
    assert_eq!(calendar_id_from_url("/dav/home").as_deref(), Some("home"));
}

// -- sync tokens ------------------------------------------------------------

#[test]
fn ops_fake_sync_token_is_order_independent() {
    let forward = vec![
        ("https://c/a.ics".to_string(), "e1".to_string()),
        ("https://c/b.ics".to_string(), "e2".to_string()),
    ];
    let backward = vec![forward[1].clone(), forward[0].clone()];
    assert_eq!(
        generate_fake_sync_token(&forward),
        generate_fake_sync_token(&backward)
    );
}

#[test]
fn ops_fake_sync_token_changes_with_etag() {
    let before = vec![
        ("https://c/a.ics".to_string(), "e1".to_string()),
        ("https://c/b.ics".to_string(), "e2".to_string()),
    ];
    let after = vec![
        ("https://c/a.ics".to_string(), "e1'".to_string()),
        ("https://c/b.ics".to_string(), "e2".to_string()),
    ];
    assert_ne!(
        generate_fake_sync_token(&before),
        generate_fake_sync_token(&after)
    );
}

#[test]
fn ops_fake_sync_token_shape() {
    let token = generate_fake_sync_token(&[]);
    assert!(token.starts_with("fake-"));
    assert_eq!(token.len(), "fake-".len() + 64);
}

// -- attendees --------------------------------------------------------------

#[test]
fn ops_add_attendee_applies_defaults() {
    let cal = vtodo("");
    let cal = add_attendee(&cal, "bob@example.com", Some("Bob"), true, &[]).expect("add failed");
    // Unfold so assertions are immune to 75-octet line folding.
    let raw = icalendar::parser::unfold(&cal.to_string());
    assert!(raw.contains("mailto:bob@example.com"));
    assert!(raw.contains("PARTSTAT=NEEDS-ACTION"));
    assert!(raw.contains("CUTYPE=UNKNOWN"));
    assert!(raw.contains("RSVP=TRUE"));
    assert!(raw.contains("ROLE=REQ-PARTICIPANT"));
    assert!(raw.contains("CN=Bob"));
}

#[test]
fn ops_add_attendee_override_wins() {
    let cal = vtodo("");
    let cal = add_attendee(
        &cal,
        "mailto:bob@example.com",
        None,
        true,
        &[("ROLE".to_string(), "CHAIR".to_string())],
    )
    .expect("add failed");
    let raw = icalendar::parser::unfold(&cal.to_string());
    assert!(raw.contains("ROLE=CHAIR"));
    assert!(!raw.contains("REQ-PARTICIPANT"));
}

#[test]
fn ops_set_attendee_partstat_matches_address() {
    let cal = vtodo("");
    let cal = add_attendee(&cal, "alice@example.com", None, true, &[]).expect("add failed");
    let cal = add_attendee(&cal, "bob@example.com", None, true, &[]).expect("add failed");

    let (updated, matched) = set_attendee_partstat(
        &cal,
        &["mailto:alice@example.com".to_string()],
        "ACCEPTED",
    )
    .expect("partstat failed");
    assert!(matched);

    let raw = icalendar::parser::unfold(&updated.to_string());
    let alice_line = raw
        .lines()
        .find(|l| l.contains("alice@example.com"))
        .expect("alice line");
    assert!(alice_line.contains("PARTSTAT=ACCEPTED"));
    let bob_line = raw
        .lines()
        .find(|l| l.contains("bob@example.com"))
        .expect("bob line");
    assert!(bob_line.contains("PARTSTAT=NEEDS-ACTION"));
}

// -- propfind postprocessing ------------------------------------------------

fn entry(href: &str, types: &[&str], name: Option<&str>) -> PropfindResult {
    let mut properties = std::collections::BTreeMap::new();
    properties.insert(
        "{DAV:}resourcetype".to_string(),
        PropValue::ComponentList(types.iter().map(|t| (*t).to_string()).collect()),
    );
    if let Some(name) = name {
        properties.insert(
            "{DAV:}displayname".to_string(),
            PropValue::Text(name.to_string()),
        );
    }
    PropfindResult {
        href: href.to_string(),
        properties,
        status: 200,
    }
}

#[test]
fn ops_resolve_children_excludes_parent_and_filters() {
    let parent = DavUrl::parse("https://cal.example.com/dav/user/").unwrap();
    let results = vec![
        entry("/dav/user/", &["{DAV:}collection"], None),
        entry(
            "/dav/user/work/",
            &[
                "{DAV:}collection",
                "{urn:ietf:params:xml:ns:caldav}calendar",
            ],
            Some("Work"),
        ),
        entry("/dav/user/notes/", &["{DAV:}collection"], Some("Notes")),
    ];

    let all = resolve_children(&results, &parent, None);
    assert_eq!(all.len(), 2);

    let filter = davcal::ops::calendar_resource_type();
    let calendars = resolve_children(&results, &parent, Some(&filter));
    assert_eq!(calendars.len(), 1);
    assert_eq!(calendars[0].display_name.as_deref(), Some("Work"));
}

#[test]
fn ops_find_object_properties_exact_and_slash_tolerant() {
    let url = DavUrl::parse("https://cal.example.com/dav/user").unwrap();
    let results = vec![entry("/dav/user/", &["{DAV:}collection"], Some("Home"))];
    let found = find_object_properties(&results, &url).expect("match expected");
    assert_eq!(found.href, "/dav/user/");
}

#[test]
fn ops_find_object_properties_single_result_fallback() {
    let url = DavUrl::parse("https://cal.example.com/dav/user/").unwrap();
    let results = vec![entry("/something/else/", &[], Some("Odd"))];
    let found = find_object_properties(&results, &url).expect("fallback expected");
    assert_eq!(found.href, "/something/else/");
}

#[test]
fn ops_find_object_properties_no_match_fails() {
    let url = DavUrl::parse("https://cal.example.com/dav/user/").unwrap();
    let results = vec![
        entry("/a/", &[], None),
        entry("/b/", &[], None),
    ];
    assert!(find_object_properties(&results, &url).is_err());
}

#[test]
fn ops_find_object_properties_collapses_double_slash() {
    let url = DavUrl::parse("https://cal.example.com/dav//user/").unwrap();
    let results = vec![
        entry("/dav/user/", &[], None),
        entry("/dav/other/", &[], None),
    ];
    let found = find_object_properties(&results, &url).expect("match expected");
    assert_eq!(found.href, "/dav/user/");
}
