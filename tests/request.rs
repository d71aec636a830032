// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

//! Request building tests.

use davcal::request::{
    CalendarMultiGetRequest, CalendarQueryRequest, FilterOp, FreeBusyQueryRequest,
    MkCalendarRequest, MkColRequest, PropFilter, PropFindRequest, PropPatchRequest,
    SyncCollectionRequest,
};
use davcal::xml::QName;

#[test]
fn request_propfind_builds_xml() {
    let mut request = PropFindRequest::new();
    request.add_property(QName::dav("displayname"));
    request.add_property(QName::dav("getetag"));
    request.add_property(QName::dav("resourcetype"));

    let xml = request.build().expect("Failed to build PROPFIND XML");

    assert!(xml.starts_with("<?xml"));
    assert!(xml.contains("<D:propfind"));
    assert!(xml.contains("xmlns:D=\"DAV:\""));
    assert!(xml.contains("<D:prop>"));
    assert!(xml.contains("<D:displayname>"));
    assert!(xml.contains("</D:displayname>"));
    assert!(xml.contains("<D:getetag>"));
    assert!(xml.contains("<D:resourcetype>"));
    assert!(xml.contains("</D:propfind>"));
}

#[test]
fn request_propfind_caldav_properties_include_namespace() {
    let mut request = PropFindRequest::new();
    request.add_property(QName::caldav("calendar-data"));
    request.add_property(QName::caldav("calendar-home-set"));

    let xml = request.build().expect("Failed to build PROPFIND XML");

    assert!(xml.contains("xmlns:C=\"urn:ietf:params:xml:ns:caldav\""));
    assert!(xml.contains("<C:calendar-data>"));
    assert!(xml.contains("<C:calendar-home-set>"));
}

#[test]
fn request_propfind_without_properties_requests_allprop() {
    let request = PropFindRequest::new();
    let xml = request.build().expect("Failed to build PROPFIND XML");

    assert!(xml.contains("<D:allprop>"));
    assert!(!xml.contains("<D:prop>"));
}

#[test]
fn request_propfind_roundtrips_property_names() {
    let props = [
        QName::dav("displayname"),
        QName::caldav("calendar-description"),
        QName::calendarserver("getctag"),
    ];
    let mut request = PropFindRequest::new();
    for prop in &props {
        request.add_property(prop.clone());
    }
    let xml = request.build().expect("Failed to build PROPFIND XML");

    // Every requested qualified name must be recoverable from the body.
    for prop in &props {
        let tag = format!("<{}:{}>", prop.prefix(), prop.local());
        assert!(xml.contains(&tag), "missing {tag} in {xml}");
    }
    assert!(xml.contains("xmlns:CS=\"http://calendarserver.org/ns/\""));
}

#[test]
fn request_proppatch_builds_set_and_remove() {
    let mut request = PropPatchRequest::new();
    request.set_property(QName::dav("displayname"), "Work");
    request.remove_property(QName::caldav("calendar-description"));

    let xml = request.build().expect("Failed to build PROPPATCH XML");

    assert!(xml.contains("<D:propertyupdate"));
    assert!(xml.contains("<D:set>"));
    assert!(xml.contains("<D:displayname>Work</D:displayname>"));
    assert!(xml.contains("<D:remove>"));
    assert!(xml.contains("<C:calendar-description>"));
}

#[test]
fn request_proppatch_omits_empty_remove_block() {
    let mut request = PropPatchRequest::new();
    request.set_property(QName::dav("displayname"), "Work");

    let xml = request.build().expect("Failed to build PROPPATCH XML");

    assert!(xml.contains("<D:set>"));
    assert!(!xml.contains("<D:remove>"));
}

#[test]
fn request_calendar_query_builds_xml() {
    let query = CalendarQueryRequest::new()
        .component("VEVENT")
        .time_range("20250101T000000Z", Some("20250131T235959Z"));

    let xml = query.build().expect("Failed to build calendar-query XML");

    assert!(xml.contains("<C:calendar-query"));
    assert!(xml.contains("<D:getetag>"));
    assert!(xml.contains("<C:calendar-data>"));
    assert!(xml.contains("<C:filter>"));
    assert!(xml.contains("<C:comp-filter name=\"VCALENDAR\">"));
    assert!(xml.contains("<C:comp-filter name=\"VEVENT\">"));
    assert!(xml.contains("start=\"20250101T000000Z\""));
    assert!(xml.contains("end=\"20250131T235959Z\""));
}

#[test]
fn request_calendar_query_text_match_collation() {
    let query = CalendarQueryRequest::new()
        .component("VEVENT")
        .prop_filter(PropFilter {
            name: "SUMMARY".to_string(),
            op: FilterOp::Contains {
                pattern: "standup".to_string(),
                case_sensitive: false,
                negate: false,
            },
            param_filters: Vec::new(),
        });

    let xml = query.build().expect("Failed to build calendar-query XML");

    assert!(xml.contains("<C:prop-filter name=\"SUMMARY\">"));
    assert!(xml.contains("collation=\"i;ascii-casemap\""));
    assert!(xml.contains(">standup</C:text-match>"));
}

#[test]
fn request_calendar_query_case_sensitive_uses_octet_collation() {
    let query = CalendarQueryRequest::new()
        .component("VTODO")
        .prop_filter(PropFilter {
            name: "UID".to_string(),
            op: FilterOp::Equals {
                pattern: "todo-42".to_string(),
                case_sensitive: true,
                negate: false,
            },
            param_filters: Vec::new(),
        });

    let xml = query.build().expect("Failed to build calendar-query XML");

    assert!(xml.contains("collation=\"i;octet\""));
}

#[test]
fn request_calendar_query_negate_condition() {
    let query = CalendarQueryRequest::new()
        .component("VTODO")
        .prop_filter(PropFilter {
            name: "STATUS".to_string(),
            op: FilterOp::Contains {
                pattern: "CANCELLED".to_string(),
                case_sensitive: false,
                negate: true,
            },
            param_filters: Vec::new(),
        });

    let xml = query.build().expect("Failed to build calendar-query XML");

    assert!(xml.contains("negate-condition=\"yes\""));
}

#[test]
fn request_calendar_query_is_not_defined() {
    let query = CalendarQueryRequest::new()
        .component("VTODO")
        .prop_filter(PropFilter {
            name: "COMPLETED".to_string(),
            op: FilterOp::IsNotDefined,
            param_filters: Vec::new(),
        });

    let xml = query.build().expect("Failed to build calendar-query XML");

    assert!(xml.contains("<C:prop-filter name=\"COMPLETED\">"));
    assert!(xml.contains("<C:is-not-defined/>"));
}

#[test]
fn request_calendar_query_param_filter() {
    let query = CalendarQueryRequest::new()
        .component("VEVENT")
        .prop_filter(PropFilter {
            name: "ATTENDEE".to_string(),
            op: FilterOp::IsDefined,
            param_filters: vec![("PARTSTAT".to_string(), Some("NEEDS-ACTION".to_string()))],
        });

    let xml = query.build().expect("Failed to build calendar-query XML");

    assert!(xml.contains("<C:param-filter name=\"PARTSTAT\">"));
    assert!(xml.contains(">NEEDS-ACTION</C:text-match>"));
}

#[test]
fn request_calendar_query_expand() {
    let query = CalendarQueryRequest::new()
        .component("VEVENT")
        .time_range("20250101T000000Z", Some("20250201T000000Z"))
        .expand("20250101T000000Z", "20250201T000000Z");

    let xml = query.build().expect("Failed to build calendar-query XML");

    assert!(xml.contains("<C:expand"));
    assert!(xml.contains("<C:calendar-data>"));
}

#[test]
fn request_calendar_query_etags_only_skips_calendar_data() {
    let query = CalendarQueryRequest::new().component("VEVENT").etags_only();
    let xml = query.build().expect("Failed to build calendar-query XML");

    assert!(xml.contains("<D:getetag>"));
    assert!(!xml.contains("<C:calendar-data>"));
}

#[test]
fn request_calendar_multiget_builds_xml() {
    let mut request = CalendarMultiGetRequest::new();
    request.add_href("/calendars/user/event1.ics");
    request.add_href("/calendars/user/event2.ics");

    let xml = request.build().expect("Failed to build multiget XML");

    assert!(xml.contains("<C:calendar-multiget"));
    assert!(xml.contains("<D:href>/calendars/user/event1.ics</D:href>"));
    assert!(xml.contains("<D:href>/calendars/user/event2.ics</D:href>"));
}

#[test]
fn request_sync_collection_initial() {
    let request = SyncCollectionRequest::new(None);
    let xml = request.build().expect("Failed to build sync-collection XML");

    assert!(xml.contains("<D:sync-collection"));
    assert!(xml.contains("<D:sync-token>"));
    assert!(xml.contains("</D:sync-token>"));
    assert!(xml.contains("<D:sync-level>1</D:sync-level>"));
    assert!(xml.contains("<D:getetag>"));
}

#[test]
fn request_sync_collection_with_token() {
    let request = SyncCollectionRequest::new(Some("tok-1"));
    let xml = request.build().expect("Failed to build sync-collection XML");

    assert!(xml.contains("<D:sync-token>tok-1</D:sync-token>"));
}

#[test]
fn request_freebusy_query_builds_xml() {
    let request = FreeBusyQueryRequest::new("20250101T000000Z", "20250102T000000Z");
    let xml = request.build().expect("Failed to build free-busy XML");

    assert!(xml.contains("<C:free-busy-query"));
    assert!(xml.contains("start=\"20250101T000000Z\""));
    assert!(xml.contains("end=\"20250102T000000Z\""));
}

#[test]
fn request_mkcalendar_builds_xml() {
    let mut request = MkCalendarRequest::new();
    request.display_name("Work");
    request.description("Team calendar");
    request.supported_components(&["VEVENT", "VTODO"]);

    let xml = request
        .build()
        .expect("Failed to build MKCALENDAR XML")
        .expect("body expected");

    assert!(xml.contains("<C:mkcalendar"));
    assert!(xml.contains("<D:set>"));
    assert!(xml.contains("<D:displayname>Work</D:displayname>"));
    assert!(xml.contains("<C:calendar-description>Team calendar</C:calendar-description>"));
    assert!(xml.contains("<C:comp name=\"VEVENT\"/>"));
    assert!(xml.contains("<C:comp name=\"VTODO\"/>"));
}

#[test]
fn request_mkcalendar_without_properties_has_no_body() {
    let request = MkCalendarRequest::new();
    assert!(request.build().expect("build failed").is_none());
}

#[test]
fn request_mkcol_builds_xml() {
    let mut request = MkColRequest::new();
    request.display_name("Plain");

    let xml = request
        .build()
        .expect("Failed to build MKCOL XML")
        .expect("body expected");

    assert!(xml.contains("<D:mkcol"));
    assert!(xml.contains("<D:collection/>"));
    assert!(xml.contains("<D:displayname>Plain</D:displayname>"));
}
