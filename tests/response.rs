// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

//! Response parsing tests.

use davcal::response::{
    parse_calendar_query_response, parse_multistatus, parse_propfind_response,
    parse_sync_collection_response,
};
use davcal::PropValue;

const CALENDAR_PROPFIND: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<multistatus xmlns="DAV:">
 <response>
  <href>/cal/work/</href>
  <propstat>
   <prop>
    <displayname>Work</displayname>
    <resourcetype><collection/><C:calendar xmlns:C="urn:ietf:params:xml:ns:caldav"/></resourcetype>
   </prop>
   <status>HTTP/1.1 200 OK</status>
  </propstat>
 </response>
</multistatus>"#;

#[test]
fn response_propfind_displayname_and_resourcetype() {
    let results = parse_propfind_response(CALENDAR_PROPFIND, 207).expect("parse failed");
    assert_eq!(results.len(), 1);

    let entry = &results[0];
    assert_eq!(entry.href, "/cal/work/");
    assert_eq!(
        entry.properties.get("{DAV:}displayname"),
        Some(&PropValue::Text("Work".to_string()))
    );
    assert_eq!(
        entry.properties.get("{DAV:}resourcetype"),
        Some(&PropValue::ComponentList(vec![
            "{DAV:}collection".to_string(),
            "{urn:ietf:params:xml:ns:caldav}calendar".to_string(),
        ]))
    );
}

#[test]
fn response_propfind_404_status_yields_empty() {
    let results = parse_propfind_response("", 404).expect("parse failed");
    assert!(results.is_empty());
}

#[test]
fn response_propfind_empty_body_yields_empty() {
    let results = parse_propfind_response("", 207).expect("parse failed");
    assert!(results.is_empty());
}

#[test]
fn response_propfind_unexpected_status_fails() {
    assert!(parse_propfind_response("", 500).is_err());
}

#[test]
fn response_multistatus_rejects_unknown_per_resource_status() {
    let xml = r#"<?xml version="1.0"?>
<D:multistatus xmlns:D="DAV:">
 <D:response>
  <D:href>/cal/work/x.ics</D:href>
  <D:status>HTTP/1.1 503 Service Unavailable</D:status>
 </D:response>
</D:multistatus>"#;
    assert!(parse_multistatus(xml).is_err());
}

#[test]
fn response_multistatus_skips_404_propstat() {
    let xml = r#"<?xml version="1.0"?>
<D:multistatus xmlns:D="DAV:">
 <D:response>
  <D:href>/cal/work/</D:href>
  <D:propstat>
   <D:prop><D:displayname>Work</D:displayname></D:prop>
   <D:status>HTTP/1.1 200 OK</D:status>
  </D:propstat>
  <D:propstat>
   <D:prop><D:getcontentlength/></D:prop>
   <D:status>HTTP/1.1 404 Not Found</D:status>
  </D:propstat>
 </D:response>
</D:multistatus>"#;
    let result = parse_multistatus(xml).expect("parse failed");
    let entry = &result.responses[0];
    assert!(entry.properties.contains_key("{DAV:}displayname"));
    assert!(!entry.properties.contains_key("{DAV:}getcontentlength"));
}

#[test]
fn response_href_double_encoding_is_repaired() {
    let xml = r#"<?xml version="1.0"?>
<D:multistatus xmlns:D="DAV:">
 <D:response>
  <D:href>/cal/user%2540example.com/</D:href>
  <D:propstat>
   <D:prop><D:displayname>Home</D:displayname></D:prop>
   <D:status>HTTP/1.1 200 OK</D:status>
  </D:propstat>
 </D:response>
</D:multistatus>"#;
    let result = parse_multistatus(xml).expect("parse failed");
    assert!(result.responses[0].href.contains("%40"));
    assert!(!result.responses[0].href.contains("%2540"));
}

#[test]
fn response_absolute_href_reduced_to_path() {
    let xml = r#"<?xml version="1.0"?>
<D:multistatus xmlns:D="DAV:">
 <D:response>
  <D:href>https://cal.example.com/cal/work/ev.ics</D:href>
  <D:propstat>
   <D:prop><D:getetag>"e1"</D:getetag></D:prop>
   <D:status>HTTP/1.1 200 OK</D:status>
  </D:propstat>
 </D:response>
</D:multistatus>"#;
    let result = parse_multistatus(xml).expect("parse failed");
    assert_eq!(result.responses[0].href, "/cal/work/ev.ics");
}

#[test]
fn response_calendar_query_extracts_etag_and_data() {
    let xml = r#"<?xml version="1.0"?>
<D:multistatus xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav">
 <D:response>
  <D:href>/cal/work/ev-1.ics</D:href>
  <D:propstat>
   <D:prop>
    <D:getetag>"abc123"</D:getetag>
    <C:calendar-data>BEGIN:VCALENDAR
VERSION:2.0
BEGIN:VEVENT
UID:ev-1
SUMMARY:meet
END:VEVENT
END:VCALENDAR
</C:calendar-data>
   </D:prop>
   <D:status>HTTP/1.1 200 OK</D:status>
  </D:propstat>
 </D:response>
</D:multistatus>"#;
    let results = parse_calendar_query_response(xml, 207).expect("parse failed");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].href, "/cal/work/ev-1.ics");
    assert_eq!(results[0].etag.as_deref(), Some("\"abc123\""));
    let data = results[0].calendar_data.as_deref().expect("data expected");
    assert!(data.contains("UID:ev-1"));
    assert!(data.contains("SUMMARY:meet"));
}

#[test]
fn response_sync_collection_splits_deleted_and_changed() {
    let xml = r#"<?xml version="1.0"?>
<D:multistatus xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav">
 <D:response>
  <D:href>/cal/work/kept.ics</D:href>
  <D:propstat>
   <D:prop><D:getetag>"e2"</D:getetag></D:prop>
   <D:status>HTTP/1.1 200 OK</D:status>
  </D:propstat>
 </D:response>
 <D:response>
  <D:href>/cal/work/gone.ics</D:href>
  <D:status>HTTP/1.1 404 Not Found</D:status>
 </D:response>
 <D:sync-token>tok-2</D:sync-token>
</D:multistatus>"#;
    let result = parse_sync_collection_response(xml, 207).expect("parse failed");
    assert_eq!(result.changed.len(), 1);
    assert_eq!(result.changed[0].href, "/cal/work/kept.ics");
    assert_eq!(result.deleted, vec!["/cal/work/gone.ics".to_string()]);
    assert_eq!(result.sync_token.as_deref(), Some("tok-2"));
}

#[test]
fn response_sync_collection_empty_body() {
    let result = parse_sync_collection_response("", 207).expect("parse failed");
    assert!(result.changed.is_empty());
    assert!(result.deleted.is_empty());
    assert!(result.sync_token.is_none());
}

#[test]
fn response_supported_calendar_component_set() {
    let xml = r#"<?xml version="1.0"?>
<D:multistatus xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav">
 <D:response>
  <D:href>/cal/work/</D:href>
  <D:propstat>
   <D:prop>
    <C:supported-calendar-component-set>
     <C:comp name="VEVENT"/>
     <C:comp name="VTODO"/>
    </C:supported-calendar-component-set>
   </D:prop>
   <D:status>HTTP/1.1 200 OK</D:status>
  </D:propstat>
 </D:response>
</D:multistatus>"#;
    let result = parse_multistatus(xml).expect("parse failed");
    assert_eq!(
        result.responses[0]
            .properties
            .get("{urn:ietf:params:xml:ns:caldav}supported-calendar-component-set"),
        Some(&PropValue::ComponentList(vec![
            "VEVENT".to_string(),
            "VTODO".to_string(),
        ]))
    );
}

#[test]
fn response_current_user_principal_href() {
    let xml = r#"<?xml version="1.0"?>
<D:multistatus xmlns:D="DAV:">
 <D:response>
  <D:href>/</D:href>
  <D:propstat>
   <D:prop>
    <D:current-user-principal><D:href>/principals/users/alice/</D:href></D:current-user-principal>
   </D:prop>
   <D:status>HTTP/1.1 200 OK</D:status>
  </D:propstat>
 </D:response>
</D:multistatus>"#;
    let result = parse_multistatus(xml).expect("parse failed");
    assert_eq!(
        result.responses[0]
            .properties
            .get("{DAV:}current-user-principal"),
        Some(&PropValue::Href("/principals/users/alice/".to_string()))
    );
}

#[test]
fn response_calendar_user_address_set_sorted_by_preference() {
    let xml = r#"<?xml version="1.0"?>
<D:multistatus xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav">
 <D:response>
  <D:href>/principals/users/alice/</D:href>
  <D:propstat>
   <D:prop>
    <C:calendar-user-address-set>
     <D:href>mailto:secondary@example.com</D:href>
     <D:href preferred="1">mailto:alice@example.com</D:href>
    </C:calendar-user-address-set>
   </D:prop>
   <D:status>HTTP/1.1 200 OK</D:status>
  </D:propstat>
 </D:response>
</D:multistatus>"#;
    let result = parse_multistatus(xml).expect("parse failed");
    assert_eq!(
        result.responses[0]
            .properties
            .get("{urn:ietf:params:xml:ns:caldav}calendar-user-address-set"),
        Some(&PropValue::HrefList(vec![
            "mailto:alice@example.com".to_string(),
            "mailto:secondary@example.com".to_string(),
        ]))
    );
}

#[test]
fn response_unknown_structured_property_kept_raw() {
    let xml = r#"<?xml version="1.0"?>
<D:multistatus xmlns:D="DAV:">
 <D:response>
  <D:href>/cal/work/</D:href>
  <D:propstat>
   <D:prop>
    <D:owner><D:href>/principals/users/alice/</D:href></D:owner>
   </D:prop>
   <D:status>HTTP/1.1 200 OK</D:status>
  </D:propstat>
 </D:response>
</D:multistatus>"#;
    let result = parse_multistatus(xml).expect("parse failed");
    match result.responses[0].properties.get("{DAV:}owner") {
        Some(PropValue::Raw(inner)) => assert!(inner.contains("/principals/users/alice/")),
        other => panic!("expected raw value, got {other:?}"),
    }
}

#[test]
fn response_tolerates_wrapper_element() {
    let xml = format!("<xml>{}</xml>", CALENDAR_PROPFIND.replace("<?xml version=\"1.0\" encoding=\"utf-8\" ?>", ""));
    let result = parse_multistatus(&xml).expect("parse failed");
    assert_eq!(result.responses.len(), 1);
}
