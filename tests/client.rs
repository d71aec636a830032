// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

//! Client integration tests with wiremock.

use davcal::{CalendarSearcher, Client, ClientConfig, DavError};
use wiremock::matchers::{body_string_contains, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer) -> ClientConfig {
    ClientConfig::new(&server.uri())
}

#[tokio::test]
async fn client_check_dav_support() {
    let server = MockServer::start().await;

    Mock::given(method("OPTIONS"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("DAV", "1, 2, calendar-access, calendar-auto-schedule"),
        )
        .mount(&server)
        .await;

    let client = Client::new(&config(&server)).expect("client");
    let dav = client.check_dav_support().await.expect("OPTIONS failed");
    assert!(dav.expect("DAV header expected").contains("calendar-access"));
    assert!(client.check_cdav_support().await.expect("probe failed"));
    assert!(client
        .check_scheduling_support()
        .await
        .expect("probe failed"));
}

#[tokio::test]
async fn client_principal_and_calendar_listing() {
    let server = MockServer::start().await;

    Mock::given(method("PROPFIND"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(207).set_body_raw(
            r#"<?xml version="1.0" encoding="utf-8" ?>
<D:multistatus xmlns:D="DAV:">
  <D:response>
    <D:href>/</D:href>
    <D:propstat>
      <D:prop>
        <D:current-user-principal><D:href>/principals/alice/</D:href></D:current-user-principal>
      </D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
</D:multistatus>"#,
            "application/xml",
        ))
        .mount(&server)
        .await;

    Mock::given(method("PROPFIND"))
        .and(path("/principals/alice/"))
        .respond_with(ResponseTemplate::new(207).set_body_raw(
            r#"<?xml version="1.0" encoding="utf-8" ?>
<D:multistatus xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav">
  <D:response>
    <D:href>/principals/alice/</D:href>
    <D:propstat>
      <D:prop>
        <C:calendar-home-set><D:href>/dav/alice/</D:href></C:calendar-home-set>
      </D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
</D:multistatus>"#,
            "application/xml",
        ))
        .mount(&server)
        .await;

    Mock::given(method("PROPFIND"))
        .and(path("/dav/alice/"))
        .and(header("Depth", "1"))
        .respond_with(ResponseTemplate::new(207).set_body_raw(
            r#"<?xml version="1.0" encoding="utf-8" ?>
<D:multistatus xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav">
  <D:response>
    <D:href>/dav/alice/</D:href>
    <D:propstat>
      <D:prop><D:resourcetype><D:collection/></D:resourcetype></D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
  <D:response>
    <D:href>/dav/alice/work/</D:href>
    <D:propstat>
      <D:prop>
        <D:displayname>Work</D:displayname>
        <D:resourcetype><D:collection/><C:calendar/></D:resourcetype>
      </D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
</D:multistatus>"#,
            "application/xml",
        ))
        .mount(&server)
        .await;

    let client = Client::new(&config(&server)).expect("client");
    let mut principal = client.principal().await.expect("principal failed");
    assert!(principal.url().to_string().contains("/principals/alice/"));

    let calendars = principal.calendars().await.expect("calendars failed");
    assert_eq!(calendars.len(), 1);
    assert_eq!(calendars[0].display_name(), Some("Work"));
    assert_eq!(calendars[0].id().as_deref(), Some("work"));
}

const EVENT_ICS: &str = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//test//EN\r\nBEGIN:VEVENT\r\nUID:ev-42\r\nDTSTART:20240601T100000Z\r\nDTEND:20240601T110000Z\r\nSUMMARY:meet\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";

#[tokio::test]
async fn client_save_event_roundtrip() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/cal/work/ev-42.ics"))
        .and(header("Content-Type", "text/calendar; charset=utf-8"))
        .and(body_string_contains("UID:ev-42"))
        .and(body_string_contains("BEGIN:VEVENT"))
        .respond_with(ResponseTemplate::new(201).insert_header("Etag", "\"etag-1\""))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/cal/work/ev-42.ics"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Etag", "\"etag-1\"")
                .set_body_raw(EVENT_ICS, "text/calendar"),
        )
        .mount(&server)
        .await;

    let client = Client::new(&config(&server)).expect("client");
    let calendar = client.calendar("/cal/work/").expect("calendar");

    let mut object = calendar.save_event(EVENT_ICS).await.expect("save failed");
    assert_eq!(object.id(), Some("ev-42"));
    assert_eq!(object.etag(), Some("\"etag-1\""));
    assert!(object
        .url()
        .expect("url generated")
        .to_string()
        .ends_with("/cal/work/ev-42.ics"));

    object.load(false).await.expect("load failed");
    let cal = object.icalendar().expect("parse failed");
    let raw = cal.to_string();
    assert!(raw.contains("UID:ev-42"));
    assert!(raw.contains("SUMMARY:meet"));
    assert!(raw.contains("DTSTART:20240601T100000Z"));
}

#[tokio::test]
async fn client_negotiates_basic_auth_on_401() {
    let server = MockServer::start().await;

    // Specific mock first: authenticated requests succeed.
    Mock::given(method("OPTIONS"))
        .and(header_exists("Authorization"))
        .respond_with(ResponseTemplate::new(200).insert_header("DAV", "1, calendar-access"))
        .mount(&server)
        .await;

    Mock::given(method("OPTIONS"))
        .respond_with(
            ResponseTemplate::new(401)
                .insert_header("WWW-Authenticate", "Basic realm=\"cal\""),
        )
        .mount(&server)
        .await;

    let mut config = config(&server);
    config.username = Some("alice".to_string());
    config.password = Some("secret".to_string());

    let client = Client::new(&config).expect("client");
    let dav = client.check_dav_support().await.expect("handshake failed");
    assert!(dav.is_some());
}

#[tokio::test]
async fn client_401_without_challenge_is_authorization_error() {
    let server = MockServer::start().await;

    Mock::given(method("OPTIONS"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let mut config = config(&server);
    config.username = Some("alice".to_string());
    config.password = Some("secret".to_string());

    let client = Client::new(&config).expect("client");
    let error = client.check_dav_support().await.expect_err("must fail");
    match error {
        DavError::Authorization { reason, .. } => {
            assert!(reason.contains("no supported scheme"));
        }
        other => panic!("expected authorization error, got {other:?}"),
    }
}

#[tokio::test]
async fn client_sync_falls_back_to_fake_token() {
    let server = MockServer::start().await;

    Mock::given(method("REPORT"))
        .and(body_string_contains("sync-collection"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    Mock::given(method("REPORT"))
        .and(body_string_contains("calendar-query"))
        .respond_with(ResponseTemplate::new(207).set_body_raw(
            r#"<?xml version="1.0" encoding="utf-8" ?>
<D:multistatus xmlns:D="DAV:">
  <D:response>
    <D:href>/cal/work/a.ics</D:href>
    <D:propstat>
      <D:prop><D:getetag>"e1"</D:getetag></D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
  <D:response>
    <D:href>/cal/work/b.ics</D:href>
    <D:propstat>
      <D:prop><D:getetag>"e2"</D:getetag></D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
</D:multistatus>"#,
            "application/xml",
        ))
        .mount(&server)
        .await;

    let client = Client::new(&config(&server)).expect("client");
    let calendar = client.calendar("/cal/work/").expect("calendar");

    let first = calendar
        .objects_by_sync_token(None, false)
        .await
        .expect("sync failed");
    assert!(first.sync_token.starts_with("fake-"));
    assert_eq!(first.objects.len(), 2);
    assert!(first.deleted.is_empty());

    // Unchanged state: the same token comes back and nothing is reported.
    let second = calendar
        .objects_by_sync_token(Some(&first.sync_token), false)
        .await
        .expect("sync failed");
    assert_eq!(second.sync_token, first.sync_token);
    assert!(second.objects.is_empty());
}

#[tokio::test]
async fn client_sync_collection_report() {
    let server = MockServer::start().await;

    Mock::given(method("REPORT"))
        .and(body_string_contains("sync-collection"))
        .respond_with(ResponseTemplate::new(207).set_body_raw(
            r#"<?xml version="1.0" encoding="utf-8" ?>
<D:multistatus xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav">
  <D:response>
    <D:href>/cal/work/new.ics</D:href>
    <D:propstat>
      <D:prop>
        <D:getetag>"e9"</D:getetag>
        <C:calendar-data>BEGIN:VCALENDAR
VERSION:2.0
BEGIN:VEVENT
UID:new-1
SUMMARY:fresh
END:VEVENT
END:VCALENDAR
</C:calendar-data>
      </D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
  <D:response>
    <D:href>/cal/work/old.ics</D:href>
    <D:status>HTTP/1.1 404 Not Found</D:status>
  </D:response>
  <D:sync-token>tok-2</D:sync-token>
</D:multistatus>"#,
            "application/xml",
        ))
        .mount(&server)
        .await;

    let client = Client::new(&config(&server)).expect("client");
    let calendar = client.calendar("/cal/work/").expect("calendar");

    let batch = calendar
        .objects_by_sync_token(Some("tok-1"), false)
        .await
        .expect("sync failed");
    assert_eq!(batch.sync_token, "tok-2");
    assert_eq!(batch.objects.len(), 1);
    assert_eq!(batch.deleted, vec!["/cal/work/old.ics".to_string()]);
    assert_eq!(batch.objects[0].uid().as_deref(), Some("new-1"));
}

#[tokio::test]
async fn client_todos_filter_pending() {
    let server = MockServer::start().await;

    Mock::given(method("REPORT"))
        .and(body_string_contains("calendar-query"))
        .respond_with(ResponseTemplate::new(207).set_body_raw(
            r#"<?xml version="1.0" encoding="utf-8" ?>
<D:multistatus xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav">
  <D:response>
    <D:href>/cal/work/t1.ics</D:href>
    <D:propstat>
      <D:prop>
        <D:getetag>"t1"</D:getetag>
        <C:calendar-data>BEGIN:VCALENDAR
VERSION:2.0
BEGIN:VTODO
UID:t1
SUMMARY:pending task
END:VTODO
END:VCALENDAR
</C:calendar-data>
      </D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
  <D:response>
    <D:href>/cal/work/t2.ics</D:href>
    <D:propstat>
      <D:prop>
        <D:getetag>"t2"</D:getetag>
        <C:calendar-data>BEGIN:VCALENDAR
VERSION:2.0
BEGIN:VTODO
UID:t2
SUMMARY:done task
STATUS:COMPLETED
COMPLETED:20240601T120000Z
END:VTODO
END:VCALENDAR
</C:calendar-data>
      </D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
</D:multistatus>"#,
            "application/xml",
        ))
        .mount(&server)
        .await;

    let client = Client::new(&config(&server)).expect("client");
    let calendar = client.calendar("/cal/work/").expect("calendar");

    let pending = calendar.todos(false).await.expect("todos failed");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].uid().as_deref(), Some("t1"));

    let all = calendar.todos(true).await.expect("todos failed");
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn client_search_post_filters_summary() {
    let server = MockServer::start().await;

    // A server with broken filters returns both events; the post filter
    // keeps only the matching one.
    Mock::given(method("REPORT"))
        .and(body_string_contains("calendar-query"))
        .respond_with(ResponseTemplate::new(207).set_body_raw(
            r#"<?xml version="1.0" encoding="utf-8" ?>
<D:multistatus xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav">
  <D:response>
    <D:href>/cal/work/e1.ics</D:href>
    <D:propstat>
      <D:prop>
        <D:getetag>"e1"</D:getetag>
        <C:calendar-data>BEGIN:VCALENDAR
VERSION:2.0
BEGIN:VEVENT
UID:e1
SUMMARY:Weekly Standup
END:VEVENT
END:VCALENDAR
</C:calendar-data>
      </D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
  <D:response>
    <D:href>/cal/work/e2.ics</D:href>
    <D:propstat>
      <D:prop>
        <D:getetag>"e2"</D:getetag>
        <C:calendar-data>BEGIN:VCALENDAR
VERSION:2.0
BEGIN:VEVENT
UID:e2
SUMMARY:Lunch
END:VEVENT
END:VCALENDAR
</C:calendar-data>
      </D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
</D:multistatus>"#,
            "application/xml",
        ))
        .mount(&server)
        .await;

    let client = Client::new(&config(&server)).expect("client");
    let calendar = client.calendar("/cal/work/").expect("calendar");

    let hits = calendar
        .search(&CalendarSearcher::new().event().summary("standup"))
        .await
        .expect("search failed");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].uid().as_deref(), Some("e1"));
}

#[tokio::test]
async fn client_delete_tolerates_404() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/cal/work/gone.ics"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = Client::new(&config(&server)).expect("client");
    let calendar = client.calendar("/cal/work/").expect("calendar");
    let mut object = calendar
        .object("gone.ics")
        .expect("handle construction failed");
    object.delete().await.expect("404 should count as success");
}
