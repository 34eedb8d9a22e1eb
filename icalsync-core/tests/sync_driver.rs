mod common;

use std::time::Duration as StdDuration;

use chrono::{Duration, DurationRound, Utc};
use icalsync_core::{FeedFetcher, ReminderMode, SyncDriver, SyncOptions};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{TestStore, feed, new_calendar, vevent};

fn driver(t: &TestStore, page_size: usize, max_bytes: u64) -> SyncDriver {
    let fetcher = FeedFetcher::new(StdDuration::from_secs(5), max_bytes).unwrap();
    SyncDriver::new(
        t.store.clone(),
        fetcher,
        SyncOptions {
            page_size,
            concurrency: 3,
            ..Default::default()
        },
    )
}

async fn serve(server: &MockServer, route: &str, status: u16, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .mount(server)
        .await;
}

fn tomorrow() -> chrono::DateTime<Utc> {
    (Utc::now() + Duration::days(1))
        .duration_trunc(Duration::hours(1))
        .unwrap()
}

#[tokio::test]
async fn sweep_imports_every_due_calendar() {
    let t = TestStore::new();
    let server = MockServer::start().await;
    let start = tomorrow();

    serve(
        &server,
        "/team.ics",
        200,
        feed(&[
            vevent("planning", start, Some("-PT1H"), &[]),
            vevent("retro", start + Duration::hours(2), None, &[]),
        ]),
    )
    .await;
    serve(
        &server,
        "/personal.ics",
        200,
        feed(&[vevent("dentist", start, None, &[])]),
    )
    .await;

    let team = t
        .store
        .create_calendar(&new_calendar(
            &format!("{}/team.ics", server.uri()),
            ReminderMode::UnsetOnly,
            &[Duration::minutes(10)],
        ))
        .unwrap();
    let personal = t
        .store
        .create_calendar(&new_calendar(
            &format!("{}/personal.ics", server.uri()),
            ReminderMode::Replace,
            &[Duration::minutes(30), Duration::minutes(5)],
        ))
        .unwrap();

    let summary = driver(&t, 100, 1024 * 1024)
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.synced, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.events, 3);
    // planning: embedded 1h; retro: default 10m; dentist: two defaults
    assert_eq!(summary.alarms, 4);

    assert_eq!(t.store.calendar_events(&team.id).unwrap().len(), 2);
    assert_eq!(t.store.calendar_events(&personal.id).unwrap().len(), 1);

    let team = t.store.get_calendar(&team.id).unwrap().unwrap();
    assert!(team.last_sync_time.is_some());
    assert!(team.last_sync_error.is_none());
}

#[tokio::test]
async fn synced_calendars_are_not_due_again_right_away() {
    let t = TestStore::new();
    let server = MockServer::start().await;
    serve(&server, "/a.ics", 200, feed(&[vevent("a", tomorrow(), Some("-PT5M"), &[])])).await;

    t.store
        .create_calendar(&new_calendar(
            &format!("{}/a.ics", server.uri()),
            ReminderMode::UnsetOnly,
            &[],
        ))
        .unwrap();

    let driver = driver(&t, 100, 1024 * 1024);
    let first = driver.run(&CancellationToken::new()).await.unwrap();
    let second = driver.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(first.synced, 1);
    assert_eq!(second.synced, 0);
    assert_eq!(second.pages, 1);
}

#[tokio::test]
async fn failing_calendar_does_not_stop_the_others() {
    let t = TestStore::new();
    let server = MockServer::start().await;
    let start = tomorrow();

    serve(&server, "/good.ics", 200, feed(&[vevent("ok", start, Some("-PT15M"), &[])])).await;
    serve(&server, "/broken.ics", 500, String::new()).await;

    let good = t
        .store
        .create_calendar(&new_calendar(
            &format!("{}/good.ics", server.uri()),
            ReminderMode::UnsetOnly,
            &[],
        ))
        .unwrap();
    let broken = t
        .store
        .create_calendar(&new_calendar(
            &format!("{}/broken.ics", server.uri()),
            ReminderMode::UnsetOnly,
            &[],
        ))
        .unwrap();

    let summary = driver(&t, 100, 1024 * 1024)
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.synced, 1);
    assert_eq!(summary.failed, 1);

    let good = t.store.get_calendar(&good.id).unwrap().unwrap();
    assert!(good.last_sync_time.is_some());

    let broken = t.store.get_calendar(&broken.id).unwrap().unwrap();
    assert!(broken.last_sync_time.is_none());
    let error = broken.last_sync_error.unwrap();
    assert_eq!(error.kind, "UnexpectedStatusCode");
    assert!(error.message.contains("500"));
}

#[tokio::test]
async fn failed_refresh_keeps_previous_events() {
    let t = TestStore::new();
    let server = MockServer::start().await;
    let start = tomorrow();

    Mock::given(method("GET"))
        .and(path("/flaky.ics"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(feed(&[vevent("standup", start, Some("-PT10M"), &[])])),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky.ics"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xff, 0xfe, 0x00, 0x42]))
        .mount(&server)
        .await;

    let calendar = t
        .store
        .create_calendar(&new_calendar(
            &format!("{}/flaky.ics", server.uri()),
            ReminderMode::UnsetOnly,
            &[],
        ))
        .unwrap();

    let driver = SyncDriver::new(
        t.store.clone(),
        FeedFetcher::new(StdDuration::from_secs(5), 1024 * 1024).unwrap(),
        SyncOptions {
            staleness: StdDuration::ZERO,
            ..Default::default()
        },
    );
    assert_eq!(driver.run(&CancellationToken::new()).await.unwrap().synced, 1);

    let before_events = t.store.calendar_events(&calendar.id).unwrap();
    let before_sync = t.store.get_calendar(&calendar.id).unwrap().unwrap().last_sync_time;

    // Last sync times have one-second resolution
    tokio::time::sleep(StdDuration::from_millis(1100)).await;
    let summary = driver.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(summary.failed, 1);

    let after = t.store.get_calendar(&calendar.id).unwrap().unwrap();
    assert_eq!(t.store.calendar_events(&calendar.id).unwrap(), before_events);
    assert_eq!(after.last_sync_time, before_sync);
    assert_eq!(after.last_sync_error.unwrap().kind, "DecodeFailed");
}

#[tokio::test]
async fn oversized_feed_is_a_failure_not_a_partial_import() {
    let t = TestStore::new();
    let server = MockServer::start().await;
    let events: Vec<String> = (0..200)
        .map(|i| vevent(&format!("event-{i}"), tomorrow(), Some("-PT5M"), &[]))
        .collect();
    serve(&server, "/huge.ics", 200, feed(&events)).await;

    let calendar = t
        .store
        .create_calendar(&new_calendar(
            &format!("{}/huge.ics", server.uri()),
            ReminderMode::UnsetOnly,
            &[],
        ))
        .unwrap();

    let summary = driver(&t, 100, 4096)
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.failed, 1);
    assert!(t.store.calendar_events(&calendar.id).unwrap().is_empty());

    let calendar = t.store.get_calendar(&calendar.id).unwrap().unwrap();
    assert!(calendar.last_sync_time.is_none());
    assert_eq!(calendar.last_sync_error.unwrap().kind, "IcalSizeExceeded");
}

#[tokio::test]
async fn sweep_walks_every_page() {
    let t = TestStore::new();
    let server = MockServer::start().await;
    serve(&server, "/shared.ics", 200, feed(&[vevent("x", tomorrow(), Some("-PT5M"), &[])])).await;

    for _ in 0..5 {
        t.store
            .create_calendar(&new_calendar(
                &format!("{}/shared.ics", server.uri()),
                ReminderMode::UnsetOnly,
                &[],
            ))
            .unwrap();
    }

    let summary = driver(&t, 2, 1024 * 1024)
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.pages, 3);
    assert_eq!(summary.synced, 5);
    assert_eq!(summary.alarms, 5);
}

#[tokio::test]
async fn calendar_leased_elsewhere_is_skipped() {
    let t = TestStore::new();
    let server = MockServer::start().await;
    serve(&server, "/busy.ics", 200, feed(&[vevent("x", tomorrow(), Some("-PT5M"), &[])])).await;

    let calendar = t
        .store
        .create_calendar(&new_calendar(
            &format!("{}/busy.ics", server.uri()),
            ReminderMode::UnsetOnly,
            &[],
        ))
        .unwrap();
    let _held = t
        .store
        .acquire_lease(&calendar.id, StdDuration::from_secs(600))
        .unwrap()
        .unwrap();

    let summary = driver(&t, 100, 1024 * 1024)
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.synced, 0);
    assert!(t.store.calendar_events(&calendar.id).unwrap().is_empty());
    assert!(
        t.store
            .get_calendar(&calendar.id)
            .unwrap()
            .unwrap()
            .last_sync_error
            .is_none()
    );
}

#[tokio::test]
async fn cancelled_sweep_does_nothing() {
    let t = TestStore::new();
    t.store
        .create_calendar(&new_calendar(
            "https://calendar.invalid/feed.ics",
            ReminderMode::UnsetOnly,
            &[],
        ))
        .unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = driver(&t, 100, 1024 * 1024).run(&cancel).await.unwrap();

    assert_eq!(summary.pages, 0);
    assert_eq!(summary.synced + summary.failed, 0);
}

#[tokio::test]
async fn overridden_instance_replaces_its_occurrence() {
    let t = TestStore::new();
    let server = MockServer::start().await;
    let start = tomorrow();
    let moved_from = start + Duration::days(1);
    let moved_to = moved_from + Duration::hours(3);

    let master = vevent(
        "series",
        start,
        Some("-PT10M"),
        &["RRULE:FREQ=DAILY;COUNT=3"],
    );
    let recurrence_id = format!("RECURRENCE-ID:{}", common::ics_time(moved_from));
    let instance = vevent("series", moved_to, Some("-PT10M"), &[recurrence_id.as_str()]);
    serve(&server, "/series.ics", 200, feed(&[master, instance])).await;

    let calendar = t
        .store
        .create_calendar(&new_calendar(
            &format!("{}/series.ics", server.uri()),
            ReminderMode::UnsetOnly,
            &[],
        ))
        .unwrap();

    let summary = driver(&t, 100, 1024 * 1024)
        .run(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.synced, 1);

    let mut event_times: Vec<_> = t
        .store
        .due_alarms(start + Duration::days(10))
        .unwrap()
        .into_iter()
        .filter(|a| a.calendar_id == calendar.id)
        .map(|a| a.event_time)
        .collect();
    event_times.sort();

    assert_eq!(
        event_times,
        vec![start, moved_to, start + Duration::days(2)]
    );
}

#[tokio::test]
async fn imports_never_exceed_the_concurrency_ceiling() {
    let t = TestStore::new();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow.ics"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(feed(&[vevent("slow", tomorrow(), Some("-PT5M"), &[])]))
                .set_delay(StdDuration::from_millis(400)),
        )
        .mount(&server)
        .await;

    for _ in 0..6 {
        t.store
            .create_calendar(&new_calendar(
                &format!("{}/slow.ics", server.uri()),
                ReminderMode::UnsetOnly,
                &[],
            ))
            .unwrap();
    }

    let driver = SyncDriver::new(
        t.store.clone(),
        FeedFetcher::new(StdDuration::from_secs(5), 1024 * 1024).unwrap(),
        SyncOptions {
            concurrency: 2,
            ..Default::default()
        },
    );

    let started = std::time::Instant::now();
    let summary = driver.run(&CancellationToken::new()).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(summary.synced, 6);
    // Two at a time means three rounds of the 400ms response delay
    assert!(
        elapsed >= StdDuration::from_millis(1150),
        "six imports finished in {elapsed:?} with a ceiling of two"
    );
}
