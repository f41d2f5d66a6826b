//! End-to-end tests of the engine over real backends

use chrono::{DateTime, TimeZone, Utc};
use leadmetrics::anomaly::AnomalyType;
use leadmetrics::cadence::Cadence;
use leadmetrics::clock::TokioClock;
use leadmetrics::config::EngineConfig;
use leadmetrics::engine::AnalyticsEngine;
use leadmetrics::events::{BroadcastEventBus, Event, EventBus};
use leadmetrics::storage::{FileRepository, MemoryRepository, SnapshotRepository};
use leadmetrics::testing::{EventBuilder, FlakyRepository};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, day, hour, 0, 0).unwrap()
}

#[tokio::test]
async fn test_bus_events_reach_file_repository() {
    let dir = TempDir::new().unwrap();
    let repo = Arc::new(FileRepository::open(dir.path()).await.unwrap());
    let bus = Arc::new(BroadcastEventBus::default());
    let engine = AnalyticsEngine::new(
        EngineConfig::default(),
        repo.clone(),
        Arc::new(TokioClock::starting_at(at(10, 12))),
        bus.clone(),
    )
    .unwrap();

    engine.start().await;
    for i in 0..5 {
        let payload = json!({
            "formType": "contact",
            "formId": "f-1",
            "sessionId": format!("s-{i}"),
            "metadata": {"processingTime": 120},
            "ipAddress": "203.0.113.9",
            "userAgent": "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) Mobile",
            "timestamp": "2026-06-10T11:00:00Z"
        });
        bus.publish(Event::from_named("form.submitted", payload.clone(), at(10, 12)).unwrap());
        bus.publish(Event::from_named("form.processed", payload, at(10, 12)).unwrap());
    }
    bus.publish(
        Event::from_named(
            "form.converted",
            json!({"formType": "contact", "sessionId": "s-0", "timestamp": "2026-06-10T11:30:00Z"}),
            at(10, 12),
        )
        .unwrap(),
    );
    let report = engine.stop().await;

    assert_eq!(report.persisted, 11);
    let stats = engine.get_stats().stats;
    assert_eq!(stats.form_submissions.total, 5);
    assert_eq!(stats.form_submissions.by_device.mobile, 5);
    assert_eq!(stats.processing_time.average, 120.0);
    assert_eq!(stats.conversions.conversion_rate, 20.0);

    // A second handle on the same directory sees the persisted data
    let reopened = FileRepository::open(dir.path()).await.unwrap();
    let window = leadmetrics::storage::TimeWindow::new(at(10, 0), at(11, 0));
    assert_eq!(reopened.count_conversions(&window).await.unwrap(), 1);
    assert_eq!(
        reopened.get_snapshots_by_type(Cadence::Monthly, 10).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_failed_flush_is_retried_without_loss() {
    let repo = FlakyRepository::new();
    let engine = AnalyticsEngine::new(
        EngineConfig::default(),
        Arc::new(repo.clone()),
        Arc::new(TokioClock::starting_at(at(10, 12))),
        Arc::new(BroadcastEventBus::default()),
    )
    .unwrap();

    for i in 0..3 {
        engine.ingest(EventBuilder::page_visit().session(&format!("a-{i}")).build());
    }
    repo.set_unavailable(true);
    let failed = engine.flush().await;
    assert_eq!(failed.requeued, 3);
    assert_eq!(engine.get_stats().buffer_size, 3);

    engine.ingest(EventBuilder::page_visit().session("b-0").build());
    repo.set_unavailable(false);
    let retried = engine.flush().await;
    assert_eq!(retried.persisted, 4);

    let sessions: Vec<String> = repo
        .inner()
        .events()
        .await
        .into_iter()
        .map(|e| e.session_id)
        .collect();
    assert_eq!(sessions, vec!["a-0", "a-1", "a-2", "b-0"]);
}

#[tokio::test(start_paused = true)]
async fn test_daily_report_runs_anomaly_pass() {
    // Nine quiet days and one spike before the 11th
    let mut events = Vec::new();
    for day in 1..=10u32 {
        let visits = if day == 10 { 60 } else { 5 };
        for n in 0..visits {
            events.push(EventBuilder::page_visit().at(at(day, n % 24)).build());
        }
    }
    let repo = MemoryRepository::with_events(events).await;
    let engine = AnalyticsEngine::new(
        EngineConfig::default(),
        Arc::new(repo.clone()),
        Arc::new(TokioClock::starting_at(at(10, 23))),
        Arc::new(BroadcastEventBus::default()),
    )
    .unwrap();

    engine.start().await;
    tokio::time::sleep(Duration::from_secs(3601)).await;

    let daily = engine.schedule_stats(Cadence::Daily).unwrap();
    assert_eq!(daily.fires, 1);

    let latest = engine.get_latest_snapshot(Cadence::Daily).await.unwrap().unwrap();
    assert_eq!(latest.landing_page_visits, 60);
    assert_eq!((latest.window_start, latest.window_end), (at(10, 0), at(11, 0)));

    let anomalies = engine.recent_anomalies();
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0].anomaly_type, AnomalyType::Traffic);
    assert_eq!(anomalies[0].date, at(10, 0).date_naive());

    engine.stop().await;
}
