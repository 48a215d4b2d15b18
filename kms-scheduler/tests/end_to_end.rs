//! End-to-end scenarios exercising the Manager, Timetable, Dispatcher, and
//! Janitor together through the in-process broker, without any actor-level
//! mocking.

use std::sync::Arc;
use std::time::Duration;

use kms_config::SchedulerConfig;
use kms_scheduler::{
    ConsumedRecord, Consumer, LocalBroker, Manager, NoopObserver, RebalanceListener, HEADER_ACTION, HEADER_DELIVER_AT,
    HEADER_DELIVER_TO,
};
use kms_store::MemStore;

fn new_manager() -> Arc<Manager> {
    let config = SchedulerConfig {
        topic_partitions: 1,
        ..SchedulerConfig::default()
    };
    let store: Arc<dyn kms_store::PartitionedStore> = Arc::new(MemStore::new());
    let broker = LocalBroker::new();
    let manager = Manager::new(config, store, broker, Arc::new(NoopObserver));
    manager.ensure_topics();
    manager
}

fn ingress(headers: Vec<(String, String)>) -> ConsumedRecord {
    ConsumedRecord {
        partition: 0,
        offset: 0,
        key: Some("order-1".to_string()),
        value: Some("payload".to_string()),
        headers,
    }
}

#[tokio::test]
async fn scenario_future_delivery_round_trips_through_the_timetable() {
    let manager = new_manager();
    manager.broker().ensure_topic("orders", 1);

    let deliver_at = kms_common::now_unix_seconds() + 2;
    manager
        .distribute(ingress(vec![
            (HEADER_DELIVER_AT.to_string(), iso(deliver_at)),
            (HEADER_DELIVER_TO.to_string(), "orders".to_string()),
            ("x-trace-id".to_string(), "trace-123".to_string()),
        ]))
        .await
        .unwrap();

    let action_record = manager.broker().poll(&manager.config().actions_topic(), 0).await.unwrap();
    manager.process_actions(action_record).await.unwrap();
    assert_eq!(manager.timetable_counter(0, deliver_at), 1);

    manager.on_partitions_assigned(&[0]).await;
    manager.on_timetable_recovery_completed();

    let delivered = tokio::time::timeout(Duration::from_secs(6), async {
        loop {
            if let Some(record) = manager.broker().poll("orders", 0).await {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("message should have been delivered once due");

    assert_eq!(delivered.key.as_deref(), Some("order-1"));
    assert_eq!(delivered.value.as_deref(), Some("payload"));
    assert!(
        delivered.headers.contains(&("x-trace-id".to_string(), "trace-123".to_string())),
        "a non-kms header must round-trip byte-for-byte to the destination topic"
    );
    assert!(
        delivered.headers.iter().all(|(k, _)| k != HEADER_ACTION && k != HEADER_DELIVER_AT && k != HEADER_DELIVER_TO),
        "kms control headers must never leak into the delivered message"
    );

    manager.stop().await;
}

#[tokio::test]
async fn scenario_past_due_message_bypasses_the_timetable() {
    let manager = new_manager();
    manager.broker().ensure_topic("orders", 1);

    manager
        .distribute(ingress(vec![
            (HEADER_DELIVER_AT.to_string(), "2000-01-01T00:00:00Z".to_string()),
            (HEADER_DELIVER_TO.to_string(), "orders".to_string()),
        ]))
        .await
        .unwrap();

    let delivered = manager.broker().poll("orders", 0).await;
    assert!(delivered.is_some(), "past-due messages should be sent immediately");
    assert_eq!(manager.instant_send_total(0), 1);
    assert!(
        manager.broker().poll(&manager.config().actions_topic(), 0).await.is_none(),
        "an instant-sent message should never touch the actions topic"
    );
}

#[tokio::test]
async fn scenario_malformed_ingress_is_dlqd_not_failed() {
    let manager = new_manager();

    manager.distribute(ingress(vec![])).await.unwrap();

    let dlq_record = manager
        .broker()
        .poll(&manager.config().dlq_topic(), 0)
        .await
        .expect("malformed ingress should land on the dlq topic");
    assert!(dlq_record.value.is_some());
}

#[tokio::test]
async fn scenario_rebalance_drains_in_flight_work_before_revoking() {
    let manager = new_manager();
    manager.broker().ensure_topic("orders", 1);

    manager.on_partitions_assigned(&[0]).await;
    manager.on_timetable_recovery_completed();

    manager.on_rebalance_started().await;
    manager.on_partitions_revoked(&[0]).await;

    assert_eq!(manager.worker_count(), 0);
}

fn iso(unix_seconds: i64) -> String {
    // A minimal RFC 3339 encoder good enough for these tests: every
    // `deliver_at` used here is a whole number of seconds since the epoch.
    let days_since_epoch = unix_seconds.div_euclid(86_400);
    let seconds_of_day = unix_seconds.rem_euclid(86_400);
    let (year, month, day) = civil_from_days(days_since_epoch);
    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}Z",
        seconds_of_day / 3600,
        (seconds_of_day % 3600) / 60,
        seconds_of_day % 60
    )
}

// Howard Hinnant's `civil_from_days` algorithm, used only to turn the test's
// relative unix timestamps into RFC 3339 strings without pulling in a date
// library just for the test harness.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}
