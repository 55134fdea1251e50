//! Acquisition behavior while connected: subscription restarts on interest
//! and enablement changes, capability filtering, pruning, and the stream
//! payload paths.

mod common;

use std::time::Duration;

use common::{harness, id_vec, ids, settle, wait_until, MockTransport};
use obdcore::{
    AcquisitionConfig, ConnectionState, DecodedPayload, FuelSystemState, MetricId, MetricSample,
    MilStatus, SharedStats, TransportError,
};

fn fast_config() -> AcquisitionConfig {
    AcquisitionConfig {
        connect_timeout: Duration::from_millis(100),
        poll_interval: Duration::from_millis(10),
        ..AcquisitionConfig::default()
    }
}

fn rpm(value: f64) -> DecodedPayload {
    DecodedPayload::Sample(MetricSample::new("010C", value, "RPM"))
}

fn coolant(value: f64) -> DecodedPayload {
    DecodedPayload::Sample(MetricSample::new("0105", value, "°C"))
}

async fn wait_subscriptions(transport: &MockTransport, count: usize) -> bool {
    wait_until(|| {
        let n = transport.subscribe_count();
        async move { n >= count }
    })
    .await
}

async fn wait_tracked(stats: &SharedStats, count: usize) -> bool {
    wait_until(|| {
        let stats = stats.clone();
        async move { stats.read().await.tracked_count() == count }
    })
    .await
}

#[tokio::test]
async fn widening_interest_restarts_subscription_and_stats_start_fresh() {
    let mut h = harness(fast_config());
    h.transport.set_supported(&["010C", "0105"]);
    let token = h.registry.register();
    h.registry.replace(token, ids(&["010C"]));
    settle().await;

    h.controller.connect().await;
    assert_eq!(h.transport.last_subscription(), Some(id_vec(&["010C"])));

    h.transport.feed(rpm(700.0));
    assert!(wait_tracked(&h.stats, 1).await);

    // The observer now renders the coolant gauge as well.
    h.registry.replace(token, ids(&["010C", "0105"]));
    assert!(wait_subscriptions(&h.transport, 2).await);
    assert_eq!(
        h.transport.last_subscription(),
        Some(id_vec(&["0105", "010C"]))
    );

    h.transport.feed(coolant(88.0));
    assert!(wait_tracked(&h.stats, 2).await);

    let stats = h.stats.read().await;
    let coolant_stats = stats.stats(&MetricId::from("0105")).unwrap();
    assert_eq!(coolant_stats.sample_count, 1);
    assert_eq!(coolant_stats.min, 88.0);
    assert_eq!(coolant_stats.max, 88.0);
}

#[tokio::test]
async fn narrowing_interest_prunes_dropped_metric_stats() {
    let mut h = harness(fast_config());
    let token = h.registry.register();
    h.registry.replace(token, ids(&["010C", "0105"]));
    settle().await;

    h.controller.connect().await;
    h.transport.feed(rpm(700.0));
    h.transport.feed(coolant(88.0));
    assert!(wait_tracked(&h.stats, 2).await);

    h.registry.replace(token, ids(&["010C"]));
    assert!(wait_subscriptions(&h.transport, 2).await);
    assert_eq!(h.transport.last_subscription(), Some(id_vec(&["010C"])));

    // Coolant must not linger as a stale "current" value.
    assert!(wait_tracked(&h.stats, 1).await);
    assert!(h.stats.read().await.stats(&MetricId::from("0105")).is_none());
}

#[tokio::test]
async fn disabling_a_metric_restarts_and_prunes() {
    let mut h = harness(fast_config());
    let token = h.registry.register();
    h.registry.replace(token, ids(&["010C", "0105"]));
    settle().await;

    h.controller.connect().await;
    h.transport.feed(coolant(90.0));
    assert!(wait_tracked(&h.stats, 1).await);

    h.enablement.set_enabled(&MetricId::from("0105"), false);
    assert!(wait_subscriptions(&h.transport, 2).await);
    assert_eq!(h.transport.last_subscription(), Some(id_vec(&["010C"])));
    assert!(wait_tracked(&h.stats, 0).await);
}

#[tokio::test]
async fn unsupported_metrics_are_filtered_but_vendor_passes_through() {
    let mut h = harness(fast_config());
    h.transport.set_supported(&["010C"]);
    // The transmission temp metric is a vendor extension, off by default.
    h.enablement.set_enabled(&MetricId::from("221940"), true);
    let token = h.registry.register();
    h.registry.replace(token, ids(&["010C", "0105", "221940"]));
    settle().await;

    h.controller.connect().await;

    assert_eq!(
        h.controller.supported_metrics().await,
        Some(ids(&["010C"]))
    );
    // 0105 is enabled and interesting but undiscovered; 221940 is outside
    // the discoverable category and passes through.
    assert_eq!(
        h.transport.last_subscription(),
        Some(id_vec(&["010C", "221940"]))
    );
}

#[tokio::test]
async fn interest_in_disabled_metric_polls_nothing_extra() {
    let mut h = harness(fast_config());
    let token = h.registry.register();
    // 015C (oil temp) is disabled by default: interest alone is not enough.
    h.registry.replace(token, ids(&["010C", "015C"]));
    settle().await;

    h.controller.connect().await;
    assert_eq!(h.transport.last_subscription(), Some(id_vec(&["010C"])));
}

#[tokio::test]
async fn stream_error_is_absorbed_without_state_change() {
    let mut h = harness(fast_config());
    let token = h.registry.register();
    h.registry.replace(token, ids(&["010C"]));
    settle().await;

    h.controller.connect().await;
    h.transport.feed(rpm(700.0));
    assert!(wait_tracked(&h.stats, 1).await);

    h.transport
        .feed_error(TransportError::Stream("bus noise".into()));
    settle().await;

    // The logical connection is not considered lost.
    assert_eq!(h.controller.state(), ConnectionState::Connected);
    assert_eq!(h.stats.read().await.tracked_count(), 1);
}

#[tokio::test]
async fn stream_completion_is_absorbed_without_state_change() {
    let mut h = harness(fast_config());
    let token = h.registry.register();
    h.registry.replace(token, ids(&["010C"]));
    settle().await;

    h.controller.connect().await;
    h.transport.end_stream();
    settle().await;

    assert_eq!(h.controller.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn status_payloads_flow_to_snapshots() {
    let mut h = harness(fast_config());
    let token = h.registry.register();
    h.registry.replace(token, ids(&["010C"]));
    settle().await;

    h.controller.connect().await;
    h.transport.feed(DecodedPayload::MilStatus(MilStatus {
        mil_on: true,
        dtc_count: 3,
    }));
    h.transport.feed(DecodedPayload::FuelStatus(vec![
        Some(FuelSystemState {
            code: "2".into(),
            description: "Closed loop, using oxygen sensor feedback".into(),
        }),
        None,
    ]));

    let stats = h.stats.clone();
    assert!(
        wait_until(|| {
            let stats = stats.clone();
            async move { stats.read().await.fuel_status().is_some() }
        })
        .await
    );

    let stats = h.stats.read().await;
    assert_eq!(stats.mil_status(), Some(MilStatus { mil_on: true, dtc_count: 3 }));
    assert_eq!(stats.fuel_status().unwrap().len(), 2);
    // Status payloads never create per-metric stats.
    assert_eq!(stats.tracked_count(), 0);
}

#[tokio::test]
async fn reset_all_collapses_running_windows() {
    let mut h = harness(fast_config());
    let token = h.registry.register();
    h.registry.replace(token, ids(&["010C"]));
    settle().await;

    h.controller.connect().await;
    for value in [700.0, 650.0, 6200.0] {
        h.transport.feed(rpm(value));
    }

    let stats = h.stats.clone();
    assert!(
        wait_until(|| {
            let stats = stats.clone();
            async move {
                stats
                    .read()
                    .await
                    .stats(&MetricId::from("010C"))
                    .map(|s| s.sample_count == 3)
                    .unwrap_or(false)
            }
        })
        .await
    );

    {
        let stats = h.stats.read().await;
        let rpm_stats = stats.stats(&MetricId::from("010C")).unwrap();
        assert_eq!(rpm_stats.min, 650.0);
        assert_eq!(rpm_stats.max, 6200.0);
        assert_eq!(rpm_stats.latest.value, 6200.0);
    }

    h.controller.reset_all_stats().await;
    let stats = h.stats.read().await;
    let rpm_stats = stats.stats(&MetricId::from("010C")).unwrap();
    assert_eq!(rpm_stats.min, 6200.0);
    assert_eq!(rpm_stats.max, 6200.0);
    assert_eq!(rpm_stats.sample_count, 1);
}
