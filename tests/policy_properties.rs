use alert_governance::policy::{
    compute_throttle_delay, deduplicate_alerts, PolicyConfig, MAX_THROTTLE_DELAY_MS,
};
use alert_governance::{AlertEvent, AlertKind, AlertSettings, Severity, ThrottleSettings};
use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use std::collections::HashMap;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 8, 0, 0).unwrap()
}

fn arb_severity() -> impl Strategy<Value = Severity> {
    prop_oneof![
        Just(Severity::Low),
        Just(Severity::Moderate),
        Just(Severity::Important),
        Just(Severity::Critical),
    ]
}

fn arb_alert() -> impl Strategy<Value = AlertEvent> {
    (
        prop_oneof![Just("stu-1"), Just("stu-2")],
        prop_oneof![Just(AlertKind::BehaviorSpike), Just(AlertKind::Safety)],
        arb_severity(),
        0i64..(6 * 60),
        prop_oneof![Just("hall"), Just("gym"), Just("")],
    )
        .prop_map(|(student, kind, severity, minutes, context)| {
            AlertEvent::new(student, kind, severity, 0.7, t0() + Duration::minutes(minutes))
                .with_context_key(context)
        })
}

fn arb_overrides() -> impl Strategy<Value = Option<AlertSettings>> {
    proptest::option::of(
        proptest::collection::btree_map(arb_severity(), -1_000.0f64..200_000_000.0, 0..4).prop_map(
            |max_delay_by_severity| AlertSettings {
                throttle: Some(ThrottleSettings {
                    max_delay_by_severity,
                }),
                ..Default::default()
            },
        ),
    )
}

// ── Dedup bound ──────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn dedup_keeps_one_alert_per_key_and_window(
        alerts in proptest::collection::vec(arb_alert(), 0..40),
        window_minutes in 1i64..240,
    ) {
        let window_ms = (window_minutes * 60_000) as u64;
        let unique = deduplicate_alerts(&alerts, window_ms);

        prop_assert!(unique.len() <= alerts.len());

        let window = Duration::milliseconds(window_ms as i64);
        let mut input_times: HashMap<String, Vec<DateTime<Utc>>> = HashMap::new();
        for alert in &alerts {
            input_times.entry(alert.dedupe_key()).or_default().push(alert.created_at);
        }

        // Buckets open at the first alert of a key and at every alert that
        // falls outside the previous bucket.
        let mut anchors: HashMap<String, Vec<DateTime<Utc>>> = HashMap::new();
        for (key, mut times) in input_times {
            times.sort();
            let mut opened: Vec<DateTime<Utc>> = Vec::new();
            for t in times {
                if opened.last().map_or(true, |&a| t - a >= window) {
                    opened.push(t);
                }
            }
            anchors.insert(key, opened);
        }

        let mut seen: HashMap<String, Vec<usize>> = HashMap::new();
        for alert in &unique {
            let key = alert.dedupe_key();
            let buckets = &anchors[&key];
            let bucket = buckets.iter().rposition(|&a| a <= alert.created_at).unwrap();
            let hits = seen.entry(key).or_default();
            prop_assert!(!hits.contains(&bucket), "two survivors in one window");
            hits.push(bucket);
        }
        for (key, buckets) in &anchors {
            prop_assert_eq!(seen.get(key).map_or(0, |h| h.len()), buckets.len());
        }
    }

    #[test]
    fn dedup_survivors_come_from_input(
        alerts in proptest::collection::vec(arb_alert(), 0..30),
    ) {
        let unique = deduplicate_alerts(&alerts, 3_600_000);
        for survivor in &unique {
            prop_assert!(alerts.iter().any(|a| a.id == survivor.id));
        }
        for pair in unique.windows(2) {
            prop_assert!(pair[0].created_at <= pair[1].created_at);
        }
    }
}

// ── Throttle bounds ──────────────────────────────────────────────────────

proptest! {
    #[test]
    fn throttle_delay_non_decreasing_and_bounded(
        severity in proptest::option::of(arb_severity()),
        settings in arb_overrides(),
        attempts in 0u32..80,
    ) {
        let config = PolicyConfig::default();
        let now = compute_throttle_delay(&config, severity, attempts, settings.as_ref());
        let next = compute_throttle_delay(&config, severity, attempts + 1, settings.as_ref());

        prop_assert!(now <= next);
        prop_assert!(next <= MAX_THROTTLE_DELAY_MS);
    }

    #[test]
    fn throttle_delay_ordered_by_severity(
        settings in arb_overrides(),
        attempts in 0u32..40,
    ) {
        let config = PolicyConfig::default();
        let delays: Vec<u64> = Severity::ALL
            .iter()
            .map(|&s| compute_throttle_delay(&config, Some(s), attempts, settings.as_ref()))
            .collect();

        // Severity::ALL runs Critical -> Low
        for pair in delays.windows(2) {
            prop_assert!(pair[0] <= pair[1], "delays out of order: {:?}", delays);
        }
    }
}
