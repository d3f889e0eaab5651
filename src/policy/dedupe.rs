//! Deduplication and daily cap annotation
//!
//! Both operations are pure over the given batch; persisted state is not read.

use super::settings::daily_cap;
use crate::types::{AlertEvent, AlertSettings, Severity};
use chrono::{Duration, FixedOffset, NaiveDate, TimeZone};
use std::collections::{BTreeMap, HashMap};

/// Context used when an alert carries no `contextKey`
pub const DEFAULT_CONTEXT_KEY: &str = "default";

// ~136 years; keeps window arithmetic inside chrono's range
const MAX_WINDOW_MS: u64 = u32::MAX as u64 * 1000;

/// Deterministic key identifying "the same recurring situation"
pub fn calculate_dedupe_key(alert: &AlertEvent) -> String {
    let context = alert
        .context_key()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(DEFAULT_CONTEXT_KEY);
    format!("{}|{}|{}", alert.student_id, alert.kind.as_str(), context)
}

struct OpenGroup {
    anchor: chrono::DateTime<chrono::Utc>,
    representative: AlertEvent,
}

/// Collapse alerts sharing a dedupe key within `window_ms` of their group anchor.
///
/// Groups are anchored on the first (earliest) alert of each key and cover
/// `[anchor, anchor + window)`; an alert outside the open group's window starts
/// a new group. The survivor of a group is the highest severity alert, the
/// most recent on ties. Output is ordered by `created_at`.
pub fn deduplicate_alerts(alerts: &[AlertEvent], window_ms: u64) -> Vec<AlertEvent> {
    let window = Duration::milliseconds(window_ms.min(MAX_WINDOW_MS) as i64);

    let mut ordered: Vec<&AlertEvent> = alerts.iter().collect();
    ordered.sort_by_key(|a| a.created_at);

    let mut open: HashMap<String, OpenGroup> = HashMap::new();
    let mut survivors: Vec<AlertEvent> = Vec::new();

    for alert in ordered {
        let key = calculate_dedupe_key(alert);
        let joins_open_group = open
            .get(&key)
            .is_some_and(|group| alert.created_at - group.anchor < window);

        if joins_open_group {
            if let Some(group) = open.get_mut(&key) {
                if prefer(alert, &group.representative) {
                    group.representative = alert.clone();
                }
            }
            continue;
        }

        let fresh = OpenGroup {
            anchor: alert.created_at,
            representative: alert.clone(),
        };
        if let Some(closed) = open.insert(key, fresh) {
            survivors.push(closed.representative);
        }
    }

    survivors.extend(open.into_values().map(|g| g.representative));
    survivors.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    survivors
}

// Higher severity wins; equal severity prefers the more recent alert
fn prefer(candidate: &AlertEvent, current: &AlertEvent) -> bool {
    candidate.severity > current.severity
        || (candidate.severity == current.severity && candidate.created_at >= current.created_at)
}

/// Annotate `governance.cap_exceeded` per severity and local calendar day.
///
/// Within each `(severity, day)` group alerts are ranked by `created_at`; the
/// first `daily_cap` are within limits, the rest exceed. Input order is kept and
/// no alert is removed.
pub fn enforce_cap_limits(
    alerts: &[AlertEvent],
    settings: &AlertSettings,
    offset: FixedOffset,
) -> Vec<AlertEvent> {
    let mut annotated: Vec<AlertEvent> = alerts.to_vec();

    let mut groups: BTreeMap<(Severity, NaiveDate), Vec<usize>> = BTreeMap::new();
    for (idx, alert) in annotated.iter().enumerate() {
        let day = offset.from_utc_datetime(&alert.created_at.naive_utc()).date_naive();
        groups.entry((alert.severity, day)).or_default().push(idx);
    }

    for ((severity, _day), mut indices) in groups {
        indices.sort_by_key(|&i| annotated[i].created_at);
        let cap = daily_cap(settings, severity);
        for (rank, idx) in indices.into_iter().enumerate() {
            annotated[idx].governance.cap_exceeded = (rank as u64) >= cap;
        }
    }

    annotated
}
