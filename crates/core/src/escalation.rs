use serde::{Deserialize, Serialize};

use crate::ids::{ChannelId, PolicyId, ScheduleId};

/// Where an escalation level sends its notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationTarget {
    Email { address: String },
    Webhook { channel_id: ChannelId },
    OnCallSchedule { schedule_id: ScheduleId },
}

/// One level of an escalation policy. Levels are ordered 1..5.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationLevel {
    pub level: u8,
    pub delay_minutes: u32,
    pub targets: Vec<NotificationTarget>,
}

/// An ordered escalation policy referenced by an [`crate::alert_rule::AlertRule`].
///
/// Reference direction is one-way (rule -> policy); a policy does not know
/// which rules use it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationPolicy {
    pub policy_id: PolicyId,
    pub name: String,
    pub levels: Vec<EscalationLevel>,
}

impl EscalationPolicy {
    /// The level configuration for advancing from `current_level` to the
    /// next one, if any remains.
    #[must_use]
    pub fn next_level(&self, current_level: u32) -> Option<&EscalationLevel> {
        self.levels
            .iter()
            .find(|l| u32::from(l.level) == current_level + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> EscalationPolicy {
        EscalationPolicy {
            policy_id: "p1".into(),
            name: "standard".into(),
            levels: vec![
                EscalationLevel {
                    level: 1,
                    delay_minutes: 0,
                    targets: vec![NotificationTarget::Email {
                        address: "oncall@example.com".into(),
                    }],
                },
                EscalationLevel {
                    level: 2,
                    delay_minutes: 15,
                    targets: vec![NotificationTarget::OnCallSchedule {
                        schedule_id: "sched-1".into(),
                    }],
                },
            ],
        }
    }

    #[test]
    fn next_level_advances() {
        let p = policy();
        let next = p.next_level(0).unwrap();
        assert_eq!(next.level, 1);
        let next2 = p.next_level(1).unwrap();
        assert_eq!(next2.level, 2);
    }

    #[test]
    fn next_level_none_past_end() {
        let p = policy();
        assert!(p.next_level(2).is_none());
    }
}
