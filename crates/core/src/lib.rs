pub mod alert;
pub mod alert_rule;
pub mod attempt;
pub mod channel;
pub mod confidence;
pub mod deadletter;
pub mod delivery;
pub mod device;
pub mod envelope;
pub mod error;
pub mod escalation;
pub mod ids;
pub mod job;
pub mod metrics;
pub mod oncall;
pub mod quarantine;
pub mod routing_rule;
pub mod telemetry;

pub use alert::{
    Alert, AlertDetails, AlertEvent, AlertLifecycleEvent, AlertStatus, AlertType, AlertUpsert,
    heartbeat_fingerprint,
};
pub use alert_rule::{AlertRule, ThresholdOperator};
pub use attempt::NotificationAttempt;
pub use channel::{ChannelConfig, MqttQos, NotificationChannel};
pub use confidence::Confidence;
pub use deadletter::DeadLetter;
pub use delivery::DeliveryOutcome;
pub use device::{Device, DeviceCredential, DeviceStatus, GeoPoint};
pub use envelope::{Envelope, EnvelopeVersion, MessageType, MetricValue, RejectionReason};
pub use error::ConstructionError;
pub use escalation::{EscalationLevel, EscalationPolicy, NotificationTarget};
pub use ids::{
    AlertId, ChannelId, DeviceId, JobId, PolicyId, RoutingRuleId, RuleId, ScheduleId, SiteId,
    TenantId, TokenId,
};
pub use job::{JobStatus, NotificationJob};
pub use metrics::MetricsRegistry;
pub use oncall::{OnCallLayer, OnCallOverride, OnCallSchedule, RotationCadence};
pub use quarantine::QuarantineEvent;
pub use routing_rule::NotificationRoutingRule;
pub use telemetry::TelemetryRecord;
