use serde::{Deserialize, Serialize};
use std::fmt;

/// Declarative trigger attached to a task at registration time.
///
/// This is the unvalidated form accepted from config files and adapters;
/// `cadence-scheduler` turns it into a validated `Trigger` or rejects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerSpec {
    /// 6-field cron expression (seconds resolution, UTC).
    Cron { expression: String },

    /// Fire every `period_millis`, measured from the previous *scheduled* time.
    FixedRate {
        period_millis: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        initial_delay_millis: Option<i64>,
    },

    /// Fire `period_millis` after the previous execution *finished*.
    FixedDelay {
        period_millis: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        initial_delay_millis: Option<i64>,
    },
}

impl TriggerSpec {
    pub fn cron(expression: impl Into<String>) -> Self {
        TriggerSpec::Cron {
            expression: expression.into(),
        }
    }

    pub fn fixed_rate(period_millis: i64) -> Self {
        TriggerSpec::FixedRate {
            period_millis,
            initial_delay_millis: None,
        }
    }

    pub fn fixed_delay(period_millis: i64) -> Self {
        TriggerSpec::FixedDelay {
            period_millis,
            initial_delay_millis: None,
        }
    }

    /// Label used in log lines ("CronTask[id] executed").
    pub fn kind_label(&self) -> &'static str {
        match self {
            TriggerSpec::Cron { .. } => "Cron",
            TriggerSpec::FixedRate { .. } => "FixedRate",
            TriggerSpec::FixedDelay { .. } => "FixedDelay",
        }
    }
}

impl fmt::Display for TriggerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerSpec::Cron { expression } => write!(f, "cron({expression})"),
            TriggerSpec::FixedRate { period_millis, .. } => {
                write!(f, "fixed-rate({period_millis}ms)")
            }
            TriggerSpec::FixedDelay { period_millis, .. } => {
                write!(f, "fixed-delay({period_millis}ms)")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_json_shape() {
        let spec = TriggerSpec::fixed_rate(5000);
        let json = serde_json::to_string(&spec).unwrap();
        assert_eq!(json, r#"{"kind":"fixed_rate","period_millis":5000}"#);

        let back: TriggerSpec =
            serde_json::from_str(r#"{"kind":"cron","expression":"0 * * * * *"}"#).unwrap();
        assert_eq!(back, TriggerSpec::cron("0 * * * * *"));
    }

    #[test]
    fn display_names_the_kind() {
        assert_eq!(TriggerSpec::fixed_delay(250).to_string(), "fixed-delay(250ms)");
        assert_eq!(TriggerSpec::cron("@hourly").kind_label(), "Cron");
    }
}
