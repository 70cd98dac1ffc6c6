use chrono::{DateTime, Duration, Utc};

use cadence_core::TriggerSpec;

use crate::cron::CronSchedule;
use crate::error::{Result, SchedulerError};

/// Upper bound for periods and initial delays (100 years). Keeps every
/// next-fire computation inside chrono's representable range.
pub const MAX_PERIOD_MILLIS: i64 = 100 * 365 * 24 * 60 * 60 * 1000;

/// A validated trigger. Immutable once attached to a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Cron(CronSchedule),
    FixedRate {
        period: Duration,
        initial_delay: Duration,
    },
    FixedDelay {
        period: Duration,
        initial_delay: Duration,
    },
}

impl Trigger {
    /// Validate a declarative spec. Invalid input never reaches the registry.
    pub fn from_spec(spec: &TriggerSpec) -> Result<Self> {
        match spec {
            TriggerSpec::Cron { expression } => {
                let schedule = CronSchedule::parse(expression)?;
                // Parses but can never fire, e.g. "0 0 0 30 2 *".
                if schedule.next_after(DateTime::UNIX_EPOCH).is_none() {
                    return Err(SchedulerError::InvalidExpression {
                        expression: expression.clone(),
                        reason: "expression never matches a calendar date".to_string(),
                    });
                }
                Ok(Trigger::Cron(schedule))
            }
            TriggerSpec::FixedRate {
                period_millis,
                initial_delay_millis,
            } => Ok(Trigger::FixedRate {
                period: positive_millis(*period_millis)?,
                initial_delay: non_negative_millis(initial_delay_millis.unwrap_or(0))?,
            }),
            TriggerSpec::FixedDelay {
                period_millis,
                initial_delay_millis,
            } => Ok(Trigger::FixedDelay {
                period: positive_millis(*period_millis)?,
                initial_delay: non_negative_millis(initial_delay_millis.unwrap_or(0))?,
            }),
        }
    }

    /// When a freshly registered task fires for the first time.
    pub fn first_fire_time(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Cron(schedule) => schedule.next_after(now),
            Trigger::FixedRate { initial_delay, .. }
            | Trigger::FixedDelay { initial_delay, .. } => now.checked_add_signed(*initial_delay),
        }
    }

    /// Next fire instant after a firing that was scheduled for `previous`.
    ///
    /// `completed_at` is only consulted by fixed-delay triggers. The result is
    /// never earlier than the latest fixed-rate grid point at or before `now`,
    /// so a late driver fires once instead of replaying a backlog.
    pub fn next_fire_time(
        &self,
        previous: DateTime<Utc>,
        completed_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Cron(schedule) => schedule.next_after(previous.max(now)),
            Trigger::FixedRate { period, .. } => {
                let next = previous.checked_add_signed(*period)?;
                if next >= now {
                    return Some(next);
                }
                // Skip missed ticks but stay on the original grid.
                let period_ms = period.num_milliseconds();
                let elapsed_ms = (now - previous).num_milliseconds();
                let ticks = (elapsed_ms / period_ms).max(1);
                previous.checked_add_signed(Duration::milliseconds(period_ms.checked_mul(ticks)?))
            }
            Trigger::FixedDelay { period, .. } => {
                completed_at.unwrap_or(now).checked_add_signed(*period)
            }
        }
    }

    pub fn is_fixed_delay(&self) -> bool {
        matches!(self, Trigger::FixedDelay { .. })
    }

    /// Short human-readable description for listings and logs.
    pub fn describe(&self) -> String {
        match self {
            Trigger::Cron(schedule) => format!("cron({schedule})"),
            Trigger::FixedRate { period, .. } => {
                format!("fixed-rate({}ms)", period.num_milliseconds())
            }
            Trigger::FixedDelay { period, .. } => {
                format!("fixed-delay({}ms)", period.num_milliseconds())
            }
        }
    }
}

fn positive_millis(period_millis: i64) -> Result<Duration> {
    if period_millis <= 0 || period_millis > MAX_PERIOD_MILLIS {
        return Err(SchedulerError::InvalidPeriod { period_millis });
    }
    Ok(Duration::milliseconds(period_millis))
}

fn non_negative_millis(millis: i64) -> Result<Duration> {
    if !(0..=MAX_PERIOD_MILLIS).contains(&millis) {
        return Err(SchedulerError::InvalidPeriod {
            period_millis: millis,
        });
    }
    Ok(Duration::milliseconds(millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap()
    }

    fn ms(n: i64) -> Duration {
        Duration::milliseconds(n)
    }

    #[test]
    fn cron_first_fire_from_registration_time() {
        let trigger = Trigger::from_spec(&TriggerSpec::cron("0 * * * * *")).unwrap();
        let registered = noon() + ms(500);
        assert_eq!(
            trigger.first_fire_time(registered).unwrap(),
            Utc.with_ymd_and_hms(2026, 3, 14, 12, 1, 0).unwrap()
        );
    }

    #[test]
    fn cron_does_not_replay_missed_ticks() {
        let trigger = Trigger::from_spec(&TriggerSpec::cron("0 * * * * *")).unwrap();
        let previous = noon();
        // Driver woke up three and a half minutes late.
        let now = noon() + Duration::seconds(210);
        assert_eq!(
            trigger.next_fire_time(previous, None, now).unwrap(),
            noon() + Duration::seconds(240)
        );
    }

    #[test]
    fn fixed_rate_first_fire_is_immediate_by_default() {
        let trigger = Trigger::from_spec(&TriggerSpec::fixed_rate(5000)).unwrap();
        assert_eq!(trigger.first_fire_time(noon()).unwrap(), noon());

        let delayed = Trigger::from_spec(&TriggerSpec::FixedRate {
            period_millis: 5000,
            initial_delay_millis: Some(1500),
        })
        .unwrap();
        assert_eq!(delayed.first_fire_time(noon()).unwrap(), noon() + ms(1500));
    }

    #[test]
    fn fixed_rate_measures_from_scheduled_time() {
        let trigger = Trigger::from_spec(&TriggerSpec::fixed_rate(1000)).unwrap();
        // Popped 30ms late: the next tick still lands on the grid.
        let next = trigger.next_fire_time(noon(), None, noon() + ms(30)).unwrap();
        assert_eq!(next, noon() + ms(1000));
    }

    #[test]
    fn fixed_rate_overrun_fires_once_on_the_grid() {
        let trigger = Trigger::from_spec(&TriggerSpec::fixed_rate(1000)).unwrap();
        let now = noon() + ms(3500);
        let next = trigger.next_fire_time(noon(), None, now).unwrap();
        // Latest grid point at or before now: due immediately, no backlog.
        assert_eq!(next, noon() + ms(3000));
        assert!(next <= now);
        let after = trigger.next_fire_time(next, None, now).unwrap();
        assert_eq!(after, noon() + ms(4000));
    }

    #[test]
    fn fixed_delay_measures_from_completion() {
        let trigger = Trigger::from_spec(&TriggerSpec::fixed_delay(2000)).unwrap();
        let completed = noon() + ms(750);
        let next = trigger
            .next_fire_time(noon(), Some(completed), completed)
            .unwrap();
        assert_eq!(next, completed + ms(2000));
    }

    #[test]
    fn non_positive_periods_are_rejected() {
        for period in [0, -1, -5000] {
            let err = Trigger::from_spec(&TriggerSpec::fixed_rate(period)).unwrap_err();
            assert_eq!(err, SchedulerError::InvalidPeriod { period_millis: period });
            let err = Trigger::from_spec(&TriggerSpec::fixed_delay(period)).unwrap_err();
            assert_eq!(err.code(), "INVALID_PERIOD");
        }
        let err = Trigger::from_spec(&TriggerSpec::FixedRate {
            period_millis: 10,
            initial_delay_millis: Some(-1),
        })
        .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn periods_beyond_a_century_are_rejected() {
        for period in [MAX_PERIOD_MILLIS + 1, i64::MAX] {
            let err = Trigger::from_spec(&TriggerSpec::fixed_rate(period)).unwrap_err();
            assert_eq!(err, SchedulerError::InvalidPeriod { period_millis: period });
            let err = Trigger::from_spec(&TriggerSpec::fixed_delay(period)).unwrap_err();
            assert_eq!(err.code(), "INVALID_PERIOD");
        }
        let err = Trigger::from_spec(&TriggerSpec::FixedDelay {
            period_millis: 10,
            initial_delay_millis: Some(i64::MAX),
        })
        .unwrap_err();
        assert!(err.is_validation());

        // The largest accepted period still yields a follow-up firing.
        let trigger = Trigger::from_spec(&TriggerSpec::fixed_rate(MAX_PERIOD_MILLIS)).unwrap();
        let first = trigger.first_fire_time(noon()).unwrap();
        assert!(trigger.next_fire_time(first, None, first).is_some());
    }

    #[test]
    fn invalid_cron_is_rejected() {
        let err = Trigger::from_spec(&TriggerSpec::cron("not a cron")).unwrap_err();
        assert_eq!(err.code(), "INVALID_EXPRESSION");
        let err = Trigger::from_spec(&TriggerSpec::cron("0 0 0 30 2 *")).unwrap_err();
        assert_eq!(err.code(), "INVALID_EXPRESSION");
    }

    #[test]
    fn describe_is_compact() {
        let trigger = Trigger::from_spec(&TriggerSpec::fixed_rate(250)).unwrap();
        assert_eq!(trigger.describe(), "fixed-rate(250ms)");
        let trigger = Trigger::from_spec(&TriggerSpec::cron("@daily")).unwrap();
        assert_eq!(trigger.describe(), "cron(@daily)");
    }
}
