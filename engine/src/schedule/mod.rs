// Trigger calculation for cron and interval schedules

pub mod cron;

pub use self::cron::{CronExpression, CronSpec};

use crate::errors::ScheduleError;
use crate::models::{Schedule, Task};
use chrono::{DateTime, Duration, Utc};

/// ScheduleTrigger computes fire times for a schedule
pub trait ScheduleTrigger {
    /// Minimum fire time strictly after `after`, or None if the schedule never fires again
    fn next_fire_time(&self, after: DateTime<Utc>)
        -> Result<Option<DateTime<Utc>>, ScheduleError>;

    /// Next fire time after the slot at `anchor` fired at `now`.
    /// Slots missed while the engine was down or the task was paused are
    /// collapsed: the result is always after `now`, and interval schedules
    /// keep their phase relative to `anchor`.
    fn next_fire_time_from(
        &self,
        anchor: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, ScheduleError>;

    /// Reject malformed or never-firing schedules
    fn validate(&self) -> Result<(), ScheduleError>;
}

impl ScheduleTrigger for Schedule {
    fn next_fire_time(
        &self,
        after: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, ScheduleError> {
        match self {
            Schedule::Cron {
                expression,
                timezone,
            } => Ok(CronSpec::parse(expression)?.next_after(after, *timezone)),
            Schedule::Interval { interval_seconds } => {
                Ok(Some(advance(after, interval(*interval_seconds)?)?))
            }
        }
    }

    fn next_fire_time_from(
        &self,
        anchor: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, ScheduleError> {
        match self {
            Schedule::Cron { .. } => self.next_fire_time(anchor.max(now)),
            Schedule::Interval { interval_seconds } => {
                let step = interval(*interval_seconds)?;
                let next = advance(anchor, step)?;
                if next > now {
                    return Ok(Some(next));
                }
                let step_ms = step.num_milliseconds();
                let slots = (now - anchor).num_milliseconds() / step_ms + 1;
                let offset = slots
                    .checked_mul(step_ms)
                    .and_then(Duration::try_milliseconds)
                    .ok_or_else(|| out_of_range(*interval_seconds))?;
                Ok(Some(advance(anchor, offset)?))
            }
        }
    }

    fn validate(&self) -> Result<(), ScheduleError> {
        match self {
            Schedule::Cron {
                expression,
                timezone,
            } => {
                let spec = CronSpec::parse(expression)?;
                if spec.next_after(Utc::now(), *timezone).is_none() {
                    return Err(ScheduleError::InvalidCronExpression {
                        expression: expression.clone(),
                        reason: "expression never fires".to_string(),
                    });
                }
                Ok(())
            }
            Schedule::Interval { interval_seconds } => {
                advance(Utc::now(), interval(*interval_seconds)?).map(|_| ())
            }
        }
    }
}

fn interval(seconds: u64) -> Result<Duration, ScheduleError> {
    if seconds == 0 {
        return Err(ScheduleError::InvalidConfiguration(
            "interval_seconds must be at least 1".to_string(),
        ));
    }
    i64::try_from(seconds)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| out_of_range(seconds))
}

fn advance(from: DateTime<Utc>, by: Duration) -> Result<DateTime<Utc>, ScheduleError> {
    from.checked_add_signed(by).ok_or_else(|| {
        ScheduleError::InvalidConfiguration(format!(
            "next fire time after {} is out of range",
            from.to_rfc3339()
        ))
    })
}

fn out_of_range(seconds: u64) -> ScheduleError {
    ScheduleError::InvalidConfiguration(format!("interval_seconds {} is too large", seconds))
}

/// Capability of things that fire on a schedule
pub trait Schedulable {
    /// The active schedule, if this item fires on its own at all
    fn active_schedule(&self) -> Option<&Schedule>;

    fn next_fire_time(&self, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, ScheduleError> {
        match self.active_schedule() {
            Some(schedule) => schedule.next_fire_time(after),
            None => Ok(None),
        }
    }

    fn next_fire_time_from(
        &self,
        anchor: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, ScheduleError> {
        match self.active_schedule() {
            Some(schedule) => schedule.next_fire_time_from(anchor, now),
            None => Ok(None),
        }
    }
}

impl Schedulable for Task {
    fn active_schedule(&self) -> Option<&Schedule> {
        if self.task_type.is_schedulable() {
            self.schedule.as_ref()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskType;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_interval_next_fire() {
        let schedule = Schedule::interval(90);
        let after = at("2025-01-01T10:00:00Z");
        assert_eq!(
            schedule.next_fire_time(after).unwrap(),
            Some(at("2025-01-01T10:01:30Z"))
        );
    }

    #[test]
    fn test_interval_roll_forward_keeps_phase() {
        let schedule = Schedule::interval(60);
        let anchor = at("2025-01-01T10:00:00Z");

        let on_time = schedule
            .next_fire_time_from(anchor, at("2025-01-01T10:00:00.500Z"))
            .unwrap();
        assert_eq!(on_time, Some(at("2025-01-01T10:01:00Z")));

        let late = schedule
            .next_fire_time_from(anchor, at("2025-01-01T10:05:30Z"))
            .unwrap();
        assert_eq!(late, Some(at("2025-01-01T10:06:00Z")));

        let exactly_on_slot = schedule
            .next_fire_time_from(anchor, at("2025-01-01T10:03:00Z"))
            .unwrap();
        assert_eq!(exactly_on_slot, Some(at("2025-01-01T10:04:00Z")));
    }

    #[test]
    fn test_cron_roll_forward_skips_missed_slots() {
        let schedule = Schedule::cron("0 * * * *");
        let next = schedule
            .next_fire_time_from(at("2025-01-01T03:00:00Z"), at("2025-01-01T07:20:00Z"))
            .unwrap();
        assert_eq!(next, Some(at("2025-01-01T08:00:00Z")));
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(Schedule::interval(0).validate().is_err());
        assert!(Schedule::interval(1).validate().is_ok());
    }

    #[test]
    fn test_interval_past_calendar_range_is_an_error() {
        let huge = Schedule::interval(10_000_000_000_000);
        assert!(matches!(
            huge.validate(),
            Err(ScheduleError::InvalidConfiguration(_))
        ));
        assert!(huge.next_fire_time(Utc::now()).is_err());
        assert!(huge
            .next_fire_time_from(at("2025-01-01T00:00:00Z"), Utc::now())
            .is_err());

        // Valid step, but the next slot lands past the last representable instant
        let daily = Schedule::interval(86_400);
        assert!(daily.next_fire_time(DateTime::<Utc>::MAX_UTC).is_err());
    }

    #[test]
    fn test_never_firing_cron_rejected() {
        assert!(Schedule::cron("0 0 30 2 *").validate().is_err());
        assert!(Schedule::cron("0 0 * * *").validate().is_ok());
        assert!(Schedule::cron("not a cron").validate().is_err());
    }

    #[test]
    fn test_manual_task_never_fires() {
        let mut task = Task::new("manual", TaskType::Manual);
        task.schedule = Some(Schedule::interval(10));
        assert_eq!(task.next_fire_time(Utc::now()).unwrap(), None);

        let mut scheduled = Task::new("common", TaskType::Common);
        scheduled.schedule = Some(Schedule::interval(10));
        assert!(scheduled.next_fire_time(Utc::now()).unwrap().is_some());
    }
}
