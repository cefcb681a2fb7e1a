//! When a scan config is due to start a scan.
//!
//! Every poll looks at a [`ScheduleWindow`] centred on the current time. A
//! config whose operation time falls inside the window is due, one whose
//! operation time already slid behind it is either overdue (recurring) or
//! spent (one-shot).

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use cron::Schedule;

use scanwarden_model::ScanConfig;

use crate::error::{OrchestratorError, Result};

/// Parses a cron line into a schedule.
///
/// Five fields are classic cron (`min hour dom month dow`), six append a
/// year and seven lead with seconds. `@daily` style macros pass through.
/// Numeric days of week count from 1 = Sunday, names (`MON-FRI`) read the
/// same in every dialect.
pub fn parse_cron_line(line: &str) -> Result<Schedule> {
    let line = line.trim();
    let normalized = match line.split_whitespace().count() {
        5 | 6 if !line.starts_with('@') => format!("0 {line}"),
        _ => line.to_owned(),
    };
    Schedule::from_str(&normalized)
        .map_err(|err| OrchestratorError::InvalidEntity(format!("invalid cron line {line:?}: {err}")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl ScheduleWindow {
    /// A window of `size` with `now` in its middle.
    pub fn new(now: DateTime<Utc>, size: Duration) -> Self {
        let half = TimeDelta::from_std(size).unwrap_or_else(|_| TimeDelta::zero()) / 2;
        Self {
            start: now - half,
            end: now + half,
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Both ends are inclusive.
    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        self.start <= time && time <= self.end
    }

    /// True when the whole window lies after `time`.
    pub fn is_after(&self, time: DateTime<Utc>) -> bool {
        self.start > time
    }

    /// The window of the same size that starts where this one ends.
    pub fn next(&self) -> Self {
        Self {
            start: self.end,
            end: self.end + (self.end - self.start),
        }
    }
}

impl fmt::Display for ScheduleWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "start: {}, end: {}",
            self.start.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.end.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }
}

/// A planned start, recurring when it carries a cron schedule with more than
/// one occurrence.
#[derive(Debug, Clone)]
pub struct OperationTime {
    time: DateTime<Utc>,
    cron: Option<Schedule>,
}

impl OperationTime {
    /// A cron schedule naming a single point in time overrides `time`. A
    /// missing time sits at the epoch, i.e. in the past.
    pub fn new(time: Option<DateTime<Utc>>, cron: Option<Schedule>) -> Self {
        let time = cron
            .as_ref()
            .and_then(point_in_time)
            .or(time)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        Self { time, cron }
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    /// The next cron occurrence after this one, or this one when there is none.
    pub fn next(&self) -> Self {
        match self
            .cron
            .as_ref()
            .and_then(|cron| cron.after(&self.time).next())
        {
            Some(time) => self.at(time),
            None => self.clone(),
        }
    }

    /// The first occurrence at or after `time`.
    ///
    /// Without a cron schedule, or when this one is already at or after
    /// `time`, this is returned unchanged. A schedule that runs out before
    /// `time` stops at its last occurrence.
    pub fn next_after(&self, time: DateTime<Utc>) -> Self {
        let Some(cron) = &self.cron else {
            return self.clone();
        };
        if self.time >= time {
            return self.clone();
        }
        if let Some(next) = cron.after(&(time - TimeDelta::nanoseconds(1))).next() {
            return self.at(next);
        }
        match cron.after(&time).next_back() {
            Some(last) if last > self.time => self.at(last),
            _ => self.clone(),
        }
    }

    pub fn is_recurring(&self) -> bool {
        self.next().time != self.time
    }

    fn at(&self, time: DateTime<Utc>) -> Self {
        Self {
            time,
            cron: self.cron.clone(),
        }
    }
}

impl fmt::Display for OperationTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.time.to_rfc3339_opts(SecondsFormat::Secs, true))
    }
}

/// The only occurrence of a cron schedule that has at most one. A schedule
/// with none resolves to the epoch.
fn point_in_time(cron: &Schedule) -> Option<DateTime<Utc>> {
    let mut upcoming = cron.after(&DateTime::<Utc>::UNIX_EPOCH);
    match (upcoming.next(), upcoming.next()) {
        (None, _) => Some(DateTime::<Utc>::UNIX_EPOCH),
        (Some(only), None) => Some(only),
        (Some(_), Some(_)) => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleState {
    Disabled,
    /// No schedule, or a one-shot operation time already passed.
    Unscheduled,
    NotDue,
    Due,
    /// A recurring operation time fell behind the window and must be moved
    /// forward without starting a scan.
    Overdue,
}

impl fmt::Display for ScheduleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScheduleState::Disabled => "Disabled",
            ScheduleState::Unscheduled => "Unscheduled",
            ScheduleState::NotDue => "NotDue",
            ScheduleState::Due => "Due",
            ScheduleState::Overdue => "Overdue",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct ScanConfigSchedule {
    pub state: ScheduleState,
    pub operation_time: Option<OperationTime>,
    pub window: ScheduleWindow,
}

impl ScanConfigSchedule {
    pub fn new(config: &ScanConfig, window: ScheduleWindow) -> Result<Self> {
        let unresolved = |state| Self {
            state,
            operation_time: None,
            window,
        };

        if config.disabled {
            return Ok(unresolved(ScheduleState::Disabled));
        }
        let Some(scheduled) = config.scheduled.as_ref().filter(|s| !s.is_empty()) else {
            return Ok(unresolved(ScheduleState::Unscheduled));
        };

        let cron = scheduled
            .cron_line
            .as_deref()
            .map(parse_cron_line)
            .transpose()?;
        let operation_time = OperationTime::new(scheduled.operation_time, cron);

        let state = if window.contains(operation_time.time()) {
            ScheduleState::Due
        } else if window.is_after(operation_time.time()) {
            if operation_time.is_recurring() {
                ScheduleState::Overdue
            } else {
                ScheduleState::Unscheduled
            }
        } else {
            ScheduleState::NotDue
        };

        Ok(Self {
            state,
            operation_time: Some(operation_time),
            window,
        })
    }
}

impl fmt::Display for ScanConfigSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "state: {}, window: [{}]", self.state, self.window)?;
        if let Some(operation_time) = &self.operation_time {
            write!(f, ", operation time: {operation_time}")?;
        }
        Ok(())
    }
}
