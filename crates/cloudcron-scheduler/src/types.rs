use chrono::NaiveDateTime;
use uuid::Uuid;

use crate::clock::truncate_to_second;
use crate::cron::CronExpression;
use crate::error::CronError;

/// A crontab row: a command dispatched as a worker whenever its schedule is due.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    /// UUID v4 string, primary key.
    pub id: String,
    /// Human-readable label.
    pub name: String,
    /// Worker command, e.g. `symfony`.
    pub command: String,
    /// Parameter string handed to the worker as is.
    pub parameters: String,
    pub expression: CronExpression,
    /// `None` until the entry is dispatched for the first time.
    pub last_run_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    /// Not yet persisted.
    pub is_new: bool,
    /// Removed from the store.
    pub is_deleted: bool,
}

impl ScheduleEntry {
    /// Build a new, not yet persisted entry. The schedule is validated here.
    pub fn new(
        name: &str,
        command: &str,
        parameters: &str,
        schedule: &str,
        now: NaiveDateTime,
    ) -> Result<Self, CronError> {
        let expression = CronExpression::parse(schedule)?;
        let now = truncate_to_second(now);
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            command: command.to_string(),
            parameters: parameters.to_string(),
            expression,
            last_run_at: None,
            created_at: now,
            updated_at: now,
            is_new: true,
            is_deleted: false,
        })
    }

    /// Replace the schedule. The old one is kept if the new one does not parse.
    pub fn set_schedule(&mut self, schedule: &str) -> Result<(), CronError> {
        self.expression = CronExpression::parse(schedule)?;
        Ok(())
    }

    /// Never-run entries are always due.
    pub fn is_due(&self, now: NaiveDateTime) -> Result<bool, CronError> {
        match self.last_run_at {
            None => Ok(true),
            Some(last) => self.expression.is_due(last, now),
        }
    }

    pub fn mark_run(&mut self, at: NaiveDateTime) {
        self.last_run_at = Some(truncate_to_second(at));
    }

    /// Whether this change requires a running scheduler to reload its snapshot.
    ///
    /// Inserts and deletes always do. Updates only when the schedule, command
    /// or parameters differ from `previous`; bookkeeping such as `last_run_at`
    /// does not.
    pub fn affects_schedule(&self, previous: Option<&ScheduleEntry>) -> bool {
        if self.is_new || self.is_deleted {
            return true;
        }
        match previous {
            None => true,
            Some(prev) => {
                prev.expression != self.expression
                    || prev.command != self.command
                    || prev.parameters != self.parameters
            }
        }
    }
}
