// 🩺 Health events - vaccinations, deworming, farrier, dentist, vet visits

use chrono::{Duration, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{LedgerError, LedgerResult};

// ============================================================================
// ENUMS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthCategory {
    Vaccination,
    Deworming,
    Farrier,
    Dental,
    Osteopathy,
    VetVisit,
    Other,
}

impl HealthCategory {
    pub fn label(&self) -> &'static str {
        match self {
            HealthCategory::Vaccination => "Vaccination",
            HealthCategory::Deworming => "Deworming",
            HealthCategory::Farrier => "Farrier",
            HealthCategory::Dental => "Dental care",
            HealthCategory::Osteopathy => "Osteopathy",
            HealthCategory::VetVisit => "Vet visit",
            HealthCategory::Other => "Other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Planned,
    Done,
    Canceled,
    Overdue,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Planned => "PLANNED",
            HealthStatus::Done => "DONE",
            HealthStatus::Canceled => "CANCELED",
            HealthStatus::Overdue => "OVERDUE",
        }
    }

    /// Still waiting to happen
    pub fn is_open(&self) -> bool {
        matches!(self, HealthStatus::Planned | HealthStatus::Overdue)
    }
}

/// Shared by health events and recommendation cards
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecurrenceUnit {
    Days,
    Weeks,
    Months,
}

/// "Every N days/weeks/months" after completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthRecurrence {
    pub every: u32,
    pub unit: RecurrenceUnit,
}

impl HealthRecurrence {
    pub fn new(every: u32, unit: RecurrenceUnit) -> Self {
        HealthRecurrence { every, unit }
    }

    pub fn next_after(&self, date: NaiveDate) -> Option<NaiveDate> {
        let every = self.every.max(1);
        match self.unit {
            RecurrenceUnit::Days => date.checked_add_signed(Duration::days(every as i64)),
            RecurrenceUnit::Weeks => date.checked_add_signed(Duration::weeks(every as i64)),
            RecurrenceUnit::Months => date.checked_add_months(Months::new(every)),
        }
    }
}

// ============================================================================
// HEALTH EVENT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthEvent {
    pub id: String,

    pub horse_id: String,

    pub category: HealthCategory,

    pub title: String,

    pub scheduled_date: NaiveDate,

    #[serde(default)]
    pub completed_date: Option<NaiveDate>,

    pub status: HealthStatus,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default)]
    pub recurrence: Option<HealthRecurrence>,

    #[serde(default)]
    pub practitioner: Option<String>,

    #[serde(default)]
    pub cost: Option<f64>,

    #[serde(default)]
    pub notes: Option<String>,
}

impl HealthEvent {
    pub fn planned(
        horse_id: impl Into<String>,
        category: HealthCategory,
        title: impl Into<String>,
        scheduled_date: NaiveDate,
    ) -> Self {
        HealthEvent {
            id: uuid::Uuid::new_v4().to_string(),
            horse_id: horse_id.into(),
            category,
            title: title.into(),
            scheduled_date,
            completed_date: None,
            status: HealthStatus::Planned,
            priority: Priority::Medium,
            recurrence: None,
            practitioner: None,
            cost: None,
            notes: None,
        }
    }

    /// Event recorded after the fact
    pub fn done(
        horse_id: impl Into<String>,
        category: HealthCategory,
        title: impl Into<String>,
        date: NaiveDate,
    ) -> Self {
        let mut event = Self::planned(horse_id, category, title, date);
        event.status = HealthStatus::Done;
        event.completed_date = Some(date);
        event
    }

    pub fn with_recurrence(mut self, recurrence: HealthRecurrence) -> Self {
        self.recurrence = Some(recurrence);
        self
    }

    fn transition_error(&self, to: HealthStatus) -> LedgerError {
        LedgerError::InvalidTransition {
            entity: "health event",
            from: self.status.as_str().to_string(),
            to: to.as_str().to_string(),
        }
    }

    /// The date that counts for history: completion if any, else schedule
    pub fn effective_date(&self) -> NaiveDate {
        self.completed_date.unwrap_or(self.scheduled_date)
    }

    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.status.is_open() && self.scheduled_date < today
    }

    /// Mark as done. Recurring events return the next planned occurrence.
    pub fn complete(&mut self, on: NaiveDate) -> LedgerResult<Option<HealthEvent>> {
        if !self.status.is_open() {
            return Err(self.transition_error(HealthStatus::Done));
        }

        self.status = HealthStatus::Done;
        self.completed_date = Some(on);

        let next = self.recurrence.and_then(|r| r.next_after(on)).map(|date| {
            let mut next = HealthEvent::planned(self.horse_id.clone(), self.category, self.title.clone(), date);
            next.priority = self.priority;
            next.recurrence = self.recurrence;
            next.practitioner = self.practitioner.clone();
            next
        });

        if let Some(next) = &next {
            info!(horse = %self.horse_id, next = %next.scheduled_date, "scheduled next {}", self.category.label());
        }

        Ok(next)
    }

    pub fn cancel(&mut self) -> LedgerResult<()> {
        if !self.status.is_open() {
            return Err(self.transition_error(HealthStatus::Canceled));
        }
        self.status = HealthStatus::Canceled;
        Ok(())
    }

    pub fn reschedule(&mut self, date: NaiveDate) -> LedgerResult<()> {
        if !self.status.is_open() {
            return Err(self.transition_error(HealthStatus::Planned));
        }
        self.scheduled_date = date;
        self.status = HealthStatus::Planned;
        Ok(())
    }
}

// ============================================================================
// QUERIES
// ============================================================================

/// Flag planned events whose date has passed. Returns how many changed.
pub fn refresh_overdue(events: &mut [HealthEvent], today: NaiveDate) -> usize {
    let mut changed = 0;
    for event in events
        .iter_mut()
        .filter(|e| e.status == HealthStatus::Planned && e.scheduled_date < today)
    {
        event.status = HealthStatus::Overdue;
        changed += 1;
    }
    changed
}

/// Open events due within `horizon_days` of `today` (overdue ones included), soonest first
pub fn upcoming(events: &[HealthEvent], today: NaiveDate, horizon_days: i64) -> Vec<&HealthEvent> {
    let horizon = today + Duration::days(horizon_days);
    let mut due: Vec<&HealthEvent> = events
        .iter()
        .filter(|e| e.status.is_open() && e.scheduled_date <= horizon)
        .collect();
    due.sort_by_key(|e| e.scheduled_date);
    due
}

/// Most recent DONE event of a category for a horse
pub fn last_done<'a>(
    events: &'a [HealthEvent],
    horse_id: &str,
    category: HealthCategory,
) -> Option<&'a HealthEvent> {
    events
        .iter()
        .filter(|e| e.horse_id == horse_id && e.category == category && e.status == HealthStatus::Done)
        .max_by_key(|e| e.effective_date())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_complete_recurring_event_schedules_next() {
        let mut event = HealthEvent::planned("h1", HealthCategory::Deworming, "Vermifuge", date(2025, 3, 1))
            .with_recurrence(HealthRecurrence::new(3, RecurrenceUnit::Months));
        event.priority = Priority::High;

        let next = event.complete(date(2025, 3, 4)).unwrap().unwrap();

        assert_eq!(event.status, HealthStatus::Done);
        assert_eq!(event.completed_date, Some(date(2025, 3, 4)));
        assert_eq!(next.scheduled_date, date(2025, 6, 4));
        assert_eq!(next.status, HealthStatus::Planned);
        assert_eq!(next.priority, Priority::High);
        assert_ne!(next.id, event.id);
    }

    #[test]
    fn test_complete_one_off_event() {
        let mut event = HealthEvent::planned("h1", HealthCategory::VetVisit, "Boiterie", date(2025, 3, 1));
        assert!(event.complete(date(2025, 3, 1)).unwrap().is_none());
    }

    #[test]
    fn test_terminal_states_reject_transitions() {
        let mut event = HealthEvent::planned("h1", HealthCategory::Dental, "Dentiste", date(2025, 3, 1));
        event.cancel().unwrap();

        assert!(matches!(
            event.complete(date(2025, 3, 2)),
            Err(LedgerError::InvalidTransition { .. })
        ));
        assert!(event.cancel().is_err());
        assert!(event.reschedule(date(2025, 4, 1)).is_err());
    }

    #[test]
    fn test_overdue_refresh_and_reschedule() {
        let mut events = vec![
            HealthEvent::planned("h1", HealthCategory::Farrier, "Ferrure", date(2025, 5, 20)),
            HealthEvent::planned("h1", HealthCategory::Dental, "Dentiste", date(2025, 6, 20)),
            HealthEvent::done("h1", HealthCategory::Vaccination, "Grippe", date(2025, 1, 10)),
        ];

        let today = date(2025, 6, 1);
        assert!(events[0].is_overdue(today));
        assert_eq!(refresh_overdue(&mut events, today), 1);
        assert_eq!(events[0].status, HealthStatus::Overdue);
        assert_eq!(refresh_overdue(&mut events, today), 0);

        events[0].reschedule(date(2025, 6, 5)).unwrap();
        assert_eq!(events[0].status, HealthStatus::Planned);
    }

    #[test]
    fn test_upcoming_sorted_and_bounded() {
        let events = vec![
            HealthEvent::planned("h1", HealthCategory::Dental, "Dentiste", date(2025, 6, 20)),
            HealthEvent::planned("h1", HealthCategory::Farrier, "Ferrure", date(2025, 6, 5)),
            HealthEvent::planned("h2", HealthCategory::Osteopathy, "Ostéo", date(2025, 9, 1)),
            HealthEvent::done("h1", HealthCategory::Vaccination, "Grippe", date(2025, 6, 2)),
        ];

        let due = upcoming(&events, date(2025, 6, 1), 30);
        let titles: Vec<&str> = due.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["Ferrure", "Dentiste"]);
    }

    #[test]
    fn test_last_done() {
        let events = vec![
            HealthEvent::done("h1", HealthCategory::Vaccination, "Grippe", date(2024, 6, 1)),
            HealthEvent::done("h1", HealthCategory::Vaccination, "Grippe", date(2025, 1, 10)),
            HealthEvent::done("h2", HealthCategory::Vaccination, "Grippe", date(2025, 5, 10)),
            HealthEvent::planned("h1", HealthCategory::Vaccination, "Grippe", date(2025, 7, 10)),
        ];

        let last = last_done(&events, "h1", HealthCategory::Vaccination).unwrap();
        assert_eq!(last.effective_date(), date(2025, 1, 10));
        assert!(last_done(&events, "h1", HealthCategory::Deworming).is_none());
    }

    #[test]
    fn test_recurrence_units() {
        let base = date(2025, 1, 31);
        assert_eq!(HealthRecurrence::new(10, RecurrenceUnit::Days).next_after(base), Some(date(2025, 2, 10)));
        assert_eq!(HealthRecurrence::new(2, RecurrenceUnit::Weeks).next_after(base), Some(date(2025, 2, 14)));
        assert_eq!(HealthRecurrence::new(1, RecurrenceUnit::Months).next_after(base), Some(date(2025, 2, 28)));
    }
}
