// 🏇 Training sessions, recurring series and their occurrences

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};
use crate::recurrence::{build_rrule, expand_occurrences, RecurrenceRule};

// ============================================================================
// ENUMS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intensity {
    Low,
    Medium,
    High,
}

impl Intensity {
    /// Weight applied to minutes when computing training load
    pub fn factor(&self) -> f64 {
        match self {
            Intensity::Low => 1.0,
            Intensity::Medium => 2.0,
            Intensity::High => 3.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Planned,
    Active,
    Done,
    Canceled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Planned => "PLANNED",
            SessionStatus::Active => "ACTIVE",
            SessionStatus::Done => "DONE",
            SessionStatus::Canceled => "CANCELED",
        }
    }
}

// ============================================================================
// SESSION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingSession {
    pub id: String,

    pub horse_id: String,

    /// Set when the session was generated from a series
    #[serde(default)]
    pub series_id: Option<String>,

    pub start: NaiveDateTime,

    pub duration_minutes: u32,

    pub discipline: String,

    pub intensity: Intensity,

    pub status: SessionStatus,

    #[serde(default)]
    pub distance_km: Option<f64>,

    #[serde(default)]
    pub notes: Option<String>,
}

impl TrainingSession {
    pub fn planned(
        horse_id: impl Into<String>,
        start: NaiveDateTime,
        duration_minutes: u32,
        discipline: impl Into<String>,
        intensity: Intensity,
    ) -> Self {
        TrainingSession {
            id: uuid::Uuid::new_v4().to_string(),
            horse_id: horse_id.into(),
            series_id: None,
            start,
            duration_minutes,
            discipline: discipline.into(),
            intensity,
            status: SessionStatus::Planned,
            distance_km: None,
            notes: None,
        }
    }

    pub fn end(&self) -> NaiveDateTime {
        self.start + Duration::minutes(self.duration_minutes as i64)
    }

    /// Minutes weighted by intensity
    pub fn load(&self) -> f64 {
        self.duration_minutes as f64 * self.intensity.factor()
    }

    pub fn counts_for_load(&self) -> bool {
        self.status != SessionStatus::Canceled
    }

    fn move_to(&mut self, to: SessionStatus, allowed_from: &[SessionStatus]) -> LedgerResult<()> {
        if !allowed_from.contains(&self.status) {
            return Err(LedgerError::InvalidTransition {
                entity: "training session",
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn start_session(&mut self) -> LedgerResult<()> {
        self.move_to(SessionStatus::Active, &[SessionStatus::Planned])
    }

    /// Planned sessions may be logged as done directly
    pub fn complete(&mut self) -> LedgerResult<()> {
        self.move_to(SessionStatus::Done, &[SessionStatus::Planned, SessionStatus::Active])
    }

    pub fn cancel(&mut self) -> LedgerResult<()> {
        self.move_to(SessionStatus::Canceled, &[SessionStatus::Planned, SessionStatus::Active])
    }
}

/// Training load of `horse_id` for the 7 days starting at `week_start`
pub fn weekly_load(sessions: &[TrainingSession], horse_id: &str, week_start: NaiveDate) -> f64 {
    let week_end = week_start + Duration::days(7);
    sessions
        .iter()
        .filter(|s| s.horse_id == horse_id && s.counts_for_load())
        .filter(|s| s.start.date() >= week_start && s.start.date() < week_end)
        .map(TrainingSession::load)
        .sum()
}

// ============================================================================
// SERIES & OCCURRENCES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingOccurrence {
    pub series_id: String,
    /// Position in the unfiltered expansion
    pub index: usize,
    pub starts_at: NaiveDateTime,
    pub status: SessionStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingSeries {
    pub id: String,

    pub horse_id: String,

    pub title: String,

    pub start: NaiveDateTime,

    pub rrule: String,

    pub duration_minutes: u32,

    pub discipline: String,

    pub intensity: Intensity,

    /// Skipped days
    #[serde(default)]
    pub exceptions: Vec<NaiveDate>,
}

impl TrainingSeries {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        horse_id: impl Into<String>,
        title: impl Into<String>,
        start: NaiveDateTime,
        rule: &RecurrenceRule,
        duration_minutes: u32,
        discipline: impl Into<String>,
        intensity: Intensity,
    ) -> Self {
        TrainingSeries {
            id: uuid::Uuid::new_v4().to_string(),
            horse_id: horse_id.into(),
            title: title.into(),
            start,
            rrule: build_rrule(rule),
            duration_minutes,
            discipline: discipline.into(),
            intensity,
            exceptions: Vec::new(),
        }
    }

    pub fn skip(&mut self, date: NaiveDate) {
        if !self.exceptions.contains(&date) {
            self.exceptions.push(date);
        }
    }

    /// Up to `max` expanded dates, minus the exceptions
    pub fn occurrences(&self, max: usize) -> LedgerResult<Vec<TrainingOccurrence>> {
        let dates = expand_occurrences(self.start, &self.rrule, max)?;

        Ok(dates
            .into_iter()
            .enumerate()
            .filter(|(_, dt)| !self.exceptions.contains(&dt.date()))
            .map(|(index, starts_at)| TrainingOccurrence {
                series_id: self.id.clone(),
                index,
                starts_at,
                status: SessionStatus::Planned,
            })
            .collect())
    }

    /// Occurrences carrying the status of sessions already generated from them
    pub fn occurrences_with_sessions(
        &self,
        max: usize,
        sessions: &[TrainingSession],
    ) -> LedgerResult<Vec<TrainingOccurrence>> {
        let mut occurrences = self.occurrences(max)?;
        for occurrence in occurrences.iter_mut() {
            if let Some(session) = sessions
                .iter()
                .find(|s| s.series_id.as_deref() == Some(self.id.as_str()) && s.start == occurrence.starts_at)
            {
                occurrence.status = session.status;
            }
        }
        Ok(occurrences)
    }

    /// Planned sessions for the next `max` occurrences
    pub fn materialize(&self, max: usize) -> LedgerResult<Vec<TrainingSession>> {
        Ok(self
            .occurrences(max)?
            .into_iter()
            .map(|occ| {
                let mut session = TrainingSession::planned(
                    self.horse_id.clone(),
                    occ.starts_at,
                    self.duration_minutes,
                    self.discipline.clone(),
                    self.intensity,
                );
                session.series_id = Some(self.id.clone());
                session.notes = Some(self.title.clone());
                session
            })
            .collect())
    }
}

// ============================================================================
// TESTS
// ============================================================================
