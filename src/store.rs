// 🐎 Stable state - the application state passed around explicitly
//
// Holds the stable document (accounts, categories, horses, envelopes,
// rules, health and training records) plus the operations loaded from the
// database. Every mutation goes through a method here.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::automation::{apply_automation_rules, AutomationRule};
use crate::budget::{calculate_account_balance, calculate_monthly_consumption, Envelope, EnvelopeConsumption};
use crate::db::Operation;
use crate::entities::{Account, BudgetCategory, CategoryRegistry, Horse};
use crate::error::{LedgerError, LedgerResult};
use crate::health::HealthEvent;
use crate::recommendations::{ActionCard, RecommendationContext, RecommendationEngine, WeatherSnapshot};
use crate::training::{SessionStatus, TrainingOccurrence, TrainingSeries, TrainingSession};

// ============================================================================
// IDENTITY
// ============================================================================

pub trait Identified {
    const ENTITY: &'static str;
    fn id(&self) -> &str;
}

macro_rules! identified {
    ($ty:ty, $name:expr) => {
        impl Identified for $ty {
            const ENTITY: &'static str = $name;
            fn id(&self) -> &str {
                &self.id
            }
        }
    };
}

identified!(Operation, "operation");
identified!(Account, "account");
identified!(Horse, "horse");
identified!(Envelope, "envelope");
identified!(AutomationRule, "automation rule");
identified!(HealthEvent, "health event");
identified!(TrainingSession, "training session");
identified!(TrainingSeries, "training series");

/// Replace the item with the same id, or append it
fn upsert<T: Identified>(items: &mut Vec<T>, item: T) {
    match items.iter_mut().find(|existing| existing.id() == item.id()) {
        Some(slot) => *slot = item,
        None => items.push(item),
    }
}

fn remove<T: Identified>(items: &mut Vec<T>, id: &str) -> LedgerResult<T> {
    let index = items
        .iter()
        .position(|item| item.id() == id)
        .ok_or_else(|| LedgerError::not_found(T::ENTITY, id))?;
    Ok(items.remove(index))
}

fn find_mut<'a, T: Identified>(items: &'a mut [T], id: &str) -> LedgerResult<&'a mut T> {
    items
        .iter_mut()
        .find(|item| item.id() == id)
        .ok_or_else(|| LedgerError::not_found(T::ENTITY, id))
}

// ============================================================================
// STABLE DOCUMENT
// ============================================================================

/// Everything except operations, stored as one JSON document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StableData {
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub categories: Vec<BudgetCategory>,
    #[serde(default)]
    pub horses: Vec<Horse>,
    #[serde(default)]
    pub envelopes: Vec<Envelope>,
    #[serde(default)]
    pub rules: Vec<AutomationRule>,
    #[serde(default)]
    pub health_events: Vec<HealthEvent>,
    #[serde(default)]
    pub sessions: Vec<TrainingSession>,
    #[serde(default)]
    pub series: Vec<TrainingSeries>,
}

impl StableData {
    /// Missing file ⇒ empty document with the default category tree
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = ?path, "no stable document yet, starting empty");
            return Ok(StableData {
                categories: CategoryRegistry::with_defaults().all().to_vec(),
                ..Default::default()
            });
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read stable document: {:?}", path))?;
        let mut data: StableData =
            serde_json::from_str(&content).context("Failed to parse stable document JSON")?;

        if data.categories.is_empty() {
            data.categories = CategoryRegistry::with_defaults().all().to_vec();
        }

        Ok(data)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("Failed to write stable document: {:?}", path))?;
        Ok(())
    }
}

// ============================================================================
// STATE
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountBalance {
    pub account_id: String,
    pub name: String,
    pub balance: f64,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeReport {
    pub envelope: Envelope,
    pub consumption: EnvelopeConsumption,
}

#[derive(Debug, Clone, Default)]
pub struct StableState {
    pub data: StableData,
    operations: Vec<Operation>,
}

impl StableState {
    pub fn new(data: StableData, operations: Vec<Operation>) -> Self {
        StableState { data, operations }
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn operation(&self, id: &str) -> Option<&Operation> {
        self.operations.iter().find(|op| op.id == id)
    }

    /// Run the automation rules on `op` and store it
    pub fn add_operation(&mut self, mut op: Operation) -> &Operation {
        let updates = apply_automation_rules(&op, &self.data.rules);
        updates.apply_to(&mut op);
        if let Some(rule_id) = &updates.rule_id {
            info!(operation = %op.label, rule = %rule_id, "automation rule applied");
        }

        let index = self.operations.len();
        self.operations.push(op);
        &self.operations[index]
    }

    pub fn update_operation<F>(&mut self, id: &str, update: F) -> LedgerResult<&Operation>
    where
        F: FnOnce(&mut Operation),
    {
        let op = find_mut(&mut self.operations, id)?;
        update(op);
        op.touch();
        Ok(op)
    }

    pub fn delete_operation(&mut self, id: &str) -> LedgerResult<Operation> {
        remove(&mut self.operations, id)
    }

    // ------------------------------------------------------------------
    // Reference data
    // ------------------------------------------------------------------

    pub fn upsert_account(&mut self, account: Account) {
        upsert(&mut self.data.accounts, account);
    }

    pub fn upsert_horse(&mut self, horse: Horse) {
        upsert(&mut self.data.horses, horse);
    }

    pub fn upsert_envelope(&mut self, envelope: Envelope) {
        upsert(&mut self.data.envelopes, envelope);
    }

    pub fn delete_envelope(&mut self, id: &str) -> LedgerResult<Envelope> {
        remove(&mut self.data.envelopes, id)
    }

    pub fn upsert_rule(&mut self, rule: AutomationRule) {
        upsert(&mut self.data.rules, rule);
    }

    pub fn delete_rule(&mut self, id: &str) -> LedgerResult<AutomationRule> {
        remove(&mut self.data.rules, id)
    }

    // ------------------------------------------------------------------
    // Health
    // ------------------------------------------------------------------

    pub fn upsert_health_event(&mut self, event: HealthEvent) {
        upsert(&mut self.data.health_events, event);
    }

    pub fn delete_health_event(&mut self, id: &str) -> LedgerResult<HealthEvent> {
        remove(&mut self.data.health_events, id)
    }

    /// Complete an event; the next occurrence of a recurring one is stored too
    pub fn complete_health_event(&mut self, id: &str, on: NaiveDate) -> LedgerResult<Option<HealthEvent>> {
        let next = find_mut(&mut self.data.health_events, id)?.complete(on)?;
        if let Some(next) = &next {
            self.data.health_events.push(next.clone());
        }
        Ok(next)
    }

    // ------------------------------------------------------------------
    // Training
    // ------------------------------------------------------------------

    pub fn upsert_session(&mut self, session: TrainingSession) {
        upsert(&mut self.data.sessions, session);
    }

    pub fn delete_session(&mut self, id: &str) -> LedgerResult<TrainingSession> {
        remove(&mut self.data.sessions, id)
    }

    pub fn set_session_status(&mut self, id: &str, status: SessionStatus) -> LedgerResult<()> {
        let session = find_mut(&mut self.data.sessions, id)?;
        match status {
            SessionStatus::Active => session.start_session(),
            SessionStatus::Done => session.complete(),
            SessionStatus::Canceled => session.cancel(),
            SessionStatus::Planned => Err(LedgerError::InvalidTransition {
                entity: "training session",
                from: session.status.as_str().to_string(),
                to: status.as_str().to_string(),
            }),
        }
    }

    pub fn upsert_series(&mut self, series: TrainingSeries) {
        upsert(&mut self.data.series, series);
    }

    /// Drop a series and the sessions it generated that have not happened
    pub fn delete_series(&mut self, id: &str) -> LedgerResult<TrainingSeries> {
        let series = remove(&mut self.data.series, id)?;
        self.data
            .sessions
            .retain(|s| !(s.series_id.as_deref() == Some(id) && s.status == SessionStatus::Planned));
        Ok(series)
    }

    pub fn series_occurrences(&self, id: &str, max: usize) -> LedgerResult<Vec<TrainingOccurrence>> {
        let series = self
            .data
            .series
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| LedgerError::not_found("training series", id))?;
        series.occurrences_with_sessions(max, &self.data.sessions)
    }

    // ------------------------------------------------------------------
    // Reports
    // ------------------------------------------------------------------

    pub fn account_balances(&self) -> Vec<AccountBalance> {
        self.data
            .accounts
            .iter()
            .filter(|a| a.is_active())
            .map(|account| AccountBalance {
                account_id: account.id.clone(),
                name: account.name.clone(),
                balance: calculate_account_balance(account, &self.operations),
                currency: account.currency.clone(),
            })
            .collect()
    }

    pub fn envelope_report(&self, year: i32, month: u32) -> LedgerResult<Vec<EnvelopeReport>> {
        self.data
            .envelopes
            .iter()
            .map(|envelope| {
                Ok(EnvelopeReport {
                    envelope: envelope.clone(),
                    consumption: calculate_monthly_consumption(envelope, &self.operations, year, month)?,
                })
            })
            .collect()
    }

    pub fn recommendations(&self, today: NaiveDate, weather: Option<WeatherSnapshot>) -> Vec<ActionCard> {
        let ctx = RecommendationContext {
            today,
            horses: &self.data.horses,
            sessions: &self.data.sessions,
            health_events: &self.data.health_events,
            operations: &self.operations,
            weather,
        };
        RecommendationEngine::new().generate(&ctx)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::{ConditionField, ConditionOperator, RuleAction, RuleCondition};
    use crate::db::OperationType;
    use crate::health::{HealthCategory, HealthRecurrence, HealthStatus, RecurrenceUnit};
    use crate::recurrence::{Frequency, RecurrenceRule};
    use crate::training::Intensity;
    use chrono::Weekday;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn state_with_rule() -> StableState {
        let mut state = StableState::default();
        state.upsert_account(Account::with_id("acc1", "Compte", 1000.0));
        state.upsert_rule(
            AutomationRule::new("Pension", 0)
                .when(RuleCondition::new(ConditionField::Label, ConditionOperator::Contains, "pension"))
                .then(RuleAction::SetCategory {
                    category_id: "pension".to_string(),
                    subcategory_id: None,
                }),
        );
        state
    }

    #[test]
    fn test_add_operation_applies_rules() {
        let mut state = state_with_rule();

        let op = state.add_operation(Operation::new(
            date(2025, 6, 1),
            "Pension juin",
            450.0,
            OperationType::Expense,
            "acc1",
        ));
        assert_eq!(op.category_id.as_deref(), Some("pension"));

        let op = state.add_operation(Operation::new(date(2025, 6, 2), "Foin", 300.0, OperationType::Expense, "acc1"));
        assert!(op.category_id.is_none());

        assert_eq!(state.operations().len(), 2);
        assert_eq!(state.account_balances()[0].balance, 250.0);
    }

    #[test]
    fn test_update_and_delete_operation() {
        let mut state = state_with_rule();
        let id = state
            .add_operation(Operation::new(date(2025, 6, 2), "Foin", 300.0, OperationType::Expense, "acc1"))
            .id
            .clone();

        let updated = state.update_operation(&id, |op| op.amount = 320.0).unwrap();
        assert_eq!(updated.amount, 320.0);

        assert!(state.delete_operation(&id).is_ok());
        assert_eq!(
            state.delete_operation(&id),
            Err(LedgerError::not_found("operation", id.clone()))
        );
        assert!(state.update_operation(&id, |_| {}).is_err());
    }

    #[test]
    fn test_upsert_replaces_by_id() {
        let mut state = StableState::default();
        let mut envelope = Envelope::new("Véto", 100.0).for_category("veterinaire");
        state.upsert_envelope(envelope.clone());
        envelope.amount = 150.0;
        state.upsert_envelope(envelope.clone());

        assert_eq!(state.data.envelopes.len(), 1);
        assert_eq!(state.data.envelopes[0].amount, 150.0);
        assert!(state.delete_envelope(&envelope.id).is_ok());
        assert!(state.delete_envelope(&envelope.id).is_err());
    }

    #[test]
    fn test_envelope_report() {
        let mut state = state_with_rule();
        state.upsert_envelope(Envelope::new("Pension", 500.0).for_category("pension"));
        state.add_operation(Operation::new(date(2025, 6, 1), "Pension juin", 450.0, OperationType::Expense, "acc1"));

        let report = state.envelope_report(2025, 6).unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].consumption.consumed, 450.0);
        assert_eq!(report[0].consumption.percentage, 90.0);

        assert!(state.envelope_report(2025, 13).is_err());
    }

    #[test]
    fn test_complete_health_event_stores_next() {
        let mut state = StableState::default();
        let event = HealthEvent::planned("h1", HealthCategory::Farrier, "Ferrure", date(2025, 6, 1))
            .with_recurrence(HealthRecurrence::new(6, RecurrenceUnit::Weeks));
        let id = event.id.clone();
        state.upsert_health_event(event);

        let next = state.complete_health_event(&id, date(2025, 6, 2)).unwrap().unwrap();
        assert_eq!(next.scheduled_date, date(2025, 7, 14));
        assert_eq!(state.data.health_events.len(), 2);
        assert_eq!(state.data.health_events[0].status, HealthStatus::Done);

        assert!(state.complete_health_event(&id, date(2025, 6, 3)).is_err());
        assert!(state.complete_health_event("missing", date(2025, 6, 3)).is_err());
    }

    #[test]
    fn test_series_lifecycle() {
        let mut state = StableState::default();
        let rule = RecurrenceRule::new(Frequency::Weekly).on(&[Weekday::Mon]).times(3);
        let start = date(2025, 6, 2).and_hms_opt(18, 0, 0).unwrap();
        let series = TrainingSeries::new("h1", "Plat", start, &rule, 45, "dressage", Intensity::Medium);
        let series_id = series.id.clone();

        for session in series.materialize(3).unwrap() {
            state.upsert_session(session);
        }
        state.upsert_series(series);

        let first_id = state.data.sessions[0].id.clone();
        state.set_session_status(&first_id, SessionStatus::Done).unwrap();
        assert!(state.set_session_status(&first_id, SessionStatus::Planned).is_err());

        let occurrences = state.series_occurrences(&series_id, 52).unwrap();
        assert_eq!(occurrences.len(), 3);
        assert_eq!(occurrences[0].status, SessionStatus::Done);

        state.delete_series(&series_id).unwrap();
        // The completed session is history and stays
        assert_eq!(state.data.sessions.len(), 1);
        assert!(state.series_occurrences(&series_id, 52).is_err());
    }

    #[test]
    fn test_stable_data_round_trip_on_disk() {
        let path = std::env::temp_dir().join(format!("stable-{}.json", uuid::Uuid::new_v4()));

        let fresh = StableData::load(&path).unwrap();
        assert_eq!(fresh.categories.len(), 11);

        let mut state = StableState::new(fresh, Vec::new());
        state.upsert_horse(Horse::new("Tornade"));
        state.data.save(&path).unwrap();

        let loaded = StableData::load(&path).unwrap();
        assert_eq!(loaded, state.data);

        std::fs::remove_file(&path).unwrap();
    }
}
