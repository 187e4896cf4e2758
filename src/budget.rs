// 💶 Budget calculations - balances, envelopes, totals, burn rate
//
// Every function is a pure pass over the operations slice. Forecast and
// EXCLUDED operations never count.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::db::{Operation, OperationType};
use crate::entities::Account;
use crate::error::{LedgerError, LedgerResult};

/// Consumption percentage from which an envelope is flagged
pub const ENVELOPE_WARNING_PERCENTAGE: f64 = 80.0;

// ============================================================================
// ENVELOPE
// ============================================================================

/// Monthly budget cap scoped to a category, a horse, or both.
/// With neither set the envelope covers every expense.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub id: String,

    pub name: String,

    /// Monthly cap
    pub amount: f64,

    #[serde(default)]
    pub category_id: Option<String>,

    #[serde(default)]
    pub horse_id: Option<String>,

    /// Unused budget carries over to the next month
    #[serde(default)]
    pub rollover: bool,
}

impl Envelope {
    pub fn new(name: impl Into<String>, amount: f64) -> Self {
        Envelope {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            amount,
            category_id: None,
            horse_id: None,
            rollover: false,
        }
    }

    pub fn for_category(mut self, category_id: impl Into<String>) -> Self {
        self.category_id = Some(category_id.into());
        self
    }

    pub fn for_horse(mut self, horse_id: impl Into<String>) -> Self {
        self.horse_id = Some(horse_id.into());
        self
    }

    /// Scope fields set on the envelope must equal the operation's
    pub fn covers(&self, op: &Operation) -> bool {
        let category_ok = match &self.category_id {
            Some(id) => op.category_id.as_ref() == Some(id),
            None => true,
        };
        let horse_ok = match &self.horse_id {
            Some(id) => op.horse_id.as_ref() == Some(id),
            None => true,
        };
        category_ok && horse_ok
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvelopeStatus {
    Ok,
    Warning,
    Exceeded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeConsumption {
    pub envelope_id: String,
    /// Cap used for this period (includes rollover when enabled)
    pub budget: f64,
    pub consumed: f64,
    /// Negative once the envelope is exceeded
    pub remaining: f64,
    pub percentage: f64,
    pub exceeded: bool,
}

impl EnvelopeConsumption {
    pub fn status(&self) -> EnvelopeStatus {
        if self.exceeded {
            EnvelopeStatus::Exceeded
        } else if self.percentage >= ENVELOPE_WARNING_PERCENTAGE {
            EnvelopeStatus::Warning
        } else {
            EnvelopeStatus::Ok
        }
    }
}

fn in_period(op: &Operation, start: NaiveDate, end: NaiveDate) -> bool {
    op.date >= start && op.date <= end
}

fn consumed_in(envelope: &Envelope, operations: &[Operation], start: NaiveDate, end: NaiveDate) -> f64 {
    operations
        .iter()
        .filter(|op| op.is_expense() && op.is_effective())
        .filter(|op| in_period(op, start, end))
        .filter(|op| envelope.covers(op))
        .map(|op| op.amount)
        .sum()
}

fn consumption_for_budget(envelope: &Envelope, budget: f64, consumed: f64) -> EnvelopeConsumption {
    let percentage = if budget > 0.0 {
        consumed * 100.0 / budget
    } else {
        0.0
    };

    EnvelopeConsumption {
        envelope_id: envelope.id.clone(),
        budget,
        consumed,
        remaining: budget - consumed,
        percentage,
        exceeded: consumed > budget,
    }
}

/// Expenses consumed by `envelope` between `start` and `end` (both inclusive).
pub fn calculate_envelope_consumption(
    envelope: &Envelope,
    operations: &[Operation],
    start: NaiveDate,
    end: NaiveDate,
) -> EnvelopeConsumption {
    let consumed = consumed_in(envelope, operations, start, end);
    consumption_for_budget(envelope, envelope.amount, consumed)
}

/// Monthly consumption. Rollover envelopes get last month's unused amount
/// (never a deficit) added to their cap.
pub fn calculate_monthly_consumption(
    envelope: &Envelope,
    operations: &[Operation],
    year: i32,
    month: u32,
) -> LedgerResult<EnvelopeConsumption> {
    let (start, end) = month_bounds(year, month)?;
    let consumed = consumed_in(envelope, operations, start, end);

    let mut budget = envelope.amount;
    if envelope.rollover {
        let (prev_year, prev_month) = previous_month(year, month);
        let (prev_start, prev_end) = month_bounds(prev_year, prev_month)?;
        let prev_consumed = consumed_in(envelope, operations, prev_start, prev_end);
        budget += (envelope.amount - prev_consumed).max(0.0);
    }

    Ok(consumption_for_budget(envelope, budget, consumed))
}

// ============================================================================
// ACCOUNT BALANCE
// ============================================================================

/// Opening balance plus every effective operation booked on the account.
/// Transfers leave `account_id` and land on `to_account_id`.
pub fn calculate_account_balance(account: &Account, operations: &[Operation]) -> f64 {
    operations
        .iter()
        .filter(|op| op.is_effective())
        .fold(account.opening_balance, |balance, op| {
            let outgoing = op.account_id == account.id;
            let incoming = op.to_account_id.as_deref() == Some(account.id.as_str());

            match op.op_type {
                OperationType::Income | OperationType::Refund if outgoing => balance + op.amount,
                OperationType::Expense if outgoing => balance - op.amount,
                OperationType::Transfer => {
                    let mut next = balance;
                    if outgoing {
                        next -= op.amount;
                    }
                    if incoming {
                        next += op.amount;
                    }
                    next
                }
                _ => balance,
            }
        })
}

// ============================================================================
// TOTALS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupTotal {
    /// None groups the operations without a category (or horse)
    pub key: Option<String>,
    pub total: f64,
    pub count: usize,
}

fn expense_totals_by<F>(
    operations: &[Operation],
    start: NaiveDate,
    end: NaiveDate,
    key_of: F,
) -> Vec<GroupTotal>
where
    F: Fn(&Operation) -> Option<String>,
{
    let mut groups: BTreeMap<Option<String>, (f64, usize)> = BTreeMap::new();

    for op in operations
        .iter()
        .filter(|op| op.is_expense() && op.is_effective() && in_period(op, start, end))
    {
        let entry = groups.entry(key_of(op)).or_insert((0.0, 0));
        entry.0 += op.amount;
        entry.1 += 1;
    }

    let mut totals: Vec<GroupTotal> = groups
        .into_iter()
        .map(|(key, (total, count))| GroupTotal { key, total, count })
        .collect();

    // Largest first; ties keep key order
    totals.sort_by(|a, b| b.total.total_cmp(&a.total));
    totals
}

/// Expense totals per category over the period
pub fn totals_by_category(operations: &[Operation], start: NaiveDate, end: NaiveDate) -> Vec<GroupTotal> {
    expense_totals_by(operations, start, end, |op| op.category_id.clone())
}

/// Expense totals per horse over the period
pub fn totals_by_horse(operations: &[Operation], start: NaiveDate, end: NaiveDate) -> Vec<GroupTotal> {
    expense_totals_by(operations, start, end, |op| op.horse_id.clone())
}

// ============================================================================
// BURN RATE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BurnRate {
    pub spent: f64,
    pub days_elapsed: i64,
    pub period_days: i64,
    pub daily_average: f64,
    /// `daily_average` extended to the whole period
    pub projected_total: f64,
}

/// Spending pace over `[start, end]` as seen on `as_of`.
pub fn calculate_burn_rate(
    operations: &[Operation],
    start: NaiveDate,
    end: NaiveDate,
    as_of: NaiveDate,
) -> LedgerResult<BurnRate> {
    if end < start {
        return Err(LedgerError::InvalidPeriod(format!("{} is before {}", end, start)));
    }

    let period_days = (end - start).num_days() + 1;
    let cutoff = as_of.min(end);
    let days_elapsed = if cutoff < start {
        0
    } else {
        (cutoff - start).num_days() + 1
    };

    let spent: f64 = operations
        .iter()
        .filter(|op| op.is_expense() && op.is_effective())
        .filter(|op| op.date >= start && op.date <= cutoff)
        .map(|op| op.amount)
        .sum();

    let daily_average = if days_elapsed > 0 {
        spent / days_elapsed as f64
    } else {
        0.0
    };

    Ok(BurnRate {
        spent,
        days_elapsed,
        period_days,
        daily_average,
        projected_total: daily_average * period_days as f64,
    })
}

// ============================================================================
// PERIODS
// ============================================================================

/// First and last day of a month
pub fn month_bounds(year: i32, month: u32) -> LedgerResult<(NaiveDate, NaiveDate)> {
    let start = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| LedgerError::InvalidPeriod(format!("{}-{:02}", year, month)))?;
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let end = NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .ok_or_else(|| LedgerError::InvalidPeriod(format!("{}-{:02}", year, month)))?;
    Ok((start, end))
}

pub fn previous_month(year: i32, month: u32) -> (i32, u32) {
    if month <= 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    }
}

/// Parse "YYYY-MM"
pub fn parse_month(value: &str) -> LedgerResult<(i32, u32)> {
    let invalid = || LedgerError::InvalidPeriod(value.to_string());
    let (year, month) = value.trim().split_once('-').ok_or_else(invalid)?;
    let year: i32 = year.parse().map_err(|_| invalid())?;
    let month: u32 = month.parse().map_err(|_| invalid())?;
    // Validates the month range
    month_bounds(year, month)?;
    Ok((year, month))
}

pub fn month_of(date: NaiveDate) -> (i32, u32) {
    (date.year(), date.month())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ReconciliationStatus;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn expense(day: u32, amount: f64, category: &str) -> Operation {
        Operation::new(date(2025, 6, day), "op", amount, OperationType::Expense, "acc1")
            .with_category(category)
    }

    #[test]
    fn test_vet_envelope_example() {
        let ops = vec![expense(2, 50.0, "vet"), expense(10, 30.0, "vet")];
        let envelope = Envelope::new("Véto", 100.0).for_category("vet");

        let c = calculate_envelope_consumption(&envelope, &ops, date(2025, 6, 1), date(2025, 6, 30));

        assert_eq!(c.consumed, 80.0);
        assert_eq!(c.remaining, 20.0);
        assert_eq!(c.percentage, 80.0);
        assert!(!c.exceeded);
        assert_eq!(c.status(), EnvelopeStatus::Warning);
    }

    #[test]
    fn test_envelope_ignores_non_matching_operations() {
        let mut excluded = expense(3, 40.0, "vet");
        excluded.reconciliation = ReconciliationStatus::Excluded;
        let mut forecast = expense(4, 40.0, "vet");
        forecast.forecast = true;
        let income = Operation::new(date(2025, 6, 5), "remb", 40.0, OperationType::Income, "acc1")
            .with_category("vet");
        let out_of_period = Operation::new(date(2025, 7, 1), "op", 40.0, OperationType::Expense, "acc1")
            .with_category("vet");
        let other_category = expense(6, 40.0, "pension");
        let counted = expense(7, 25.0, "vet");

        let ops = vec![excluded, forecast, income, out_of_period, other_category, counted];
        let envelope = Envelope::new("Véto", 100.0).for_category("vet");

        let c = calculate_envelope_consumption(&envelope, &ops, date(2025, 6, 1), date(2025, 6, 30));
        assert_eq!(c.consumed, 25.0);
        assert_eq!(c.status(), EnvelopeStatus::Ok);
    }

    #[test]
    fn test_envelope_scoped_on_horse_and_category() {
        let ops = vec![
            expense(2, 60.0, "vet").with_horse("h1"),
            expense(3, 70.0, "vet").with_horse("h2"),
            expense(4, 80.0, "pension").with_horse("h1"),
        ];

        let both = Envelope::new("Véto Tornade", 50.0).for_category("vet").for_horse("h1");
        let c = calculate_envelope_consumption(&both, &ops, date(2025, 6, 1), date(2025, 6, 30));
        assert_eq!(c.consumed, 60.0);
        assert!(c.exceeded);
        assert_eq!(c.remaining, -10.0);
        assert_eq!(c.status(), EnvelopeStatus::Exceeded);

        let horse_only = Envelope::new("Tornade", 500.0).for_horse("h1");
        let c = calculate_envelope_consumption(&horse_only, &ops, date(2025, 6, 1), date(2025, 6, 30));
        assert_eq!(c.consumed, 140.0);

        let global = Envelope::new("Tout", 500.0);
        let c = calculate_envelope_consumption(&global, &ops, date(2025, 6, 1), date(2025, 6, 30));
        assert_eq!(c.consumed, 210.0);
    }

    #[test]
    fn test_zero_amount_envelope() {
        let ops = vec![expense(2, 10.0, "vet")];
        let envelope = Envelope::new("Vide", 0.0).for_category("vet");

        let c = calculate_envelope_consumption(&envelope, &ops, date(2025, 6, 1), date(2025, 6, 30));
        assert_eq!(c.percentage, 0.0);
        assert!(c.exceeded);
    }

    #[test]
    fn test_rollover_adds_unused_budget() {
        let mut ops = vec![expense(10, 30.0, "foin")];
        ops.push(
            Operation::new(date(2025, 5, 12), "foin mai", 60.0, OperationType::Expense, "acc1")
                .with_category("foin"),
        );

        let mut envelope = Envelope::new("Foin", 100.0).for_category("foin");
        let plain = calculate_monthly_consumption(&envelope, &ops, 2025, 6).unwrap();
        assert_eq!(plain.budget, 100.0);

        envelope.rollover = true;
        let rolled = calculate_monthly_consumption(&envelope, &ops, 2025, 6).unwrap();
        assert_eq!(rolled.budget, 140.0);
        assert_eq!(rolled.consumed, 30.0);
        assert_eq!(rolled.remaining, 110.0);
    }

    #[test]
    fn test_rollover_never_carries_deficit() {
        let ops = vec![Operation::new(date(2025, 5, 12), "foin", 180.0, OperationType::Expense, "acc1")
            .with_category("foin")];
        let mut envelope = Envelope::new("Foin", 100.0).for_category("foin");
        envelope.rollover = true;

        let c = calculate_monthly_consumption(&envelope, &ops, 2025, 6).unwrap();
        assert_eq!(c.budget, 100.0);
    }

    #[test]
    fn test_balance_without_operations_is_opening_balance() {
        let account = Account::with_id("acc1", "Compte", 1234.56);
        assert_eq!(calculate_account_balance(&account, &[]), 1234.56);
    }

    #[test]
    fn test_balance_folds_all_operation_types() {
        let account = Account::with_id("acc1", "Compte", 1000.0);
        let savings = Account::with_id("acc2", "Livret", 0.0);

        let mut transfer = Operation::new(date(2025, 6, 3), "virement", 200.0, OperationType::Transfer, "acc1");
        transfer.to_account_id = Some("acc2".to_string());
        let mut excluded = Operation::new(date(2025, 6, 4), "doublon", 999.0, OperationType::Expense, "acc1");
        excluded.reconciliation = ReconciliationStatus::Excluded;

        let ops = vec![
            Operation::new(date(2025, 6, 1), "pension", 450.0, OperationType::Expense, "acc1"),
            Operation::new(date(2025, 6, 2), "demi-pension", 150.0, OperationType::Income, "acc1"),
            Operation::new(date(2025, 6, 2), "remboursement", 50.0, OperationType::Refund, "acc1"),
            Operation::new(date(2025, 6, 2), "autre compte", 75.0, OperationType::Expense, "acc3"),
            transfer,
            excluded,
        ];

        assert_eq!(calculate_account_balance(&account, &ops), 550.0);
        assert_eq!(calculate_account_balance(&savings, &ops), 200.0);
    }

    #[test]
    fn test_totals_by_category_and_horse() {
        let ops = vec![
            expense(1, 450.0, "pension").with_horse("h1"),
            expense(2, 450.0, "pension").with_horse("h2"),
            expense(3, 90.0, "marechalerie").with_horse("h1"),
            Operation::new(date(2025, 6, 4), "divers", 15.0, OperationType::Expense, "acc1"),
        ];

        let by_category = totals_by_category(&ops, date(2025, 6, 1), date(2025, 6, 30));
        assert_eq!(by_category.len(), 3);
        assert_eq!(by_category[0].key.as_deref(), Some("pension"));
        assert_eq!(by_category[0].total, 900.0);
        assert_eq!(by_category[0].count, 2);
        assert_eq!(by_category[2].key, None);

        let by_horse = totals_by_horse(&ops, date(2025, 6, 1), date(2025, 6, 30));
        assert_eq!(by_horse[0].key.as_deref(), Some("h1"));
        assert_eq!(by_horse[0].total, 540.0);
    }

    #[test]
    fn test_burn_rate() {
        let ops = vec![expense(1, 300.0, "pension"), expense(10, 100.0, "foin"), expense(20, 500.0, "foin")];

        let rate = calculate_burn_rate(&ops, date(2025, 6, 1), date(2025, 6, 30), date(2025, 6, 10)).unwrap();
        assert_eq!(rate.spent, 400.0);
        assert_eq!(rate.days_elapsed, 10);
        assert_eq!(rate.period_days, 30);
        assert_eq!(rate.daily_average, 40.0);
        assert_eq!(rate.projected_total, 1200.0);

        let before = calculate_burn_rate(&ops, date(2025, 6, 1), date(2025, 6, 30), date(2025, 5, 10)).unwrap();
        assert_eq!(before.days_elapsed, 0);
        assert_eq!(before.daily_average, 0.0);

        assert!(calculate_burn_rate(&ops, date(2025, 6, 30), date(2025, 6, 1), date(2025, 6, 10)).is_err());
    }

    #[test]
    fn test_month_helpers() {
        assert_eq!(month_bounds(2024, 2).unwrap(), (date(2024, 2, 1), date(2024, 2, 29)));
        assert_eq!(month_bounds(2025, 12).unwrap(), (date(2025, 12, 1), date(2025, 12, 31)));
        assert!(month_bounds(2025, 13).is_err());

        assert_eq!(parse_month("2025-06").unwrap(), (2025, 6));
        assert!(parse_month("2025/06").is_err());
        assert!(parse_month("2025-00").is_err());

        assert_eq!(previous_month(2025, 1), (2024, 12));
        assert_eq!(month_of(date(2025, 3, 9)), (2025, 3));
    }
}
