// 💡 Recommendation engine - heuristic checks producing action cards
//
// Every check is independent and stateless. `generate` concatenates their
// cards as-is: no merging, ranking or dedup across checks.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::db::Operation;
use crate::entities::Horse;
use crate::health::{last_done, HealthCategory, HealthEvent, Priority};
use crate::training::{weekly_load, Intensity, SessionStatus, TrainingSession};

// ============================================================================
// ACTION CARD
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardKind {
    Training,
    Health,
    Weather,
    Budget,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionCard {
    pub id: String,
    pub kind: CardKind,
    pub priority: Priority,
    pub title: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub horse_id: Option<String>,
    /// Operation, session or health event the card is about
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
    pub generated_at: DateTime<Utc>,
}

impl ActionCard {
    fn new(kind: CardKind, priority: Priority, title: impl Into<String>, message: impl Into<String>) -> Self {
        ActionCard {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            priority,
            title: title.into(),
            message: message.into(),
            horse_id: None,
            related_id: None,
            suggested_action: None,
            generated_at: Utc::now(),
        }
    }

    fn for_horse(mut self, horse_id: &str) -> Self {
        self.horse_id = Some(horse_id.to_string());
        self
    }

    fn about(mut self, related_id: &str) -> Self {
        self.related_id = Some(related_id.to_string());
        self
    }

    fn suggest(mut self, action: impl Into<String>) -> Self {
        self.suggested_action = Some(action.into());
        self
    }
}

// ============================================================================
// INPUTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroundCondition {
    Good,
    Soft,
    Hard,
    Frozen,
    Waterlogged,
}

impl GroundCondition {
    pub fn is_unsafe(&self) -> bool {
        matches!(self, GroundCondition::Frozen | GroundCondition::Waterlogged)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherSnapshot {
    pub temperature_c: f64,
    /// 0-100
    pub relative_humidity: f64,
    pub ground: GroundCondition,
}

impl WeatherSnapshot {
    pub fn heat_index_c(&self) -> f64 {
        heat_index_c(self.temperature_c, self.relative_humidity)
    }
}

/// Everything the checks look at
#[derive(Debug, Clone, Copy)]
pub struct RecommendationContext<'a> {
    pub today: NaiveDate,
    pub horses: &'a [Horse],
    pub sessions: &'a [TrainingSession],
    pub health_events: &'a [HealthEvent],
    pub operations: &'a [Operation],
    pub weather: Option<WeatherSnapshot>,
}

// ============================================================================
// HELPERS
// ============================================================================

/// NOAA heat index (Rothfusz regression), in °C
pub fn heat_index_c(temperature_c: f64, relative_humidity: f64) -> f64 {
    let t = temperature_c * 9.0 / 5.0 + 32.0;
    let rh = relative_humidity.clamp(0.0, 100.0);

    let simple = 0.5 * (t + 61.0 + (t - 68.0) * 1.2 + rh * 0.094);
    let hi = if (simple + t) / 2.0 < 80.0 {
        simple
    } else {
        -42.379 + 2.049_015_23 * t + 10.143_331_27 * rh
            - 0.224_755_41 * t * rh
            - 0.006_837_83 * t * t
            - 0.054_817_17 * rh * rh
            + 0.001_228_74 * t * t * rh
            + 0.000_852_82 * t * rh * rh
            - 0.000_001_99 * t * t * rh * rh
    };

    (hi - 32.0) * 5.0 / 9.0
}

/// Linear-interpolated percentile, `p` in [0, 1]. None on empty input.
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;

    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct RecommendationEngine {
    /// Week-over-week load increase that triggers a warning (default: 15%)
    pub load_increase_ratio: f64,

    /// Minimum gap between two high-intensity sessions (default: 48h)
    pub recovery_hours: i64,

    /// Heat index thresholds in °C (default: 32 / 40)
    pub heat_caution_c: f64,
    pub heat_danger_c: f64,

    /// Vaccination validity and early warning window (default: 365 / 30 days)
    pub vaccination_interval_days: i64,
    pub vaccination_warning_days: i64,

    /// Deworming interval (default: 90 days)
    pub deworming_interval_days: i64,

    /// Expense anomaly detection (default: p95, 5 samples, 30 days back)
    pub anomaly_percentile: f64,
    pub anomaly_min_samples: usize,
    pub anomaly_lookback_days: i64,
}

impl Default for RecommendationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RecommendationEngine {
    pub fn new() -> Self {
        RecommendationEngine {
            load_increase_ratio: 0.15,
            recovery_hours: 48,
            heat_caution_c: 32.0,
            heat_danger_c: 40.0,
            vaccination_interval_days: 365,
            vaccination_warning_days: 30,
            deworming_interval_days: 90,
            anomaly_percentile: 0.95,
            anomaly_min_samples: 5,
            anomaly_lookback_days: 30,
        }
    }

    /// Run every check
    pub fn generate(&self, ctx: &RecommendationContext<'_>) -> Vec<ActionCard> {
        let mut cards = Vec::new();
        cards.extend(self.check_training_load(ctx));
        cards.extend(self.check_recovery(ctx));
        cards.extend(self.check_weather(ctx));
        cards.extend(self.check_vaccinations(ctx));
        cards.extend(self.check_deworming(ctx));
        cards.extend(self.check_expense_anomalies(ctx));
        cards
    }

    fn active_horses<'a>(&self, ctx: &RecommendationContext<'a>) -> impl Iterator<Item = &'a Horse> {
        ctx.horses.iter().filter(|h| h.active)
    }

    /// Rolling 7-day load against the 7 days before
    pub fn check_training_load(&self, ctx: &RecommendationContext<'_>) -> Vec<ActionCard> {
        let current_start = ctx.today - Duration::days(6);
        let previous_start = ctx.today - Duration::days(13);

        self.active_horses(ctx)
            .filter_map(|horse| {
                let current = weekly_load(ctx.sessions, &horse.id, current_start);
                let previous = weekly_load(ctx.sessions, &horse.id, previous_start);
                if previous <= 0.0 {
                    return None;
                }

                let increase = (current - previous) / previous;
                if increase <= self.load_increase_ratio {
                    return None;
                }

                let priority = if increase > self.load_increase_ratio * 2.0 {
                    Priority::High
                } else {
                    Priority::Medium
                };

                Some(
                    ActionCard::new(
                        CardKind::Training,
                        priority,
                        format!("Training load up for {}", horse.name),
                        format!(
                            "Load rose {:.0}% week over week ({:.0} → {:.0}).",
                            increase * 100.0,
                            previous,
                            current
                        ),
                    )
                    .for_horse(&horse.id)
                    .suggest("Plan a lighter session or a rest day"),
                )
            })
            .collect()
    }

    /// High-intensity sessions too close together, from a week back to a week ahead
    pub fn check_recovery(&self, ctx: &RecommendationContext<'_>) -> Vec<ActionCard> {
        let window_start = ctx.today - Duration::days(7);
        let window_end = ctx.today + Duration::days(7);
        let mut cards = Vec::new();

        for horse in self.active_horses(ctx) {
            let mut hard: Vec<&TrainingSession> = ctx
                .sessions
                .iter()
                .filter(|s| s.horse_id == horse.id && s.counts_for_load())
                .filter(|s| s.intensity == Intensity::High)
                .filter(|s| s.start.date() >= window_start && s.start.date() <= window_end)
                .collect();
            hard.sort_by_key(|s| s.start);

            for pair in hard.windows(2) {
                let gap = pair[1].start - pair[0].start;
                if gap < Duration::hours(self.recovery_hours) {
                    cards.push(
                        ActionCard::new(
                            CardKind::Training,
                            Priority::High,
                            format!("Short recovery for {}", horse.name),
                            format!(
                                "Only {}h between intense sessions on {} and {}.",
                                gap.num_hours(),
                                pair[0].start.format("%Y-%m-%d"),
                                pair[1].start.format("%Y-%m-%d")
                            ),
                        )
                        .for_horse(&horse.id)
                        .about(&pair[1].id)
                        .suggest(format!("Keep at least {}h between intense sessions", self.recovery_hours)),
                    );
                }
            }
        }

        cards
    }

    pub fn check_weather(&self, ctx: &RecommendationContext<'_>) -> Vec<ActionCard> {
        let Some(weather) = ctx.weather else {
            return Vec::new();
        };
        let mut cards = Vec::new();

        let heat_index = weather.heat_index_c();
        if heat_index >= self.heat_danger_c {
            cards.push(
                ActionCard::new(
                    CardKind::Weather,
                    Priority::Critical,
                    "Heat danger",
                    format!("Heat index {:.0}°C: no work in the heat of the day.", heat_index),
                )
                .suggest("Ride early morning only, hose down and keep water available"),
            );
        } else if heat_index >= self.heat_caution_c {
            cards.push(
                ActionCard::new(
                    CardKind::Weather,
                    Priority::High,
                    "Heat caution",
                    format!("Heat index {:.0}°C: shorten sessions.", heat_index),
                )
                .suggest("Lower the intensity and plan extra water breaks"),
            );
        }

        if weather.ground.is_unsafe() {
            let tomorrow = ctx.today + Duration::days(1);
            for session in ctx.sessions.iter().filter(|s| {
                s.status == SessionStatus::Planned
                    && s.intensity >= Intensity::Medium
                    && s.start.date() >= ctx.today
                    && s.start.date() <= tomorrow
            }) {
                cards.push(
                    ActionCard::new(
                        CardKind::Weather,
                        Priority::High,
                        "Unsafe ground",
                        format!(
                            "Ground is {:?}; {} session on {} should be adapted.",
                            weather.ground,
                            session.discipline,
                            session.start.format("%Y-%m-%d %H:%M")
                        ),
                    )
                    .for_horse(&session.horse_id)
                    .about(&session.id)
                    .suggest("Switch to ground work or an indoor arena"),
                );
            }
        }

        cards
    }

    pub fn check_vaccinations(&self, ctx: &RecommendationContext<'_>) -> Vec<ActionCard> {
        let mut cards = Vec::new();

        for horse in self.active_horses(ctx) {
            let Some(last) = last_done(ctx.health_events, &horse.id, HealthCategory::Vaccination) else {
                cards.push(
                    ActionCard::new(
                        CardKind::Health,
                        Priority::High,
                        format!("No vaccination recorded for {}", horse.name),
                        "No completed vaccination found in the health record.",
                    )
                    .for_horse(&horse.id)
                    .suggest("Add the last vaccination or book the vet"),
                );
                continue;
            };

            let due = last.effective_date() + Duration::days(self.vaccination_interval_days);
            let already_planned = ctx.health_events.iter().any(|e| {
                e.horse_id == horse.id
                    && e.category == HealthCategory::Vaccination
                    && e.status.is_open()
                    && e.scheduled_date >= ctx.today
            });

            if ctx.today > due {
                cards.push(
                    ActionCard::new(
                        CardKind::Health,
                        Priority::Critical,
                        format!("Vaccination overdue for {}", horse.name),
                        format!("Booster was due on {} ({} days late).", due, (ctx.today - due).num_days()),
                    )
                    .for_horse(&horse.id)
                    .about(&last.id)
                    .suggest("Book the vet for the booster"),
                );
            } else if (due - ctx.today).num_days() <= self.vaccination_warning_days && !already_planned {
                cards.push(
                    ActionCard::new(
                        CardKind::Health,
                        Priority::Medium,
                        format!("Vaccination due soon for {}", horse.name),
                        format!("Booster due on {}.", due),
                    )
                    .for_horse(&horse.id)
                    .about(&last.id)
                    .suggest("Schedule the booster"),
                );
            }
        }

        cards
    }

    pub fn check_deworming(&self, ctx: &RecommendationContext<'_>) -> Vec<ActionCard> {
        let mut cards = Vec::new();

        for horse in self.active_horses(ctx) {
            match last_done(ctx.health_events, &horse.id, HealthCategory::Deworming) {
                None => cards.push(
                    ActionCard::new(
                        CardKind::Health,
                        Priority::Medium,
                        format!("No deworming recorded for {}", horse.name),
                        "No completed deworming found in the health record.",
                    )
                    .for_horse(&horse.id)
                    .suggest("Record the last deworming or plan a fecal egg count"),
                ),
                Some(last) => {
                    let days = (ctx.today - last.effective_date()).num_days();
                    if days > self.deworming_interval_days {
                        cards.push(
                            ActionCard::new(
                                CardKind::Health,
                                Priority::High,
                                format!("Deworming overdue for {}", horse.name),
                                format!("Last deworming was {} days ago.", days),
                            )
                            .for_horse(&horse.id)
                            .about(&last.id)
                            .suggest("Plan a deworming"),
                        );
                    }
                }
            }
        }

        cards
    }

    /// Recent expenses above the category's percentile threshold
    pub fn check_expense_anomalies(&self, ctx: &RecommendationContext<'_>) -> Vec<ActionCard> {
        let mut by_category: HashMap<&str, Vec<f64>> = HashMap::new();
        for op in ctx.operations.iter().filter(|op| op.is_expense() && op.is_effective()) {
            if let Some(category) = op.category_id.as_deref() {
                by_category.entry(category).or_default().push(op.amount);
            }
        }

        let since = ctx.today - Duration::days(self.anomaly_lookback_days);
        let mut cards = Vec::new();

        for op in ctx
            .operations
            .iter()
            .filter(|op| op.is_expense() && op.is_effective())
            .filter(|op| op.date >= since && op.date <= ctx.today)
        {
            let Some(category) = op.category_id.as_deref() else {
                continue;
            };
            let Some(samples) = by_category.get(category) else {
                continue;
            };
            if samples.len() < self.anomaly_min_samples {
                continue;
            }
            let Some(threshold) = percentile(samples, self.anomaly_percentile) else {
                continue;
            };

            if op.amount > threshold {
                let mut card = ActionCard::new(
                    CardKind::Budget,
                    Priority::Medium,
                    format!("Unusual expense: {}", op.label),
                    format!(
                        "{:.2} is above the usual range for this category (p{:.0} = {:.2}).",
                        op.amount,
                        self.anomaly_percentile * 100.0,
                        threshold
                    ),
                )
                .about(&op.id)
                .suggest("Check the invoice and the category");
                card.horse_id = op.horse_id.clone();
                cards.push(card);
            }
        }

        cards
    }
}

/// Run every check with default thresholds
pub fn generate_recommendations(ctx: &RecommendationContext<'_>) -> Vec<ActionCard> {
    RecommendationEngine::new().generate(ctx)
}

// ============================================================================
// TESTS
// ============================================================================
