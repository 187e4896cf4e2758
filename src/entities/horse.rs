// 🐴 Horse Entity

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Horse {
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub birth_year: Option<i32>,

    /// Main discipline (dressage, CSO, endurance...)
    #[serde(default)]
    pub discipline: Option<String>,

    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Horse {
    pub fn new(name: impl Into<String>) -> Self {
        Horse {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            birth_year: None,
            discipline: None,
            active: true,
        }
    }

    pub fn age_on(&self, date: NaiveDate) -> Option<i32> {
        self.birth_year.map(|year| date.year() - year)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_horse_age() {
        let mut horse = Horse::new("Tornade");
        assert_eq!(horse.age_on(NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()), None);

        horse.birth_year = Some(2015);
        assert_eq!(horse.age_on(NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()), Some(10));
        assert!(horse.active);
    }
}
