// 🏷️ Budget categories - two-level tree (category → subcategories)
//
// Default ids are stable slugs so CSV imports and automation rules can
// reference them directly ("pension", "veterinaire", ...).

use serde::{Deserialize, Serialize};

// ============================================================================
// CATEGORY KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CategoryKind {
    #[default]
    Expense,
    Income,
}

// ============================================================================
// CATEGORY ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subcategory {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetCategory {
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub kind: CategoryKind,

    #[serde(default)]
    pub subcategories: Vec<Subcategory>,

    /// Display colour (e.g. "#2F855A")
    #[serde(default)]
    pub color: Option<String>,
}

impl BudgetCategory {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: CategoryKind) -> Self {
        BudgetCategory {
            id: id.into(),
            name: name.into(),
            kind,
            subcategories: Vec::new(),
            color: None,
        }
    }

    fn with_subcategories(mut self, subs: &[(&str, &str)]) -> Self {
        self.subcategories = subs
            .iter()
            .map(|(id, name)| Subcategory {
                id: id.to_string(),
                name: name.to_string(),
            })
            .collect();
        self
    }

    fn with_color(mut self, color: &str) -> Self {
        self.color = Some(color.to_string());
        self
    }

    pub fn subcategory(&self, id: &str) -> Option<&Subcategory> {
        self.subcategories.iter().find(|s| s.id == id)
    }
}

// ============================================================================
// CATEGORY REGISTRY
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryRegistry {
    categories: Vec<BudgetCategory>,
}

impl CategoryRegistry {
    pub fn new() -> Self {
        CategoryRegistry::default()
    }

    /// Registry pre-loaded with the usual stable budget tree
    pub fn with_defaults() -> Self {
        use CategoryKind::{Expense, Income};

        let categories = vec![
            BudgetCategory::new("pension", "Pension", Expense)
                .with_subcategories(&[("pension-box", "Box"), ("pension-pre", "Pré")])
                .with_color("#2F855A"),
            BudgetCategory::new("veterinaire", "Vétérinaire", Expense)
                .with_subcategories(&[
                    ("veto-vaccins", "Vaccins"),
                    ("veto-vermifuges", "Vermifuges"),
                    ("veto-dentiste", "Dentiste"),
                    ("veto-osteo", "Ostéopathe"),
                    ("veto-urgence", "Urgence"),
                ])
                .with_color("#C53030"),
            BudgetCategory::new("marechalerie", "Maréchalerie", Expense)
                .with_subcategories(&[("ferrure", "Ferrure"), ("parage", "Parage")])
                .with_color("#744210"),
            BudgetCategory::new("alimentation", "Alimentation", Expense)
                .with_subcategories(&[
                    ("foin", "Foin"),
                    ("granules", "Granulés"),
                    ("complements", "Compléments"),
                ])
                .with_color("#B7791F"),
            BudgetCategory::new("equipement", "Équipement", Expense)
                .with_subcategories(&[("sellerie", "Sellerie"), ("couvertures", "Couvertures")])
                .with_color("#2B6CB0"),
            BudgetCategory::new("concours", "Concours", Expense)
                .with_subcategories(&[("engagements", "Engagements"), ("deplacements", "Déplacements")])
                .with_color("#6B46C1"),
            BudgetCategory::new("assurance", "Assurance", Expense).with_color("#4A5568"),
            BudgetCategory::new("transport", "Transport", Expense).with_color("#2C7A7B"),
            BudgetCategory::new("gains", "Gains", Income).with_color("#38A169"),
            BudgetCategory::new("ventes", "Ventes", Income).with_color("#38A169"),
            BudgetCategory::new("demi-pension", "Demi-pension", Income).with_color("#38A169"),
        ];

        CategoryRegistry { categories }
    }

    pub fn register(&mut self, category: BudgetCategory) {
        self.categories.retain(|c| c.id != category.id);
        self.categories.push(category);
    }

    pub fn find_by_id(&self, id: &str) -> Option<&BudgetCategory> {
        self.categories.iter().find(|c| c.id == id)
    }

    /// Case-insensitive lookup
    pub fn find_by_name(&self, name: &str) -> Option<&BudgetCategory> {
        self.categories
            .iter()
            .find(|c| c.name.to_lowercase() == name.to_lowercase())
    }

    /// "Vétérinaire › Vaccins", or the raw id when unknown
    pub fn label_for(&self, category_id: &str, subcategory_id: Option<&str>) -> String {
        match self.find_by_id(category_id) {
            Some(category) => match subcategory_id.and_then(|s| category.subcategory(s)) {
                Some(sub) => format!("{} › {}", category.name, sub.name),
                None => category.name.clone(),
            },
            None => category_id.to_string(),
        }
    }

    pub fn by_kind(&self, kind: CategoryKind) -> Vec<&BudgetCategory> {
        self.categories.iter().filter(|c| c.kind == kind).collect()
    }

    pub fn all(&self) -> &[BudgetCategory] {
        &self.categories
    }

    pub fn count(&self) -> usize {
        self.categories.len()
    }
}
