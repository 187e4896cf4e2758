// Entity models shared by the budget, health and training modules.
// Each entity has a stable string id; names and values may change.

pub mod account;
pub mod category;
pub mod horse;

pub use account::{Account, AccountKind};
pub use category::{BudgetCategory, CategoryKind, CategoryRegistry, Subcategory};
pub use horse::Horse;
