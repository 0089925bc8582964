//! Cache key builders and invalidation tags used by call sites.

use chrono::NaiveDate;

/// Invalidation tags.
pub mod tags {
    pub const MENU: &str = "menu";
    pub const RECIPES: &str = "recipes";
    pub const INVENTORY: &str = "inventory";
    pub const ORDERS: &str = "orders";
    pub const FINANCIAL: &str = "financial";
    pub const REPORTS: &str = "reports";
    pub const DASHBOARD: &str = "dashboard";
}

/// Dashboards are cached per role and day, e.g. `dashboard:admin:2024-01-15`.
pub fn dashboard_key(role: &str, date: NaiveDate) -> String {
    format!("dashboard:{}:{}", role, date)
}

/// Reports are cached per kind and period, e.g. `report:sales:2024-01`.
pub fn report_key(kind: &str, period: &str) -> String {
    format!("report:{}:{}", kind, period)
}

/// Single entities, e.g. `recipe:42`.
pub fn entity_key(kind: &str, id: i64) -> String {
    format!("{}:{}", kind, id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_formats() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        assert_eq!(dashboard_key("admin", date), "dashboard:admin:2024-01-15");
        assert_eq!(report_key("sales", "2024-01"), "report:sales:2024-01");
        assert_eq!(entity_key("recipe", 42), "recipe:42");
    }
}
