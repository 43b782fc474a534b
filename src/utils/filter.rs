use sqlx::MySql;
use sqlx::mysql::MySqlArguments;
use sqlx::query::{QueryAs, QueryScalar};

/// Typed value bound to a `?` placeholder of a dynamic WHERE clause.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    U64(u64),
    I64(i64),
    Str(String),
    Bool(bool),
}

impl From<u64> for FilterValue {
    fn from(v: u64) -> Self {
        FilterValue::U64(v)
    }
}

impl From<u8> for FilterValue {
    fn from(v: u8) -> Self {
        FilterValue::U64(v as u64)
    }
}

impl From<i32> for FilterValue {
    fn from(v: i32) -> Self {
        FilterValue::I64(v as i64)
    }
}

impl From<bool> for FilterValue {
    fn from(v: bool) -> Self {
        FilterValue::Bool(v)
    }
}

impl From<String> for FilterValue {
    fn from(v: String) -> Self {
        FilterValue::Str(v)
    }
}

impl From<&str> for FilterValue {
    fn from(v: &str) -> Self {
        FilterValue::Str(v.to_string())
    }
}

/// Conjunctive filter set. Clauses are static SQL fragments with one `?` each.
#[derive(Debug, Default)]
pub struct Filters {
    clauses: Vec<&'static str>,
    values: Vec<FilterValue>,
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, clause: &'static str, value: impl Into<FilterValue>) {
        self.clauses.push(clause);
        self.values.push(value.into());
    }

    /// Clause without a bound value, e.g. `expiry_date IS NULL`.
    pub fn push_raw(&mut self, clause: &'static str) {
        self.clauses.push(clause);
    }

    pub fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    pub fn bind_as<'q, O>(
        &self,
        mut q: QueryAs<'q, MySql, O, MySqlArguments>,
    ) -> QueryAs<'q, MySql, O, MySqlArguments> {
        for v in &self.values {
            q = match v.clone() {
                FilterValue::U64(v) => q.bind(v),
                FilterValue::I64(v) => q.bind(v),
                FilterValue::Str(v) => q.bind(v),
                FilterValue::Bool(v) => q.bind(v),
            };
        }
        q
    }

    pub fn bind_scalar<'q, O>(
        &self,
        mut q: QueryScalar<'q, MySql, O, MySqlArguments>,
    ) -> QueryScalar<'q, MySql, O, MySqlArguments> {
        for v in &self.values {
            q = match v.clone() {
                FilterValue::U64(v) => q.bind(v),
                FilterValue::I64(v) => q.bind(v),
                FilterValue::Str(v) => q.bind(v),
                FilterValue::Bool(v) => q.bind(v),
            };
        }
        q
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filters_render_nothing() {
        assert_eq!(Filters::new().where_sql(), "");
    }

    #[test]
    fn clauses_are_joined_with_and() {
        let mut f = Filters::new();
        f.push("f.class_id = ?", 7u64);
        f.push("f.academic_year = ?", "2024-2025");
        f.push_raw("f.is_active = TRUE");
        assert_eq!(
            f.where_sql(),
            " WHERE f.class_id = ? AND f.academic_year = ? AND f.is_active = TRUE"
        );
        assert_eq!(
            f.values,
            vec![FilterValue::U64(7), FilterValue::Str("2024-2025".to_string())]
        );
    }
}
