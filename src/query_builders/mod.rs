// src/query_builders/mod.rs
//! Parameterised SELECT / COUNT builders for the list endpoints.
//!
//! Values always travel as `?` parameters. Column names used for filters and
//! sorting are checked against a per-table whitelist.

use std::collections::HashSet;

// ==================== WHITELIST ====================

#[derive(Debug, Clone)]
pub struct FieldWhitelist {
    allowed_fields: HashSet<&'static str>,
}

impl FieldWhitelist {
    pub fn new(fields: &[&'static str]) -> Self {
        Self {
            allowed_fields: fields.iter().copied().collect(),
        }
    }

    pub fn for_medicines() -> Self {
        Self::new(&[
            "id", "name", "generic_name", "dosage", "form", "category", "min_stock",
            "created_at", "updated_at",
        ])
    }

    pub fn for_batches() -> Self {
        Self::new(&[
            "b.id", "b.medicine_id", "b.batch_number", "b.quantity", "b.purchase_price",
            "b.sell_price", "b.expiry_date", "b.received_date", "b.supplier_id",
            "b.created_at", "m.name",
        ])
    }

    pub fn for_suppliers() -> Self {
        Self::new(&["id", "name", "contact", "email", "created_at"])
    }

    pub fn for_sales() -> Self {
        Self::new(&["id", "sale_number", "date", "customer_name", "payment_method", "status", "total"])
    }

    pub fn for_orders() -> Self {
        Self::new(&["id", "order_number", "supplier_id", "supplier_name", "date", "status", "total"])
    }

    pub fn is_allowed(&self, field: &str) -> bool {
        self.allowed_fields.contains(field)
    }
}

fn is_safe_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// `%` and `_` are literal in user search text.
pub fn escape_like_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

// ==================== CONDITIONS ====================

#[derive(Debug, Default, Clone)]
struct Conditions {
    clauses: Vec<String>,
    params: Vec<String>,
}

impl Conditions {
    fn push(&mut self, clause: String, params: impl IntoIterator<Item = String>) {
        self.clauses.push(clause);
        self.params.extend(params);
    }

    fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }
}

// ==================== SAFE QUERY BUILDER ====================

/// Builds `SELECT <columns> FROM <from> [WHERE ...] [ORDER BY ...] [LIMIT/OFFSET]`
/// and the matching `SELECT COUNT(*)`.
pub struct SafeQueryBuilder<'a> {
    columns: &'a str,
    from: &'a str,
    whitelist: &'a FieldWhitelist,
    conditions: Conditions,
    order_by: Vec<(String, &'static str)>,
    limit: Option<i64>,
    offset: Option<i64>,
}

impl<'a> SafeQueryBuilder<'a> {
    pub fn new(columns: &'a str, from: &'a str, whitelist: &'a FieldWhitelist) -> Self {
        Self {
            columns,
            from,
            whitelist,
            conditions: Conditions::default(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    fn is_field_allowed(&self, field: &str) -> bool {
        is_safe_identifier(field) && self.whitelist.is_allowed(field)
    }

    pub fn add_exact_match(&mut self, field: &str, value: impl Into<String>) -> &mut Self {
        if self.is_field_allowed(field) {
            self.conditions.push(format!("{} = ?", field), [value.into()]);
        } else {
            log::warn!("Ignoring filter on non-whitelisted field '{}'", field);
        }
        self
    }

    /// OR-combined LIKE search across several columns. Blank input is a no-op.
    pub fn add_search(&mut self, fields: &[&str], term: &str) -> &mut Self {
        let term = term.trim();
        if term.is_empty() {
            return self;
        }

        let allowed: Vec<&str> = fields
            .iter()
            .copied()
            .filter(|f| self.is_field_allowed(f))
            .collect();
        if allowed.is_empty() {
            return self;
        }

        let pattern = format!("%{}%", escape_like_value(term));
        let clause = allowed
            .iter()
            .map(|f| format!("{} LIKE ? ESCAPE '\\'", f))
            .collect::<Vec<_>>()
            .join(" OR ");
        self.conditions.push(
            format!("({})", clause),
            allowed.iter().map(|_| pattern.clone()),
        );
        self
    }

    pub fn order_by(&mut self, field: &str, direction: &str) -> &mut Self {
        if self.is_field_allowed(field) {
            let dir = if direction.eq_ignore_ascii_case("DESC") { "DESC" } else { "ASC" };
            self.order_by.push((field.to_string(), dir));
        }
        self
    }

    pub fn paginate(&mut self, limit: i64, offset: i64) -> &mut Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }

    pub fn build(&self) -> (String, Vec<String>) {
        let mut sql = format!("SELECT {} FROM {}{}", self.columns, self.from, self.conditions.where_sql());

        if !self.order_by.is_empty() {
            let order = self
                .order_by
                .iter()
                .map(|(f, d)| format!("{} {}", f, d))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" ORDER BY {}", order));
        }

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        (sql, self.conditions.params.clone())
    }

    pub fn build_count(&self) -> (String, Vec<String>) {
        (
            format!("SELECT COUNT(*) FROM {}{}", self.from, self.conditions.where_sql()),
            self.conditions.params.clone(),
        )
    }
}

// ==================== TESTS ====================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_and_sort() {
        let whitelist = FieldWhitelist::for_medicines();
        let mut builder = SafeQueryBuilder::new("*", "medicines", &whitelist);
        builder
            .add_search(&["name", "generic_name"], "para")
            .add_exact_match("category", "analgesic")
            .order_by("name", "asc")
            .paginate(20, 40);

        let (sql, params) = builder.build();
        assert_eq!(
            sql,
            "SELECT * FROM medicines WHERE (name LIKE ? ESCAPE '\\' OR generic_name LIKE ? ESCAPE '\\') \
             AND category = ? ORDER BY name ASC LIMIT 20 OFFSET 40"
        );
        assert_eq!(params, vec!["%para%", "%para%", "analgesic"]);

        let (count_sql, count_params) = builder.build_count();
        assert!(count_sql.starts_with("SELECT COUNT(*) FROM medicines WHERE"));
        assert_eq!(count_params.len(), 3);
    }

    #[test]
    fn test_unknown_fields_are_dropped() {
        let whitelist = FieldWhitelist::for_suppliers();
        let mut builder = SafeQueryBuilder::new("*", "suppliers", &whitelist);
        builder
            .add_exact_match("name; DROP TABLE suppliers", "x")
            .order_by("password", "DESC")
            .add_search(&["name"], "   ");

        let (sql, params) = builder.build();
        assert_eq!(sql, "SELECT * FROM suppliers");
        assert!(params.is_empty());
    }

    #[test]
    fn test_like_escaping() {
        assert_eq!(escape_like_value("50%_off"), "50\\%\\_off");
    }
}
