//! Filter builder for [`super::DatabaseHandler::query`] and [`super::DatabaseHandler::delete`].

use super::backend::{Dialect, SqlParam};
use super::orm::{ColumnDef, ColumnType, TableMapping};
use crate::error::{EtlError, EtlResult};
use crate::types::Value;

/// How predicates are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    /// Every row; takes no predicates.
    All,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    Eq { column: String, value: Value },
    Like { column: String, text: String },
    IsNull { column: String },
}

/// A `WHERE`/`ORDER BY`/`LIMIT` description, validated against a [`TableMapping`] when run.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    condition: Condition,
    predicates: Vec<Predicate>,
    text_matching: bool,
    order_by: Vec<(String, bool)>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl Query {
    fn with_condition(condition: Condition) -> Self {
        Self {
            condition,
            predicates: Vec::new(),
            text_matching: false,
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn all() -> Self {
        Self::with_condition(Condition::All)
    }

    pub fn and() -> Self {
        Self::with_condition(Condition::And)
    }

    pub fn or() -> Self {
        Self::with_condition(Condition::Or)
    }

    /// `column = value`; a null value becomes `column IS NULL`.
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        let column = column.into();
        let predicate = match value.into() {
            Value::Null => Predicate::IsNull { column },
            value => Predicate::Eq { column, value },
        };
        self.predicates.push(predicate);
        self
    }

    /// One equality per value.
    pub fn eq_any<V: Into<Value>>(
        mut self,
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let column = column.into();
        for value in values {
            self = self.eq(column.clone(), value);
        }
        self
    }

    /// Case-insensitive substring match. Non-ASCII characters match any single character.
    pub fn like(mut self, column: impl Into<String>, text: impl Into<String>) -> Self {
        self.predicates.push(Predicate::Like {
            column: column.into(),
            text: text.into(),
        });
        self
    }

    pub fn is_null(mut self, column: impl Into<String>) -> Self {
        self.predicates.push(Predicate::IsNull {
            column: column.into(),
        });
        self
    }

    /// Add a [`Query::like`] predicate next to every equality on a text column.
    pub fn with_text_matching(mut self, enabled: bool) -> Self {
        self.text_matching = enabled;
        self
    }

    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order_by.push((column.into(), false));
        self
    }

    pub fn order_by_desc(mut self, column: impl Into<String>) -> Self {
        self.order_by.push((column.into(), true));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn condition(&self) -> Condition {
        self.condition
    }

    /// `true` when the query orders, limits or offsets its rows.
    pub fn is_windowed(&self) -> bool {
        !self.order_by.is_empty() || self.limit.is_some() || self.offset.is_some()
    }

    /// Render the clauses following `FROM <table>`, with parameters numbered from
    /// `first_param`.
    pub fn to_sql(
        &self,
        mapping: &TableMapping,
        dialect: Dialect,
        first_param: usize,
    ) -> EtlResult<(String, Vec<SqlParam>)> {
        let mut params = Vec::new();
        let mut terms = Vec::new();

        match (self.condition, self.predicates.is_empty()) {
            (Condition::All, false) => {
                return Err(EtlError::configuration(
                    "a query over all rows takes no conditions",
                ));
            }
            (Condition::And | Condition::Or, true) => {
                return Err(EtlError::configuration(format!(
                    "no conditions provided for a {:?} query on {}",
                    self.condition,
                    mapping.qualified_name()
                )));
            }
            _ => {}
        }

        for predicate in &self.predicates {
            match predicate {
                Predicate::Eq { column, value } => {
                    let col = resolve_column(mapping, column)?;
                    if let ColumnType::Geometry { .. } = col.column_type {
                        return Err(EtlError::configuration(format!(
                            "equality on geometry column '{column}' is not supported"
                        )));
                    }
                    params.push(SqlParam::new(value.clone(), col.column_type));
                    terms.push(format!(
                        "{} = {}",
                        dialect.quote_ident(column),
                        dialect.placeholder(first_param + params.len() - 1, &col.column_type)
                    ));
                    if self.text_matching && col.column_type.is_text() {
                        if let Some(text) = value.as_str().filter(|t| *t != "%") {
                            terms.push(like_term(col, text, dialect, first_param, &mut params));
                        }
                    }
                }
                Predicate::Like { column, text } => {
                    let col = resolve_column(mapping, column)?;
                    terms.push(like_term(col, text, dialect, first_param, &mut params));
                }
                Predicate::IsNull { column } => {
                    resolve_column(mapping, column)?;
                    terms.push(format!("{} IS NULL", dialect.quote_ident(column)));
                }
            }
        }

        let mut sql = String::new();
        if !terms.is_empty() {
            let joiner = match self.condition {
                Condition::Or => " OR ",
                _ => " AND ",
            };
            sql.push_str(" WHERE ");
            sql.push_str(&terms.join(joiner));
        }

        if !self.order_by.is_empty() {
            let mut keys = Vec::with_capacity(self.order_by.len());
            for (column, desc) in &self.order_by {
                resolve_column(mapping, column)?;
                let direction = if *desc { "DESC" } else { "ASC" };
                keys.push(format!("{} {direction}", dialect.quote_ident(column)));
            }
            sql.push_str(" ORDER BY ");
            sql.push_str(&keys.join(", "));
        }

        sql.push_str(&dialect.limit_clause(self.limit, self.offset));
        Ok((sql, params))
    }
}

fn resolve_column<'a>(mapping: &'a TableMapping, column: &str) -> EtlResult<&'a ColumnDef> {
    mapping.column(column).ok_or_else(|| {
        EtlError::configuration(format!(
            "column '{column}' is not mapped on {}",
            mapping.qualified_name()
        ))
    })
}

fn like_term(
    col: &ColumnDef,
    text: &str,
    dialect: Dialect,
    first_param: usize,
    params: &mut Vec<SqlParam>,
) -> String {
    params.push(SqlParam::new(Value::Utf8(like_pattern(text)), ColumnType::Text));
    format!(
        "LOWER(CAST({} AS TEXT)) LIKE {}",
        dialect.quote_ident(&col.name),
        dialect.placeholder(first_param + params.len() - 1, &ColumnType::Text)
    )
}

/// `%text%`, lower-cased, with non-ASCII characters replaced by `_`.
fn like_pattern(text: &str) -> String {
    if text == "%" {
        return text.to_string();
    }
    let normalized: String = text
        .chars()
        .map(|c| if c.is_ascii() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    format!("%{normalized}%")
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{like_pattern, Query};
    use crate::database::backend::Dialect;
    use crate::database::orm::{ColumnDef, ColumnType, TableMapping};
    use crate::error::EtlError;
    use crate::types::Value;

    fn mapping() -> TableMapping {
        TableMapping::new(
            "stations",
            vec![
                ColumnDef::new("id", ColumnType::Integer).primary_key().identity(),
                ColumnDef::new("name", ColumnType::Text),
                ColumnDef::new("geom", ColumnType::Geometry { srid: 4326 }),
            ],
        )
    }

    #[rstest]
    #[case("Montréal", "%montr_al%")]
    #[case("ALERT", "%alert%")]
    #[case("%", "%")]
    fn like_patterns(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(like_pattern(input), expected);
    }

    #[test]
    fn or_query_with_text_matching() {
        let (sql, params) = Query::or()
            .eq("name", "Alert")
            .eq("id", 3_i64)
            .with_text_matching(true)
            .order_by_desc("id")
            .limit(10)
            .to_sql(&mapping(), Dialect::Postgres, 1)
            .unwrap();
        assert_eq!(
            sql,
            " WHERE \"name\" = $1::text OR LOWER(CAST(\"name\" AS TEXT)) LIKE $2::text \
             OR \"id\" = $3::int8 ORDER BY \"id\" DESC LIMIT 10"
        );
        assert_eq!(params.len(), 3);
        assert_eq!(params[1].value, Value::Utf8("%alert%".to_string()));
    }

    #[test]
    fn null_equality_becomes_is_null() {
        let (sql, params) = Query::and()
            .eq("name", Value::Null)
            .to_sql(&mapping(), Dialect::Sqlite, 1)
            .unwrap();
        assert_eq!(sql, " WHERE \"name\" IS NULL");
        assert!(params.is_empty());
    }

    #[test]
    fn eq_any_adds_one_equality_per_value() {
        let (sql, _) = Query::or()
            .eq_any("id", [1_i64, 2, 3])
            .offset(4)
            .to_sql(&mapping(), Dialect::Sqlite, 1)
            .unwrap();
        assert_eq!(
            sql,
            " WHERE \"id\" = ?1 OR \"id\" = ?2 OR \"id\" = ?3 LIMIT -1 OFFSET 4"
        );
    }

    #[rstest]
    #[case(Query::and())]
    #[case(Query::or())]
    #[case(Query::all().eq("id", 1_i64))]
    #[case(Query::and().eq("unknown", 1_i64))]
    #[case(Query::and().is_null("id").order_by("unknown"))]
    fn invalid_queries_are_configuration_errors(#[case] query: Query) {
        let err = query.to_sql(&mapping(), Dialect::Postgres, 1).unwrap_err();
        assert!(matches!(err, EtlError::Configuration { .. }), "{err:?}");
    }

    #[test]
    fn all_renders_no_where_clause() {
        let (sql, params) = Query::all().to_sql(&mapping(), Dialect::Postgres, 1).unwrap();
        assert_eq!(sql, "");
        assert!(params.is_empty());
    }
}
