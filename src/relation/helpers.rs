//! Helper functions for building relation statements.

use sea_query::Expr;

/// Quote an identifier for PostgreSQL (`"name"`, embedded quotes doubled)
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Join condition `from_table.from_column = to_table.to_column`
///
/// Used for the junction-table join of through associations. Identifiers are quoted, so table
/// and column names taken from schema declarations are safe to pass.
///
/// # Example
///
/// ```
/// use linkmany::relation::helpers::join_condition;
/// use sea_query::{Alias, Asterisk, JoinType, PostgresQueryBuilder, Query};
///
/// let sql = Query::select()
///     .column((Alias::new("tag"), Asterisk))
///     .from(Alias::new("tag"))
///     .join(
///         JoinType::InnerJoin,
///         Alias::new("post_tag"),
///         join_condition("post_tag", "tag_id", "tag", "id"),
///     )
///     .to_string(PostgresQueryBuilder);
/// assert!(sql.contains(r#""post_tag"."tag_id" = "tag"."id""#));
/// ```
pub fn join_condition(
    from_table: &str,
    from_column: &str,
    to_table: &str,
    to_column: &str,
) -> Expr {
    // sea-query has no column-to-column equality builder for dynamic names
    Expr::cust(format!(
        "{}.{} = {}.{}",
        quote_ident(from_table),
        quote_ident(from_column),
        quote_ident(to_table),
        quote_ident(to_column)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_query::{Alias, ConditionalStatement, PostgresQueryBuilder, Query};

    #[test]
    fn test_join_condition_renders_qualified_columns() {
        let sql = Query::select()
            .column(Alias::new("id"))
            .from(Alias::new("tag"))
            .and_where(join_condition("post_tag", "tag_id", "tag", "id"))
            .to_string(PostgresQueryBuilder);
        assert!(sql.contains(r#""post_tag"."tag_id" = "tag"."id""#), "{sql}");
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("post"), "\"post\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
