//! Locating a literal value inside parsed SQL.
//!
//! Statements are parsed with the PostgreSQL dialect. For `SELECT`,
//! `UPDATE` and `DELETE` the locator looks for comparisons in the filter
//! clause where one side is a column and the other a literal equal to the
//! value; `UPDATE` assignments are checked after the filter. For `INSERT`
//! the value is matched positionally against the declared column list.
//! Subqueries are searched too and report [`Action::Select`].

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlparser::ast::{
    AssignmentTarget, BinaryOperator, Delete, Expr, FromTable, FunctionArg, FunctionArgExpr,
    FunctionArguments, Ident, Insert, ObjectName, Query, Select, SetExpr, Statement,
    TableFactor, TableWithJoins, UnaryOperator, Value,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::error::LocateError;

/// What a statement does to the table a value landed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Select,
    Insert,
    Update,
    Delete,
    Other,
}

impl Action {
    /// Classify a parsed statement.
    pub fn of(statement: &Statement) -> Self {
        match statement {
            Statement::Query(_) => Action::Select,
            Statement::Insert(_) => Action::Insert,
            Statement::Update { .. } => Action::Update,
            Statement::Delete(_) => Action::Delete,
            _ => Action::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Select => "select",
            Action::Insert => "insert",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Other => "other",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A table column a value was found in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Site {
    pub table: String,
    pub column: String,
    pub action: Action,
}

/// Parse statement text.
pub fn parse(query: &str) -> Result<Vec<Statement>, LocateError> {
    Parser::parse_sql(&PostgreSqlDialect {}, query).map_err(|e| LocateError::Library(e.to_string()))
}

/// Every column `value` lands in across `statements`, in discovery order.
pub fn locate(statements: &[Statement], value: &str) -> Result<Vec<Site>, LocateError> {
    let mut locator = Locator {
        value,
        sites: Vec::new(),
    };
    for statement in statements {
        locator.statement(statement)?;
    }
    Ok(locator.sites)
}

// ============================================================================
// Table scope
// ============================================================================

#[derive(Debug, Clone)]
struct TableRef {
    name: String,
    alias: Option<String>,
}

/// Tables visible to a filter expression, innermost first.
#[derive(Debug, Clone, Default)]
struct Scope {
    tables: Vec<TableRef>,
}

impl Scope {
    fn add(&mut self, twj: &TableWithJoins) {
        self.add_factor(&twj.relation);
        for join in &twj.joins {
            self.add_factor(&join.relation);
        }
    }

    fn add_factor(&mut self, factor: &TableFactor) {
        if let TableFactor::Table { name, alias, .. } = factor {
            self.tables.push(TableRef {
                name: object_name(name),
                alias: alias.as_ref().map(|a| a.name.value.clone()),
            });
        }
    }

    /// Inherit the enclosing query's tables behind this one's.
    fn within(mut self, outer: &Scope) -> Self {
        self.tables.extend(outer.tables.iter().cloned());
        self
    }

    fn resolve(&self, qualifier: Option<&str>) -> String {
        match qualifier {
            None => self
                .tables
                .first()
                .map(|t| t.name.clone())
                .unwrap_or_default(),
            Some(q) => self
                .tables
                .iter()
                .find(|t| {
                    t.alias.as_deref() == Some(q)
                        || t.name == q
                        || t.name.rsplit('.').next() == Some(q)
                })
                .map(|t| t.name.clone())
                .unwrap_or_else(|| q.to_string()),
        }
    }
}

// ============================================================================
// Walker
// ============================================================================

struct Locator<'a> {
    value: &'a str,
    sites: Vec<Site>,
}

impl Locator<'_> {
    fn statement(&mut self, statement: &Statement) -> Result<(), LocateError> {
        match statement {
            Statement::Query(query) => self.query(query, &Scope::default()),
            Statement::Insert(insert) => self.insert(insert)?,
            Statement::Update {
                table,
                assignments,
                selection,
                ..
            } => {
                let mut scope = Scope::default();
                scope.add(table);
                if let Some(selection) = selection {
                    self.expr(selection, &scope, Action::Update);
                }
                for assignment in assignments {
                    if self.matches(&assignment.value) {
                        if let AssignmentTarget::ColumnName(name) = &assignment.target {
                            let (qualifier, column) = split_name(&name.0);
                            self.push(
                                scope.resolve(qualifier.as_deref()),
                                column,
                                Action::Update,
                            );
                        }
                    }
                    self.expr(&assignment.value, &scope, Action::Update);
                }
            }
            Statement::Delete(delete) => self.delete(delete),
            _ => {}
        }
        Ok(())
    }

    fn insert(&mut self, insert: &Insert) -> Result<(), LocateError> {
        let table = object_name(&insert.table_name);
        let Some(source) = &insert.source else {
            return Ok(());
        };

        let SetExpr::Values(values) = source.body.as_ref() else {
            self.query(source, &Scope::default());
            return Ok(());
        };

        for row in &values.rows {
            for (index, expr) in row.iter().enumerate() {
                if !self.matches(expr) {
                    self.expr(expr, &Scope::default(), Action::Insert);
                    continue;
                }
                if insert.columns.is_empty() {
                    return Err(LocateError::InsertWithoutColumns { table });
                }
                let column = insert
                    .columns
                    .get(index)
                    .ok_or_else(|| LocateError::ColumnIndex {
                        table: table.clone(),
                        index,
                        columns: insert.columns.len(),
                    })?;
                self.push(table.clone(), column.value.clone(), Action::Insert);
            }
        }
        Ok(())
    }

    fn delete(&mut self, delete: &Delete) {
        let mut scope = Scope::default();
        let from = match &delete.from {
            FromTable::WithFromKeyword(tables) | FromTable::WithoutKeyword(tables) => tables,
        };
        for twj in from {
            scope.add(twj);
        }
        if let Some(using) = &delete.using {
            for twj in using {
                scope.add(twj);
            }
        }
        if let Some(selection) = &delete.selection {
            self.expr(selection, &scope, Action::Delete);
        }
    }

    fn query(&mut self, query: &Query, outer: &Scope) {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.query(&cte.query, outer);
            }
        }
        self.set_expr(&query.body, outer);
    }

    fn set_expr(&mut self, body: &SetExpr, outer: &Scope) {
        match body {
            SetExpr::Select(select) => self.select(select, outer),
            SetExpr::Query(query) => self.query(query, outer),
            SetExpr::SetOperation { left, right, .. } => {
                self.set_expr(left, outer);
                self.set_expr(right, outer);
            }
            _ => {}
        }
    }

    fn select(&mut self, select: &Select, outer: &Scope) {
        let mut scope = Scope::default();
        for twj in &select.from {
            scope.add(twj);
            let factors = std::iter::once(&twj.relation).chain(twj.joins.iter().map(|j| &j.relation));
            for factor in factors {
                if let TableFactor::Derived { subquery, .. } = factor {
                    self.query(subquery, outer);
                }
            }
        }
        let scope = scope.within(outer);

        if let Some(selection) = &select.selection {
            self.expr(selection, &scope, Action::Select);
        }
        if let Some(having) = &select.having {
            self.expr(having, &scope, Action::Select);
        }
    }

    fn expr(&mut self, expr: &Expr, scope: &Scope, action: Action) {
        match expr {
            Expr::BinaryOp { left, op, right } => {
                if is_comparison(op) {
                    if self.matches(right) {
                        self.column(left, scope, action);
                    }
                    if self.matches(left) {
                        self.column(right, scope, action);
                    }
                }
                self.expr(left, scope, action);
                self.expr(right, scope, action);
            }
            Expr::InList { expr, list, .. } => {
                if list.iter().any(|e| self.matches(e)) {
                    self.column(expr, scope, action);
                }
            }
            Expr::InSubquery { expr, subquery, .. } => {
                self.expr(expr, scope, action);
                self.query(subquery, scope);
            }
            Expr::Between {
                expr, low, high, ..
            } => {
                if self.matches(low) || self.matches(high) {
                    self.column(expr, scope, action);
                }
            }
            Expr::Like { expr, pattern, .. } | Expr::ILike { expr, pattern, .. } => {
                if literal(pattern).is_some_and(|p| p.contains(self.value)) {
                    self.column(expr, scope, action);
                }
            }
            Expr::Nested(inner) | Expr::UnaryOp { expr: inner, .. } => {
                self.expr(inner, scope, action);
            }
            Expr::Subquery(query) | Expr::Exists { subquery: query, .. } => {
                self.query(query, scope);
            }
            _ => {}
        }
    }

    fn column(&mut self, expr: &Expr, scope: &Scope, action: Action) {
        if let Some((qualifier, column)) = column_ref(expr) {
            self.push(scope.resolve(qualifier.as_deref()), column, action);
        }
    }

    fn matches(&self, expr: &Expr) -> bool {
        literal(expr).is_some_and(|v| v == self.value)
    }

    fn push(&mut self, table: String, column: String, action: Action) {
        let site = Site {
            table,
            column,
            action,
        };
        if !self.sites.contains(&site) {
            self.sites.push(site);
        }
    }
}

fn is_comparison(op: &BinaryOperator) -> bool {
    matches!(
        op,
        BinaryOperator::Eq
            | BinaryOperator::NotEq
            | BinaryOperator::Gt
            | BinaryOperator::Lt
            | BinaryOperator::GtEq
            | BinaryOperator::LtEq
    )
}

/// Text of a literal, as the application supplied it.
fn literal(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Value(value) => match value {
            Value::Number(n, _) => Some(n.clone()),
            Value::SingleQuotedString(s)
            | Value::EscapedStringLiteral(s)
            | Value::DoubleQuotedString(s)
            | Value::NationalStringLiteral(s) => Some(s.clone()),
            Value::Boolean(b) => Some(b.to_string()),
            _ => None,
        },
        Expr::Nested(inner) | Expr::Cast { expr: inner, .. } => literal(inner),
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => literal(expr).map(|n| format!("-{}", n)),
        _ => None,
    }
}

/// `(qualifier, column)` of a column reference, looking through casts,
/// parentheses and single-argument function calls such as `lower(name)`.
fn column_ref(expr: &Expr) -> Option<(Option<String>, String)> {
    match expr {
        Expr::Identifier(ident) => Some((None, ident.value.clone())),
        Expr::CompoundIdentifier(idents) if !idents.is_empty() => {
            let (qualifier, column) = split_name(idents);
            Some((qualifier, column))
        }
        Expr::Nested(inner) | Expr::Cast { expr: inner, .. } => column_ref(inner),
        Expr::Function(function) => match &function.args {
            FunctionArguments::List(list) => match list.args.first() {
                Some(FunctionArg::Unnamed(FunctionArgExpr::Expr(inner))) => column_ref(inner),
                _ => None,
            },
            _ => None,
        },
        _ => None,
    }
}

fn split_name(idents: &[Ident]) -> (Option<String>, String) {
    match idents.split_last() {
        Some((column, [])) => (None, column.value.clone()),
        Some((column, qualifier)) => (Some(join_idents(qualifier)), column.value.clone()),
        None => (None, String::new()),
    }
}

fn object_name(name: &ObjectName) -> String {
    join_idents(&name.0)
}

fn join_idents(idents: &[Ident]) -> String {
    idents
        .iter()
        .map(|i| i.value.as_str())
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sites(sql: &str, value: &str) -> Vec<Site> {
        locate(&parse(sql).unwrap(), value).unwrap()
    }

    fn only(sql: &str, value: &str) -> (String, String, Action) {
        let found = sites(sql, value);
        assert_eq!(found.len(), 1, "{sql}: {found:?}");
        let site = found.into_iter().next().unwrap();
        (site.table, site.column, site.action)
    }

    fn tc(table: &str, column: &str, action: Action) -> (String, String, Action) {
        (table.to_string(), column.to_string(), action)
    }

    #[test]
    fn test_select() {
        assert_eq!(
            only("SELECT * FROM mytable WHERE city = 'sunnyvale';", "sunnyvale"),
            tc("mytable", "city", Action::Select)
        );
        assert!(sites("SELECT * FROM mytable WHERE city = 'sunnyvale';", "nonexistent").is_empty());
    }

    #[test]
    fn test_formatting_variants() {
        for sql in [
            "SELECT * FROM mytable WHERE city = 'sunnyvale';\n",
            "SELECT * FROM mytable WHERE city = 'sunnyvale'\n;",
            "SELECT * FROM mytable WHERE 'sunnyvale' = city",
        ] {
            assert_eq!(only(sql, "sunnyvale"), tc("mytable", "city", Action::Select));
        }
    }

    #[test]
    fn test_integer_comparison() {
        assert_eq!(
            only("SELECT * FROM mytable WHERE temp = 60;", "60"),
            tc("mytable", "temp", Action::Select)
        );
    }

    #[test]
    fn test_insert_one_and_many_rows() {
        assert_eq!(
            only("insert into cities (name, temp) values ('san jose', 67);", "san jose"),
            tc("cities", "name", Action::Insert)
        );
        assert_eq!(
            only(
                "insert into cities (name, temp) values ('san jose', 67), ('sunnyvale', 60), ('palo alto', 58);",
                "sunnyvale"
            ),
            tc("cities", "name", Action::Insert)
        );
        assert_eq!(
            only("insert into cities (name, temp) values ('san jose', 67);", "67"),
            tc("cities", "temp", Action::Insert)
        );
    }

    #[test]
    fn test_insert_without_columns_is_fatal() {
        let statements = parse("insert into cities values ('san jose', 67);").unwrap();
        let err = locate(&statements, "san jose").unwrap_err();
        assert_eq!(
            err,
            LocateError::InsertWithoutColumns {
                table: "cities".to_string()
            }
        );
        assert!(err.is_fatal());
    }

    #[test]
    fn test_insert_value_beyond_columns() {
        let statements = parse("insert into cities (name) values ('a', 'b');").unwrap();
        let err = locate(&statements, "b").unwrap_err();
        assert!(matches!(err, LocateError::ColumnIndex { index: 1, columns: 1, .. }));
    }

    #[test]
    fn test_update() {
        assert_eq!(
            only("update cities set temp = 30 where name = 'sunnyvale'", "sunnyvale"),
            tc("cities", "name", Action::Update)
        );
        assert_eq!(
            only(
                "update cities set temp = 30, state = 'california'  where name = 'sunnyvale'",
                "sunnyvale"
            ),
            tc("cities", "name", Action::Update)
        );
        assert_eq!(
            only(
                "update cities set temp = 30, state = 'california'  where name > 'sunnyvale'",
                "sunnyvale"
            ),
            tc("cities", "name", Action::Update)
        );
    }

    #[test]
    fn test_update_assignment() {
        assert_eq!(
            only("update cities set state = 'california' where name = 'x'", "california"),
            tc("cities", "state", Action::Update)
        );
    }

    #[test]
    fn test_filter_before_assignment() {
        let found = sites("update cities set name = 'a' where name = 'a'", "a");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].column, "name");
    }

    #[test]
    fn test_delete() {
        assert_eq!(
            only("delete from cities where name = 'sunnyvale'", "sunnyvale"),
            tc("cities", "name", Action::Delete)
        );
    }

    #[test]
    fn test_update_with_nested_select() {
        assert_eq!(
            only(
                "UPDATE cities SET temp = 30 WHERE name IN (SELECT name FROM cities WHERE name = 'sunnyvale');",
                "sunnyvale"
            ),
            tc("cities", "name", Action::Select)
        );
    }

    #[test]
    fn test_in_list() {
        assert_eq!(
            only(
                "select name, temp from cities where name in ('palo alto', 'marin', 'sunnyvale');",
                "sunnyvale"
            ),
            tc("cities", "name", Action::Select)
        );
    }

    #[test]
    fn test_qualified_columns_and_and() {
        let sql = "SELECT  categories.* FROM categories WHERE categories.slug = '6977725094619810439' AND \
                   categories.parent_category_id IS NULL ORDER BY categories.id ASC LIMIT 1";
        assert_eq!(
            only(sql, "6977725094619810439"),
            tc("categories", "slug", Action::Select)
        );
    }

    #[test]
    fn test_alias_resolution() {
        let sql = "SELECT u.id FROM users u JOIN posts p ON p.user_id = u.id WHERE p.title = 'hello'";
        assert_eq!(only(sql, "hello"), tc("posts", "title", Action::Select));
    }

    #[test]
    fn test_function_argument_is_not_a_finding() {
        let sql = "SELECT pg_catalog.setval('public.categories_id_seq', 4, true);";
        assert!(sites(sql, "true").is_empty());
    }

    #[test]
    fn test_lowered_column() {
        assert_eq!(
            only("SELECT * FROM users WHERE lower(email) = 'a@b.c'", "a@b.c"),
            tc("users", "email", Action::Select)
        );
    }

    #[test]
    fn test_ddl_yields_nothing() {
        let sql = "CREATE TABLE cities (name varchar(80), temp int);";
        assert!(sites(sql, "cities").is_empty());
    }

    #[test]
    fn test_unparseable_statement() {
        let err = parse("SELEC * FRM nowhere").unwrap_err();
        assert!(matches!(err, LocateError::Library(_)));
    }

    #[test]
    fn test_action_classification() {
        let statements = parse("DELETE FROM a WHERE b = 1; SELECT 1; CREATE TABLE t (x int)").unwrap();
        let actions: Vec<Action> = statements.iter().map(Action::of).collect();
        assert_eq!(actions, vec![Action::Delete, Action::Select, Action::Other]);
    }
}
