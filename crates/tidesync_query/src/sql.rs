//! Renders a [`QueryDescription`] to parameterized SQLite statements.

use crate::description::{OrderDirection, QueryDescription};
use crate::error::{QueryError, QueryResult};
use crate::ident::{format_member, format_table_name};
use crate::node::{BinaryOp, CastTarget, QueryFunction, QueryNode, UnaryOp};
use crate::system;
use crate::value::Value;

/// A rendered SQL statement with its named parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    /// The statement text.
    pub sql: String,
    /// `@pN` parameters in declaration order, still as semantic values; the
    /// store serializes them to storage representations when binding.
    pub parameters: Vec<(String, Value)>,
}

/// Renders SELECT / COUNT / DELETE statements for one query description.
pub struct SqlFormatter<'a> {
    query: &'a QueryDescription,
    sql: String,
    parameters: Vec<(String, Value)>,
}

impl<'a> SqlFormatter<'a> {
    /// Creates a formatter over `query`.
    pub fn new(query: &'a QueryDescription) -> Self {
        Self {
            query,
            sql: String::new(),
            parameters: Vec::new(),
        }
    }

    /// Renders the SELECT statement.
    pub fn format_select(mut self) -> QueryResult<SqlStatement> {
        let mut head = String::from("SELECT ");
        if self.query.selection.is_empty() {
            head.push('*');
        } else {
            let columns: QueryResult<Vec<String>> = self
                .query
                .selection
                .iter()
                .map(|c| format_member(c))
                .collect();
            head.push_str(&columns?.join(", "));
        }
        self.format_query(&head)?;
        Ok(self.finish())
    }

    /// Renders a `SELECT COUNT(1)` statement sharing the query's filter.
    pub fn format_select_count(mut self) -> QueryResult<SqlStatement> {
        let table_name = format_table_name(&self.query.table_name)?;
        self.sql = format!("SELECT COUNT(1) AS [count] FROM {table_name}");
        if let Some(filter) = &self.query.filter {
            self.format_where_clause(filter)?;
        }
        Ok(self.finish())
    }

    /// Renders a DELETE over the rows the query selects.
    ///
    /// Built as `DELETE FROM t WHERE [id] IN (<select-id clone>)` so that
    /// ordering and paging on the source query are honored.
    pub fn format_delete(self) -> QueryResult<SqlStatement> {
        let mut id_query = self.query.clone();
        id_query.selection = vec![system::ID.to_owned()];
        id_query.include_total_count = false;

        let select = SqlFormatter::new(&id_query).format_select()?;
        let table_name = format_table_name(&id_query.table_name)?;
        let id_member = format_member(system::ID)?;
        Ok(SqlStatement {
            sql: format!(
                "DELETE FROM {table_name} WHERE {id_member} IN ({})",
                select.sql
            ),
            parameters: select.parameters,
        })
    }

    fn finish(self) -> SqlStatement {
        SqlStatement {
            sql: self.sql.trim_end().to_owned(),
            parameters: self.parameters,
        }
    }

    fn format_query(&mut self, head: &str) -> QueryResult<()> {
        self.sql.push_str(head);

        let table_name = format_table_name(&self.query.table_name)?;
        self.sql.push_str(&format!(" FROM {table_name}"));

        if let Some(filter) = &self.query.filter {
            self.format_where_clause(filter)?;
        }

        if !self.query.ordering.is_empty() {
            self.format_order_by_clause()?;
        }

        if self.query.skip.is_some() || self.query.top.is_some() {
            self.format_limit_clause();
        }

        Ok(())
    }

    fn format_where_clause(&mut self, filter: &QueryNode) -> QueryResult<()> {
        self.sql.push_str(" WHERE ");
        self.write_node(filter)
    }

    fn format_order_by_clause(&mut self) -> QueryResult<()> {
        self.sql.push_str(" ORDER BY ");
        let mut separator = "";
        for order in &self.query.ordering {
            self.sql.push_str(separator);
            self.sql.push_str(&format_member(&order.member)?);
            if order.direction == OrderDirection::Descending {
                self.sql.push_str(" DESC");
            }
            separator = ", ";
        }
        Ok(())
    }

    fn format_limit_clause(&mut self) {
        // LIMIT is mandatory syntax for OFFSET, so an unbounded skip gets an
        // effectively-infinite limit.
        let limit = self.query.top.unwrap_or(i64::MAX as u64);
        self.sql.push_str(&format!(" LIMIT {limit}"));
        if let Some(skip) = self.query.skip {
            self.sql.push_str(&format!(" OFFSET {skip}"));
        }
    }

    fn write_node(&mut self, node: &QueryNode) -> QueryResult<()> {
        match node {
            QueryNode::Constant(value) => self.write_constant(value),
            QueryNode::MemberAccess(name) => {
                let member = format_member(name)?;
                self.sql.push_str(&member);
                Ok(())
            }
            QueryNode::BinaryOp { op, left, right } => self.write_binary(*op, left, right),
            QueryNode::UnaryOp { op, operand } => {
                match op {
                    UnaryOp::Negate => self.sql.push_str("-("),
                    UnaryOp::Not => self.sql.push_str("NOT("),
                }
                self.write_node(operand)?;
                self.sql.push(')');
                Ok(())
            }
            QueryNode::FunctionCall { function, args } => self.write_function(*function, args),
            QueryNode::Convert { target, source } => {
                self.sql.push_str("CAST(");
                self.write_node(source)?;
                self.sql.push_str(" AS ");
                self.sql.push_str(cast_type_name(*target));
                self.sql.push(')');
                Ok(())
            }
        }
    }

    fn write_binary(
        &mut self,
        op: BinaryOp,
        left: &QueryNode,
        right: &QueryNode,
    ) -> QueryResult<()> {
        self.sql.push('(');

        // The numeric storage class is REAL, which SQLite's % rejects, so
        // the dividend is coerced to INTEGER first.
        if op == BinaryOp::Mod {
            self.sql.push_str("CAST(");
            self.write_node(left)?;
            self.sql.push_str(" AS INTEGER)");
        } else {
            self.write_node(left)?;
        }

        let null_comparison = matches!(right, QueryNode::Constant(Value::Null))
            && matches!(op, BinaryOp::Eq | BinaryOp::Ne);
        if null_comparison {
            // (in)equality against a null literal has a special SQL form
            self.sql.push_str(match op {
                BinaryOp::Eq => " IS NULL",
                _ => " IS NOT NULL",
            });
        } else {
            self.sql.push_str(binary_op_sql(op));
            self.write_node(right)?;
        }

        self.sql.push(')');
        Ok(())
    }

    fn write_constant(&mut self, value: &Value) -> QueryResult<()> {
        match value {
            Value::Null => {
                self.sql.push_str("NULL");
            }
            Value::Array(_) | Value::Object(_) => {
                return Err(QueryError::UnsupportedExpression(format!(
                    "cannot bind composite constant {value:?} as a SQL parameter"
                )));
            }
            other => {
                let name = format!("@p{}", self.parameters.len() + 1);
                self.sql.push_str(&name);
                self.parameters.push((name, other.clone()));
            }
        }
        Ok(())
    }

    fn write_function(&mut self, function: QueryFunction, args: &[QueryNode]) -> QueryResult<()> {
        match function {
            QueryFunction::Day => self.write_date_part("%d", function, args),
            QueryFunction::Month => self.write_date_part("%m", function, args),
            QueryFunction::Year => self.write_date_part("%Y", function, args),
            QueryFunction::Hour => self.write_date_part("%H", function, args),
            QueryFunction::Minute => self.write_date_part("%M", function, args),
            QueryFunction::Second => self.write_date_part("%S", function, args),
            QueryFunction::Floor => {
                let arg = single_arg(function, args)?;
                self.write_floor(arg)
            }
            QueryFunction::Ceiling => {
                let arg = single_arg(function, args)?;
                // ceiling(x) = floor(x) + (x == floor(x) ? 0 : 1)
                self.write_floor(arg)?;
                self.sql.push_str(" + (CASE WHEN ");
                self.write_node(arg)?;
                self.sql.push_str(" = ");
                self.write_floor(arg)?;
                self.sql.push_str(" THEN 0 ELSE 1 END)");
                Ok(())
            }
            QueryFunction::Round => {
                let arg = single_arg(function, args)?;
                self.sql.push_str("ROUND(");
                self.write_node(arg)?;
                self.sql.push_str(", 0)");
                Ok(())
            }
            QueryFunction::ToLower => self.write_plain_function("LOWER", args),
            QueryFunction::ToUpper => self.write_plain_function("UPPER", args),
            QueryFunction::Length => self.write_plain_function("LENGTH", args),
            QueryFunction::Trim => self.write_plain_function("TRIM", args),
            QueryFunction::Replace => self.write_plain_function("REPLACE", args),
            QueryFunction::SubstringOf => {
                check_arity(function, args, 2, "2")?;
                self.write_like(&args[0], &args[1], true, true)
            }
            QueryFunction::StartsWith => {
                check_arity(function, args, 2, "2")?;
                self.write_like(&args[1], &args[0], false, true)
            }
            QueryFunction::EndsWith => {
                check_arity(function, args, 2, "2")?;
                self.write_like(&args[1], &args[0], true, false)
            }
            QueryFunction::Concat => {
                let mut separator = "";
                for arg in args {
                    self.sql.push_str(separator);
                    self.write_node(arg)?;
                    separator = " || ";
                }
                Ok(())
            }
            QueryFunction::IndexOf => {
                check_arity(function, args, 2, "2")?;
                self.write_plain_function("INSTR", args)?;
                // SQL is 1-based, OData 0-based
                self.sql.push_str(" - 1");
                Ok(())
            }
            QueryFunction::Substring => {
                if args.len() != 2 && args.len() != 3 {
                    return Err(QueryError::BadArity {
                        function: function.odata_name(),
                        expected: "2 or 3",
                        actual: args.len(),
                    });
                }
                self.sql.push_str("SUBSTR(");
                self.write_node(&args[0])?;
                self.sql.push_str(", ");
                self.write_node(&args[1])?;
                self.sql.push_str(" + 1");
                if let Some(length) = args.get(2) {
                    self.sql.push_str(", ");
                    self.write_node(length)?;
                }
                self.sql.push(')');
                Ok(())
            }
        }
    }

    fn write_like(
        &mut self,
        pattern: &QueryNode,
        value: &QueryNode,
        start_any: bool,
        end_any: bool,
    ) -> QueryResult<()> {
        // like('%pattern%', value)
        self.sql.push_str("LIKE(");
        if start_any {
            self.sql.push_str("'%' || ");
        }
        self.write_node(pattern)?;
        if end_any {
            self.sql.push_str(" || '%'");
        }
        self.sql.push_str(", ");
        self.write_node(value)?;
        self.sql.push(')');
        Ok(())
    }

    fn write_plain_function(&mut self, sql_name: &str, args: &[QueryNode]) -> QueryResult<()> {
        self.sql.push_str(sql_name);
        self.sql.push('(');
        let mut separator = "";
        for arg in args {
            self.sql.push_str(separator);
            self.write_node(arg)?;
            separator = ", ";
        }
        self.sql.push(')');
        Ok(())
    }

    fn write_date_part(
        &mut self,
        format: &str,
        function: QueryFunction,
        args: &[QueryNode],
    ) -> QueryResult<()> {
        let arg = single_arg(function, args)?;
        // dates are epoch seconds in a REAL column
        self.sql
            .push_str(&format!("CAST(strftime('{format}', datetime("));
        self.write_node(arg)?;
        self.sql.push_str(", 'unixepoch')) AS INTEGER)");
        Ok(())
    }

    fn write_floor(&mut self, arg: &QueryNode) -> QueryResult<()> {
        // CASE WHEN x >= 0 THEN CAST(x AS INTEGER)     -- truncate toward zero
        //      WHEN CAST(x AS INTEGER) = x THEN x      -- already integral
        //      ELSE CAST(x - 1.0 AS INTEGER)           -- negatives round down
        // END
        self.sql.push_str("(CASE WHEN ");
        self.write_node(arg)?;
        self.sql.push_str(" >= 0 THEN CAST(");
        self.write_node(arg)?;
        self.sql.push_str(" AS INTEGER) WHEN CAST(");
        self.write_node(arg)?;
        self.sql.push_str(" AS INTEGER) = ");
        self.write_node(arg)?;
        self.sql.push_str(" THEN ");
        self.write_node(arg)?;
        self.sql.push_str(" ELSE CAST(");
        self.write_node(arg)?;
        self.sql.push_str(" - 1.0 AS INTEGER) END)");
        Ok(())
    }
}

fn binary_op_sql(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Eq => " = ",
        BinaryOp::Ne => " != ",
        BinaryOp::Lt => " < ",
        BinaryOp::Le => " <= ",
        BinaryOp::Gt => " > ",
        BinaryOp::Ge => " >= ",
        BinaryOp::And => " AND ",
        BinaryOp::Or => " OR ",
        BinaryOp::Add => " + ",
        BinaryOp::Sub => " - ",
        BinaryOp::Mul => " * ",
        BinaryOp::Div => " / ",
        BinaryOp::Mod => " % ",
    }
}

fn cast_type_name(target: CastTarget) -> &'static str {
    match target {
        CastTarget::Integer => "INTEGER",
        CastTarget::Real => "REAL",
        CastTarget::Text => "TEXT",
    }
}

fn single_arg<'n>(function: QueryFunction, args: &'n [QueryNode]) -> QueryResult<&'n QueryNode> {
    check_arity(function, args, 1, "1")?;
    Ok(&args[0])
}

fn check_arity(
    function: QueryFunction,
    args: &[QueryNode],
    expected: usize,
    expected_text: &'static str,
) -> QueryResult<()> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(QueryError::BadArity {
            function: function.odata_name(),
            expected: expected_text,
            actual: args.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::OrderBy;
    use crate::node::{field, lit};

    fn select(query: &QueryDescription) -> SqlStatement {
        SqlFormatter::new(query).format_select().unwrap()
    }

    #[test]
    fn simple_comparison() {
        let query = QueryDescription::new("products").with_filter(field("Price").gt(lit(50)));
        let statement = select(&query);
        assert_eq!(
            statement.sql,
            "SELECT * FROM [products] WHERE ([Price] > @p1)"
        );
        assert_eq!(statement.parameters, vec![("@p1".into(), Value::Integer(50))]);
    }

    #[test]
    fn parameters_number_sequentially() {
        let query = QueryDescription::new("t")
            .with_filter(field("a").eq(lit(1)).and(field("b").eq(lit("x"))));
        let statement = select(&query);
        assert_eq!(
            statement.sql,
            "SELECT * FROM [t] WHERE (([a] = @p1) AND ([b] = @p2))"
        );
        assert_eq!(statement.parameters.len(), 2);
    }

    #[test]
    fn rendering_is_stable_across_runs() {
        let query = QueryDescription::new("t")
            .with_filter(field("a").eq(lit(1)).or(field("b").gt(lit(2))));
        let first = SqlFormatter::new(&query).format_select().unwrap();
        let second = SqlFormatter::new(&query).format_select().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn null_equality_uses_is_null() {
        let query = QueryDescription::new("t").with_filter(field("a").eq(QueryNode::null()));
        assert_eq!(select(&query).sql, "SELECT * FROM [t] WHERE ([a] IS NULL)");

        let query = QueryDescription::new("t").with_filter(field("a").ne(QueryNode::null()));
        assert_eq!(
            select(&query).sql,
            "SELECT * FROM [t] WHERE ([a] IS NOT NULL)"
        );
    }

    #[test]
    fn modulo_casts_dividend_to_integer() {
        let query = QueryDescription::new("t").with_filter(field("n").modulo(lit(2)).eq(lit(0)));
        assert_eq!(
            select(&query).sql,
            "SELECT * FROM [t] WHERE ((CAST([n] AS INTEGER) % @p1) = @p2)"
        );
    }

    #[test]
    fn ordering_preserves_declaration_order() {
        let query = QueryDescription::new("t")
            .with_order_by(OrderBy::descending("b"))
            .with_order_by(OrderBy::ascending("a"));
        assert_eq!(select(&query).sql, "SELECT * FROM [t] ORDER BY [b] DESC, [a]");
    }

    #[test]
    fn skip_without_top_gets_max_limit() {
        let query = QueryDescription::new("t").with_skip(5);
        assert_eq!(
            select(&query).sql,
            format!("SELECT * FROM [t] LIMIT {} OFFSET 5", i64::MAX)
        );
    }

    #[test]
    fn top_and_skip() {
        let query = QueryDescription::new("t").with_top(10).with_skip(20);
        assert_eq!(select(&query).sql, "SELECT * FROM [t] LIMIT 10 OFFSET 20");
    }

    #[test]
    fn projection_brackets_columns() {
        let query =
            QueryDescription::new("t").with_selection(vec!["id".into(), "text".into()]);
        assert_eq!(select(&query).sql, "SELECT [id], [text] FROM [t]");
    }

    #[test]
    fn count_shares_filter() {
        let query = QueryDescription::new("t").with_filter(field("a").gt(lit(1)));
        let statement = SqlFormatter::new(&query).format_select_count().unwrap();
        assert_eq!(
            statement.sql,
            "SELECT COUNT(1) AS [count] FROM [t] WHERE ([a] > @p1)"
        );
    }

    #[test]
    fn delete_goes_through_select_id_clone() {
        let query = QueryDescription::new("t").with_filter(field("a").eq(lit(1))).with_top(2);
        let statement = SqlFormatter::new(&query).format_delete().unwrap();
        assert_eq!(
            statement.sql,
            "DELETE FROM [t] WHERE [id] IN (SELECT [id] FROM [t] WHERE ([a] = @p1) LIMIT 2)"
        );
        assert_eq!(statement.parameters.len(), 1);
    }

    #[test]
    fn startswith_renders_like() {
        let query = QueryDescription::new("t").with_filter(QueryNode::call(
            QueryFunction::StartsWith,
            vec![field("name"), lit("He")],
        ));
        assert_eq!(
            select(&query).sql,
            "SELECT * FROM [t] WHERE LIKE(@p1 || '%', [name])"
        );
    }

    #[test]
    fn endswith_and_substringof_render_like() {
        let query = QueryDescription::new("t").with_filter(QueryNode::call(
            QueryFunction::EndsWith,
            vec![field("name"), lit("lo")],
        ));
        assert_eq!(
            select(&query).sql,
            "SELECT * FROM [t] WHERE LIKE('%' || @p1, [name])"
        );

        let query = QueryDescription::new("t").with_filter(QueryNode::call(
            QueryFunction::SubstringOf,
            vec![lit("ell"), field("name")],
        ));
        assert_eq!(
            select(&query).sql,
            "SELECT * FROM [t] WHERE LIKE('%' || @p1 || '%', [name])"
        );
    }

    #[test]
    fn indexof_is_zero_based() {
        let query = QueryDescription::new("t").with_filter(
            QueryNode::call(QueryFunction::IndexOf, vec![field("name"), lit("a")]).eq(lit(0)),
        );
        assert_eq!(
            select(&query).sql,
            "SELECT * FROM [t] WHERE (INSTR([name], @p1) - 1 = @p2)"
        );
    }

    #[test]
    fn substring_offsets_by_one() {
        let query = QueryDescription::new("t").with_filter(
            QueryNode::call(
                QueryFunction::Substring,
                vec![field("name"), lit(1), lit(2)],
            )
            .eq(lit("bc")),
        );
        assert_eq!(
            select(&query).sql,
            "SELECT * FROM [t] WHERE (SUBSTR([name], @p1 + 1, @p2) = @p3)"
        );
    }

    #[test]
    fn date_part_uses_strftime() {
        let query = QueryDescription::new("t").with_filter(
            QueryNode::call(QueryFunction::Year, vec![field("when")]).eq(lit(2024)),
        );
        assert_eq!(
            select(&query).sql,
            "SELECT * FROM [t] WHERE (CAST(strftime('%Y', datetime([when], 'unixepoch')) AS INTEGER) = @p1)"
        );
    }

    #[test]
    fn floor_handles_negatives_via_case() {
        let query = QueryDescription::new("t").with_filter(
            QueryNode::call(QueryFunction::Floor, vec![field("x")]).eq(lit(-3)),
        );
        assert_eq!(
            select(&query).sql,
            "SELECT * FROM [t] WHERE ((CASE WHEN [x] >= 0 THEN CAST([x] AS INTEGER) \
             WHEN CAST([x] AS INTEGER) = [x] THEN [x] ELSE CAST([x] - 1.0 AS INTEGER) END) = @p1)"
        );
    }

    #[test]
    fn concat_joins_with_pipes() {
        let query = QueryDescription::new("t").with_filter(
            QueryNode::call(QueryFunction::Concat, vec![field("a"), lit("-"), field("b")])
                .eq(lit("x-y")),
        );
        assert_eq!(
            select(&query).sql,
            "SELECT * FROM [t] WHERE ([a] || @p1 || [b] = @p2)"
        );
    }

    #[test]
    fn convert_renders_cast() {
        let query = QueryDescription::new("t")
            .with_filter(field("x").cast(CastTarget::Integer).eq(lit(1)));
        assert_eq!(
            select(&query).sql,
            "SELECT * FROM [t] WHERE (CAST([x] AS INTEGER) = @p1)"
        );
    }

    #[test]
    fn invalid_member_fails_before_sql() {
        let query = QueryDescription::new("t").with_filter(field("bad name").eq(lit(1)));
        assert!(matches!(
            SqlFormatter::new(&query).format_select(),
            Err(QueryError::InvalidIdentifier(_))
        ));
    }
}
