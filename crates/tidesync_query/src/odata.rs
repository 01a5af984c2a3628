//! Renders a [`QueryDescription`] to an OData-style query string.
//!
//! The output is the logical query text (`$filter=...&$orderby=...`); URI
//! escaping is the transport's concern, the same split the remote proxy
//! contract assumes.

use crate::description::{OrderDirection, QueryDescription};
use crate::error::{QueryError, QueryResult};
use crate::node::{BinaryOp, QueryNode, UnaryOp};
use crate::value::{format_datetime, Value};

/// Renders the full query string for `query`.
pub fn format_query(query: &QueryDescription) -> QueryResult<String> {
    let mut options: Vec<String> = Vec::new();

    if let Some(filter) = &query.filter {
        options.push(format!("$filter={}", format_filter(filter)?));
    }

    if !query.ordering.is_empty() {
        let entries: Vec<String> = query
            .ordering
            .iter()
            .map(|o| match o.direction {
                OrderDirection::Ascending => o.member.clone(),
                OrderDirection::Descending => format!("{} desc", o.member),
            })
            .collect();
        options.push(format!("$orderby={}", entries.join(",")));
    }

    if let Some(skip) = query.skip {
        options.push(format!("$skip={skip}"));
    }

    if let Some(top) = query.top {
        options.push(format!("$top={top}"));
    }

    if !query.selection.is_empty() {
        options.push(format!("$select={}", query.selection.join(",")));
    }

    if query.include_total_count {
        options.push("$inlinecount=allpages".to_owned());
    }

    for (key, value) in &query.parameters {
        options.push(format!("{key}={value}"));
    }

    Ok(options.join("&"))
}

/// Renders just the `$filter` expression text for `node`.
pub fn format_filter(node: &QueryNode) -> QueryResult<String> {
    let mut text = String::new();
    write_node(node, &mut text)?;
    Ok(text)
}

fn write_node(node: &QueryNode, out: &mut String) -> QueryResult<()> {
    match node {
        QueryNode::Constant(value) => write_literal(value, out),
        QueryNode::MemberAccess(name) => {
            out.push_str(name);
            Ok(())
        }
        QueryNode::BinaryOp { op, left, right } => {
            out.push('(');
            write_node(left, out)?;
            out.push(' ');
            out.push_str(binary_op_name(*op));
            out.push(' ');
            write_node(right, out)?;
            out.push(')');
            Ok(())
        }
        QueryNode::UnaryOp { op, operand } => {
            match op {
                UnaryOp::Not => out.push_str("not("),
                UnaryOp::Negate => out.push_str("-("),
            }
            write_node(operand, out)?;
            out.push(')');
            Ok(())
        }
        QueryNode::FunctionCall { function, args } => {
            out.push_str(function.odata_name());
            out.push('(');
            for (index, arg) in args.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_node(arg, out)?;
            }
            out.push(')');
            Ok(())
        }
        // Storage casts are a local-store concern; the remote side sees the
        // underlying expression.
        QueryNode::Convert { source, .. } => write_node(source, out),
    }
}

fn binary_op_name(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Eq => "eq",
        BinaryOp::Ne => "ne",
        BinaryOp::Lt => "lt",
        BinaryOp::Le => "le",
        BinaryOp::Gt => "gt",
        BinaryOp::Ge => "ge",
        BinaryOp::And => "and",
        BinaryOp::Or => "or",
        BinaryOp::Add => "add",
        BinaryOp::Sub => "sub",
        BinaryOp::Mul => "mul",
        BinaryOp::Div => "div",
        BinaryOp::Mod => "mod",
    }
}

fn write_literal(value: &Value, out: &mut String) -> QueryResult<()> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Integer(i) => out.push_str(&i.to_string()),
        Value::Float(f) => {
            if f.fract() == 0.0 && f.is_finite() {
                out.push_str(&format!("{f:.1}"));
            } else {
                out.push_str(&f.to_string());
            }
        }
        Value::String(s) => {
            out.push('\'');
            out.push_str(&s.replace('\'', "''"));
            out.push('\'');
        }
        Value::DateTime(d) => {
            out.push_str("datetime'");
            out.push_str(&format_datetime(*d));
            out.push('\'');
        }
        Value::Uuid(u) => {
            out.push_str("guid'");
            out.push_str(&u.to_string());
            out.push('\'');
        }
        Value::Bytes(bytes) => {
            out.push_str("X'");
            for byte in bytes {
                out.push_str(&format!("{byte:02X}"));
            }
            out.push('\'');
        }
        Value::Array(_) | Value::Object(_) => {
            return Err(QueryError::UnsupportedExpression(format!(
                "cannot render composite constant {value:?} as an OData literal"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::OrderBy;
    use crate::node::{field, lit, QueryFunction};
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    #[test]
    fn comparison_renders_with_grouping() {
        let filter = field("Price").gt(lit(50));
        assert_eq!(format_filter(&filter).unwrap(), "(Price gt 50)");
    }

    #[test]
    fn logical_operators_nest() {
        let filter = field("a").eq(lit(1)).and(field("b").ne(lit("x")).or(field("c").lt(lit(2.5))));
        assert_eq!(
            format_filter(&filter).unwrap(),
            "((a eq 1) and ((b ne 'x') or (c lt 2.5)))"
        );
    }

    #[test]
    fn string_literals_escape_quotes() {
        let filter = field("name").eq(lit("it's"));
        assert_eq!(format_filter(&filter).unwrap(), "(name eq 'it''s')");
    }

    #[test]
    fn typed_literals() {
        let when = Utc.with_ymd_and_hms(2014, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(
            format_filter(&field("__updatedAt").ge(lit(when))).unwrap(),
            "(__updatedAt ge datetime'2014-03-01T12:00:00.000Z')"
        );

        let id = Uuid::nil();
        assert_eq!(
            format_filter(&field("guid").eq(lit(id))).unwrap(),
            "(guid eq guid'00000000-0000-0000-0000-000000000000')"
        );

        assert_eq!(
            format_filter(&field("blob").eq(QueryNode::constant(Value::Bytes(vec![0xAB, 0x01]))))
                .unwrap(),
            "(blob eq X'AB01')"
        );
    }

    #[test]
    fn functions_and_not() {
        let filter = QueryNode::call(
            QueryFunction::StartsWith,
            vec![field("name"), lit("He")],
        )
        .not();
        assert_eq!(format_filter(&filter).unwrap(), "not(startswith(name,'He'))");
    }

    #[test]
    fn whole_floats_keep_a_decimal_point() {
        assert_eq!(format_filter(&field("x").eq(lit(50.0))).unwrap(), "(x eq 50.0)");
    }

    #[test]
    fn full_query_string() {
        let query = QueryDescription::new("todo")
            .with_filter(field("done").eq(lit(false)))
            .with_order_by(OrderBy::descending("__updatedAt"))
            .with_order_by(OrderBy::ascending("id"))
            .with_skip(5)
            .with_top(10)
            .with_selection(vec!["id".into(), "text".into()])
            .with_total_count()
            .with_parameter("state", "WA");
        assert_eq!(
            format_query(&query).unwrap(),
            "$filter=(done eq false)&$orderby=__updatedAt desc,id&$skip=5&$top=10&$select=id,text&$inlinecount=allpages&state=WA"
        );
    }

    #[test]
    fn composite_constants_are_unsupported() {
        let filter = field("x").eq(QueryNode::constant(Value::Array(vec![])));
        assert!(matches!(
            format_filter(&filter),
            Err(QueryError::UnsupportedExpression(_))
        ));
    }
}
