//! Query filter expression tree.
//!
//! A closed tagged union of node kinds with exhaustive matching in each
//! renderer. Adding a node kind extends the union and every renderer, which
//! the compiler enforces.

use crate::value::Value;

/// One node of a filter expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryNode {
    /// A literal constant.
    Constant(Value),
    /// Access of a named item field.
    MemberAccess(String),
    /// A binary comparison, logical or arithmetic operator.
    BinaryOp {
        /// The operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<QueryNode>,
        /// Right operand.
        right: Box<QueryNode>,
    },
    /// A unary operator.
    UnaryOp {
        /// The operator.
        op: UnaryOp,
        /// The operand.
        operand: Box<QueryNode>,
    },
    /// A call to one of the recognized query functions.
    FunctionCall {
        /// The function.
        function: QueryFunction,
        /// Argument expressions, in call order.
        args: Vec<QueryNode>,
    },
    /// A storage-type conversion.
    Convert {
        /// Target storage type.
        target: CastTarget,
        /// The converted expression.
        source: Box<QueryNode>,
    },
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// Equality.
    Eq,
    /// Inequality.
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
    /// Logical and.
    And,
    /// Logical or.
    Or,
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division.
    Div,
    /// Modulo.
    Mod,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Logical negation.
    Not,
    /// Arithmetic negation.
    Negate,
}

/// The closed set of functions a filter may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryFunction {
    /// Lower-cases a string.
    ToLower,
    /// Upper-cases a string.
    ToUpper,
    /// Trims whitespace from both ends.
    Trim,
    /// String starts with a prefix.
    StartsWith,
    /// String ends with a suffix.
    EndsWith,
    /// Substring containment: `substringof(needle, haystack)`.
    SubstringOf,
    /// Zero-based index of a substring, -1 when absent.
    IndexOf,
    /// Zero-based substring with optional length.
    Substring,
    /// Replaces all occurrences of a substring.
    Replace,
    /// Concatenates strings.
    Concat,
    /// String length.
    Length,
    /// Day-of-month of a date.
    Day,
    /// Month of a date.
    Month,
    /// Year of a date.
    Year,
    /// Hour of a date.
    Hour,
    /// Minute of a date.
    Minute,
    /// Second of a date.
    Second,
    /// Largest integer not above the argument.
    Floor,
    /// Smallest integer not below the argument.
    Ceiling,
    /// Rounds half away from zero.
    Round,
}

impl QueryFunction {
    /// The OData name of this function.
    pub fn odata_name(&self) -> &'static str {
        match self {
            QueryFunction::ToLower => "tolower",
            QueryFunction::ToUpper => "toupper",
            QueryFunction::Trim => "trim",
            QueryFunction::StartsWith => "startswith",
            QueryFunction::EndsWith => "endswith",
            QueryFunction::SubstringOf => "substringof",
            QueryFunction::IndexOf => "indexof",
            QueryFunction::Substring => "substring",
            QueryFunction::Replace => "replace",
            QueryFunction::Concat => "concat",
            QueryFunction::Length => "length",
            QueryFunction::Day => "day",
            QueryFunction::Month => "month",
            QueryFunction::Year => "year",
            QueryFunction::Hour => "hour",
            QueryFunction::Minute => "minute",
            QueryFunction::Second => "second",
            QueryFunction::Floor => "floor",
            QueryFunction::Ceiling => "ceiling",
            QueryFunction::Round => "round",
        }
    }
}

/// Storage types a `Convert` node may cast to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastTarget {
    /// SQLite INTEGER.
    Integer,
    /// SQLite REAL.
    Real,
    /// SQLite TEXT.
    Text,
}

// builder methods intentionally mirror the OData operator names, several
// of which collide with std trait method names
#[allow(clippy::should_implement_trait)]
impl QueryNode {
    /// A member-access node.
    pub fn member(name: impl Into<String>) -> QueryNode {
        QueryNode::MemberAccess(name.into())
    }

    /// A constant node.
    pub fn constant(value: impl Into<Value>) -> QueryNode {
        QueryNode::Constant(value.into())
    }

    /// A null constant node.
    pub fn null() -> QueryNode {
        QueryNode::Constant(Value::Null)
    }

    fn binary(self, op: BinaryOp, right: QueryNode) -> QueryNode {
        QueryNode::BinaryOp {
            op,
            left: Box::new(self),
            right: Box::new(right),
        }
    }

    /// `self eq other`.
    pub fn eq(self, other: QueryNode) -> QueryNode {
        self.binary(BinaryOp::Eq, other)
    }

    /// `self ne other`.
    pub fn ne(self, other: QueryNode) -> QueryNode {
        self.binary(BinaryOp::Ne, other)
    }

    /// `self lt other`.
    pub fn lt(self, other: QueryNode) -> QueryNode {
        self.binary(BinaryOp::Lt, other)
    }

    /// `self le other`.
    pub fn le(self, other: QueryNode) -> QueryNode {
        self.binary(BinaryOp::Le, other)
    }

    /// `self gt other`.
    pub fn gt(self, other: QueryNode) -> QueryNode {
        self.binary(BinaryOp::Gt, other)
    }

    /// `self ge other`.
    pub fn ge(self, other: QueryNode) -> QueryNode {
        self.binary(BinaryOp::Ge, other)
    }

    /// `self and other`.
    pub fn and(self, other: QueryNode) -> QueryNode {
        self.binary(BinaryOp::And, other)
    }

    /// `self or other`.
    pub fn or(self, other: QueryNode) -> QueryNode {
        self.binary(BinaryOp::Or, other)
    }

    /// `self add other`.
    pub fn add(self, other: QueryNode) -> QueryNode {
        self.binary(BinaryOp::Add, other)
    }

    /// `self sub other`.
    pub fn sub(self, other: QueryNode) -> QueryNode {
        self.binary(BinaryOp::Sub, other)
    }

    /// `self mul other`.
    pub fn mul(self, other: QueryNode) -> QueryNode {
        self.binary(BinaryOp::Mul, other)
    }

    /// `self div other`.
    pub fn div(self, other: QueryNode) -> QueryNode {
        self.binary(BinaryOp::Div, other)
    }

    /// `self mod other`.
    pub fn modulo(self, other: QueryNode) -> QueryNode {
        self.binary(BinaryOp::Mod, other)
    }

    /// `not(self)`.
    pub fn not(self) -> QueryNode {
        QueryNode::UnaryOp {
            op: UnaryOp::Not,
            operand: Box::new(self),
        }
    }

    /// `-(self)`.
    pub fn negate(self) -> QueryNode {
        QueryNode::UnaryOp {
            op: UnaryOp::Negate,
            operand: Box::new(self),
        }
    }

    /// Calls a query function.
    pub fn call(function: QueryFunction, args: Vec<QueryNode>) -> QueryNode {
        QueryNode::FunctionCall { function, args }
    }

    /// Casts to a storage type.
    pub fn cast(self, target: CastTarget) -> QueryNode {
        QueryNode::Convert {
            target,
            source: Box::new(self),
        }
    }
}

/// Shorthand for a member-access node.
pub fn field(name: impl Into<String>) -> QueryNode {
    QueryNode::member(name)
}

/// Shorthand for a constant node.
pub fn lit(value: impl Into<Value>) -> QueryNode {
    QueryNode::constant(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_shapes_tree() {
        let node = field("Price").gt(lit(50)).and(field("done").eq(lit(false)));
        match node {
            QueryNode::BinaryOp { op: BinaryOp::And, left, .. } => match *left {
                QueryNode::BinaryOp { op: BinaryOp::Gt, ref left, ref right } => {
                    assert_eq!(**left, QueryNode::MemberAccess("Price".into()));
                    assert_eq!(**right, QueryNode::Constant(Value::Integer(50)));
                }
                other => panic!("unexpected node: {other:?}"),
            },
            other => panic!("unexpected node: {other:?}"),
        }
    }

    #[test]
    fn function_names_match_odata() {
        assert_eq!(QueryFunction::SubstringOf.odata_name(), "substringof");
        assert_eq!(QueryFunction::Ceiling.odata_name(), "ceiling");
    }
}
