//! Restricted boolean expressions used by `--filter` and `--pre-filter`.
//!
//! Only literals, field references, comparisons and boolean connectives
//! are understood; nothing in an expression can reach outside the fields
//! it is evaluated against.

use std::fmt;

use nom::branch::alt;
use nom::bytes::complete::{tag, take_while};
use nom::character::complete::{char, digit1, multispace0, multispace1, satisfy};
use nom::combinator::{all_consuming, map, map_res, not, opt, recognize, value, verify};
use nom::multi::fold_many0;
use nom::sequence::{delimited, pair, preceded, terminated, tuple};
use nom::IResult;

use super::quoted_string;
use crate::error::{ConfigError, FilterError};
use crate::record::{Record, Value};

const RESERVED_WORDS: &[&str] = &["and", "or", "not", "in"];

/// Value seen by an expression while it is evaluated.
#[derive(Clone, Debug, PartialEq)]
pub enum Scalar<'a> {
    Str(&'a str),
    Int(i64),
    Float(f64),
    Bool(bool),
    None,
}

impl<'a> Scalar<'a> {
    fn type_name(&self) -> &'static str {
        match *self {
            Scalar::Str(_) => "string",
            Scalar::Int(_) => "integer",
            Scalar::Float(_) => "float",
            Scalar::Bool(_) => "boolean",
            Scalar::None => "None",
        }
    }

    fn truthy(&self) -> bool {
        match *self {
            Scalar::Str(s) => !s.is_empty(),
            Scalar::Int(i) => i != 0,
            Scalar::Float(f) => f != 0.0,
            Scalar::Bool(b) => b,
            Scalar::None => false,
        }
    }

    fn as_number(&self) -> Option<f64> {
        match *self {
            Scalar::Int(i) => Some(i as f64),
            Scalar::Float(f) => Some(f),
            _ => None,
        }
    }
}

impl<'a> From<&'a Value> for Scalar<'a> {
    fn from(value: &'a Value) -> Scalar<'a> {
        match *value {
            Value::Str(ref s) => Scalar::Str(s),
            Value::Int(i) => Scalar::Int(i),
            Value::Float(f) => Scalar::Float(f),
        }
    }
}

/// Named values an expression can refer to.
pub trait Fields {
    fn field(&self, name: &str) -> Option<Scalar<'_>>;
}

impl Fields for Record {
    fn field(&self, name: &str) -> Option<Scalar<'_>> {
        self.get(name).map(Scalar::from)
    }
}

/// A raw line, visible to pre-filters as the single field `line`.
pub struct LineFields<'a>(pub &'a str);

impl<'a> Fields for LineFields<'a> {
    fn field(&self, name: &str) -> Option<Scalar<'_>> {
        if name == "line" {
            Some(Scalar::Str(self.0))
        } else {
            None
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    None,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

impl CmpOp {
    fn symbol(&self) -> &'static str {
        match *self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::In => "in",
            CmpOp::NotIn => "not in",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Field(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(Box<Expr>, CmpOp, Box<Expr>),
}

impl Expr {
    fn eval<'a>(&'a self, fields: &'a dyn Fields) -> Result<Scalar<'a>, FilterError> {
        match *self {
            Expr::Literal(ref literal) => Ok(match *literal {
                Literal::Str(ref s) => Scalar::Str(s),
                Literal::Int(i) => Scalar::Int(i),
                Literal::Float(f) => Scalar::Float(f),
                Literal::Bool(b) => Scalar::Bool(b),
                Literal::None => Scalar::None,
            }),
            Expr::Field(ref name) => fields
                .field(name)
                .ok_or_else(|| FilterError::UnknownField(name.clone())),
            Expr::Not(ref inner) => Ok(Scalar::Bool(!inner.eval(fields)?.truthy())),
            Expr::And(ref left, ref right) => {
                if !left.eval(fields)?.truthy() {
                    return Ok(Scalar::Bool(false));
                }
                Ok(Scalar::Bool(right.eval(fields)?.truthy()))
            }
            Expr::Or(ref left, ref right) => {
                if left.eval(fields)?.truthy() {
                    return Ok(Scalar::Bool(true));
                }
                Ok(Scalar::Bool(right.eval(fields)?.truthy()))
            }
            Expr::Compare(ref left, op, ref right) => {
                let left = left.eval(fields)?;
                let right = right.eval(fields)?;
                compare(&left, op, &right).map(Scalar::Bool)
            }
        }
    }
}

fn compare(left: &Scalar, op: CmpOp, right: &Scalar) -> Result<bool, FilterError> {
    let incomparable = || FilterError::Incomparable {
        left: left.type_name(),
        right: right.type_name(),
        op: op.symbol(),
    };

    match op {
        CmpOp::Eq => Ok(equals(left, right)),
        CmpOp::Ne => Ok(!equals(left, right)),
        CmpOp::In | CmpOp::NotIn => match (left, right) {
            (&Scalar::Str(needle), &Scalar::Str(haystack)) => {
                Ok(haystack.contains(needle) == (op == CmpOp::In))
            }
            _ => Err(incomparable()),
        },
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
            let ordering = match (left, right) {
                (&Scalar::Str(a), &Scalar::Str(b)) => Some(a.cmp(b)),
                (&Scalar::Int(a), &Scalar::Int(b)) => Some(a.cmp(&b)),
                _ => match (left.as_number(), right.as_number()) {
                    (Some(a), Some(b)) => a.partial_cmp(&b),
                    _ => return Err(incomparable()),
                },
            };
            // NaN compares false against everything
            let ordering = match ordering {
                Some(ordering) => ordering,
                None => return Ok(false),
            };
            Ok(match op {
                CmpOp::Lt => ordering.is_lt(),
                CmpOp::Le => ordering.is_le(),
                CmpOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            })
        }
    }
}

fn equals(left: &Scalar, right: &Scalar) -> bool {
    match (left, right) {
        (&Scalar::Int(a), &Scalar::Int(b)) => a == b,
        (&Scalar::Str(a), &Scalar::Str(b)) => a == b,
        (&Scalar::Bool(a), &Scalar::Bool(b)) => a == b,
        (&Scalar::None, &Scalar::None) => true,
        _ => match (left.as_number(), right.as_number()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
    }
}

/// A parsed filter expression.
#[derive(Clone, Debug, PartialEq)]
pub struct Filter {
    source: String,
    expr: Expr,
}

impl Filter {
    pub fn parse(source: &str) -> Result<Filter, ConfigError> {
        match all_consuming(ws(or_expr))(source) {
            Ok((_, expr)) => Ok(Filter {
                source: source.to_owned(),
                expr,
            }),
            Err(err) => Err(ConfigError::Filter {
                expression: source.to_owned(),
                reason: match err {
                    nom::Err::Error(e) | nom::Err::Failure(e) => {
                        format!("unexpected input at {:?}", e.input)
                    }
                    nom::Err::Incomplete(_) => "incomplete expression".to_owned(),
                },
            }),
        }
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn evaluate(&self, fields: &dyn Fields) -> Result<bool, FilterError> {
        self.expr.eval(fields).map(|result| result.truthy())
    }

    /// Like `evaluate`, but an evaluation error rejects the item.
    pub fn accepts(&self, fields: &dyn Fields) -> bool {
        match self.evaluate(fields) {
            Ok(accepted) => accepted,
            Err(err) => {
                tracing::debug!(filter = %self.source, error = %err, "filter evaluation failed");
                false
            }
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(tag(word), not(satisfy(is_ident_char)))
}

fn or_expr(i: &str) -> IResult<&str, Expr> {
    let (i, first) = and_expr(i)?;
    fold_many0(
        preceded(alt((keyword("or"), tag("||"))), and_expr),
        move || first.clone(),
        |acc, rhs| Expr::Or(Box::new(acc), Box::new(rhs)),
    )(i)
}

fn and_expr(i: &str) -> IResult<&str, Expr> {
    let (i, first) = not_expr(i)?;
    fold_many0(
        preceded(alt((keyword("and"), tag("&&"))), not_expr),
        move || first.clone(),
        |acc, rhs| Expr::And(Box::new(acc), Box::new(rhs)),
    )(i)
}

fn not_expr(i: &str) -> IResult<&str, Expr> {
    alt((
        map(
            preceded(ws(alt((keyword("not"), tag("!")))), not_expr),
            |inner| Expr::Not(Box::new(inner)),
        ),
        comparison,
    ))(i)
}

fn comparison(i: &str) -> IResult<&str, Expr> {
    let (i, left) = ws(atom)(i)?;
    let (i, rest) = opt(pair(cmp_op, ws(atom)))(i)?;

    Ok((
        i,
        match rest {
            Some((op, right)) => Expr::Compare(Box::new(left), op, Box::new(right)),
            None => left,
        },
    ))
}

fn cmp_op(i: &str) -> IResult<&str, CmpOp> {
    alt((
        value(CmpOp::Le, tag("<=")),
        value(CmpOp::Ge, tag(">=")),
        value(CmpOp::Eq, tag("==")),
        value(CmpOp::Ne, tag("!=")),
        value(CmpOp::Lt, tag("<")),
        value(CmpOp::Gt, tag(">")),
        value(
            CmpOp::NotIn,
            tuple((keyword("not"), multispace1, keyword("in"))),
        ),
        value(CmpOp::In, keyword("in")),
    ))(i)
}

fn atom(i: &str) -> IResult<&str, Expr> {
    alt((
        delimited(char('('), ws(or_expr), char(')')),
        map(quoted_string, |s| Expr::Literal(Literal::Str(s))),
        map(number, Expr::Literal),
        value(Expr::Literal(Literal::Bool(true)), alt((keyword("true"), keyword("True")))),
        value(Expr::Literal(Literal::Bool(false)), alt((keyword("false"), keyword("False")))),
        value(Expr::Literal(Literal::None), keyword("None")),
        map(identifier, |name: &str| Expr::Field(name.to_owned())),
    ))(i)
}

fn identifier(i: &str) -> IResult<&str, &str> {
    verify(
        recognize(pair(
            satisfy(|c: char| c.is_ascii_alphabetic() || c == '_'),
            take_while(is_ident_char),
        )),
        |name: &str| !RESERVED_WORDS.contains(&name),
    )(i)
}

fn number(i: &str) -> IResult<&str, Literal> {
    map_res(
        recognize(tuple((opt(char('-')), digit1, opt(pair(char('.'), digit1))))),
        |text: &str| {
            if text.contains('.') {
                text.parse().map(Literal::Float).map_err(|_| ())
            } else {
                text.parse().map(Literal::Int).map_err(|_| ())
            }
        },
    )(i)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> Record {
        vec![
            ("status".to_owned(), Value::Int(404)),
            ("request_time".to_owned(), Value::Float(0.25)),
            ("request_path".to_owned(), Value::Str("/api/users".to_owned())),
        ]
        .into_iter()
        .collect()
    }

    fn eval(source: &str) -> Result<bool, FilterError> {
        Filter::parse(source).unwrap().evaluate(&record())
    }

    #[test]
    fn it_compares_numbers() {
        assert_eq!(eval("status == 404"), Ok(true));
        assert_eq!(eval("status >= 500"), Ok(false));
        assert_eq!(eval("request_time > 0.1"), Ok(true));
        assert_eq!(eval("status != 404.0"), Ok(false));
    }

    #[test]
    fn it_combines_with_boolean_connectives() {
        assert_eq!(eval("status == 404 and request_time < 1"), Ok(true));
        assert_eq!(eval("status == 200 or request_time < 1"), Ok(true));
        assert_eq!(eval("not (status == 404)"), Ok(false));
        assert_eq!(eval("status == 404 && !(request_time > 1)"), Ok(true));
        assert_eq!(eval("status == 200 || status == 201"), Ok(false));
    }

    #[test]
    fn it_checks_substrings() {
        assert_eq!(eval("'/api' in request_path"), Ok(true));
        assert_eq!(eval("\"/static\" not in request_path"), Ok(true));
    }

    #[test]
    fn it_reports_unknown_fields() {
        assert_eq!(
            eval("upstream_status == 200"),
            Err(FilterError::UnknownField("upstream_status".to_owned()))
        );
        assert!(!Filter::parse("upstream_status == 200").unwrap().accepts(&record()));
    }

    #[test]
    fn it_reports_incomparable_values() {
        assert_eq!(
            eval("request_path > 3"),
            Err(FilterError::Incomparable {
                left: "string",
                right: "integer",
                op: ">",
            })
        );
    }

    #[test]
    fn mismatched_equality_is_false() {
        assert_eq!(eval("request_path == 3"), Ok(false));
        assert_eq!(eval("status == None"), Ok(false));
    }

    #[test]
    fn it_uses_truthiness_for_bare_values() {
        assert_eq!(eval("status"), Ok(true));
        assert_eq!(eval("''"), Ok(false));
        assert_eq!(eval("True and 1"), Ok(true));
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let filter = Filter::parse("true or false and false").unwrap();

        assert_eq!(filter.evaluate(&record()), Ok(true));
        match *filter.expr() {
            Expr::Or(..) => {}
            ref other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn it_rejects_malformed_expressions() {
        for source in &["status ==", "(status == 1", "import os", "status = 1", "'open", ""] {
            assert!(Filter::parse(source).is_err(), "{:?} should not parse", source);
        }
    }

    #[test]
    fn pre_filters_see_the_line() {
        let filter = Filter::parse("'GET' in line").unwrap();

        assert!(filter.accepts(&LineFields("GET / HTTP/1.1")));
        assert!(!filter.accepts(&LineFields("POST / HTTP/1.1")));
        assert!(!Filter::parse("status == 1").unwrap().accepts(&LineFields("x")));
    }

    #[test]
    fn it_parses_escapes_in_strings() {
        let filter = Filter::parse(r#"'it\'s' == "it's""#).unwrap();

        assert_eq!(filter.evaluate(&record()), Ok(true));
    }
}
