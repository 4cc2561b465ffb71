//! Row-filter expressions over a block's columns.
//!
//! ```text
//! energy > 100 and (channel == 3 or channel == 7)
//! ~(quality < 0.5) & detector != 'ged'
//! ```
//!
//! A clause compares a column with a literal (number, quoted string, `true`
//! or `false`) or with another column, using `==`, `!=`, `<`, `<=`, `>` or
//! `>=`. Clauses combine with `and`/`&`, `or`/`|` and `not`/`~`, with the
//! usual precedence. Numeric columns compare as `f64`. Rows where a clause
//! evaluates to null are dropped.

use crate::error::IterError;
use crate::table::Table;
use anyhow::{Context, Result, anyhow, bail};
use arrow::array::{
    Array, ArrayRef, BooleanArray, Datum, Float64Array, RecordBatch, StringArray,
};
use arrow::compute::kernels::cmp;
use arrow::compute::{and_kleene, cast, filter_record_batch, not, or_kleene};
use arrow::datatypes::DataType;
use regex::Regex;
use std::sync::{Arc, OnceLock};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Clone, Debug, PartialEq)]
enum Operand {
    Column(String),
    Number(f64),
    Text(String),
    Bool(bool),
}

#[derive(Clone, Debug, PartialEq)]
enum Node {
    Cmp(Operand, CmpOp, Operand),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Not(Box<Node>),
}

/// A parsed row filter.
#[derive(Clone, Debug, PartialEq)]
pub struct RowFilter {
    source: String,
    root: Node,
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Text(String),
    Op(&'static str),
}

fn tokenize(src: &str) -> Result<Vec<Token>> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(
            r#"^\s*(?:(?P<num>(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?)|(?P<id>[A-Za-z_][A-Za-z0-9_]*)|'(?P<sq>[^']*)'|"(?P<dq>[^"]*)"|(?P<op>==|!=|<=|>=|<|>|&&?|\|\|?|~|!|\(|\)|-))"#,
        )
        .expect("static regex")
    });

    let mut tokens = Vec::new();
    let mut rest = src.trim_end();
    while !rest.is_empty() {
        let caps = re.captures(rest).ok_or_else(|| {
            IterError::InvalidArgument(format!("can't parse filter '{src}' at '{rest}'"))
        })?;
        let tok = if let Some(m) = caps.name("num") {
            Token::Number(m.as_str().parse().context("parse number literal")?)
        } else if let Some(m) = caps.name("id") {
            Token::Ident(m.as_str().to_string())
        } else if let Some(m) = caps.name("sq").or_else(|| caps.name("dq")) {
            Token::Text(m.as_str().to_string())
        } else {
            let op = match caps.name("op").map_or("", |m| m.as_str()) {
                "==" => "==",
                "!=" => "!=",
                "<=" => "<=",
                ">=" => ">=",
                "<" => "<",
                ">" => ">",
                "&" | "&&" => "and",
                "|" | "||" => "or",
                "~" | "!" => "not",
                "(" => "(",
                ")" => ")",
                _ => "-",
            };
            Token::Op(op)
        };
        tokens.push(tok);
        rest = &rest[caps.get(0).map_or(rest.len(), |m| m.end())..];
    }
    Ok(tokens)
}

struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn error(&self, what: &str) -> anyhow::Error {
        IterError::InvalidArgument(format!(
            "bad filter '{}': {what} at token {}",
            self.src, self.pos
        ))
        .into()
    }

    fn is_keyword(&self, kw: &str) -> bool {
        match self.peek() {
            Some(Token::Op(op)) => *op == kw,
            Some(Token::Ident(id)) => id == kw,
            _ => false,
        }
    }

    fn or(&mut self) -> Result<Node> {
        let mut lhs = self.and()?;
        while self.is_keyword("or") {
            self.pos += 1;
            lhs = Node::Or(Box::new(lhs), Box::new(self.and()?));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Node> {
        let mut lhs = self.unary()?;
        while self.is_keyword("and") {
            self.pos += 1;
            lhs = Node::And(Box::new(lhs), Box::new(self.unary()?));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Node> {
        if self.is_keyword("not") {
            self.pos += 1;
            return Ok(Node::Not(Box::new(self.unary()?)));
        }
        if self.peek() == Some(&Token::Op("(")) {
            self.pos += 1;
            let inner = self.or()?;
            if self.peek() != Some(&Token::Op(")")) {
                return Err(self.error("expected ')'"));
            }
            self.pos += 1;
            return Ok(inner);
        }
        let lhs = self.operand()?;
        let op = match self.peek() {
            Some(Token::Op("==")) => CmpOp::Eq,
            Some(Token::Op("!=")) => CmpOp::Ne,
            Some(Token::Op("<")) => CmpOp::Lt,
            Some(Token::Op("<=")) => CmpOp::Le,
            Some(Token::Op(">")) => CmpOp::Gt,
            Some(Token::Op(">=")) => CmpOp::Ge,
            _ => return Err(self.error("expected a comparison")),
        };
        self.pos += 1;
        let rhs = self.operand()?;
        if !matches!(lhs, Operand::Column(_)) && !matches!(rhs, Operand::Column(_)) {
            return Err(self.error("comparison needs a column"));
        }
        Ok(Node::Cmp(lhs, op, rhs))
    }

    fn operand(&mut self) -> Result<Operand> {
        let tok = self.peek().cloned();
        self.pos += 1;
        match tok {
            Some(Token::Number(v)) => Ok(Operand::Number(v)),
            Some(Token::Text(s)) => Ok(Operand::Text(s)),
            Some(Token::Ident(id)) if id == "true" || id == "True" => Ok(Operand::Bool(true)),
            Some(Token::Ident(id)) if id == "false" || id == "False" => Ok(Operand::Bool(false)),
            Some(Token::Ident(id)) => Ok(Operand::Column(id)),
            Some(Token::Op("-")) => match self.operand()? {
                Operand::Number(v) => Ok(Operand::Number(-v)),
                _ => Err(self.error("'-' must precede a number")),
            },
            _ => {
                self.pos -= 1;
                Err(self.error("expected a column or literal"))
            }
        }
    }
}

/// One side of a comparison, ready for the arrow kernels.
struct Value {
    array: ArrayRef,
    scalar: bool,
}

impl Datum for Value {
    fn get(&self) -> (&dyn Array, bool) {
        (self.array.as_ref(), self.scalar)
    }
}

fn is_numeric(dt: &DataType) -> bool {
    dt.is_numeric() || *dt == DataType::Boolean
}

impl RowFilter {
    /// Parse `source`.
    ///
    /// # Errors
    /// Fails with [`IterError::InvalidArgument`] on a malformed expression.
    pub fn parse(source: &str) -> Result<Self> {
        let mut p = Parser {
            src: source,
            tokens: tokenize(source)?,
            pos: 0,
        };
        let root = p.or()?;
        if p.pos != p.tokens.len() {
            return Err(p.error("unexpected trailing input"));
        }
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Boolean mask of the rows of `batch` passing the filter.
    ///
    /// # Errors
    /// Fails if a column is missing or can't be compared with its operand.
    pub fn mask(&self, batch: &RecordBatch) -> Result<BooleanArray> {
        eval(&self.root, batch)
    }

    /// The rows of `table` passing the filter, all columns kept.
    ///
    /// # Errors
    /// Fails if a column is missing or can't be compared with its operand.
    pub fn apply(&self, table: &Table) -> Result<Table> {
        let mask = self.mask(table.as_batch())?;
        let batch = filter_record_batch(table.as_batch(), &mask)
            .with_context(|| format!("apply filter '{}'", self.source))?;
        Ok(Table::from_batch(batch))
    }
}

fn column(batch: &RecordBatch, name: &str) -> Result<ArrayRef> {
    batch.column_by_name(name).cloned().ok_or_else(|| {
        IterError::InvalidArgument(format!("filter refers to unknown field '{name}'")).into()
    })
}

fn literal(op: &Operand) -> Option<ArrayRef> {
    match op {
        Operand::Number(v) => Some(Arc::new(Float64Array::from(vec![*v]))),
        Operand::Text(s) => Some(Arc::new(StringArray::from(vec![s.as_str()]))),
        Operand::Bool(b) => Some(Arc::new(BooleanArray::from(vec![*b]))),
        Operand::Column(_) => None,
    }
}

/// Resolve both operands to arrays of one comparable type.
fn operands(lhs: &Operand, rhs: &Operand, batch: &RecordBatch) -> Result<(Value, Value)> {
    let resolve = |op: &Operand| -> Result<Value> {
        match op {
            Operand::Column(name) => Ok(Value {
                array: column(batch, name)?,
                scalar: false,
            }),
            lit => literal(lit)
                .map(|array| Value { array, scalar: true })
                .ok_or_else(|| anyhow!("operand is not a literal")),
        }
    };
    let (mut l, mut r) = (resolve(lhs)?, resolve(rhs)?);

    let (lt, rt) = (l.array.data_type().clone(), r.array.data_type().clone());
    let target = if lt == rt {
        None
    } else if is_numeric(&lt) && is_numeric(&rt) {
        Some(DataType::Float64)
    } else if matches!(lhs, Operand::Text(_)) || matches!(rhs, Operand::Text(_)) {
        Some(DataType::Utf8)
    } else {
        bail!(IterError::InvalidArgument(format!(
            "can't compare {lt} with {rt} in filter"
        )));
    };
    if let Some(target) = target {
        for v in [&mut l, &mut r] {
            if *v.array.data_type() != target {
                v.array = cast(&v.array, &target)
                    .with_context(|| format!("cast filter operand to {target}"))?;
            }
        }
    }
    Ok((l, r))
}

fn eval(node: &Node, batch: &RecordBatch) -> Result<BooleanArray> {
    Ok(match node {
        Node::Cmp(lhs, op, rhs) => {
            let (l, r) = operands(lhs, rhs, batch)?;
            let out = match op {
                CmpOp::Eq => cmp::eq(&l, &r),
                CmpOp::Ne => cmp::neq(&l, &r),
                CmpOp::Lt => cmp::lt(&l, &r),
                CmpOp::Le => cmp::lt_eq(&l, &r),
                CmpOp::Gt => cmp::gt(&l, &r),
                CmpOp::Ge => cmp::gt_eq(&l, &r),
            };
            out.context("evaluate comparison")?
        }
        Node::And(a, b) => and_kleene(&eval(a, batch)?, &eval(b, batch)?)?,
        Node::Or(a, b) => or_kleene(&eval(a, batch)?, &eval(b, batch)?)?,
        Node::Not(a) => not(&eval(a, batch)?)?,
    })
}
