//! Lexer, recursive-descent parser and evaluator for the expression subset
//! the store double executes.
//!
//! Covers condition/filter/key-condition expressions over single-segment
//! attribute paths (comparisons, `AND`/`OR`/`NOT`, `BETWEEN`, `IN`,
//! `begins_with`, `contains`, `attribute_exists`, `attribute_not_exists`)
//! and `ADD`-only update expressions. Keywords match case-insensitively.

use std::collections::HashMap;
use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

use dynamap_model::AttributeValue;
use dynamap_model::types::Item;

/// Errors produced while parsing or evaluating an expression.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    /// An unexpected token was encountered.
    #[error("unexpected token: expected {expected}, found {found}")]
    UnexpectedToken {
        /// What was expected.
        expected: String,
        /// What was found.
        found: String,
    },
    /// The expression ended prematurely.
    #[error("unexpected end of expression")]
    UnexpectedEof,
    /// A `#name` placeholder with no entry in the names map.
    #[error("unresolved expression attribute name: #{0}")]
    UnresolvedName(String),
    /// A `:value` placeholder with no entry in the values map.
    #[error("unresolved expression attribute value: :{0}")]
    UnresolvedValue(String),
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Name(String),
    ValueRef(String),
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Comma,
    LParen,
    RParen,
    And,
    Or,
    Not,
    Between,
    In,
    Add,
    BeginsWith,
    Contains,
    AttributeExists,
    AttributeNotExists,
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(s) => write!(f, "identifier '{s}'"),
            Self::Name(s) => write!(f, "#{s}"),
            Self::ValueRef(s) => write!(f, ":{s}"),
            Self::Eq => write!(f, "="),
            Self::Ne => write!(f, "<>"),
            Self::Lt => write!(f, "<"),
            Self::Le => write!(f, "<="),
            Self::Gt => write!(f, ">"),
            Self::Ge => write!(f, ">="),
            Self::Comma => write!(f, ","),
            Self::LParen => write!(f, "("),
            Self::RParen => write!(f, ")"),
            Self::And => write!(f, "AND"),
            Self::Or => write!(f, "OR"),
            Self::Not => write!(f, "NOT"),
            Self::Between => write!(f, "BETWEEN"),
            Self::In => write!(f, "IN"),
            Self::Add => write!(f, "ADD"),
            Self::BeginsWith => write!(f, "begins_with"),
            Self::Contains => write!(f, "contains"),
            Self::AttributeExists => write!(f, "attribute_exists"),
            Self::AttributeNotExists => write!(f, "attribute_not_exists"),
            Self::Eof => write!(f, "end of expression"),
        }
    }
}

fn lex(input: &str) -> Result<Vec<Token>, EvalError> {
    let mut tokens = Vec::new();
    let mut chars: Peekable<Chars<'_>> = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '=' => {
                chars.next();
                tokens.push(Token::Eq);
            }
            '<' => {
                chars.next();
                match chars.peek() {
                    Some('=') => {
                        chars.next();
                        tokens.push(Token::Le);
                    }
                    Some('>') => {
                        chars.next();
                        tokens.push(Token::Ne);
                    }
                    _ => tokens.push(Token::Lt),
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ge);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '#' => {
                chars.next();
                tokens.push(Token::Name(take_word(&mut chars)));
            }
            ':' => {
                chars.next();
                tokens.push(Token::ValueRef(take_word(&mut chars)));
            }
            c if c.is_alphanumeric() || c == '_' => {
                let word = take_word(&mut chars);
                tokens.push(keyword_or_ident(&word));
            }
            other => {
                return Err(EvalError::UnexpectedToken {
                    expected: "a token".to_owned(),
                    found: other.to_string(),
                });
            }
        }
    }
    tokens.push(Token::Eof);
    Ok(tokens)
}

fn take_word(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut word = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_alphanumeric() || c == '_' {
            word.push(c);
            chars.next();
        } else {
            break;
        }
    }
    word
}

fn keyword_or_ident(word: &str) -> Token {
    match word.to_ascii_uppercase().as_str() {
        "AND" => Token::And,
        "OR" => Token::Or,
        "NOT" => Token::Not,
        "BETWEEN" => Token::Between,
        "IN" => Token::In,
        "ADD" => Token::Add,
        "BEGINS_WITH" => Token::BeginsWith,
        "CONTAINS" => Token::Contains,
        "ATTRIBUTE_EXISTS" => Token::AttributeExists,
        "ATTRIBUTE_NOT_EXISTS" => Token::AttributeNotExists,
        _ => Token::Ident(word.to_owned()),
    }
}

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

/// A value-producing operand.
#[derive(Debug, Clone)]
pub enum Operand {
    /// An attribute path (`Total` or `#p0`).
    Path(String),
    /// A `:value` placeholder.
    ValueRef(String),
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

/// Condition expression AST.
#[derive(Debug, Clone)]
pub enum Expr {
    /// `left op right`.
    Compare {
        /// Left operand.
        left: Operand,
        /// Operator.
        op: CompareOp,
        /// Right operand.
        right: Operand,
    },
    /// `value BETWEEN low AND high`.
    Between {
        /// Tested operand.
        value: Operand,
        /// Inclusive lower bound.
        low: Operand,
        /// Inclusive upper bound.
        high: Operand,
    },
    /// `value IN (candidates...)`.
    In {
        /// Tested operand.
        value: Operand,
        /// Candidates.
        list: Vec<Operand>,
    },
    /// `left AND right`.
    And(Box<Expr>, Box<Expr>),
    /// `left OR right`.
    Or(Box<Expr>, Box<Expr>),
    /// `NOT inner`.
    Not(Box<Expr>),
    /// `begins_with(path, operand)`.
    BeginsWith(Operand, Operand),
    /// `contains(path, operand)`.
    Contains(Operand, Operand),
    /// `attribute_exists(path)`.
    Exists(Operand),
    /// `attribute_not_exists(path)`.
    NotExists(Operand),
}

/// One `ADD path :value` action.
#[derive(Debug, Clone)]
pub struct AddAction {
    /// Target attribute path.
    pub path: Operand,
    /// The value placeholder to add.
    pub value: Operand,
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn bump(&mut self) -> Token {
        let token = self.tokens.get(self.pos).cloned().unwrap_or(Token::Eof);
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<(), EvalError> {
        let token = self.bump();
        if token == *expected {
            Ok(())
        } else {
            Err(EvalError::UnexpectedToken {
                expected: expected.to_string(),
                found: token.to_string(),
            })
        }
    }

    fn or_expr(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.and_expr()?;
        while *self.peek() == Token::Or {
            self.bump();
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.not_expr()?;
        while *self.peek() == Token::And {
            self.bump();
            let right = self.not_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr, EvalError> {
        if *self.peek() == Token::Not {
            self.bump();
            return Ok(Expr::Not(Box::new(self.not_expr()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, EvalError> {
        match self.bump() {
            Token::LParen => {
                let inner = self.or_expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Token::BeginsWith => {
                let (a, b) = self.two_args()?;
                Ok(Expr::BeginsWith(a, b))
            }
            Token::Contains => {
                let (a, b) = self.two_args()?;
                Ok(Expr::Contains(a, b))
            }
            Token::AttributeExists => Ok(Expr::Exists(self.one_arg()?)),
            Token::AttributeNotExists => Ok(Expr::NotExists(self.one_arg()?)),
            Token::Ident(name) => self.operand_tail(Operand::Path(name)),
            Token::Name(name) => self.operand_tail(Operand::Path(format!("#{name}"))),
            Token::ValueRef(name) => self.operand_tail(Operand::ValueRef(name)),
            other => Err(EvalError::UnexpectedToken {
                expected: "an operand, function or '('".to_owned(),
                found: other.to_string(),
            }),
        }
    }

    fn operand_tail(&mut self, left: Operand) -> Result<Expr, EvalError> {
        match self.bump() {
            Token::Eq => Ok(self.compare(left, CompareOp::Eq)?),
            Token::Ne => Ok(self.compare(left, CompareOp::Ne)?),
            Token::Lt => Ok(self.compare(left, CompareOp::Lt)?),
            Token::Le => Ok(self.compare(left, CompareOp::Le)?),
            Token::Gt => Ok(self.compare(left, CompareOp::Gt)?),
            Token::Ge => Ok(self.compare(left, CompareOp::Ge)?),
            Token::Between => {
                let low = self.operand()?;
                self.expect(&Token::And)?;
                let high = self.operand()?;
                Ok(Expr::Between {
                    value: left,
                    low,
                    high,
                })
            }
            Token::In => {
                self.expect(&Token::LParen)?;
                let mut list = vec![self.operand()?];
                while *self.peek() == Token::Comma {
                    self.bump();
                    list.push(self.operand()?);
                }
                self.expect(&Token::RParen)?;
                Ok(Expr::In { value: left, list })
            }
            other => Err(EvalError::UnexpectedToken {
                expected: "a comparison, BETWEEN or IN".to_owned(),
                found: other.to_string(),
            }),
        }
    }

    fn compare(&mut self, left: Operand, op: CompareOp) -> Result<Expr, EvalError> {
        let right = self.operand()?;
        Ok(Expr::Compare { left, op, right })
    }

    fn operand(&mut self) -> Result<Operand, EvalError> {
        match self.bump() {
            Token::Ident(name) => Ok(Operand::Path(name)),
            Token::Name(name) => Ok(Operand::Path(format!("#{name}"))),
            Token::ValueRef(name) => Ok(Operand::ValueRef(name)),
            Token::Eof => Err(EvalError::UnexpectedEof),
            other => Err(EvalError::UnexpectedToken {
                expected: "an operand".to_owned(),
                found: other.to_string(),
            }),
        }
    }

    fn one_arg(&mut self) -> Result<Operand, EvalError> {
        self.expect(&Token::LParen)?;
        let arg = self.operand()?;
        self.expect(&Token::RParen)?;
        Ok(arg)
    }

    fn two_args(&mut self) -> Result<(Operand, Operand), EvalError> {
        self.expect(&Token::LParen)?;
        let a = self.operand()?;
        self.expect(&Token::Comma)?;
        let b = self.operand()?;
        self.expect(&Token::RParen)?;
        Ok((a, b))
    }
}

/// Parses a condition, filter or key-condition expression.
///
/// # Errors
///
/// Returns [`EvalError`] on malformed input.
pub fn parse_condition(input: &str) -> Result<Expr, EvalError> {
    let mut parser = Parser {
        tokens: lex(input)?,
        pos: 0,
    };
    let expr = parser.or_expr()?;
    parser.expect(&Token::Eof)?;
    Ok(expr)
}

/// Parses an `ADD`-only update expression.
///
/// # Errors
///
/// Returns [`EvalError`] on malformed input or unsupported clauses.
pub fn parse_update(input: &str) -> Result<Vec<AddAction>, EvalError> {
    let mut parser = Parser {
        tokens: lex(input)?,
        pos: 0,
    };
    parser.expect(&Token::Add)?;
    let mut actions = Vec::new();
    loop {
        let path = parser.operand()?;
        let value = parser.operand()?;
        actions.push(AddAction { path, value });
        if *parser.peek() == Token::Comma {
            parser.bump();
        } else {
            break;
        }
    }
    parser.expect(&Token::Eof)?;
    Ok(actions)
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Binds an item to its expression name/value substitutions.
#[derive(Debug)]
pub struct EvalContext<'a> {
    /// The item under evaluation.
    pub item: &'a Item,
    /// `#name` substitutions.
    pub names: &'a HashMap<String, String>,
    /// `:value` substitutions.
    pub values: &'a HashMap<String, AttributeValue>,
}

impl EvalContext<'_> {
    /// Evaluates a condition to a boolean.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError`] for unresolved placeholders.
    pub fn eval(&self, expr: &Expr) -> Result<bool, EvalError> {
        match expr {
            Expr::Compare { left, op, right } => {
                let left = self.resolve(left)?;
                let right = self.resolve(right)?;
                Ok(match (left, right) {
                    (Some(a), Some(b)) => compare_values(a, b, *op),
                    // Missing attributes compare false, except `<>`.
                    _ => *op == CompareOp::Ne,
                })
            }
            Expr::Between { value, low, high } => {
                let (Some(v), Some(lo), Some(hi)) = (
                    self.resolve(value)?,
                    self.resolve(low)?,
                    self.resolve(high)?,
                ) else {
                    return Ok(false);
                };
                Ok(compare_values(v, lo, CompareOp::Ge) && compare_values(v, hi, CompareOp::Le))
            }
            Expr::In { value, list } => {
                let Some(v) = self.resolve(value)? else {
                    return Ok(false);
                };
                for candidate in list {
                    if let Some(c) = self.resolve(candidate)? {
                        if compare_values(v, c, CompareOp::Eq) {
                            return Ok(true);
                        }
                    }
                }
                Ok(false)
            }
            Expr::And(left, right) => Ok(self.eval(left)? && self.eval(right)?),
            Expr::Or(left, right) => Ok(self.eval(left)? || self.eval(right)?),
            Expr::Not(inner) => Ok(!self.eval(inner)?),
            Expr::BeginsWith(path, prefix) => {
                let (Some(a), Some(p)) = (self.resolve(path)?, self.resolve(prefix)?) else {
                    return Ok(false);
                };
                Ok(matches!(
                    (a, p),
                    (AttributeValue::S(s), AttributeValue::S(prefix)) if s.starts_with(prefix.as_str())
                ))
            }
            Expr::Contains(path, needle) => {
                let (Some(a), Some(n)) = (self.resolve(path)?, self.resolve(needle)?) else {
                    return Ok(false);
                };
                Ok(contains(a, n))
            }
            Expr::Exists(path) => Ok(self.resolve(path)?.is_some()),
            Expr::NotExists(path) => Ok(self.resolve(path)?.is_none()),
        }
    }

    /// Resolves an operand to an attribute value; `None` for attributes the
    /// item does not carry.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError`] for unresolved placeholders.
    pub fn resolve(&self, operand: &Operand) -> Result<Option<&AttributeValue>, EvalError> {
        match operand {
            Operand::Path(path) => {
                let name = if let Some(placeholder) = path.strip_prefix('#') {
                    self.names
                        .get(path.as_str())
                        .map(String::as_str)
                        .ok_or_else(|| EvalError::UnresolvedName(placeholder.to_owned()))?
                } else {
                    path.as_str()
                };
                Ok(self.item.get(name))
            }
            Operand::ValueRef(name) => self
                .values
                .get(&format!(":{name}"))
                .map(Some)
                .ok_or_else(|| EvalError::UnresolvedValue(name.clone())),
        }
    }
}

fn compare_values(a: &AttributeValue, b: &AttributeValue, op: CompareOp) -> bool {
    use std::cmp::Ordering;

    let ordering = match (a, b) {
        (AttributeValue::S(x), AttributeValue::S(y)) => Some(x.as_bytes().cmp(y.as_bytes())),
        (AttributeValue::N(x), AttributeValue::N(y)) => {
            let (x, y) = (
                x.parse::<f64>().unwrap_or(f64::NAN),
                y.parse::<f64>().unwrap_or(f64::NAN),
            );
            x.partial_cmp(&y)
        }
        (AttributeValue::B(x), AttributeValue::B(y)) => Some(x.as_ref().cmp(y.as_ref())),
        (AttributeValue::Bool(x), AttributeValue::Bool(y)) => {
            return match op {
                CompareOp::Eq => x == y,
                CompareOp::Ne => x != y,
                _ => false,
            };
        }
        // Mismatched types are never equal and never ordered.
        _ => None,
    };

    match (ordering, op) {
        (Some(Ordering::Equal), CompareOp::Eq | CompareOp::Le | CompareOp::Ge) => true,
        (Some(Ordering::Less), CompareOp::Lt | CompareOp::Le | CompareOp::Ne) => true,
        (Some(Ordering::Greater), CompareOp::Gt | CompareOp::Ge | CompareOp::Ne) => true,
        (None, CompareOp::Ne) => true,
        _ => false,
    }
}

fn contains(haystack: &AttributeValue, needle: &AttributeValue) -> bool {
    match (haystack, needle) {
        (AttributeValue::S(s), AttributeValue::S(sub)) => s.contains(sub.as_str()),
        (AttributeValue::Ss(set), AttributeValue::S(v)) => set.iter().any(|s| s == v),
        (AttributeValue::Ns(set), AttributeValue::N(v)) => set.iter().any(|n| n == v),
        (AttributeValue::Bs(set), AttributeValue::B(v)) => set.iter().any(|b| b == v),
        (AttributeValue::L(list), value) => {
            list.iter().any(|elem| compare_values(elem, value, CompareOp::Eq))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(pairs: &[(&str, AttributeValue)]) -> Item {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    fn eval(expr: &str, item: &Item, values: &[(&str, AttributeValue)]) -> bool {
        let names = HashMap::new();
        let values: HashMap<String, AttributeValue> = values
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect();
        let ctx = EvalContext {
            item,
            names: &names,
            values: &values,
        };
        ctx.eval(&parse_condition(expr).unwrap()).unwrap()
    }

    #[test]
    fn test_should_evaluate_numeric_comparisons() {
        let record = item(&[("Total", AttributeValue::N("150".to_owned()))]);
        let bound = [(":v", AttributeValue::N("100".to_owned()))];
        assert!(eval("Total > :v", &record, &bound));
        assert!(!eval("Total < :v", &record, &bound));
        assert!(eval("Total <> :v", &record, &bound));
    }

    #[test]
    fn test_should_resolve_name_placeholders() {
        let record = item(&[("Status", AttributeValue::S("open".to_owned()))]);
        let names: HashMap<String, String> =
            [("#s".to_owned(), "Status".to_owned())].into_iter().collect();
        let values: HashMap<String, AttributeValue> =
            [(":v".to_owned(), AttributeValue::S("open".to_owned()))]
                .into_iter()
                .collect();
        let ctx = EvalContext {
            item: &record,
            names: &names,
            values: &values,
        };
        assert!(ctx.eval(&parse_condition("#s = :v").unwrap()).unwrap());
    }

    #[test]
    fn test_should_evaluate_logical_combinators() {
        let record = item(&[
            ("A", AttributeValue::N("1".to_owned())),
            ("B", AttributeValue::N("2".to_owned())),
        ]);
        let bound = [
            (":a", AttributeValue::N("1".to_owned())),
            (":b", AttributeValue::N("9".to_owned())),
        ];
        assert!(eval("A = :a AND B < :b", &record, &bound));
        assert!(eval("A = :b OR B < :b", &record, &bound));
        assert!(eval("NOT A = :b", &record, &bound));
        assert!(eval("(A = :a) AND (NOT (B > :b))", &record, &bound));
    }

    #[test]
    fn test_should_evaluate_between_and_in() {
        let record = item(&[("N", AttributeValue::N("5".to_owned()))]);
        let bound = [
            (":lo", AttributeValue::N("1".to_owned())),
            (":hi", AttributeValue::N("9".to_owned())),
            (":x", AttributeValue::N("4".to_owned())),
            (":y", AttributeValue::N("5".to_owned())),
        ];
        assert!(eval("N BETWEEN :lo AND :hi", &record, &bound));
        assert!(!eval("N BETWEEN :x AND :lo", &record, &bound));
        assert!(eval("N IN (:x, :y)", &record, &bound));
        assert!(!eval("N IN (:x, :lo)", &record, &bound));
    }

    #[test]
    fn test_should_evaluate_functions() {
        let record = item(&[("Sku", AttributeValue::S("user#42".to_owned()))]);
        let bound = [
            (":p", AttributeValue::S("user#".to_owned())),
            (":c", AttributeValue::S("r#4".to_owned())),
        ];
        assert!(eval("begins_with(Sku, :p)", &record, &bound));
        assert!(eval("contains(Sku, :c)", &record, &bound));
        assert!(eval("attribute_exists(Sku)", &record, &bound));
        assert!(eval("attribute_not_exists(Missing)", &record, &bound));
    }

    #[test]
    fn test_should_treat_missing_attributes_as_non_matching() {
        let record = item(&[]);
        let bound = [(":v", AttributeValue::N("1".to_owned()))];
        assert!(!eval("Total = :v", &record, &bound));
        assert!(eval("Total <> :v", &record, &bound));
        assert!(!eval("Total BETWEEN :v AND :v", &record, &bound));
    }

    #[test]
    fn test_should_parse_add_update() {
        let actions = parse_update("ADD #f :d").unwrap();
        assert_eq!(actions.len(), 1);
        assert!(matches!(&actions[0].path, Operand::Path(p) if p == "#f"));
        assert!(matches!(&actions[0].value, Operand::ValueRef(v) if v == "d"));

        let actions = parse_update("ADD A :x, B :y").unwrap();
        assert_eq!(actions.len(), 2);
    }

    #[test]
    fn test_should_reject_malformed_expressions() {
        assert!(parse_condition("Total >").is_err());
        assert!(parse_condition("(Total = :v").is_err());
        assert!(parse_condition("Total = :v extra").is_err());
        assert!(parse_update("SET A = :x").is_err());
    }

    #[test]
    fn test_should_fail_on_unresolved_placeholders() {
        let record = item(&[("A", AttributeValue::N("1".to_owned()))]);
        let names = HashMap::new();
        let values = HashMap::new();
        let ctx = EvalContext {
            item: &record,
            names: &names,
            values: &values,
        };
        assert!(matches!(
            ctx.eval(&parse_condition("A = :missing").unwrap()),
            Err(EvalError::UnresolvedValue(_))
        ));
        assert!(matches!(
            ctx.eval(&parse_condition("#missing = :v").unwrap()),
            Err(EvalError::UnresolvedName(_))
        ));
    }
}
