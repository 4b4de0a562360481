//! Parser for the search query language.
//!
//! The grammar lives in `query.pest`. Parsing produces a [`Query`], a tree of
//! [`Expr`] nodes whose leaves are field-scoped [`Term`]s. Field names are not
//! checked against any table here; that happens when the query is compiled
//! for a specific table.

use std::fmt;
use std::str::FromStr;

use pest::Parser;
use pest::error::InputLocation;
use pest::iterators::Pair;
use pest_derive::Parser;

use crate::error::{RepoError, Result};
use crate::schema::ANY;

#[derive(Parser)]
#[grammar = "query.pest"]
struct QueryParser;

// ------------- Pattern -------------
/// The text a term is matched against.
///
/// Anchors are stripped from the text and kept as flags. Quoted patterns are
/// literal: wildcard and anchor characters inside them mean themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    text: String,
    literal: bool,
    anchored_start: bool,
    anchored_end: bool,
}

impl Pattern {
    pub fn bare(token: &str) -> Self {
        let (anchored_start, rest) = match token.strip_prefix('^') {
            Some(rest) => (true, rest),
            None => (false, token),
        };
        let (anchored_end, text) = match rest.strip_suffix('$') {
            Some(text) => (true, text),
            None => (false, rest),
        };
        Self {
            text: text.to_string(),
            literal: false,
            anchored_start,
            anchored_end,
        }
    }
    pub fn quoted(text: &str) -> Self {
        Self {
            text: text.to_string(),
            literal: true,
            anchored_start: false,
            anchored_end: false,
        }
    }
    pub fn text(&self) -> &str {
        &self.text
    }
    pub fn is_literal(&self) -> bool {
        self.literal
    }
    pub fn anchored_start(&self) -> bool {
        self.anchored_start
    }
    pub fn anchored_end(&self) -> bool {
        self.anchored_end
    }
    pub fn is_anchored(&self) -> bool {
        self.anchored_start || self.anchored_end
    }
    /// True when the text carries `%` or `_` that should act as wildcards.
    pub fn has_wildcards(&self) -> bool {
        !self.literal && self.text.contains(['%', '_'])
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.literal {
            return write!(f, "\"{}\"", self.text);
        }
        let start = if self.anchored_start { "^" } else { "" };
        let end = if self.anchored_end { "$" } else { "" };
        write!(f, "{start}{}{end}", self.text)
    }
}

// ------------- Term -------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    field: String,
    pattern: Pattern,
}

impl Term {
    /// `field` is normalised to upper case; an empty field means [`ANY`].
    pub fn new(field: &str, pattern: Pattern) -> Self {
        let field = field.trim();
        let field = if field.is_empty() { ANY.to_string() } else { field.to_uppercase() };
        Self { field, pattern }
    }
    pub fn field(&self) -> &str {
        &self.field
    }
    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }
    pub fn is_any(&self) -> bool {
        self.field == ANY
    }
}

// ------------- Expr -------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Term(Term),
    Group(Box<Expr>),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Expr::Term(term) if term.is_any() => write!(f, "{}", term.pattern),
            Expr::Term(term) => write!(f, "@{} {}", term.field.to_lowercase(), term.pattern),
            Expr::Group(inner) => write!(f, "({inner})"),
            Expr::Not(inner) => write!(f, "!{inner}"),
            Expr::And(items) => join(f, items, " & "),
            Expr::Or(items) => join(f, items, " | "),
        }
    }
}

fn join(f: &mut fmt::Formatter, items: &[Expr], separator: &str) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(separator)?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

// ------------- Query -------------
/// A parsed search expression. The empty query matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    root: Option<Expr>,
}

impl Query {
    pub fn parse(text: &str) -> Result<Self> {
        check_structure(text)?;
        let mut pairs = QueryParser::parse(Rule::query, text)
            .map_err(|e| malformed(text, e))?;
        let root = pairs
            .next()
            .and_then(|query| query.into_inner().find(|p| p.as_rule() == Rule::expr))
            .map(build_expr);
        Ok(Self { root })
    }
    pub fn root(&self) -> Option<&Expr> {
        self.root.as_ref()
    }
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }
}

impl FromStr for Query {
    type Err = RepoError;
    fn from_str(s: &str) -> Result<Self> {
        Query::parse(s)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.root {
            Some(root) => write!(f, "{root}"),
            None => Ok(()),
        }
    }
}

// Collapses single-child AND/OR levels so `a` is a Term, not And([Term]).
fn collapse(mut items: Vec<Expr>, wrap: fn(Vec<Expr>) -> Expr) -> Expr {
    if items.len() == 1 {
        items.remove(0)
    } else {
        wrap(items)
    }
}

fn build_expr(pair: Pair<Rule>) -> Expr {
    match pair.as_rule() {
        Rule::expr => collapse(
            pair.into_inner()
                .filter(|p| p.as_rule() == Rule::conjunction)
                .map(build_expr)
                .collect(),
            Expr::Or,
        ),
        Rule::conjunction => collapse(
            pair.into_inner()
                .filter(|p| p.as_rule() == Rule::unary)
                .map(build_expr)
                .collect(),
            Expr::And,
        ),
        Rule::unary => {
            let mut negated = false;
            let mut operand = None;
            for inner in pair.into_inner() {
                match inner.as_rule() {
                    Rule::not_op => negated = true,
                    _ => operand = Some(build_expr(inner)),
                }
            }
            // the grammar always yields an operand after the optional '!'
            let operand = operand.unwrap_or(Expr::And(Vec::new()));
            if negated { Expr::Not(Box::new(operand)) } else { operand }
        }
        Rule::group => {
            let inner = pair
                .into_inner()
                .next()
                .map(build_expr)
                .unwrap_or(Expr::And(Vec::new()));
            Expr::Group(Box::new(inner))
        }
        Rule::field_term => {
            let mut field = "";
            let mut pattern = Pattern::bare("");
            for inner in pair.into_inner() {
                match inner.as_rule() {
                    Rule::field => field = &inner.as_str()[1..],
                    Rule::quoted => {
                        let literal = inner.into_inner().next().map(|l| l.as_str()).unwrap_or("");
                        pattern = Pattern::quoted(literal);
                    }
                    _ => pattern = Pattern::bare(inner.as_str()),
                }
            }
            Expr::Term(Term::new(field, pattern))
        }
        _ => Expr::And(Vec::new()),
    }
}

// Quotes, field markers and parentheses are checked up front so the error
// can say what is wrong instead of where the PEG gave up.
fn check_structure(text: &str) -> Result<()> {
    let mut depth = 0i32;
    let mut quote = None;
    let mut previous = None;
    let mut chars = text.char_indices().peekable();
    while let Some((position, c)) = chars.next() {
        let starts_token = previous.is_none_or(|p: char| p.is_whitespace() || "()&|!".contains(p));
        previous = Some(c);
        if quote.is_some() {
            if c == '"' {
                quote = None;
            }
            continue;
        }
        match c {
            '"' => quote = Some(position),
            '@' if starts_token
                && !chars.peek().is_some_and(|(_, n)| n.is_ascii_alphanumeric() || *n == '_') =>
            {
                return Err(RepoError::MalformedCommand(format!(
                    "missing field name after '@' at position {position}: {:?}",
                    &text[position..]
                )));
            }
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return Err(RepoError::MalformedCommand(format!(
                        "unbalanced parentheses in query at position {position}: {:?}",
                        &text[position..]
                    )));
                }
            }
            _ => (),
        }
    }
    if let Some(position) = quote {
        return Err(RepoError::MalformedCommand(format!(
            "unterminated quote in query at position {position}: {:?}",
            &text[position..]
        )));
    }
    if depth > 0 {
        return Err(RepoError::MalformedCommand(format!(
            "unbalanced parentheses in query: {depth} unclosed in {text:?}"
        )));
    }
    Ok(())
}

fn malformed(text: &str, error: pest::error::Error<Rule>) -> RepoError {
    let position = match error.location {
        InputLocation::Pos(p) => p,
        InputLocation::Span((start, _)) => start,
    };
    let fragment = text.get(position..).unwrap_or("");
    let reason = if fragment.trim().is_empty() || fragment.trim_start().starts_with(['&', '|']) {
        "dangling operator"
    } else {
        "unexpected input"
    };
    RepoError::MalformedCommand(format!(
        "{reason} in query at position {position}: {fragment:?}"
    ))
}
