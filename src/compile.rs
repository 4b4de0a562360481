//! Lowers queries and parameter groups to SQL predicates.
//!
//! The output is always placeholder SQL plus an ordered list of values; user
//! text never ends up inside the expression itself. How a term is compared
//! depends only on the [`Policy`] of the column it targets.

use std::fmt;

use crate::error::{RepoError, Result};
use crate::params::ParameterGroup;
use crate::query::{Expr, Pattern, Query, Term};
use crate::schema::{ANY, Column, Policy, Table};

/// Parameter names that steer sorting and paging instead of matching.
pub const RESERVED: [&str; 3] = ["order", "limit", "offset"];

// ------------- CompiledPredicate -------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledPredicate {
    expression: String,
    values: Vec<String>,
}

impl CompiledPredicate {
    /// Matches every row.
    pub fn all() -> Self {
        Self { expression: "1".to_string(), values: Vec::new() }
    }
    /// Caller supplied SQL, used as is.
    pub fn raw(sql: &str) -> Self {
        Self { expression: sql.to_string(), values: Vec::new() }
    }
    /// Plain equality on one column.
    pub fn equals(column: &Column, value: &str) -> Self {
        Self {
            expression: format!("{} = ?", column.name()),
            values: vec![value.to_string()],
        }
    }
    pub fn expression(&self) -> &str {
        &self.expression
    }
    pub fn values(&self) -> &[String] {
        &self.values
    }
    pub fn is_all(&self) -> bool {
        self.expression == "1" && self.values.is_empty()
    }
    /// Conjunction of two predicates; the match-all side disappears.
    pub fn and(self, other: CompiledPredicate) -> Self {
        if self.is_all() {
            return other;
        }
        if other.is_all() {
            return self;
        }
        let mut values = self.values;
        values.extend(other.values);
        Self {
            expression: format!("({}) AND ({})", self.expression, other.expression),
            values,
        }
    }
    /// Disjunction of two predicates; a match-all side matches everything.
    pub fn or(self, other: CompiledPredicate) -> Self {
        if self.is_all() || other.is_all() {
            return CompiledPredicate::all();
        }
        let mut values = self.values;
        values.extend(other.values);
        Self {
            expression: format!("({}) OR ({})", self.expression, other.expression),
            values,
        }
    }
}

impl fmt::Display for CompiledPredicate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.expression)
    }
}

// ------------- Comparison -------------
/// How one pattern is compared against one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Comparison {
    /// Case-insensitive equality with the value.
    Equal(String),
    /// `LIKE` with `\` as the escape character.
    Like(String),
}

impl Comparison {
    pub fn resolve(policy: Policy, pattern: &Pattern) -> Self {
        if pattern.is_literal() {
            return match policy {
                Policy::Exact => Comparison::Equal(pattern.text().to_string()),
                Policy::Substring => Comparison::Like(open(&escape_all(pattern.text()), false, false)),
            };
        }
        let text = escape_backslash(pattern.text());
        match policy {
            Policy::Exact if !pattern.has_wildcards() && !pattern.is_anchored() => {
                Comparison::Equal(pattern.text().to_string())
            }
            Policy::Exact if !pattern.is_anchored() => Comparison::Like(text),
            _ => Comparison::Like(open(&text, pattern.anchored_start(), pattern.anchored_end())),
        }
    }

    fn write(self, column: &Column, out: &mut Builder) {
        match self {
            Comparison::Equal(value) => {
                out.sql.push_str(column.name());
                out.sql.push_str(" = ? COLLATE NOCASE");
                out.values.push(value);
            }
            Comparison::Like(value) => {
                out.sql.push_str(column.name());
                out.sql.push_str(" LIKE ? ESCAPE '\\'");
                out.values.push(value);
            }
        }
    }
}

// leaves the un-anchored sides open
fn open(text: &str, anchored_start: bool, anchored_end: bool) -> String {
    let start = if anchored_start { "" } else { "%" };
    let end = if anchored_end { "" } else { "%" };
    format!("{start}{text}{end}")
}

fn escape_backslash(text: &str) -> String {
    text.replace('\\', "\\\\")
}

fn escape_all(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[derive(Default)]
struct Builder {
    sql: String,
    values: Vec<String>,
}

impl Builder {
    fn finish(self) -> CompiledPredicate {
        debug_assert_eq!(self.sql.matches('?').count(), self.values.len());
        CompiledPredicate { expression: self.sql, values: self.values }
    }
}

// ------------- Compiler -------------
/// Compiles queries for one table.
#[derive(Debug, Clone, Copy)]
pub struct Compiler {
    table: Table,
}

impl Compiler {
    pub fn new(table: Table) -> Self {
        Self { table }
    }

    pub fn table(&self) -> Table {
        self.table
    }

    /// The free-text query and the parameters, ANDed.
    pub fn compile(&self, query: &Query, parameters: &ParameterGroup) -> Result<CompiledPredicate> {
        Ok(self.compile_query(query)?.and(self.compile_parameters(parameters)?))
    }

    pub fn compile_query(&self, query: &Query) -> Result<CompiledPredicate> {
        match query.root() {
            None => Ok(CompiledPredicate::all()),
            Some(root) => {
                let mut out = Builder::default();
                self.lower(root, &mut out)?;
                Ok(out.finish())
            }
        }
    }

    /// Values under one name are ORed, names are ANDed. Reserved names are skipped.
    pub fn compile_parameters(&self, parameters: &ParameterGroup) -> Result<CompiledPredicate> {
        let groups: Vec<Expr> = parameters
            .iter()
            .filter(|(name, _)| !RESERVED.contains(&name.to_lowercase().as_str()))
            .map(|(name, values)| {
                Expr::Or(
                    values
                        .iter()
                        .map(|v| Expr::Term(Term::new(name, Pattern::bare(v))))
                        .collect(),
                )
            })
            .collect();
        if groups.is_empty() {
            return Ok(CompiledPredicate::all());
        }
        let mut out = Builder::default();
        self.lower(&Expr::And(groups), &mut out)?;
        Ok(out.finish())
    }

    fn lower(&self, expr: &Expr, out: &mut Builder) -> Result<()> {
        match expr {
            Expr::Term(term) => self.lower_term(term, out)?,
            Expr::Group(inner) => {
                out.sql.push('(');
                self.lower(inner, out)?;
                out.sql.push(')');
            }
            Expr::Not(inner) => {
                out.sql.push_str("NOT (");
                self.lower(inner, out)?;
                out.sql.push(')');
            }
            Expr::And(items) => self.lower_all(items, " AND ", out)?,
            Expr::Or(items) => self.lower_all(items, " OR ", out)?,
        }
        Ok(())
    }

    fn lower_all(&self, items: &[Expr], operator: &str, out: &mut Builder) -> Result<()> {
        if items.is_empty() {
            out.sql.push('1');
            return Ok(());
        }
        out.sql.push('(');
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                out.sql.push_str(operator);
            }
            self.lower(item, out)?;
        }
        out.sql.push(')');
        Ok(())
    }

    fn lower_term(&self, term: &Term, out: &mut Builder) -> Result<()> {
        if term.field() == ANY {
            // every column keeps its own policy
            out.sql.push('(');
            for (i, column) in self.table.columns().iter().enumerate() {
                if i > 0 {
                    out.sql.push_str(" OR ");
                }
                Comparison::resolve(column.policy(), term.pattern()).write(column, out);
            }
            out.sql.push(')');
        } else {
            let column = self.table.require(term.field())?;
            Comparison::resolve(column.policy(), term.pattern()).write(column, out);
        }
        Ok(())
    }
}

// ------------- Paging -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

impl Order {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        }
    }
}

/// Sorting and paging pulled out of the reserved parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Paging {
    pub sort: Vec<(&'static Column, Order)>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl Paging {
    /// Removes `order`, `limit` and `offset` from `parameters`.
    ///
    /// `order` values read `COLUMN [asc|desc]` and may repeat; `limit` and
    /// `offset` take the last value given.
    pub fn take(table: Table, parameters: &mut ParameterGroup) -> Result<Self> {
        let mut paging = Paging::default();
        for value in parameters.take("order").unwrap_or_default() {
            paging.sort.push(parse_order(table, &value)?);
        }
        if let Some(limit) = parameters.take("limit").and_then(|v| v.last().cloned()) {
            paging.limit = Some(parse_count("limit", &limit)?);
        }
        if let Some(offset) = parameters.take("offset").and_then(|v| v.last().cloned()) {
            paging.offset = Some(parse_count("offset", &offset)?);
        }
        Ok(paging)
    }
}

fn parse_order(table: Table, value: &str) -> Result<(&'static Column, Order)> {
    let mut words = value.split_whitespace();
    let column = table.require(words.next().unwrap_or(""))?;
    let order = match words.next().map(str::to_lowercase).as_deref() {
        None | Some("asc") => Order::Asc,
        Some("desc") => Order::Desc,
        Some(other) => {
            return Err(RepoError::MalformedCommand(format!("invalid sort order '{other}'")));
        }
    };
    if let Some(extra) = words.next() {
        return Err(RepoError::MalformedCommand(format!("unexpected '{extra}' in order={value}")));
    }
    Ok((column, order))
}

fn parse_count(name: &str, value: &str) -> Result<u64> {
    match value.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(RepoError::MalformedCommand(format!(
            "{name} must be a positive integer, got '{value}'"
        ))),
    }
}
