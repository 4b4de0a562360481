//! Static description of the archive tables.
//!
//! Every record table is a fixed list of [`Column`]s. A column carries its
//! storage [`Kind`] and the [`Policy`] used when a search term targets it, so
//! that the compiler never has to look at runtime data to decide how a field
//! is matched.

use std::fmt;
use std::str::FromStr;

use crate::error::{RepoError, Result};

/// Version of the archive layout this build reads and writes.
pub const VERSION: &str = "5.1";

/// The sentinel field that expands to every column of a table.
pub const ANY: &str = "ANY";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Integer,
    Text,
    /// `|`-delimited text surfaced as a list of strings.
    List,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Exact,
    Substring,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Column {
    name: &'static str,
    kind: Kind,
}

impl Column {
    const fn new(name: &'static str, kind: Kind) -> Self {
        Self { name, kind }
    }
    pub fn name(&self) -> &'static str {
        self.name
    }
    pub fn kind(&self) -> Kind {
        self.kind
    }
    // identifier-like columns are compared for equality, everything else by containment
    pub fn policy(&self) -> Policy {
        match self.name {
            "ID" | "AUTHOR" | "USERNAME" => Policy::Exact,
            _ => Policy::Substring,
        }
    }
}

const USERS: &[Column] = &[
    Column::new("USERNAME", Kind::Text),
    Column::new("FOLDERS", Kind::List),
    Column::new("ACTIVE", Kind::Integer),
    Column::new("USERPAGE", Kind::Text),
];

const SUBMISSIONS: &[Column] = &[
    Column::new("ID", Kind::Integer),
    Column::new("AUTHOR", Kind::Text),
    Column::new("TITLE", Kind::Text),
    Column::new("DATE", Kind::Text),
    Column::new("DESCRIPTION", Kind::Text),
    Column::new("TAGS", Kind::List),
    Column::new("CATEGORY", Kind::Text),
    Column::new("SPECIES", Kind::Text),
    Column::new("GENDER", Kind::Text),
    Column::new("RATING", Kind::Text),
    Column::new("TYPE", Kind::Text),
    Column::new("FILEURL", Kind::Text),
    Column::new("FILEEXT", Kind::Text),
    Column::new("FILESAVED", Kind::Integer),
    Column::new("FAVORITE", Kind::List),
    Column::new("MENTIONS", Kind::List),
    Column::new("FOLDER", Kind::Text),
    Column::new("USERUPDATE", Kind::Integer),
];

const JOURNALS: &[Column] = &[
    Column::new("ID", Kind::Integer),
    Column::new("AUTHOR", Kind::Text),
    Column::new("TITLE", Kind::Text),
    Column::new("DATE", Kind::Text),
    Column::new("CONTENT", Kind::Text),
    Column::new("MENTIONS", Kind::List),
    Column::new("USERUPDATE", Kind::Integer),
];

/// One of the three record tables of an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Table {
    Users,
    Submissions,
    Journals,
}

impl Table {
    pub const ALL: [Table; 3] = [Table::Users, Table::Submissions, Table::Journals];

    /// SQL name of the table.
    pub fn name(&self) -> &'static str {
        match self {
            Table::Users => "USERS",
            Table::Submissions => "SUBMISSIONS",
            Table::Journals => "JOURNALS",
        }
    }
    pub fn columns(&self) -> &'static [Column] {
        match self {
            Table::Users => USERS,
            Table::Submissions => SUBMISSIONS,
            Table::Journals => JOURNALS,
        }
    }
    /// The first column is always the key.
    pub fn key(&self) -> &'static Column {
        &self.columns()[0]
    }
    /// Case-insensitive column lookup.
    pub fn column(&self, name: &str) -> Option<&'static Column> {
        self.columns()
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name.trim()))
    }
    /// Like [`Table::column`], but an unknown name is a user error.
    pub fn require(&self, name: &str) -> Result<&'static Column> {
        self.column(name).ok_or_else(|| {
            RepoError::MalformedCommand(format!(
                "unknown column '{}' for table {}",
                name.trim(),
                self.to_string()
            ))
        })
    }
    /// Columns shown by `search` when none are requested: name and width hint.
    pub fn default_headers(&self) -> Vec<(String, usize)> {
        let headers: &[(&str, usize)] = match self {
            Table::Users => &[("USERNAME", 40), ("FOLDERS", 0)],
            Table::Submissions | Table::Journals => {
                &[("ID", 10), ("AUTHOR", 16), ("DATE", 16), ("TITLE", 0)]
            }
        };
        headers.iter().map(|(n, w)| (n.to_string(), *w)).collect()
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name().to_lowercase())
    }
}

impl FromStr for Table {
    type Err = RepoError;
    fn from_str(s: &str) -> Result<Self> {
        Table::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| RepoError::MalformedCommand(format!("unknown table '{s}'")))
    }
}

// ------------- Lists -------------
/// Stored form of a list column: `|a|b|`.
pub fn join_list<S: AsRef<str>>(items: &[S]) -> String {
    if items.is_empty() {
        return String::new();
    }
    let mut joined = String::from("|");
    for item in items {
        joined.push_str(item.as_ref());
        joined.push('|');
    }
    joined
}

pub fn split_list(stored: &str) -> Vec<String> {
    stored
        .split('|')
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
