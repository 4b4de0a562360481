//! falocalrepo – search, export and edit a local archive of users, submissions and journals.
//!
//! The archive is a SQLite file with three record tables (`USERS`,
//! `SUBMISSIONS`, `JOURNALS`), a `SETTINGS` table carrying the schema
//! `VERSION`, and a `HISTORY` table of every command run against it.
//!
//! ## Searching
//! A search combines two inputs:
//! * `name=value` parameters, collected by [`params::ParameterGroup`]. Values
//!   given under the same name form an OR-group, different names are ANDed.
//! * A free-text query parsed by [`query::Query`]: `@field` scopes, `&` and
//!   `|` (AND binds tighter), `!` negation, parentheses, `"literal"` text, `%`
//!   and `_` wildcards and `^`/`$` anchors.
//!
//! [`compile::Compiler`] lowers both into one [`compile::CompiledPredicate`]:
//! placeholder SQL plus the bound values. Whether a term is matched exactly or
//! as a substring depends only on the column ([`schema::Policy`]).
//!
//! ## Output
//! [`archive::Archive::select`] hands a lazy [`archive::Cursor`] to one of the
//! [`render`] sinks (table, CSV, TSV, JSON or a counting sink). The table fits
//! its columns to the terminal by display width ([`width`]).
//!
//! ## Commands
//! [`dispatch::ROUTES`] maps every `(command, operation)` pair to a handler in
//! [`commands`], a version gate and an access mode. Writes are refused while
//! another instance works on the same archive ([`guard`]).
//!
//! ## Quick Start
//! ```
//! use falocalrepo::compile::Compiler;
//! use falocalrepo::params::ParameterGroup;
//! use falocalrepo::query::Query;
//! use falocalrepo::schema::Table;
//!
//! let (parameters, rest) = ParameterGroup::accumulate(["tags=cat", "tags=mouse", "@author", "tom"]);
//! let query = Query::parse(&rest.join(" ")).unwrap();
//! let predicate = Compiler::new(Table::Submissions).compile(&query, &parameters).unwrap();
//! assert_eq!(predicate.values(), ["tom", "%cat%", "%mouse%"]);
//! ```

pub mod archive;
pub mod commands;
pub mod compile;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod guard;
pub mod help;
pub mod params;
pub mod query;
pub mod render;
pub mod schema;
pub mod width;
