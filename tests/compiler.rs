use falocalrepo::compile::{CompiledPredicate, Compiler, Order, Paging};
use falocalrepo::params::ParameterGroup;
use falocalrepo::query::Query;
use falocalrepo::schema::Table;
use proptest::prelude::*;

fn compile(table: Table, text: &str) -> CompiledPredicate {
    let query = Query::parse(text).expect("query parses");
    Compiler::new(table).compile_query(&query).expect("query compiles")
}

fn parameters(tokens: &[&str]) -> ParameterGroup {
    let (group, rest) = ParameterGroup::accumulate(tokens.iter().copied());
    assert!(rest.is_empty(), "every token is a parameter");
    group
}

#[test]
fn empty_query_is_match_all() {
    let predicate = compile(Table::Submissions, "");
    assert!(predicate.is_all());
    assert_eq!(predicate.expression(), "1");
}

#[test]
fn exact_columns_use_equality() {
    let predicate = compile(Table::Submissions, "@author tom");
    assert_eq!(predicate.expression(), "AUTHOR = ? COLLATE NOCASE");
    assert_eq!(predicate.values(), ["tom"]);
}

#[test]
fn substring_columns_use_like() {
    let predicate = compile(Table::Submissions, "@description cat");
    assert_eq!(predicate.expression(), "DESCRIPTION LIKE ? ESCAPE '\\'");
    assert_eq!(predicate.values(), ["%cat%"]);
}

#[test]
fn wildcards_switch_exact_columns_to_patterns() {
    let predicate = compile(Table::Submissions, "@author %tom%");
    assert_eq!(predicate.expression(), "AUTHOR LIKE ? ESCAPE '\\'");
    assert_eq!(predicate.values(), ["%tom%"]);
    let predicate = compile(Table::Users, "@username ^tom");
    assert_eq!(predicate.values(), ["tom%"]);
}

#[test]
fn anchors_close_their_side() {
    assert_eq!(compile(Table::Submissions, "@title ^cat").values(), ["cat%"]);
    assert_eq!(compile(Table::Submissions, "@title cat$").values(), ["%cat"]);
    assert_eq!(compile(Table::Submissions, "@title ^cat$").values(), ["cat"]);
}

#[test]
fn quoted_literals_escape_wildcards() {
    let predicate = compile(Table::Submissions, "@title \"50%_off\\\"");
    assert_eq!(predicate.values(), ["%50\\%\\_off\\\\%"]);
    let predicate = compile(Table::Submissions, "@author \"t_m\"");
    assert_eq!(predicate.expression(), "AUTHOR = ? COLLATE NOCASE");
    assert_eq!(predicate.values(), ["t_m"]);
}

#[test]
fn any_expands_over_every_column_with_its_own_policy() {
    let predicate = compile(Table::Users, "cat");
    assert_eq!(
        predicate.expression(),
        "(USERNAME = ? COLLATE NOCASE OR FOLDERS LIKE ? ESCAPE '\\' OR ACTIVE LIKE ? ESCAPE '\\' OR USERPAGE LIKE ? ESCAPE '\\')"
    );
    assert_eq!(predicate.values(), ["cat", "%cat%", "%cat%", "%cat%"]);
}

#[test]
fn precedence_and_negation_are_kept() {
    let predicate = compile(Table::Submissions, "@title a | @title b @title c");
    assert_eq!(
        predicate.expression(),
        "(TITLE LIKE ? ESCAPE '\\' OR (TITLE LIKE ? ESCAPE '\\' AND TITLE LIKE ? ESCAPE '\\'))"
    );
    let predicate = compile(Table::Submissions, "!(@title cat)");
    assert_eq!(predicate.expression(), "NOT ((TITLE LIKE ? ESCAPE '\\'))");
}

#[test]
fn unknown_field_is_malformed() {
    let query = Query::parse("@colour red").expect("parse");
    let err = Compiler::new(Table::Submissions).compile_query(&query).expect_err("no such column");
    assert_eq!(err.exit_code(), 2);
    assert!(err.to_string().contains("COLOUR"));
}

#[test]
fn repeated_parameters_form_an_or_group() {
    let group = parameters(&["tags=cat", "tags=mouse"]);
    let predicate = Compiler::new(Table::Submissions).compile_parameters(&group).expect("compile");
    assert_eq!(
        predicate.expression(),
        "((TAGS LIKE ? ESCAPE '\\' OR TAGS LIKE ? ESCAPE '\\'))"
    );
    assert!(!predicate.expression().contains("AND"));
    assert_eq!(predicate.values(), ["%cat%", "%mouse%"]);
}

#[test]
fn different_parameters_are_anded_with_the_query() {
    let group = parameters(&["tags=cat", "author=tom"]);
    let query = Query::parse("@title bird").expect("parse");
    let predicate = Compiler::new(Table::Submissions).compile(&query, &group).expect("compile");
    assert_eq!(
        predicate.expression(),
        "(TITLE LIKE ? ESCAPE '\\') AND (((TAGS LIKE ? ESCAPE '\\') AND (AUTHOR = ? COLLATE NOCASE)))"
    );
    assert_eq!(predicate.values(), ["%bird%", "%cat%", "tom"]);
}

#[test]
fn reserved_parameters_become_paging() {
    let mut group = parameters(&["order=date desc", "order=id", "limit=5", "offset=10", "tags=cat"]);
    let paging = Paging::take(Table::Submissions, &mut group).expect("paging");
    let sort: Vec<(&str, Order)> = paging.sort.iter().map(|(c, o)| (c.name(), *o)).collect();
    assert_eq!(sort, [("DATE", Order::Desc), ("ID", Order::Asc)]);
    assert_eq!(paging.limit, Some(5));
    assert_eq!(paging.offset, Some(10));
    assert_eq!(group.names().collect::<Vec<_>>(), ["tags"]);
}

#[test]
fn invalid_paging_is_malformed() {
    for bad in [&["limit=0"][..], &["limit=ten"], &["offset=-1"], &["order=colour"], &["order=id sideways"]] {
        let mut group = parameters(bad);
        let err = Paging::take(Table::Submissions, &mut group).expect_err("invalid paging");
        assert_eq!(err.exit_code(), 2, "{bad:?}");
    }
}

#[test]
fn raw_sql_and_parameters_combine() {
    let group = parameters(&["author=tom"]);
    let compiler = Compiler::new(Table::Submissions);
    let predicate = CompiledPredicate::raw("ID > 10").and(compiler.compile_parameters(&group).expect("compile"));
    assert_eq!(predicate.expression(), "(ID > 10) AND (((AUTHOR = ? COLLATE NOCASE)))");
    assert_eq!(predicate.values(), ["tom"]);
}

fn word() -> impl Strategy<Value = String> {
    ("(@title |@author |@id |@tags |)", "\\^?[a-z%_]{1,6}\\$?", "( |\"[a-z %]{0,4}\")")
        .prop_map(|(field, bare, quoted)| {
            if quoted == " " { format!("{field}{bare}") } else { format!("{field}{quoted}") }
        })
}

fn query() -> impl Strategy<Value = String> {
    prop::collection::vec((word(), "( | & | \\| |)", any::<bool>()), 1..8).prop_map(|parts| {
        let mut text = String::new();
        for (i, (word, joiner, negate)) in parts.into_iter().enumerate() {
            if i > 0 {
                text.push_str(if joiner.is_empty() { " " } else { &joiner });
            }
            if negate {
                text.push('!');
            }
            text.push_str(&word);
        }
        text
    })
}

proptest! {
    #[test]
    fn placeholders_match_values(text in query()) {
        let query = Query::parse(&text).expect("generated queries parse");
        let predicate = Compiler::new(Table::Submissions).compile_query(&query).expect("compiles");
        prop_assert_eq!(predicate.expression().matches('?').count(), predicate.values().len());
        // values never leak into the SQL text
        prop_assert!(!predicate.expression().contains('%'));
    }
}
