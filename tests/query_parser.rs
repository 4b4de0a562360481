use falocalrepo::error::RepoError;
use falocalrepo::query::{Expr, Pattern, Query, Term};

fn term(field: &str, pattern: &str) -> Expr {
    Expr::Term(Term::new(field, Pattern::bare(pattern)))
}

fn reason(text: &str) -> String {
    match Query::parse(text) {
        Err(RepoError::MalformedCommand(reason)) => reason,
        other => panic!("expected a malformed query for {text:?}, got {other:?}"),
    }
}

#[test]
fn empty_query_matches_everything() {
    assert!(Query::parse("").expect("empty").is_empty());
    assert!(Query::parse("   ").expect("blank").is_empty());
}

#[test]
fn adjacency_is_and() {
    let query = Query::parse("cat dog").expect("parse");
    assert_eq!(query.root(), Some(&Expr::And(vec![term("", "cat"), term("", "dog")])));
}

#[test]
fn and_binds_tighter_than_or() {
    let query = Query::parse("a | b c").expect("parse");
    let expected = Expr::Or(vec![term("", "a"), Expr::And(vec![term("", "b"), term("", "c")])]);
    assert_eq!(query.root(), Some(&expected));
    // explicit & reads the same as adjacency
    assert_eq!(Query::parse("a | b & c").expect("parse"), query);
}

#[test]
fn field_scope_is_case_insensitive() {
    let query = Query::parse("@Title cat").expect("parse");
    assert_eq!(query.root(), Some(&term("title", "cat")));
    match query.root() {
        Some(Expr::Term(t)) => {
            assert_eq!(t.field(), "TITLE");
            assert!(!t.is_any());
        }
        other => panic!("expected a term, got {other:?}"),
    }
}

#[test]
fn unscoped_terms_target_any() {
    match Query::parse("cat").expect("parse").root() {
        Some(Expr::Term(t)) => assert!(t.is_any()),
        other => panic!("expected a term, got {other:?}"),
    }
}

#[test]
fn quoted_text_is_literal() {
    let query = Query::parse("@title \"50% off_now ^x$\"").expect("parse");
    match query.root() {
        Some(Expr::Term(t)) => {
            assert!(t.pattern().is_literal());
            assert_eq!(t.pattern().text(), "50% off_now ^x$");
            assert!(!t.pattern().has_wildcards());
            assert!(!t.pattern().is_anchored());
        }
        other => panic!("expected a term, got {other:?}"),
    }
}

#[test]
fn anchors_are_stripped() {
    let pattern = Pattern::bare("^cat$");
    assert_eq!(pattern.text(), "cat");
    assert!(pattern.anchored_start() && pattern.anchored_end());
    let pattern = Pattern::bare("c_t%");
    assert!(pattern.has_wildcards());
    assert!(!pattern.is_anchored());
}

#[test]
fn negation_and_groups() {
    let query = Query::parse("!(cat | dog) bird").expect("parse");
    let expected = Expr::And(vec![
        Expr::Not(Box::new(Expr::Group(Box::new(Expr::Or(vec![term("", "cat"), term("", "dog")]))))),
        term("", "bird"),
    ]);
    assert_eq!(query.root(), Some(&expected));
}

#[test]
fn display_reparses_to_the_same_tree() {
    let text = "@author tom (cat | \"mouse trap\") !^dog$";
    let query = Query::parse(text).expect("parse");
    let again = Query::parse(&query.to_string()).expect("reparse");
    assert_eq!(query, again);
}

#[test]
fn unbalanced_parentheses_are_rejected() {
    assert!(reason("(cat").contains("unbalanced parentheses"));
    assert!(reason("cat)").contains("unbalanced parentheses"));
    // parentheses inside quotes do not count
    assert!(Query::parse("\"(cat\"").is_ok());
}

#[test]
fn unterminated_quote_is_rejected() {
    assert!(reason("@title \"cat").contains("unterminated quote"));
}

#[test]
fn dangling_operator_is_rejected() {
    assert!(reason("cat &").contains("dangling operator"));
    assert!(reason("cat |").contains("dangling operator"));
    assert!(reason("| cat").contains("position 0"));
}

#[test]
fn field_marker_needs_a_name() {
    assert!(reason("@ cat").contains("missing field name"));
    assert!(reason("cat @").contains("missing field name"));
}

#[test]
fn at_sign_inside_a_word_is_text() {
    let query = Query::parse("tom@").expect("parse");
    assert_eq!(query.root(), Some(&term("", "tom@")));
    let query = Query::parse("x@ y").expect("parse");
    assert_eq!(query.root(), Some(&Expr::And(vec![term("", "x@"), term("", "y")])));
    assert!(reason("x (@").contains("missing field name"));
}

#[test]
fn errors_map_to_malformed_command() {
    let err = Query::parse("(cat").expect_err("unbalanced");
    assert_eq!(err.exit_code(), 2);
}
