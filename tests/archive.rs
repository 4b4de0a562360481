use std::path::{Path, PathBuf};

use falocalrepo::archive::{Archive, Transfer, Value};
use falocalrepo::compile::CompiledPredicate;
use falocalrepo::config::Config;
use falocalrepo::dispatch::Dispatcher;
use falocalrepo::error::{RepoError, Result};
use falocalrepo::guard::InstanceProbe;
use falocalrepo::schema::Table;

struct Alone;

impl InstanceProbe for Alone {
    fn others(&self, _program: &str, _archive: &Path) -> usize {
        0
    }
}

struct Workspace {
    dir: tempfile::TempDir,
    database: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let database = dir.path().join("FA.db");
        Archive::open(&database).expect("new archive").close().expect("close");
        Self { dir, database }
    }
    fn file(&self, name: &str, contents: &str) -> String {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).expect("write file");
        path.display().to_string()
    }
    fn run_on(&self, database: &Path, args: &[&str], input: &[u8]) -> (Result<()>, String) {
        let config = Config { debug: false, database: database.to_path_buf(), color: false };
        let tokens: Vec<String> = args.iter().map(|t| t.to_string()).collect();
        let mut out = Vec::new();
        let result = Dispatcher::new(config)
            .with_probe(Alone)
            .with_output(&mut out)
            .with_input(input)
            .dispatch(&tokens);
        (result, String::from_utf8(out).expect("utf-8 output"))
    }
    fn run(&self, args: &[&str]) -> (Result<()>, String) {
        self.run_on(&self.database, args, b"")
    }
    fn archive(&self) -> Archive {
        Archive::open(&self.database).expect("open archive")
    }
}

fn submission(id: i64, author: &str) -> String {
    let id = id.to_string();
    serde_json::json!({
        "ID": id, "AUTHOR": author, "TITLE": "t", "DATE": "2024-01-01", "DESCRIPTION": "",
        "TAGS": ["a"], "CATEGORY": "", "SPECIES": "", "GENDER": "", "RATING": "general",
        "TYPE": "image", "FILEURL": "", "FILEEXT": "png", "FILESAVED": 1, "FAVORITE": [],
        "MENTIONS": [], "FOLDER": "gallery", "USERUPDATE": 0
    })
    .to_string()
}

fn add_submissions(workspace: &Workspace, authors: &[(i64, &str)]) {
    for (id, author) in authors {
        let file = workspace.file(&format!("s{id}.json"), &submission(*id, author));
        workspace.run(&["database", "add", "submissions", &file]).0.expect("add");
    }
}

#[test]
fn add_needs_every_field() {
    let workspace = Workspace::new();
    let file = workspace.file("partial.json", r#"{"USERNAME": "tom"}"#);
    let (result, _) = workspace.run(&["database", "add", "users", &file]);
    match result {
        Err(err @ RepoError::MissingField { .. }) => {
            assert_eq!(err.exit_code(), 6);
            let message = err.to_string();
            assert!(message.contains("FOLDERS") && message.contains("USERPAGE"));
        }
        other => panic!("expected missing fields, got {other:?}"),
    }
}

#[test]
fn duplicates_need_replace() {
    let workspace = Workspace::new();
    add_submissions(&workspace, &[(1, "tom")]);
    let file = workspace.file("again.json", &submission(1, "anna"));
    let (result, _) = workspace.run(&["database", "add", "submissions", &file]);
    assert_eq!(result.expect_err("duplicate").exit_code(), 7);

    let (result, out) = workspace.run(&["database", "add", "submissions", &file, "--replace"]);
    result.expect("replace");
    assert_eq!(out.trim(), "Added id 1");
    let record = workspace.archive().get(Table::Submissions, "1").expect("get").expect("present");
    assert_eq!(record.get("author"), Some(&Value::Text("anna".to_string())));
    assert_eq!(record.get("TAGS"), Some(&Value::List(vec!["a".to_string()])));
}

#[test]
fn edit_changes_only_the_given_fields() {
    let workspace = Workspace::new();
    add_submissions(&workspace, &[(1, "tom")]);
    let file = workspace.file("edit.json", r#"{"title": "Renamed", "tags": ["x", "y"]}"#);
    let (result, out) = workspace.run(&["database", "edit", "submissions", "1", &file]);
    result.expect("edit");
    assert_eq!(out.trim(), "Edited id 1");
    let record = workspace.archive().get(Table::Submissions, "1").expect("get").expect("present");
    assert_eq!(record.get("TITLE"), Some(&Value::Text("Renamed".to_string())));
    assert_eq!(record.get("TAGS"), Some(&Value::List(vec!["x".to_string(), "y".to_string()])));
    assert_eq!(record.get("AUTHOR"), Some(&Value::Text("tom".to_string())));
}

#[test]
fn edit_rejects_unknown_columns_and_empty_objects() {
    let workspace = Workspace::new();
    add_submissions(&workspace, &[(1, "tom")]);
    for (name, contents) in [("colour.json", r#"{"COLOUR": "red"}"#), ("empty.json", "{}"), ("list.json", "[1]")] {
        let file = workspace.file(name, contents);
        let (result, _) = workspace.run(&["database", "edit", "submissions", "1", &file]);
        assert_eq!(result.expect_err(name).exit_code(), 2, "{name}");
    }
}

#[test]
fn remove_asks_unless_told_yes() {
    let workspace = Workspace::new();
    add_submissions(&workspace, &[(1, "tom"), (2, "anna")]);

    let (result, out) = workspace.run_on(&workspace.database, &["database", "remove", "submissions", "1"], b"n\n");
    result.expect("declined");
    assert!(out.ends_with("Nothing removed\n"));
    assert_eq!(workspace.archive().count(Table::Submissions).expect("count"), 2);

    let (result, out) = workspace.run_on(&workspace.database, &["database", "remove", "submissions", "1"], b"y\n");
    result.expect("confirmed");
    assert!(out.contains("Removed 1 entries from submissions"));

    let (result, out) = workspace.run(&["database", "remove", "submissions", "2", "7", "--yes"]);
    result.expect("removed");
    assert!(out.contains("id 7 not found"));
    assert!(out.contains("Removed 1 entries from submissions"));
    assert_eq!(workspace.archive().count(Table::Submissions).expect("count"), 0);
}

#[test]
fn copy_selects_and_merge_brings_back() {
    let workspace = Workspace::new();
    add_submissions(&workspace, &[(1, "tom"), (2, "anna"), (3, "zed"), (4, "tom")]);
    let other = workspace.dir.path().join("other");
    std::fs::create_dir(&other).expect("folder");
    let other_text = other.display().to_string();

    let (result, out) = workspace.run(&["database", "copy", &other_text, "submissions.author=tom"]);
    result.expect("copy");
    assert!(out.contains("Copied 2 submissions"));
    let copied = Archive::open(&other.join("FA.db")).expect("copy exists");
    assert_eq!(copied.version().expect("version").as_deref(), Some("5.1"));
    assert!(copied.contains(Table::Submissions, "1").expect("contains"));
    assert!(copied.contains(Table::Submissions, "4").expect("contains"));
    assert_eq!(copied.count(Table::Submissions).expect("count"), 2);
    copied.close().expect("close");

    // a query selection adds to the parameters
    let (result, _) = workspace.run(&[
        "database", "copy", &other_text, "--query", "submissions", "@author zed", "submissions.author=anna",
    ]);
    result.expect("second copy");
    let copied = Archive::open(&other.join("FA.db")).expect("copy exists");
    assert_eq!(copied.count(Table::Submissions).expect("count"), 4);
    copied.close().expect("close");

    workspace.run(&["database", "remove", "submissions", "1", "2", "--yes"]).0.expect("remove");
    let (result, out) = workspace.run(&["database", "merge", &other_text]);
    result.expect("merge");
    assert!(out.contains("Merged 2 submissions"));
    assert_eq!(workspace.archive().count(Table::Submissions).expect("count"), 4);
}

#[test]
fn transfer_refuses_other_versions() {
    let workspace = Workspace::new();
    let other = workspace.dir.path().join("old.db");
    {
        let archive = Archive::open(&other).expect("other");
        archive
            .connection()
            .execute("update SETTINGS set SVALUE = '4.9' where SETTING = 'VERSION'", [])
            .expect("downgrade");
        archive.close().expect("close");
    }
    let other_text = other.display().to_string();
    for operation in ["copy", "merge"] {
        let (result, _) = workspace.run(&["database", operation, &other_text]);
        assert_eq!(result.expect_err(operation).exit_code(), 4, "{operation}");
    }
    // a missing archive can be copied into but not merged from
    let archive = workspace.archive();
    let selections = [(Table::Users, CompiledPredicate::all())];
    let missing = workspace.dir.path().join("missing.db");
    let err = archive.transfer(&missing, Transfer::Merge, &selections, false).expect_err("nothing to merge");
    assert_eq!(err.exit_code(), 4);
    let written = archive.transfer(&missing, Transfer::Copy, &selections, false).expect("copy creates");
    assert_eq!(written, [(Table::Users, 0)]);
}

fn downgrade(archive: &Archive) {
    archive
        .connection()
        .execute_batch(
            "drop table HISTORY;
             update SETTINGS set SVALUE = '5.0' where SETTING = 'VERSION';
             insert into SETTINGS (SETTING, SVALUE) values ('HISTORY', '[[1.5,\"init\"],[2.5,\"database search\"]]');",
        )
        .expect("downgrade");
}

#[test]
fn upgrade_moves_history_into_its_table() {
    let archive = Archive::open_in_memory().expect("archive");
    downgrade(&archive);
    assert_eq!(archive.upgrade().expect("upgrade"), Some("5.0".to_string()));
    assert_eq!(archive.version().expect("version").as_deref(), Some("5.1"));
    let events: Vec<String> = archive.history(None).expect("history").into_iter().map(|e| e.event).collect();
    assert_eq!(events, ["init", "database search"]);
    assert_eq!(archive.upgrade().expect("second upgrade"), None);
}

#[test]
fn upgrade_refuses_unknown_versions() {
    let archive = Archive::open_in_memory().expect("archive");
    archive
        .connection()
        .execute("update SETTINGS set SVALUE = '6.0' where SETTING = 'VERSION'", [])
        .expect("future version");
    let err = archive.upgrade().expect_err("newer than this build");
    assert!(matches!(err, RepoError::VersionMismatch { ref found, .. } if found == "6.0"));
    assert_eq!(archive.version().expect("version").as_deref(), Some("6.0"));
}

#[test]
fn upgrade_command_logs_itself() {
    let workspace = Workspace::new();
    {
        let archive = workspace.archive();
        downgrade(&archive);
        archive.close().expect("close");
    }
    let (result, out) = workspace.run(&["database", "upgrade"]);
    result.expect("upgrade");
    assert_eq!(out.trim(), "Upgraded database from 5.0 to 5.1");
    let events: Vec<String> = workspace.archive().history(None).expect("history").into_iter().map(|e| e.event).collect();
    assert_eq!(events, ["init", "database search", "database upgrade"]);

    let (result, out) = workspace.run(&["database", "upgrade"]);
    result.expect("up to date");
    assert_eq!(out.trim(), "Database is up to date (5.1)");
}

#[test]
fn clean_keeps_the_data() {
    let workspace = Workspace::new();
    add_submissions(&workspace, &[(1, "tom")]);
    let (result, out) = workspace.run(&["database", "clean"]);
    result.expect("clean");
    assert_eq!(out.trim(), "Database cleaned");
    assert_eq!(workspace.archive().count(Table::Submissions).expect("count"), 1);
}

#[test]
fn export_to_a_file() {
    let workspace = Workspace::new();
    add_submissions(&workspace, &[(2, "anna"), (1, "tom")]);
    let target = workspace.dir.path().join("out.json");
    let target_text = target.display().to_string();
    let (result, out) = workspace.run(&[
        "database", "export", "submissions", "json", &target_text, "--column", "ID", "--column", "author",
    ]);
    result.expect("export");
    assert!(out.is_empty());
    let text = std::fs::read_to_string(&target).expect("exported file");
    assert_eq!(text.trim(), r#"[{"ID":1,"AUTHOR":"tom"},{"ID":2,"AUTHOR":"anna"}]"#);
}
