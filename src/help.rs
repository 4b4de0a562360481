//! Help text, declared per route and rendered on demand.

use std::io::Write;

use crate::error::Result;

#[derive(Debug)]
pub struct Help {
    pub usage: &'static str,
    pub description: &'static str,
    pub arguments: &'static [(&'static str, &'static str)],
}

impl Help {
    pub fn render(&self, out: &mut dyn Write) -> Result<()> {
        writeln!(out, "Usage: falocalrepo {}", self.usage)?;
        writeln!(out)?;
        writeln!(out, "{}", self.description)?;
        if !self.arguments.is_empty() {
            writeln!(out)?;
            writeln!(out, "Arguments:")?;
            let width = self.arguments.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
            for (name, text) in self.arguments {
                writeln!(out, "  {name:<width$}  {text}")?;
            }
        }
        Ok(())
    }
}

pub static HELP: Help = Help {
    usage: "help [<command> [<operation>]]",
    description: "Show the usage of a command or operation.",
    arguments: &[
        ("init", "create or open the database"),
        ("database", "operate on the database"),
        ("help", "show this message"),
    ],
};

pub static INIT: Help = Help {
    usage: "init",
    description: "Create the database if it does not exist and report that it is ready.",
    arguments: &[],
};

pub static DATABASE: Help = Help {
    usage: "database <operation> [<arg>...]",
    description: "Operate on the database. Without an operation, same as 'database info'.",
    arguments: &[
        ("info", "location, version, size and record counts"),
        ("history", "list or clear the command history"),
        ("search", "search a table"),
        ("export", "dump a table to csv, tsv or json"),
        ("add", "add an entry from a JSON file"),
        ("edit", "change fields of an entry from a JSON file"),
        ("remove", "remove entries by key"),
        ("copy", "copy entries to another database"),
        ("merge", "merge entries from another database"),
        ("clean", "compact the database file"),
        ("upgrade", "upgrade the database to the current version"),
    ],
};

pub static INFO: Help = Help {
    usage: "database info",
    description: "Show where the database lives, its version and size, the time of the last \
                  command and how many users, submissions and journals it holds.",
    arguments: &[],
};

pub static HISTORY: Help = Help {
    usage: "database history [--filter <text>] [--clear]",
    description: "List the commands run on the database, oldest first.",
    arguments: &[
        ("--filter <text>", "only events containing text, ignoring case"),
        ("--clear", "delete the listed events instead of printing them"),
    ],
};

pub static SEARCH: Help = Help {
    usage: "database search <table> [<option>...] [<param>=<value>...] [<query>...]",
    description: "Search users, submissions or journals. Parameters with the same name are \
                  joined with OR, different names with AND. The query language supports @field \
                  scopes, & and | (AND binds tighter), ! negation, parentheses, \"literal\" text, \
                  % and _ wildcards and ^/$ anchors.",
    arguments: &[
        ("--column <name>[,<width>]", "show this column, '@' for all (repeatable)"),
        ("--sort <column>", "sort by column (default: key)"),
        ("--order <asc|desc>", "sort direction (default: desc)"),
        ("--limit <n>", "at most n results"),
        ("--offset <n>", "skip the first n results"),
        ("--output <format>", "table, csv, tsv, json or none"),
        ("--sql", "use every term as a raw SQL WHERE clause"),
        ("--show-sql", "print the generated SQL and values"),
        ("--total", "print the number of results"),
        ("--ignore-width", "do not fit the table to the terminal"),
        ("order=<column [asc|desc]>", "same as --sort/--order, repeatable"),
        ("limit=<n> offset=<n>", "same as --limit/--offset"),
    ],
};

pub static EXPORT: Help = Help {
    usage: "database export <table> <csv|tsv|json> [<file>] [<option>...]",
    description: "Write a whole table, to stdout when no file is given.",
    arguments: &[
        ("--column <name>", "export this column only (repeatable)"),
        ("--sort <column>", "sort by column (default: key)"),
        ("--order <asc|desc>", "sort direction (default: asc)"),
        ("--total", "print the number of exported entries to stderr"),
    ],
};

pub static ADD: Help = Help {
    usage: "database add <table> <file> [--replace]",
    description: "Add an entry read from a JSON object holding every column of the table.",
    arguments: &[("--replace", "overwrite an entry with the same key")],
};

pub static EDIT: Help = Help {
    usage: "database edit <table> <key> <file>",
    description: "Change the columns of an entry given in a JSON object.",
    arguments: &[],
};

pub static REMOVE: Help = Help {
    usage: "database remove <table> <key>... [--yes]",
    description: "Remove entries by key. Missing entries are reported and skipped.",
    arguments: &[("--yes", "do not ask for confirmation")],
};

pub static COPY: Help = Help {
    usage: "database copy <path> [--query <table> <query>]... [<table>.<param>=<value>...] [--replace]",
    description: "Copy matching entries to another database, created if missing. \
                  Without a selection every table is copied whole.",
    arguments: &[
        ("--query <table> <query>", "select entries of table with a query (repeatable)"),
        ("<table>.<param>=<value>", "select entries of table with parameters"),
        ("--replace", "overwrite entries that already exist"),
    ],
};

pub static MERGE: Help = Help {
    usage: "database merge <path> [--query <table> <query>]... [<table>.<param>=<value>...] [--replace]",
    description: "Merge matching entries from another database into this one.",
    arguments: &[
        ("--query <table> <query>", "select entries of table with a query (repeatable)"),
        ("<table>.<param>=<value>", "select entries of table with parameters"),
        ("--replace", "overwrite entries that already exist"),
    ],
};

pub static CLEAN: Help = Help {
    usage: "database clean",
    description: "Rebuild the database file to reclaim unused space.",
    arguments: &[],
};

pub static UPGRADE: Help = Help {
    usage: "database upgrade",
    description: "Upgrade the database to the current version.",
    arguments: &[],
};
