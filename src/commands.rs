//! Handlers for every route of the dispatcher.
//!
//! Each handler parses its own arguments with `clap`; a parse failure is a
//! `MalformedCommand`. The dispatcher has already checked the version and
//! the single-writer guard by the time a handler runs.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use serde_json::{Map, Value as Json};
use tracing::info;

use crate::archive::{Archive, Record, Selection, Transfer, Value, to_sql_value};
use crate::compile::{CompiledPredicate, Compiler, Order, Paging};
use crate::config::archive_path;
use crate::dispatch::{Command, Context, resolve};
use crate::error::{RepoError, Result};
use crate::help;
use crate::params::ParameterGroup;
use crate::query::Query;
use crate::render::{Format, RenderSpec, Renderer, TableRenderer, renderer, terminal_width};
use crate::schema::{Column, Table, VERSION};

fn parse<T: Parser>(args: &[String]) -> Result<T> {
    T::try_parse_from(args).map_err(|err| {
        let message = err.to_string();
        let first = message.lines().next().unwrap_or_default();
        RepoError::MalformedCommand(first.trim_start_matches("error: ").to_string())
    })
}

fn opened(archive: &Option<Archive>) -> Result<&Archive> {
    archive
        .as_ref()
        .ok_or_else(|| RepoError::Persistence("no database is open".to_string()))
}

// ------------- help / init -------------
pub fn help(ctx: &mut Context, args: &[String]) -> Result<()> {
    let page = match args {
        [] => &help::HELP,
        [only] if Command::parse(only) == Some(Command::Database) => &help::DATABASE,
        _ => resolve(args)?.0.help,
    };
    page.render(&mut *ctx.out)
}

pub fn init(ctx: &mut Context, _args: &[String]) -> Result<()> {
    let archive = opened(&ctx.archive)?;
    let version = archive.version()?.unwrap_or_else(|| "none".to_string());
    writeln!(ctx.out, "Database ready")?;
    writeln!(ctx.out, "Location: {}", archive.path().display())?;
    writeln!(ctx.out, "Version: {version}")?;
    Ok(())
}

// ------------- info / history -------------
fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 { format!("{bytes} B") } else { format!("{size:.1} {}", UNITS[unit]) }
}

pub fn info(ctx: &mut Context, _args: &[String]) -> Result<()> {
    let archive = opened(&ctx.archive)?;
    let out = &mut *ctx.out;
    writeln!(out, "Location: {}", archive.path().display())?;
    writeln!(out, "Version: {}", archive.version()?.unwrap_or_else(|| "none".to_string()))?;
    writeln!(out, "Size: {}", human_size(archive.size()))?;
    if ctx.degraded {
        return Ok(());
    }
    let last = archive
        .last_history()?
        .map(|entry| entry.format_time())
        .unwrap_or_else(|| "never".to_string());
    writeln!(out, "Last update: {last}")?;
    for table in Table::ALL {
        let name = table.to_string();
        let name = format!("{}{}", name[..1].to_uppercase(), &name[1..]);
        writeln!(out, "{name}: {}", archive.count(table)?)?;
    }
    Ok(())
}

#[derive(Parser, Debug)]
#[command(no_binary_name = true, disable_help_flag = true)]
struct HistoryArgs {
    #[arg(long)]
    filter: Option<String>,
    #[arg(long)]
    clear: bool,
}

pub fn history(ctx: &mut Context, args: &[String]) -> Result<()> {
    let args: HistoryArgs = parse(args)?;
    let archive = opened(&ctx.archive)?;
    let entries = archive.history(args.filter.as_deref())?;
    if args.clear {
        let cleared = archive.transaction(|archive| {
            let mut cleared = 0;
            for entry in &entries {
                if archive.delete_history(entry)? {
                    cleared += 1;
                }
            }
            Ok(cleared)
        })?;
        info!(cleared, "history cleared");
        writeln!(ctx.out, "Cleared {cleared} history entries")?;
        return Ok(());
    }
    let columns: Arc<[String]> = Arc::from(["TIME".to_string(), "EVENT".to_string()]);
    let spec = RenderSpec::new(vec![("TIME".to_string(), 19), ("EVENT".to_string(), 0)], Format::Table);
    let mut records = entries.iter().map(|entry| {
        Ok::<_, RepoError>(Record::new(
            Arc::clone(&columns),
            vec![Value::Text(entry.format_time()), Value::Text(entry.event.clone())],
        ))
    });
    TableRenderer::new(&mut *ctx.out, terminal_width(), ctx.config.color).render(&spec, &mut records)?;
    Ok(())
}

// ------------- search / export -------------
// --column values: NAME, NAME,WIDTH or @ for every column
fn select_columns(table: Table, requested: &[String]) -> Result<Vec<(&'static Column, usize)>> {
    if requested.is_empty() {
        return table
            .default_headers()
            .iter()
            .map(|(name, width)| Ok((table.require(name)?, *width)))
            .collect();
    }
    if requested.iter().any(|r| r.trim() == "@") {
        return Ok(table.columns().iter().map(|c| (c, 0)).collect());
    }
    requested
        .iter()
        .map(|r| {
            let (name, width) = match r.split_once(',') {
                Some((name, width)) => {
                    let width = width.trim().parse::<usize>().map_err(|_| {
                        RepoError::MalformedCommand(format!("invalid column width in '{r}'"))
                    })?;
                    (name, width)
                }
                None => (r.as_str(), 0),
            };
            Ok((table.require(name)?, width))
        })
        .collect()
}

#[derive(Parser, Debug)]
#[command(no_binary_name = true, disable_help_flag = true)]
struct SearchArgs {
    #[arg(value_enum)]
    table: Table,
    #[arg(long = "column", value_name = "NAME[,WIDTH]")]
    columns: Vec<String>,
    #[arg(long)]
    sort: Option<String>,
    #[arg(long, value_enum)]
    order: Option<Order>,
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    limit: Option<u64>,
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    offset: Option<u64>,
    #[arg(long, value_enum, default_value_t = Format::Table)]
    output: Format,
    /// Use every term as a raw WHERE clause; no parameters are read.
    #[arg(long)]
    sql: bool,
    #[arg(long)]
    show_sql: bool,
    #[arg(long)]
    total: bool,
    #[arg(long)]
    ignore_width: bool,
    /// Parameters first, then the query.
    terms: Vec<String>,
}

pub fn search(ctx: &mut Context, args: &[String]) -> Result<()> {
    // clap would swallow the separator, so whatever follows it is split off first
    let (args, verbatim) = match args.iter().position(|a| a == "--") {
        Some(at) => (&args[..at], &args[at + 1..]),
        None => (args, &[][..]),
    };
    let args: SearchArgs = parse(args)?;
    let table = args.table;
    let (mut parameters, mut query) = if args.sql {
        (ParameterGroup::new(), args.terms)
    } else {
        ParameterGroup::accumulate(args.terms)
    };
    query.extend(verbatim.iter().cloned());
    let mut paging = Paging::take(table, &mut parameters)?;
    let query = query.join(" ");

    let predicate = if !args.sql {
        Compiler::new(table).compile(&Query::parse(&query)?, &parameters)?
    } else if query.trim().is_empty() {
        CompiledPredicate::all()
    } else {
        CompiledPredicate::raw(&query)
    };

    let order = args.order.unwrap_or(Order::Desc);
    let sort = match &args.sort {
        Some(column) => Some(table.require(column)?),
        None if paging.sort.is_empty() => Some(table.key()),
        None => None,
    };
    if let Some(column) = sort {
        paging.sort.insert(0, (column, order));
    }
    if args.limit.is_some() {
        paging.limit = args.limit;
    }
    if args.offset.is_some() {
        paging.offset = args.offset;
    }

    let columns = select_columns(table, &args.columns)?;
    let mut spec = RenderSpec::new(
        columns.iter().map(|(c, w)| (c.name().to_string(), *w)).collect(),
        args.output,
    );
    spec.sort = sort.map(|c| c.name().to_string());
    spec.order = order;
    spec.limit = paging.limit;
    spec.offset = paging.offset;

    let selection = Selection {
        predicate,
        columns: columns.into_iter().map(|(c, _)| c).collect(),
        sort: paging.sort,
        limit: paging.limit,
        offset: paging.offset,
    };
    let archive = opened(&ctx.archive)?;
    let width = if args.ignore_width { None } else { terminal_width() };
    let color = ctx.config.color;
    let out = &mut *ctx.out;
    let count = archive.select(table, &selection, |cursor| {
        renderer(spec.format, &mut *out, width, color).render(&spec, cursor)
    })?;
    info!(table = %table, count, "search");

    // keeps machine readable output clean
    let mut epilogue: Box<dyn Write + '_> = match spec.format {
        Format::Table | Format::None => Box::new(out),
        _ => Box::new(std::io::stderr()),
    };
    if args.show_sql {
        writeln!(epilogue, "{}", selection.to_sql(table))?;
        writeln!(epilogue, "{}", serde_json::to_string(selection.predicate.values())?)?;
    }
    if args.total || spec.format == Format::None {
        writeln!(epilogue, "Total: {count}")?;
    }
    Ok(())
}

#[derive(Parser, Debug)]
#[command(no_binary_name = true, disable_help_flag = true)]
struct ExportArgs {
    #[arg(value_enum)]
    table: Table,
    #[arg(value_enum)]
    format: Format,
    file: Option<PathBuf>,
    #[arg(long = "column")]
    columns: Vec<String>,
    #[arg(long)]
    sort: Option<String>,
    #[arg(long, value_enum, default_value_t = Order::Asc)]
    order: Order,
    #[arg(long)]
    total: bool,
}

pub fn export(ctx: &mut Context, args: &[String]) -> Result<()> {
    let args: ExportArgs = parse(args)?;
    if matches!(args.format, Format::Table | Format::None) {
        return Err(RepoError::MalformedCommand("export format must be csv, tsv or json".to_string()));
    }
    let table = args.table;
    let mut selection = Selection::all(table);
    if !args.columns.is_empty() {
        selection.columns = args
            .columns
            .iter()
            .map(|c| table.require(c))
            .collect::<Result<_>>()?;
    }
    let sort = match &args.sort {
        Some(column) => table.require(column)?,
        None => table.key(),
    };
    selection.sort = vec![(sort, args.order)];
    let mut spec = RenderSpec::new(
        selection.columns.iter().map(|c| (c.name().to_string(), 0)).collect(),
        args.format,
    );
    spec.sort = Some(sort.name().to_string());
    spec.order = args.order;

    let archive = opened(&ctx.archive)?;
    let mut file = match &args.file {
        Some(path) => Some(BufWriter::new(File::create(path)?)),
        None => None,
    };
    let out: &mut dyn Write = match file.as_mut() {
        Some(file) => file,
        None => &mut *ctx.out,
    };
    let count = archive.select(table, &selection, |cursor| {
        renderer(spec.format, &mut *out, None, false).render(&spec, cursor)
    })?;
    info!(table = %table, count, "export");
    if args.total {
        eprintln!("Total: {count}");
    }
    Ok(())
}

// ------------- add / edit / remove -------------
fn read_object(path: &Path) -> Result<Map<String, Json>> {
    let text = std::fs::read_to_string(path)?;
    match serde_json::from_str(&text)? {
        Json::Object(map) => Ok(map),
        _ => Err(RepoError::MalformedCommand(format!(
            "{} does not hold a JSON object",
            path.display()
        ))),
    }
}

fn entry_fields(table: Table, object: &Map<String, Json>) -> Result<Vec<(&'static Column, rusqlite::types::Value)>> {
    object
        .iter()
        .map(|(name, value)| {
            let column = table.require(name)?;
            Ok((column, to_sql_value(column, value)?))
        })
        .collect()
}

fn key_text(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Parser, Debug)]
#[command(no_binary_name = true, disable_help_flag = true)]
struct AddArgs {
    #[arg(value_enum)]
    table: Table,
    file: PathBuf,
    #[arg(long)]
    replace: bool,
}

pub fn add(ctx: &mut Context, args: &[String]) -> Result<()> {
    let args: AddArgs = parse(args)?;
    let table = args.table;
    let object = read_object(&args.file)?;
    let missing: Vec<String> = table
        .columns()
        .iter()
        .filter(|c| !object.keys().any(|k| k.eq_ignore_ascii_case(c.name())))
        .map(|c| c.name().to_string())
        .collect();
    if !missing.is_empty() {
        return Err(RepoError::MissingField { table: table.name().to_string(), fields: missing });
    }
    let fields = entry_fields(table, &object)?;
    let key = object
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(table.key().name()))
        .map(|(_, v)| key_text(v))
        .unwrap_or_default();

    let archive = opened(&ctx.archive)?;
    if !args.replace && archive.contains(table, &key)? {
        return Err(RepoError::DuplicateEntry {
            table: table.name().to_string(),
            column: table.key().name().to_string(),
            value: key,
        });
    }
    archive.insert(table, &fields, args.replace)?;
    writeln!(ctx.out, "Added {} {key}", table.key().name().to_lowercase())?;
    Ok(())
}

#[derive(Parser, Debug)]
#[command(no_binary_name = true, disable_help_flag = true)]
struct EditArgs {
    #[arg(value_enum)]
    table: Table,
    key: String,
    file: PathBuf,
}

pub fn edit(ctx: &mut Context, args: &[String]) -> Result<()> {
    let args: EditArgs = parse(args)?;
    let object = read_object(&args.file)?;
    if object.is_empty() {
        return Err(RepoError::MalformedCommand(format!("{} holds no fields", args.file.display())));
    }
    let fields = entry_fields(args.table, &object)?;
    let archive = opened(&ctx.archive)?;
    if !archive.update(args.table, &args.key, &fields)? {
        return Err(RepoError::MalformedCommand(format!(
            "no entry with {} {} in {}",
            args.table.key().name(),
            args.key,
            args.table
        )));
    }
    writeln!(ctx.out, "Edited {} {}", args.table.key().name().to_lowercase(), args.key)?;
    Ok(())
}

#[derive(Parser, Debug)]
#[command(no_binary_name = true, disable_help_flag = true)]
struct RemoveArgs {
    #[arg(value_enum)]
    table: Table,
    #[arg(required = true)]
    keys: Vec<String>,
    #[arg(long)]
    yes: bool,
}

pub fn remove(ctx: &mut Context, args: &[String]) -> Result<()> {
    let args: RemoveArgs = parse(args)?;
    let table = args.table;
    let archive = opened(&ctx.archive)?;
    let mut present = Vec::with_capacity(args.keys.len());
    for key in &args.keys {
        if archive.contains(table, key)? {
            present.push(key.as_str());
        } else {
            writeln!(ctx.out, "{} {key} not found", table.key().name().to_lowercase())?;
        }
    }
    if present.is_empty() {
        return Ok(());
    }
    if !args.yes {
        write!(ctx.out, "Remove {} entries from {table}? [y/N] ", present.len())?;
        ctx.out.flush()?;
        let mut answer = String::new();
        ctx.input.read_line(&mut answer)?;
        if !matches!(answer.trim().to_lowercase().as_str(), "y" | "yes") {
            writeln!(ctx.out, "Nothing removed")?;
            return Ok(());
        }
    }
    let removed = archive.transaction(|archive| {
        let mut removed = 0;
        for key in &present {
            if archive.delete(table, key)? {
                removed += 1;
            }
        }
        Ok(removed)
    })?;
    writeln!(ctx.out, "Removed {removed} entries from {table}")?;
    Ok(())
}

// ------------- copy / merge -------------
#[derive(Parser, Debug)]
#[command(no_binary_name = true, disable_help_flag = true)]
struct TransferArgs {
    path: PathBuf,
    /// TABLE QUERY pairs.
    #[arg(long = "query", num_args = 2, value_names = ["TABLE", "QUERY"])]
    queries: Vec<String>,
    #[arg(long)]
    replace: bool,
    /// `table.param=value` selections.
    parameters: Vec<String>,
}

fn selections(args: &TransferArgs) -> Result<Vec<(Table, CompiledPredicate)>> {
    let parameters = ParameterGroup::from_pairs(&args.parameters).ok_or_else(|| {
        RepoError::MalformedCommand("selections must read <table>.<param>=<value>".to_string())
    })?;
    if let Some(stray) = parameters
        .names()
        .find(|name| !Table::ALL.iter().any(|t| name.starts_with(&format!("{t}."))))
    {
        return Err(RepoError::MalformedCommand(format!("'{stray}' does not name a table")));
    }
    let mut queries: Vec<(Table, Query)> = Vec::new();
    for pair in args.queries.chunks(2) {
        if let [table, query] = pair {
            queries.push((table.parse()?, Query::parse(query)?));
        }
    }
    let mut selected = Vec::new();
    for table in Table::ALL {
        let compiler = Compiler::new(table);
        let scoped = parameters.scoped(&table.to_string());
        let mut predicates = Vec::new();
        if !scoped.is_empty() {
            predicates.push(compiler.compile_parameters(&scoped)?);
        }
        for (_, query) in queries.iter().filter(|(t, _)| *t == table) {
            predicates.push(compiler.compile_query(query)?);
        }
        // several selections on one table add up
        if let Some(first) = predicates.first().cloned() {
            let combined = predicates
                .into_iter()
                .skip(1)
                .fold(first, CompiledPredicate::or);
            selected.push((table, combined));
        }
    }
    if selected.is_empty() {
        selected = Table::ALL.iter().map(|t| (*t, CompiledPredicate::all())).collect();
    }
    Ok(selected)
}

fn transfer(ctx: &mut Context, args: &[String], direction: Transfer) -> Result<()> {
    let args: TransferArgs = parse(args)?;
    let selected = selections(&args)?;
    let other = archive_path(&args.path);
    let archive = opened(&ctx.archive)?;
    let written = archive.transfer(&other, direction, &selected, args.replace)?;
    let verb = match direction {
        Transfer::Copy => "Copied",
        Transfer::Merge => "Merged",
    };
    for (table, rows) in written {
        writeln!(ctx.out, "{verb} {rows} {table}")?;
    }
    Ok(())
}

pub fn copy(ctx: &mut Context, args: &[String]) -> Result<()> {
    transfer(ctx, args, Transfer::Copy)
}

pub fn merge(ctx: &mut Context, args: &[String]) -> Result<()> {
    transfer(ctx, args, Transfer::Merge)
}

// ------------- clean / upgrade -------------
pub fn clean(ctx: &mut Context, _args: &[String]) -> Result<()> {
    opened(&ctx.archive)?.vacuum()?;
    writeln!(ctx.out, "Database cleaned")?;
    Ok(())
}

pub fn upgrade(ctx: &mut Context, _args: &[String]) -> Result<()> {
    let archive = opened(&ctx.archive)?;
    match archive.upgrade()? {
        Some(from) => {
            archive.append_history("database upgrade")?;
            writeln!(ctx.out, "Upgraded database from {from} to {VERSION}")?;
        }
        None => writeln!(ctx.out, "Database is up to date ({VERSION})")?,
    }
    Ok(())
}
