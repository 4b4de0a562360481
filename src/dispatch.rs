//! Routing of command tokens to handlers.
//!
//! Every `(command, operation)` pair the program understands is one entry of
//! [`ROUTES`]. The entry says which schema versions the handler accepts and
//! whether it writes; the dispatcher opens the archive, enforces both, logs
//! the command in the history table and runs the handler.

use std::io::{BufRead, BufReader, Write};

use tracing::{debug, warn};

use crate::archive::Archive;
use crate::commands;
use crate::config::Config;
use crate::error::{RepoError, Result};
use crate::guard::{InstanceProbe, SysinfoProbe, ensure_single};
use crate::help::{self, Help};
use crate::schema::VERSION;

/// Name other instances are recognised by.
pub const PROGRAM: &str = env!("CARGO_PKG_NAME");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Help,
    Init,
    Database,
}

impl Command {
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "help" => Some(Command::Help),
            "init" => Some(Command::Init),
            "database" => Some(Command::Database),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    None,
    Info,
    History,
    Search,
    Export,
    Add,
    Edit,
    Remove,
    Copy,
    Merge,
    Clean,
    Upgrade,
}

impl Operation {
    pub fn parse(token: &str) -> Option<Self> {
        let operation = match token {
            "info" => Operation::Info,
            "history" => Operation::History,
            "search" => Operation::Search,
            "export" => Operation::Export,
            "add" => Operation::Add,
            "edit" => Operation::Edit,
            "remove" => Operation::Remove,
            "copy" => Operation::Copy,
            "merge" => Operation::Merge,
            "clean" => Operation::Clean,
            "upgrade" => Operation::Upgrade,
            _ => return None,
        };
        Some(operation)
    }
}

/// Schema version a handler needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionGate {
    /// Anything, including a missing version.
    None,
    /// The version this program writes.
    Exact,
    /// Any version; on mismatch the handler runs degraded.
    Readable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    /// Writes only when the flag is among the arguments.
    WriteWith(&'static str),
}

impl Access {
    pub fn writes(&self, args: &[String]) -> bool {
        match self {
            Access::Read => false,
            Access::Write => true,
            Access::WriteWith(flag) => args.iter().any(|a| a == flag),
        }
    }
}

/// What a handler gets to work with.
pub struct Context<'a> {
    pub config: &'a Config,
    pub archive: Option<Archive>,
    pub out: &'a mut dyn Write,
    pub input: &'a mut dyn BufRead,
    /// The archive version did not match and the route accepted that.
    pub degraded: bool,
}

impl Context<'_> {
    pub fn archive(&self) -> Result<&Archive> {
        self.archive
            .as_ref()
            .ok_or_else(|| RepoError::Persistence("no database is open".to_string()))
    }
}

pub type Handler = fn(&mut Context, &[String]) -> Result<()>;

pub struct Route {
    pub command: Command,
    pub operation: Operation,
    pub gate: VersionGate,
    pub access: Access,
    pub handler: Handler,
    pub help: &'static Help,
}

const fn route(
    command: Command,
    operation: Operation,
    gate: VersionGate,
    access: Access,
    handler: Handler,
    help: &'static Help,
) -> Route {
    Route { command, operation, gate, access, handler, help }
}

pub static ROUTES: &[Route] = &[
    route(Command::Help, Operation::None, VersionGate::None, Access::Read, commands::help, &help::HELP),
    route(Command::Init, Operation::None, VersionGate::None, Access::Write, commands::init, &help::INIT),
    route(Command::Database, Operation::Info, VersionGate::Readable, Access::Read, commands::info, &help::INFO),
    route(Command::Database, Operation::History, VersionGate::Exact, Access::WriteWith("--clear"), commands::history, &help::HISTORY),
    route(Command::Database, Operation::Search, VersionGate::Exact, Access::Read, commands::search, &help::SEARCH),
    route(Command::Database, Operation::Export, VersionGate::Exact, Access::Read, commands::export, &help::EXPORT),
    route(Command::Database, Operation::Add, VersionGate::Exact, Access::Write, commands::add, &help::ADD),
    route(Command::Database, Operation::Edit, VersionGate::Exact, Access::Write, commands::edit, &help::EDIT),
    route(Command::Database, Operation::Remove, VersionGate::Exact, Access::Write, commands::remove, &help::REMOVE),
    route(Command::Database, Operation::Copy, VersionGate::Exact, Access::Write, commands::copy, &help::COPY),
    route(Command::Database, Operation::Merge, VersionGate::Exact, Access::Write, commands::merge, &help::MERGE),
    route(Command::Database, Operation::Clean, VersionGate::None, Access::Write, commands::clean, &help::CLEAN),
    route(Command::Database, Operation::Upgrade, VersionGate::None, Access::Write, commands::upgrade, &help::UPGRADE),
];

pub fn find(command: Command, operation: Operation) -> Option<&'static Route> {
    ROUTES
        .iter()
        .find(|r| r.command == command && r.operation == operation)
}

/// Splits the tokens into a route and the handler's own arguments.
pub fn resolve(tokens: &[String]) -> Result<(&'static Route, &[String])> {
    let unknown = || RepoError::UnknownCommand(tokens.join(" "));
    let Some(first) = tokens.first() else {
        return find(Command::Help, Operation::None).map(|r| (r, tokens)).ok_or_else(unknown);
    };
    let command = Command::parse(first).ok_or_else(unknown)?;
    let (operation, args) = match command {
        Command::Database => match tokens.get(1) {
            None => (Operation::Info, &tokens[1..]),
            Some(token) => (Operation::parse(token).ok_or_else(unknown)?, &tokens[2..]),
        },
        _ => (Operation::None, &tokens[1..]),
    };
    let route = find(command, operation).ok_or_else(unknown)?;
    Ok((route, args))
}

// ------------- Dispatcher -------------
pub struct Dispatcher<'a> {
    config: Config,
    probe: Box<dyn InstanceProbe + 'a>,
    out: Box<dyn Write + 'a>,
    input: Box<dyn BufRead + 'a>,
}

impl<'a> Dispatcher<'a> {
    /// Writes to stdout, reads confirmations from stdin, scans real processes.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            probe: Box::new(SysinfoProbe),
            out: Box::new(std::io::stdout()),
            input: Box::new(BufReader::new(std::io::stdin())),
        }
    }
    pub fn with_probe(mut self, probe: impl InstanceProbe + 'a) -> Self {
        self.probe = Box::new(probe);
        self
    }
    pub fn with_output(mut self, out: impl Write + 'a) -> Self {
        self.out = Box::new(out);
        self
    }
    pub fn with_input(mut self, input: impl BufRead + 'a) -> Self {
        self.input = Box::new(input);
        self
    }
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn dispatch(&mut self, tokens: &[String]) -> Result<()> {
        let (route, args) = resolve(tokens)?;
        debug!(command = ?route.command, operation = ?route.operation, ?args, "dispatch");
        let mut context = Context {
            config: &self.config,
            archive: None,
            out: &mut *self.out,
            input: &mut *self.input,
            degraded: false,
        };
        if route.command == Command::Help {
            return (route.handler)(&mut context, args);
        }

        // only init may create the file
        if route.command != Command::Init && !self.config.database.exists() {
            return Err(RepoError::MalformedCommand(format!(
                "database {} does not exist, run init first",
                self.config.database.display()
            )));
        }
        let archive = Archive::open(&self.config.database)?;
        let prepared = prepare(route, &archive, self.probe.as_ref(), args, tokens);
        context.degraded = match prepared {
            Ok(degraded) => degraded,
            Err(err) => {
                archive.close()?;
                return Err(err);
            }
        };
        context.archive = Some(archive);
        let result = (route.handler)(&mut context, args);
        let closed = match context.archive.take() {
            Some(archive) => archive.close(),
            None => Ok(()),
        };
        result.and(closed)
    }
}

// gate, guard and history; true when running degraded
fn prepare(
    route: &Route,
    archive: &Archive,
    probe: &dyn InstanceProbe,
    args: &[String],
    tokens: &[String],
) -> Result<bool> {
    let version = archive.version()?;
    let current = version.as_deref() == Some(VERSION);
    let found = || version.clone().unwrap_or_else(|| "none".to_string());
    let degraded = match route.gate {
        VersionGate::Exact if !current => {
            return Err(RepoError::VersionMismatch { found: found(), expected: VERSION.to_string() });
        }
        VersionGate::Readable if !current => {
            let mismatch = RepoError::VersionMismatch { found: found(), expected: VERSION.to_string() };
            warn!("{mismatch}; running with limited features");
            true
        }
        _ => false,
    };
    if route.access.writes(args) {
        ensure_single(probe, PROGRAM, archive.path())?;
    }
    // older archives keep no history table; upgrade() adds it
    if current {
        archive.append_history(&tokens.join(" "))?;
    } else {
        debug!("history not recorded on a database at version {}", found());
    }
    Ok(degraded)
}

