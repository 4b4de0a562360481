//! Advisory single-writer check.
//!
//! Before anything writes to an archive, the live processes are scanned for
//! other instances of this program pointed at the same file. This is not a
//! lock: an instance started right after the scan is not seen.

use std::path::{Path, PathBuf};

// used to list live processes
use sysinfo::{Process, System, get_current_pid};
use tracing::debug;

use crate::config::{ENV_PREFIX, archive_path};
use crate::error::{RepoError, Result};

pub trait InstanceProbe {
    /// How many other live processes named `program` resolve to `archive`.
    fn others(&self, program: &str, archive: &Path) -> usize;
}

/// Fails with `MultipleInstances` when `probe` sees another instance.
pub fn ensure_single(probe: &dyn InstanceProbe, program: &str, archive: &Path) -> Result<()> {
    let others = probe.others(program, archive);
    debug!(program, archive = %archive.display(), others, "instance scan");
    if others > 0 {
        return Err(RepoError::MultipleInstances(archive.display().to_string()));
    }
    Ok(())
}

/// Probe backed by the operating system's process table.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoProbe;

impl InstanceProbe for SysinfoProbe {
    fn others(&self, program: &str, archive: &Path) -> usize {
        let mut system = System::new();
        system.refresh_processes();
        let own = get_current_pid().ok();
        let target = canonical(archive);
        system
            .processes()
            .iter()
            .filter(|(pid, _)| Some(**pid) != own)
            .filter(|(_, process)| runs(process, program))
            .filter(|(_, process)| resolve(process).is_some_and(|path| canonical(&path) == target))
            .count()
    }
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn runs(process: &Process, program: &str) -> bool {
    if process.name() == program {
        return true;
    }
    // interpreters and wrappers keep the program in argv[0]
    process
        .cmd()
        .first()
        .and_then(|arg| Path::new(arg).file_name())
        .is_some_and(|name| name == program)
}

// which archive another instance works on, the same way Config would decide it
fn resolve(process: &Process) -> Option<PathBuf> {
    let cwd = process.cwd().map(Path::to_path_buf).unwrap_or_default();
    let mut args = process.cmd().iter();
    while let Some(arg) = args.next() {
        let value = match arg.strip_prefix("--database") {
            Some("") => args.next().cloned(),
            Some(rest) => rest.strip_prefix('=').map(str::to_string),
            None => None,
        };
        if let Some(value) = value {
            return Some(archive_path(&cwd.join(value)));
        }
    }
    let variable = format!("{ENV_PREFIX}_DATABASE=");
    if let Some(value) = process.environ().iter().find_map(|e| e.strip_prefix(&variable)) {
        return Some(archive_path(&cwd.join(value)));
    }
    if process.cwd().is_none() {
        return None;
    }
    Some(archive_path(&cwd))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(usize);

    impl InstanceProbe for Fixed {
        fn others(&self, _program: &str, _archive: &Path) -> usize {
            self.0
        }
    }

    #[test]
    fn another_instance_is_refused() {
        let path = Path::new("FA.db");
        assert!(ensure_single(&Fixed(0), "falocalrepo", path).is_ok());
        let err = ensure_single(&Fixed(2), "falocalrepo", path).expect_err("two others");
        assert_eq!(err.exit_code(), 5);
    }

    #[test]
    fn own_process_is_not_counted() {
        let path = std::env::temp_dir().join("guard-probe.db");
        assert_eq!(SysinfoProbe.others("falocalrepo-guard-test-program", &path), 0);
    }
}
