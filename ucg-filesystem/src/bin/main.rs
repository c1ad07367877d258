//! `ucg-walk`, walks directory trees with [`FileID`]s and reports what it found.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;
use ucg_cfg::{Config, ConfigSet};
use ucg_filesystem::platform::{FilesystemPlatform, Platform};
use ucg_filesystem::{FileID, FileType, UniqueFileIdentifier};

static WALK_THREADS: Config<u64> =
    Config::new("walk_threads", "Number of threads to walk directories with.", 4);
static WALK_BATCH_STAT: Config<bool> = Config::new(
    "walk_batch_stat",
    "Stat every entry while listing a directory, instead of lazily.",
    false,
);
static WALK_READ_FILES: Config<bool> = Config::new(
    "walk_read_files",
    "Read the contents of every regular file that's found.",
    false,
);
static WALK_REPORT_DUPLICATES: Config<bool> = Config::new(
    "walk_report_duplicates",
    "Log every entry that was already reached by another path.",
    false,
);

/// Below this many file handles we're likely to run out on a deep tree.
const LOW_FILE_HANDLE_MAX: usize = 256;
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Walk directory trees, counting every unique file and directory.
#[derive(Parser, Debug)]
#[command(name = "ucg-walk", version)]
struct Args {
    /// Paths to walk, relative to the current directory unless absolute.
    #[arg(value_name = "PATH", default_value = ".")]
    paths: Vec<String>,

    /// Override a config, e.g. `--config walk_threads=8`. Takes precedence over `UCG_*`
    /// environment variables.
    #[arg(long = "config", value_name = "NAME=VALUE")]
    configs: Vec<String>,

    /// Print the resolved configs and exit.
    #[arg(long)]
    print_config: bool,
}

fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let configs = load_configs(&args)?;
    if args.print_config {
        print!("{configs}");
        return Ok(());
    }

    match FilesystemPlatform::file_handle_max() {
        Ok(max) if max < LOW_FILE_HANDLE_MAX => {
            tracing::warn!(max, "low file handle limit, the walk may fail on deep trees");
        }
        Ok(max) => tracing::debug!(max, "file handle limit"),
        Err(err) => tracing::warn!(%err, "failed to get file handle limit"),
    }

    let num_threads = usize::try_from(WALK_THREADS.read(&configs))?.max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .thread_name(|idx| format!("ucg-walk-{idx}"))
        .build()
        .context("building thread pool")?;

    let walk = Walk::new(&configs);
    let cwd = Arc::new(FileID::cwd());

    let start = Instant::now();
    pool.scope(|scope| {
        for path in &args.paths {
            let entry = FileID::new(Arc::clone(&cwd), path.as_str());
            walk.visit(scope, entry);
        }
    });
    let elapsed = start.elapsed();

    let summary = walk.summary();
    println!(
        "{elapsed:?} for {} files ({} bytes) in {} directories, {} duplicates, {} failures",
        summary.files, summary.bytes, summary.dirs, summary.duplicates, summary.failures
    );
    if summary.failures > 0 {
        anyhow::bail!("{} entries could not be walked", summary.failures);
    }

    Ok(())
}

fn load_configs(args: &Args) -> Result<ConfigSet, anyhow::Error> {
    let mut builder = ConfigSet::builder();
    builder
        .register(&WALK_THREADS)
        .register(&WALK_BATCH_STAT)
        .register(&WALK_READ_FILES)
        .register(&WALK_REPORT_DUPLICATES);
    let configs = builder.build();

    let applied = configs.load_env("ucg", |var| std::env::var(var).ok())?;
    tracing::debug!(applied, "loaded configs from the environment");

    for config in &args.configs {
        let (name, value) = config
            .split_once('=')
            .with_context(|| format!("expected NAME=VALUE, got '{config}'"))?;
        configs.try_update(name.trim(), value)?;
    }

    Ok(configs)
}

#[derive(Debug, Default)]
struct Summary {
    files: u64,
    dirs: u64,
    bytes: u64,
    duplicates: u64,
    failures: u64,
}

/// State shared by every thread participating in a walk.
struct Walk {
    batch_stat: bool,
    read_files: bool,
    report_duplicates: bool,

    /// Identities of every file and directory we've visited.
    seen: Mutex<HashSet<UniqueFileIdentifier>>,

    files: AtomicU64,
    dirs: AtomicU64,
    bytes: AtomicU64,
    duplicates: AtomicU64,
    failures: AtomicU64,
}

impl Walk {
    fn new(configs: &ConfigSet) -> Self {
        Walk {
            batch_stat: WALK_BATCH_STAT.read(configs),
            read_files: WALK_READ_FILES.read(configs),
            report_duplicates: WALK_REPORT_DUPLICATES.read(configs),
            seen: Mutex::new(HashSet::new()),
            files: AtomicU64::new(0),
            dirs: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    fn summary(&self) -> Summary {
        Summary {
            files: self.files.load(Ordering::Relaxed),
            dirs: self.dirs.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    fn visit<'s>(&'s self, scope: &rayon::Scope<'s>, mut entry: FileID) {
        match entry.file_type() {
            FileType::Directory => {
                if !self.first_visit(&entry) {
                    return;
                }
                self.dirs.fetch_add(1, Ordering::Relaxed);

                let dir = Arc::new(entry);
                scope.spawn(move |scope| self.list(scope, dir));
            }
            FileType::RegularFile => {
                if !self.first_visit(&entry) {
                    return;
                }
                self.files.fetch_add(1, Ordering::Relaxed);

                if self.read_files {
                    self.read(&mut entry);
                } else {
                    self.bytes.fetch_add(entry.file_size(), Ordering::Relaxed);
                }
            }
            FileType::StatFailed => {
                tracing::warn!(path = %entry.path(), "failed to stat");
                self.failures.fetch_add(1, Ordering::Relaxed);
            }
            // Symlinks found while listing aren't followed.
            FileType::Symlink | FileType::Unknown | FileType::Uninitialized => {
                tracing::trace!(path = %entry.path(), kind = ?entry.file_type(), "skipping");
            }
        }
    }

    /// Returns `false`, and records a duplicate, if we've already visited this file.
    fn first_visit(&self, entry: &FileID) -> bool {
        let id = entry.unique_file_identifier();
        if !id.is_valid() {
            return true;
        }

        let inserted = self.seen.lock().insert(id);
        if !inserted {
            self.duplicates.fetch_add(1, Ordering::Relaxed);
            if self.report_duplicates {
                tracing::info!(path = %entry.path(), %id, "duplicate");
            }
        }
        inserted
    }

    fn list<'s>(&'s self, scope: &rayon::Scope<'s>, dir: Arc<FileID>) {
        let entries = dir.file_descriptor().and_then(|fd| {
            if self.batch_stat {
                fd.list_with_stat()
            } else {
                fd.list()
            }
        });
        let entries = match entries {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(path = %dir.path(), %err, "failed to list directory");
                self.failures.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        tracing::debug!(path = %dir.path(), num_entries = entries.len(), "listed");

        for entry in &entries {
            let child = FileID::from_dir_entry(Arc::clone(&dir), entry, self.batch_stat);
            self.visit(scope, child);
        }
    }

    fn read(&self, entry: &mut FileID) {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut offset = 0u64;

        let result = entry.file_descriptor().and_then(|fd| loop {
            match fd.read_at(&mut buf, offset)? {
                0 => break Ok(offset),
                n => offset += n as u64,
            }
        });
        match result {
            Ok(read) => {
                self.bytes.fetch_add(read, Ordering::Relaxed);
            }
            Err(err) => {
                tracing::warn!(path = %entry.path(), %err, "failed to read");
                self.failures.fetch_add(1, Ordering::Relaxed);
            }
        }

        // Files are only read once, don't hold the descriptor until the walk finishes.
        if let Some(fd) = entry.take_file_descriptor() {
            if let Err(err) = fd.close() {
                tracing::warn!(path = %entry.path(), %err, "failed to close");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_visit_suppresses_duplicates() {
        let args = Args::parse_from(["ucg-walk", "--config", "walk_threads=2"]);
        let configs = load_configs(&args).unwrap();
        assert_eq!(WALK_THREADS.read(&configs), 2);
        let walk = Walk::new(&configs);

        let cwd = Arc::new(FileID::cwd());
        let original = FileID::from_relative_path(
            Arc::clone(&cwd),
            "original",
            None,
            FileType::RegularFile,
        );
        let hardlink =
            FileID::from_relative_path(Arc::clone(&cwd), "hardlink", None, FileType::RegularFile);
        original.set_dev_ino(7, 42);
        hardlink.set_dev_ino(7, 42);

        assert!(walk.first_visit(&original));
        assert!(!walk.first_visit(&hardlink));
        assert_eq!(walk.summary().duplicates, 1);

        // Entries without an identity are never treated as duplicates.
        let unknown = FileID::default();
        assert!(walk.first_visit(&unknown));
        assert!(walk.first_visit(&unknown));
        assert_eq!(walk.summary().duplicates, 1);
    }
}
