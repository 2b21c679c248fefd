// Copyright 2026 The Cvsmap Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! cvsmap: builds per-line CVS history profiles for one package.

use std::fs;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use clap::ValueEnum;
use cvsmap_lib::cvs::CvsClient;
use cvsmap_lib::cvs::CvsConfig;
use cvsmap_lib::exec::SystemExecutor;
use cvsmap_lib::mapper::MapError;
use cvsmap_lib::mapper::MapOptions;
use cvsmap_lib::mapper::MapStats;
use cvsmap_lib::mapper::map_files;
use cvsmap_lib::materialize::CmtWriter;
use cvsmap_lib::revision::Revision;
use cvsmap_lib::store::KeyedStore;
use cvsmap_lib::store::StoreError;
use cvsmap_lib::store::StoreMode;
use cvsmap_lib::tracking::BackwardLineTracker;
use cvsmap_lib::tracking::ForwardRangeTracker;
use cvsmap_lib::tracking::Tracker;
use thiserror::Error;

/// Indexes a CVS-hosted package so every source line maps to the
/// revisions, and commit comments, it has lived through.
#[derive(Debug, Parser)]
#[command(name = "cvsmap", version)]
struct Args {
    /// CVS repository root passed to `cvs -d` (defaults to $CVSROOT)
    #[arg(short = 'd', long = "cvsroot")]
    cvs_root: Option<String>,

    /// Package (module) name recorded in the output files
    #[arg(short = 'm', long)]
    module: String,

    /// Data-root label recorded in every cmt record header
    #[arg(long, default_value = "root0")]
    root: String,

    /// Store file [default: $CVSDATA/<module>.db]
    #[arg(long)]
    db: Option<PathBuf>,

    /// Line-comment map file [default: $CVSDATA/<module>.cmt]
    #[arg(long)]
    cmt: Option<PathBuf>,

    /// Filename index file [default: $CVSDATA/<module>.offset]
    #[arg(long)]
    offset: Option<PathBuf>,

    /// Read the list of files to map from this file, one per line
    #[arg(short = 'i', long)]
    input: Option<PathBuf>,

    /// Backtrack from this revision instead of each file's newest one
    #[arg(short = 'r', long)]
    start_revision: Option<String>,

    /// Line-tracking strategy
    #[arg(long, value_enum, default_value_t = StrategyArg::Line)]
    strategy: StrategyArg,

    /// Serve diffs from the store cache instead of re-invoking cvs
    #[arg(long)]
    read_cache: bool,

    /// Commit the store once per this many files
    #[arg(long, default_value_t = 20)]
    sync_rate: u32,

    /// Files to map
    files: Vec<String>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum StrategyArg {
    /// Backward walk over per-line cells
    Line,
    /// Forward walk over live line ranges
    Range,
}

#[derive(Debug, Error)]
enum CommandError {
    #[error("$CVSDATA must be set (or pass --db, --cmt and --offset)")]
    MissingDataRoot,
    #[error("Invalid starting revision {0:?}")]
    BadStartRevision(String),
    #[error("Cannot read file list {}", path.display())]
    FileList {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Cannot create {}", path.display())]
    CreateOutput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Map(#[from] MapError),
}

fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();
    match run(&args) {
        Ok(stats) => {
            report(&stats);
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("cvsmap: {err}");
            let mut source = std::error::Error::source(&err);
            while let Some(err) = source {
                eprintln!("  caused by: {err}");
                source = err.source();
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing::metadata::LevelFilter::ERROR.into())
        .with_env_var("CVSMAP_LOG")
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: &Args) -> Result<MapStats, CommandError> {
    let config = CvsConfig {
        cvs_root: args
            .cvs_root
            .clone()
            .or_else(|| std::env::var("CVSROOT").ok())
            .filter(|root| !root.is_empty()),
        ..CvsConfig::default()
    };

    let start_revision = args
        .start_revision
        .as_deref()
        .map(|text| {
            text.parse::<Revision>()
                .map_err(|_| CommandError::BadStartRevision(text.to_owned()))
        })
        .transpose()?;

    let mut files = Vec::new();
    if let Some(path) = &args.input {
        let list = fs::read_to_string(path).map_err(|source| CommandError::FileList {
            path: path.clone(),
            source,
        })?;
        files.extend(
            list.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_owned),
        );
    }
    files.extend(args.files.iter().cloned());

    let (db_path, cmt_path, offset_path) = output_paths(args)?;
    let mut store = KeyedStore::open(&db_path, StoreMode::ReadWrite)?;
    let cmt = BufWriter::new(create_output(&cmt_path)?);
    let offset = BufWriter::new(create_output(&offset_path)?);
    let mut writer = CmtWriter::new(cmt, offset);

    let tracker: &dyn Tracker = match args.strategy {
        StrategyArg::Line => &BackwardLineTracker,
        StrategyArg::Range => &ForwardRangeTracker,
    };
    let options = MapOptions {
        root: args.root.clone(),
        package: args.module.clone(),
        read_cache: args.read_cache,
        start_revision,
        sync_rate: args.sync_rate,
    };

    let mut client = CvsClient::new(&config, SystemExecutor);
    let stats = map_files(&mut client, &mut store, tracker, &mut writer, &options, files)?;
    store.close()?;
    Ok(stats)
}

fn output_paths(args: &Args) -> Result<(PathBuf, PathBuf, PathBuf), CommandError> {
    let data_root = match (&args.db, &args.cmt, &args.offset) {
        (Some(_), Some(_), Some(_)) => None,
        _ => {
            let root = std::env::var("CVSDATA").map_err(|_| CommandError::MissingDataRoot)?;
            Some(PathBuf::from(root))
        }
    };
    let default = |extension: &str| {
        data_root
            .as_ref()
            .expect("defaulted path requires $CVSDATA")
            .join(format!("{}.{extension}", args.module))
    };
    Ok((
        args.db.clone().unwrap_or_else(|| default("db")),
        args.cmt.clone().unwrap_or_else(|| default("cmt")),
        args.offset.clone().unwrap_or_else(|| default("offset")),
    ))
}

fn create_output(path: &Path) -> Result<File, CommandError> {
    File::create(path).map_err(|source| CommandError::CreateOutput {
        path: path.to_owned(),
        source,
    })
}

fn report(stats: &MapStats) {
    if stats.files == 0 {
        eprintln!("cvsmap: no files mapped");
        return;
    }
    eprintln!("total   # of files             :\t{}", stats.files);
    eprintln!("total   # of lines of code     :\t{}", stats.lines);
    eprintln!("maximum # versions / file      :\t{}", stats.max_revisions);
    eprintln!("              the file is      :\t{}", stats.max_revisions_file);
    eprintln!("average # versions / file      :\t{:.2}", stats.average_revisions());
    eprintln!(
        "average # cvs comments / line  :\t{:.2}",
        stats.average_mappings_per_line()
    );
}
