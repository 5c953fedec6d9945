use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use lnhdl_firrtl::{FirrtlDesign, FirrtlLowering};
use lnhdl_library::LibraryManager;
use lnhdl_passes::semantic_check;
use lnhdl_pyrope::KeywordTable;

/// LNHDL - multi-HDL compilation down to LNAST
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile serialized circuits into LNAST
    Compile {
        /// Module registry root
        #[arg(long, default_value = "lgdb")]
        path: String,

        /// Input files, comma separated
        #[arg(long)]
        files: String,

        /// Inputs are FIRRTL circuits
        #[arg(long)]
        firrtl: bool,

        /// Top module name (required with --firrtl)
        #[arg(long)]
        top: Option<String>,

        /// Output directory
        #[arg(long, default_value = ".")]
        odir: String,

        /// Dump each lowered tree
        #[arg(long)]
        gviz: bool,
    },

    /// Print the Pyrope keyword table
    Keywords,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    match cli.command {
        Commands::Compile {
            path,
            files,
            firrtl,
            top,
            odir,
            gviz,
        } => compile(
            Path::new(&path),
            &files,
            firrtl,
            top.as_deref(),
            Path::new(&odir),
            gviz,
        ),
        Commands::Keywords => {
            print_keywords();
            Ok(())
        }
    }
}

fn compile(
    path: &Path,
    files: &str,
    firrtl: bool,
    top: Option<&str>,
    odir: &Path,
    gviz: bool,
) -> Result<()> {
    let file_list: Vec<&str> = files.split(',').filter(|f| !f.is_empty()).collect();
    if file_list.is_empty() {
        warn!("nothing to compile. no files");
        return Ok(());
    }

    if !firrtl {
        for file in &file_list {
            warn!("todo: start from the pyrope parser: {}", file);
        }
        return Ok(());
    }

    let Some(top) = top else {
        bail!("the firrtl front-end must specify the top module name");
    };
    info!("top module name is: {}", top);

    let mut manager = LibraryManager::new();
    let library = manager.open(path).context("failed to open module registry")?;
    library.register(top);

    let mut lnasts = Vec::new();
    let mut engine = FirrtlLowering::new();
    for file in &file_list {
        info!("FILE: {}", file);
        let content = fs::read_to_string(file).with_context(|| format!("failed to read {file}"))?;
        let design: FirrtlDesign = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse FIRRTL circuit from {file}"))?;
        let lowered = engine
            .lower_design(&design, library, file)
            .with_context(|| format!("failed to lower {file}"))?;
        lnasts.extend(lowered);
    }

    let mut semantic_failed = false;
    for ln in &lnasts {
        let report = semantic_check(ln);
        for error in &report.errors {
            tracing::error!(module = ln.module_name(), "{}", error);
            semantic_failed = true;
        }
        if let Some(warning) = report.never_read_warning() {
            warn!(module = ln.module_name(), "{}", warning);
        }
    }

    if gviz {
        fs::create_dir_all(odir)?;
        for ln in &lnasts {
            let out_path = odir.join(format!("{}.lnast", ln.module_name()));
            fs::write(&out_path, ln.dump())
                .with_context(|| format!("failed to write {}", out_path.display()))?;
            info!("dumped {}", out_path.display());
        }
    }

    manager.sync_all().context("failed to sync module registry")?;

    if semantic_failed {
        bail!("semantic check reported errors");
    }
    println!("lowered {} module(s)", lnasts.len());
    Ok(())
}

fn print_keywords() {
    let table = KeywordTable::new();
    let mut entries: Vec<(&str, u16)> = table.iter().collect();
    entries.sort_by_key(|&(keyword, id)| (id, keyword));
    for (keyword, id) in entries {
        println!("{id:>4}  {keyword}");
    }
}
