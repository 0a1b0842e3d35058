mod logging;
mod output;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use output::{GcOutput, LsOutput, MakeOutput, OutputWriter, RegenOutput, RmOutput};
use pack_core::{CancelToken, DEFAULT_MAX_LINKS, GcEvent, ImportSettings, Pack};
use std::path::{Path, PathBuf};

/// Pack - manifest-driven content-addressed packs
#[derive(Parser)]
#[command(name = "pack")]
#[command(about = "Manifest-driven content-addressed packs using BLAKE3", long_about = None)]
#[command(version)]
struct Cli {
    /// Pack directory (defaults to PACK_WORKDIR env var or the current directory)
    #[arg(short = 'C', long, global = true, env = "PACK_WORKDIR")]
    workdir: Option<PathBuf>,

    /// Output results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import the pack directory and write its manifest
    Make {
        #[command(flatten)]
        import: ImportArgs,
    },

    /// Rebuild the pack's store from its manifest, verifying every file
    Regen {
        /// Pack directory to regenerate (overrides --workdir)
        path: Option<PathBuf>,

        #[command(flatten)]
        import: ImportArgs,
    },

    /// Remove blocks no longer reachable from the manifest root
    Gc,

    /// List every block in the store
    Ls,

    /// Remove the pack's store
    Rm,
}

/// Import settings shared by `make` and `regen`.
#[derive(Args, Debug, Clone)]
struct ImportArgs {
    /// Maximum links per file node
    #[arg(long, default_value_t = DEFAULT_MAX_LINKS)]
    max_links: usize,

    /// Copy file data into the store instead of referencing it
    #[arg(long)]
    copy: bool,

    /// Store leaf data inside file nodes (requires --copy)
    #[arg(long)]
    no_raw_leaves: bool,
}

impl ImportArgs {
    fn settings(&self) -> ImportSettings {
        ImportSettings {
            max_links: self.max_links,
            raw_leaves: !self.no_raw_leaves,
            no_copy: !self.copy,
            ..ImportSettings::default()
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let output = OutputWriter::new(cli.json);

    if let Err(e) = logging::init(cli.verbose) {
        eprintln!("failed to initialize logging: {}", e);
    }

    let workdir = cli.workdir.unwrap_or_else(|| PathBuf::from("."));
    tracing::debug!(workdir = %workdir.display(), "resolved pack directory");

    let result = match cli.command {
        Commands::Make { import } => cmd_make(&workdir, &import, &output),
        Commands::Regen { path, import } => {
            cmd_regen(path.as_deref().unwrap_or(&workdir), &import, &output)
        }
        Commands::Gc => cmd_gc(&workdir, &output),
        Commands::Ls => cmd_ls(&workdir, &output),
        Commands::Rm => cmd_rm(&workdir, &output),
    };

    if let Err(err) = result {
        output.write_error(&err, 1);
        std::process::exit(1);
    }
}

fn cmd_make(workdir: &Path, import: &ImportArgs, output: &OutputWriter) -> Result<()> {
    let pack = Pack::new(workdir);
    let report = pack
        .make(&import.settings(), &CancelToken::new())
        .with_context(|| format!("Failed to make pack in {}", workdir.display()))?;

    let data = MakeOutput {
        success: true,
        result_code: 0,
        root: report.root,
        files: report.files,
        bytes: report.bytes,
        manifest: pack.manifest_path().display().to_string(),
        completed_at: Utc::now(),
    };

    output.write(&data, || {
        format!(
            "{}\nimported {} files ({} bytes)\n",
            report.root, report.files, report.bytes
        )
    })
}

fn cmd_regen(workdir: &Path, import: &ImportArgs, output: &OutputWriter) -> Result<()> {
    let workdir = std::path::absolute(workdir)
        .with_context(|| format!("Invalid pack path: {}", workdir.display()))?;
    let pack = Pack::new(&workdir);

    let report = pack
        .regen(&import.settings(), &CancelToken::new())
        .with_context(|| format!("Failed to regenerate pack in {}", workdir.display()))?;

    let data = RegenOutput {
        success: true,
        result_code: 0,
        root: report.root,
        files: report.files,
        directories_skipped: report.directories_skipped,
        completed_at: Utc::now(),
    };

    output.write(&data, || {
        format!(
            "pack repo successfully regenerated.\nroot {} ({} files)\n",
            report.root, report.files
        )
    })
}

fn cmd_gc(workdir: &Path, output: &OutputWriter) -> Result<()> {
    let pack = Pack::new(workdir);
    let store = pack.open_store()?;

    let sweep = pack
        .gc(&store, &CancelToken::new())
        .with_context(|| "Failed to run garbage collection")?;

    let mut removed = Vec::new();
    let mut errors = Vec::new();
    for event in sweep {
        match event {
            GcEvent::KeyRemoved(hash) => {
                output.write_line(format!("removed {}", hash))?;
                removed.push(hash);
            }
            GcEvent::Error(e) => {
                output.warn(&e);
                errors.push(e.to_string());
            }
        }
    }

    if output.is_json() {
        let data = GcOutput {
            success: errors.is_empty(),
            result_code: if errors.is_empty() { 0 } else { 1 },
            removed,
            errors: errors.clone(),
            completed_at: Utc::now(),
        };
        output.write(&data, String::new)?;
    }

    if !errors.is_empty() {
        anyhow::bail!("{} blocks could not be removed", errors.len());
    }
    Ok(())
}

fn cmd_ls(workdir: &Path, output: &OutputWriter) -> Result<()> {
    let pack = Pack::new(workdir);
    let keys = pack.ls()?;

    let mut blocks = Vec::new();
    for key in keys {
        let key = key.with_context(|| "Failed to list blocks")?;
        output.write_line(key)?;
        if output.is_json() {
            blocks.push(key);
        }
    }

    if output.is_json() {
        let data = LsOutput {
            success: true,
            result_code: 0,
            blocks,
        };
        output.write(&data, String::new)?;
    }
    Ok(())
}

fn cmd_rm(workdir: &Path, output: &OutputWriter) -> Result<()> {
    let pack = Pack::new(workdir);
    pack.remove_store()?;

    let removed = pack.store_path().display().to_string();
    let data = RmOutput {
        success: true,
        result_code: 0,
        removed: removed.clone(),
    };
    output.write(&data, || format!("removed {}\n", removed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_import_flags() {
        let cli = Cli::try_parse_from([
            "pack",
            "-C",
            "/data",
            "regen",
            "--copy",
            "--no-raw-leaves",
            "--max-links",
            "32",
        ])
        .unwrap();

        assert_eq!(cli.workdir, Some(PathBuf::from("/data")));
        let Commands::Regen { path, import } = cli.command else {
            panic!("expected regen");
        };
        assert_eq!(path, None);

        let settings = import.settings();
        assert_eq!(settings.max_links, 32);
        assert!(!settings.raw_leaves);
        assert!(!settings.no_copy);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_default_import_settings() {
        let cli = Cli::try_parse_from(["pack", "make", "--json"]).unwrap();
        assert!(cli.json);
        let Commands::Make { import } = cli.command else {
            panic!("expected make");
        };
        assert_eq!(import.settings(), ImportSettings::default());
    }
}
