use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use rayon::prelude::*;
use runefmt::cst::Node;
use runefmt::{Context, Flags};
use similar::TextDiff;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Parser, Debug)]
#[command(name = "runefmt", version, about = "Opinionated formatter for Julia-style source")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Verbose logging (repeat for more detail)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Fmt {
        /// Paths (files or directories) to format (defaults to current dir)
        paths: Vec<PathBuf>,
        /// Write the formatted content back to the files
        #[arg(long)]
        write: bool,
        /// Check if files are formatted; non-zero exit if changes needed
        #[arg(long)]
        check: bool,
        /// Print a unified diff instead of the formatted text
        #[arg(long)]
        diff: bool,
        /// Suppress per-file headers
        #[arg(short, long)]
        quiet: bool,
        /// Enable extra engine invariant checks
        #[arg(long)]
        assert: bool,
        /// Debug mode (implies --assert and verbose engine checks)
        #[arg(long)]
        debug: bool,
    },
    Debug {
        /// File whose syntax tree to dump
        file: PathBuf,
    },
}

#[derive(Clone, Copy, Debug)]
enum Mode {
    Stdout,
    Write,
    Check,
    Diff,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Commands::Fmt {
            paths,
            write,
            check,
            diff,
            quiet,
            assert,
            debug,
        } => {
            if [write, check, diff].iter().filter(|b| **b).count() > 1 {
                bail!("--write, --check, and --diff are mutually exclusive");
            }
            let mode = if write {
                Mode::Write
            } else if check {
                Mode::Check
            } else if diff {
                Mode::Diff
            } else {
                Mode::Stdout
            };
            let flags = Flags {
                quiet,
                verbose: cli.verbose > 0,
                assert,
                debug,
                check,
                diff,
            };
            let targets = if paths.is_empty() {
                vec![PathBuf::from(".")]
            } else {
                paths
            };
            let mut files = Vec::new();
            for p in targets {
                collect_source_files(&p, &mut files);
            }

            let results: Vec<_> = files
                .par_iter()
                .map(|path| process_file(path, mode, flags))
                .collect();
            let mut had_change = false;
            for r in results {
                match r {
                    Ok(changed) => had_change |= changed,
                    Err(e) => eprintln!("{}", e),
                }
            }
            if matches!(mode, Mode::Check) && had_change {
                std::process::exit(1);
            }
        }
        Commands::Debug { file } => {
            debug_file(&file)?;
        }
    }
    Ok(())
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn debug_file(path: &Path) -> Result<()> {
    let content = fs::read_to_string(path)?;
    let tree = runefmt::parser::parse(&content)?;
    println!("===== {} =====", path.display());
    print_tree(&tree, &content, 0, 0);
    Ok(())
}

fn print_tree(node: &Node, source: &str, offset: usize, depth: usize) {
    let indent = "  ".repeat(depth);
    let end = offset + node.span();

    if node.is_leaf() {
        let text = &source[offset..end];
        println!(
            "{}{:?}[{:?}]@{}..{} {:?}",
            indent,
            node.kind(),
            node.flags(),
            offset,
            end,
            text
        );
    } else {
        println!("{}{:?}@{}..{}", indent, node.kind(), offset, end);
        let mut kid_offset = offset;
        for kid in node.verified_kids() {
            print_tree(kid, source, kid_offset, depth + 1);
            kid_offset += kid.span();
        }
    }
}

fn collect_source_files(path: &Path, out: &mut Vec<PathBuf>) {
    if path.is_file() {
        if path.extension().and_then(|s| s.to_str()) == Some("jl") {
            out.push(path.to_path_buf());
        }
        return;
    }
    for entry in WalkDir::new(path).into_iter().filter_map(|e| e.ok()) {
        let p = entry.path();
        if p.is_file() && p.extension().and_then(|s| s.to_str()) == Some("jl") {
            out.push(p.to_path_buf());
        }
    }
}

fn process_file(path: &Path, mode: Mode, flags: Flags) -> Result<bool> {
    let content = fs::read_to_string(path)?;
    let mut ctx = Context::with_flags(&content, flags)?;
    ctx.format()?;
    let formatted = ctx.into_output()?;
    let changed = formatted != content;
    match mode {
        Mode::Stdout => {
            if !flags.quiet {
                println!("===== {} =====", path.display());
            }
            print!("{}", formatted);
        }
        Mode::Write => {
            if changed {
                fs::write(path, formatted)?;
            }
        }
        Mode::Check => {
            if changed && !flags.quiet {
                eprintln!("would reformat {}", path.display());
            }
        }
        Mode::Diff => {
            if changed {
                let diff = TextDiff::from_lines(&content, &formatted);
                print!(
                    "{}",
                    diff.unified_diff().header(
                        &format!("a/{}", path.display()),
                        &format!("b/{}", path.display())
                    )
                );
            }
        }
    }
    Ok(changed)
}
