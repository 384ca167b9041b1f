//! Main entry point for the spanzip CLI application.
//!
//! `pack` writes (optionally split) archives from local files; `list` and
//! `extract` read archives from the local filesystem or from HTTP URLs.

use anyhow::{Context, Result};
use clap::Parser;
use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tracing_subscriber::EnvFilter;

use spanzip::cli::{Command, ExtractArgs, ListArgs, PackArgs};
use spanzip::context::{UnpackStreamContext, VolumeRead};
use spanzip::{ArchiveFileContext, ArchiveProgress, Cli, Overwrite, ProgressKind, ZipEngine};

fn main() -> Result<()> {
    let cli = Cli::parse_from(expand_level_flags(std::env::args_os()));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.default_log_filter())),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    match &cli.command {
        Command::Pack(args) => pack(args),
        Command::List(args) => list(args),
        Command::Extract(args) => extract(args),
    }
}

/// Accept zip-style `-0` ... `-9` after `pack` as `--level N`.
fn expand_level_flags(args: impl IntoIterator<Item = OsString>) -> Vec<OsString> {
    let args: Vec<OsString> = args.into_iter().collect();
    if args.get(1).and_then(|a| a.to_str()) != Some("pack") {
        return args;
    }
    args.into_iter()
        .map(|arg| match arg.to_str() {
            Some(flag) if flag.len() == 2 && flag.starts_with('-') && flag.as_bytes()[1].is_ascii_digit() => {
                OsString::from(format!("--level={}", &flag[1..]))
            }
            _ => arg,
        })
        .collect()
}

fn pack(args: &PackArgs) -> Result<()> {
    let base_dir = args.directory.as_deref().unwrap_or(".");
    let mut files = Vec::new();
    for name in &args.files {
        collect_files(Path::new(base_dir), &entry_name(name), &mut files)
            .with_context(|| format!("cannot read {name}"))?;
    }

    let mut engine = ZipEngine::new().with_compression_level(args.compression_level());
    if let Some(comment) = &args.comment {
        engine = engine.with_comment(comment.as_str());
    }
    if !args.is_quiet() {
        engine.set_progress_handler(|p: &ArchiveProgress| match p.kind {
            ProgressKind::StartFile => println!("  adding: {}", p.current_file_name),
            ProgressKind::StartArchive if p.current_volume > 0 => {
                println!("  starting volume {}", p.current_volume + 1)
            }
            _ => {}
        });
    }

    let mut context = ArchiveFileContext::new(args.archive.as_str())
        .with_base_dir(base_dir)
        .with_force_zip64(args.zip64);
    let summary = engine
        .pack(&mut context, files.as_slice(), args.split_size.unwrap_or(0))
        .with_context(|| format!("failed to create {}", args.archive))?;

    if !args.is_quiet() {
        println!(
            "{} files, {} in {} volume(s){}",
            summary.files,
            format_size(summary.total_bytes),
            summary.volumes,
            if summary.zip64 { " (zip64)" } else { "" }
        );
    }
    Ok(())
}

/// Entry name for a command-line path: `/` separators, no leading `./`.
fn entry_name(path: &str) -> String {
    let name = path.replace('\\', "/");
    let name = name.trim_start_matches("./");
    name.trim_end_matches('/').to_string()
}

/// Add `name` to `files`, descending into directories in sorted order.
fn collect_files(base: &Path, name: &str, files: &mut Vec<String>) -> io::Result<()> {
    let path = base.join(name);
    if !path.is_dir() {
        files.push(name.to_string());
        return Ok(());
    }
    let mut children: Vec<String> = fs::read_dir(&path)?
        .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect::<io::Result<_>>()?;
    children.sort();
    for child in children {
        let child = if name.is_empty() || name == "." {
            child
        } else {
            format!("{name}/{child}")
        };
        collect_files(base, &child, files)?;
    }
    Ok(())
}

/// List files in the archive.
///
/// Supports two output formats:
/// - Simple format: just file names, one per line
/// - Verbose format (`-v`): table with size, compression ratio and timestamps
fn list(args: &ListArgs) -> Result<()> {
    let engine = ZipEngine::new();
    let mut context = ArchiveFileContext::new(args.archive.as_str());
    let entries = engine
        .list(&mut context)
        .with_context(|| format!("cannot list {}", args.archive))?;

    if args.verbose {
        println!(
            "{:>10}  {:>10}  {:>5}  {:>10}  {:>5}  Name",
            "Length", "Size", "Cmpr", "Date", "Time"
        );
        println!("{}", "-".repeat(70));
    }

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in &entries {
        if !args.verbose {
            println!("{}", entry.name);
            continue;
        }

        let timestamp = entry
            .last_write
            .map(|t| t.format("%Y-%m-%d  %H:%M").to_string())
            .unwrap_or_else(|| format!("{:>10}  {:>5}", "-", "-"));
        println!(
            "{:>10}  {:>10}  {}  {}  {}{}",
            entry.length,
            entry.compressed_length,
            ratio(entry.compressed_length, entry.length),
            timestamp,
            entry.name,
            if entry.volume > 0 {
                format!("  [volume {}]", entry.volume)
            } else {
                String::new()
            }
        );

        // Totals exclude directories
        if !entry.is_directory() {
            total_uncompressed += entry.length;
            total_compressed += entry.compressed_length;
            file_count += 1;
        }
    }

    if args.verbose {
        println!("{}", "-".repeat(70));
        println!(
            "{:>10}  {:>10}  {}  {:>17}  {} files",
            total_uncompressed,
            total_compressed,
            ratio(total_compressed, total_uncompressed),
            "",
            file_count
        );
    }

    if context.is_remote() {
        eprintln!(
            "\nTotal bytes transferred: {}",
            format_size(context.transferred_bytes())
        );
    }
    Ok(())
}

/// Space saved by compression, as a right-aligned percentage.
fn ratio(compressed: u64, uncompressed: u64) -> String {
    if uncompressed > 0 && compressed <= uncompressed {
        format!("{:>4}%", 100 - (compressed * 100 / uncompressed))
    } else {
        "  0%".to_string()
    }
}

fn extract(args: &ExtractArgs) -> Result<()> {
    let engine = ZipEngine::new();
    let selected = |name: &str| is_selected(name, &args.files, &args.exclude);

    if args.pipe {
        let mut context = PipeContext {
            archive: ArchiveFileContext::new(args.archive.as_str()),
            show_names: false,
        };
        let matching = engine
            .list(&mut context.archive)
            .with_context(|| format!("cannot read {}", args.archive))?
            .iter()
            .filter(|e| !e.is_directory() && selected(&e.name))
            .count();
        context.show_names = matching > 1;
        engine
            .unpack(&mut context, Some(&selected))
            .with_context(|| format!("failed to extract from {}", args.archive))?;
        return Ok(());
    }

    let overwrite = if args.overwrite {
        Overwrite::Always
    } else if args.never_overwrite {
        Overwrite::Never
    } else {
        Overwrite::Notice
    };
    let mut context = ArchiveFileContext::new(args.archive.as_str())
        .with_destination(args.extract_dir.as_deref().unwrap_or("."))
        .with_overwrite(overwrite)
        .with_junk_paths(args.junk_paths);

    if !args.is_quiet() {
        engine.set_progress_handler(|p: &ArchiveProgress| {
            if p.kind == ProgressKind::StartFile {
                println!("  extracting: {}", p.current_file_name);
            }
        });
    }

    let summary = engine
        .unpack(&mut context, Some(&selected))
        .with_context(|| format!("failed to extract from {}", args.archive))?;

    if !args.is_very_quiet() && summary.extracted == 0 && !args.files.is_empty() {
        eprintln!("No files matched");
    }
    if context.is_remote() && !args.is_quiet() {
        eprintln!(
            "\nTotal bytes transferred: {}",
            format_size(context.transferred_bytes())
        );
    }
    Ok(())
}

/// Decide whether an entry is extracted.
///
/// - If specific files are requested, the entry must match one of them:
///   by glob when the pattern has wildcards, else by full name or basename
/// - Entries matching an `-x` pattern are excluded
fn is_selected(name: &str, files: &[String], exclude: &[String]) -> bool {
    if !files.is_empty() {
        let matches = files.iter().any(|f| {
            if has_glob_chars(f) {
                glob_match(f, name)
            } else {
                let basename = name.rsplit('/').next().unwrap_or(name);
                name == f || basename == f
            }
        });
        if !matches {
            return false;
        }
    }

    !exclude
        .iter()
        .any(|x| name.contains(x.as_str()) || glob_match(x, name))
}

/// Sends every extracted entry to stdout; archive volumes come from the
/// wrapped file context.
struct PipeContext {
    archive: ArchiveFileContext,
    /// Print a marker before each entry when more than one is extracted
    show_names: bool,
}

impl UnpackStreamContext for PipeContext {
    fn open_archive_read(&mut self, volume: u32) -> io::Result<Option<Box<dyn VolumeRead>>> {
        self.archive.open_archive_read(volume)
    }

    fn close_archive_read(&mut self, volume: u32, stream: Box<dyn VolumeRead>) -> io::Result<()> {
        self.archive.close_archive_read(volume, stream)
    }

    fn open_file_write(
        &mut self,
        path: &str,
        _length: u64,
        _last_write: Option<chrono::NaiveDateTime>,
    ) -> io::Result<Option<Box<dyn Write>>> {
        let mut stdout = io::stdout();
        if self.show_names {
            writeln!(stdout, "--- {path} ---")?;
        }
        Ok(Some(Box::new(stdout)))
    }

    fn close_file_write(
        &mut self,
        _path: &str,
        mut stream: Box<dyn Write>,
        _attributes: u32,
        _last_write: Option<chrono::NaiveDateTime>,
    ) -> io::Result<()> {
        stream.flush()
    }
}

fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// Simple glob pattern matching supporting `*` and `?` wildcards.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern_chars: Vec<char> = pattern.chars().collect();
    let text_chars: Vec<char> = text.chars().collect();

    fn do_match(pattern: &[char], text: &[char]) -> bool {
        match (pattern.first(), text.first()) {
            (None, None) => true,
            // Star matches zero characters, or one more and stays
            (Some('*'), _) => {
                do_match(&pattern[1..], text) || (!text.is_empty() && do_match(pattern, &text[1..]))
            }
            (Some('?'), Some(_)) => do_match(&pattern[1..], &text[1..]),
            (Some(p), Some(t)) if *p == *t => do_match(&pattern[1..], &text[1..]),
            _ => false,
        }
    }

    do_match(&pattern_chars, &text_chars)
}

/// Format a byte size into a human-readable string.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*.txt", "readme.txt"));
        assert!(glob_match("file?.dat", "file1.dat"));
        assert!(glob_match("docs/*", "docs/a/b.md"));
        assert!(!glob_match("*.txt", "readme.md"));
    }

    #[test]
    fn test_selection() {
        let files = vec!["b.txt".to_string()];
        assert!(is_selected("dir/b.txt", &files, &[]));
        assert!(!is_selected("dir/c.txt", &files, &[]));
        let exclude = vec!["*.log".to_string()];
        assert!(is_selected("a.txt", &[], &exclude));
        assert!(!is_selected("logs/run.log", &[], &exclude));
    }

    #[test]
    fn test_level_flags_only_for_pack() {
        let args = |list: &[&str]| list.iter().map(OsString::from).collect::<Vec<_>>();
        assert_eq!(
            expand_level_flags(args(&["spanzip", "pack", "-9", "a.zip", "x"])),
            args(&["spanzip", "pack", "--level=9", "a.zip", "x"])
        );
        assert_eq!(
            expand_level_flags(args(&["spanzip", "extract", "a.zip", "-x", "-1"])),
            args(&["spanzip", "extract", "a.zip", "-x", "-1"])
        );
    }

    #[test]
    fn test_entry_names() {
        assert_eq!(entry_name("./docs/"), "docs");
        assert_eq!(entry_name("a\\b.txt"), "a/b.txt");
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(500), "500 bytes");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(1048576), "1.00 MB");
    }
}
