use clap::{Args, Parser, Subcommand};

use crate::zip::CompressionLevel;

#[derive(Parser, Debug)]
#[command(name = "spanzip")]
#[command(version)]
#[command(about = "A ZIP packer/unpacker with split archives and HTTP URL support", long_about = None)]
#[command(after_help = "Examples:\n  \
  spanzip pack backup.zip -C src a.txt b.txt     pack two files from src/\n  \
  spanzip pack -s 100m big.zip disk.img          split into 100 MiB volumes (big.z01, ...)\n  \
  spanzip extract data1.zip -x joe               extract all files except joe\n  \
  spanzip extract -p foo.zip | more              send contents of foo.zip via pipe into more\n  \
  spanzip list -v https://example.com/archive.zip   list files from remote ZIP")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create an archive
    Pack(PackArgs),
    /// List archive contents
    List(ListArgs),
    /// Extract files from an archive
    Extract(ExtractArgs),
}

#[derive(Args, Debug)]
pub struct PackArgs {
    /// Archive to create; further volumes are named .z01, .z02, ...
    #[arg(value_name = "ARCHIVE")]
    pub archive: String,

    /// Files to add, relative to -C
    #[arg(value_name = "FILES", required = true)]
    pub files: Vec<String>,

    /// Read files relative to DIR
    #[arg(short = 'C', value_name = "DIR")]
    pub directory: Option<String>,

    /// Split into volumes of at most SIZE bytes (k, m, g suffixes)
    #[arg(short = 's', value_name = "SIZE", value_parser = parse_size)]
    pub split_size: Option<u64>,

    /// Compression level, 0 (store) to 9 (best)
    #[arg(short = 'l', long = "level", value_name = "N", value_parser = clap::value_parser!(u32).range(0..=9))]
    pub level: Option<u32>,

    /// Always write ZIP64 headers and records
    #[arg(long)]
    pub zip64: bool,

    /// Archive comment
    #[arg(short = 'z', value_name = "COMMENT")]
    pub comment: Option<String>,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// ZIP file path or HTTP URL
    #[arg(value_name = "ARCHIVE")]
    pub archive: String,

    /// List verbosely
    #[arg(short = 'v')]
    pub verbose: bool,
}

#[derive(Args, Debug)]
pub struct ExtractArgs {
    /// ZIP file path or HTTP URL
    #[arg(value_name = "ARCHIVE")]
    pub archive: String,

    /// Files to extract (default: all)
    #[arg(value_name = "FILES")]
    pub files: Vec<String>,

    /// Extract files to pipe, no messages
    #[arg(short = 'p')]
    pub pipe: bool,

    /// Extract files into exdir
    #[arg(short = 'd', value_name = "DIR")]
    pub extract_dir: Option<String>,

    /// Exclude files that follow
    #[arg(short = 'x', value_name = "FILE", num_args = 1..)]
    pub exclude: Vec<String>,

    /// Never overwrite existing files
    #[arg(short = 'n')]
    pub never_overwrite: bool,

    /// Overwrite files WITHOUT prompting
    #[arg(short = 'o')]
    pub overwrite: bool,

    /// Junk paths (do not make directories)
    #[arg(short = 'j')]
    pub junk_paths: bool,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,
}

impl Cli {
    /// Log filter used when RUST_LOG is not set.
    pub fn default_log_filter(&self) -> &'static str {
        let quiet = match &self.command {
            Command::Pack(args) => args.quiet,
            Command::Extract(args) => args.quiet,
            Command::List(_) => 0,
        };
        if quiet > 1 { "error" } else { "warn" }
    }
}

impl PackArgs {
    pub fn compression_level(&self) -> CompressionLevel {
        match self.level {
            Some(0) => CompressionLevel::None,
            Some(level) => CompressionLevel::Level(level),
            None => CompressionLevel::Normal,
        }
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet > 0
    }
}

impl ExtractArgs {
    pub fn is_quiet(&self) -> bool {
        self.quiet > 0 || self.pipe
    }

    pub fn is_very_quiet(&self) -> bool {
        self.quiet > 1
    }
}

/// Parse a byte count with an optional `k`, `m` or `g` suffix (powers of 1024).
pub fn parse_size(value: &str) -> Result<u64, String> {
    let value = value.trim();
    let (digits, multiplier) = match value.char_indices().last() {
        Some((i, 'k' | 'K')) => (&value[..i], 1u64 << 10),
        Some((i, 'm' | 'M')) => (&value[..i], 1 << 20),
        Some((i, 'g' | 'G')) => (&value[..i], 1 << 30),
        _ => (value, 1),
    };
    let count: u64 = digits
        .parse()
        .map_err(|_| format!("invalid size: {value}"))?;
    count
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size too large: {value}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("4096"), Ok(4096));
        assert_eq!(parse_size("64k"), Ok(64 * 1024));
        assert_eq!(parse_size("100M"), Ok(100 * 1024 * 1024));
        assert_eq!(parse_size("2g"), Ok(2 << 30));
        assert!(parse_size("12x").is_err());
        assert!(parse_size("k").is_err());
    }

    #[test]
    fn test_pack_arguments() {
        let cli = Cli::parse_from([
            "spanzip", "pack", "out.zip", "a", "b", "-s", "1m", "--level", "0", "--zip64",
        ]);
        let Command::Pack(args) = cli.command else {
            panic!("expected pack");
        };
        assert_eq!(args.files, ["a", "b"]);
        assert_eq!(args.split_size, Some(1 << 20));
        assert_eq!(args.compression_level(), CompressionLevel::None);
        assert!(args.zip64);
    }

    #[test]
    fn test_extract_arguments() {
        let cli = Cli::parse_from(["spanzip", "extract", "in.zip", "-x", "*.log", "-d", "out", "-o"]);
        let Command::Extract(args) = cli.command else {
            panic!("expected extract");
        };
        assert_eq!(args.exclude, ["*.log"]);
        assert_eq!(args.extract_dir.as_deref(), Some("out"));
        assert!(args.overwrite && !args.is_quiet());
    }
}
