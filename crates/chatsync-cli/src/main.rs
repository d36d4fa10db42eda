//! chatsync - Recover conversations from chatsync/*.dat files
//!
//! This tool decodes the desktop client's local chat history files,
//! including edited and removed messages, and prints what it recovers.

use anyhow::{bail, Context, Result};
use chatsync_core::{
    ChunkRef, Decoder, FileReport, FirstWins, LastWins, MessageEvent, ParserConfig,
    ProfileReport, ProfileWalker, ScannerConfig, TagOverride, TagTable, WalkerConfig,
};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, ValueEnum};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, Level};
use tracing_subscriber::EnvFilter;

/// Recover conversations, edits and deletions from chatsync/*.dat files
#[derive(Parser, Debug)]
#[command(name = "chatsync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    input: InputMode,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Add or replace a type table entry, e.g. block:7=opaque:records or field:2=varint
    #[arg(long = "tag", value_name = "ENTRY")]
    tags: Vec<TagOverride>,

    /// Directory levels searched below --directory
    #[arg(long, default_value = "2")]
    walk_depth: usize,

    /// File extensions picked up in directory mode
    #[arg(long = "extension", default_value = "dat")]
    extensions: Vec<String>,

    /// Input has no file header, only a block sequence
    #[arg(long)]
    no_signature: bool,

    /// Which timestamp becomes the conversation time
    #[arg(long, value_enum, default_value = "first")]
    timestamp: TimestampChoice,

    /// Ignore the file header's timestamp, use message timestamps only
    #[arg(long)]
    no_header_timestamp: bool,

    /// Print undecodable messages instead of just counting them
    #[arg(long)]
    show_unknown: bool,

    /// Skip files whose content is identical to one already printed
    #[arg(long)]
    skip_duplicates: bool,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct InputMode {
    /// Path to a single chatsync file
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Path to a profile's chatsync directory
    #[arg(short, long)]
    directory: Option<PathBuf>,
}

/// Output format for decoded files
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Readable conversation transcript
    Text,
    /// Full report as JSON
    Json,
    /// One line per file
    Summary,
}

/// Timestamp policy selection
#[derive(Debug, Clone, Copy, ValueEnum)]
enum TimestampChoice {
    /// First timestamp in stream order
    First,
    /// Last timestamp in stream order
    Last,
}

/// Tracks content digests so identical files print once
#[derive(Default)]
struct DigestRegistry {
    /// Maps digest -> first path seen with it
    seen: HashMap<String, PathBuf>,
    duplicates_skipped: usize,
}

impl DigestRegistry {
    fn new() -> Self {
        Self::default()
    }

    /// Returns false if a file with the same content was already registered
    fn register(&mut self, file: &FileReport) -> bool {
        let Some(digest) = &file.digest else {
            return true;
        };
        match self.seen.get(digest) {
            Some(first) => {
                debug!(
                    "Skipping duplicate: {} (same content as {})",
                    file.path.display(),
                    first.display()
                );
                self.duplicates_skipped += 1;
                false
            }
            None => {
                self.seen.insert(digest.clone(), file.path.clone());
                true
            }
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let walker = build_walker(&cli);
    let stdout = io::stdout();
    let mut out = stdout.lock();

    // Dispatch based on input mode
    if let Some(ref file) = cli.input.file {
        process_single_file(&cli, &walker, file, &mut out)
    } else if let Some(ref directory) = cli.input.directory {
        process_directory(&cli, &walker, directory, &mut out)
    } else {
        bail!("Either --file or --directory must be specified")
    }
}

/// Assemble decoder and walker from the command line
fn build_walker(cli: &Cli) -> ProfileWalker {
    let tags = Arc::new(
        cli.tags
            .iter()
            .fold(TagTable::default(), |table, entry| table.with_override(*entry)),
    );

    let mut scanner = ScannerConfig::new().tags(Arc::clone(&tags));
    if cli.no_signature {
        scanner = scanner.headerless();
    }

    let parser = ParserConfig::new()
        .tags(tags)
        .header_timestamp(!cli.no_header_timestamp);
    let parser = match cli.timestamp {
        TimestampChoice::First => parser.timestamp_policy(FirstWins),
        TimestampChoice::Last => parser.timestamp_policy(LastWins),
    };

    ProfileWalker::new()
        .with_decoder(Decoder::from_configs(scanner, parser))
        .with_config(
            WalkerConfig::new()
                .extensions(cli.extensions.iter().cloned())
                .max_depth(cli.walk_depth),
        )
}

/// Decode and print a single file
fn process_single_file(
    cli: &Cli,
    walker: &ProfileWalker,
    file: &Path,
    out: &mut impl Write,
) -> Result<()> {
    if !file.exists() {
        bail!("Input file does not exist: {}", file.display());
    }
    if !file.is_file() {
        bail!("Input path is not a file: {}", file.display());
    }

    let report = walker.decode_one(file);
    match cli.format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, &report)
                .context("Failed to serialize report")?;
            writeln!(out)?;
        }
        OutputFormat::Summary => write_summary_line(out, &report)?,
        OutputFormat::Text => write_transcript(out, &report, cli.show_unknown)?,
    }
    Ok(())
}

/// Decode and print every file of a directory
fn process_directory(
    cli: &Cli,
    walker: &ProfileWalker,
    directory: &Path,
    out: &mut impl Write,
) -> Result<()> {
    if !directory.exists() {
        bail!("Directory does not exist: {}", directory.display());
    }
    if !directory.is_dir() {
        bail!("Path is not a directory: {}", directory.display());
    }

    let mut report = walker
        .walk(directory)
        .with_context(|| format!("Failed to walk directory: {}", directory.display()))?;

    if cli.skip_duplicates {
        let mut registry = DigestRegistry::new();
        report.files.retain(|file| registry.register(file));
        info!("{} duplicate files skipped", registry.duplicates_skipped);
    }

    write_report(out, &report, cli.format, cli.show_unknown)
}

fn write_report(
    out: &mut impl Write,
    report: &ProfileReport,
    format: OutputFormat,
    show_unknown: bool,
) -> Result<()> {
    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, report)
                .context("Failed to serialize report")?;
            writeln!(out)?;
        }
        OutputFormat::Summary => {
            for file in &report.files {
                write_summary_line(out, file)?;
            }
        }
        OutputFormat::Text => {
            for file in &report.files {
                write_transcript(out, file, show_unknown)?;
                writeln!(out)?;
            }
        }
    }
    Ok(())
}

fn format_time(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".repeat(19))
}

/// `status  participants  events  warnings  path`
fn write_summary_line(out: &mut impl Write, file: &FileReport) -> io::Result<()> {
    writeln!(
        out,
        "{:<10} {:>3} {:>5} {:>3}  {}",
        file.status,
        file.participants().len(),
        file.conversation().len(),
        file.warnings.len(),
        file.path.display()
    )
}

fn write_event(
    out: &mut impl Write,
    event: &MessageEvent,
    source: ChunkRef,
    show_unknown: bool,
) -> io::Result<()> {
    match event {
        MessageEvent::Posted {
            author,
            text,
            local_timestamp,
        } => writeln!(out, "  [{}] {}: {}", format_time(*local_timestamp), author, text),
        MessageEvent::Edited {
            author,
            new_text,
            local_timestamp,
        } => writeln!(
            out,
            "  [{}] {} (edited): {}",
            format_time(*local_timestamp),
            author,
            new_text
        ),
        MessageEvent::Removed {
            author,
            local_timestamp,
        } => writeln!(
            out,
            "  [{}] {} removed a message",
            format_time(*local_timestamp),
            author
        ),
        MessageEvent::Unknown { raw } if show_unknown => writeln!(
            out,
            "  <undecoded message at offset {}, {} bytes>",
            source.offset,
            raw.len()
        ),
        MessageEvent::Unknown { .. } => Ok(()),
    }
}

fn write_transcript(out: &mut impl Write, file: &FileReport, show_unknown: bool) -> io::Result<()> {
    writeln!(out, "== {} ({})", file.path.display(), file.status)?;
    if let Some(error) = &file.error {
        writeln!(out, "  error: {}", error)?;
        return Ok(());
    }

    writeln!(out, "  started: {}", format_time(file.timestamp()))?;
    writeln!(out, "  participants: {}", file.participants().join(", "))?;
    for (event, source) in file.model.events_with_sources() {
        write_event(out, event, source, show_unknown)?;
    }

    let unknown = file.model.unknown_count();
    if unknown > 0 && !show_unknown {
        writeln!(out, "  ({} undecodable messages, use --show-unknown)", unknown)?;
    }
    for stop in &file.stops {
        writeln!(out, "  note: {}", stop)?;
    }
    for warning in &file.warnings {
        writeln!(out, "  warning: {}", warning)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatsync_core::{ChatsyncWriter, ChunkKind, DecodeStatus, RawChunk};
    use std::fs;
    use tempfile::TempDir;

    fn sample() -> Vec<u8> {
        let mut writer = ChatsyncWriter::new();
        writer
            .timestamp(DateTime::from_timestamp(1_420_070_400, 0).unwrap())
            .participants(["alice", "bob"])
            .posted("alice", "hi", DateTime::from_timestamp(1_420_070_460, 0))
            .edited("alice", "hi there", None)
            .removed("bob", None);
        writer.event(&MessageEvent::Unknown {
            raw: RawChunk::new(ChunkKind::Message, 0, 0, b"A\x00".to_vec()),
        });
        writer.finish().unwrap()
    }

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("chatsync").chain(args.iter().copied()))
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_tag_override_argument() {
        let cli = cli(&[
            "--file",
            "x.dat",
            "--tag",
            "block:7=opaque:records",
            "--tag",
            "field:0x02=varint",
        ]);
        assert_eq!(cli.tags.len(), 2);
        assert!(matches!(cli.tags[0], TagOverride::Block { tag: 7, .. }));
        assert!(matches!(cli.tags[1], TagOverride::Field { tag: 2, .. }));
        assert!(!cli.no_header_timestamp);
    }

    #[test]
    fn test_header_timestamp_can_be_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.dat");
        fs::write(&path, sample()).unwrap();

        let cli = cli(&["--file", path.to_str().unwrap(), "--no-header-timestamp"]);
        let walker = build_walker(&cli);
        let mut out = Vec::new();
        process_single_file(&cli, &walker, &path, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("started: 2015-01-01 00:01:00"));
    }

    #[test]
    fn test_transcript_output() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.dat");
        fs::write(&path, sample()).unwrap();

        let cli = cli(&["--file", path.to_str().unwrap()]);
        let walker = build_walker(&cli);
        let mut out = Vec::new();
        process_single_file(&cli, &walker, &path, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("(complete)"));
        assert!(text.contains("started: 2015-01-01 00:00:00"));
        assert!(text.contains("participants: alice, bob"));
        assert!(text.contains("[2015-01-01 00:01:00] alice: hi"));
        assert!(text.contains("alice (edited): hi there"));
        assert!(text.contains("bob removed a message"));
        assert!(text.contains("1 undecodable messages"));
    }

    #[test]
    fn test_show_unknown() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.dat");
        fs::write(&path, sample()).unwrap();

        let cli = cli(&["--file", path.to_str().unwrap(), "--show-unknown"]);
        let walker = build_walker(&cli);
        let mut out = Vec::new();
        process_single_file(&cli, &walker, &path, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("<undecoded message at offset"));
    }

    #[test]
    fn test_directory_summary_skips_duplicates() {
        let dir = TempDir::new().unwrap();
        for bucket in ["a", "b"] {
            let path = dir.path().join(bucket);
            fs::create_dir(&path).unwrap();
            fs::write(path.join("conv.dat"), sample()).unwrap();
        }

        let cli = cli(&[
            "--directory",
            dir.path().to_str().unwrap(),
            "--format",
            "summary",
            "--skip-duplicates",
        ]);
        let walker = build_walker(&cli);
        let mut out = Vec::new();
        process_directory(&cli, &walker, dir.path(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert_eq!(text.lines().count(), 1);
        assert!(text.starts_with("complete"));
    }

    #[test]
    fn test_json_output() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.dat"), sample()).unwrap();

        let cli = cli(&["--directory", dir.path().to_str().unwrap(), "--format", "json"]);
        let walker = build_walker(&cli);
        let mut out = Vec::new();
        process_directory(&cli, &walker, dir.path(), &mut out).unwrap();

        let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(json["files"][0]["status"], "complete");
        assert_eq!(json["files"][0]["conversation"][2]["type"], "removed");
    }

    #[test]
    fn test_missing_directory_is_error() {
        let cli = cli(&["--directory", "/no/such/dir"]);
        let walker = build_walker(&cli);
        let mut out = Vec::new();
        assert!(process_directory(&cli, &walker, Path::new("/no/such/dir"), &mut out).is_err());
    }

    #[test]
    fn test_registry_keeps_unreadable_files() {
        let mut registry = DigestRegistry::new();
        let report = FileReport {
            path: PathBuf::from("/x.dat"),
            digest: None,
            status: DecodeStatus::Unreadable,
            model: Default::default(),
            stops: Vec::new(),
            warnings: Vec::new(),
            error: Some("gone".into()),
        };
        assert!(registry.register(&report));
        assert!(registry.register(&report));
        assert_eq!(registry.duplicates_skipped, 0);
    }
}
