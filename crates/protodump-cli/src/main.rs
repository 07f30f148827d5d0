//! protodump - Recover Protocol Buffer definitions from compiled binaries
//!
//! This tool scans binaries for embedded protobuf file descriptors, checks
//! that the recovered set is closed under imports, and writes each one back
//! out as a `.proto` source file.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser};
use protodump_core::{analyze, Collector, RenderedFile, Renderer, Scanner, ScannerConfig};
use std::fs;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, error, info, trace, warn, Level};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// Recover Protocol Buffer definitions from compiled binaries
#[derive(Parser, Debug)]
#[command(name = "protodump")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    input: InputMode,

    /// Output directory for recovered .proto files
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Maximum number of descriptors to collect per binary (0 = unlimited)
    #[arg(long, default_value = "0")]
    max_descriptors: usize,

    /// Dry run - don't write files, just show where they would go
    #[arg(long)]
    dry_run: bool,

    /// Overwrite existing files
    #[arg(long)]
    force: bool,

    /// Only list collected descriptor names
    #[arg(long)]
    list_only: bool,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct InputMode {
    /// Path to a single binary
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Path to a directory of binaries, scanned into one descriptor set
    #[arg(short, long)]
    directory: Option<PathBuf>,
}

/// Where and how rendered files are written
#[derive(Debug)]
struct OutputOptions {
    dir: PathBuf,
    force: bool,
    dry_run: bool,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct WriteStats {
    written: usize,
    refused: usize,
    failed: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .init();

    let scanner = Scanner::with_config(ScannerConfig::new().max_results(cli.max_descriptors));
    let mut collector = Collector::new();

    if let Some(ref file) = cli.input.file {
        scan_single_file(&scanner, file, &mut collector)?;
    } else if let Some(ref directory) = cli.input.directory {
        scan_directory(&scanner, directory, &mut collector)?;
    } else {
        bail!("Either --file or --directory must be specified");
    }

    if collector.is_empty() {
        return Err(protodump_core::Error::NoDescriptorsFound.into());
    }
    info!("Collected {} descriptor(s)", collector.len());

    if cli.list_only {
        for record in collector.records() {
            println!("{}", record.name());
        }
        return Ok(());
    }

    let graph = match analyze(collector.records()) {
        Ok(graph) => graph,
        Err(errors) => {
            for issue in errors.issues() {
                error!("{}", issue);
            }
            return Err(errors).context("Recovered descriptors do not form a closed set");
        }
    };

    let files = Renderer::new(&graph)
        .render_all()
        .context("Failed to render recovered descriptors")?;

    let options = OutputOptions {
        dir: cli.output.clone(),
        force: cli.force,
        dry_run: cli.dry_run,
    };
    let stats = write_files(&options, &files);

    if !cli.dry_run {
        info!(
            "Summary: {} written, {} refused, {} failed",
            stats.written, stats.refused, stats.failed
        );
    }
    if stats.failed > 0 {
        bail!("{} file(s) could not be written", stats.failed);
    }

    Ok(())
}

/// Scan one binary into `collector`
fn scan_single_file(scanner: &Scanner, file: &Path, collector: &mut Collector) -> Result<()> {
    if !file.exists() {
        bail!("Input file does not exist: {}", file.display());
    }
    if !file.is_file() {
        bail!("Input path is not a file: {}", file.display());
    }

    scan_binary(scanner, file, collector)
}

/// Scan every likely binary under `directory` into one shared collector
fn scan_directory(scanner: &Scanner, directory: &Path, collector: &mut Collector) -> Result<()> {
    if !directory.exists() {
        bail!("Directory does not exist: {}", directory.display());
    }
    if !directory.is_dir() {
        bail!("Path is not a directory: {}", directory.display());
    }

    info!("Scanning directory: {}", directory.display());

    let mut binaries_scanned = 0;
    for entry in WalkDir::new(directory)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(false, |n| n.starts_with('.'));
        if hidden {
            continue;
        }

        if !is_likely_binary(path) {
            trace!("Skipping non-binary: {}", path.display());
            continue;
        }

        if let Err(e) = scan_binary(scanner, path, collector) {
            warn!("Error scanning {}: {:#}", path.display(), e);
        }
        binaries_scanned += 1;
    }

    info!("Scanned {} binaries", binaries_scanned);
    Ok(())
}

fn scan_binary(scanner: &Scanner, path: &Path, collector: &mut Collector) -> Result<()> {
    let data =
        fs::read(path).with_context(|| format!("Failed to read input file: {}", path.display()))?;
    trace!("Read {} bytes from {}", data.len(), path.display());

    let before = collector.len();
    let summary = collector.collect_from(scanner, &data);
    debug!(
        "{}: {} candidate(s), {} retried window(s), {} new descriptor(s)",
        path.display(),
        summary.candidates,
        summary.retries,
        collector.len() - before
    );

    Ok(())
}

/// Executable format named by the leading magic bytes, if any
fn executable_format(magic: &[u8; 4]) -> Option<&'static str> {
    match magic {
        [0xCF, 0xFA, 0xED, 0xFE]
        | [0xCE, 0xFA, 0xED, 0xFE]
        | [0xFE, 0xED, 0xFA, 0xCF]
        | [0xFE, 0xED, 0xFA, 0xCE] => Some("Mach-O"),
        [0xCA, 0xFE, 0xBA, 0xBE] => Some("universal Mach-O"),
        [0x7F, b'E', b'L', b'F'] => Some("ELF"),
        [b'M', b'Z', _, _] => Some("PE"),
        _ => None,
    }
}

/// Heuristic to determine if a file is likely a binary executable
fn is_likely_binary(path: &Path) -> bool {
    const SKIP_EXTENSIONS: &[&str] = &[
        "txt", "md", "json", "yaml", "yml", "xml", "html", "css", "js", "ts", "py", "rb", "go",
        "rs", "c", "h", "cpp", "hpp", "java", "proto", "toml", "ini", "cfg", "conf", "log", "csv",
        "svg", "png", "jpg", "jpeg", "gif", "pdf", "zip", "tar", "gz", "bz2", "xz", "7z", "rar",
        "sh", "bash", "zsh", "fish", "ps1", "bat", "cmd",
    ];

    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        if SKIP_EXTENSIONS.contains(&ext.to_lowercase().as_str()) {
            return false;
        }
    }

    let mut magic = [0u8; 4];
    let read = fs::File::open(path).and_then(|mut file| file.read_exact(&mut magic));
    if read.is_ok() {
        if let Some(format) = executable_format(&magic) {
            trace!("{} looks like {}", path.display(), format);
            return true;
        }
    }

    // Unknown format: try it anyway if it has no extension
    path.extension().is_none()
}

/// Resolve `name` under `dir`, refusing anything that could escape it
fn output_path(dir: &Path, name: &str) -> Result<PathBuf> {
    let relative = Path::new(name);
    let escapes = relative.components().any(|component| {
        matches!(
            component,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if name.is_empty() || escapes {
        bail!("Refusing to write outside the output directory: {}", name);
    }
    Ok(dir.join(relative))
}

/// Write every rendered file under `options.dir`; failures are logged and
/// counted, never fatal to the remaining files
fn write_files(options: &OutputOptions, files: &[RenderedFile]) -> WriteStats {
    let mut stats = WriteStats::default();

    for file in files {
        let path = match output_path(&options.dir, &file.name) {
            Ok(path) => path,
            Err(e) => {
                error!("{:#}", e);
                stats.refused += 1;
                continue;
            }
        };

        if options.dry_run {
            println!("Would write: {}", path.display());
            continue;
        }

        match write_proto_file(&path, &file.text, options.force) {
            Ok(()) => {
                println!("Wrote {}", path.display());
                stats.written += 1;
            }
            Err(e) => {
                error!("Failed to write {}: {:#}", path.display(), e);
                stats.failed += 1;
            }
        }
    }

    stats
}

/// Write a proto file to disk, creating parent directories
fn write_proto_file(output_path: &Path, content: &str, force: bool) -> Result<()> {
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    if output_path.exists() && !force {
        bail!(
            "File already exists: {} (use --force to overwrite)",
            output_path.display()
        );
    }

    let mut file = fs::File::create(output_path)
        .with_context(|| format!("Failed to create file: {}", output_path.display()))?;

    file.write_all(content.as_bytes())
        .with_context(|| format!("Failed to write file: {}", output_path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn rendered(name: &str, text: &str) -> RenderedFile {
        RenderedFile {
            name: name.to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_output_path_guard() {
        let dir = Path::new("/out");
        assert_eq!(
            output_path(dir, "a/b.proto").unwrap(),
            PathBuf::from("/out/a/b.proto")
        );
        assert!(output_path(dir, "../../evil.proto").is_err());
        assert!(output_path(dir, "a/../../evil.proto").is_err());
        assert!(output_path(dir, "/etc/evil.proto").is_err());
        assert!(output_path(dir, "").is_err());
    }

    #[test]
    fn test_write_files_creates_directories() {
        let temp_dir = TempDir::new().unwrap();
        let options = OutputOptions {
            dir: temp_dir.path().to_path_buf(),
            force: false,
            dry_run: false,
        };

        let files = [
            rendered("pkg/a.proto", "package pkg;\n"),
            rendered("../escape.proto", "package bad;\n"),
        ];
        let stats = write_files(&options, &files);

        assert_eq!(
            stats,
            WriteStats {
                written: 1,
                refused: 1,
                failed: 0,
            }
        );
        let written = fs::read_to_string(temp_dir.path().join("pkg/a.proto")).unwrap();
        assert_eq!(written, "package pkg;\n");
    }

    #[test]
    fn test_existing_files_need_force() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.proto");
        fs::write(&path, "old").unwrap();

        assert!(write_proto_file(&path, "new", false).is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "old");

        write_proto_file(&path, "new", true).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let options = OutputOptions {
            dir: temp_dir.path().to_path_buf(),
            force: false,
            dry_run: true,
        };

        let stats = write_files(&options, &[rendered("a.proto", "")]);
        assert_eq!(stats, WriteStats::default());
        assert!(!temp_dir.path().join("a.proto").exists());
    }

    #[test]
    fn test_executable_format() {
        assert_eq!(executable_format(&[0x7F, b'E', b'L', b'F']), Some("ELF"));
        assert_eq!(executable_format(&[b'M', b'Z', 0x90, 0x00]), Some("PE"));
        assert_eq!(executable_format(&[0xCF, 0xFA, 0xED, 0xFE]), Some("Mach-O"));
        assert_eq!(executable_format(b"text"), None);
    }

    #[test]
    fn test_is_likely_binary() {
        assert!(!is_likely_binary(Path::new("/tmp/test.txt")));
        assert!(!is_likely_binary(Path::new("/tmp/test.json")));
        assert!(!is_likely_binary(Path::new("/tmp/test.proto")));

        let temp_dir = TempDir::new().unwrap();
        let elf = temp_dir.path().join("server.bin");
        fs::write(&elf, b"\x7fELF\x02\x01\x01\x00").unwrap();
        assert!(is_likely_binary(&elf));
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
