use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context};
use clap::Parser;
use log::{info, warn};
use vpmap::{MalformedLinePolicy, MappingWalker, PageSelection, ScanConfig, ScanSummary, TextRenderer};

/// Print, for every page mapped by a process, where it lives: the physical frame of resident
/// pages, the swap slot of swapped ones.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Process ID to inspect
    pid: i32,

    /// Where procfs is mounted
    #[arg(long, default_value = "/proc")]
    proc_root: PathBuf,

    /// Warn about maps lines that don't parse instead of stopping
    #[arg(long)]
    skip_malformed: bool,

    /// Only resolve the first page of every mapping
    #[arg(long)]
    first_page_only: bool,

    /// Also walk the [vsyscall] mapping.  On most kernels this ends the scan with a short read.
    #[arg(long)]
    include_vsyscall: bool,

    /// Only print resident pages
    #[arg(long)]
    present_only: bool,

    /// Run without root.  Frame numbers will read back as zero.
    #[arg(long)]
    allow_unprivileged: bool,

    /// More logging (-v debug, -vv trace).  RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn config(&self) -> ScanConfig {
        ScanConfig::default()
            .with_proc_root(&self.proc_root)
            .with_malformed_lines(if self.skip_malformed {
                MalformedLinePolicy::Skip
            } else {
                MalformedLinePolicy::Abort
            })
            .with_pages(if self.first_page_only {
                PageSelection::FirstOnly
            } else {
                PageSelection::All
            })
            .with_skip_vsyscall(!self.include_vsyscall)
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn print_summary<W: Write>(out: &mut W, summary: &ScanSummary) -> io::Result<()> {
    writeln!(
        out,
        "{} mappings, {} pages: {} present, {} swapped, {} not present",
        summary.mappings, summary.pages, summary.present, summary.swapped, summary.absent
    )?;
    if summary.skipped_lines > 0 {
        writeln!(out, "{} malformed maps lines skipped", summary.skipped_lines)?;
    }
    out.flush()
}

fn run(args: &Args) -> anyhow::Result<()> {
    if !rustix::process::geteuid().is_root() {
        if !args.allow_unprivileged {
            bail!(
                "{} must run as root to read page frame numbers (pass --allow-unprivileged to scan anyway)",
                env!("CARGO_PKG_NAME")
            );
        }
        warn!("not running as root: PFNs will read back as zero");
    }

    let config = args.config();
    info!("{:?}", config);
    let walker =
        MappingWalker::open(args.pid, config).with_context(|| format!("Failed to open process {}", args.pid))?;

    let stdout = io::stdout();
    let mut renderer = TextRenderer::new(BufWriter::new(stdout.lock())).present_only(args.present_only);
    let scanned = walker.run(&mut renderer);
    renderer.flush().context("Failed to write the report")?;
    let summary = scanned.with_context(|| format!("Scan of process {} failed", args.pid))?;

    print_summary(&mut renderer.into_inner(), &summary).context("Failed to write the summary")
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    if let Err(e) = run(&args) {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}
