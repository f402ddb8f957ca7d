//! Command-line front end over `heapscope-core`.
//!
//! Loads a dump (plus, optionally, the executable that produced it for real
//! field names), then prints a heap summary and whichever views were asked
//! for. Exits non-zero on any load failure; the core never returns a
//! partially loaded dump.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use heapscope_core::analysis::{self, DominatorTree, ReferrerIndex};
use heapscope_core::Dump;

#[derive(Parser)]
#[command(name = "heapscope", version, about = "Inspect Go heap dumps")]
struct Args
{
    /// Heap dump file to load
    dump: PathBuf,

    /// Executable that produced the dump; enables DWARF-derived names
    executable: Option<PathBuf>,

    /// How many histogram rows to print
    #[arg(long, default_value_t = 20)]
    top: usize,

    /// Show one object (heap address, hex) instead of the histogram
    #[arg(long, value_parser = parse_hex_addr)]
    object: Option<u64>,

    /// List goroutines with their scheduling state
    #[arg(long)]
    goroutines: bool,
}

fn parse_hex_addr(s: &str) -> Result<u64, String>
{
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).map_err(|e| format!("bad hex address: {e}"))
}

fn main() -> ExitCode
{
    if let Err(e) = heapscope_utils::init_logging() {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("heapscope: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> heapscope_core::Result<()>
{
    let dump = Dump::load(&args.dump, args.executable.as_deref())?;
    print_summary(&dump);

    if args.goroutines {
        print_goroutines(&dump);
    }

    match args.object {
        Some(addr) => print_object(&dump, addr)?,
        None => print_histogram(&dump, args.top),
    }
    Ok(())
}

fn print_summary(dump: &Dump)
{
    println!("heap {:#x}..{:#x}, {} objects", dump.heap_start, dump.heap_end, dump.num_objects());
    if let Some(stats) = &dump.memstats {
        println!(
            "alloc {} bytes, sys {} bytes, {} collections",
            stats.heap_alloc, stats.heap_sys, stats.num_gc
        );
    }
    println!(
        "{} goroutines, {} stack frames, {} other roots",
        dump.goroutines.len(),
        dump.frames.len(),
        dump.other_roots.len()
    );
}

fn print_histogram(dump: &Dump, top: usize)
{
    let histo = analysis::histogram_by_type(dump);
    println!("\n{:>12} {:>10}  type", "bytes", "count");
    for entry in histo.iter().take(top) {
        let ft = &dump.full_types[entry.full_type];
        println!("{:>12} {:>10}  {}", entry.bytes, entry.count, ft.name);
    }
    if histo.len() > top {
        println!("... {} more types", histo.len() - top);
    }
}

fn print_goroutines(dump: &Dump)
{
    println!("\ngoroutines:");
    for g in &dump.goroutines {
        println!("  goroutine {} [{}] addr {:#x}", g.goid, g.status_name(), g.addr);
    }
}

fn print_object(dump: &Dump, addr: u64) -> heapscope_core::Result<()>
{
    let x = dump.find_obj(addr);
    if x.is_nil() {
        eprintln!("no object contains address {addr:#x}");
        return Ok(());
    }
    let ft = dump.full_type(x);
    println!("\nobject {:#x}: {} ({} bytes)", dump.addr(x), ft.name, dump.size(x));

    println!("edges:");
    for e in dump.edges(x)? {
        let field = if e.field_name.is_empty() {
            format!("+{}", e.from_offset)
        } else {
            e.field_name.clone()
        };
        println!("  {field} -> {:#x}+{}", dump.addr(e.to), e.to_offset);
    }

    let refs = ReferrerIndex::build(dump)?;
    println!("referrers:");
    for src in analysis::referrers::referrer_sources(dump, &refs, x) {
        match src {
            analysis::ReferrerSource::Object(id) => println!("  object {:#x}", dump.addr(id)),
            other => println!("  {other}"),
        }
    }

    let dom = DominatorTree::build(dump, &refs)?;
    println!("retained: {} bytes", dom.retained_size(x));
    println!("reachable: {} bytes", analysis::reachable_bytes(dump, x)?);
    Ok(())
}
