use std::io::{self, Write};

use anyhow::*;
use log::*;
use structopt::*;

use nestzip::*;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "nestcat",
    about = "Prints a file from inside (nested) ZIP archives, e.g. outer.jar!/lib/inner.jar!/hello.txt"
)]
struct Opt {
    /// Pass multiple times for additional verbosity (info, debug, trace)
    #[structopt(short, long, parse(from_occurrences))]
    verbosity: usize,

    /// Print the name of the matching entry instead of its contents.
    #[structopt(short, long)]
    name_only: bool,

    /// The largest nested archive to buffer in memory, in bytes
    #[structopt(long)]
    max_size: Option<u64>,

    #[structopt(name("REFERENCE"))]
    references: Vec<String>,
}

fn main() -> Result<()> {
    let args = Opt::from_args();

    let mut errlog = stderrlog::new();
    errlog.verbosity(args.verbosity + 1);
    errlog.init()?;

    let mut options = ResolveOptions::default();
    if let Some(max) = args.max_size {
        options.max_materialized_size = max;
    }
    let resolver = Resolver::new().options(options);

    let delivery = if args.name_only {
        Delivery::Name
    } else {
        Delivery::Content
    };

    let mut misses = 0;
    for raw in &args.references {
        let reference = Reference::parse(raw).with_context(|| format!("Bad reference {}", raw))?;
        let found = resolver
            .resolve(&reference, delivery, print)
            .with_context(|| format!("Couldn't resolve {}", raw))?;
        if found.is_none() {
            warn!("No match for {}", raw);
            misses += 1;
        }
    }

    if misses > 0 {
        bail!("{} of {} references didn't match", misses, args.references.len());
    }
    Ok(())
}

fn print(resolved: Resolved<'_>) -> Result<()> {
    let stdout = io::stdout();
    let mut stdout = stdout.lock();
    match resolved {
        Resolved::Name(name) => writeln!(stdout, "{}", name)?,
        Resolved::Content { name, size, reader } => {
            info!("Printing {} ({:?} bytes)", name, size);
            io::copy(reader, &mut stdout).with_context(|| format!("Couldn't read {}", name))?;
        }
    }
    stdout.flush()?;
    Ok(())
}
