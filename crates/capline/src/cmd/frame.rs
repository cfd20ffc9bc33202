//! Frame command - offline NDJSON conversion
//!
//! Runs a JSON array or a stream of concatenated objects (file or stdin)
//! through the record framer and writes one object per line.

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::{info, warn};

use capline_framing::{DEFAULT_MAX_FRAME_SIZE, FramerStats, RecordFramer};

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Frame command arguments
#[derive(Args, Debug)]
pub struct FrameArgs {
    /// Input file (stdin if not specified)
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Output file (stdout if not specified)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Objects larger than this many bytes are discarded
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_SIZE)]
    pub max_frame_size: usize,
}

/// Run the frame command
pub fn run(args: FrameArgs) -> Result<()> {
    let input: Box<dyn Read> = match &args.input {
        Some(path) => Box::new(
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?,
        ),
        None => Box::new(io::stdin().lock()),
    };
    let output: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        ),
        None => Box::new(io::stdout().lock()),
    };

    let stats = frame_stream(input, BufWriter::new(output), args.max_frame_size)?;

    info!(
        frames = stats.frames,
        malformed = stats.malformed,
        oversized = stats.oversized,
        noise_bytes = stats.noise_bytes,
        "framing complete"
    );
    Ok(())
}

/// Copy every complete object from `input` to `output`, one per line
fn frame_stream<R: Read, W: Write>(
    mut input: R,
    mut output: W,
    max_frame_size: usize,
) -> Result<FramerStats> {
    let mut framer = RecordFramer::with_max_frame_size(max_frame_size);
    let mut buf = vec![0u8; READ_CHUNK_SIZE];

    loop {
        let n = match input.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("failed to read input"),
        };
        for frame in framer.push(&buf[..n]) {
            serde_json::to_writer(&mut output, frame.value()).context("failed to write record")?;
            output.write_all(b"\n").context("failed to write record")?;
        }
    }
    output.flush().context("failed to flush output")?;

    if !framer.is_idle() {
        warn!(
            pending_bytes = framer.pending_bytes(),
            "input ended inside an unfinished object"
        );
    }
    Ok(framer.stats())
}
