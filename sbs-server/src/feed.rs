//! TCP client for a receiver's BaseStation output port.
//!
//! One record per line. Each line goes to the pipeline as raw bytes; the
//! pipeline decides whether it is blank, valid, or invalid.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use sbs_core::pipeline::{Outcome, Pipeline};
use sbs_core::transform::Payload;
use sbs_core::types::SbsError;

/// Longest record accepted, newline included. Longer ones count invalid.
const MAX_LINE: usize = 1024;

/// Per-connection tallies.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FeedStats {
    pub lines: u64,
    pub accepted: u64,
    pub invalid: u64,
    pub filtered: u64,
}

impl FeedStats {
    fn count(&mut self, outcome: Outcome) {
        self.lines += 1;
        match outcome {
            Outcome::Accepted => self.accepted += 1,
            Outcome::Invalid => self.invalid += 1,
            Outcome::Filtered => self.filtered += 1,
        }
    }
}

/// Feed every line of `reader` through the pipeline until EOF.
pub async fn read_records<R>(reader: &mut R, pipeline: &Pipeline) -> std::io::Result<FeedStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = FeedStats::default();
    let mut line = Vec::with_capacity(256);

    loop {
        line.clear();
        let n = (&mut *reader)
            .take(MAX_LINE as u64)
            .read_until(b'\n', &mut line)
            .await?;
        if n == 0 {
            return Ok(stats);
        }
        if n == MAX_LINE && line.last() != Some(&b'\n') {
            discard_line(reader).await?;
            stats.count(pipeline.reject(SbsError::Oversize(MAX_LINE)));
            continue;
        }
        stats.count(pipeline.ingest(Some(Payload::Bytes(&line))));
    }
}

/// Skip the rest of the current line, newline included.
async fn discard_line<R>(reader: &mut R) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let (used, done) = {
            let buf = reader.fill_buf().await?;
            if buf.is_empty() {
                return Ok(());
            }
            match buf.iter().position(|&b| b == b'\n') {
                Some(i) => (i + 1, true),
                None => (buf.len(), false),
            }
        };
        reader.consume(used);
        if done {
            return Ok(());
        }
    }
}

/// Connect, read until the receiver hangs up, reconnect after `retry`.
///
/// Runs until the task is dropped.
pub async fn run(pipeline: Arc<Pipeline>, addr: String, retry: Duration) {
    loop {
        match TcpStream::connect(&addr).await {
            Ok(stream) => {
                info!("connected to SBS feed at {addr}");
                let mut reader = BufReader::new(stream);
                match read_records(&mut reader, &pipeline).await {
                    Ok(stats) => info!(
                        "feed {addr} closed after {} lines ({} accepted, {} invalid)",
                        stats.lines, stats.accepted, stats.invalid
                    ),
                    Err(e) => warn!("feed {addr} read error: {e}"),
                }
            }
            Err(e) => warn!("cannot connect to SBS feed at {addr}: {e}"),
        }

        debug!("reconnecting in {retry:?}");
        tokio::time::sleep(retry).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
