//! Per-iteration statistics stream (`spec.md §6`): a TSV with a header row,
//! one line per sampler iteration.

use std::io::Write;

use crate::error::Result;

/// One row of the statistics stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationStats {
    pub iter: u64,
    pub joint: f64,
    pub likelihood: f64,
    pub prior: f64,
    pub recombs: u64,
    pub arglen: f64,
}

/// Writes the header followed by one TSV row per entry in `rows`.
pub fn write_stats(mut writer: impl Write, rows: &[IterationStats]) -> Result<()> {
    writeln!(writer, "iter\tjoint\tlikelihood\tprior\trecombs\targlen")?;
    for row in rows {
        writeln!(
            writer,
            "{}\t{}\t{}\t{}\t{}\t{}",
            row.iter, row.joint, row.likelihood, row.prior, row.recombs, row.arglen
        )?;
    }
    Ok(())
}
