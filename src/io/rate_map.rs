//! Rate map reader/writer (`spec.md §6`): a TSV of per-chromosome,
//! half-open, non-overlapping rate intervals, sorted by `start`.
//!
//! ```text
//! chrom  start  end  rate
//! ```

use std::io::{BufRead, Write};

use crate::error::{ArgweaverError, Result};
use crate::model::{RateInterval, RateMap};

/// One chromosome's worth of rate intervals, as read from a rate map file.
/// A single file may cover several chromosomes; `read` returns them grouped.
pub fn read_grouped(reader: impl BufRead) -> Result<Vec<(String, RateMap)>> {
    let mut by_chrom: Vec<(String, Vec<RateInterval>)> = Vec::new();

    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let ctx = format!("ratemap:{}", lineno + 1);
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() != 4 {
            return Err(ArgweaverError::format(ctx, "expected 4 columns: chrom start end rate"));
        }
        let chrom = parts[0].to_string();
        let start: u64 = parts[1]
            .parse()
            .map_err(|_| ArgweaverError::format(ctx.clone(), "start is not an integer"))?;
        let end: u64 = parts[2]
            .parse()
            .map_err(|_| ArgweaverError::format(ctx.clone(), "end is not an integer"))?;
        let value: f64 = parts[3]
            .parse()
            .map_err(|_| ArgweaverError::format(ctx.clone(), "rate is not a number"))?;

        match by_chrom.iter_mut().find(|(c, _)| *c == chrom) {
            Some((_, intervals)) => intervals.push(RateInterval { start, end, value }),
            None => by_chrom.push((chrom, vec![RateInterval { start, end, value }])),
        }
    }

    by_chrom
        .into_iter()
        .map(|(chrom, intervals)| RateMap::new(intervals).map(|m| (chrom, m)))
        .collect()
}

pub fn write_grouped(mut writer: impl Write, maps: &[(String, RateMap)]) -> Result<()> {
    for (chrom, map) in maps {
        for iv in map.intervals() {
            writeln!(writer, "{}\t{}\t{}\t{}", chrom, iv.start, iv.end, iv.value)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_a_single_chromosome_rate_map() {
        let text = "chr1\t0\t100\t1e-8\nchr1\t100\t200\t2e-8\n";
        let parsed = read_grouped(Cursor::new(text)).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].0, "chr1");
        assert_eq!(parsed[0].1.find(50, -1.0), 1e-8);
        assert_eq!(parsed[0].1.find(150, -1.0), 2e-8);
        assert_eq!(parsed[0].1.find(250, -1.0), -1.0);
    }

    #[test]
    fn rejects_overlapping_intervals() {
        let text = "chr1\t0\t100\t1e-8\nchr1\t50\t150\t2e-8\n";
        let err = read_grouped(Cursor::new(text)).unwrap_err();
        assert!(matches!(err, ArgweaverError::Config(_)));
    }

    #[test]
    fn round_trips_through_write() {
        let text = "chr1\t0\t100\t1e-8\nchr2\t0\t50\t3e-8\n";
        let parsed = read_grouped(Cursor::new(text)).unwrap();
        let mut out = Vec::new();
        write_grouped(&mut out, &parsed).unwrap();
        let reparsed = read_grouped(Cursor::new(out)).unwrap();
        assert_eq!(reparsed.len(), parsed.len());
    }
}
