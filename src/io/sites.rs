//! Sites file reader/writer (`spec.md §6`).
//!
//! ```text
//! NAMES id1 id2 ...
//! REGION chrom start end
//! <pos>\t<column>
//! ```
//! `pos` is 1-based inclusive on `[start, end]`; `column` is one base per
//! name, over `{A,C,G,T,N}` (or `{0,1}` for unphased data). Rows must be
//! strictly increasing in `pos`.

use std::io::{BufRead, Write};

use crate::emission::AMBIGUOUS;
use crate::error::{ArgweaverError, Result};

/// One observed column, already decoded into the alphabet `Emission` uses.
#[derive(Debug, Clone, PartialEq)]
pub struct SitesRow {
    pub pos: u64,
    pub bases: Vec<u8>,
}

/// A parsed sites file: sample names, the chromosome region, and rows in
/// increasing position order.
#[derive(Debug, Clone, PartialEq)]
pub struct SitesFile {
    pub names: Vec<String>,
    pub chrom: String,
    pub start: u64,
    pub end: u64,
    pub rows: Vec<SitesRow>,
}

impl SitesFile {
    pub fn read(reader: impl BufRead) -> Result<Self> {
        let mut names: Option<Vec<String>> = None;
        let mut region: Option<(String, u64, u64)> = None;
        let mut rows = Vec::new();
        let mut last_pos: Option<u64> = None;

        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            let ctx = || format!("sites:{}", lineno + 1);

            if let Some(rest) = line.strip_prefix("NAMES") {
                names = Some(rest.split_whitespace().map(str::to_string).collect());
                continue;
            }
            if let Some(rest) = line.strip_prefix("REGION") {
                let parts: Vec<&str> = rest.split_whitespace().collect();
                if parts.len() != 3 {
                    return Err(ArgweaverError::format(ctx(), "REGION requires chrom, start, end"));
                }
                let start: u64 = parts[1]
                    .parse()
                    .map_err(|_| ArgweaverError::format(ctx(), "REGION start is not an integer"))?;
                let end: u64 = parts[2]
                    .parse()
                    .map_err(|_| ArgweaverError::format(ctx(), "REGION end is not an integer"))?;
                region = Some((parts[0].to_string(), start, end));
                continue;
            }

            let names = names
                .as_ref()
                .ok_or_else(|| ArgweaverError::format(ctx(), "data line before NAMES header"))?;
            let (_, start, end) = region
                .as_ref()
                .ok_or_else(|| ArgweaverError::format(ctx(), "data line before REGION header"))?;

            let mut parts = line.splitn(2, '\t');
            let pos_str = parts
                .next()
                .ok_or_else(|| ArgweaverError::format(ctx(), "missing position column"))?;
            let column_str = parts
                .next()
                .ok_or_else(|| ArgweaverError::format(ctx(), "missing column data"))?;

            let pos: u64 = pos_str
                .parse()
                .map_err(|_| ArgweaverError::format(ctx(), "position is not an integer"))?;
            if pos < *start || pos > *end {
                return Err(ArgweaverError::format(ctx(), format!("position {pos} outside region")));
            }
            if let Some(last) = last_pos {
                if pos <= last {
                    return Err(ArgweaverError::format(ctx(), "positions must be strictly increasing"));
                }
            }
            last_pos = Some(pos);

            if column_str.chars().count() != names.len() {
                return Err(ArgweaverError::format(
                    ctx(),
                    format!("column has {} entries, expected {}", column_str.chars().count(), names.len()),
                ));
            }
            let bases: Result<Vec<u8>> = column_str.chars().map(|c| decode_base(c, &ctx())).collect();
            rows.push(SitesRow { pos, bases: bases? });
        }

        let names = names.ok_or_else(|| ArgweaverError::format("sites", "missing NAMES header"))?;
        let (chrom, start, end) = region.ok_or_else(|| ArgweaverError::format("sites", "missing REGION header"))?;
        Ok(SitesFile { names, chrom, start, end, rows })
    }

    pub fn write(&self, mut writer: impl Write) -> Result<()> {
        writeln!(writer, "NAMES {}", self.names.join(" "))?;
        writeln!(writer, "REGION {} {} {}", self.chrom, self.start, self.end)?;
        for row in &self.rows {
            let column: String = row.bases.iter().map(|&b| encode_base(b)).collect();
            writeln!(writer, "{}\t{}", row.pos, column)?;
        }
        Ok(())
    }
}

fn decode_base(c: char, ctx: &impl std::fmt::Display) -> Result<u8> {
    match c {
        'A' | 'a' => Ok(0),
        'C' | 'c' => Ok(1),
        'G' | 'g' => Ok(2),
        'T' | 't' => Ok(3),
        'N' | 'n' => Ok(AMBIGUOUS),
        '0' => Ok(0),
        '1' => Ok(1),
        _ => Err(ArgweaverError::format(ctx, format!("unrecognized base '{c}'"))),
    }
}

fn encode_base(b: u8) -> char {
    match b {
        0 => 'A',
        1 => 'C',
        2 => 'G',
        3 => 'T',
        _ => 'N',
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips_a_small_sites_file() {
        let text = "NAMES s0 s1\nREGION chr1 1 10\n3\tAC\n7\tAN\n";
        let parsed = SitesFile::read(Cursor::new(text)).unwrap();
        assert_eq!(parsed.names, vec!["s0", "s1"]);
        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(parsed.rows[0].bases, vec![0, 1]);
        assert_eq!(parsed.rows[1].bases, vec![0, AMBIGUOUS]);

        let mut out = Vec::new();
        parsed.write(&mut out).unwrap();
        let reparsed = SitesFile::read(Cursor::new(out)).unwrap();
        assert_eq!(reparsed, parsed);
    }

    #[test]
    fn rejects_nonincreasing_positions() {
        let text = "NAMES s0\nREGION chr1 1 10\n5\tA\n5\tC\n";
        let err = SitesFile::read(Cursor::new(text)).unwrap_err();
        assert!(matches!(err, ArgweaverError::Format { .. }));
    }

    #[test]
    fn rejects_wrong_column_width() {
        let text = "NAMES s0 s1\nREGION chr1 1 10\n5\tA\n";
        let err = SitesFile::read(Cursor::new(text)).unwrap_err();
        assert!(matches!(err, ArgweaverError::Format { .. }));
    }
}
