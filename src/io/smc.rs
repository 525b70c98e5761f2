//! Minimal SMC serialization (`spec.md §6`): enough to round-trip a
//! `LocalTrees` through text, not a general-purpose interchange format.
//! Full serializer feature-parity (metadata headers, streaming output for
//! very large ARGs, etc.) belongs to tooling built on top of this crate.
//!
//! ```text
//! NAMES id1 id2 ...
//! REGION chrom start end
//! TREE <start> <end> <newick>
//! SPR <position> <recomb_node> <recomb_time> <coal_node> <coal_time>
//! ```
//!
//! `newick` uses leaf names for tips and carries each node's absolute time
//! (not a relative branch length) after the colon, so re-parsing recovers
//! exact grid indices rather than accumulating rounding error climbing the
//! tree. A `SPR` line refers to `recomb_node`/`coal_node` by their index in
//! the tree of the `TREE` line immediately preceding it; the first block
//! has no `SPR` line.

use std::io::{BufRead, Write};

use crate::error::{ArgweaverError, Result};
use crate::local_trees::LocalTrees;
use crate::model::Model;
use crate::newtypes::{NodeIndex, SeqId, TimeIdx};
use crate::time_grid::TimeGrid;
use crate::tree::{map_congruent_trees, LocalNode, LocalTree, Spr};

pub fn write(mut writer: impl Write, trees: &LocalTrees, model: &Model, names: &[String], chrom: &str) -> Result<()> {
    if names.len() != trees.num_leaves() {
        return Err(ArgweaverError::invariant("names length does not match LocalTrees leaf count"));
    }
    writeln!(writer, "NAMES {}", names.join(" "))?;
    writeln!(writer, "REGION {} {} {}", chrom, trees.start_coord(), trees.end_coord())?;

    let grid = model.grid();
    let mut pos = trees.start_coord();
    for block in trees.blocks() {
        let newick = tree_to_newick(&block.tree, grid, names);
        writeln!(writer, "TREE {} {} {}", pos, pos + block.blocklen as u64, newick)?;
        if !block.spr.is_null() {
            writeln!(
                writer,
                "SPR {} {} {} {} {}",
                pos,
                block.spr.recomb_node.index(),
                grid.get(block.spr.recomb_time),
                block.spr.coal_node.index(),
                grid.get(block.spr.coal_time),
            )?;
        }
        pos += block.blocklen as u64;
    }
    Ok(())
}

pub fn read(reader: impl BufRead, model: &Model) -> Result<LocalTrees> {
    let mut names: Option<Vec<String>> = None;
    let mut seqids: Vec<SeqId> = Vec::new();
    let mut result: Option<LocalTrees> = None;
    let mut pending_spr: Option<(u64, usize, f64, usize, f64)> = None;
    let grid = model.grid();

    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        let ctx = || format!("smc:{}", lineno + 1);

        if let Some(rest) = line.strip_prefix("NAMES") {
            let parsed: Vec<String> = rest.split_whitespace().map(str::to_string).collect();
            seqids = (0..parsed.len()).map(SeqId::from).collect();
            names = Some(parsed);
            continue;
        }
        if line.starts_with("REGION") {
            continue;
        }
        if let Some(rest) = line.strip_prefix("SPR") {
            let parts: Vec<&str> = rest.split_whitespace().collect();
            if parts.len() != 5 {
                return Err(ArgweaverError::format(ctx(), "SPR requires 5 fields"));
            }
            let position: u64 = parts[0].parse().map_err(|_| ArgweaverError::format(ctx(), "bad SPR position"))?;
            let recomb_node: usize = parts[1].parse().map_err(|_| ArgweaverError::format(ctx(), "bad recomb_node"))?;
            let recomb_time: f64 = parts[2].parse().map_err(|_| ArgweaverError::format(ctx(), "bad recomb_time"))?;
            let coal_node: usize = parts[3].parse().map_err(|_| ArgweaverError::format(ctx(), "bad coal_node"))?;
            let coal_time: f64 = parts[4].parse().map_err(|_| ArgweaverError::format(ctx(), "bad coal_time"))?;
            pending_spr = Some((position, recomb_node, recomb_time, coal_node, coal_time));
            continue;
        }
        if let Some(rest) = line.strip_prefix("TREE") {
            let names = names
                .as_ref()
                .ok_or_else(|| ArgweaverError::format(ctx(), "TREE line before NAMES header"))?;
            let mut parts = rest.trim().splitn(3, char::is_whitespace);
            let start: u64 = parts
                .next()
                .ok_or_else(|| ArgweaverError::format(ctx(), "missing TREE start"))?
                .parse()
                .map_err(|_| ArgweaverError::format(ctx(), "bad TREE start"))?;
            let end: u64 = parts
                .next()
                .ok_or_else(|| ArgweaverError::format(ctx(), "missing TREE end"))?
                .parse()
                .map_err(|_| ArgweaverError::format(ctx(), "bad TREE end"))?;
            let newick = parts
                .next()
                .ok_or_else(|| ArgweaverError::format(ctx(), "missing newick string"))?;
            if end <= start {
                return Err(ArgweaverError::format(ctx(), "TREE end must exceed start"));
            }
            let blocklen = (end - start) as u32;

            let tree = parse_newick(newick, names, grid, &ctx())?;

            match result.as_mut() {
                None => {
                    result = Some(LocalTrees::new(seqids.clone(), start, tree, blocklen)?);
                }
                Some(existing) => {
                    let spr = match pending_spr.take() {
                        Some((_, rn, rt, cn, ct)) => Spr {
                            recomb_node: NodeIndex::from(rn),
                            recomb_time: time_idx_for(grid, rt, &ctx())?,
                            coal_node: NodeIndex::from(cn),
                            coal_time: time_idx_for(grid, ct, &ctx())?,
                        },
                        None => Spr::NULL,
                    };
                    let mapping = map_congruent_trees(&existing.last_block().tree, &seqids, &tree, &seqids);
                    existing.push_block(tree, spr, mapping, blocklen)?;
                }
            }
            continue;
        }
        return Err(ArgweaverError::format(ctx(), format!("unrecognized line: {line}")));
    }

    result.ok_or_else(|| ArgweaverError::format("smc", "file has no TREE lines"))
}

fn tree_to_newick(tree: &LocalTree, grid: &TimeGrid, names: &[String]) -> String {
    let mut s = String::new();
    write_newick_node(tree, tree.root(), grid, names, &mut s);
    s.push(';');
    s
}

fn write_newick_node(tree: &LocalTree, v: NodeIndex, grid: &TimeGrid, names: &[String], out: &mut String) {
    if tree.is_leaf(v) {
        out.push_str(&names[v.index()]);
    } else {
        let children = tree.children(v);
        out.push('(');
        write_newick_node(tree, children[0], grid, names, out);
        out.push(',');
        write_newick_node(tree, children[1], grid, names, out);
        out.push(')');
    }
    out.push(':');
    out.push_str(&format!("{}", grid.get(tree.age(v))));
}

/// Parses the minimal newick subset `write` emits: balanced parens, leaf
/// names resolved via `names`, every node followed by `:<time>`. Internal
/// nodes get arena slots in the order their closing `)` is consumed, which
/// is exactly postorder.
fn parse_newick(s: &str, names: &[String], grid: &TimeGrid, ctx: &impl std::fmt::Display) -> Result<LocalTree> {
    let s = s.trim().strip_suffix(';').unwrap_or(s.trim());
    let chars: Vec<char> = s.chars().collect();
    let mut pos = 0usize;

    struct Raw {
        children: Option<[usize; 2]>,
        name: Option<String>,
        time: f64,
    }
    let mut raw: Vec<Raw> = Vec::new();

    fn parse_node(
        chars: &[char],
        pos: &mut usize,
        raw: &mut Vec<Raw>,
        ctx: &impl std::fmt::Display,
    ) -> Result<usize> {
        let children = if chars.get(*pos) == Some(&'(') {
            *pos += 1;
            let left = parse_node(chars, pos, raw, ctx)?;
            if chars.get(*pos) != Some(&',') {
                return Err(ArgweaverError::format(ctx, "expected ',' in newick"));
            }
            *pos += 1;
            let right = parse_node(chars, pos, raw, ctx)?;
            if chars.get(*pos) != Some(&')') {
                return Err(ArgweaverError::format(ctx, "expected ')' in newick"));
            }
            *pos += 1;
            Some([left, right])
        } else {
            None
        };

        let name = if children.is_none() {
            let start = *pos;
            while *pos < chars.len() && chars[*pos] != ':' {
                *pos += 1;
            }
            Some(chars[start..*pos].iter().collect::<String>())
        } else {
            None
        };

        if chars.get(*pos) != Some(&':') {
            return Err(ArgweaverError::format(ctx, "expected ':' in newick"));
        }
        *pos += 1;
        let start = *pos;
        while *pos < chars.len() && chars[*pos] != ',' && chars[*pos] != ')' {
            *pos += 1;
        }
        let time: f64 = chars[start..*pos]
            .iter()
            .collect::<String>()
            .parse()
            .map_err(|_| ArgweaverError::format(ctx, "bad node time in newick"))?;

        raw.push(Raw { children, name, time });
        Ok(raw.len() - 1)
    }

    parse_node(&chars, &mut pos, &mut raw, ctx)?;

    let n = names.len();
    if raw.len() != 2 * n - 1 {
        return Err(ArgweaverError::format(ctx, "newick node count does not match leaf count"));
    }

    // Leaves get their slot from `names`; internals get contiguous slots
    // in the order they were parsed (postorder).
    let mut remap = vec![usize::MAX; raw.len()];
    let mut next_internal = n;
    for (i, r) in raw.iter().enumerate() {
        if let Some(name) = &r.name {
            let idx = names
                .iter()
                .position(|nm| nm == name)
                .ok_or_else(|| ArgweaverError::format(ctx, format!("unknown leaf name '{name}'")))?;
            remap[i] = idx;
        } else {
            remap[i] = next_internal;
            next_internal += 1;
        }
    }

    let mut nodes = vec![
        LocalNode {
            parent: NodeIndex::NULL,
            child: [NodeIndex::NULL; 2],
            age: TimeIdx::NULL,
        };
        raw.len()
    ];
    let mut k_minus_1 = 0u32;
    for (i, r) in raw.iter().enumerate() {
        let new_idx = remap[i];
        let age = time_idx_for(grid, r.time, ctx)?;
        k_minus_1 = k_minus_1.max(age.0);
        let child = match r.children {
            Some([l, rr]) => {
                nodes[remap[l]].parent = NodeIndex::from(new_idx);
                nodes[remap[rr]].parent = NodeIndex::from(new_idx);
                [NodeIndex::from(remap[l]), NodeIndex::from(remap[rr])]
            }
            None => [NodeIndex::NULL; 2],
        };
        nodes[new_idx].child = child;
        nodes[new_idx].age = age;
    }

    LocalTree::from_nodes(nodes, n, k_minus_1 + 1)
}

fn time_idx_for(grid: &TimeGrid, t: f64, ctx: &impl std::fmt::Display) -> Result<TimeIdx> {
    for i in 0..grid.ntimes() {
        if grid.get(TimeIdx::from(i)) == t {
            return Ok(TimeIdx::from(i));
        }
    }
    Err(ArgweaverError::format(ctx, format!("time {t} is not on the model's grid")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SampleOptions;
    use crate::newtypes::TimeIdx as T;
    use crate::time_grid::TimeGrid;
    use std::io::Cursor;

    fn small_model() -> Model {
        let grid = TimeGrid::from_points(
            vec![0.0, 1.0, 2.0, 5.0],
            crate::time_grid::CoalescentSpacing::Linear,
        )
        .unwrap();
        Model::new(grid, vec![1.0, 1.0, 1.0], 1e-8, 1e-8, 0.0, SampleOptions::empty()).unwrap()
    }

    fn cherry_tree() -> LocalTree {
        let nodes = vec![
            LocalNode { parent: NodeIndex(2), child: [NodeIndex::NULL; 2], age: T(0) },
            LocalNode { parent: NodeIndex(2), child: [NodeIndex::NULL; 2], age: T(0) },
            LocalNode { parent: NodeIndex::NULL, child: [NodeIndex(0), NodeIndex(1)], age: T(2) },
        ];
        LocalTree::from_nodes(nodes, 2, 3).unwrap()
    }

    #[test]
    fn round_trips_a_two_leaf_local_trees() {
        let model = small_model();
        let names = vec!["a".to_string(), "b".to_string()];
        let seqids = vec![SeqId::from(0usize), SeqId::from(1usize)];
        let trees = LocalTrees::new(seqids, 0, cherry_tree(), 100).unwrap();

        let mut out = Vec::new();
        write(&mut out, &trees, &model, &names, "chr1").unwrap();
        let parsed = read(Cursor::new(out), &model).unwrap();

        assert_eq!(parsed.num_leaves(), trees.num_leaves());
        assert_eq!(parsed.start_coord(), trees.start_coord());
        assert_eq!(parsed.end_coord(), trees.end_coord());
        assert_eq!(parsed.last_block().tree.age(NodeIndex(2)), T(2));
    }
}
