//! Delimited text format for point sets, persisted trees and query results.
//!
//! Points: one per line, comma-separated coordinates, a trailing comma is
//! optional. A point section ends at a blank line or end of input.
//!
//! Persisted tree: the point section, a blank line, the root index, a blank
//! line, then one `axis,point_index,left,right` line per node in array order.
//! Absent values are written as [`INVALID_IDX`].
//!
//! Coordinates are written in scientific notation with the shortest digits
//! that parse back to the same value, so a write/read/write cycle is byte-identical.

use std::fmt::{Display, LowerExp};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::Path;
use std::str::FromStr;

use num_traits::Float;
use tracing::debug;

use crate::common_types::{PointSet, INVALID_IDX};
use crate::error::{KdTreeError, Result};
use crate::knn::kd_tree::{KdTree, Node};
use crate::knn::search::Neighbor;

/// Reads points until the first blank line or end of input.
pub fn read_points<F, R>(reader: R) -> Result<PointSet<F>>
where
    F: Float + FromStr,
    R: BufRead,
{
    let section = take_section(&mut reader.lines())?;
    let rows = parse_point_rows(&section).map_err(KdTreeError::InvalidInput)?;
    PointSet::new(rows)
}

pub fn write_points<F, W>(mut writer: W, points: &PointSet<F>) -> Result<()>
where
    F: Float + LowerExp,
    W: Write,
{
    for point in points.iter() {
        for coord in point {
            write!(writer, "{:e},", coord)?;
        }
        writeln!(writer)?;
    }
    Ok(())
}

pub fn write_tree<F, W>(mut writer: W, tree: &KdTree<F>) -> Result<()>
where
    F: Float + LowerExp,
    W: Write,
{
    write_points(&mut writer, tree.points())?;
    writeln!(writer)?;
    writeln!(writer, "{}", tree.root().unwrap_or(INVALID_IDX))?;
    writeln!(writer)?;
    for node in tree.nodes() {
        writeln!(
            writer,
            "{},{},{},{}",
            node.axis,
            node.point_index,
            node.left.unwrap_or(INVALID_IDX),
            node.right.unwrap_or(INVALID_IDX)
        )?;
    }
    Ok(())
}

/// Parses a persisted tree and validates its structure.
pub fn read_tree<F, R>(reader: R) -> Result<KdTree<F>>
where
    F: Float + FromStr,
    R: BufRead,
{
    let malformed = KdTreeError::MalformedPersistedTree;
    let mut lines = reader.lines();

    let rows = parse_point_rows(&take_section(&mut lines)?).map_err(malformed)?;
    let points = PointSet::new(rows).map_err(|e| match e {
        KdTreeError::InvalidInput(msg) => KdTreeError::MalformedPersistedTree(msg),
        other => other,
    })?;

    let root_section = take_section(&mut lines)?;
    let root = match root_section.as_slice() {
        [line] => parse_index(line.trim()).map_err(malformed)?,
        _ => {
            return Err(malformed(format!(
                "expected a single root line, found {}",
                root_section.len()
            )));
        }
    };

    let mut nodes = Vec::with_capacity(points.len());
    for (idx, line) in take_section(&mut lines)?.iter().enumerate() {
        let node = parse_node(line).map_err(|msg| malformed(format!("node line {}: {}", idx, msg)))?;
        nodes.push(node);
    }

    for line in lines {
        if !line?.trim().is_empty() {
            return Err(malformed("unexpected content after the node section".to_string()));
        }
    }

    let tree = KdTree::from_parts(points, root, nodes)?;
    debug!(points = tree.len(), dimension = tree.dimension(), "parsed persisted tree");
    Ok(tree)
}

/// Writes one `<index> <distance>` line per result.
pub fn write_results<F, W>(mut writer: W, results: &[Neighbor<F>]) -> Result<()>
where
    F: Float + Display,
    W: Write,
{
    for result in results {
        writeln!(writer, "{} {}", result.index, result.distance())?;
    }
    Ok(())
}

/// Reads `<index> <distance>` lines until end of input.
pub fn read_results<F, R>(reader: R) -> Result<Vec<(usize, F)>>
where
    F: Float + FromStr,
    R: BufRead,
{
    let mut results = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let bad_line = || KdTreeError::InvalidInput(format!("result line {}: '{}'", line_no + 1, line));
        let mut fields = line.split_whitespace();
        let (Some(index), Some(distance), None) = (fields.next(), fields.next(), fields.next()) else {
            return Err(bad_line());
        };
        let index = index.parse::<usize>().map_err(|_| bad_line())?;
        let distance = distance.parse::<F>().map_err(|_| bad_line())?;
        results.push((index, distance));
    }
    Ok(results)
}

pub fn load_points<F: Float + FromStr>(path: &Path) -> Result<PointSet<F>> {
    read_points(BufReader::new(File::open(path)?))
}

pub fn save_points<F: Float + LowerExp>(path: &Path, points: &PointSet<F>) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_points(&mut writer, points)?;
    writer.flush()?;
    Ok(())
}

pub fn load_tree<F: Float + FromStr>(path: &Path) -> Result<KdTree<F>> {
    read_tree(BufReader::new(File::open(path)?))
}

pub fn save_tree<F: Float + LowerExp>(path: &Path, tree: &KdTree<F>) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_tree(&mut writer, tree)?;
    writer.flush()?;
    Ok(())
}

/// Collects lines up to (not including) the next blank line or end of input.
fn take_section<R: BufRead>(lines: &mut Lines<R>) -> Result<Vec<String>> {
    let mut section = Vec::new();
    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            break;
        }
        section.push(line);
    }
    Ok(section)
}

fn parse_point_rows<F>(section: &[String]) -> std::result::Result<Vec<Vec<F>>, String>
where
    F: Float + FromStr,
{
    section
        .iter()
        .enumerate()
        .map(|(idx, line)| {
            split_fields(line)
                .map(|field| {
                    field
                        .parse::<F>()
                        .map_err(|_| format!("point line {}: '{}' is not a number", idx + 1, field))
                })
                .collect()
        })
        .collect()
}

fn parse_node(line: &str) -> std::result::Result<Node, String> {
    let fields = split_fields(line)
        .map(parse_index)
        .collect::<std::result::Result<Vec<Option<usize>>, String>>()?;
    let &[axis, point_index, left, right] = fields.as_slice() else {
        return Err(format!("expected 4 fields, found {}", fields.len()));
    };
    let axis = axis.ok_or("node has no split axis")?;
    let point_index = point_index.ok_or("node has no point")?;
    Ok(Node { axis, point_index, left, right })
}

/// Parses an index field, mapping the wire sentinel to `None`.
fn parse_index(field: &str) -> std::result::Result<Option<usize>, String> {
    let value = field
        .parse::<usize>()
        .map_err(|_| format!("'{}' is not an index", field))?;
    Ok((value != INVALID_IDX).then_some(value))
}

/// Comma-separated, trimmed fields of a line, dropping one trailing empty field.
fn split_fields(line: &str) -> impl Iterator<Item = &str> {
    let line = line.trim();
    let line = line.strip_suffix(',').unwrap_or(line);
    line.split(',').map(str::trim)
}
