//! Harwell-Boeing export of column-major blocks.
//!
//! Blocks are written as real, unsymmetric, assembled (`RUA`) matrices in 80 column records.
//! Pointers and row indices use the `(10I8)` format and values the `(4E20.12)` format.
use crate::error::IoError;
use crate::matrix::{BlockKind, DistributedMatrix, StorageOrder};
use crate::Real;
use std::fmt::{Display, LowerExp};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

const INTEGERS_PER_LINE: usize = 10;
const VALUES_PER_LINE: usize = 4;

/// Writes one block of a column-major matrix in Harwell-Boeing format.
///
/// The block is expanded into scalar columns. Row-major matrices are rejected with
/// [`IoError::Unsupported`].
pub fn write_block<T, W>(
    writer: &mut W,
    matrix: &DistributedMatrix<T>,
    kind: BlockKind,
    title: &str,
    key: &str,
) -> Result<(), IoError>
where
    T: Real + LowerExp,
    W: Write,
{
    matrix.require_storage_order(StorageOrder::ColMajor, "Harwell-Boeing export")?;
    let (rbs, cbs) = (matrix.row_block_size(), matrix.col_block_size());
    let (rows, cols) = matrix.extents().block_dims(kind);
    let block = matrix.block(kind);
    let pattern = block.pattern();
    let (nrows, ncols) = (rows * rbs, cols * cbs);

    // Expand every block column into `cbs` scalar columns, keeping the stored row order
    let mut col_ptr = Vec::with_capacity(ncols + 1);
    let mut row_index = Vec::with_capacity(block.values().len());
    let mut values = Vec::with_capacity(block.values().len());
    col_ptr.push(1);
    for col in 0..cols {
        let slots = pattern.lane_range(col);
        for ic in 0..cbs {
            for slot in slots.clone() {
                let row = pattern.index()[slot] - pattern.index_base().offset();
                let tile = block.tile(slot);
                for ir in 0..rbs {
                    row_index.push(row * rbs + ir + 1);
                    values.push(tile[ir + rbs * ic]);
                }
            }
            col_ptr.push(row_index.len() + 1);
        }
    }

    let nnz = values.len();
    let ptr_lines = lines_needed(col_ptr.len(), INTEGERS_PER_LINE);
    let index_lines = lines_needed(nnz, INTEGERS_PER_LINE);
    let value_lines = lines_needed(nnz, VALUES_PER_LINE);
    let total_lines = ptr_lines + index_lines + value_lines;

    writeln!(writer, "{:<72.72}{:<8.8}", title, key)?;
    writeln!(writer, "{:>14}{:>14}{:>14}{:>14}{:>14}", total_lines, ptr_lines, index_lines, value_lines, 0)?;
    writeln!(writer, "RUA{:11}{:>14}{:>14}{:>14}{:>14}", "", nrows, ncols, nnz, 0)?;
    writeln!(writer, "{:<16}{:<16}{:<20}", "(10I8)", "(10I8)", "(4E20.12)")?;

    write_records(writer, &col_ptr, INTEGERS_PER_LINE, |w, i| write!(w, "{:>8}", i))?;
    write_records(writer, &row_index, INTEGERS_PER_LINE, |w, i| write!(w, "{:>8}", i))?;
    write_records(writer, &values, VALUES_PER_LINE, |w, v| write!(w, "{:>20}", FortranExp(*v)))?;
    Ok(())
}

/// Dumps one block of a column-major matrix to a Harwell-Boeing file.
pub fn write_block_to_file<T>(
    path: impl AsRef<Path>,
    matrix: &DistributedMatrix<T>,
    kind: BlockKind,
    title: &str,
    key: &str,
) -> Result<(), IoError>
where
    T: Real + LowerExp,
{
    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);
    write_block(&mut writer, matrix, kind, title, key)?;
    writer.flush()?;
    Ok(())
}

fn lines_needed(count: usize, per_line: usize) -> usize {
    (count + per_line - 1) / per_line
}

fn write_records<W: Write, X>(
    writer: &mut W,
    items: &[X],
    per_line: usize,
    mut write_item: impl FnMut(&mut W, &X) -> std::io::Result<()>,
) -> std::io::Result<()> {
    for line in items.chunks(per_line) {
        for item in line {
            write_item(writer, item)?;
        }
        writeln!(writer)?;
    }
    Ok(())
}

/// Formats a number as `d.ddddddddddddE+xx`, as read by a Fortran `E` edit descriptor.
struct FortranExp<T>(T);

impl<T: LowerExp> Display for FortranExp<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let formatted = format!("{:.12e}", self.0);
        let (mantissa, exponent) = formatted.split_once('e').unwrap_or((formatted.as_str(), "0"));
        let (sign, digits) = match exponent.strip_prefix('-') {
            Some(digits) => ('-', digits),
            None => ('+', exponent),
        };
        let formatted = format!("{}E{}{:0>2}", mantissa, sign, digits);
        f.pad(&formatted)
    }
}
