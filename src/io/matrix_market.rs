use crate::error::{IoError, UnsupportedFormatError};
use crate::matrix::{BlockKind, BlockStore, DistributedMatrix, MatrixFormat, StorageOrder};
use crate::pattern::SparsityPattern;
use crate::Real;
use itertools::Itertools;
use std::fmt::LowerExp;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

const HEADER: &str = "%%MatrixMarket matrix coordinate real general";

/// Writes one block of the matrix in Matrix Market coordinate format.
///
/// The block is expanded into scalars and written in logical orientation, so a column-major
/// block is written as the matrix it represents rather than as its transpose.
pub fn write_block<T, W>(writer: &mut W, matrix: &DistributedMatrix<T>, kind: BlockKind) -> Result<(), IoError>
where
    T: Real + LowerExp,
    W: Write,
{
    let (rbs, cbs) = (matrix.row_block_size(), matrix.col_block_size());
    let (rows, cols) = matrix.extents().block_dims(kind);
    let block = matrix.block(kind);
    let order = matrix.storage_order();

    writeln!(writer, "{}", HEADER)?;
    writeln!(writer, "{} {} {}", rows * rbs, cols * cbs, block.values().len())?;
    for (slot, (major, minor)) in block.pattern().entries().enumerate() {
        let (row, col) = order.major_minor(major, minor);
        let tile = block.tile(slot);
        for ic in 0..cbs {
            for ir in 0..rbs {
                // Indices have to be stored as 1-based
                writeln!(
                    writer,
                    "{} {} {:e}",
                    row * rbs + ir + 1,
                    col * cbs + ic + 1,
                    tile[ir + rbs * ic]
                )?;
            }
        }
    }
    Ok(())
}

/// Writes all three blocks as one matrix over local and ghost rows and columns.
pub fn write_local_matrix<T, W>(writer: &mut W, matrix: &DistributedMatrix<T>) -> Result<(), IoError>
where
    T: Real + LowerExp,
    W: Write,
{
    let coo = matrix.to_local_coo();
    writeln!(writer, "{}", HEADER)?;
    writeln!(writer, "{} {} {}", coo.nrows(), coo.ncols(), coo.nnz())?;
    for (i, j, v) in coo.triplet_iter() {
        writeln!(writer, "{} {} {:e}", i + 1, j + 1, v)?;
    }
    Ok(())
}

/// Dumps one block of the matrix to a Matrix Market file.
pub fn write_block_to_file<T>(path: impl AsRef<Path>, matrix: &DistributedMatrix<T>, kind: BlockKind) -> Result<(), IoError>
where
    T: Real + LowerExp,
{
    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);
    write_block(&mut writer, matrix, kind)?;
    writer.flush()?;
    Ok(())
}

/// Reads a real, general Matrix Market coordinate file into a scalar (1 x 1 tile) block.
///
/// Only row-major storage is supported. Indices in the file are one-based; the pattern is
/// stored with the index base of `format`. Duplicate entries are summed.
pub fn read_block<T, R>(reader: R, format: MatrixFormat) -> Result<BlockStore<T>, IoError>
where
    T: Real + FromStr,
    R: BufRead,
{
    if format.storage_order != StorageOrder::RowMajor {
        return Err(UnsupportedFormatError {
            operation: "Matrix Market import",
            storage_order: format.storage_order,
        }
        .into());
    }

    let mut lines = reader
        .lines()
        .enumerate()
        .map(|(i, line)| line.map(|line| (i + 1, line)));

    let (_, header) = lines.next().transpose()?.ok_or_else(|| parse_error(1, "empty file"))?;
    if !header.to_ascii_lowercase().starts_with(HEADER.to_ascii_lowercase().as_str()) {
        return Err(parse_error(1, format!("expected header '{}'", HEADER)));
    }

    // Skip comments and blank lines
    let mut data = lines.filter_ok(|(_, line)| {
        let trimmed = line.trim();
        !trimmed.is_empty() && !trimmed.starts_with('%')
    });

    let (size_line, size) = data.next().transpose()?.ok_or_else(|| parse_error(1, "missing size line"))?;
    let (nrows, ncols, nnz) = match parse_fields(&size, size_line)?.as_slice() {
        &[nrows, ncols, nnz] => (nrows, ncols, nnz),
        _ => return Err(parse_error(size_line, "expected three integers on the size line")),
    };

    if nrows.checked_mul(ncols).map_or(false, |max_nnz| nnz > max_nnz) {
        return Err(parse_error(
            size_line,
            format!("{} entries do not fit in a {} x {} matrix", nnz, nrows, ncols),
        ));
    }

    // The size line is not trusted with the allocation; entries are checked one by one below
    let mut triplets = Vec::with_capacity(nnz.min(1 << 16));
    for _ in 0..nnz {
        let (line_number, line) = data
            .next()
            .transpose()?
            .ok_or_else(|| parse_error(size_line, format!("expected {} entries", nnz)))?;
        let mut fields = line.split_whitespace();
        let (Some(i), Some(j), Some(v), None) = (fields.next(), fields.next(), fields.next(), fields.next()) else {
            return Err(parse_error(line_number, "expected 'row col value'"));
        };
        let i = parse_one_based(i, nrows, line_number)?;
        let j = parse_one_based(j, ncols, line_number)?;
        let v = T::from_str(v).map_err(|_| parse_error(line_number, format!("invalid value '{}'", v)))?;
        triplets.push((i, j, v));
    }

    // Stable sort, so that duplicates are summed in file order
    triplets.sort_by_key(|&(i, j, _)| (i, j));
    let values: Vec<T> = triplets
        .iter()
        .group_by(|(i, j, _)| (*i, *j))
        .into_iter()
        .map(|(_, group)| group.fold(T::zero(), |sum, &(_, _, v)| sum + v))
        .collect();
    let pattern = SparsityPattern::try_from_sorted_entries(
        nrows,
        ncols,
        triplets.iter().map(|&(i, j, _)| (i, j)),
        format.index_base,
    )
    .map_err(|err| parse_error(size_line, format!("can not store {} rows: {}", nrows, err)))?;

    BlockStore::try_from_pattern_and_values(Arc::new(pattern), 1, values)
        .map_err(|err| parse_error(size_line, err.to_string()))
}

/// Reads a scalar block from a Matrix Market file.
pub fn read_block_from_file<T>(path: impl AsRef<Path>, format: MatrixFormat) -> Result<BlockStore<T>, IoError>
where
    T: Real + FromStr,
{
    let file = File::open(path.as_ref())?;
    read_block(BufReader::new(file), format)
}

fn parse_error(line: usize, message: impl Into<String>) -> IoError {
    IoError::Parse {
        line,
        message: message.into(),
    }
}

fn parse_fields(line: &str, line_number: usize) -> Result<Vec<usize>, IoError> {
    line.split_whitespace()
        .map(|field| {
            field
                .parse()
                .map_err(|_| parse_error(line_number, format!("invalid integer '{}'", field)))
        })
        .collect()
}

fn parse_one_based(field: &str, extent: usize, line_number: usize) -> Result<usize, IoError> {
    match field.parse::<usize>() {
        Ok(idx) if idx >= 1 && idx <= extent => Ok(idx - 1),
        _ => Err(parse_error(
            line_number,
            format!("index '{}' is not in 1..={}", field, extent),
        )),
    }
}
