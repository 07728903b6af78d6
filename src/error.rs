//! Error types.
//!
//! Configuration errors are raised before any matrix value is mutated. An error in the middle of
//! an assembly pass leaves the matrix partially assembled; it must be reset and reassembled.
//! A lookup that finds no matching pattern entry during scatter-add is *not* an error; it is
//! counted in [`ScatterStats`](crate::assembly::ScatterStats) instead.
use crate::matrix::StorageOrder;
use std::error::Error;
use std::fmt;

/// Malformed pointer/index arrays passed to a [`SparsityPattern`](crate::pattern::SparsityPattern).
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PatternError {
    /// `ptr` does not have `num_output + 1` entries.
    InvalidPointerLength { expected: usize, actual: usize },
    /// The first pointer is not equal to the index base.
    InvalidFirstPointer { expected: usize, actual: usize },
    /// The last pointer does not match the number of stored indices.
    InvalidLastPointer { expected: usize, actual: usize },
    /// `ptr[major + 1] < ptr[major]`.
    DecreasingPointers { major: usize },
    /// A stored index lies outside `[base, num_input + base)`.
    IndexOutOfBounds { major: usize, index: usize },
    /// The same index appears twice in one major lane.
    DuplicateIndex { major: usize, index: usize },
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPointerLength { expected, actual } => {
                write!(f, "Pointer array has length {actual}, expected {expected}")
            }
            Self::InvalidFirstPointer { expected, actual } => {
                write!(f, "First pointer is {actual}, expected the index base {expected}")
            }
            Self::InvalidLastPointer { expected, actual } => {
                write!(f, "Last pointer is {actual}, expected {expected}")
            }
            Self::DecreasingPointers { major } => write!(f, "Pointers decrease after entry {major}"),
            Self::IndexOutOfBounds { major, index } => {
                write!(f, "Index {index} stored for entry {major} is out of bounds")
            }
            Self::DuplicateIndex { major, index } => {
                write!(f, "Index {index} is stored more than once for entry {major}")
            }
        }
    }
}

impl Error for PatternError {}

/// Block-size, pattern-size or array-length mismatches.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    NonPositiveBlockSize { row_block_size: usize, col_block_size: usize },
    /// Two patterns that must share an extent disagree on it.
    InconsistentPatterns {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    /// A pattern was built with a different index base than the matrix.
    IndexBaseMismatch { block: &'static str },
    /// The degrees of freedom per node are not a multiple of the block size.
    IndivisibleDegreesOfFreedom { dofs: usize, block_size: usize },
    /// The element array length does not match the declared element shape.
    ElementArrayLength { expected: usize, actual: usize },
    /// A coloring was built for a different storage order than the matrix uses.
    ColoringOrderMismatch { coloring: StorageOrder, matrix: StorageOrder },
    /// The nodes an element writes to differ from those its color was computed from.
    ColoringConnectivityMismatch { element: usize },
    /// A coloring refers to an element that the element source does not have.
    ElementOutOfBounds { element: usize, num_elements: usize },
    /// Per-element color array has the wrong length.
    ColorCount { expected: usize, actual: usize },
    /// Two elements of the same color write to the same node.
    ColorConflict { color: usize, node: usize },
    /// A vector or mask passed to a matrix operation has the wrong length.
    VectorLength {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonPositiveBlockSize {
                row_block_size,
                col_block_size,
            } => write!(
                f,
                "Block sizes must be positive (row block size {row_block_size}, col block size {col_block_size})"
            ),
            Self::InconsistentPatterns { what, expected, actual } => {
                write!(f, "Inconsistent patterns: {what} is {actual}, expected {expected}")
            }
            Self::IndexBaseMismatch { block } => {
                write!(f, "The {block} pattern uses a different index base than the matrix")
            }
            Self::IndivisibleDegreesOfFreedom { dofs, block_size } => write!(
                f,
                "{dofs} degrees of freedom per node is not a multiple of block size {block_size}"
            ),
            Self::ElementArrayLength { expected, actual } => {
                write!(f, "Element array has length {actual}, expected {expected}")
            }
            Self::ColoringOrderMismatch { coloring, matrix } => write!(
                f,
                "Coloring was computed for {coloring:?} storage, but the matrix uses {matrix:?}"
            ),
            Self::ColoringConnectivityMismatch { element } => write!(
                f,
                "Nodes of element {element} do not match the nodes its color was computed from"
            ),
            Self::ElementOutOfBounds { element, num_elements } => {
                write!(f, "Element {element} is out of bounds ({num_elements} elements)")
            }
            Self::ColorCount { expected, actual } => {
                write!(f, "Got {actual} element colors, expected {expected}")
            }
            Self::ColorConflict { color, node } => {
                write!(f, "Two elements of color {color} both write to node {node}")
            }
            Self::VectorLength { what, expected, actual } => {
                write!(f, "{what} has length {actual}, expected {expected}")
            }
        }
    }
}

impl Error for ConfigError {}

/// An operation that is not implemented for the given storage order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedFormatError {
    pub operation: &'static str,
    pub storage_order: StorageOrder,
}

impl fmt::Display for UnsupportedFormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} is not supported for {:?} storage",
            self.operation, self.storage_order
        )
    }
}

impl Error for UnsupportedFormatError {}

/// Errors raised by an assembly pass.
#[derive(Debug)]
#[non_exhaustive]
pub enum AssemblyError {
    Config(ConfigError),
    /// The element source failed to produce the contribution of an element.
    Element { element: usize, source: eyre::Report },
}

impl fmt::Display for AssemblyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(err) => write!(f, "Invalid assembly configuration: {err}"),
            Self::Element { element, source } => {
                write!(f, "Failed to compute contribution of element {element}: {source}")
            }
        }
    }
}

impl Error for AssemblyError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Element { source, .. } => Some(&**source),
        }
    }
}

impl From<ConfigError> for AssemblyError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

/// Errors raised while reading or writing matrix files.
#[derive(Debug)]
#[non_exhaustive]
pub enum IoError {
    Io(std::io::Error),
    Parse { line: usize, message: String },
    Unsupported(UnsupportedFormatError),
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "I/O error: {err}"),
            Self::Parse { line, message } => write!(f, "Parse error on line {line}: {message}"),
            Self::Unsupported(err) => err.fmt(f),
        }
    }
}

impl Error for IoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse { .. } => None,
            Self::Unsupported(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for IoError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<UnsupportedFormatError> for IoError {
    fn from(err: UnsupportedFormatError) -> Self {
        Self::Unsupported(err)
    }
}
