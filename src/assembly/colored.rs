use crate::assembly::{
    scatter_element, validate_element, ElementArrayAssembler, ElementConnectivity, ScatterStats, TileSink,
};
use crate::error::{AssemblyError, ConfigError};
use crate::matrix::{BlockKind, DistributedMatrix, StorageOrder};
use crate::Real;
use blocksys_paradis::coloring::sequential_greedy_coloring;
use blocksys_paradis::slice::ParallelSliceAccess;
use blocksys_paradis::DisjointSubsets;
use log::{debug, warn};
use rayon::iter::ParallelIterator;
use std::cell::RefCell;
use thread_local::ThreadLocal;

/// A partition of elements into colors such that no two elements of the same color write to
/// the same major lane of the matrix.
///
/// Major lanes are rows for row-major storage and columns for column-major storage, so a
/// coloring is only valid for the storage order it was computed for. The subset of each
/// element holds the major nodes of the element: its equation nodes for row-major storage,
/// its solution nodes for column-major storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementColoring {
    storage_order: StorageOrder,
    min_color: usize,
    colors: Vec<DisjointSubsets>,
}

impl ElementColoring {
    /// Colors the elements greedily by their major nodes.
    pub fn greedy(connectivity: &dyn ElementConnectivity, storage_order: StorageOrder) -> Self {
        let subsets: Vec<Vec<usize>> = (0..connectivity.num_elements())
            .map(|element_index| major_nodes(connectivity, storage_order, element_index))
            .collect();
        Self {
            storage_order,
            min_color: 0,
            colors: sequential_greedy_coloring(&subsets),
        }
    }

    /// Builds a coloring from a color per element, as supplied by a mesh.
    ///
    /// Colors run from the smallest to the largest color present. Colors in between that no
    /// element uses are kept as empty colors. Fails if two elements of the same color share a
    /// major node.
    pub fn try_from_element_colors(
        element_colors: &[usize],
        connectivity: &dyn ElementConnectivity,
        storage_order: StorageOrder,
    ) -> Result<Self, ConfigError> {
        let num_elements = connectivity.num_elements();
        if element_colors.len() != num_elements {
            return Err(ConfigError::ColorCount {
                expected: num_elements,
                actual: element_colors.len(),
            });
        }

        let (Some(&min_color), Some(&max_color)) = (element_colors.iter().min(), element_colors.iter().max()) else {
            return Ok(Self {
                storage_order,
                min_color: 0,
                colors: Vec::new(),
            });
        };

        let mut elements_by_color = vec![Vec::new(); max_color - min_color + 1];
        for (element_index, &color) in element_colors.iter().enumerate() {
            let nodes = major_nodes(connectivity, storage_order, element_index);
            elements_by_color[color - min_color].push((element_index, nodes));
        }

        let colors = elements_by_color
            .iter()
            .enumerate()
            .map(|(i, elements)| {
                let labeled = elements.iter().map(|(e, nodes)| (*e, nodes.as_slice()));
                DisjointSubsets::try_from_labeled_subsets(labeled).map_err(|err| ConfigError::ColorConflict {
                    color: min_color + i,
                    node: err.index,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            storage_order,
            min_color,
            colors,
        })
    }

    pub fn storage_order(&self) -> StorageOrder {
        self.storage_order
    }

    pub fn min_color(&self) -> usize {
        self.min_color
    }

    /// The largest color, or `None` if there are no colors.
    pub fn max_color(&self) -> Option<usize> {
        (!self.colors.is_empty()).then(|| self.min_color + self.colors.len() - 1)
    }

    pub fn num_colors(&self) -> usize {
        self.colors.len()
    }

    /// The elements of the given color, labelled by element index.
    pub fn color(&self, color: usize) -> Option<&DisjointSubsets> {
        color
            .checked_sub(self.min_color)
            .and_then(|i| self.colors.get(i))
    }

    /// Iterates over `(color, elements)` from the smallest to the largest color.
    pub fn colors(&self) -> impl '_ + Iterator<Item = (usize, &DisjointSubsets)> {
        self.colors
            .iter()
            .enumerate()
            .map(move |(i, subsets)| (self.min_color + i, subsets))
    }
}

/// The nodes whose matrix lanes an element writes to: its equation nodes (rows) for row-major
/// storage, its solution nodes (columns) for column-major storage.
fn major_nodes(connectivity: &dyn ElementConnectivity, order: StorageOrder, element_index: usize) -> Vec<usize> {
    match order {
        StorageOrder::RowMajor => {
            let mut nodes = vec![0; connectivity.equation_node_count(element_index)];
            connectivity.populate_equation_nodes(&mut nodes, element_index);
            nodes
        }
        StorageOrder::ColMajor => {
            let mut nodes = vec![0; connectivity.solution_node_count(element_index)];
            connectivity.populate_solution_nodes(&mut nodes, element_index);
            nodes
        }
    }
}

#[derive(Debug, Clone)]
struct ElementWorkspace<T> {
    equation_nodes: Vec<usize>,
    solution_nodes: Vec<usize>,
    element_array: Vec<T>,
}

impl<T> Default for ElementWorkspace<T> {
    fn default() -> Self {
        Self {
            equation_nodes: Vec::new(),
            solution_nodes: Vec::new(),
            element_array: Vec::new(),
        }
    }
}

impl<T: Real> ElementWorkspace<T> {
    /// Fetches connectivity and element array of an element into the buffers.
    fn gather(
        &mut self,
        element_assembler: &(impl ?Sized + ElementArrayAssembler<T>),
        element_index: usize,
    ) -> Result<(), AssemblyError> {
        self.equation_nodes
            .resize(element_assembler.equation_node_count(element_index), 0);
        element_assembler.populate_equation_nodes(&mut self.equation_nodes, element_index);
        self.solution_nodes
            .resize(element_assembler.solution_node_count(element_index), 0);
        element_assembler.populate_solution_nodes(&mut self.solution_nodes, element_index);

        let len = element_assembler.element_shape(element_index).len();
        self.element_array.clear();
        self.element_array.resize(len, T::zero());
        element_assembler
            .assemble_element_array_into(&mut self.element_array, element_index)
            .map_err(|source| AssemblyError::Element {
                element: element_index,
                source,
            })
    }
}

fn log_pass_summary(stats: &ScatterStats) {
    debug!(
        "Assembly pass finished: {} sub-blocks accumulated, {} dropped",
        stats.accumulated, stats.dropped
    );
    if stats.dropped > 0 {
        warn!(
            "{} element sub-blocks had no entry in the sparsity pattern and were dropped",
            stats.dropped
        );
    }
}

/// A serial assembler of element arrays into a [`DistributedMatrix`].
#[derive(Debug)]
pub struct SystemAssembler<T> {
    // Reused across passes to avoid repeated allocation
    workspace: RefCell<ElementWorkspace<T>>,
}

impl<T> Default for SystemAssembler<T> {
    fn default() -> Self {
        Self {
            workspace: RefCell::new(ElementWorkspace::default()),
        }
    }
}

impl<T: Real> SystemAssembler<T> {
    /// Accumulates all elements of the assembler, in order.
    pub fn assemble_into(
        &self,
        matrix: &mut DistributedMatrix<T>,
        element_assembler: &dyn ElementArrayAssembler<T>,
    ) -> Result<ScatterStats, AssemblyError> {
        self.assemble_elements_into(matrix, element_assembler, 0..element_assembler.num_elements())
    }

    /// Accumulates the given elements, in the order given.
    pub fn assemble_elements_into(
        &self,
        matrix: &mut DistributedMatrix<T>,
        element_assembler: &dyn ElementArrayAssembler<T>,
        elements: impl IntoIterator<Item = usize>,
    ) -> Result<ScatterStats, AssemblyError> {
        let ws = &mut *self.workspace.borrow_mut();
        let num_elements = element_assembler.num_elements();
        let (num_equ, num_sol) = (element_assembler.num_equations(), element_assembler.num_solutions());

        let mut stats = ScatterStats::default();
        for element_index in elements {
            if element_index >= num_elements {
                return Err(ConfigError::ElementOutOfBounds {
                    element: element_index,
                    num_elements,
                }
                .into());
            }
            ws.gather(element_assembler, element_index)?;
            stats += matrix.add(
                &ws.equation_nodes,
                num_equ,
                &ws.solution_nodes,
                num_sol,
                &ws.element_array,
            )?;
        }
        log_pass_summary(&stats);
        Ok(stats)
    }
}

/// Tile access shared by all workers of one color.
///
/// Each worker obtains its own [`ElementTileSink`] through the unsafe
/// [`ParallelBlockSink::element_sink`].
struct ParallelBlockSink<'a, T> {
    block_size: usize,
    main: ParallelSliceAccess<'a, T>,
    col_couple: ParallelSliceAccess<'a, T>,
    row_couple: ParallelSliceAccess<'a, T>,
}

impl<'a, T> ParallelBlockSink<'a, T> {
    /// # Safety
    ///
    /// Sinks that are alive at the same time must only be used to write tiles in the major
    /// lanes of pairwise disjoint major nodes.
    unsafe fn element_sink(&self) -> ElementTileSink<'_, 'a, T> {
        ElementTileSink { shared: self }
    }
}

struct ElementTileSink<'s, 'a, T> {
    shared: &'s ParallelBlockSink<'a, T>,
}

impl<'s, 'a, T> TileSink<T> for ElementTileSink<'s, 'a, T> {
    #[inline]
    fn tile_mut(&mut self, block: BlockKind, slot: usize) -> &mut [T] {
        let access = match block {
            BlockKind::Main => &self.shared.main,
            BlockKind::ColCouple => &self.shared.col_couple,
            BlockKind::RowCouple => &self.shared.row_couple,
        };
        let block_size = self.shared.block_size;
        // Sound by the contract of `element_sink`: tiles of distinct major lanes occupy
        // disjoint slot ranges.
        unsafe { access.subslice_mut(slot * block_size..(slot + 1) * block_size) }
    }
}

/// A parallel assembler of element arrays into a [`DistributedMatrix`], driven by an
/// [`ElementColoring`].
///
/// Colors are processed one after another. The elements of a color are processed in parallel
/// and write straight into the value buffers of the matrix.
#[derive(Debug)]
pub struct SystemParAssembler<T: Send> {
    workspace: ThreadLocal<RefCell<ElementWorkspace<T>>>,
}

impl<T: Send> Default for SystemParAssembler<T> {
    fn default() -> Self {
        Self {
            workspace: Default::default(),
        }
    }
}

impl<T: Real> SystemParAssembler<T> {
    pub fn assemble_into(
        &self,
        matrix: &mut DistributedMatrix<T>,
        coloring: &ElementColoring,
        element_assembler: &(dyn Sync + ElementArrayAssembler<T>),
    ) -> Result<ScatterStats, AssemblyError> {
        let order = matrix.storage_order();
        if coloring.storage_order() != order {
            return Err(ConfigError::ColoringOrderMismatch {
                coloring: coloring.storage_order(),
                matrix: order,
            }
            .into());
        }
        let num_elements = element_assembler.num_elements();
        let (num_equ, num_sol) = (element_assembler.num_equations(), element_assembler.num_solutions());

        let (layout, values) = matrix.split_for_scatter();
        layout.subblocks(num_equ, num_sol)?;
        let block_size = values.block_size();
        let [main, col_couple, row_couple] = values.into_slices();
        let sink = ParallelBlockSink {
            block_size,
            main: ParallelSliceAccess::new(main),
            col_couple: ParallelSliceAccess::new(col_couple),
            row_couple: ParallelSliceAccess::new(row_couple),
        };

        let mut stats = ScatterStats::default();
        for (color, subsets) in coloring.colors() {
            debug!("Assembling color {} ({} elements)", color, subsets.len());
            stats += subsets
                .par_iter()
                .map(|(element_index, color_nodes)| {
                    if element_index >= num_elements {
                        return Err(AssemblyError::from(ConfigError::ElementOutOfBounds {
                            element: element_index,
                            num_elements,
                        }));
                    }
                    let ws = &mut *self.workspace.get_or_default().borrow_mut();
                    ws.gather(element_assembler, element_index)?;

                    // Compare against the very buffers the scatter below writes through
                    let (major_nodes, _) = order.major_minor(&ws.equation_nodes[..], &ws.solution_nodes[..]);
                    if major_nodes != color_nodes {
                        return Err(ConfigError::ColoringConnectivityMismatch { element: element_index }.into());
                    }

                    validate_element(
                        &layout,
                        &ws.equation_nodes,
                        num_equ,
                        &ws.solution_nodes,
                        num_sol,
                        ws.element_array.len(),
                    )?;
                    // The major nodes of this element equal its subset of the color, and
                    // subsets of one color are disjoint
                    let mut element_sink = unsafe { sink.element_sink() };
                    Ok(scatter_element(
                        &layout,
                        &mut element_sink,
                        &ws.equation_nodes,
                        num_equ,
                        &ws.solution_nodes,
                        num_sol,
                        &ws.element_array,
                    ))
                })
                .try_reduce(ScatterStats::default, |a, b| Ok(a + b))?;
        }
        log_pass_summary(&stats);
        Ok(stats)
    }
}
