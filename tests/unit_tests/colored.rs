use crate::{test_system_strategy, TestSystem};
use blocksys::assembly::{
    ElementArrayAssembler, ElementArrays, ElementColoring, ElementConnectivity, ScatterStats, SystemAssembler,
    SystemParAssembler,
};
use blocksys::error::{AssemblyError, ConfigError};
use blocksys::matrix::{BlockKind, LocalExtents, MatrixFormat, StorageOrder};
use blocksys::pattern::IndexBase;
use eyre::eyre;
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

/// Segments of a chain of nodes: element `i` connects nodes `i` and `i + 1`.
fn chain_elements(num_elements: usize) -> ElementArrays<f64> {
    let mut elements = ElementArrays::new(1, 1);
    for i in 0..num_elements {
        let nodes = [i, i + 1];
        elements
            .push(&nodes, &nodes, &[1.0, -1.0, -1.0, 1.0])
            .unwrap();
    }
    elements
}

/// Delegates to wrapped element arrays, but fails for one element.
struct FailingAssembler {
    elements: ElementArrays<f64>,
    failing_element: usize,
}

impl ElementConnectivity for FailingAssembler {
    fn num_elements(&self) -> usize {
        self.elements.num_elements()
    }

    fn equation_node_count(&self, element_index: usize) -> usize {
        self.elements.equation_node_count(element_index)
    }

    fn solution_node_count(&self, element_index: usize) -> usize {
        self.elements.solution_node_count(element_index)
    }

    fn populate_equation_nodes(&self, output: &mut [usize], element_index: usize) {
        self.elements.populate_equation_nodes(output, element_index)
    }

    fn populate_solution_nodes(&self, output: &mut [usize], element_index: usize) {
        self.elements.populate_solution_nodes(output, element_index)
    }
}

impl ElementArrayAssembler<f64> for FailingAssembler {
    fn num_equations(&self) -> usize {
        self.elements.num_equations()
    }

    fn num_solutions(&self) -> usize {
        self.elements.num_solutions()
    }

    fn assemble_element_array_into(&self, output: &mut [f64], element_index: usize) -> eyre::Result<()> {
        if element_index == self.failing_element {
            Err(eyre!("element {} is degenerate", element_index))
        } else {
            self.elements.assemble_element_array_into(output, element_index)
        }
    }
}

/// One node per element, until `collapsed` is set: from then on every element reports node 0.
struct CollapsingConnectivity {
    num_elements: usize,
    collapsed: AtomicBool,
}

impl CollapsingConnectivity {
    fn node(&self, element_index: usize) -> usize {
        if self.collapsed.load(Ordering::Relaxed) {
            0
        } else {
            element_index
        }
    }
}

impl ElementConnectivity for CollapsingConnectivity {
    fn num_elements(&self) -> usize {
        self.num_elements
    }

    fn equation_node_count(&self, _element_index: usize) -> usize {
        1
    }

    fn solution_node_count(&self, _element_index: usize) -> usize {
        1
    }

    fn populate_equation_nodes(&self, output: &mut [usize], element_index: usize) {
        output[0] = self.node(element_index);
    }

    fn populate_solution_nodes(&self, output: &mut [usize], element_index: usize) {
        output[0] = self.node(element_index);
    }
}

impl ElementArrayAssembler<f64> for CollapsingConnectivity {
    fn num_equations(&self) -> usize {
        1
    }

    fn num_solutions(&self) -> usize {
        1
    }

    fn assemble_element_array_into(&self, output: &mut [f64], _element_index: usize) -> eyre::Result<()> {
        output[0] = 1.0;
        Ok(())
    }
}

#[test]
fn greedy_chain_coloring_alternates() {
    let elements = chain_elements(4);
    let coloring = ElementColoring::greedy(&elements, StorageOrder::RowMajor);
    assert_eq!(coloring.num_colors(), 2);
    assert_eq!(coloring.min_color(), 0);
    assert_eq!(coloring.max_color(), Some(1));
    assert_eq!(coloring.color(0).unwrap().labels(), &[0, 2]);
    assert_eq!(coloring.color(1).unwrap().labels(), &[1, 3]);
    assert!(coloring.color(2).is_none());
}

#[test]
fn element_colors_from_mesh_are_validated() {
    let elements = chain_elements(4);
    let coloring = ElementColoring::try_from_element_colors(&[3, 4, 3, 4], &elements, StorageOrder::ColMajor).unwrap();
    assert_eq!(coloring.min_color(), 3);
    assert_eq!(coloring.max_color(), Some(4));
    assert_eq!(coloring.color(3).unwrap().labels(), &[0, 2]);
    assert!(coloring.color(0).is_none());

    // Elements 1 and 2 share node 2
    assert_eq!(
        ElementColoring::try_from_element_colors(&[0, 1, 1, 0], &elements, StorageOrder::RowMajor),
        Err(ConfigError::ColorConflict { color: 1, node: 2 })
    );
    assert_eq!(
        ElementColoring::try_from_element_colors(&[0, 1], &elements, StorageOrder::RowMajor),
        Err(ConfigError::ColorCount { expected: 4, actual: 2 })
    );

    let empty = ElementArrays::<f64>::new(1, 1);
    let coloring = ElementColoring::try_from_element_colors(&[], &empty, StorageOrder::RowMajor).unwrap();
    assert_eq!(coloring.num_colors(), 0);
    assert_eq!(coloring.max_color(), None);
}

#[test]
fn parallel_assembly_rejects_mismatched_colorings() {
    let elements = chain_elements(2);
    let system = TestSystem {
        extents: LocalExtents {
            num_my_rows: 3,
            num_my_cols: 3,
            num_ghost_rows: 0,
            num_ghost_cols: 0,
        },
        row_block_size: 1,
        col_block_size: 1,
        elements,
    };
    let mut matrix = system.allocate(MatrixFormat::default());
    let assembler = SystemParAssembler::default();

    let col_major_coloring = ElementColoring::greedy(&system.elements, StorageOrder::ColMajor);
    let result = assembler.assemble_into(&mut matrix, &col_major_coloring, &system.elements);
    assert!(matches!(
        result,
        Err(AssemblyError::Config(ConfigError::ColoringOrderMismatch {
            coloring: StorageOrder::ColMajor,
            matrix: StorageOrder::RowMajor
        }))
    ));

    // Both elements in one color is only valid if they do not share equation nodes
    let mut disjoint = ElementArrays::new(1, 1);
    disjoint.push(&[0], &[0], &[1.0]).unwrap();
    disjoint.push(&[1], &[1], &[1.0]).unwrap();
    let mut overlapping = ElementArrays::new(1, 1);
    overlapping.push(&[0], &[0], &[1.0]).unwrap();
    overlapping.push(&[0], &[1], &[1.0]).unwrap();
    let coloring = ElementColoring::greedy(&disjoint, StorageOrder::RowMajor);
    assert_eq!(coloring.num_colors(), 1);
    let result = assembler.assemble_into(&mut matrix, &coloring, &overlapping);
    assert!(matches!(
        result,
        Err(AssemblyError::Config(ConfigError::ColoringConnectivityMismatch { element: 1 }))
    ));

    let mut three = ElementArrays::new(1, 1);
    for node in 0..3 {
        three.push(&[node], &[node], &[1.0]).unwrap();
    }
    let coloring = ElementColoring::greedy(&three, StorageOrder::RowMajor);
    let result = assembler.assemble_into(&mut matrix, &coloring, &disjoint);
    assert!(matches!(
        result,
        Err(AssemblyError::Config(ConfigError::ElementOutOfBounds {
            element: 2,
            num_elements: 2
        }))
    ));
}

#[test]
fn parallel_assembly_checks_coloring_against_the_nodes_it_writes() {
    let num_elements = 64;
    let mut diagonal = ElementArrays::new(1, 1);
    for node in 0..num_elements {
        diagonal.push(&[node], &[node], &[1.0]).unwrap();
    }
    let system = TestSystem {
        extents: LocalExtents {
            num_my_rows: num_elements,
            num_my_cols: num_elements,
            num_ghost_rows: 0,
            num_ghost_cols: 0,
        },
        row_block_size: 1,
        col_block_size: 1,
        elements: diagonal,
    };
    let assembler = SystemParAssembler::default();

    for order in [StorageOrder::RowMajor, StorageOrder::ColMajor] {
        let connectivity = CollapsingConnectivity {
            num_elements,
            collapsed: AtomicBool::new(false),
        };
        let coloring = ElementColoring::greedy(&connectivity, order);
        assert_eq!(coloring.num_colors(), 1);

        // All elements now write to node 0, although the coloring says they are disjoint
        connectivity.collapsed.store(true, Ordering::Relaxed);
        let mut matrix = system.allocate(MatrixFormat::new(order, IndexBase::Zero));
        let result = assembler.assemble_into(&mut matrix, &coloring, &connectivity);
        assert!(matches!(
            result,
            Err(AssemblyError::Config(ConfigError::ColoringConnectivityMismatch { .. }))
        ));
    }
}

#[test]
fn element_failures_are_reported_with_their_index() {
    let failing = FailingAssembler {
        elements: chain_elements(3),
        failing_element: 1,
    };
    let system = TestSystem {
        extents: LocalExtents {
            num_my_rows: 4,
            num_my_cols: 4,
            num_ghost_rows: 0,
            num_ghost_cols: 0,
        },
        row_block_size: 1,
        col_block_size: 1,
        elements: chain_elements(3),
    };
    let mut matrix = system.allocate(MatrixFormat::default());

    let coloring = ElementColoring::greedy(&failing, StorageOrder::RowMajor);
    let result = SystemParAssembler::default().assemble_into(&mut matrix, &coloring, &failing);
    assert!(matches!(result, Err(AssemblyError::Element { element: 1, .. })));

    let result = SystemAssembler::default().assemble_into(&mut matrix, &failing);
    let err = result.unwrap_err();
    assert!(matches!(err, AssemblyError::Element { element: 1, .. }));
    assert!(err.to_string().contains("degenerate"));
}

#[test]
fn chain_assembly_in_parallel() {
    let num_elements = 50;
    let elements = chain_elements(num_elements);
    // The last node is owned by a neighbouring rank
    let system = TestSystem {
        extents: LocalExtents {
            num_my_rows: num_elements,
            num_my_cols: num_elements,
            num_ghost_rows: 1,
            num_ghost_cols: 1,
        },
        row_block_size: 1,
        col_block_size: 1,
        elements,
    };
    let mut matrix = system.allocate(MatrixFormat::new(StorageOrder::RowMajor, IndexBase::One));
    let coloring = ElementColoring::greedy(&system.elements, StorageOrder::RowMajor);
    let stats = SystemParAssembler::default()
        .assemble_into(&mut matrix, &coloring, &system.elements)
        .unwrap();

    assert_eq!(stats.dropped, 0);
    // Every element touches 4 pairs, except that the ghost x ghost pair of the last is skipped
    assert_eq!(stats.accumulated, 4 * num_elements - 1);
    assert_eq!(matrix.col_couple_block().values(), &[-1.0]);
    assert_eq!(matrix.row_couple_block().values(), &[-1.0]);
    let main_values = matrix.block(BlockKind::Main).values();
    assert_eq!(main_values[0], 1.0);
    // Element arrays sum to zero, so the main block holds minus what went elsewhere
    assert_eq!(main_values.iter().sum::<f64>(), 1.0);
}

proptest! {
    #[test]
    fn colored_parallel_assembly_is_order_invariant(system in test_system_strategy(), col_major in any::<bool>()) {
        let order = if col_major { StorageOrder::ColMajor } else { StorageOrder::RowMajor };
        let format = MatrixFormat::new(order, IndexBase::Zero);
        let coloring = ElementColoring::greedy(&system.elements, order);

        // Elements of a color write to disjoint major nodes
        for (_, subsets) in coloring.colors() {
            let mut seen = HashSet::new();
            for (element, nodes) in subsets.iter() {
                let unique: HashSet<_> = nodes.iter().copied().collect();
                prop_assert!(unique.is_disjoint(&seen), "element {} overlaps", element);
                seen.extend(unique);
            }
        }

        let mut parallel = system.allocate(format);
        let par_stats = SystemParAssembler::default()
            .assemble_into(&mut parallel, &coloring, &system.elements)
            .unwrap();

        let mut serial = system.allocate(format);
        let assembler = SystemAssembler::default();
        let mut serial_stats = ScatterStats::default();
        for (_, subsets) in coloring.colors() {
            serial_stats += assembler
                .assemble_elements_into(&mut serial, &system.elements, subsets.labels().iter().rev().copied())
                .unwrap();
        }

        prop_assert_eq!(par_stats, serial_stats);
        for kind in BlockKind::ALL {
            let par_bits: Vec<u64> = parallel.block(kind).values().iter().map(|v| v.to_bits()).collect();
            let serial_bits: Vec<u64> = serial.block(kind).values().iter().map(|v| v.to_bits()).collect();
            prop_assert_eq!(par_bits, serial_bits);
        }
    }
}
