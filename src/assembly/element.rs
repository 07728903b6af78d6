use crate::assembly::ElementShape;
use crate::error::ConfigError;
use nalgebra::Scalar;
use std::ops::Range;

/// Element-to-node connectivity of the equation and solution spaces.
pub trait ElementConnectivity {
    fn num_elements(&self) -> usize;

    fn equation_node_count(&self, element_index: usize) -> usize;

    fn solution_node_count(&self, element_index: usize) -> usize;

    fn populate_equation_nodes(&self, output: &mut [usize], element_index: usize);

    fn populate_solution_nodes(&self, output: &mut [usize], element_index: usize);
}

/// A source of dense element arrays, shaped `(num_equ, num_sol, nn_equ, nn_sol)`.
pub trait ElementArrayAssembler<T: Scalar>: ElementConnectivity {
    /// Degrees of freedom per equation node.
    fn num_equations(&self) -> usize;

    /// Degrees of freedom per solution node.
    fn num_solutions(&self) -> usize;

    /// Writes the element array of the given element into `output`.
    ///
    /// `output` has the length given by the element shape and is zeroed beforehand.
    fn assemble_element_array_into(&self, output: &mut [T], element_index: usize) -> eyre::Result<()>;

    fn element_shape(&self, element_index: usize) -> ElementShape {
        ElementShape {
            num_equ: self.num_equations(),
            num_sol: self.num_solutions(),
            nn_equ: self.equation_node_count(element_index),
            nn_sol: self.solution_node_count(element_index),
        }
    }
}

/// Precomputed element arrays together with their connectivity.
///
/// Node lists and arrays of all elements are stored back to back in flat buffers.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementArrays<T> {
    num_equ: usize,
    num_sol: usize,
    equation_offsets: Vec<usize>,
    equation_nodes: Vec<usize>,
    solution_offsets: Vec<usize>,
    solution_nodes: Vec<usize>,
    array_offsets: Vec<usize>,
    arrays: Vec<T>,
}

impl<T: Scalar> ElementArrays<T> {
    pub fn new(num_equ: usize, num_sol: usize) -> Self {
        Self {
            num_equ,
            num_sol,
            equation_offsets: vec![0],
            equation_nodes: Vec::new(),
            solution_offsets: vec![0],
            solution_nodes: Vec::new(),
            array_offsets: vec![0],
            arrays: Vec::new(),
        }
    }

    /// Appends an element. The array must have length `num_equ * num_sol * nn_equ * nn_sol`.
    pub fn push(&mut self, equation_nodes: &[usize], solution_nodes: &[usize], array: &[T]) -> Result<(), ConfigError> {
        let shape = ElementShape {
            num_equ: self.num_equ,
            num_sol: self.num_sol,
            nn_equ: equation_nodes.len(),
            nn_sol: solution_nodes.len(),
        };
        if shape.len() != array.len() {
            return Err(ConfigError::ElementArrayLength {
                expected: shape.len(),
                actual: array.len(),
            });
        }
        self.equation_nodes.extend_from_slice(equation_nodes);
        self.equation_offsets.push(self.equation_nodes.len());
        self.solution_nodes.extend_from_slice(solution_nodes);
        self.solution_offsets.push(self.solution_nodes.len());
        self.arrays.extend_from_slice(array);
        self.array_offsets.push(self.arrays.len());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.array_offsets.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_equ(&self) -> usize {
        self.num_equ
    }

    pub fn num_sol(&self) -> usize {
        self.num_sol
    }

    pub fn equation_nodes(&self, element_index: usize) -> &[usize] {
        &self.equation_nodes[lane(&self.equation_offsets, element_index)]
    }

    pub fn solution_nodes(&self, element_index: usize) -> &[usize] {
        &self.solution_nodes[lane(&self.solution_offsets, element_index)]
    }

    pub fn array(&self, element_index: usize) -> &[T] {
        &self.arrays[lane(&self.array_offsets, element_index)]
    }

    /// The same elements with equation and solution roles swapped and every array transposed.
    pub fn transposed(&self) -> Self
    where
        T: Copy,
    {
        let mut result = Self::new(self.num_sol, self.num_equ);
        for element_index in 0..self.len() {
            let shape = self.element_shape(element_index);
            let array = shape.transpose_array(self.array(element_index));
            result.equation_nodes.extend_from_slice(self.solution_nodes(element_index));
            result.equation_offsets.push(result.equation_nodes.len());
            result.solution_nodes.extend_from_slice(self.equation_nodes(element_index));
            result.solution_offsets.push(result.solution_nodes.len());
            result.arrays.extend_from_slice(&array);
            result.array_offsets.push(result.arrays.len());
        }
        result
    }
}

fn lane(offsets: &[usize], index: usize) -> Range<usize> {
    offsets[index]..offsets[index + 1]
}

impl<T: Scalar> ElementConnectivity for ElementArrays<T> {
    fn num_elements(&self) -> usize {
        self.len()
    }

    fn equation_node_count(&self, element_index: usize) -> usize {
        self.equation_nodes(element_index).len()
    }

    fn solution_node_count(&self, element_index: usize) -> usize {
        self.solution_nodes(element_index).len()
    }

    fn populate_equation_nodes(&self, output: &mut [usize], element_index: usize) {
        output.copy_from_slice(self.equation_nodes(element_index));
    }

    fn populate_solution_nodes(&self, output: &mut [usize], element_index: usize) {
        output.copy_from_slice(self.solution_nodes(element_index));
    }
}

impl<T: Scalar> ElementArrayAssembler<T> for ElementArrays<T> {
    fn num_equations(&self) -> usize {
        self.num_equ
    }

    fn num_solutions(&self) -> usize {
        self.num_sol
    }

    fn assemble_element_array_into(&self, output: &mut [T], element_index: usize) -> eyre::Result<()> {
        output.clone_from_slice(self.array(element_index));
        Ok(())
    }
}
