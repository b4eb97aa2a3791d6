//! Mesh contract consumed by the ghosting core.
//!
//! A [`Mesh`] is deliberately small: point coordinates, cell-to-point
//! connectivity (unstructured) or logical cell dimensions (structured), and
//! named per-point / per-cell [`DataArray`]s. Readers build these, the ghosting
//! passes append ghost flags and exchanged data to them, and downstream
//! filters consume them as locally complete datasets.

pub mod array;
pub mod material;

pub use array::{ArrayValues, DataArray, Element, ElementTag};
pub use material::{Material, MixedVariable};

use std::collections::BTreeMap;

/// Cell shapes, numbered as in the VTK cell-type table.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum CellType {
    Vertex = 1,
    Line = 3,
    Triangle = 5,
    Polygon = 7,
    Quad = 9,
    Tetra = 10,
    Hexahedron = 12,
    Wedge = 13,
    Pyramid = 14,
}

impl CellType {
    pub fn from_u8(raw: u8) -> Option<Self> {
        Some(match raw {
            1 => CellType::Vertex,
            3 => CellType::Line,
            5 => CellType::Triangle,
            7 => CellType::Polygon,
            9 => CellType::Quad,
            10 => CellType::Tetra,
            12 => CellType::Hexahedron,
            13 => CellType::Wedge,
            14 => CellType::Pyramid,
            _ => return None,
        })
    }

    /// Fixed point count, or `None` for polygons.
    pub fn num_points(self) -> Option<usize> {
        match self {
            CellType::Vertex => Some(1),
            CellType::Line => Some(2),
            CellType::Triangle => Some(3),
            CellType::Polygon => None,
            CellType::Quad | CellType::Tetra => Some(4),
            CellType::Pyramid => Some(5),
            CellType::Wedge => Some(6),
            CellType::Hexahedron => Some(8),
        }
    }
}

/// One unstructured cell: shape plus local point indices.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Cell {
    pub cell_type: CellType,
    pub points: Vec<usize>,
}

impl Cell {
    pub fn new(cell_type: CellType, points: Vec<usize>) -> Self {
        Self { cell_type, points }
    }
}

/// How cells are described.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum MeshTopology {
    /// Logically rectangular block; cells are implicit, `i` fastest.
    Structured { cell_dims: [usize; 3] },
    /// Explicit connectivity.
    Unstructured { cells: Vec<Cell> },
}

/// One domain's dataset.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Mesh {
    pub points: Vec<[f64; 3]>,
    pub topology: MeshTopology,
    pub point_data: BTreeMap<String, DataArray>,
    pub cell_data: BTreeMap<String, DataArray>,
}

impl Mesh {
    /// Unstructured mesh from points and cells.
    pub fn unstructured(points: Vec<[f64; 3]>, cells: Vec<Cell>) -> Self {
        Self {
            points,
            topology: MeshTopology::Unstructured { cells },
            point_data: BTreeMap::new(),
            cell_data: BTreeMap::new(),
        }
    }

    /// Structured block with `cell_dims` cells per axis (use 1 for unused axes).
    /// Point coordinates are optional for the ghosting core and left empty.
    pub fn structured(cell_dims: [usize; 3]) -> Self {
        Self {
            points: Vec::new(),
            topology: MeshTopology::Structured { cell_dims },
            point_data: BTreeMap::new(),
            cell_data: BTreeMap::new(),
        }
    }

    pub fn num_points(&self) -> usize {
        match &self.topology {
            MeshTopology::Structured { cell_dims } if self.points.is_empty() => {
                cell_dims.iter().map(|d| d + 1).product()
            }
            _ => self.points.len(),
        }
    }

    pub fn num_cells(&self) -> usize {
        match &self.topology {
            MeshTopology::Structured { cell_dims } => cell_dims.iter().product(),
            MeshTopology::Unstructured { cells } => cells.len(),
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self.topology, MeshTopology::Structured { .. })
    }

    /// Explicit cells; empty for structured meshes.
    pub fn cells(&self) -> &[Cell] {
        match &self.topology {
            MeshTopology::Unstructured { cells } => cells,
            MeshTopology::Structured { .. } => &[],
        }
    }

    pub fn cells_mut(&mut self) -> Option<&mut Vec<Cell>> {
        match &mut self.topology {
            MeshTopology::Unstructured { cells } => Some(cells),
            MeshTopology::Structured { .. } => None,
        }
    }

    pub fn point_array(&self, name: &str) -> Option<&DataArray> {
        self.point_data.get(name)
    }

    pub fn cell_array(&self, name: &str) -> Option<&DataArray> {
        self.cell_data.get(name)
    }

    pub fn set_point_array(&mut self, name: impl Into<String>, array: DataArray) {
        self.point_data.insert(name.into(), array);
    }

    pub fn set_cell_array(&mut self, name: impl Into<String>, array: DataArray) {
        self.cell_data.insert(name.into(), array);
    }

    /// Shape fingerprint used to detect topology changes between executions.
    pub fn shape(&self) -> (usize, usize) {
        (self.num_points(), self.num_cells())
    }
}
