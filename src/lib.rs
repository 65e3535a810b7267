//! Static k-d tree with exact nearest-neighbor search.
//!
//! ```
//! use kdtree_nn::{KdTree, PointSet};
//!
//! let points = PointSet::new(vec![vec![0.0, 0.0], vec![10.0, 0.0], vec![5.0, 5.0]]).unwrap();
//! let tree = KdTree::build(points).unwrap();
//! assert_eq!(tree.get_nearest(&[5.0, 6.0]).unwrap(), 2);
//! ```

pub mod common_types;
pub mod error;
pub mod knn;
pub mod text_format;

pub use common_types::{squared_distance, NodeIndex, PointSet, INVALID_IDX};
pub use error::KdTreeError;
pub use knn::brute_force;
pub use knn::kd_tree::{KdTree, Node};
pub use knn::search::Neighbor;

/// Python bindings, built with `--features python` (maturin builds use `extension-module`).
#[cfg(feature = "python")]
mod python {
    use pyo3::exceptions::{PyIOError, PyValueError};
    use pyo3::prelude::*;

    use crate::common_types::PointSet;
    use crate::error::KdTreeError;
    use crate::knn::brute_force;
    use crate::knn::kd_tree::KdTree;
    use crate::text_format::{read_tree, write_tree};

    impl From<KdTreeError> for PyErr {
        fn from(err: KdTreeError) -> PyErr {
            match err {
                KdTreeError::Io(e) => PyIOError::new_err(e.to_string()),
                other => PyValueError::new_err(other.to_string()),
            }
        }
    }

    #[pyclass(name = "KdTree")]
    struct PyKdTree {
        tree: KdTree<f64>,
    }

    #[pymethods]
    impl PyKdTree {
        #[new]
        fn new(points: Vec<Vec<f64>>) -> PyResult<Self> {
            let tree = KdTree::build(PointSet::new(points)?)?;
            Ok(PyKdTree { tree })
        }

        fn get_nearest(&self, target: Vec<f64>) -> PyResult<usize> {
            Ok(self.tree.get_nearest(&target)?)
        }

        /// Returns `(index, distance)` of the closest point.
        fn nearest(&self, target: Vec<f64>) -> PyResult<(usize, f64)> {
            let found = self.tree.nearest(&target)?;
            Ok((found.index, found.distance()))
        }

        fn to_text(&self) -> PyResult<String> {
            let mut out = Vec::new();
            write_tree(&mut out, &self.tree)?;
            String::from_utf8(out).map_err(|e| PyValueError::new_err(e.to_string()))
        }

        #[staticmethod]
        fn from_text(text: &str) -> PyResult<Self> {
            let tree = read_tree(std::io::Cursor::new(text))?;
            Ok(PyKdTree { tree })
        }

        #[getter]
        fn dimension(&self) -> usize {
            self.tree.dimension()
        }

        #[getter]
        fn depth(&self) -> usize {
            self.tree.depth()
        }

        fn __len__(&self) -> usize {
            self.tree.len()
        }
    }

    /// Linear scan over `points`, for checking tree results from Python.
    #[pyfunction]
    fn brute_force_nearest(points: Vec<Vec<f64>>, target: Vec<f64>) -> PyResult<(usize, f64)> {
        let points = PointSet::new(points)?;
        let found = brute_force::nearest(&points, &target)?;
        Ok((found.index, found.distance()))
    }

    #[pymodule]
    fn kdtree_nn(_py: Python<'_>, m: &Bound<'_, PyModule>) -> PyResult<()> {
        m.add_class::<PyKdTree>()?;
        m.add_function(wrap_pyfunction!(brute_force_nearest, m)?)?;
        Ok(())
    }
}
