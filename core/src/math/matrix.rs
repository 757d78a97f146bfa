use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array2, ArrayView2};
use num_complex::Complex32;

pub struct MatrixHelper;

impl MatrixHelper {
    pub fn to_dmatrix(view: ArrayView2<Complex32>) -> DMatrix<Complex32> {
        DMatrix::from_fn(view.nrows(), view.ncols(), |r, c| view[[r, c]])
    }

    pub fn to_array(matrix: &DMatrix<Complex32>) -> Array2<Complex32> {
        Array2::from_shape_fn((matrix.nrows(), matrix.ncols()), |(r, c)| matrix[(r, c)])
    }

    /// Unnormalised Gram matrix `XᴴX` of column-observations.
    pub fn gram(data: &DMatrix<Complex32>) -> DMatrix<Complex32> {
        data.adjoint() * data
    }

    /// Orthonormal basis (as columns) of the `components` eigenvectors of a
    /// Hermitian matrix with the largest eigenvalues.
    pub fn dominant_subspace(hermitian: DMatrix<Complex32>, components: usize) -> DMatrix<Complex32> {
        let n = hermitian.nrows();
        let components = components.min(n);
        if components == 0 {
            return DMatrix::zeros(n, 0);
        }

        let eigen = SymmetricEigen::new(hermitian);
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));

        DMatrix::from_fn(n, components, |r, c| eigen.eigenvectors[(r, order[c])])
    }
}
