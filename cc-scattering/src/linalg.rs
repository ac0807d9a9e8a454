use core::slice;

use faer::{
    Accum, Mat, MatMut, MatRef, Par,
    dyn_stack::{MemBuffer, MemStack, StackReq},
    linalg::{
        self, cholesky, lu, matmul::matmul, temp_mat_scratch, temp_mat_uninit, temp_mat_zeroed,
    },
    mat,
    perm::PermRef,
    unzip, zip,
};

use crate::error::SolverError;

/// Pivots smaller than this fraction of the largest input entry are treated as zero.
const SINGULAR_RELATIVE_EPSILON: f64 = 1e-14;

pub fn get_lblt_inverse_buffer(size: usize) -> MemBuffer {
    MemBuffer::new(
        temp_mat_scratch::<f64>(size, size)
            .and(temp_mat_scratch::<f64>(size, 1))
            .and(temp_mat_scratch::<f64>(size, 1))
            .and(StackReq::new::<usize>(2 * size))
            .and(
                cholesky::lblt::factor::cholesky_in_place_scratch::<usize, f64>(
                    size,
                    Par::Seq,
                    Default::default(),
                )
                .or(cholesky::lblt::inverse::inverse_scratch::<usize, f64>(
                    size,
                    Par::Seq,
                )),
            ),
    )
}

pub fn get_lu_inverse_buffer(size: usize) -> MemBuffer {
    MemBuffer::new(
        temp_mat_scratch::<f64>(size, size)
            .and(temp_mat_scratch::<f64>(size, size))
            .and(StackReq::new::<usize>(2 * size))
            .and(
                lu::partial_pivoting::factor::lu_in_place_scratch::<usize, f64>(
                    size,
                    size,
                    Par::Seq,
                    Default::default(),
                )
                .or(lu::partial_pivoting::inverse::inverse_scratch::<usize, f64>(
                    size,
                    Par::Seq,
                )),
            ),
    )
}

/// Inverts a general square matrix with partially pivoted LU,
/// failing on a vanishing pivot of U.
pub fn inverse_lu_inplace(
    mat: MatRef<f64>,
    mut out: MatMut<f64>,
    buffer: &mut MemBuffer,
    operation: &'static str,
) -> Result<(), SolverError> {
    assert!(mat.nrows() == mat.ncols());
    let dim: usize = mat.nrows();
    if dim == 0 {
        return Ok(());
    }

    let scale = max_abs(mat);
    zip!(out.as_mut(), mat).for_each(|unzip!(o, m)| *o = *m);

    let stack = MemStack::new(buffer);

    let (mut l, stack) = unsafe { temp_mat_uninit::<f64, _, _>(dim, dim, stack) };
    let mut l = mat::AsMatMut::as_mat_mut(&mut l);

    let (mut u, stack) = temp_mat_zeroed::<f64, _, _>(dim, dim, stack);
    let mut u = mat::AsMatMut::as_mat_mut(&mut u);

    let (perm, stack) = stack.make_aligned_uninit::<usize>(dim, align_of::<usize>());
    let perm = unsafe { slice::from_raw_parts_mut(perm.as_mut_ptr() as *mut usize, dim) };
    let (perm_inv, stack) = stack.make_aligned_uninit::<usize>(dim, align_of::<usize>());
    let perm_inv = unsafe { slice::from_raw_parts_mut(perm_inv.as_mut_ptr() as *mut usize, dim) };

    lu::partial_pivoting::factor::lu_in_place(
        out.as_mut(),
        perm,
        perm_inv,
        Par::Seq,
        stack,
        Default::default(),
    );

    for i in 0..dim {
        if is_vanishing_pivot(out[(i, i)], scale) {
            return Err(SolverError::Singular {
                operation,
                pivot: i + 1,
            });
        }
    }

    u.copy_from_triangular_upper(&out);

    zip!(&mut l, &out).for_each_triangular_lower(linalg::zip::Diag::Skip, |unzip!(l, o)| *l = *o);
    zip!(&mut l).for_each_triangular_upper(linalg::zip::Diag::Skip, |unzip!(x)| *x = 0.);
    l.as_mut().diagonal_mut().fill(1.);

    let perm_ref = unsafe { PermRef::new_unchecked(perm, perm_inv, dim) };

    lu::partial_pivoting::inverse::inverse(
        out.as_mut(),
        l.as_ref(),
        u.as_ref(),
        perm_ref,
        Par::Seq,
        stack,
    );

    check_finite(out.as_ref(), operation)
}

/// Inverts a symmetric matrix with the Bunch-Kaufman factorization,
/// reading only its lower triangle and writing a symmetric `out`.
pub fn inverse_lblt_inplace(
    mat: MatRef<f64>,
    mut out: MatMut<f64>,
    buffer: &mut MemBuffer,
    operation: &'static str,
) -> Result<(), SolverError> {
    assert!(mat.nrows() == mat.ncols());
    let dim: usize = mat.nrows();
    if dim == 0 {
        return Ok(());
    }

    let scale = max_abs(mat);
    let stack = MemStack::new(buffer);

    let (mut diag, stack) = unsafe { temp_mat_uninit::<f64, _, _>(dim, 1, stack) };
    let mut diag = mat::AsMatMut::as_mat_mut(&mut diag).col_mut(0).as_diagonal_mut();

    let (mut sub_diag, stack) = temp_mat_zeroed::<f64, _, _>(dim, 1, stack);
    let mut sub_diag = mat::AsMatMut::as_mat_mut(&mut sub_diag)
        .col_mut(0)
        .as_diagonal_mut();

    let (mut l, stack) = unsafe { temp_mat_uninit::<f64, _, _>(dim, dim, stack) };
    let mut l = mat::AsMatMut::as_mat_mut(&mut l);

    let (perm, stack) = stack.make_aligned_uninit::<usize>(dim, align_of::<usize>());
    let perm = unsafe { slice::from_raw_parts_mut(perm.as_mut_ptr() as *mut usize, dim) };
    let (perm_inv, stack) = stack.make_aligned_uninit::<usize>(dim, align_of::<usize>());
    let perm_inv = unsafe { slice::from_raw_parts_mut(perm_inv.as_mut_ptr() as *mut usize, dim) };

    zip!(&mut l, &mat).for_each(|unzip!(l, m)| *l = *m);
    cholesky::lblt::factor::cholesky_in_place(
        l.as_mut(),
        sub_diag.as_mut(),
        perm,
        perm_inv,
        Par::Seq,
        stack,
        Default::default(),
    );

    diag.copy_from(l.as_ref().diagonal());

    // a non-zero sub diagonal entry opens a 2x2 pivot block
    let mut block: Option<(f64, f64)> = None;
    for (i, (&d, &s)) in diag
        .as_ref()
        .column_vector()
        .iter()
        .zip(sub_diag.as_ref().column_vector().iter())
        .enumerate()
    {
        if let Some((a, s_block)) = block.take() {
            let det = a * d - s_block * s_block;
            if is_vanishing_pivot(det, scale * scale) {
                return Err(SolverError::Singular {
                    operation,
                    pivot: i,
                });
            }
            continue;
        }

        if s != 0. {
            block = Some((d, s));
        } else if is_vanishing_pivot(d, scale) {
            return Err(SolverError::Singular {
                operation,
                pivot: i + 1,
            });
        }
    }

    l.as_mut().diagonal_mut().fill(1.);
    zip!(&mut l).for_each_triangular_upper(linalg::zip::Diag::Skip, |unzip!(x)| *x = 0.);

    let perm_ref = unsafe { PermRef::new_unchecked(perm, perm_inv, dim) };

    cholesky::lblt::inverse::inverse(
        out.as_mut(),
        l.as_ref(),
        diag.as_ref(),
        sub_diag.as_ref(),
        perm_ref,
        Par::Seq,
        stack,
    );

    for j in 0..dim {
        for i in 0..j {
            out[(i, j)] = out[(j, i)];
        }
    }

    check_finite(out.as_ref(), operation)
}

/// Square linear solver reusing its factorization scratch between calls.
pub struct LinearSolver {
    inverse: Mat<f64>,
    product: Mat<f64>,
    buffer: MemBuffer,
}

impl LinearSolver {
    pub fn new(size: usize) -> Self {
        Self {
            inverse: Mat::zeros(size, size),
            product: Mat::zeros(size, size),
            buffer: get_lu_inverse_buffer(size),
        }
    }

    pub fn size(&self) -> usize {
        self.inverse.nrows()
    }

    /// Solves `lhs * x = rhs`, `x` overwrites the `rhs` storage.
    pub fn solve_inplace(
        &mut self,
        lhs: MatRef<f64>,
        mut rhs: MatMut<f64>,
        operation: &'static str,
    ) -> Result<(), SolverError> {
        assert_eq!(lhs.nrows(), self.size());
        assert_eq!(rhs.nrows(), self.size());
        assert_eq!(rhs.ncols(), self.size());

        inverse_lu_inplace(lhs, self.inverse.as_mut(), &mut self.buffer, operation)?;

        matmul(
            self.product.as_mut(),
            Accum::Replace,
            self.inverse.as_ref(),
            rhs.as_ref(),
            1.,
            Par::Seq,
        );
        check_finite(self.product.as_ref(), operation)?;

        zip!(rhs.as_mut(), self.product.as_ref()).for_each(|unzip!(r, p)| *r = *p);

        Ok(())
    }
}

/// Allocating variant of [`LinearSolver::solve_inplace`] for one-off solves.
pub fn solve(
    lhs: MatRef<f64>,
    rhs: MatRef<f64>,
    operation: &'static str,
) -> Result<Mat<f64>, SolverError> {
    let mut solver = LinearSolver::new(lhs.nrows());
    let mut solution = rhs.to_owned();
    solver.solve_inplace(lhs, solution.as_mut(), operation)?;

    Ok(solution)
}

pub fn max_abs(mat: MatRef<f64>) -> f64 {
    let mut max = 0.0f64;
    for j in 0..mat.ncols() {
        for i in 0..mat.nrows() {
            max = max.max(mat[(i, j)].abs());
        }
    }

    max
}

pub fn is_zero(mat: MatRef<f64>) -> bool {
    (0..mat.ncols()).all(|j| (0..mat.nrows()).all(|i| mat[(i, j)] == 0.))
}

pub fn is_symmetric(mat: MatRef<f64>) -> bool {
    mat.nrows() == mat.ncols()
        && (0..mat.ncols()).all(|j| (0..j).all(|i| mat[(i, j)] == mat[(j, i)]))
}

fn is_vanishing_pivot(pivot: f64, scale: f64) -> bool {
    !pivot.is_finite() || pivot.abs() <= SINGULAR_RELATIVE_EPSILON * scale
}

fn check_finite(mat: MatRef<f64>, operation: &'static str) -> Result<(), SolverError> {
    let finite = (0..mat.ncols()).all(|j| (0..mat.nrows()).all(|i| mat[(i, j)].is_finite()));

    finite
        .then_some(())
        .ok_or(SolverError::NonFinite { operation })
}
