//! Gaussian elimination with partial pivoting, used to solve the Newton
//! system of the SVM trainer

use super::matrix::Matrix;

/// Pivots smaller than this are treated as zero
const SINGULAR: f64 = 1e-12;

#[derive(Debug)]
pub struct Gauss {
    pub left: Matrix,
    pub right: Matrix,
}

impl Gauss {
    /// Solve `left . x = right`, returning `x`. Returns `None` if `left` is
    /// not square, shapes disagree, or `left` is singular
    pub fn solve(left: Matrix, right: Matrix) -> Option<Matrix> {
        if left.rows != left.cols || left.rows != right.rows {
            return None;
        }
        let mut g = Gauss { left, right };
        g.echelon()?;
        g.backfill();
        Some(g.right)
    }

    // Reduce `left` to upper triangular form
    fn echelon(&mut self) -> Option<()> {
        let n = self.left.rows;
        for k in 0..n {
            // row with the largest magnitude in the pivot column
            let pivot = (k..n).max_by(|&a, &b| {
                self.left[(a, k)]
                    .abs()
                    .total_cmp(&self.left[(b, k)].abs())
            })?;
            if !(self.left[(pivot, k)].abs() > SINGULAR) {
                log::trace!("singular system at column {}", k);
                return None;
            }
            self.left.swap_rows(k, pivot);
            self.right.swap_rows(k, pivot);

            for i in k + 1..n {
                let factor = self.left[(i, k)] / self.left[(k, k)];
                self.left[(i, k)] = 0.0;
                for j in k + 1..n {
                    self.left[(i, j)] -= self.left[(k, j)] * factor;
                }
                for j in 0..self.right.cols {
                    self.right[(i, j)] -= self.right[(k, j)] * factor;
                }
            }
        }
        Some(())
    }

    // Back substitution on the upper triangular matrix
    fn backfill(&mut self) {
        let n = self.left.rows;
        for c in 0..self.right.cols {
            for i in (0..n).rev() {
                let mut x = self.right[(i, c)];
                for j in i + 1..n {
                    x -= self.left[(i, j)] * self.right[(j, c)];
                }
                self.right[(i, c)] = x / self.left[(i, i)];
            }
        }
    }
}
