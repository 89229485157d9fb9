//! Square-matrix workload for the benchmark: a cache-unfriendly baseline
//! multiply and a loop-reordered variant that walks both inputs row-major.

/// A square row-major matrix.
pub struct Matrix {
    size: usize,
    data: Vec<f64>,
}

impl Matrix {
    /// Creates an all-zero matrix, used for the multiply output.
    pub fn zeroed(size: usize) -> Self {
        Self {
            size,
            data: vec![0.0; size * size],
        }
    }

    /// Creates a matrix filled with deterministic values.
    pub fn initialized(size: usize) -> Self {
        let mut matrix = Self::zeroed(size);
        for row in 0..size {
            for col in 0..size {
                matrix.data[row * size + col] = ((row * 31 + col * 7) % 100) as f64 / 10.0;
            }
        }
        matrix
    }

    /// Matrix dimension (rows == columns).
    pub fn size(&self) -> usize {
        self.size
    }

    fn at(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.size + col]
    }

    /// Sum of all cells, used to keep the workload observable.
    pub fn checksum(&self) -> f64 {
        self.data.iter().sum()
    }
}

/// Naive i-j-k multiply: the inner loop strides down a column of `c`,
/// missing in the data cache on every step for large matrices.
pub fn baseline_multiply(a: &mut Matrix, b: &Matrix, c: &Matrix) {
    let n = a.size();
    for i in 0..n {
        for j in 0..n {
            let mut sum = 0.0;
            for k in 0..n {
                sum += b.at(i, k) * c.at(k, j);
            }
            a.data[i * n + j] = sum;
        }
    }
}

/// i-k-j multiply: hoists `b[i][k]` and walks `c` and `a` row-major, so
/// every access is sequential.
pub fn multiply(a: &mut Matrix, b: &Matrix, c: &Matrix) {
    let n = a.size();
    a.data.fill(0.0);
    for i in 0..n {
        for k in 0..n {
            let b_ik = b.at(i, k);
            for j in 0..n {
                a.data[i * n + j] += b_ik * c.at(k, j);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variants_agree() {
        let b = Matrix::initialized(16);
        let c = Matrix::initialized(16);

        let mut baseline = Matrix::zeroed(16);
        baseline_multiply(&mut baseline, &b, &c);

        let mut optimized = Matrix::zeroed(16);
        multiply(&mut optimized, &b, &c);

        for (x, y) in baseline.data.iter().zip(&optimized.data) {
            assert!((x - y).abs() < 1e-9, "variants diverge: {x} vs {y}");
        }
    }

    #[test]
    fn test_checksum_reflects_contents() {
        let zero = Matrix::zeroed(8);
        assert_eq!(zero.checksum(), 0.0);
        assert!(Matrix::initialized(8).checksum() > 0.0);
    }
}
