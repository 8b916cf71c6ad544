//! Single-precision GEMM kernels behind the device's `sgemm` dispatch.
//!
//! All matrices are row-major. `lda`, `ldb` and `ldc` are the row strides of
//! the matrices as stored (before any transpose is applied).

#[cfg(feature = "blas")]
extern crate blas_src;

/// Operand description for one `C = alpha * op(A) * op(B) + beta * C` call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gemm {
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub transpose_a: bool,
    pub transpose_b: bool,
    pub alpha: f32,
    pub beta: f32,
    pub a_offset: usize,
    pub b_offset: usize,
    pub c_offset: usize,
}

impl Gemm {
    /// `C[m x n] = A[m x k] * B[k x n]`, overwriting C.
    pub fn new(m: usize, n: usize, k: usize) -> Self {
        Self {
            m,
            n,
            k,
            transpose_a: false,
            transpose_b: false,
            alpha: 1.0,
            beta: 0.0,
            a_offset: 0,
            b_offset: 0,
            c_offset: 0,
        }
    }

    /// A is stored as `k x m` and used transposed.
    pub fn transpose_a(mut self) -> Self {
        self.transpose_a = true;
        self
    }

    /// B is stored as `n x k` and used transposed.
    pub fn transpose_b(mut self) -> Self {
        self.transpose_b = true;
        self
    }

    /// Adds into C instead of overwriting it.
    pub fn accumulate(mut self) -> Self {
        self.beta = 1.0;
        self
    }

    pub fn offsets(mut self, a: usize, b: usize, c: usize) -> Self {
        self.a_offset = a;
        self.b_offset = b;
        self.c_offset = c;
        self
    }

    pub fn lda(&self) -> usize {
        if self.transpose_a {
            self.m
        } else {
            self.k
        }
    }

    pub fn ldb(&self) -> usize {
        if self.transpose_b {
            self.k
        } else {
            self.n
        }
    }

    pub fn ldc(&self) -> usize {
        self.n
    }

    /// Elements each operand must hold past its offset: (A, B, C).
    pub fn extents(&self) -> (usize, usize, usize) {
        (self.m * self.k, self.k * self.n, self.m * self.n)
    }
}

/// Portable kernel: i-p-j loop order so the inner loop walks rows of B and C.
pub(crate) fn sgemm_portable(g: &Gemm, a: &[f32], b: &[f32], c: &mut [f32]) {
    let (lda, ldb, ldc) = (g.lda(), g.ldb(), g.ldc());
    let a = &a[g.a_offset..];
    let b = &b[g.b_offset..];
    let c = &mut c[g.c_offset..];

    for i in 0..g.m {
        let c_row = &mut c[i * ldc..i * ldc + g.n];
        if g.beta == 0.0 {
            c_row.iter_mut().for_each(|v| *v = 0.0);
        } else if g.beta != 1.0 {
            c_row.iter_mut().for_each(|v| *v *= g.beta);
        }

        for p in 0..g.k {
            let a_ip = if g.transpose_a {
                a[p * lda + i]
            } else {
                a[i * lda + p]
            };
            if a_ip == 0.0 {
                continue;
            }
            let scaled = g.alpha * a_ip;
            if g.transpose_b {
                for (j, out) in c_row.iter_mut().enumerate() {
                    *out += scaled * b[j * ldb + p];
                }
            } else {
                let b_row = &b[p * ldb..p * ldb + g.n];
                for (out, &b_pj) in c_row.iter_mut().zip(b_row) {
                    *out += scaled * b_pj;
                }
            }
        }
    }
}

#[cfg(feature = "blas")]
pub(crate) fn sgemm_blas(g: &Gemm, a: &[f32], b: &[f32], c: &mut [f32]) {
    use cblas::{sgemm, Layout, Transpose};

    let trans_a = if g.transpose_a {
        Transpose::Ordinary
    } else {
        Transpose::None
    };
    let trans_b = if g.transpose_b {
        Transpose::Ordinary
    } else {
        Transpose::None
    };

    unsafe {
        sgemm(
            Layout::RowMajor,
            trans_a,
            trans_b,
            g.m as i32,
            g.n as i32,
            g.k as i32,
            g.alpha,
            &a[g.a_offset..],
            g.lda() as i32,
            &b[g.b_offset..],
            g.ldb() as i32,
            g.beta,
            &mut c[g.c_offset..],
            g.ldc() as i32,
        );
    }
}
