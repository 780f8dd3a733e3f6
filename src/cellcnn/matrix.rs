use std::io::{Read, Write};

use num_complex::Complex;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{serialize::Serializable, Ciphertext, Error, Evaluator, Result};

/// Dense row-major matrix of complex values.
///
/// `real_only` records that the imaginary lanes carry nothing; it is
/// propagated through the operations the way a product of real operands stays
/// real.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    real_only: bool,
    data: Vec<Complex<f64>>,
}

impl Matrix {

    /// Zero matrix.
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols, real_only: true, data: vec![Complex::new(0.0, 0.0); rows * cols] }
    }

    pub fn from_real(rows: usize, cols: usize, values: &[f64]) -> Self {
        assert_eq!(values.len(), rows * cols, "[Invalid argument] Value count does not match the shape.");
        Self { rows, cols, real_only: true, data: values.iter().map(|&x| Complex::new(x, 0.0)).collect() }
    }

    pub fn from_complex(rows: usize, cols: usize, values: Vec<Complex<f64>>) -> Self {
        assert_eq!(values.len(), rows * cols, "[Invalid argument] Value count does not match the shape.");
        let real_only = values.iter().all(|x| x.im == 0.0);
        Self { rows, cols, real_only, data: values }
    }

    /// Entries uniform in `(-1, 1) / sqrt(inputs)`.
    pub fn weights_init<R: Rng>(rows: usize, cols: usize, inputs: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (inputs.max(1) as f64).sqrt();
        let values = (0..rows * cols).map(|_| rng.gen_range(-1.0..1.0) * bound).collect::<Vec<_>>();
        Self::from_real(rows, cols, &values)
    }

    pub fn rows(&self) -> usize {self.rows}
    pub fn cols(&self) -> usize {self.cols}
    pub fn real_only(&self) -> bool {self.real_only}
    pub fn data(&self) -> &[Complex<f64>] {&self.data}

    pub fn get(&self, row: usize, col: usize) -> Complex<f64> {
        self.data[row * self.cols + col]
    }

    /// Real part of an entry.
    pub fn re(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col].re
    }

    pub fn set(&mut self, row: usize, col: usize, value: Complex<f64>) {
        if value.im != 0.0 {
            self.real_only = false;
        }
        self.data[row * self.cols + col] = value;
    }

    pub fn row(&self, row: usize) -> &[Complex<f64>] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    pub fn set_row(&mut self, index: usize, row: &[Complex<f64>]) {
        assert_eq!(row.len(), self.cols, "[Invalid argument] Row length does not match the shape.");
        if row.iter().any(|x| x.im != 0.0) {
            self.real_only = false;
        }
        self.data[index * self.cols..(index + 1) * self.cols].copy_from_slice(row);
    }

    pub fn transpose(&self) -> Matrix {
        let mut data = Vec::with_capacity(self.data.len());
        for j in 0..self.cols {
            for i in 0..self.rows {
                data.push(self.get(i, j));
            }
        }
        Matrix { rows: self.cols, cols: self.rows, real_only: self.real_only, data }
    }

    /// `self * other`.
    pub fn mul_mat(&self, other: &Matrix) -> Matrix {
        assert_eq!(self.cols, other.rows, "[Invalid argument] Matrices are incompatible for multiplication.");
        let mut data = vec![Complex::new(0.0, 0.0); self.rows * other.cols];
        for i in 0..self.rows {
            for k in 0..self.cols {
                let a = self.get(i, k);
                for j in 0..other.cols {
                    data[i * other.cols + j] += a * other.get(k, j);
                }
            }
        }
        Matrix { rows: self.rows, cols: other.cols, real_only: self.real_only && other.real_only, data }
    }

    /// `1 x cols` row of column sums.
    pub fn sum_columns(&self) -> Matrix {
        let mut data = vec![Complex::new(0.0, 0.0); self.cols];
        for i in 0..self.rows {
            for (acc, x) in data.iter_mut().zip(self.row(i)) {
                *acc += x;
            }
        }
        Matrix { rows: 1, cols: self.cols, real_only: self.real_only, data }
    }

    /// Entry-wise product.
    pub fn hadamard(&self, other: &Matrix) -> Matrix {
        assert!(self.rows == other.rows && self.cols == other.cols, "[Invalid argument] Matrices are incompatible for the entry-wise product.");
        let data = self.data.iter().zip(other.data.iter()).map(|(a, b)| a * b).collect();
        Matrix { rows: self.rows, cols: self.cols, real_only: self.real_only && other.real_only, data }
    }

    /// Apply `f` to the real part of every entry.
    pub fn map_real<F: Fn(f64) -> f64>(&self, f: F) -> Matrix {
        let data = self.data.iter().map(|x| Complex::new(f(x.re), 0.0)).collect();
        Matrix { rows: self.rows, cols: self.cols, real_only: true, data }
    }

    pub fn frobenius_norm(&self) -> f64 {
        self.data.iter().map(|x| x.norm_sqr()).sum::<f64>().sqrt()
    }

    /// Index of the largest real entry of each row.
    pub fn argmax_rows(&self) -> Vec<usize> {
        (0..self.rows).map(|i| {
            self.row(i).iter().enumerate()
                .fold((0, f64::NEG_INFINITY), |best, (j, x)| if x.re > best.1 {(j, x.re)} else {best})
                .0
        }).collect()
    }

    fn check_same_shape(&self, other: &Matrix) -> Result<()> {
        if self.rows != other.rows || self.cols != other.cols {
            return Err(Error::UnsupportedShape(format!(
                "{}x{} and {}x{} matrices", self.rows, self.cols, other.rows, other.cols
            )));
        }
        Ok(())
    }

}

/// Operations shared by the plaintext shadow and the packed ciphertexts.
///
/// Aggregation, momentum and the weight update are written once against
/// this trait. `Backend` is whatever performs the arithmetic: nothing for a
/// [Matrix], the [Evaluator] for a [Ciphertext].
pub trait MatrixOps: Sized {
    type Backend: ?Sized;
    fn add(&self, backend: &Self::Backend, other: &Self) -> Result<Self>;
    fn sub(&self, backend: &Self::Backend, other: &Self) -> Result<Self>;
    fn mult_const(&self, backend: &Self::Backend, value: f64) -> Result<Self>;
}

impl MatrixOps for Matrix {
    type Backend = ();

    fn add(&self, _: &(), other: &Matrix) -> Result<Matrix> {
        self.check_same_shape(other)?;
        let data = self.data.iter().zip(other.data.iter()).map(|(a, b)| a + b).collect();
        Ok(Matrix { rows: self.rows, cols: self.cols, real_only: self.real_only && other.real_only, data })
    }

    fn sub(&self, _: &(), other: &Matrix) -> Result<Matrix> {
        self.check_same_shape(other)?;
        let data = self.data.iter().zip(other.data.iter()).map(|(a, b)| a - b).collect();
        Ok(Matrix { rows: self.rows, cols: self.cols, real_only: self.real_only && other.real_only, data })
    }

    fn mult_const(&self, _: &(), value: f64) -> Result<Matrix> {
        let data = self.data.iter().map(|a| a * value).collect();
        Ok(Matrix { rows: self.rows, cols: self.cols, real_only: self.real_only, data })
    }
}

impl MatrixOps for Ciphertext {
    type Backend = Evaluator;

    fn add(&self, evaluator: &Evaluator, other: &Ciphertext) -> Result<Ciphertext> {
        let mut result = self.clone();
        evaluator.try_add_inplace(&mut result, other)?;
        Ok(result)
    }

    fn sub(&self, evaluator: &Evaluator, other: &Ciphertext) -> Result<Ciphertext> {
        let mut result = self.clone();
        evaluator.try_add_inplace(&mut result, &evaluator.negate_new(other))?;
        Ok(result)
    }

    /// Costs one level.
    fn mult_const(&self, evaluator: &Evaluator, value: f64) -> Result<Ciphertext> {
        if self.level() == 0 {
            return Err(Error::LevelExhausted { op: "mult_const", level: 0, needed: 1 });
        }
        let mut result = evaluator.multiply_const_new(self, value);
        evaluator.rescale_to_next_inplace(&mut result);
        Ok(result)
    }
}

/// Sum of `items` in index order.
pub fn sum_in_order<M: MatrixOps + Clone>(backend: &M::Backend, items: &[M]) -> Result<M> {
    let (first, rest) = items.split_first()
        .ok_or_else(|| Error::Protocol("nothing to aggregate".into()))?;
    rest.iter().try_fold(first.clone(), |acc, x| acc.add(backend, x))
}

/// `gradient + momentum * previous`.
pub fn with_momentum<M: MatrixOps>(backend: &M::Backend, gradient: &M, previous: &M, momentum: f64) -> Result<M> {
    gradient.add(backend, &previous.mult_const(backend, momentum)?)
}

/// `weights - gradient`.
pub fn apply_update<M: MatrixOps>(backend: &M::Backend, weights: &M, gradient: &M) -> Result<M> {
    weights.sub(backend, gradient)
}

/// Wire form for the plaintext protocol: shape, flag, then interleaved
/// real and imaginary parts.
impl Serializable for Matrix {

    fn serialize<T: Write>(&self, stream: &mut T) -> std::io::Result<usize> {
        let mut bytes_written = Serializable::serialize(&self.rows, stream)?;
        bytes_written += Serializable::serialize(&self.cols, stream)?;
        bytes_written += Serializable::serialize(&self.real_only, stream)?;
        for x in &self.data {
            bytes_written += Serializable::serialize(&x.re, stream)?;
            bytes_written += Serializable::serialize(&x.im, stream)?;
        }
        Ok(bytes_written)
    }

    fn deserialize<T: Read>(stream: &mut T) -> std::io::Result<Self> {
        let rows = <usize as Serializable>::deserialize(stream)?;
        let cols = <usize as Serializable>::deserialize(stream)?;
        let real_only = <bool as Serializable>::deserialize(stream)?;
        let count = rows.checked_mul(cols)
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "Matrix shape overflows"))?;
        let mut data = Vec::with_capacity(count.min(1 << 20));
        for _ in 0..count {
            let re = <f64 as Serializable>::deserialize(stream)?;
            let im = <f64 as Serializable>::deserialize(stream)?;
            data.push(Complex::new(re, im));
        }
        Ok(Self { rows, cols, real_only, data })
    }

    fn serialized_size(&self) -> usize {
        17 + 16 * self.data.len()
    }

}
