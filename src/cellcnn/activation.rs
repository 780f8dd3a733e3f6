use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Grid points of the least-squares fit.
const FIT_POINTS: usize = 2001;

/// Output activation of the dense layer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Activation {
    /// The exact logistic function; plaintext training only.
    Sigmoid,
    /// Least-squares fit of the logistic on `[-interval, interval]` in the
    /// basis `{1, x, x^3, ..., x^degree}`.
    SigmoidApprox { interval: f64, degree: usize },
}

impl Default for Activation {
    fn default() -> Self {
        Activation::SigmoidApprox { interval: 3.0, degree: 3 }
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// An [Activation] resolved to the coefficients it is evaluated with.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledActivation {
    activation: Activation,
    /// Indexed by power; empty for the exact logistic.
    coefficients: Vec<f64>,
}

impl Activation {

    pub fn compile(&self) -> Result<CompiledActivation> {
        let coefficients = match *self {
            Activation::Sigmoid => vec![],
            Activation::SigmoidApprox { interval, degree } => {
                if !(interval.is_finite() && interval > 0.0) {
                    return Err(Error::Config(format!("activation interval must be positive, got {}", interval)));
                }
                if degree % 2 == 0 || degree > 15 {
                    return Err(Error::Config(format!("activation degree must be odd and at most 15, got {}", degree)));
                }
                fit_odd_polynomial(interval, degree, sigmoid)
            }
        };
        Ok(CompiledActivation { activation: *self, coefficients })
    }

}

/// Powers fitted: 0 and the odd ones up to `degree`.
fn basis_powers(degree: usize) -> Vec<usize> {
    std::iter::once(0).chain((1..=degree).step_by(2)).collect()
}

fn fit_odd_polynomial(interval: f64, degree: usize, f: impl Fn(f64) -> f64) -> Vec<f64> {
    let powers = basis_powers(degree);
    let m = powers.len();
    let mut gram = vec![vec![0.0; m]; m];
    let mut rhs = vec![0.0; m];
    for i in 0..FIT_POINTS {
        let x = -interval + 2.0 * interval * i as f64 / (FIT_POINTS - 1) as f64;
        let phi = powers.iter().map(|&p| x.powi(p as i32)).collect::<Vec<_>>();
        let y = f(x);
        for r in 0..m {
            rhs[r] += phi[r] * y;
            for c in 0..m {
                gram[r][c] += phi[r] * phi[c];
            }
        }
    }
    let solution = solve_linear_system(gram, rhs);
    let mut coefficients = vec![0.0; degree + 1];
    for (&p, c) in powers.iter().zip(solution) {
        coefficients[p] = c;
    }
    coefficients
}

/// Gaussian elimination with partial pivoting on a symmetric positive definite system.
fn solve_linear_system(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Vec<f64> {
    let m = b.len();
    for col in 0..m {
        let pivot = (col..m)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..m {
            let factor = a[row][col] / a[col][col];
            for k in col..m {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = vec![0.0; m];
    for row in (0..m).rev() {
        let tail: f64 = (row + 1..m).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    x
}

impl CompiledActivation {

    pub fn activation(&self) -> Activation {self.activation}

    /// Coefficients indexed by power. Empty for the exact logistic.
    pub fn coefficients(&self) -> &[f64] {&self.coefficients}

    pub fn eval(&self, x: f64) -> f64 {
        if self.coefficients.is_empty() {
            return sigmoid(x);
        }
        self.coefficients.iter().rev().fold(0.0, |acc, c| acc * x + c)
    }

    pub fn derivative(&self, x: f64) -> f64 {
        if self.coefficients.is_empty() {
            let s = sigmoid(x);
            return s * (1.0 - s);
        }
        self.coefficients.iter().enumerate().skip(1).rev()
            .fold(0.0, |acc, (p, c)| acc * x + p as f64 * c)
    }

    /// `(c0, c1, c3)` of a cubic approximation, the only form the encrypted
    /// kernels evaluate.
    pub fn cubic(&self) -> Result<(f64, f64, f64)> {
        match self.activation {
            Activation::SigmoidApprox { degree: 3, .. } => {
                Ok((self.coefficients[0], self.coefficients[1], self.coefficients[3]))
            }
            other => Err(Error::Config(format!("encrypted training needs a cubic sigmoid approximation, got {:?}", other))),
        }
    }

}
