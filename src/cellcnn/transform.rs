use num_complex::Complex;

use super::plan::PackingPlan;
use crate::multiparty::SlotTransform;

/// Rearranges the forward output into the refreshed layout of
/// [PackingPlan] while the collective refresh re-encrypts it.
///
/// Reads real parts only and scales the previous gradients by the momentum,
/// so it is R-linear.
pub struct CellCnnTransform {
    plan: PackingPlan,
    momentum: f64,
}

impl CellCnnTransform {

    pub fn new(plan: PackingPlan, momentum: f64) -> Self {
        Self { plan, momentum }
    }

}

impl SlotTransform for CellCnnTransform {

    fn apply(&self, y: &[Complex<f64>]) -> Vec<Complex<f64>> {
        let s = self.plan.shape();
        let (b, h, k) = (s.batch, s.filters, s.classes);
        let d = s.dense_mat_size();
        let bh = s.batch_filters();
        let bd = s.batch_dense();
        let cms = s.conv_mat_size();
        let u_at = |j: usize, c: usize| y[c * bh + j * h].re;

        let mut out = vec![Complex::new(0.0, 0.0); y.len()];
        let mut set = |slot: usize, value: f64| out[slot] = Complex::new(value, 0.0);

        let u_blocks = self.plan.region("U per class").start;
        let p_start = self.plan.region("P").start;
        let w_blocks = self.plan.region("W per class").start;
        for j in 0..b {
            for c in 0..k {
                for f in 0..h {
                    set(j * d + c * h + f, u_at(j, c));
                    set(p_start + j * d + c * h + f, y[bd + j * h + f].re);
                }
            }
        }
        for c in 0..k {
            for t in 0..cms {
                set(u_blocks + c * cms + t, u_at((t / h) % b, c));
                set(w_blocks + c * cms + t, y[2 * bd + c * bh + t % h].re);
            }
        }
        let prev_dw = self.plan.region("mu prevDW").start;
        for i in 0..bd {
            set(prev_dw + i, self.momentum * y[3 * bd + i].re);
        }
        let prev_dc = self.plan.region("mu prevDC").start;
        for i in 0..cms {
            set(prev_dc + i, self.momentum * y[4 * bd + i].re);
        }
        out
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cellcnn::plan::NetworkShape;

    #[test]
    fn test_rearrangement() {
        let context = crate::HeContext::new(crate::EncryptionParameters::ckks(10, 10, 40, 60, 61), crate::SecurityLevel::None).unwrap();
        let shape = NetworkShape { batch: 4, cells: 8, features: 4, filters: 2, classes: 2 };
        let plan = PackingPlan::new(shape, &context).unwrap();
        let transform = CellCnnTransform::new(plan, 0.5);
        let y = (0..512).map(|i| Complex::new(i as f64, 1000.0)).collect::<Vec<_>>();
        let out = transform.apply(&y);
        assert_eq!(out.len(), 512);
        assert!(out.iter().all(|x| x.im == 0.0));
        // U[1][1] sits at slot 1 * 8 + 1 * 2 = 10
        assert_eq!(out[4 + 2 + 1].re, 10.0);
        assert_eq!(out[16 + 32 + 2].re, 10.0);
        // P[1][1] copy at 16 + 3
        assert_eq!(out[80 + 4 + 2 + 1].re, 19.0);
        // W[1][1] sits at 32 + 8 + 1
        assert_eq!(out[96 + 32 + 5].re, 41.0);
        assert_eq!(out[160].re, 24.0);
        assert_eq!(out[176 + 31].re, 0.5 * 95.0);
        assert_eq!(out[208].re, 0.0);
    }
}
