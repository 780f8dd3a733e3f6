use serde::{Deserialize, Serialize};

use crate::{Error, Evaluator, HeContext, Result};

/// Smallest top level the kernels fit in.
pub const MIN_MAX_LEVEL: usize = 9;

/// Logical dimensions of the network and of one mini-batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkShape {
    pub batch: usize,
    pub cells: usize,
    pub features: usize,
    pub filters: usize,
    pub classes: usize,
}

impl NetworkShape {

    /// `H K`, the size of the dense weight matrix.
    pub fn dense_mat_size(&self) -> usize {
        self.filters * self.classes
    }

    /// `B F H`, one copy of the conv weights per sample of the batch.
    pub fn conv_mat_size(&self) -> usize {
        self.batch * self.features * self.filters
    }

    /// `B H`, the pooled conv outputs of a batch.
    pub fn batch_filters(&self) -> usize {
        self.batch * self.filters
    }

    /// `B H K`, one block per class of pooled outputs.
    pub fn batch_dense(&self) -> usize {
        self.batch * self.dense_mat_size()
    }

    /// Slots the refreshed tensor occupies.
    pub fn slot_usage(&self) -> usize {
        3 * self.batch_dense() + (2 * self.classes + 1) * self.conv_mat_size()
    }

}

/// Where a logical tensor lives in its ciphertext.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotRegion {
    pub name: &'static str,
    pub start: usize,
    pub len: usize,
}

/// Level of every operand and intermediate, for a top level `L`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LevelBudget {
    pub input: usize,
    pub conv_weights: usize,
    pub dense_weights: usize,
    pub conv_output: usize,
    pub forward_output: usize,
    pub refreshed: usize,
    pub activation: usize,
    pub error: usize,
    pub product: usize,
    pub dense_gradient: usize,
    pub conv_gradient: usize,
}

impl LevelBudget {

    fn new(max_level: usize) -> Self {
        Self {
            input: 3,
            conv_weights: 3,
            dense_weights: 2,
            conv_output: 2,
            forward_output: 1,
            refreshed: max_level,
            activation: max_level - 2,
            error: max_level - 3,
            product: max_level - 4,
            dense_gradient: max_level - 5,
            conv_gradient: max_level - 6,
        }
    }

}

/**
Packing plan of one network shape on one ring.

The forward kernel leaves the pre-activations `U`, the pooled conv output
`P`, the dense weights and the previous gradients side by side in one
ciphertext at level [LevelBudget::forward_output]. The collective refresh
rearranges them into the layout the backward kernel reads:

| region | content |
|---|---|
| `[0, BD)` | `U[j][c]` at `j D + c H + k` |
| `K` blocks of `CMS` | `U[(t/H) mod B][c]` |
| `BD` | `P[j][k]` at `j D + c H + k` |
| `K` blocks of `CMS` | `W[t mod H][c]` |
| `BD` | `mu prevDW` |
| `CMS` | `mu prevDC` |

with `D = H K`, `BD = B D` and `CMS = B F H`.
*/
#[derive(Clone, Debug)]
pub struct PackingPlan {
    shape: NetworkShape,
    slots: usize,
    levels: LevelBudget,
    rotation_steps: Vec<isize>,
    galois_elts: Vec<usize>,
}

impl PackingPlan {

    /// Check the shape against the ring and derive the plan.
    pub fn new(shape: NetworkShape, context: &HeContext) -> Result<Self> {
        Self::with_slots(shape, context.slot_count(), context.max_level(), |steps| {
            let tool = context.galois_tool();
            let mut elts = tool.get_elts_from_steps(steps);
            elts.push(tool.get_elt_conjugate());
            elts.sort_unstable();
            elts
        })
    }

    /// Shape checks only; used before any context exists.
    pub fn check_shape(shape: &NetworkShape, slots: usize, max_level: usize) -> Result<()> {
        let s = *shape;
        if s.batch == 0 || s.cells == 0 || s.features == 0 || s.filters == 0 || s.classes == 0 {
            return Err(Error::UnsupportedShape(format!("empty dimension in {:?}", s)));
        }
        if s.features % 2 != 0 {
            return Err(Error::UnsupportedShape(format!("feature count {} is odd", s.features)));
        }
        if s.batch % 2 != 0 {
            return Err(Error::UnsupportedShape(format!("batch size {} is odd", s.batch)));
        }
        if 6 * s.dense_mat_size() > slots {
            return Err(Error::UnsupportedShape(format!(
                "{} filters x {} classes exceed a sixth of {} slots", s.filters, s.classes, slots
            )));
        }
        let required = s.slot_usage();
        if required > slots {
            return Err(Error::CapacityExceeded { required, available: slots });
        }
        if max_level < MIN_MAX_LEVEL {
            return Err(Error::LevelExhausted { op: "plan", level: max_level, needed: MIN_MAX_LEVEL });
        }
        Ok(())
    }

    fn with_slots(shape: NetworkShape, slots: usize, max_level: usize, elts: impl Fn(&[isize]) -> Vec<usize>) -> Result<Self> {
        Self::check_shape(&shape, slots, max_level)?;
        let rotation_steps = Self::rotation_schedule(&shape, slots);
        let galois_elts = elts(&rotation_steps);
        let plan = Self { shape, slots, levels: LevelBudget::new(max_level), rotation_steps, galois_elts };
        log::debug!(
            "[plan] {:?}: {} of {} slots, {} rotation keys",
            shape, shape.slot_usage(), slots, plan.galois_elts.len()
        );
        Ok(plan)
    }

    /// Rotations of the forward and backward kernels in the order they are
    /// first applied, without repeats or identities.
    fn rotation_schedule(shape: &NetworkShape, slots: usize) -> Vec<isize> {
        let b = shape.batch;
        let f = shape.features;
        let h = shape.filters as isize;
        let k = shape.classes;
        let bh = shape.batch_filters() as isize;
        let bd = shape.batch_dense() as isize;
        let d = shape.dense_mat_size() as isize;
        let cms = shape.conv_mat_size() as isize;
        let kcms = k as isize * cms;

        let mut raw = vec![h];
        raw.extend((1..f / 2).map(|i| 2 * h * i as isize));
        raw.extend(Evaluator::inner_sum_steps(-bh, k));
        raw.extend(Evaluator::inner_sum_steps(1, shape.filters));
        raw.extend((1..=4).map(|j| -j * bd));
        raw.extend([bd + kcms, bd]);
        raw.extend(Evaluator::inner_sum_steps(d, b));
        raw.extend(Evaluator::inner_sum_steps(cms, k));
        raw.extend((1..b / 2).map(|i| 2 * h * i as isize));
        raw.extend((1..k).map(|c| -(c as isize) * (b as isize - 1) * h));
        raw.extend(Evaluator::inner_sum_steps(-h, b));
        raw.extend(Evaluator::inner_sum_steps(-(f as isize) * h, b));
        raw.extend([2 * bd + 2 * kcms, 3 * bd + 2 * kcms]);

        let mut seen = std::collections::HashSet::new();
        raw.into_iter()
            .filter(|step| {
                let normalized = step.rem_euclid(slots as isize);
                normalized != 0 && seen.insert(normalized)
            })
            .collect()
    }

    pub fn shape(&self) -> &NetworkShape {&self.shape}
    pub fn slots(&self) -> usize {self.slots}
    pub fn levels(&self) -> &LevelBudget {&self.levels}
    pub fn rotation_steps(&self) -> &[isize] {&self.rotation_steps}

    /// Galois elements of every rotation key, conjugation included, sorted.
    pub fn galois_elts(&self) -> &[usize] {&self.galois_elts}

    /// The ciphertext level at which the collective refresh runs.
    pub fn refresh_level(&self) -> usize {self.levels.forward_output}

    pub fn slot_usage(&self) -> usize {self.shape.slot_usage()}

    /// Offsets of the refreshed tensor the backward kernel reads.
    pub fn refreshed_regions(&self) -> Vec<SlotRegion> {
        let s = &self.shape;
        let bd = s.batch_dense();
        let kcms = s.classes * s.conv_mat_size();
        vec![
            SlotRegion { name: "U", start: 0, len: bd },
            SlotRegion { name: "U per class", start: bd, len: kcms },
            SlotRegion { name: "P", start: bd + kcms, len: bd },
            SlotRegion { name: "W per class", start: 2 * bd + kcms, len: kcms },
            SlotRegion { name: "mu prevDW", start: 2 * bd + 2 * kcms, len: bd },
            SlotRegion { name: "mu prevDC", start: 3 * bd + 2 * kcms, len: s.conv_mat_size() },
        ]
    }

    pub(crate) fn region(&self, name: &str) -> SlotRegion {
        self.refreshed_regions().into_iter()
            .find(|r| r.name == name)
            .unwrap_or_else(|| panic!("[Logic error] No region {}.", name))
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EncryptionParameters, SecurityLevel};

    fn test_shape() -> NetworkShape {
        NetworkShape { batch: 4, cells: 16, features: 4, filters: 2, classes: 2 }
    }

    fn plan(shape: NetworkShape) -> Result<PackingPlan> {
        PackingPlan::with_slots(shape, 512, 10, |_| vec![])
    }

    #[test]
    fn test_layout_of_test_shape() {
        let plan = plan(test_shape()).unwrap();
        assert_eq!(plan.slot_usage(), 208);
        assert_eq!(
            plan.rotation_steps(),
            &[2, 4, -8, 1, -16, -32, -48, -64, 80, 16, 8, 32, -6, -2, -4, 160, 176]
        );
        let regions = plan.refreshed_regions();
        assert_eq!(regions.last().map(|r| r.start + r.len), Some(208));
        for pair in regions.windows(2) {
            assert_eq!(pair[0].start + pair[0].len, pair[1].start);
        }
        assert_eq!(plan.region("P").start, 80);
        assert_eq!(plan.refresh_level(), 1);
        assert_eq!(plan.levels().conv_gradient, 4);
    }

    #[test]
    fn test_minimum_features() {
        let shape = NetworkShape { features: 2, ..test_shape() };
        let plan = plan(shape).unwrap();
        assert!(plan.rotation_steps().contains(&2));
        assert!(!plan.rotation_steps().contains(&0));
    }

    #[test]
    fn test_failures() {
        let too_wide = NetworkShape { batch: 200, cells: 200, features: 256, filters: 32, classes: 8 };
        assert!(matches!(plan(too_wide), Err(Error::UnsupportedShape(_))));
        assert!(matches!(
            PackingPlan::with_slots(too_wide, 1 << 14, 10, |_| vec![]),
            Err(Error::CapacityExceeded { .. })
        ));
        let too_big = NetworkShape { batch: 50, cells: 200, features: 38, filters: 8, classes: 2 };
        assert!(matches!(
            PackingPlan::with_slots(too_big, 1 << 14, 10, |_| vec![]),
            Err(Error::CapacityExceeded { required: 78400, available: 16384 })
        ));
        assert!(matches!(plan(NetworkShape { features: 3, ..test_shape() }), Err(Error::UnsupportedShape(_))));
        assert!(matches!(plan(NetworkShape { batch: 3, ..test_shape() }), Err(Error::UnsupportedShape(_))));
        assert!(matches!(plan(NetworkShape { classes: 0, ..test_shape() }), Err(Error::UnsupportedShape(_))));
        assert!(matches!(
            PackingPlan::with_slots(test_shape(), 512, 8, |_| vec![]),
            Err(Error::LevelExhausted { op: "plan", level: 8, needed: 9 })
        ));
    }

    #[test]
    fn test_galois_elts_from_context() {
        let context = HeContext::new(EncryptionParameters::ckks(10, 10, 40, 60, 61), SecurityLevel::None).unwrap();
        let plan = PackingPlan::new(test_shape(), &context).unwrap();
        assert_eq!(plan.galois_elts().len(), 18);
        assert!(plan.galois_elts().contains(&context.galois_tool().get_elt_conjugate()));
        assert!(plan.galois_elts().windows(2).all(|w| w[0] < w[1]));
    }
}
