use std::fs;
use std::path::Path;

use num_complex::Complex;
use rand::RngCore;
use rand_distr::{Distribution, Normal};

use super::matrix::Matrix;
use crate::{util::{BlakeRNG, PRNGSeed}, Error, Result};

fn data_error(path: &Path, line: usize, message: impl Into<String>) -> Error {
    Error::Data { path: path.to_path_buf(), line, message: message.into() }
}

/// Parse a headerless CSV file of reals. Blank lines are skipped; every
/// other line must have `cols` fields.
pub fn read_csv(path: &Path, cols: usize) -> Result<Vec<Vec<f64>>> {
    let text = fs::read_to_string(path)?;
    let mut rows = vec![];
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields = line.split(',')
            .map(|x| x.trim().parse::<f64>().map_err(|e| data_error(path, index + 1, format!("{:?}: {}", x.trim(), e))))
            .collect::<Result<Vec<_>>>()?;
        if fields.len() != cols {
            return Err(data_error(path, index + 1, format!("{} fields, expected {}", fields.len(), cols)));
        }
        if let Some(x) = fields.iter().find(|x| !x.is_finite()) {
            return Err(data_error(path, index + 1, format!("non-finite value {}", x)));
        }
        rows.push(fields);
    }
    Ok(rows)
}

/// Write rows as CSV.
pub fn write_csv(path: &Path, rows: &[Vec<f64>]) -> Result<()> {
    let text = rows.iter()
        .map(|row| row.iter().map(|x| x.to_string()).collect::<Vec<_>>().join(","))
        .collect::<Vec<_>>()
        .join("\n");
    fs::write(path, text + "\n")?;
    Ok(())
}

/// Samples after pre-pooling: one row of feature means per sample, one
/// one-hot row per label.
#[derive(Clone, Debug, PartialEq)]
pub struct Dataset {
    inputs: Matrix,
    labels: Matrix,
}

impl Dataset {

    pub fn new(inputs: Matrix, labels: Matrix) -> Result<Self> {
        if inputs.rows() != labels.rows() {
            return Err(Error::Config(format!("{} samples but {} labels", inputs.rows(), labels.rows())));
        }
        Ok(Self { inputs, labels })
    }

    /// Read `X_<i>.csv` (`cells x features`) from `x_dir` and `Y_<i>.csv`
    /// (one row of `classes` one-hot values) from `y_dir` for every
    /// `i < samples`, pooling each `X_i` to its column means.
    pub fn load(x_dir: &Path, y_dir: &Path, samples: usize, cells: usize, features: usize, classes: usize) -> Result<Self> {
        let mut inputs = Matrix::new(samples, features);
        let mut labels = Matrix::new(samples, classes);
        for i in 0..samples {
            let x_path = x_dir.join(format!("X_{}.csv", i));
            let rows = read_csv(&x_path, features)?;
            if rows.len() != cells {
                return Err(data_error(&x_path, rows.len(), format!("{} cells, expected {}", rows.len(), cells)));
            }
            inputs.set_row(i, &prepool(&rows));
            let y_path = y_dir.join(format!("Y_{}.csv", i));
            let rows = read_csv(&y_path, classes)?;
            if rows.len() != 1 {
                return Err(data_error(&y_path, rows.len(), "a label file holds exactly one row"));
            }
            labels.set_row(i, &rows[0].iter().map(|&y| Complex::new(y, 0.0)).collect::<Vec<_>>());
        }
        log::info!("[data] loaded {} samples of {} cells from {:?}", samples, cells, x_dir);
        Self::new(inputs, labels)
    }

    /**
    Reproducible two-blob data set. Sample `i` has class `i mod K`; its cells
    are normal around `0.75` on the features `f` with `f mod K` equal to
    the class and around `0.25` elsewhere, with standard deviation `0.2`.
    */
    pub fn synthetic(samples: usize, cells: usize, features: usize, classes: usize, seed: &PRNGSeed) -> Result<Self> {
        let mut rng = BlakeRNG::derived(seed, b"synthetic");
        let noise = Normal::new(0.0, 0.2).map_err(|e| Error::Config(e.to_string()))?;
        let mut inputs = Matrix::new(samples, features);
        let mut labels = Matrix::new(samples, classes);
        for i in 0..samples {
            let class = i % classes;
            let cell_rows = (0..cells).map(|_| {
                (0..features).map(|f| {
                    let mean = if f % classes == class {0.75} else {0.25};
                    mean + noise.sample(&mut rng)
                }).collect::<Vec<_>>()
            }).collect::<Vec<_>>();
            inputs.set_row(i, &prepool(&cell_rows));
            labels.set(i, class, Complex::new(1.0, 0.0));
        }
        Self::new(inputs, labels)
    }

    /// Write the synthetic set in the on-disk format of [Dataset::load],
    /// repeating each pooled row `cells` times.
    pub fn save(&self, x_dir: &Path, y_dir: &Path, cells: usize) -> Result<()> {
        fs::create_dir_all(x_dir)?;
        fs::create_dir_all(y_dir)?;
        for i in 0..self.len() {
            let row = self.inputs.row(i).iter().map(|x| x.re).collect::<Vec<_>>();
            write_csv(&x_dir.join(format!("X_{}.csv", i)), &vec![row; cells])?;
            let label = self.labels.row(i).iter().map(|x| x.re).collect::<Vec<_>>();
            write_csv(&y_dir.join(format!("Y_{}.csv", i)), &[label])?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {self.inputs.rows()}
    pub fn is_empty(&self) -> bool {self.inputs.rows() == 0}
    pub fn inputs(&self) -> &Matrix {&self.inputs}
    pub fn labels(&self) -> &Matrix {&self.labels}

    /// The rows at `indices`, as `(X, Y)`.
    pub fn batch(&self, indices: &[usize]) -> (Matrix, Matrix) {
        let mut x = Matrix::new(indices.len(), self.inputs.cols());
        let mut y = Matrix::new(indices.len(), self.labels.cols());
        for (r, &i) in indices.iter().enumerate() {
            x.set_row(r, self.inputs.row(i));
            y.set_row(r, self.labels.row(i));
        }
        (x, y)
    }

    /// Contiguous shard `index` of `count`; the first shards take the remainder.
    pub fn shard(&self, index: usize, count: usize) -> Dataset {
        let n = self.len();
        let base = n / count;
        let extra = n % count;
        let start = index * base + index.min(extra);
        let len = base + usize::from(index < extra);
        let indices = (start..start + len).collect::<Vec<_>>();
        let (inputs, labels) = self.batch(&indices);
        Dataset { inputs, labels }
    }

    /// The first `count` rows and the rest.
    pub fn split(&self, count: usize) -> (Dataset, Dataset) {
        let count = count.min(self.len());
        let (a, b) = self.batch(&(0..count).collect::<Vec<_>>());
        let (c, d) = self.batch(&(count..self.len()).collect::<Vec<_>>());
        (Dataset { inputs: a, labels: b }, Dataset { inputs: c, labels: d })
    }

}

/// Column means of a `cells x features` sample.
pub fn prepool(cells: &[Vec<f64>]) -> Vec<Complex<f64>> {
    let features = cells.first().map(|r| r.len()).unwrap_or(0);
    let mut sums = vec![0.0; features];
    for row in cells {
        sums.iter_mut().zip(row).for_each(|(s, x)| *s += x);
    }
    let count = cells.len().max(1) as f64;
    sums.into_iter().map(|s| Complex::new(s / count, 0.0)).collect()
}

/// Draws mini-batch indices with an unbiased bounded integer generator:
/// a uniform word is masked to the next power of two and rejected when out
/// of range.
pub struct BatchSampler {
    rng: BlakeRNG,
}

impl BatchSampler {

    pub fn new(seed: &PRNGSeed, party: usize) -> Self {
        let mut tag = b"batch".to_vec();
        tag.extend_from_slice(&(party as u64).to_le_bytes());
        Self { rng: BlakeRNG::derived(seed, &tag) }
    }

    pub fn next_below(&mut self, bound: usize) -> usize {
        assert!(bound > 0, "[Invalid argument] Empty range.");
        let mask = (bound as u64).next_power_of_two() - 1;
        loop {
            let x = self.rng.next_u64() & mask;
            if x < bound as u64 {
                return x as usize;
            }
        }
    }

    pub fn sample(&mut self, bound: usize, count: usize) -> Vec<usize> {
        (0..count).map(|_| self.next_below(bound)).collect()
    }

}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    /// Scratch directory under the system temp dir, removed on drop.
    struct TempDir(PathBuf);

    impl TempDir {

        fn new(name: &str) -> Result<Self> {
            let path = std::env::temp_dir().join(format!("cellcnn-he-{}-{}", name, std::process::id()));
            fs::create_dir_all(&path)?;
            Ok(Self(path))
        }

        fn path(&self) -> &Path {&self.0}

    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.0);
        }
    }

    #[test]
    fn test_load_round_trip() {
        let dir = TempDir::new("load").unwrap();
        let data = Dataset::synthetic(6, 3, 4, 2, &PRNGSeed::from_u64(1)).unwrap();
        data.save(&dir.path().join("X"), &dir.path().join("Y"), 3).unwrap();
        let loaded = Dataset::load(&dir.path().join("X"), &dir.path().join("Y"), 6, 3, 4, 2).unwrap();
        assert_eq!(loaded.len(), 6);
        for i in 0..6 {
            for f in 0..4 {
                approx::assert_abs_diff_eq!(loaded.inputs().re(i, f), data.inputs().re(i, f), epsilon = 1e-12);
            }
        }
        assert_eq!(loaded.labels(), data.labels());
    }

    #[test]
    fn test_malformed_files() {
        let dir = TempDir::new("malformed").unwrap();
        let path = dir.path().join("X_0.csv");
        fs::write(&path, "1.0,2.0\n\n3.0,abc\n").unwrap();
        match read_csv(&path, 2) {
            Err(Error::Data { line, .. }) => assert_eq!(line, 3),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
        fs::write(&path, "1.0,2.0,3.0\n").unwrap();
        assert!(matches!(read_csv(&path, 2), Err(Error::Data { line: 1, .. })));
        assert!(matches!(read_csv(&dir.path().join("missing.csv"), 2), Err(Error::Io(_))));
        fs::write(&path, "1.0,2.0\n").unwrap();
        assert!(matches!(Dataset::load(dir.path(), dir.path(), 1, 2, 2, 2), Err(Error::Data { .. })));
    }

    #[test]
    fn test_prepool_and_batches() {
        let pooled = prepool(&[vec![1.0, 2.0], vec![3.0, 6.0]]);
        assert_eq!(pooled, vec![Complex::new(2.0, 0.0), Complex::new(4.0, 0.0)]);

        let data = Dataset::synthetic(10, 4, 4, 2, &PRNGSeed::from_u64(2)).unwrap();
        assert_eq!(data.labels().re(3, 1), 1.0);
        assert!(data.inputs().re(3, 1) > data.inputs().re(3, 0));
        let (x, y) = data.batch(&[3, 0]);
        assert_eq!(x.row(0), data.inputs().row(3));
        assert_eq!(y.re(1, 0), 1.0);
        assert_eq!(data.shard(0, 3).len(), 4);
        assert_eq!(data.shard(2, 3).len(), 3);
        assert_eq!(data.shard(1, 3).inputs().row(0), data.inputs().row(4));
        let (head, tail) = data.split(8);
        assert_eq!((head.len(), tail.len()), (8, 2));
    }

    #[test]
    fn test_sampler() {
        let mut a = BatchSampler::new(&PRNGSeed::from_u64(9), 0);
        let mut b = BatchSampler::new(&PRNGSeed::from_u64(9), 0);
        let drawn = a.sample(5, 200);
        assert_eq!(drawn, b.sample(5, 200));
        assert!(drawn.iter().all(|&i| i < 5));
        for v in 0..5 {
            assert!(drawn.contains(&v));
        }
        assert_ne!(BatchSampler::new(&PRNGSeed::from_u64(9), 1).sample(5, 20), drawn[..20].to_vec());
    }
}
