use std::time::{Instant, Duration};

/// Accumulating wall-clock timer over named phases.
#[derive(Debug, Default)]
pub struct Timer {
    starts: Vec<Instant>,
    accumulated: Vec<Duration>,
    names: Vec<String>,
}

impl Timer {

    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str) -> usize {
        if let Some(index) = self.names.iter().position(|x| x == name) {
            return index;
        }
        self.starts.push(Instant::now());
        self.accumulated.push(Duration::new(0, 0));
        self.names.push(name.to_string());
        self.starts.len() - 1
    }

    pub fn tick(&mut self, index: usize) {
        self.starts[index] = Instant::now();
    }

    pub fn tock(&mut self, index: usize) {
        let now = Instant::now();
        self.accumulated[index] += now.duration_since(self.starts[index]);
    }

    /// Time a closure under the phase `name`.
    pub fn scope<R>(&mut self, name: &str, f: impl FnOnce() -> R) -> R {
        let index = self.register(name);
        self.tick(index);
        let result = f();
        self.tock(index);
        result
    }

    pub fn clear(&mut self) {
        self.starts.clear();
        self.accumulated.clear();
        self.names.clear();
    }

    pub fn gather(&self, average_time: usize) -> Vec<(String, Duration)> {
        let divisor = average_time.max(1) as u32;
        self.names.iter().zip(self.accumulated.iter())
            .map(|(name, time)| (name.clone(), *time / divisor))
            .collect()
    }

    /// Log the per-phase averages at info level and reset.
    pub fn print(&mut self, average_time: usize) {
        for (name, time) in self.gather(average_time) {
            log::info!("{:>20}: {:>10} ms", name, time.as_millis());
        }
        self.clear();
    }

}
