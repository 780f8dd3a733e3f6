use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by planning, training and the party protocol.
///
/// Ring-level programming errors (mismatched RNS sizes, missing keys) are
/// panics with `[Invalid argument]` or `[Logic error]` prefixes instead.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Slot capacity exceeded: plan needs {required} slots, ring offers {available}")]
    CapacityExceeded { required: usize, available: usize },

    #[error("Unsupported network shape: {0}")]
    UnsupportedShape(String),

    #[error("Level exhausted in {op}: ciphertext at level {level}, needs {needed}")]
    LevelExhausted { op: &'static str, level: usize, needed: usize },

    #[error("Scale mismatch: {left:.4e} vs {right:.4e}")]
    ScaleMismatch { left: f64, right: f64 },

    #[error("Party {party} timed out during {phase}")]
    PartyTimeout { party: usize, phase: &'static str },

    #[error("Share mismatch: {0}")]
    ShareMismatch(String),

    #[error("Common randomness diverged at party {party}")]
    SeedDesync { party: usize },

    #[error("Iteration {iteration} aborted: {cause}")]
    IterationAborted { iteration: usize, cause: Box<Error> },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed data in {path:?} at line {line}: {message}")]
    Data { path: PathBuf, line: usize, message: String },

    #[error("Configuration file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Precision of {name} is {bits:.2} bits, {required} required")]
    Precision { name: String, bits: f64, required: f64 },

    #[error("Protocol error: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {

    /// Process exit code reported by the command line tool.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::CapacityExceeded { .. }
            | Error::UnsupportedShape(_)
            | Error::LevelExhausted { .. }
            | Error::ScaleMismatch { .. }
            | Error::Config(_)
            | Error::Toml(_) => 1,
            Error::PartyTimeout { .. }
            | Error::ShareMismatch(_)
            | Error::SeedDesync { .. }
            | Error::IterationAborted { .. }
            | Error::Protocol(_) => 2,
            Error::Io(_) | Error::Data { .. } => 3,
            Error::Precision { .. } => 4,
        }
    }

    /// Errors after which the whole run stops instead of only the iteration.
    pub fn is_fatal_for_run(&self) -> bool {
        match self {
            Error::SeedDesync { .. } => true,
            Error::IterationAborted { cause, .. } => cause.is_fatal_for_run(),
            _ => false,
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(Error::CapacityExceeded { required: 10, available: 4 }.exit_code(), 1);
        assert_eq!(Error::Config("x".into()).exit_code(), 1);
        let aborted = Error::IterationAborted {
            iteration: 3,
            cause: Box::new(Error::PartyTimeout { party: 2, phase: "refresh" }),
        };
        assert_eq!(aborted.exit_code(), 2);
        assert!(!aborted.is_fatal_for_run());
        assert_eq!(Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "x")).exit_code(), 3);
        assert_eq!(Error::Precision { name: "W".into(), bits: 3.0, required: 20.0 }.exit_code(), 4);
        let desync = Error::IterationAborted { iteration: 0, cause: Box::new(Error::SeedDesync { party: 1 }) };
        assert!(desync.is_fatal_for_run());
    }

    #[test]
    fn test_messages() {
        let e = Error::CapacityExceeded { required: 600, available: 512 };
        assert_eq!(e.to_string(), "Slot capacity exceeded: plan needs 600 slots, ring offers 512");
    }
}
