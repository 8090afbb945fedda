//! Result of one bounded hardware search step.

/// Outcome of a bounded search or sub-procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The search found what it was looking for.
    Converged(T),
    /// This attempt failed but the caller may try again.
    Retry,
    /// The iteration bound ran out.
    Exhausted,
}

impl<T> Outcome<T> {
    pub fn is_converged(&self) -> bool {
        matches!(self, Outcome::Converged(_))
    }
}
