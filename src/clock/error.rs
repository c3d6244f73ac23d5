use thiserror::Error;

/// Rejected scheduling arguments.
///
/// Callback panics are not represented here: they unwind to whatever drove
/// the processing step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClockError {
    #[error("recurring timer period must be greater than zero")]
    ZeroPeriod,

    #[error("due time overflows virtual time: now={now}ms, delay={delay}ms")]
    DueTimeOverflow { now: u64, delay: u64 },
}
