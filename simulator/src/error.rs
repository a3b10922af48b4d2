use thiserror::Error;

/// Setup-time failures. All of them are fatal for the run: the caller is
/// expected to report the diagnostic and exit without producing a report.
#[derive(Debug, Error)]
pub enum SchedulingError {
    #[error("unknown algorithm '{0}'")]
    UnknownAlgorithm(String),

    #[error("unknown priority assignment method '{0}'")]
    UnknownPriorityMethod(String),

    #[error("a budget and a deadline have to be provided")]
    MissingConstraints,

    #[error("the platform has only {available} hosts while {required} initial VMs are required")]
    PlatformTooSmall { required: usize, available: usize },

    #[error("the ensemble is empty, nothing to schedule")]
    EmptyEnsemble,
}
