use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("job invariant violated: {0}")]
    InvariantViolation(String),

    #[error("acceptance lost for job {0}")]
    AcceptanceLost(String),

    #[error("dispatch deadline elapsed for job {0}")]
    DispatchTimeout(String),
}
