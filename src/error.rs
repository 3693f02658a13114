use thiserror::Error;

/// Fatal verification errors.
///
/// Numeric degeneracies (zero denominators, empty percentile masks) are not
/// errors: they surface as sentinel values (`f64::NAN`, `D90_SENTINEL`) in
/// the score structures and downstream consumers special-case them.
#[derive(Debug, Error)]
pub enum VerifError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
}
