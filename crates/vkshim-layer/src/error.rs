use ash::vk;

/// Failure taxonomy of the layer. Callers own retry policy; nothing in the
/// layer retries internally.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ShimError {
    /// Caller handed the layer something malformed: a non-monotonic signal
    /// value, a mismatched attachment count, a null wait info.
    #[error("validation failed: {0}")]
    Validation(&'static str),

    /// A handle the caller expects to exist was never registered, or was
    /// already destroyed.
    #[error("initialization failed: {0}")]
    Initialization(&'static str),

    /// A wait deadline elapsed before the predicate held.
    #[error("wait timed out")]
    Timeout,

    /// The wrapped driver reported an error; passed through untouched.
    #[error("driver error: {0:?}")]
    Driver(vk::Result),
}

impl ShimError {
    /// The `VkResult` this error maps to at the intercepted entry point.
    pub fn as_vk(&self) -> vk::Result {
        match self {
            ShimError::Validation(_) => vk::Result::ERROR_VALIDATION_FAILED_EXT,
            ShimError::Initialization(_) => vk::Result::ERROR_INITIALIZATION_FAILED,
            ShimError::Timeout => vk::Result::TIMEOUT,
            ShimError::Driver(r) => *r,
        }
    }
}

impl From<vk::Result> for ShimError {
    fn from(r: vk::Result) -> Self {
        ShimError::Driver(r)
    }
}

pub type ShimResult<T> = Result<T, ShimError>;
