use thiserror::Error;

/// Error produced when waiting on an operation through
/// [`SerialQueue::perform`].
///
/// [`SerialQueue::perform`]: crate::SerialQueue::perform
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error<E> {
    /// The operation ran and failed with its own error.
    #[error("operation failed")]
    Failed(#[source] E),
    /// The operation was cancelled, either before it got to run or while it
    /// was running.
    #[error("operation was cancelled")]
    Cancelled,
}

impl<E> Error<E> {
    /// Test if this is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Get the error of the failed operation, if that is what this is.
    pub fn into_failed(self) -> Option<E> {
        match self {
            Error::Failed(error) => Some(error),
            Error::Cancelled => None,
        }
    }
}
