//! Error aggregation for multi-step teardown.
//!
//! Closing a fixture touches several independent resources (a client, a
//! server, a tunnel, a working directory). Every one of them must still be
//! attempted when an earlier one fails, so failures are collected into an
//! [`ErrorList`] instead of short-circuiting with `?`.

use std::fmt;

/// An ordered collection of errors produced by independent steps.
///
/// # Example
///
/// ```rust
/// use common::error::ErrorList;
///
/// let mut errors: ErrorList<std::io::Error> = ErrorList::new();
/// errors.push_result(Ok(()));
/// errors.push(std::io::Error::other("tunnel close failed"));
/// assert_eq!(errors.len(), 1);
/// ```
#[derive(Debug)]
pub struct ErrorList<E> {
    errors: Vec<E>,
}

impl<E> ErrorList<E> {
    /// Create an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// Record an error.
    pub fn push(&mut self, error: E) {
        self.errors.push(error);
    }

    /// Record the error of a step, if it failed.
    pub fn push_result<T>(&mut self, result: Result<T, E>) {
        if let Err(e) = result {
            self.errors.push(e);
        }
    }

    /// Number of recorded errors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// True when every step succeeded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Iterate over recorded errors in the order they were pushed.
    pub fn iter(&self) -> std::slice::Iter<'_, E> {
        self.errors.iter()
    }

    /// Consume the list, returning the recorded errors.
    #[must_use]
    pub fn into_vec(self) -> Vec<E> {
        self.errors
    }

    /// Collapse the list into a single result.
    ///
    /// No errors yields `Ok(())`, exactly one error is returned as-is, and
    /// two or more are handed to `combine` so the caller can wrap them in its
    /// own aggregate variant.
    ///
    /// # Errors
    ///
    /// Returns the single recorded error, or the combined error when more
    /// than one step failed.
    pub fn into_result<F>(mut self, combine: F) -> Result<(), E>
    where
        F: FnOnce(ErrorList<E>) -> E,
    {
        match self.errors.len() {
            0 => Ok(()),
            1 => match self.errors.pop() {
                Some(e) => Err(e),
                None => Ok(()),
            },
            _ => Err(combine(self)),
        }
    }
}

impl<E> Default for ErrorList<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> From<Vec<E>> for ErrorList<E> {
    fn from(errors: Vec<E>) -> Self {
        Self { errors }
    }
}

impl<E> IntoIterator for ErrorList<E> {
    type Item = E;
    type IntoIter = std::vec::IntoIter<E>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

impl<E: fmt::Display> fmt::Display for ErrorList<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors occurred:", self.errors.len())?;
        for (i, e) in self.errors.iter().enumerate() {
            write!(f, "\n\t* [{}] {}", i + 1, e)?;
        }
        Ok(())
    }
}

impl<E: std::error::Error> std::error::Error for ErrorList<E> {}

#[cfg(test)]
mod tests {
    use super::*;
    use thiserror::Error;

    #[derive(Debug, Error, PartialEq)]
    enum StepError {
        #[error("step {0} failed")]
        Step(u32),
        #[error("{0}")]
        Many(String),
    }

    fn combine(list: ErrorList<StepError>) -> StepError {
        StepError::Many(list.to_string())
    }

    #[test]
    fn test_empty_list_is_ok() {
        let list: ErrorList<StepError> = ErrorList::new();
        assert!(list.is_empty());
        assert_eq!(list.into_result(combine), Ok(()));
    }

    #[test]
    fn test_single_error_returned_unwrapped() {
        let mut list = ErrorList::new();
        list.push_result::<()>(Err(StepError::Step(1)));
        list.push_result(Ok(()));

        assert_eq!(list.len(), 1);
        assert_eq!(list.into_result(combine), Err(StepError::Step(1)));
    }

    #[test]
    fn test_multiple_errors_are_combined_in_order() {
        let mut list = ErrorList::new();
        list.push(StepError::Step(1));
        list.push(StepError::Step(2));

        let Err(StepError::Many(message)) = list.into_result(combine) else {
            unreachable!("two errors must be combined");
        };
        assert!(message.starts_with("2 errors occurred:"));
        let first = message.find("step 1 failed");
        let second = message.find("step 2 failed");
        assert!(first.is_some() && second.is_some());
        assert!(first < second);
    }

    #[test]
    fn test_from_vec_and_into_iter() {
        let list = ErrorList::from(vec![StepError::Step(3), StepError::Step(4)]);
        let collected: Vec<StepError> = list.into_iter().collect();
        assert_eq!(collected, vec![StepError::Step(3), StepError::Step(4)]);
    }
}
