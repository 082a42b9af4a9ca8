//! Aggregate result of a token invalidation.

use crate::error::AuthError;

/// The outcome of invalidating one or more tokens.
///
/// Invalidation is a bulk operation with partial-failure semantics: some
/// documents flip to invalidated, some already were, and some fail. The
/// aggregate reports all three groups; retried attempts fold their
/// partial results into one final value.
#[derive(Debug, Default)]
pub struct TokensInvalidationResult {
    /// Document ids whose flag flipped to invalidated in this call.
    pub invalidated: Vec<String>,
    /// Document ids that were already invalidated.
    pub previously_invalidated: Vec<String>,
    /// Errors for documents that could not be updated.
    pub errors: Vec<AuthError>,
}

impl TokensInvalidationResult {
    /// An empty result, used when there was nothing to invalidate.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Total number of documents this result accounts for.
    #[must_use]
    pub fn len(&self) -> usize {
        self.invalidated.len() + self.previously_invalidated.len() + self.errors.len()
    }

    /// Returns `true` if nothing was processed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
