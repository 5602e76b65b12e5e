//! Read model trait for query-side views.

/// Query access to a denormalized view.
pub trait ReadModel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Entries currently held. Best effort: returns 0 while a writer holds the lock.
    fn count(&self) -> usize;
}
