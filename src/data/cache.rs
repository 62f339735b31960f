/// Storage for generated completions, keyed by a hash of the prompt.
///
/// Implementations must not panic; a failed lookup is a miss and a failed
/// store is logged and dropped.
pub trait CompletionCache {
    /// Returns the cached completion for `key`, if any.
    fn lookup(&self, key: &str) -> Option<String>;

    /// Stores `completion` under `key`.
    ///
    /// # Notes
    /// Fire-and-forget: storage errors are logged by the implementation and never returned.
    fn store(&self, key: &str, completion: &str);
}
