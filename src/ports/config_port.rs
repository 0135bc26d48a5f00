//! Configuration access port trait.

/// Read access to `[section] key = value` settings.
pub trait ConfigPort {
    /// Raw value, trimmed, or `None` when the key is absent.
    fn get_string(&self, section: &str, key: &str) -> Option<String>;
    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool;
}
