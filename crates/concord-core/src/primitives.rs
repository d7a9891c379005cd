//! # Wire Primitives
//!
//! Fixed keys and limits of the concord wire format.
//!
//! These are compiled in and never configurable at runtime: both sides of
//! the boundary must agree on them byte for byte.

/// Key carrying the component type of a serialized class or instance.
///
/// - `"Movie"` (capitalized) names the class itself.
/// - `"movie"` (lowercased first letter) names an instance of the class.
pub const COMPONENT_KEY: &str = "__component";

/// Key marking a serialized instance as new (not yet acknowledged by a backend).
pub const NEW_KEY: &str = "__new";

/// Sentinel key standing in for `undefined`, which JSON cannot express.
pub const UNDEFINED_KEY: &str = "__undefined";

/// Sentinel key carrying a date as an RFC 3339 string with milliseconds.
pub const DATE_KEY: &str = "__date";

/// Sentinel key carrying the source text of a function.
pub const FUNCTION_KEY: &str = "__function";

/// Prefix reserved for bookkeeping keys. Property names may not start with it.
pub const RESERVED_PREFIX: &str = "__";

/// Maximum nesting depth walked by serialization and deserialization.
///
/// Component graphs with cycles through non-identified instances would
/// otherwise recurse forever.
pub const MAX_NESTING_DEPTH: usize = 256;

/// Largest integer a wire number can hold without losing precision.
pub const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_keys_share_reserved_prefix() {
        for key in [COMPONENT_KEY, NEW_KEY, UNDEFINED_KEY, DATE_KEY, FUNCTION_KEY] {
            assert!(key.starts_with(RESERVED_PREFIX), "{key}");
        }
    }
}
