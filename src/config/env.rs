//! Environment variable utilities.

/// Get an optional, non-empty environment variable.
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with fallback keys.
pub fn env_with_fallbacks(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| env_opt(key))
}

pub fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_opt(key).and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_opt_ignores_blank_values() {
        // SAFETY: Test-only environment setup, variable names unique to this test
        unsafe {
            std::env::set_var("ACC_TEST_BLANK", "  ");
            std::env::set_var("ACC_TEST_FALLBACK", "value");
        }

        assert_eq!(env_opt("ACC_TEST_BLANK"), None);
        assert_eq!(
            env_with_fallbacks(&["ACC_TEST_BLANK", "ACC_TEST_FALLBACK"]).as_deref(),
            Some("value")
        );

        unsafe {
            std::env::remove_var("ACC_TEST_BLANK");
            std::env::remove_var("ACC_TEST_FALLBACK");
        }
    }

    #[test]
    fn test_parse_env() {
        // SAFETY: Test-only environment setup, variable names unique to this test
        unsafe { std::env::set_var("ACC_TEST_NUMBER", " 42 ") };
        assert_eq!(parse_env::<u32>("ACC_TEST_NUMBER"), Some(42));
        assert_eq!(parse_env::<u32>("ACC_TEST_NUMBER_MISSING"), None);
        unsafe { std::env::remove_var("ACC_TEST_NUMBER") };
    }
}
