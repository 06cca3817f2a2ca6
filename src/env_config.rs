/// Centralized environment-variable parsing helpers.
///
/// Every tuning knob read from the environment goes through these helpers
/// so the truthy/falsey and numeric parsing rules live in one place.

/// Returns `true` when the environment variable is set to a truthy value
/// (`1`, `true`, `yes`, or `on`, case-insensitive, trimmed).
#[inline]
pub(crate) fn env_var_truthy(var_name: &str) -> bool {
    std::env::var(var_name)
        .map(|raw| is_truthy(&raw))
        .unwrap_or(false)
}

/// Returns the trimmed value when the variable is set and non-empty.
#[inline]
pub(crate) fn env_var_non_empty(var_name: &str) -> Option<String> {
    std::env::var(var_name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn is_truthy(raw: &str) -> bool {
    let normalized = raw.trim().to_ascii_lowercase();
    normalized == "1" || normalized == "true" || normalized == "yes" || normalized == "on"
}

/// Parses a positive (> 0) integer, ignoring surrounding whitespace.
pub(crate) fn parse_positive_u64(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok().filter(|value| *value > 0)
}

/// Declares a cached boolean feature flag backed by a `OnceLock<bool>`.
///
/// `enabled_unless(fn_name, "ENV_VAR")` returns `true` unless the env var
/// is truthy (the feature is on by default, disabled by the env var).
macro_rules! define_env_flag {
    (enabled_unless($fn_name:ident, $var:expr)) => {
        #[inline]
        fn $fn_name() -> bool {
            static VALUE: ::std::sync::OnceLock<bool> = ::std::sync::OnceLock::new();
            *VALUE.get_or_init(|| !$crate::env_config::env_var_truthy($var))
        }
    };
}

pub(crate) use define_env_flag;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_values_are_case_insensitive_and_trimmed() {
        assert!(is_truthy(" ON "));
        assert!(is_truthy("Yes"));
        assert!(is_truthy("1"));
        assert!(!is_truthy("0"));
        assert!(!is_truthy("off"));
    }

    #[test]
    fn positive_parse_rejects_zero_and_garbage() {
        assert_eq!(parse_positive_u64(" 42 "), Some(42));
        assert_eq!(parse_positive_u64("0"), None);
        assert_eq!(parse_positive_u64("-3"), None);
        assert_eq!(parse_positive_u64("fast"), None);
    }

    #[test]
    fn unset_variables_fall_back() {
        let name = "SNOW_TIMELAPSE_TEST_SURELY_UNSET_VARIABLE";
        assert!(!env_var_truthy(name));
        assert_eq!(env_var_non_empty(name), None);
    }
}
