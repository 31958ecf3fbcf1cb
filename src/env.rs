//! Runtime environment detection.
//!
//! Single source of truth for test-mode detection, mirrored from the
//! pattern used to gate auth/keyring-adjacent behavior: some paths
//! (config directory, default timeouts) shift when running under the
//! test suite so tests never touch a real `~/.config`.

/// Runtime environment for the CLI binaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Production environment (default).
    Production,
    /// Test environment: use a project-local `tmp/` dir instead of the
    /// platform config directory.
    Test,
}

impl Environment {
    /// Detect the current environment from `CLIPSSH_ENV`.
    #[must_use]
    pub fn current() -> Self {
        match std::env::var("CLIPSSH_ENV").as_deref() {
            Ok("test") => Self::Test,
            _ => Self::Production,
        }
    }

    /// Returns `true` if this is the test environment.
    #[must_use]
    pub fn is_test(self) -> bool {
        self == Self::Test
    }
}

/// Convenience function equivalent to `Environment::current().is_test()`.
#[must_use]
pub fn is_test_mode() -> bool {
    Environment::current().is_test()
}

/// Application name used for the platform config directory.
pub const APP_NAME: &str = "clipssh";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_production() {
        if std::env::var("CLIPSSH_ENV").is_err() {
            assert_eq!(Environment::current(), Environment::Production);
        }
    }
}
