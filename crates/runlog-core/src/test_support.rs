//! Process-environment scoping for tests that read `RUNLOG_*` overrides.
//! Callers also mark themselves `#[serial]`; the environment is process-wide.

use crate::config::ENV_KEYS;

/// Snapshot of every `RUNLOG_*` variable the config layer reads. All of them
/// start out unset inside the scope and get their prior values back on drop.
pub(crate) struct RunlogEnv {
    snapshot: Vec<(&'static str, Option<String>)>,
}

impl RunlogEnv {
    pub(crate) fn isolated() -> Self {
        let snapshot = ENV_KEYS
            .iter()
            .map(|&key| (key, std::env::var(key).ok()))
            .collect();
        for key in ENV_KEYS {
            std::env::remove_var(key);
        }
        Self { snapshot }
    }

    pub(crate) fn set(&self, key: &'static str, value: &str) -> &Self {
        assert!(ENV_KEYS.contains(&key), "{key} is not a runlog override");
        std::env::set_var(key, value);
        self
    }
}

impl Drop for RunlogEnv {
    fn drop(&mut self) {
        for (key, saved) in self.snapshot.drain(..) {
            match saved {
                Some(value) => std::env::set_var(key, value),
                None => std::env::remove_var(key),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ENV_BUSY_MS;
    use serial_test::serial;

    #[test]
    #[serial]
    fn scope_clears_then_restores() {
        std::env::set_var(ENV_BUSY_MS, "17");
        {
            let env = RunlogEnv::isolated();
            assert!(std::env::var(ENV_BUSY_MS).is_err());
            env.set(ENV_BUSY_MS, "99");
            assert_eq!(std::env::var(ENV_BUSY_MS).unwrap(), "99");
        }
        assert_eq!(std::env::var(ENV_BUSY_MS).unwrap(), "17");
        std::env::remove_var(ENV_BUSY_MS);
    }
}
