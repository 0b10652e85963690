use std::cell::RefCell;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::TbError;
use crate::SimpleResult;

thread_local! {
    static CURRENT: RefCell<TbConfig> = RefCell::new(TbConfig::default());
}

/// Knobs of a testbench run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TbConfig {
    /// Directory receiving `coverage.xml` and `results.xml`.
    pub result_path: PathBuf,
    /// Seed of the random generator; drawn from entropy when unset.
    pub seed: Option<u64>,
    pub iterations: u32,
    /// Clock cycles the DUT gets to produce a result before it is read back.
    pub settle_cycles: u32,
    pub clock_period_ns: u64,
    /// Upper bound of the random delay a driver waits before each transaction.
    pub max_delay: u32,
}

impl Default for TbConfig {
    fn default() -> Self {
        Self {
            result_path: PathBuf::from("./"),
            seed: None,
            iterations: 50,
            settle_cycles: 100,
            clock_period_ns: 10,
            max_delay: 200,
        }
    }
}

impl TbConfig {
    pub fn from_env() -> SimpleResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> SimpleResult<Self> {
        let mut config = TbConfig::default();
        if let Some(path) = lookup("RESULT_PATH") {
            config.result_path = PathBuf::from(path);
        }
        if let Some(seed) = lookup("RANDOM_SEED") {
            config.seed = Some(parse("RANDOM_SEED", &seed)?);
        }
        if let Some(v) = lookup("TB_ITERATIONS") {
            config.iterations = parse("TB_ITERATIONS", &v)?;
        }
        if let Some(v) = lookup("TB_SETTLE_CYCLES") {
            config.settle_cycles = parse("TB_SETTLE_CYCLES", &v)?;
        }
        if let Some(v) = lookup("TB_CLOCK_PERIOD_NS") {
            config.clock_period_ns = parse("TB_CLOCK_PERIOD_NS", &v)?;
            if config.clock_period_ns < 2 {
                return Err(TbError::Config {
                    key: "TB_CLOCK_PERIOD_NS",
                    value: v,
                });
            }
        }
        if let Some(v) = lookup("TB_MAX_DELAY") {
            config.max_delay = parse("TB_MAX_DELAY", &v)?;
            if config.max_delay == 0 {
                return Err(TbError::Config {
                    key: "TB_MAX_DELAY",
                    value: v,
                });
            }
        }
        Ok(config)
    }
}

fn parse<T: FromStr>(key: &'static str, value: &str) -> SimpleResult<T> {
    value.trim().parse().map_err(|_| TbError::Config {
        key,
        value: value.to_string(),
    })
}

/// Configuration of the simulation running on this thread.
pub fn current() -> TbConfig {
    CURRENT.with(|c| c.borrow().clone())
}

pub(crate) fn install(config: TbConfig) {
    CURRENT.with(|c| *c.borrow_mut() = config);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = TbConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, TbConfig::default());
        assert_eq!(config.iterations, 50);
        assert_eq!(config.result_path, PathBuf::from("./"));
    }

    #[test]
    fn reads_overrides() {
        let config = TbConfig::from_lookup(lookup(&[
            ("RESULT_PATH", "/tmp/results"),
            ("RANDOM_SEED", "1234"),
            ("TB_ITERATIONS", " 8 "),
            ("TB_MAX_DELAY", "5"),
        ]))
        .unwrap();
        assert_eq!(config.result_path, PathBuf::from("/tmp/results"));
        assert_eq!(config.seed, Some(1234));
        assert_eq!(config.iterations, 8);
        assert_eq!(config.max_delay, 5);
        assert_eq!(config.settle_cycles, 100);
    }

    #[test]
    fn rejects_garbage() {
        let err = TbConfig::from_lookup(lookup(&[("TB_ITERATIONS", "many")])).unwrap_err();
        assert!(matches!(
            err,
            TbError::Config {
                key: "TB_ITERATIONS",
                ..
            }
        ));
        assert!(TbConfig::from_lookup(lookup(&[("TB_MAX_DELAY", "0")])).is_err());
        assert!(TbConfig::from_lookup(lookup(&[("TB_CLOCK_PERIOD_NS", "1")])).is_err());
    }

    #[test]
    fn installed_config_is_visible() {
        let config = TbConfig {
            iterations: 3,
            ..TbConfig::default()
        };
        install(config.clone());
        assert_eq!(current(), config);
    }
}
