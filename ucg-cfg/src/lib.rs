//! Configuration flags for `ucg`.
//!
//! Flags are defined statically as [`Config`]s and registered into a [`ConfigSet`] at
//! startup. Values are then layered on top of the defaults, first from the environment with
//! [`ConfigSet::load_env`], then from explicit overrides with [`ConfigSet::try_update`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{
    Arc, RwLock,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use compact_str::CompactString;

/// A named flag with a description and a default value, usually defined as a `static`.
pub struct Config<V: ConfigDefault> {
    name: &'static str,
    desc: &'static str,
    default: V,
}

impl<V: ConfigDefault> Config<V> {
    /// Usable in a `static` initializer.
    pub const fn new(name: &'static str, desc: &'static str, default: V) -> Self {
        Config {
            name,
            desc,
            default,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Current value of this flag within `set`.
    ///
    /// # Panics
    /// * If this [`Config`] was never registered with the [`ConfigSet`].
    pub fn read(&self, set: &ConfigSet) -> V::StoredValue {
        let Some(entry) = set.configs.get(self.name) else {
            panic!("config '{}' was never registered", self.name);
        };
        V::from_shared(&entry.value)
    }
}

/// The registered [`Config`]s and their current values.
///
/// Clones share values, an update through one is visible through all of them.
#[derive(Clone, Debug)]
pub struct ConfigSet {
    configs: Arc<BTreeMap<CompactString, ConfigSetEntry>>,
}

impl ConfigSet {
    pub fn builder() -> ConfigSetBuilder {
        ConfigSetBuilder::default()
    }

    /// Set `config` to `value`.
    ///
    /// # Panics
    /// * If `config` was never registered.
    pub fn update<V: ConfigDefault>(&self, config: &'static Config<V>, value: V) {
        let entry = self
            .configs
            .get(config.name)
            .expect("programming error, updating an unregistered config");
        entry.value.update(value.to_value());
    }

    /// Parse `value` and assign it to the config named `name`, e.g. from a command line flag.
    ///
    /// # Errors
    ///
    /// * If nothing named `name` was registered.
    /// * If `value` doesn't parse as the config's type.
    ///
    pub fn try_update(&self, name: &str, value: &str) -> Result<(), anyhow::Error> {
        let entry = self
            .configs
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("no Config named '{name}' found"))?;
        entry.value.update_parse(value)?;
        Ok(())
    }

    /// Apply values from the environment, returning how many were found.
    ///
    /// For every registered config we call `lookup` with `<PREFIX>_<NAME>` uppercased, e.g.
    /// `UCG_WALK_THREADS` for the config `walk_threads` and prefix `ucg`. Pass
    /// `|var| std::env::var(var).ok()` to read the process environment.
    pub fn load_env<F>(&self, prefix: &str, lookup: F) -> Result<usize, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut applied = 0;
        for (name, entry) in &*self.configs {
            let var = format!("{prefix}_{name}").to_ascii_uppercase();
            let Some(value) = lookup(&var) else {
                continue;
            };
            entry
                .value
                .update_parse(&value)
                .map_err(|err| anyhow::anyhow!("invalid value for {var}: {err}"))?;
            applied += 1;
        }
        Ok(applied)
    }
}

impl fmt::Display for ConfigSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, entry) in &*self.configs {
            writeln!(f, "{name} = {}", entry.value)?;
            writeln!(f, "    {}", entry.desc)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
struct ConfigSetEntry {
    value: SharedValue,
    desc: &'static str,
}

/// Collects [`Config`]s before any values are shared.
#[derive(Default, Debug)]
pub struct ConfigSetBuilder {
    configs: BTreeMap<CompactString, (Value, &'static str)>,
}

impl ConfigSetBuilder {
    /// Add `config`, starting at its default.
    ///
    /// # Panics
    /// * If a [`Config`] with the same name was already registered.
    pub fn register<V: ConfigDefault>(&mut self, config: &'static Config<V>) -> &mut Self {
        let value = config.default.to_value();
        let prev = self
            .configs
            .insert(CompactString::const_new(config.name), (value, config.desc));
        if let Some((prev, _)) = prev {
            panic!("config '{}' registered more than once, previously {prev:?}", config.name);
        }
        self
    }

    pub fn build(self) -> ConfigSet {
        let configs = self
            .configs
            .into_iter()
            .map(|(name, (value, desc))| {
                let entry = ConfigSetEntry {
                    value: value.into_shared(),
                    desc,
                };
                (name, entry)
            })
            .collect();
        ConfigSet {
            configs: Arc::new(configs),
        }
    }
}

/// Value types a [`Config`] can hold.
pub trait ConfigDefault {
    /// The type returned when reading from a [`ConfigSet`].
    type StoredValue;

    fn to_value(&self) -> Value;
    fn from_shared(val: &SharedValue) -> Self::StoredValue;
}

impl ConfigDefault for bool {
    type StoredValue = bool;

    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_shared(val: &SharedValue) -> Self::StoredValue {
        let SharedValue::Bool(val) = val else {
            panic!("programming error, found {val:?} for bool")
        };
        val.load(Ordering::SeqCst)
    }
}

impl ConfigDefault for u64 {
    type StoredValue = u64;

    fn to_value(&self) -> Value {
        Value::U64(*self)
    }

    fn from_shared(val: &SharedValue) -> Self::StoredValue {
        let SharedValue::U64(val) = val else {
            panic!("programming error, found {val:?} for u64")
        };
        val.load(Ordering::SeqCst)
    }
}

impl ConfigDefault for &str {
    type StoredValue = CompactString;

    fn to_value(&self) -> Value {
        Value::String(CompactString::new(self))
    }

    fn from_shared(val: &SharedValue) -> Self::StoredValue {
        let SharedValue::String(val) = val else {
            panic!("programming error, found {val:?} for str")
        };
        let read_lock = val.read().expect("SharedValue::String lock poisoned");
        read_lock.clone()
    }
}

/// A configuration value.
///
/// An enum as opposed to something like `Box<dyn Value>` is cheaper and easier to reason
/// about.
#[derive(Debug)]
pub enum Value {
    Bool(bool),
    U64(u64),
    String(CompactString),
}

impl Value {
    fn into_shared(self) -> SharedValue {
        match self {
            Value::Bool(val) => SharedValue::Bool(Arc::new(AtomicBool::new(val))),
            Value::U64(val) => SharedValue::U64(Arc::new(AtomicU64::new(val))),
            Value::String(val) => SharedValue::String(Arc::new(RwLock::new(val))),
        }
    }
}

/// Shareable instance of [`Value`].
#[derive(Clone, Debug)]
pub enum SharedValue {
    Bool(Arc<AtomicBool>),
    U64(Arc<AtomicU64>),
    String(Arc<RwLock<CompactString>>),
}

impl SharedValue {
    fn update(&self, value: Value) {
        match (self, value) {
            (SharedValue::Bool(shared), Value::Bool(val)) => {
                shared.store(val, Ordering::SeqCst);
            }
            (SharedValue::U64(shared), Value::U64(val)) => {
                shared.store(val, Ordering::SeqCst);
            }
            (SharedValue::String(shared), Value::String(val)) => {
                let mut write_lock = shared.write().expect("SharedValue::String lock poisoned");
                *write_lock = val;
            }
            (shared, val) => unreachable!("tried to update shared {shared:?} with {val:?}"),
        }
    }

    fn update_parse(&self, value: &str) -> Result<(), anyhow::Error> {
        match self {
            SharedValue::Bool(shared) => {
                shared.store(is_truthy(value), Ordering::SeqCst);
            }
            SharedValue::U64(shared) => {
                let val: u64 = value.trim().parse()?;
                shared.store(val, Ordering::SeqCst);
            }
            SharedValue::String(shared) => {
                let mut write_lock = shared.write().expect("SharedValue::String lock poisoned");
                write_lock.clear();
                write_lock.push_str(value);
            }
        }

        Ok(())
    }
}

impl fmt::Display for SharedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SharedValue::Bool(val) => write!(f, "{}", val.load(Ordering::SeqCst)),
            SharedValue::U64(val) => write!(f, "{}", val.load(Ordering::SeqCst)),
            SharedValue::String(val) => {
                let read_lock = val.read().expect("SharedValue::String lock poisoned");
                write!(f, "{}", *read_lock)
            }
        }
    }
}

/// Returns true for anything other than `'0', '', 'no', 'false'`, ignoring case.
fn is_truthy(value: &str) -> bool {
    static FALSEY: &[&str] = &["0", "", "no", "false"];
    let value = value.trim();
    !FALSEY.iter().any(|falsey| value.eq_ignore_ascii_case(falsey))
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use super::*;

    static WALK_THREADS: Config<u64> = Config::new("walk_threads", "Threads to walk with.", 4);
    static WALK_BATCH_STAT: Config<bool> =
        Config::new("walk_batch_stat", "Stat entries while listing.", true);
    static WALK_LABEL: Config<&'static str> = Config::new("walk_label", "A label.", "default");

    fn test_set() -> ConfigSet {
        let mut config_set = ConfigSet::builder();
        config_set
            .register(&WALK_THREADS)
            .register(&WALK_BATCH_STAT)
            .register(&WALK_LABEL);
        config_set.build()
    }

    #[test]
    fn smoketest_read() {
        let config_set = test_set();

        assert_eq!(WALK_THREADS.read(&config_set), 4);
        assert!(WALK_BATCH_STAT.read(&config_set));
        assert_eq!(WALK_LABEL.read(&config_set), "default");
    }

    #[test]
    fn smoketest_update() {
        let config_set = test_set();
        let shared = config_set.clone();

        config_set.update(&WALK_THREADS, 16);
        assert_eq!(WALK_THREADS.read(&config_set), 16);
        assert_eq!(WALK_THREADS.read(&shared), 16);

        config_set.update(&WALK_LABEL, "hello world!");
        assert_eq!(WALK_LABEL.read(&shared), "hello world!");
    }

    #[test]
    fn smoketest_parse() {
        let config_set = test_set();

        config_set.try_update("walk_batch_stat", "no").unwrap();
        assert!(!WALK_BATCH_STAT.read(&config_set));
        config_set.try_update("walk_batch_stat", "yes").unwrap();
        assert!(WALK_BATCH_STAT.read(&config_set));

        config_set.try_update("walk_threads", " 12 ").unwrap();
        assert_eq!(WALK_THREADS.read(&config_set), 12);

        assert!(config_set.try_update("walk_threads", "many").is_err());
        assert!(config_set.try_update("not_a_config", "1").is_err());
        // A failed parse leaves the previous value.
        assert_eq!(WALK_THREADS.read(&config_set), 12);
    }

    #[test]
    fn smoketest_load_env() {
        let config_set = test_set();
        let env: HashMap<&str, &str> =
            [("UCG_WALK_THREADS", "2"), ("UCG_WALK_BATCH_STAT", "FALSE")]
                .into_iter()
                .collect();

        let applied = config_set
            .load_env("ucg", |var| env.get(var).map(|val| val.to_string()))
            .unwrap();
        assert_eq!(applied, 2);
        assert_eq!(WALK_THREADS.read(&config_set), 2);
        assert!(!WALK_BATCH_STAT.read(&config_set));
        assert_eq!(WALK_LABEL.read(&config_set), "default");

        let err = config_set
            .load_env("ucg", |var| (var == "UCG_WALK_THREADS").then(|| "-1".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("UCG_WALK_THREADS"), "{err}");
    }

    #[test]
    fn test_display() {
        let rendered = test_set().to_string();
        assert!(rendered.contains("walk_threads = 4\n    Threads to walk with.\n"), "{rendered}");
    }

    #[test]
    #[should_panic(expected = "registered more than once")]
    fn test_register_twice() {
        let mut config_set = ConfigSet::builder();
        config_set.register(&WALK_THREADS).register(&WALK_THREADS);
    }

    #[test]
    fn test_is_truthy() {
        for falsey in ["0", "", "no", "NO", "false", "False"] {
            assert!(!is_truthy(falsey), "{falsey}");
        }
        for truthy in ["1", "yes", "true", "on"] {
            assert!(is_truthy(truthy), "{truthy}");
        }
    }
}
