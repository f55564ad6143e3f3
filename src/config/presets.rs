/// Language capability table
///
/// Maps every recognised language/version id to the executor that runs it.
/// Built once at start-up from the built-in table plus configured overrides,
/// then shared read-only across concurrent calls.
use crate::config::types::{EvaluatorConfig, ExecutorSpec};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Language id served by the bundled `zscript-worker` binary.
pub const ZSCRIPT_LANGUAGE: &str = "zscript";

const ZSCRIPT_WORKER_BINARY: &str = "zscript-worker";

const JAVASCRIPT_IDS: &[&str] = &[
    "javascript",
    "javascript-es2015",
    "javascript-es2016",
    "javascript-es2017",
    "javascript-es2018",
    "javascript-es2019",
    "javascript-es2020",
    "Z600",
];

const PYTHON_IDS: &[&str] = &[
    "python",
    "python-3",
    "python-3-7",
    "python-3-8",
    "python-3-9",
    "Z610",
];

/// Language id -> executor registry
#[derive(Debug, Clone, Default)]
pub struct LanguageRegistry {
    executors: BTreeMap<String, ExecutorSpec>,
}

impl LanguageRegistry {
    /// Registry with the built-in capability table
    pub fn new() -> Self {
        let mut registry = Self::empty();

        registry.register_javascript();
        registry.register_python();
        registry.register_zscript();

        registry
    }

    /// Registry with no languages at all
    pub fn empty() -> Self {
        Self {
            executors: BTreeMap::new(),
        }
    }

    /// Built-in table with the configured overrides applied on top
    pub fn from_config(config: &EvaluatorConfig) -> Self {
        let mut registry = Self::new();
        for (language, spec) in &config.executors {
            log::info!(
                "Executor override for {}: {} {:?}",
                language,
                spec.executable,
                spec.args
            );
            registry.register(language, spec.clone());
        }
        registry
    }

    fn register_javascript(&mut self) {
        let spec = ExecutorSpec::new("node", &["executors/javascript/executor.js"]);
        for id in JAVASCRIPT_IDS {
            self.register(id, spec.clone());
        }
    }

    fn register_python(&mut self) {
        // -u keeps the std streams unbuffered so `call` lines are seen promptly.
        let spec = ExecutorSpec::new("python3", &["-u", "executors/python3/executor.py"])
            .with_env("PYTHONPATH", "executors");
        for id in PYTHON_IDS {
            self.register(id, spec.clone());
        }
    }

    fn register_zscript(&mut self) {
        let executable = default_worker_executable().to_string_lossy().to_string();
        self.register(ZSCRIPT_LANGUAGE, ExecutorSpec::new(executable, &[]));
    }

    /// Register (or replace) the executor for a language id
    pub fn register(&mut self, language: &str, spec: ExecutorSpec) {
        self.executors.insert(language.to_string(), spec);
    }

    /// Builder-style [`LanguageRegistry::register`]
    pub fn with(mut self, language: &str, spec: ExecutorSpec) -> Self {
        self.register(language, spec);
        self
    }

    /// Executor for a language id; `None` means "not found"
    pub fn lookup(&self, language: &str) -> Option<&ExecutorSpec> {
        self.executors.get(language)
    }

    pub fn has(&self, language: &str) -> bool {
        self.executors.contains_key(language)
    }

    /// All registered language ids, sorted
    pub fn languages(&self) -> Vec<&str> {
        self.executors.keys().map(String::as_str).collect()
    }
}

/// `zscript-worker` next to the running executable, or a PATH lookup.
fn default_worker_executable() -> PathBuf {
    if let Ok(current) = std::env::current_exe() {
        if let Some(dir) = current.parent() {
            let sibling = dir.join(ZSCRIPT_WORKER_BINARY);
            if sibling.exists() {
                return sibling;
            }
            // Test binaries live one level below the target directory.
            if let Some(parent) = dir.parent() {
                let candidate = parent.join(ZSCRIPT_WORKER_BINARY);
                if candidate.exists() {
                    return candidate;
                }
            }
        }
    }
    PathBuf::from(ZSCRIPT_WORKER_BINARY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_table() {
        let registry = LanguageRegistry::new();
        assert!(registry.has("javascript-es2020"));
        assert!(registry.has("python-3-8"));
        assert!(registry.has("Z610"));
        assert!(registry.has(ZSCRIPT_LANGUAGE));
    }

    #[test]
    fn test_python_envelope() {
        let registry = LanguageRegistry::new();
        let python = registry.lookup("python").unwrap();
        assert_eq!(python.executable, "python3");
        assert_eq!(python.args[0], "-u");
        assert_eq!(python.env.get("PYTHONPATH").unwrap(), "executors");
    }

    #[test]
    fn test_javascript_ids_share_executor() {
        let registry = LanguageRegistry::new();
        let a = registry.lookup("javascript").unwrap();
        let b = registry.lookup("javascript-es2015").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.executable, "node");
    }

    #[test]
    fn test_unknown_language_is_not_found() {
        let registry = LanguageRegistry::new();
        assert!(registry.lookup("cobol-85").is_none());
        assert!(LanguageRegistry::empty().lookup("python").is_none());
    }

    #[test]
    fn test_config_overrides_builtin() {
        let mut config = EvaluatorConfig::default();
        config
            .executors
            .insert("python".to_string(), ExecutorSpec::new("/opt/py/bin/python3", &[]));
        config
            .executors
            .insert("lua-5".to_string(), ExecutorSpec::new("lua", &["worker.lua"]));

        let registry = LanguageRegistry::from_config(&config);
        assert_eq!(registry.lookup("python").unwrap().executable, "/opt/py/bin/python3");
        assert_eq!(registry.lookup("python-3").unwrap().executable, "python3");
        assert!(registry.has("lua-5"));
    }

    #[test]
    fn test_languages_sorted() {
        let registry = LanguageRegistry::empty()
            .with("b", ExecutorSpec::new("b", &[]))
            .with("a", ExecutorSpec::new("a", &[]));
        assert_eq!(registry.languages(), vec!["a", "b"]);
    }
}
