use std::collections::{BTreeMap, HashMap, HashSet};

use super::names::is_stdlib;
use super::Raised;

/// Abstract value of a name while a unit executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Anything the executor does not track precisely
    Opaque,
    /// A module object, by dotted path
    Module(String),
    /// `None`: a fabricated attribute of a placeholder module, or the literal
    Placeholder,
}

#[derive(Debug)]
struct ModuleEntry {
    real: bool,
    attrs: BTreeMap<String, Value>,
}

/// Import resolution for one validation run.
///
/// Stdlib modules and configured known modules resolve for real. Everything
/// else gets an empty placeholder module; the resolver owns its cache, so
/// placeholders from one run never leak into another.
#[derive(Debug, Default)]
pub struct ModuleResolver {
    known: HashSet<String>,
    cache: HashMap<String, ModuleEntry>,
}

impl ModuleResolver {
    pub fn new(known_modules: &[String]) -> Self {
        Self {
            known: known_modules.iter().cloned().collect(),
            cache: HashMap::new(),
        }
    }

    fn resolves(&self, path: &str) -> bool {
        let root = path.split('.').next().unwrap_or(path);
        is_stdlib(path) || self.known.contains(root) || self.known.contains(path)
    }

    /// `__import__(path, fromlist=fromlist, level=level)`. Creates every module
    /// on the dotted path and links children into their parents.
    pub(crate) fn import(
        &mut self,
        path: &str,
        level: usize,
        fromlist: &[&str],
    ) -> Result<(), Raised> {
        if level > 0 {
            return Err(Raised::ImportError {
                module: path.to_string(),
                reason: "attempted relative import with no known parent package".to_string(),
            });
        }

        let real = self.resolves(path);
        if !real && !self.cache.contains_key(path) {
            tracing::debug!(module = path, "unresolved import, using placeholder module");
        }
        self.ensure(path, real);

        if !real {
            if let Some(entry) = self.cache.get_mut(path) {
                for name in fromlist {
                    entry
                        .attrs
                        .entry(name.to_string())
                        .or_insert(Value::Placeholder);
                }
            }
        }
        Ok(())
    }

    fn ensure(&mut self, path: &str, real: bool) {
        if self.cache.contains_key(path) {
            return;
        }
        self.cache.insert(
            path.to_string(),
            ModuleEntry {
                real,
                attrs: BTreeMap::new(),
            },
        );

        if let Some((parent, leaf)) = path.rsplit_once('.') {
            self.ensure(parent, real);
            if let Some(entry) = self.cache.get_mut(parent) {
                entry
                    .attrs
                    .insert(leaf.to_string(), Value::Module(path.to_string()));
            }
        }
    }

    /// `getattr(module, name)`. Real modules are not introspected, so any
    /// attribute of theirs is opaque; placeholders only have what was linked
    /// or fabricated into them.
    pub(crate) fn attribute(&self, module: &str, name: &str) -> Result<Value, Raised> {
        let Some(entry) = self.cache.get(module) else {
            return Ok(Value::Opaque);
        };
        match entry.attrs.get(name) {
            Some(value) => Ok(value.clone()),
            None if entry.real => Ok(Value::Opaque),
            None => Err(Raised::other(
                "AttributeError",
                format!("module '{module}' has no attribute '{name}'"),
            )),
        }
    }

    /// Record `module.name = ...`.
    pub(crate) fn set_attribute(&mut self, module: &str, name: &str) {
        if let Some(entry) = self.cache.get_mut(module) {
            entry.attrs.insert(name.to_string(), Value::Opaque);
        }
    }

    pub fn is_placeholder(&self, module: &str) -> bool {
        self.cache.get(module).is_some_and(|entry| !entry.real)
    }

    /// Placeholder modules created so far, sorted.
    pub fn placeholders(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .cache
            .iter()
            .filter(|(_, entry)| !entry.real)
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stdlib_resolves_for_real() {
        let mut resolver = ModuleResolver::default();
        resolver.import("os.path", 0, &[]).unwrap();
        assert!(!resolver.is_placeholder("os"));
        assert_eq!(
            resolver.attribute("os", "path").unwrap(),
            Value::Module("os.path".into())
        );
        assert_eq!(resolver.attribute("os", "getcwd").unwrap(), Value::Opaque);
        assert!(resolver.placeholders().is_empty());
    }

    #[test]
    fn test_unknown_module_gets_placeholder_chain() {
        let mut resolver = ModuleResolver::default();
        resolver.import("vendor.sub.leaf", 0, &[]).unwrap();
        assert_eq!(
            resolver.placeholders(),
            vec!["vendor", "vendor.sub", "vendor.sub.leaf"]
        );
        assert_eq!(
            resolver.attribute("vendor", "sub").unwrap(),
            Value::Module("vendor.sub".into())
        );
        let err = resolver.attribute("vendor.sub.leaf", "thing").unwrap_err();
        assert_eq!(err.exception(), "AttributeError");
    }

    #[test]
    fn test_fromlist_fabricates_none_attributes() {
        let mut resolver = ModuleResolver::default();
        resolver.import("vendor.sub", 0, &[]).unwrap();
        resolver.import("vendor", 0, &["sub", "Base"]).unwrap();
        // already linked submodule is kept, missing name becomes a placeholder
        assert_eq!(
            resolver.attribute("vendor", "sub").unwrap(),
            Value::Module("vendor.sub".into())
        );
        assert_eq!(resolver.attribute("vendor", "Base").unwrap(), Value::Placeholder);
    }

    #[test]
    fn test_relative_import_raises() {
        let mut resolver = ModuleResolver::default();
        let err = resolver.import("sibling", 1, &["x"]).unwrap_err();
        assert_eq!(err.exception(), "ImportError");
        assert!(resolver.placeholders().is_empty());
    }

    #[test]
    fn test_known_modules_resolve() {
        let mut resolver = ModuleResolver::new(&["numpy".to_string()]);
        resolver.import("numpy.linalg", 0, &["norm"]).unwrap();
        assert!(!resolver.is_placeholder("numpy.linalg"));
        assert_eq!(resolver.attribute("numpy.linalg", "norm").unwrap(), Value::Opaque);
    }

    #[test]
    fn test_caches_are_independent() {
        let mut first = ModuleResolver::default();
        first.import("ghost", 0, &[]).unwrap();
        let second = ModuleResolver::default();
        assert!(first.is_placeholder("ghost"));
        assert!(!second.is_placeholder("ghost"));
    }
}
