//! Schema bundle loading.
//!
//! A bundle is one JSON document holding every named schema definition the
//! harness validates against, usually the single-file output of a JSON Schema
//! emitter:
//!
//! ```json
//! {
//!   "$schema": "https://json-schema.org/draft/2020-12/schema",
//!   "$defs": {
//!     "NetworkId": { "$id": "NetworkId.json", "type": "string" },
//!     "ControllerNetwork": {
//!       "$id": "ControllerNetwork.json",
//!       "type": "object",
//!       "properties": { "id": { "$ref": "NetworkId.json" } },
//!       "required": ["id"]
//!     }
//!   }
//! }
//! ```
//!
//! Definitions may reference each other either by bundle pointer
//! (`#/$defs/NetworkId`) or by their `$id` (`NetworkId.json`). On load every
//! such reference is rewritten to the bundle pointer form so a definition can
//! be compiled standalone, and the reference graph is checked for cycles.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use serde_json::{Map, Value};

use crate::error::{BundleError, BundleResult};

/// Dialect assumed when the bundle does not declare one.
pub const DEFAULT_DIALECT: &str = "https://json-schema.org/draft/2020-12/schema";

const DEFS_POINTER: &str = "#/$defs/";

/// An immutable, parsed schema bundle.
#[derive(Debug, Clone)]
pub struct SchemaBundle {
    dialect: String,
    /// Definitions keyed by schema ID, references already normalized
    defs: BTreeMap<String, Value>,
    /// `$id` values (with and without a `.json` suffix) mapped to schema IDs
    aliases: HashMap<String, String>,
    /// Direct references of each definition
    deps: BTreeMap<String, BTreeSet<String>>,
}

impl SchemaBundle {
    /// Read and parse a bundle file.
    pub fn load(path: impl AsRef<Path>) -> BundleResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let bundle = Self::from_json_str(&text)?;
        tracing::info!(
            path = %path.display(),
            schemas = bundle.len(),
            "Loaded schema bundle"
        );
        Ok(bundle)
    }

    /// Parse a bundle from JSON text.
    pub fn from_json_str(text: &str) -> BundleResult<Self> {
        let doc: Value = serde_json::from_str(text)?;
        Self::from_value(doc)
    }

    /// Build a bundle from an already-parsed document.
    pub fn from_value(doc: Value) -> BundleResult<Self> {
        let Value::Object(mut root) = doc else {
            return Err(BundleError::Format("bundle root must be an object".into()));
        };

        let dialect = root
            .get("$schema")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_DIALECT)
            .to_string();

        let raw_defs = match root.remove("$defs") {
            Some(Value::Object(defs)) => defs,
            Some(_) => return Err(BundleError::Format("$defs must be an object".into())),
            // Plain `{ "<id>": <schema>, ... }` mapping
            None => root
                .into_iter()
                .filter(|(key, value)| !key.starts_with('$') && value.is_object())
                .collect(),
        };

        let mut aliases = HashMap::new();
        for (key, def) in &raw_defs {
            if !def.is_object() && !def.is_boolean() {
                return Err(BundleError::Format(format!(
                    "definition {key} must be an object or boolean schema"
                )));
            }
            if let Some(id) = def.get("$id").and_then(Value::as_str) {
                aliases.insert(id.to_string(), key.clone());
                if let Some(stem) = id.strip_suffix(".json") {
                    aliases.insert(stem.to_string(), key.clone());
                }
            }
        }

        // Every name a `$ref` may use, mapped to the schema ID it denotes
        let mut index = aliases.clone();
        for key in raw_defs.keys() {
            index.insert(key.clone(), key.clone());
        }

        let mut defs = BTreeMap::new();
        let mut deps = BTreeMap::new();
        for (key, mut def) in raw_defs {
            if let Value::Object(object) = &mut def {
                // Nested `$id`/`$schema` would move the base URI away from the
                // assembled root, so the bundle root owns both.
                object.remove("$id");
                object.remove("$schema");
            }
            let mut refs = BTreeSet::new();
            normalize_refs(&mut def, &index, &mut refs);
            deps.insert(key.clone(), refs);
            defs.insert(key, def);
        }

        let bundle = Self {
            dialect,
            defs,
            aliases,
            deps,
        };
        bundle.check_dangling()?;
        bundle.check_acyclic()?;
        Ok(bundle)
    }

    /// Draft dialect declared by the bundle.
    pub fn dialect(&self) -> &str {
        &self.dialect
    }

    /// Number of definitions.
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    /// True if the bundle has no definitions.
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Schema IDs in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.defs.keys().map(String::as_str)
    }

    /// Map a schema ID or `$id` alias to the bundle's schema ID.
    pub fn canonical_id<'a>(&'a self, id: &'a str) -> Option<&'a str> {
        if let Some((key, _)) = self.defs.get_key_value(id) {
            return Some(key.as_str());
        }
        self.aliases.get(id).map(String::as_str)
    }

    /// Normalized definition for a schema ID.
    pub fn definition(&self, id: &str) -> Option<&Value> {
        self.canonical_id(id).and_then(|key| self.defs.get(key))
    }

    /// Assemble a standalone document that validates against `id`.
    ///
    /// The document carries the definition and everything it reaches through
    /// references under `$defs`, and points at the requested definition with a
    /// root `$ref`.
    pub fn standalone(&self, id: &str) -> Option<Value> {
        let key = self.canonical_id(id)?;

        let mut reachable = BTreeSet::new();
        let mut stack = vec![key.to_string()];
        while let Some(next) = stack.pop() {
            if !reachable.insert(next.clone()) {
                continue;
            }
            if let Some(children) = self.deps.get(&next) {
                stack.extend(children.iter().cloned());
            }
        }

        let defs: Map<String, Value> = reachable
            .into_iter()
            .filter_map(|name| self.defs.get(&name).map(|def| (name, def.clone())))
            .collect();

        let mut root = Map::new();
        root.insert("$schema".into(), Value::String(self.dialect.clone()));
        root.insert("$defs".into(), Value::Object(defs));
        root.insert("$ref".into(), Value::String(pointer_to(key)));
        Some(Value::Object(root))
    }

    fn check_dangling(&self) -> BundleResult<()> {
        for (key, refs) in &self.deps {
            if let Some(missing) = refs.iter().find(|name| !self.defs.contains_key(*name)) {
                return Err(BundleError::Format(format!(
                    "{key} references unknown definition {missing}"
                )));
            }
        }
        Ok(())
    }

    /// Depth-first search over the reference graph.
    fn check_acyclic(&self) -> BundleResult<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit(
            node: &str,
            deps: &BTreeMap<String, BTreeSet<String>>,
            marks: &mut HashMap<String, Mark>,
            path: &mut Vec<String>,
        ) -> Result<(), Vec<String>> {
            match marks.get(node) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    let start = path.iter().position(|n| n == node).unwrap_or(0);
                    let mut chain = path[start..].to_vec();
                    chain.push(node.to_string());
                    return Err(chain);
                }
                None => {}
            }
            marks.insert(node.to_string(), Mark::Visiting);
            path.push(node.to_string());
            if let Some(children) = deps.get(node) {
                for child in children {
                    visit(child, deps, marks, path)?;
                }
            }
            path.pop();
            marks.insert(node.to_string(), Mark::Done);
            Ok(())
        }

        let mut marks = HashMap::new();
        for key in self.deps.keys() {
            let mut path = Vec::new();
            visit(key, &self.deps, &mut marks, &mut path)
                .map_err(|chain| BundleError::SchemaCycle { chain })?;
        }
        Ok(())
    }
}

/// Rewrite every bundle-local `$ref` to `#/$defs/<id>`, collecting targets.
///
/// Pointers naming an unknown definition are kept and collected so the
/// dangling check can report them.
fn normalize_refs(value: &mut Value, index: &HashMap<String, String>, refs: &mut BTreeSet<String>) {
    match value {
        Value::Object(object) => {
            if let Some(Value::String(target)) = object.get_mut("$ref") {
                if let Some(rest) = target.strip_prefix(DEFS_POINTER) {
                    // `<name>` or `<name>/<path inside the definition>`
                    let (head, inner) = match rest.split_once('/') {
                        Some((head, inner)) => (head, Some(inner)),
                        None => (rest, None),
                    };
                    let name = unescape_pointer(head);
                    let resolved = index.get(&name).cloned().unwrap_or(name);
                    let rewritten = match inner {
                        Some(inner) => format!("{}/{inner}", pointer_to(&resolved)),
                        None => pointer_to(&resolved),
                    };
                    *target = rewritten;
                    refs.insert(resolved);
                } else {
                    let (base, fragment) = target.split_once('#').unwrap_or((target.as_str(), ""));
                    if let Some(resolved) = index.get(base).cloned() {
                        // A pointer fragment is relative to the definition
                        // the `$id` named; plain-name anchors are left as is.
                        if fragment.is_empty() {
                            *target = pointer_to(&resolved);
                        } else if fragment.starts_with('/') {
                            *target = format!("{}{fragment}", pointer_to(&resolved));
                        }
                        refs.insert(resolved);
                    }
                }
            }
            for nested in object.values_mut() {
                normalize_refs(nested, index, refs);
            }
        }
        Value::Array(items) => {
            for item in items {
                normalize_refs(item, index, refs);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {}
    }
}

fn pointer_to(id: &str) -> String {
    format!("{DEFS_POINTER}{}", id.replace('~', "~0").replace('/', "~1"))
}

fn unescape_pointer(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}
