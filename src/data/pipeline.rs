// ============================================================
// Layer 4 — Dynamic Item Dataset
// ============================================================
// A dataset whose records are extended lazily by declared
// processing steps ("dynamic items").
//
// Every dynamic item names the keys it TAKES and the keys it
// PROVIDES:
//
//   wav ──[audio]──▶ sig
//   phn ──[split]──▶ phn_list ──[encode]──▶ phn_encoded ──[bos]──▶ phn_encoded_bos
//
// Nothing runs when items are added. When a record is fetched
// the dataset walks backwards from the requested output keys,
// runs only the items that are needed, in dependency order, and
// caches every produced value for the duration of that one
// access — so a later stage never recomputes an earlier one.
//
// The set of keys returned per record is controlled with
// set_output_keys(); output_keys_as() gives a temporary view
// with different keys (used to fit the label encoder on
// "phn_list" before the encoding stages exist).
//
// Reference: Rust Book §13 (Closures), §16 (Arc / Send / Sync)

use std::{collections::HashMap, path::Path, sync::Arc};

use crate::data::error::{DataError, Result};
use crate::data::manifest::load_manifest;
use crate::domain::value::{Record, Value};

type ItemFn = Arc<dyn Fn(&[&Value]) -> Result<Vec<Value>> + Send + Sync>;

// ─── DynamicItem ──────────────────────────────────────────────────────────────
/// One declared processing step.
#[derive(Clone)]
pub struct DynamicItem {
    takes:    Vec<String>,
    provides: Vec<String>,
    func:     ItemFn,
}

impl DynamicItem {
    /// A step producing a single key.
    pub fn new<F>(takes: &[&str], provides: &str, func: F) -> Self
    where
        F: Fn(&[&Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            takes:    takes.iter().map(|k| k.to_string()).collect(),
            provides: vec![provides.to_string()],
            func:     Arc::new(move |args: &[&Value]| func(args).map(|v| vec![v])),
        }
    }

    /// A step producing several keys at once, in `provides` order.
    pub fn multi<F>(takes: &[&str], provides: &[&str], func: F) -> Self
    where
        F: Fn(&[&Value]) -> Result<Vec<Value>> + Send + Sync + 'static,
    {
        Self {
            takes:    takes.iter().map(|k| k.to_string()).collect(),
            provides: provides.iter().map(|k| k.to_string()).collect(),
            func:     Arc::new(func),
        }
    }

}

impl std::fmt::Debug for DynamicItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicItem")
            .field("takes", &self.takes)
            .field("provides", &self.provides)
            .finish()
    }
}

// ─── Pipeline ─────────────────────────────────────────────────────────────────
/// An ordered chain of single-input stages. Each stage consumes
/// the value produced by the stage before it:
///
/// ```ignore
/// Pipeline::takes("phn")
///     .stage("phn_list", split)
///     .stage("phn_encoded", encode)
/// ```
pub struct Pipeline {
    input:  String,
    stages: Vec<DynamicItem>,
}

impl Pipeline {
    pub fn takes(key: &str) -> Self {
        Self { input: key.to_string(), stages: Vec::new() }
    }

    pub fn stage<F>(mut self, provides: &str, func: F) -> Self
    where
        F: Fn(&Value) -> Result<Value> + Send + Sync + 'static,
    {
        let input = self
            .stages
            .last()
            .map(|s| s.provides[0].clone())
            .unwrap_or_else(|| self.input.clone());
        self.stages.push(DynamicItem::new(&[input.as_str()], provides, move |args| {
            func(args[0])
        }));
        self
    }

    pub fn into_items(self) -> Vec<DynamicItem> {
        self.stages
    }
}

// ─── DynamicItemDataset ───────────────────────────────────────────────────────
#[derive(Clone, Debug)]
pub struct DynamicItemDataset {
    records:     Arc<Vec<Record>>,
    items:       Vec<DynamicItem>,
    providers:   HashMap<String, usize>,
    output_keys: Vec<String>,
}

impl DynamicItemDataset {
    /// Wrap already-loaded records. All static keys are output
    /// keys until set_output_keys() says otherwise.
    pub fn from_records(records: Vec<Record>) -> Self {
        let output_keys = records
            .first()
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default();
        Self {
            records: Arc::new(records),
            items: Vec::new(),
            providers: HashMap::new(),
            output_keys,
        }
    }

    /// Load a JSON manifest, expanding `$name` placeholders.
    pub fn from_json(path: &Path, replacements: &[(&str, &str)]) -> Result<Self> {
        Ok(Self::from_records(load_manifest(path, replacements)?))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn output_keys(&self) -> &[String] {
        &self.output_keys
    }

    fn is_static_key(&self, key: &str) -> bool {
        self.records.first().is_some_and(|r| r.contains_key(key))
    }

    pub fn add_dynamic_item(&mut self, item: DynamicItem) -> Result<()> {
        for key in &item.provides {
            if self.providers.contains_key(key) || self.is_static_key(key) {
                return Err(DataError::DuplicateProvider(key.clone()));
            }
        }
        let index = self.items.len();
        for key in &item.provides {
            self.providers.insert(key.clone(), index);
        }
        self.items.push(item);
        Ok(())
    }

    pub fn add_pipeline(&mut self, pipeline: Pipeline) -> Result<()> {
        for item in pipeline.into_items() {
            self.add_dynamic_item(item)?;
        }
        Ok(())
    }

    /// Restrict what get() returns to exactly these keys.
    pub fn set_output_keys(&mut self, keys: &[&str]) -> Result<()> {
        for key in keys {
            if !self.providers.contains_key(*key) && !self.is_static_key(key) {
                return Err(DataError::UnknownKey(key.to_string()));
            }
        }
        self.output_keys = keys.iter().map(|k| k.to_string()).collect();
        Ok(())
    }

    /// A view of the same data producing different output keys.
    pub fn output_keys_as(&self, keys: &[&str]) -> Result<Self> {
        let mut view = self.clone();
        view.set_output_keys(keys)?;
        Ok(view)
    }

    /// Fetch one record, computing only what the output keys need.
    pub fn get(&self, index: usize) -> Result<Record> {
        let record = self.records.get(index).ok_or(DataError::OutOfRange {
            index,
            len: self.records.len(),
        })?;

        let mut cache: HashMap<String, Value> = HashMap::new();
        let mut visiting: Vec<usize> = Vec::new();
        for key in &self.output_keys {
            self.resolve(key, record, &mut cache, &mut visiting)?;
        }

        let mut out = Record::new();
        for key in &self.output_keys {
            if let Some(value) = cache.remove(key) {
                out.insert(key.clone(), value);
            }
        }
        Ok(out)
    }

    pub fn iter(&self) -> impl Iterator<Item = Result<Record>> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }

    fn resolve(
        &self,
        key:      &str,
        record:   &Record,
        cache:    &mut HashMap<String, Value>,
        visiting: &mut Vec<usize>,
    ) -> Result<()> {
        if cache.contains_key(key) {
            return Ok(());
        }

        let Some(&item_index) = self.providers.get(key) else {
            return match record.get(key) {
                Some(value) => {
                    cache.insert(key.to_string(), value.clone());
                    Ok(())
                }
                None => Err(DataError::MissingKey {
                    id:  record_id(record),
                    key: key.to_string(),
                }),
            };
        };

        if visiting.contains(&item_index) {
            return Err(DataError::Cycle(key.to_string()));
        }
        visiting.push(item_index);

        let item = &self.items[item_index];
        for dep in &item.takes {
            self.resolve(dep, record, cache, visiting)?;
        }

        let outputs = {
            let args: Vec<&Value> = item.takes.iter().map(|k| &cache[k]).collect();
            (item.func)(&args).map_err(|e| e.in_record(&record_id(record)))?
        };
        if outputs.len() != item.provides.len() {
            return Err(DataError::Arity {
                key:      key.to_string(),
                expected: item.provides.len(),
                got:      outputs.len(),
            });
        }
        for (name, value) in item.provides.iter().zip(outputs) {
            cache.insert(name.clone(), value);
        }

        visiting.pop();
        Ok(())
    }
}

fn record_id(record: &Record) -> String {
    record
        .get("id")
        .and_then(Value::as_text)
        .unwrap_or("<no id>")
        .to_string()
}
