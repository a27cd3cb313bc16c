//! The hard-coded map reduce applications, selected by name on the command line

use std::sync::Arc;

use crate::mr::pipeline::{KeyValue, MapFn, ReduceFn};

/// A named Map/Reduce pair
#[derive(Clone)]
pub struct Application {
    name: String,
    map: Arc<MapFn>,
    reduce: Arc<ReduceFn>,
}

impl Application {
    pub fn new<M, R>(name: impl Into<String>, map: M, reduce: R) -> Self
    where
        M: Fn(&str) -> Vec<KeyValue> + Send + Sync + 'static,
        R: Fn(&str, Vec<&str>) -> String + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            map: Arc::new(map),
            reduce: Arc::new(reduce),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn map_fn(&self) -> &MapFn {
        self.map.as_ref()
    }

    pub fn reduce_fn(&self) -> &ReduceFn {
        self.reduce.as_ref()
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application").field("name", &self.name).finish()
    }
}

pub const APPLICATIONS: &[&str] = &["wc", "unique"];

pub fn lookup(name: &str) -> Option<Application> {
    match name {
        "wc" => Some(Application::new("wc", wc::map, wc::reduce)),
        "unique" => Some(Application::new("unique", unique::map, unique::reduce)),
        _ => None,
    }
}

/// Word Count application
pub mod wc {
    use std::sync::OnceLock;

    use regex::Regex;

    use crate::mr::pipeline::KeyValue;

    fn words() -> &'static Regex {
        static WORDS: OnceLock<Regex> = OnceLock::new();
        WORDS.get_or_init(|| Regex::new(r"\p{L}+").expect("word pattern is valid"))
    }

    /// A word is a maximal run of letters
    pub fn map(input: &str) -> Vec<KeyValue> {
        words()
            .find_iter(input)
            .map(|word| KeyValue::new(word.as_str(), "1"))
            .collect()
    }

    pub fn reduce(_key: &str, values: Vec<&str>) -> String {
        values
            .iter()
            .map(|v| v.parse::<u64>().unwrap_or(0))
            .sum::<u64>()
            .to_string()
    }
}

/// Distinct tokens: every whitespace-separated token becomes a key with an empty value
pub mod unique {
    use crate::mr::pipeline::KeyValue;

    pub fn map(input: &str) -> Vec<KeyValue> {
        input
            .split_whitespace()
            .map(|token| KeyValue::new(token, ""))
            .collect()
    }

    pub fn reduce(_key: &str, _values: Vec<&str>) -> String {
        String::new()
    }
}
