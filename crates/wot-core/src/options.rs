//! Loosely typed option bags.
//!
//! [`Options`] is used both when creating a front-end (every entry is merged
//! onto the instance as-is) and when starting it (only `endpoints`,
//! `ondata`, `onnewthing` and `onstart` are read). Values are not validated
//! on insertion; readers decide what they accept.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::callbacks::{DataCallback, StartCallback, ThingCallback};
use crate::model::{DataPayload, StartInfo, Thing};

pub const ENDPOINTS_KEY: &str = "endpoints";

/// A single option value.
#[derive(Clone)]
pub enum OptionValue {
    /// An ordered list of endpoint URLs.
    Endpoints(Vec<String>),
    /// A data callback.
    OnData(DataCallback),
    /// A new-thing callback.
    OnNewThing(ThingCallback),
    /// A start callback.
    OnStart(StartCallback),
    /// Any other value.
    Json(serde_json::Value),
}

impl OptionValue {
    pub fn is_callback(&self) -> bool {
        matches!(
            self,
            OptionValue::OnData(_) | OptionValue::OnNewThing(_) | OptionValue::OnStart(_)
        )
    }
}

impl std::fmt::Debug for OptionValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptionValue::Endpoints(list) => f.debug_tuple("Endpoints").field(list).finish(),
            OptionValue::OnData(_) => f.write_str("OnData(<fn>)"),
            OptionValue::OnNewThing(_) => f.write_str("OnNewThing(<fn>)"),
            OptionValue::OnStart(_) => f.write_str("OnStart(<fn>)"),
            OptionValue::Json(value) => f.debug_tuple("Json").field(value).finish(),
        }
    }
}

impl From<serde_json::Value> for OptionValue {
    fn from(value: serde_json::Value) -> Self {
        OptionValue::Json(value)
    }
}

/// An ordered, string-keyed option bag.
#[derive(Debug, Clone, Default)]
pub struct Options {
    entries: BTreeMap<String, OptionValue>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set any key to any value.
    pub fn set(mut self, key: &str, value: impl Into<OptionValue>) -> Self {
        self.entries.insert(key.to_string(), value.into());
        self
    }

    /// Set the explicit endpoint list.
    pub fn endpoints<I, S>(self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let list = endpoints.into_iter().map(Into::into).collect();
        self.set(ENDPOINTS_KEY, OptionValue::Endpoints(list))
    }

    /// Set the `ondata` callback.
    pub fn on_data<F>(self, f: F) -> Self
    where
        F: Fn(&DataPayload) + Send + Sync + 'static,
    {
        self.set("ondata", OptionValue::OnData(Arc::new(f)))
    }

    /// Set the `onnewthing` callback.
    pub fn on_new_thing<F>(self, f: F) -> Self
    where
        F: Fn(&Thing) + Send + Sync + 'static,
    {
        self.set("onnewthing", OptionValue::OnNewThing(Arc::new(f)))
    }

    /// Set the `onstart` callback.
    pub fn on_start<F>(self, f: F) -> Self
    where
        F: Fn(&StartInfo) + Send + Sync + 'static,
    {
        self.set("onstart", OptionValue::OnStart(Arc::new(f)))
    }

    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.entries.get(key)
    }

    /// The explicit endpoint list, if one was given as a list.
    pub fn endpoint_list(&self) -> Option<&[String]> {
        match self.entries.get(ENDPOINTS_KEY) {
            Some(OptionValue::Endpoints(list)) => Some(list),
            _ => None,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for Options {
    type Item = (String, OptionValue);
    type IntoIter = std::collections::btree_map::IntoIter<String, OptionValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
