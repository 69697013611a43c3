//! The front-end's callback table.
//!
//! One entry per lifecycle event. Every entry is always callable: the
//! defaults do nothing, so any entry can be invoked at any time.

use std::sync::Arc;

use crate::model::{DataPayload, StartInfo, Thing};
use crate::options::OptionValue;

pub type DataCallback = Arc<dyn Fn(&DataPayload) + Send + Sync>;
pub type ThingCallback = Arc<dyn Fn(&Thing) + Send + Sync>;
pub type StartCallback = Arc<dyn Fn(&StartInfo) + Send + Sync>;

/// Keys of the callback table, as used in start options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKey {
    OnData,
    OnNewThing,
    OnStart,
}

impl CallbackKey {
    pub const ALL: [CallbackKey; 3] = [
        CallbackKey::OnData,
        CallbackKey::OnNewThing,
        CallbackKey::OnStart,
    ];

    /// The option key for this entry.
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackKey::OnData => "ondata",
            CallbackKey::OnNewThing => "onnewthing",
            CallbackKey::OnStart => "onstart",
        }
    }

    /// Whether `value` is a callback this entry can hold.
    pub fn accepts(&self, value: &OptionValue) -> bool {
        matches!(
            (self, value),
            (CallbackKey::OnData, OptionValue::OnData(_))
                | (CallbackKey::OnNewThing, OptionValue::OnNewThing(_))
                | (CallbackKey::OnStart, OptionValue::OnStart(_))
        )
    }
}

/// The `ondata` / `onnewthing` / `onstart` callbacks.
#[derive(Clone)]
pub struct CallbackTable {
    pub ondata: DataCallback,
    pub onnewthing: ThingCallback,
    pub onstart: StartCallback,
}

impl Default for CallbackTable {
    fn default() -> Self {
        Self {
            ondata: Arc::new(|_: &DataPayload| {}),
            onnewthing: Arc::new(|_: &Thing| {}),
            onstart: Arc::new(|_: &StartInfo| {}),
        }
    }
}

impl CallbackTable {
    /// Return the table with `key` replaced by `candidate`, if the candidate
    /// is a callback of the matching kind. Anything else leaves the table
    /// unchanged.
    pub fn with_candidate(mut self, key: CallbackKey, candidate: Option<&OptionValue>) -> Self {
        match (key, candidate) {
            (CallbackKey::OnData, Some(OptionValue::OnData(f))) => self.ondata = f.clone(),
            (CallbackKey::OnNewThing, Some(OptionValue::OnNewThing(f))) => {
                self.onnewthing = f.clone()
            }
            (CallbackKey::OnStart, Some(OptionValue::OnStart(f))) => self.onstart = f.clone(),
            _ => {}
        }
        self
    }
}

impl std::fmt::Debug for CallbackTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackTable").finish_non_exhaustive()
    }
}
