//! Sectioned key/value configuration files.
//!
//! The format is a small `.ini` dialect:
//!
//! ```text
//! # comment
//! ; also a comment
//! [System]
//! SampleRate = 48000
//! [Plugins]
//! AdditionalPlugins = (resonanceaudio, steamaudio)
//! ```
//!
//! Scalar entries have their key and value trimmed. Array entries are split on
//! `,` and each item is stored exactly as written, so `( a, b)` yields
//! `[" a", " b"]`.

mod settings;

use std::{collections::HashMap, fs, path::Path};

pub use settings::{AudioSettings, LoggingLevel, SpeakerMode, StudioFlags};

use crate::{Result, StudioBridgeError};

const CATEGORY_SEPARATOR: char = '.';
const ARRAY_ITEM_SEPARATOR: char = ',';
const COMMENT_CHARS: [char; 2] = ['#', ';'];
const SECTION_START: char = '[';
const SECTION_END: char = ']';
const ARRAY_START: char = '(';
const ARRAY_END: char = ')';
const KEY_VALUE_SEPARATOR: char = '=';

/// Parsed configuration file, keyed by `section.key`.
///
/// A store is built by a single parse pass and is read-only afterwards, so it
/// can be shared freely without locking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigStore {
    scalars: HashMap<String, String>,
    arrays: HashMap<String, Vec<String>>,
}

impl ConfigStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads and parses the file at `path`.
    ///
    /// An unreadable file yields [`StudioBridgeError::Io`] and no store.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let store = Self::parse(&text);
        tracing::debug!(
            path = %path.display(),
            scalars = store.scalars.len(),
            arrays = store.arrays.len(),
            "loaded config file"
        );
        Ok(store)
    }

    /// Like [`ConfigStore::load`] but reduces the outcome to present/absent.
    pub fn try_load(path: impl AsRef<Path>) -> Option<Self> {
        match Self::load(path.as_ref()) {
            Ok(store) => Some(store),
            Err(err) => {
                tracing::warn!(path = %path.as_ref().display(), %err, "could not open config file");
                None
            }
        }
    }

    /// Parses configuration text. Malformed lines are skipped.
    pub fn parse(text: &str) -> Self {
        let mut store = Self::new();
        let mut section = String::new();

        for (index, raw) in text.lines().enumerate() {
            let line = trim_blank(raw);

            if line.is_empty() || line.starts_with(COMMENT_CHARS) {
                continue;
            }

            if let Some(rest) = line.strip_prefix(SECTION_START) {
                match rest.find(SECTION_END) {
                    Some(end) => section = rest[..end].to_string(),
                    None => tracing::trace!(line = index + 1, "unterminated section header"),
                }
                continue;
            }

            let Some((raw_key, raw_value)) = line.split_once(KEY_VALUE_SEPARATOR) else {
                tracing::trace!(line = index + 1, "line has no `=`, skipping");
                continue;
            };

            let key = composite_key(&section, trim_blank(raw_key));
            let value = trim_blank(raw_value);

            match value.strip_prefix(ARRAY_START) {
                Some(body) => {
                    let body = body.find(ARRAY_END).map_or(body, |end| &body[..end]);
                    store.arrays.insert(key, split_items(body));
                }
                None => {
                    store.scalars.insert(key, value.to_string());
                }
            }
        }

        store
    }

    /// Returns the stored scalar or `default` when the key is absent.
    pub fn get_string(&self, section: &str, key: &str, default: &str) -> String {
        self.scalars
            .get(&composite_key(section, key))
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    /// Returns the stored array, or an empty one when the key is absent.
    pub fn get_string_array(&self, section: &str, key: &str) -> Vec<String> {
        self.arrays
            .get(&composite_key(section, key))
            .cloned()
            .unwrap_or_default()
    }

    /// Parses the stored value as a base-10 integer.
    ///
    /// Absent or empty values return `default`. A value that is present but
    /// not numeric is an error.
    pub fn get_int(&self, section: &str, key: &str, default: i32) -> Result<i32> {
        self.parse_number(section, key, default, "integer")
    }

    /// Parses the stored value as a decimal number, same contract as
    /// [`ConfigStore::get_int`].
    pub fn get_float(&self, section: &str, key: &str, default: f32) -> Result<f32> {
        self.parse_number(section, key, default, "float")
    }

    /// `"true"` and `"1"` (any case) are true, any other value is false.
    pub fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        let value = self.get_string(section, key, "");
        let value = trim_blank(&value);
        if value.is_empty() {
            return default;
        }
        value.eq_ignore_ascii_case("true") || value == "1"
    }

    /// Whether a scalar or array entry exists for `section.key`.
    pub fn contains(&self, section: &str, key: &str) -> bool {
        let key = composite_key(section, key);
        self.scalars.contains_key(&key) || self.arrays.contains_key(&key)
    }

    /// Number of scalar entries.
    pub fn scalar_count(&self) -> usize {
        self.scalars.len()
    }

    /// Number of array entries.
    pub fn array_count(&self) -> usize {
        self.arrays.len()
    }

    /// True when the file held no entries at all.
    pub fn is_empty(&self) -> bool {
        self.scalars.is_empty() && self.arrays.is_empty()
    }

    fn parse_number<T: std::str::FromStr>(
        &self,
        section: &str,
        key: &str,
        default: T,
        kind: &'static str,
    ) -> Result<T> {
        let value = self.get_string(section, key, "");
        if value.is_empty() {
            return Ok(default);
        }
        value
            .parse()
            .map_err(|_| StudioBridgeError::InvalidNumber {
                key: composite_key(section, key),
                value,
                kind,
            })
    }
}

fn composite_key(section: &str, key: &str) -> String {
    format!("{section}{CATEGORY_SEPARATOR}{key}")
}

fn trim_blank(text: &str) -> &str {
    text.trim_matches([' ', '\t'])
}

/// Splits an array body on `,`. Items are not trimmed. A trailing separator
/// does not produce an empty final item, and an empty body has no items.
fn split_items(body: &str) -> Vec<String> {
    let mut items: Vec<String> = body.split(ARRAY_ITEM_SEPARATOR).map(str::to_string).collect();
    if items.last().is_some_and(String::is_empty) {
        items.pop();
    }
    items
}
