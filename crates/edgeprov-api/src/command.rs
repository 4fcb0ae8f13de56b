// Command builder and reply records.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::Sentence;

/// A single API command: a path word, `=key=value` attributes, and
/// `?field=value` queries (ANDed by the device).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Command {
    path: String,
    args: Vec<(String, String)>,
    queries: Vec<(String, String)>,
}

impl Command {
    /// Start a command, e.g. `Command::new("/ip/pool/print")`.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            args: Vec::new(),
            queries: Vec::new(),
        }
    }

    /// `print` on a menu.
    pub fn print(menu: &str) -> Self {
        Self::new(format!("{menu}/print"))
    }

    /// `add` on a menu.
    pub fn add(menu: &str) -> Self {
        Self::new(format!("{menu}/add"))
    }

    /// `set` on a menu.
    pub fn set(menu: &str) -> Self {
        Self::new(format!("{menu}/set"))
    }

    /// `remove` on a menu.
    pub fn remove(menu: &str) -> Self {
        Self::new(format!("{menu}/remove"))
    }

    /// Append an `=key=value` attribute.
    pub fn arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.push((key.into(), value.into()));
        self
    }

    /// Append several attributes.
    pub fn args<K, V>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.args
            .extend(pairs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Append a `?field=value` query.
    pub fn query(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.queries.push((field.into(), value.into()));
        self
    }

    /// Full command path, e.g. `/ip/pool/add`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Menu part of the path, e.g. `/ip/pool`.
    pub fn menu(&self) -> &str {
        self.path.rsplit_once('/').map_or("", |(menu, _)| menu)
    }

    /// Verb part of the path, e.g. `add`.
    pub fn verb(&self) -> &str {
        self.path
            .rsplit_once('/')
            .map_or(self.path.as_str(), |(_, verb)| verb)
    }

    pub fn arguments(&self) -> &[(String, String)] {
        &self.args
    }

    pub fn queries(&self) -> &[(String, String)] {
        &self.queries
    }

    /// Value of an attribute, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Encode as a wire sentence.
    pub fn to_sentence(&self) -> Sentence {
        let mut words = Vec::with_capacity(1 + self.args.len() + self.queries.len());
        words.push(self.path.clone());
        words.extend(self.args.iter().map(|(k, v)| format!("={k}={v}")));
        words.extend(self.queries.iter().map(|(k, v)| format!("?{k}={v}")));
        Sentence::new(words)
    }
}

/// Console rendering: `/ip pool add name=pool1 ranges="10.0.0.10-10.0.0.200"`.
impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.menu().strip_prefix('/') {
            Some(menu) if !menu.is_empty() => {
                write!(f, "/{} {}", menu.replace('/', " "), self.verb())?;
            }
            _ => f.write_str(&self.path)?,
        }
        if !self.queries.is_empty() {
            let conds: Vec<String> = self
                .queries
                .iter()
                .map(|(k, v)| format!("{k}={}", console_quote(v)))
                .collect();
            write!(f, " [find {}]", conds.join(" "))?;
        }
        for (k, v) in &self.args {
            write!(f, " {k}={}", console_quote(v))?;
        }
        Ok(())
    }
}

fn console_quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '*' | '/' | ':' | ','));
    if plain {
        value.to_owned()
    } else {
        let escaped = value
            .replace('\\', "\\\\")
            .replace('"', "\\\"")
            .replace('$', "\\$");
        format!("\"{escaped}\"")
    }
}

// ── Records ─────────────────────────────────────────────────────────

/// One `!re` row: attribute name to value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(BTreeMap<String, String>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// The device-assigned `.id` (e.g. `*1A`).
    pub fn id(&self) -> Option<&str> {
        self.get(".id")
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// RouterOS booleans come back as `true`/`false` or `yes`/`no`.
    pub fn flag(&self, key: &str) -> bool {
        matches!(self.get(key), Some("true" | "yes"))
    }
}

impl From<BTreeMap<String, String>> for Record {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Everything the device sent back for one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    /// `!re` rows in order.
    pub records: Vec<Record>,
    /// `ret` from `!done` (the new `.id` after `add`).
    pub ret: Option<String>,
}
