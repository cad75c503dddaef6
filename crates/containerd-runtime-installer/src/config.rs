//! Registration of runtimes in the containerd CRI configuration.
//!
//! The runtime registry lives at
//! `plugins."io.containerd.grpc.v1.cri".containerd.runtimes` and maps a
//! runtime name to a table with at least a `runtime_type` field:
//!
//! ```toml
//! [plugins."io.containerd.grpc.v1.cri".containerd.runtimes.wasmtime]
//! runtime_type = "io.containerd.wasmtime.v1"
//! ```

use std::path::Path;
use std::str::FromStr;

use toml::{Table, Value};

use crate::error::{Error, Result};

pub const CRI_PLUGIN: &str = "io.containerd.grpc.v1.cri";

const RUNTIMES_PATH: [&str; 4] = ["plugins", CRI_PLUGIN, "containerd", "runtimes"];
const RUNTIME_TYPE_KEY: &str = "runtime_type";
const SHIM_PREFIX: &str = "containerd-shim-";
const TYPE_PREFIX: &str = "io.containerd.";

/// Derives the containerd runtime type from a shim file name.
///
/// containerd resolves `io.containerd.<name>.<version>` back to
/// `containerd-shim-<name>-<version>`, so `containerd-shim-runc-v2`
/// becomes `io.containerd.runc.v2`.
pub fn runtime_type(file_name: &str) -> String {
    file_name
        .replacen(SHIM_PREFIX, TYPE_PREFIX, 1)
        .replace('-', ".")
}

/// A runtime to be registered in the CRI runtime registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEntry {
    pub name: String,
    pub runtime_type: String,
}

impl RuntimeEntry {
    pub fn new(name: impl Into<String>, runtime_type: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let runtime_type = runtime_type.into();
        if name.is_empty() {
            return Err(Error::InvalidArgument("runtime name is empty".to_string()));
        }
        if runtime_type.is_empty() {
            return Err(Error::InvalidArgument("runtime type is empty".to_string()));
        }
        Ok(Self { name, runtime_type })
    }

    /// Builds the entry for `name`, deriving the type from the binary's file name.
    pub fn for_binary(name: impl Into<String>, binary: impl AsRef<Path>) -> Result<Self> {
        let binary = binary.as_ref();
        let Some(file_name) = binary.file_name().and_then(|f| f.to_str()) else {
            return Err(Error::InvalidArgument(format!(
                "binary path has no usable file name: {binary:?}"
            )));
        };
        Self::new(name, runtime_type(file_name))
    }
}

/// A parsed containerd configuration file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigDocument(Table);

impl ConfigDocument {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(Self(text.parse::<Table>()?))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string(&self.0)?)
    }

    pub fn as_table(&self) -> &Table {
        &self.0
    }

    /// Returns a document with `entry` registered, replacing any previous
    /// entry with the same name.
    ///
    /// Missing tables on the runtimes path are created. A key on the path
    /// that holds a non-table value fails with [`Error::TypeMismatch`].
    pub fn patch(mut self, entry: &RuntimeEntry) -> Result<Self> {
        let mut table = &mut self.0;
        let mut path = String::new();
        for key in RUNTIMES_PATH {
            push_key(&mut path, key);
            table = child_table(table, key, &path)?;
        }

        let mut record = Table::new();
        record.insert(
            RUNTIME_TYPE_KEY.to_string(),
            Value::String(entry.runtime_type.clone()),
        );
        table.insert(entry.name.clone(), Value::Table(record));

        Ok(self)
    }

    /// The runtime registry, if present and well-typed.
    pub fn runtimes(&self) -> Option<&Table> {
        RUNTIMES_PATH
            .iter()
            .try_fold(&self.0, |table, key| table.get(*key)?.as_table())
    }

    pub fn runtime_type(&self, name: &str) -> Option<&str> {
        self.runtimes()?
            .get(name)?
            .as_table()?
            .get(RUNTIME_TYPE_KEY)?
            .as_str()
    }
}

impl FromStr for ConfigDocument {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Parses `text`, registers `entry` and serializes the result.
pub fn patch_str(text: &str, entry: &RuntimeEntry) -> Result<String> {
    ConfigDocument::parse(text)?.patch(entry)?.to_toml_string()
}

fn child_table<'a>(parent: &'a mut Table, key: &str, path: &str) -> Result<&'a mut Table> {
    let value = parent
        .entry(key)
        .or_insert(Value::Table(Table::new()));
    match value {
        Value::Table(table) => Ok(table),
        other => Err(Error::TypeMismatch {
            path: path.to_string(),
            found: other.type_str(),
        }),
    }
}

fn push_key(path: &mut String, key: &str) {
    if !path.is_empty() {
        path.push('.');
    }
    if key.contains('.') {
        path.push('"');
        path.push_str(key);
        path.push('"');
    } else {
        path.push_str(key);
    }
}
