use models::{Error, ErrorKind, OptionExt};
use serde::{Deserialize, Serialize};

const BLOB_DATA_OPEN: &str = "static const char blob_data[] = {";
const BLOB_SIZE_OPEN: &str = "static const int blob_size = ";
const INDEXES_OPEN: &str = " isolate_data_indexes {";
const ARRAY_CLOSE: &str = "};";

/// Names that appear in the emitted source. They must match what the loading
/// binary declares.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(default)]
pub struct SnapshotFormat {
    pub namespace: String,
    pub instance_header: String,
    pub engine_header: String,
    pub instance_class: String,
    pub startup_data_type: String,
    pub index_list_type: String,
}
impl Default for SnapshotFormat {
    fn default() -> Self {
        SnapshotFormat {
            namespace: "node".to_owned(),
            instance_header: "node_main_instance.h".to_owned(),
            engine_header: "v8.h".to_owned(),
            instance_class: "NodeMainInstance".to_owned(),
            startup_data_type: "v8::StartupData".to_owned(),
            index_list_type: "std::vector<size_t>".to_owned(),
        }
    }
}

/// Comma separated, with a newline after the last element and nothing at all
/// for an empty list.
fn write_vector<T: ToString>(out: &mut String, items: impl ExactSizeIterator<Item = T>) {
    let last = items.len().saturating_sub(1);
    for (idx, item) in items.enumerate() {
        out.push_str(&item.to_string());
        out.push(if idx == last { '\n' } else { ',' });
    }
}

/// Renders a blob and its isolate data indexes as C++ source.
///
/// Bytes are written as signed `char` values so every element is a valid
/// initializer for `static const char[]`.
pub fn format_blob(blob: &[u8], isolate_data_indexes: &[usize], format: &SnapshotFormat) -> String {
    let SnapshotFormat {
        namespace,
        instance_header,
        engine_header,
        instance_class,
        startup_data_type,
        index_list_type,
    } = format;

    let mut out = String::with_capacity(blob.len() * 4 + 1024);
    out.push_str(&format!(
        r#"#include <cstddef>
#include "{instance_header}"
#include "{engine_header}"

// This file is generated by tools/snapshot. Do not edit.

namespace {namespace} {{

{BLOB_DATA_OPEN}
"#
    ));
    write_vector(&mut out, blob.iter().map(|b| *b as i8));
    out.push_str(&format!(
        r#"{ARRAY_CLOSE}

{BLOB_SIZE_OPEN}{size};
static {startup_data_type} blob = {{ blob_data, blob_size }};
{startup_data_type}* {instance_class}::GetEmbeddedSnapshotBlob() {{
  return &blob;
}}

static const {index_list_type}{INDEXES_OPEN}
"#,
        size = blob.len(),
    ));
    write_vector(&mut out, isolate_data_indexes.iter());
    out.push_str(&format!(
        r#"{ARRAY_CLOSE}

const {index_list_type}* {instance_class}::GetIsolateDataIndexes() {{
  return &isolate_data_indexes;
}}
}}  // namespace {namespace}
"#
    ));
    out
}

/// Constants recovered from emitted source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EmbeddedSnapshot {
    pub blob: Vec<u8>,
    pub declared_size: usize,
    pub isolate_data_indexes: Vec<usize>,
}
impl EmbeddedSnapshot {
    pub fn is_consistent(&self) -> bool {
        self.declared_size == self.blob.len()
    }
}

fn array_body<'a>(source: &'a str, open: &str) -> Result<&'a str, Error> {
    let start = source
        .find(open)
        .or_kind(ErrorKind::ParseSnapshot, format!("missing `{}`", open.trim()))?
        + open.len();
    let len = source[start..]
        .find(ARRAY_CLOSE)
        .or_kind(ErrorKind::ParseSnapshot, format!("unterminated `{}`", open.trim()))?;
    Ok(&source[start..start + len])
}

fn elements(body: &str) -> impl Iterator<Item = &str> {
    body.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_byte(literal: &str) -> Result<u8, Error> {
    let value: i16 = literal.parse()?;
    models::ensure_code!(
        (-128..=255).contains(&value),
        ErrorKind::ParseSnapshot,
        "byte literal {} out of range",
        value
    );
    Ok(value as u8)
}

/// Reads back the blob and index constants written by [`format_blob`].
/// Unsigned byte literals are accepted as well as signed ones.
pub fn parse_embedded(source: &str) -> Result<EmbeddedSnapshot, Error> {
    let blob = elements(array_body(source, BLOB_DATA_OPEN)?)
        .map(parse_byte)
        .collect::<Result<Vec<_>, _>>()?;

    let size_start = source
        .find(BLOB_SIZE_OPEN)
        .or_kind(ErrorKind::ParseSnapshot, "missing `blob_size`")?
        + BLOB_SIZE_OPEN.len();
    let size_len = source[size_start..]
        .find(';')
        .or_kind(ErrorKind::ParseSnapshot, "unterminated `blob_size`")?;
    let declared_size = source[size_start..size_start + size_len].trim().parse()?;

    let isolate_data_indexes = elements(array_body(source, INDEXES_OPEN)?)
        .map(|s| s.parse::<usize>().map_err(Error::from))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(EmbeddedSnapshot {
        blob,
        declared_size,
        isolate_data_indexes,
    })
}
