use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    #[error("failed to read parameters: {0}")]
    Read(#[from] io::Error),
    #[error("no input on stdin")]
    EmptyInput,
    #[error("failed to parse JSON parameters: {0}")]
    Json(serde_json::Error),
    #[error("failed to parse TOML parameters: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("parameters must be a key-value map")]
    NotAMap,
    #[error("invalid parameters: {0}")]
    Input(serde_json::Error),
    #[error("could not open {path} for output: {source}")]
    Output { path: PathBuf, source: io::Error },
    #[error("failed to write table: {0}")]
    Table(#[from] csv::Error),
}

/// Parameters for one model run plus the seed that governs its default
/// random stream.
///
/// Accepts either an envelope (`{"input": {...}, "seed": 7}`) or a bare
/// parameter map. A `seed` key is lifted out of the parameter map in both
/// cases so typed decoding never sees it.
pub struct Environment<I = ()> {
    input_json: serde_json::Map<String, Value>,
    pub input: Option<I>,
    pub seed: Option<u64>,
}

impl Environment {
    pub fn from_json(data: Value) -> Result<Self, EnvError> {
        let mut data = match data {
            Value::Object(map) => map,
            _ => return Err(EnvError::NotAMap),
        };

        let envelope_seed = data.remove("seed").and_then(|v| v.as_u64());
        let mut input_json = match data.remove("input") {
            Some(Value::Object(map)) => map,
            Some(_) => return Err(EnvError::NotAMap),
            None => data,
        };

        let seed = input_json
            .remove("seed")
            .and_then(|v| v.as_u64())
            .or(envelope_seed);

        Ok(Self {
            input_json,
            input: None,
            seed,
        })
    }

    pub fn from_json_str(raw: &str) -> Result<Self, EnvError> {
        if raw.trim().is_empty() {
            return Self::from_json(Value::Object(serde_json::Map::new()));
        }
        let data: Value = serde_json::from_str(raw).map_err(EnvError::Json)?;
        Self::from_json(data)
    }

    pub fn from_stdin() -> Result<Self, EnvError> {
        let mut raw = String::new();
        io::stdin().read_to_string(&mut raw)?;
        if raw.trim().is_empty() {
            return Err(EnvError::EmptyInput);
        }
        Self::from_json_str(&raw)
    }

    /// Loads a parameter file. `.toml` files are parsed as TOML, anything
    /// else as JSON.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, EnvError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)?;
        debug!(path = %path.display(), "loaded parameter file");
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => {
                let table: toml::Table = toml::from_str(&raw)?;
                let data = serde_json::to_value(table).map_err(EnvError::Json)?;
                Self::from_json(data)
            }
            _ => Self::from_json_str(&raw),
        }
    }

    /// Decodes the parameter map into `I`. Whether unknown keys are rejected
    /// is up to `I` (`#[serde(deny_unknown_fields)]`).
    pub fn with_input_type<I: DeserializeOwned>(self) -> Result<Environment<I>, EnvError> {
        let input_value = Value::Object(self.input_json.clone());
        let input = serde_json::from_value(input_value).map_err(EnvError::Input)?;
        Ok(Environment {
            input_json: self.input_json,
            input: Some(input),
            seed: self.seed,
        })
    }
}

impl<I: DeserializeOwned> Environment<I> {
    pub fn load() -> Result<Self, EnvError> {
        Environment::from_stdin()?.with_input_type::<I>()
    }
}

impl<I> Environment<I> {
    pub fn input_json(&self) -> &serde_json::Map<String, Value> {
        &self.input_json
    }

    /// Whether the caller set `key` explicitly rather than relying on a default.
    pub fn supplied(&self, key: &str) -> bool {
        self.input_json.contains_key(key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// The destination already existed and overwriting was not allowed.
    SkippedExisting,
}

/// Writes `rows` as a tab-separated table preceded by `headers`.
pub fn write_table_to<W: Write, R: Serialize>(
    writer: W,
    headers: &[&str],
    rows: &[R],
) -> Result<(), EnvError> {
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_writer(writer);
    wtr.write_record(headers)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush().map_err(csv::Error::from)?;
    Ok(())
}

/// Writes a tab-separated table to `path`.
///
/// An existing file is left untouched unless `overwrite` is set; that case
/// is reported as [`WriteOutcome::SkippedExisting`], not as an error.
pub fn write_table<R: Serialize>(
    path: impl AsRef<Path>,
    headers: &[&str],
    rows: &[R],
    overwrite: bool,
) -> Result<WriteOutcome, EnvError> {
    let path = path.as_ref();
    if path.exists() && !overwrite {
        warn!(path = %path.display(), "output file already exists, not overwriting");
        return Ok(WriteOutcome::SkippedExisting);
    }
    let file = fs::File::create(path).map_err(|source| EnvError::Output {
        path: path.to_path_buf(),
        source,
    })?;
    write_table_to(file, headers, rows)?;
    debug!(path = %path.display(), rows = rows.len(), "wrote table");
    Ok(WriteOutcome::Written)
}
