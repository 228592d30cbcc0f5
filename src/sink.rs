//! Where intermediate and final arrays of one electrode are persisted.
//!
//! Keys are `/`-separated paths such as `spike_waveforms` or
//! `clusters3/predictions`. Two implementations:
//!
//! * [`MemorySink`]: an in-process map, used by tests and library callers
//!   that want the arrays back.
//! * [`SafetensorsSink`]: one directory per electrode, one `.safetensors`
//!   file per key group (the part before the first `/`).
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Result, SortError};
use crate::io::StWriter;

/// Typed payload of a stored array.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    F32(Vec<f32>),
    F64(Vec<f64>),
    I32(Vec<i32>),
    I64(Vec<i64>),
}

impl ArrayData {
    pub fn len(&self) -> usize {
        match self {
            ArrayData::F32(v) => v.len(),
            ArrayData::F64(v) => v.len(),
            ArrayData::I32(v) => v.len(),
            ArrayData::I64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A named, shaped array.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredArray {
    pub shape: Vec<usize>,
    pub data: ArrayData,
}

/// Destination for per-electrode artifacts.
///
/// `flush` marks a consistent point: everything put so far must be durable
/// once it returns. The sorter flushes after the spike arrays and after each
/// cluster count, so a later failure never loses earlier results.
pub trait ArtifactSink {
    fn put(&mut self, key: &str, array: StoredArray) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn put_f32(&mut self, key: &str, data: &[f32], shape: &[usize]) -> Result<()> {
        self.put(key, checked(key, ArrayData::F32(data.to_vec()), shape)?)
    }

    fn put_f64(&mut self, key: &str, data: &[f64], shape: &[usize]) -> Result<()> {
        self.put(key, checked(key, ArrayData::F64(data.to_vec()), shape)?)
    }

    fn put_i32(&mut self, key: &str, data: &[i32], shape: &[usize]) -> Result<()> {
        self.put(key, checked(key, ArrayData::I32(data.to_vec()), shape)?)
    }

    fn put_i64(&mut self, key: &str, data: &[i64], shape: &[usize]) -> Result<()> {
        self.put(key, checked(key, ArrayData::I64(data.to_vec()), shape)?)
    }
}

fn checked(key: &str, data: ArrayData, shape: &[usize]) -> Result<StoredArray> {
    let expected: usize = shape.iter().product();
    if expected != data.len() {
        return Err(SortError::Sink(format!(
            "'{key}': shape {shape:?} needs {expected} values, got {}",
            data.len()
        )));
    }
    Ok(StoredArray { shape: shape.to_vec(), data })
}

// ── In-memory ────────────────────────────────────────────────────────────────

/// Keeps every array in a sorted map. Re-putting a key replaces it.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    arrays: BTreeMap<String, StoredArray>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&StoredArray> {
        self.arrays.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.arrays.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    pub fn f32(&self, key: &str) -> Option<&[f32]> {
        match self.get(key).map(|a| &a.data) {
            Some(ArrayData::F32(v)) => Some(v),
            _ => None,
        }
    }

    pub fn f64(&self, key: &str) -> Option<&[f64]> {
        match self.get(key).map(|a| &a.data) {
            Some(ArrayData::F64(v)) => Some(v),
            _ => None,
        }
    }

    pub fn i32(&self, key: &str) -> Option<&[i32]> {
        match self.get(key).map(|a| &a.data) {
            Some(ArrayData::I32(v)) => Some(v),
            _ => None,
        }
    }

    pub fn i64(&self, key: &str) -> Option<&[i64]> {
        match self.get(key).map(|a| &a.data) {
            Some(ArrayData::I64(v)) => Some(v),
            _ => None,
        }
    }

    pub fn shape(&self, key: &str) -> Option<&[usize]> {
        self.get(key).map(|a| a.shape.as_slice())
    }
}

impl ArtifactSink for MemorySink {
    fn put(&mut self, key: &str, array: StoredArray) -> Result<()> {
        self.arrays.insert(key.to_string(), array);
        Ok(())
    }
}

// ── Safetensors on disk ──────────────────────────────────────────────────────

/// Writes `<root>/electrode<NN>/<group>.safetensors`.
///
/// The electrode directory is emptied on creation so a rerun never mixes
/// with stale results. Arrays are buffered per group and written on
/// [`ArtifactSink::flush`]; a group flushed twice is rewritten with
/// everything put to it so far.
#[derive(Debug)]
pub struct SafetensorsSink {
    dir: PathBuf,
    groups: BTreeMap<String, BTreeMap<String, StoredArray>>,
    dirty: Vec<String>,
}

impl SafetensorsSink {
    pub fn create(root: &Path, electrode: usize) -> Result<Self> {
        let dir = root.join(format!("electrode{electrode:02}"));
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, groups: BTreeMap::new(), dirty: Vec::new() })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File a group is written to.
    pub fn group_path(&self, group: &str) -> PathBuf {
        self.dir.join(format!("{group}.safetensors"))
    }
}

fn split_key(key: &str) -> (&str, &str) {
    match key.split_once('/') {
        Some((group, name)) if !group.is_empty() && !name.is_empty() => (group, name),
        _ => (key, key),
    }
}

impl ArtifactSink for SafetensorsSink {
    fn put(&mut self, key: &str, array: StoredArray) -> Result<()> {
        let (group, name) = split_key(key);
        self.groups
            .entry(group.to_string())
            .or_default()
            .insert(name.to_string(), array);
        if !self.dirty.iter().any(|g| g == group) {
            self.dirty.push(group.to_string());
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        for group in std::mem::take(&mut self.dirty) {
            let Some(arrays) = self.groups.get(&group) else { continue };
            let mut w = StWriter::new();
            for (name, a) in arrays {
                match &a.data {
                    ArrayData::F32(v) => w.add_f32(name, v, &a.shape),
                    ArrayData::F64(v) => w.add_f64(name, v, &a.shape),
                    ArrayData::I32(v) => w.add_i32(name, v, &a.shape),
                    ArrayData::I64(v) => w.add_i64(name, v, &a.shape),
                }
            }
            let path = self.group_path(&group);
            w.write(&path).map_err(|e| SortError::Sink(format!("{e:#}")))?;
            log::debug!("wrote {}", path.display());
        }
        Ok(())
    }
}
