//! Safetensors I/O at the storage boundary.
//!
//! Reader: loads a single-electrode raw trace (`F32`, `F64` or `I16` counts).
//! Writer: [`StWriter`] collects named tensors and writes one file.
use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::path::Path;

// ── Low-level parser ─────────────────────────────────────────────────────────

/// One tensor's header entry.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorInfo {
    pub dtype: String,
    pub shape: Vec<usize>,
    pub offsets: (usize, usize),
}

fn parse_header(bytes: &[u8]) -> Result<(BTreeMap<String, TensorInfo>, usize)> {
    if bytes.len() < 8 {
        bail!("safetensors file too small");
    }
    let n = u64::from_le_bytes(bytes[..8].try_into()?) as usize;
    if bytes.len() < 8 + n {
        bail!("safetensors header claims {n} bytes, file has {}", bytes.len() - 8);
    }
    let header: serde_json::Map<String, serde_json::Value> =
        serde_json::from_slice(&bytes[8..8 + n]).context("failed to parse safetensors header")?;

    let mut out = BTreeMap::new();
    for (name, entry) in header {
        if name == "__metadata__" {
            continue;
        }
        let dtype = entry["dtype"].as_str().context("tensor without dtype")?.to_string();
        let shape = entry["shape"]
            .as_array()
            .context("tensor without shape")?
            .iter()
            .map(|v| v.as_u64().map(|d| d as usize).context("non-integer dimension"))
            .collect::<Result<Vec<_>>>()?;
        let offsets = entry["data_offsets"].as_array().context("tensor without offsets")?;
        let start = offsets.first().and_then(|v| v.as_u64()).context("bad offsets")? as usize;
        let end = offsets.get(1).and_then(|v| v.as_u64()).context("bad offsets")? as usize;
        if start > end || 8 + n + end > bytes.len() {
            bail!("tensor '{name}' offsets {start}..{end} out of range");
        }
        out.insert(name, TensorInfo { dtype, shape, offsets: (start, end) });
    }
    Ok((out, 8 + n))
}

fn decode_f64(raw: &[u8], dtype: &str) -> Result<Vec<f64>> {
    Ok(match dtype {
        "F32" => raw.chunks_exact(4).map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64).collect(),
        "F64" => raw
            .chunks_exact(8)
            .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
            .collect(),
        "I16" => raw.chunks_exact(2).map(|b| i16::from_le_bytes([b[0], b[1]]) as f64).collect(),
        "I32" => raw.chunks_exact(4).map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64).collect(),
        "I64" => raw
            .chunks_exact(8)
            .map(|b| i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f64)
            .collect(),
        other => bail!("unsupported dtype {other}"),
    })
}

/// Read every tensor in a file, converted to f64, with its shape.
pub fn read_all_f64(path: &Path) -> Result<BTreeMap<String, (Vec<usize>, Vec<f64>)>> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let (header, data_start) = parse_header(&bytes)?;
    header
        .into_iter()
        .map(|(name, info)| {
            let raw = &bytes[data_start + info.offsets.0..data_start + info.offsets.1];
            let values = decode_f64(raw, &info.dtype).with_context(|| format!("tensor '{name}'"))?;
            Ok((name, (info.shape, values)))
        })
        .collect()
}

// ── Raw trace ────────────────────────────────────────────────────────────────

/// One electrode's raw voltage trace.
#[derive(Debug, Clone)]
pub struct RawTrace {
    /// Samples in acquisition order (ADC counts or µV).
    pub samples: Vec<f32>,
    /// Sampling rate stored alongside the trace, if any.
    pub sampling_rate: Option<f32>,
}

impl RawTrace {
    /// Load tensor `key` (shape `[T]` or `[1, T]`) and an optional scalar
    /// `sampling_rate` from a safetensors file.
    pub fn load(path: &Path, key: &str) -> Result<Self> {
        let tensors = read_all_f64(path)?;
        let (shape, values) = tensors
            .get(key)
            .with_context(|| format!("missing '{key}' in {}", path.display()))?;
        let is_trace = match shape.as_slice() {
            [_] => true,
            [1, _] => true,
            _ => false,
        };
        if !is_trace {
            bail!("'{key}' has shape {shape:?}, expected a single trace");
        }
        let sampling_rate = tensors
            .get("sampling_rate")
            .and_then(|(_, v)| v.first())
            .map(|&v| v as f32);
        Ok(Self { samples: values.iter().map(|&v| v as f32).collect(), sampling_rate })
    }
}

// ── Generic safetensors builder ───────────────────────────────────────────────

/// Simple safetensors file writer for F32, F64, I32 and I64 tensors.
///
/// ```rust,no_run
/// use spikesort::io::StWriter;
/// use std::path::Path;
/// let mut w = StWriter::new();
/// w.add_f32("trace", &[1.0f32, 2.0, 3.0], &[3]);
/// w.add_f32("sampling_rate", &[30000.0], &[1]);
/// w.write(Path::new("/tmp/electrode0.safetensors")).unwrap();
/// ```
#[derive(Debug, Default)]
pub struct StWriter {
    entries: Vec<(String, Vec<u8>, &'static str, Vec<usize>)>,
}

impl StWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_f32(&mut self, name: &str, data: &[f32], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries.push((name.to_string(), bytes, "F32", shape.to_vec()));
    }

    pub fn add_f64(&mut self, name: &str, data: &[f64], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries.push((name.to_string(), bytes, "F64", shape.to_vec()));
    }

    pub fn add_i32(&mut self, name: &str, data: &[i32], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries.push((name.to_string(), bytes, "I32", shape.to_vec()));
    }

    pub fn add_i64(&mut self, name: &str, data: &[i64], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries.push((name.to_string(), bytes, "I64", shape.to_vec()));
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        use std::io::Write;
        let mut header_map = serde_json::Map::new();
        let mut offset: usize = 0;
        for (name, data, dtype, shape) in &self.entries {
            header_map.insert(
                name.clone(),
                serde_json::json!({
                    "dtype": dtype,
                    "shape": shape,
                    "data_offsets": [offset, offset + data.len()],
                }),
            );
            offset += data.len();
        }
        let mut hdr = serde_json::to_vec(&header_map)?;
        let pad = (8 - hdr.len() % 8) % 8;
        hdr.extend(std::iter::repeat(b' ').take(pad));

        let mut f = std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
        f.write_all(&(hdr.len() as u64).to_le_bytes())?;
        f.write_all(&hdr)?;
        for (_, data, _, _) in &self.entries {
            f.write_all(data)?;
        }
        Ok(())
    }
}
