//! Binary persistence for parameters and models.
//!
//! Little-endian throughout. A file is `magic, version major, version minor,
//! datatype tag, payload`. A shape is `(rank, dims..., batch)` as u32; a
//! tensor is its shape followed by a u64 byte length and the raw f32 buffer.
//! A length that disagrees with the shape is rejected before any tensor is
//! constructed.

use crate::device::Device;
use crate::error::TaperError;
use crate::parameter::Parameter;
use crate::shape::{Shape, MAX_RANK};
use crate::tensor::Tensor;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

const MAGIC: [u8; 4] = *b"TAPR";
const VERSION_MAJOR: u32 = 0;
const VERSION_MINOR: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DataKind {
    Parameter = 1,
    Model = 2,
}

fn persist_err(context: &str, detail: impl std::fmt::Display) -> TaperError {
    TaperError::Persistence {
        message: format!("{}: {}", context, detail),
    }
}

// --- primitive encoders ---

fn write_bytes<W: Write>(w: &mut W, bytes: &[u8]) -> Result<(), TaperError> {
    w.write_all(bytes)
        .map_err(|e| persist_err("write failed", e))
}

fn read_exact<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<(), TaperError> {
    r.read_exact(buf)
        .map_err(|e| persist_err("read failed", e))
}

pub(crate) fn write_u32<W: Write>(w: &mut W, v: u32) -> Result<(), TaperError> {
    write_bytes(w, &v.to_le_bytes())
}

pub(crate) fn read_u32<R: Read>(r: &mut R) -> Result<u32, TaperError> {
    let mut buf = [0u8; 4];
    read_exact(r, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn write_u64<W: Write>(w: &mut W, v: u64) -> Result<(), TaperError> {
    write_bytes(w, &v.to_le_bytes())
}

fn read_u64<R: Read>(r: &mut R) -> Result<u64, TaperError> {
    let mut buf = [0u8; 8];
    read_exact(r, &mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

pub(crate) fn write_string<W: Write>(w: &mut W, s: &str) -> Result<(), TaperError> {
    write_u32(w, s.len() as u32)?;
    write_bytes(w, s.as_bytes())
}

pub(crate) fn read_string<R: Read>(r: &mut R) -> Result<String, TaperError> {
    let len = read_u32(r)? as usize;
    let mut buf = vec![0u8; len];
    read_exact(r, &mut buf)?;
    String::from_utf8(buf).map_err(|e| persist_err("invalid string in file", e))
}

// --- shape / tensor ---

pub(crate) fn write_shape<W: Write>(w: &mut W, shape: &Shape) -> Result<(), TaperError> {
    write_u32(w, shape.rank() as u32)?;
    for &d in shape.dims() {
        write_u32(w, d as u32)?;
    }
    write_u32(w, shape.batch() as u32)
}

pub(crate) fn read_shape<R: Read>(r: &mut R) -> Result<Shape, TaperError> {
    let rank = read_u32(r)? as usize;
    if rank > MAX_RANK {
        return Err(persist_err("invalid shape in file", format!("rank {}", rank)));
    }
    let mut dims = Vec::with_capacity(rank);
    for _ in 0..rank {
        dims.push(read_u32(r)? as usize);
    }
    let batch = read_u32(r)? as usize;
    Shape::with_batch(dims, batch).map_err(|e| persist_err("invalid shape in file", e))
}

pub(crate) fn write_tensor<W: Write>(w: &mut W, tensor: &Tensor) -> Result<(), TaperError> {
    write_shape(w, tensor.shape())?;
    let data = tensor.data();
    write_u64(w, (data.len() * 4) as u64)?;
    for v in data {
        write_bytes(w, &v.to_le_bytes())?;
    }
    Ok(())
}

pub(crate) fn read_tensor<R: Read>(r: &mut R, device: &dyn Device) -> Result<Tensor, TaperError> {
    let shape = read_shape(r)?;
    let n_bytes = read_u64(r)? as usize;
    let expected = shape.size() * 4;
    if n_bytes != expected {
        return Err(persist_err(
            "tensor buffer length mismatch",
            format!("shape {} needs {} bytes, file has {}", shape, expected, n_bytes),
        ));
    }
    let mut buf = vec![0u8; n_bytes];
    read_exact(r, &mut buf)?;
    let data: Vec<f32> = buf
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    device.new_tensor_by_vec(&shape, data)
}

// --- header ---

pub(crate) fn write_header<W: Write>(w: &mut W, kind: DataKind) -> Result<(), TaperError> {
    write_bytes(w, &MAGIC)?;
    write_u32(w, VERSION_MAJOR)?;
    write_u32(w, VERSION_MINOR)?;
    write_u32(w, kind as u32)
}

pub(crate) fn read_header<R: Read>(r: &mut R, expected: DataKind) -> Result<(), TaperError> {
    let mut magic = [0u8; 4];
    read_exact(r, &mut magic)?;
    if magic != MAGIC {
        return Err(persist_err("not a taper file", "bad magic"));
    }
    let major = read_u32(r)?;
    let minor = read_u32(r)?;
    if major != VERSION_MAJOR || minor > VERSION_MINOR {
        return Err(persist_err(
            "incompatible file version",
            format!("{}.{} (supported: {}.{})", major, minor, VERSION_MAJOR, VERSION_MINOR),
        ));
    }
    let kind = read_u32(r)?;
    if kind != expected as u32 {
        return Err(persist_err(
            "unexpected file contents",
            format!("datatype tag {} (expected {})", kind, expected as u32),
        ));
    }
    Ok(())
}

// --- parameter payload ---

pub(crate) fn write_parameter_payload<W: Write>(
    w: &mut W,
    param: &Parameter,
    with_stats: bool,
) -> Result<(), TaperError> {
    write_tensor(w, &param.value()?)?;
    if with_stats {
        let stats = param.stats_sorted()?;
        write_u32(w, stats.len() as u32)?;
        for (name, tensor) in &stats {
            write_string(w, name)?;
            write_tensor(w, tensor)?;
        }
    } else {
        write_u32(w, 0)?;
    }
    Ok(())
}

pub(crate) fn read_parameter_payload<R: Read>(
    r: &mut R,
    with_stats: bool,
    device: &dyn Device,
) -> Result<Parameter, TaperError> {
    let value = read_tensor(r, device)?;
    let n_stats = read_u32(r)?;
    let mut stats = Vec::new();
    for _ in 0..n_stats {
        let name = read_string(r)?;
        let tensor = read_tensor(r, device)?;
        // Stored statistics are always consumed so the stream stays aligned,
        // but only kept when requested.
        if with_stats {
            stats.push((name, tensor));
        }
    }
    let param = Parameter::new();
    param.init_by_values(value.shape(), value.data(), device)?;
    param.restore_stats(stats)?;
    Ok(param)
}

// --- files ---

pub(crate) fn save_parameter(
    param: &Parameter,
    path: &Path,
    with_stats: bool,
) -> Result<(), TaperError> {
    let file =
        File::create(path).map_err(|e| persist_err(&format!("could not open {:?}", path), e))?;
    let mut w = BufWriter::new(file);
    write_header(&mut w, DataKind::Parameter)?;
    write_parameter_payload(&mut w, param, with_stats)?;
    w.flush().map_err(|e| persist_err("write failed", e))
}

pub(crate) fn load_parameter(
    path: &Path,
    with_stats: bool,
    device: &dyn Device,
) -> Result<Parameter, TaperError> {
    let file =
        File::open(path).map_err(|e| persist_err(&format!("could not open {:?}", path), e))?;
    let mut r = BufReader::new(file);
    read_header(&mut r, DataKind::Parameter)?;
    read_parameter_payload(&mut r, with_stats, device)
}
