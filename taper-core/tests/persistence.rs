//! Round trips and failure modes of the parameter/model file format.

use std::fs;
use std::rc::Rc;
use taper_core::{Device, Model, Naive, Parameter, Shape, TaperError};

fn device() -> Naive {
    Naive::with_seed(0)
}

#[test]
fn test_parameter_roundtrip_bit_exact() {
    let dev = device();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("w.taper");

    let shape = Shape::matrix(3, 2).unwrap();
    let values = vec![1.0f32, -2.5, 3.25e-7, f32::MIN_POSITIVE, 1e30, -0.0];
    let param = Parameter::from_values(&shape, &values, &dev).unwrap();
    param.save(&path, false).unwrap();

    let loaded = Parameter::load(&path, false, &dev).unwrap();
    assert_eq!(loaded.shape().unwrap(), shape);
    // Bit-identical buffer, including -0.0 and extreme magnitudes.
    let original_bits: Vec<u32> = values.iter().map(|v| v.to_bits()).collect();
    let loaded_bits: Vec<u32> = loaded
        .value()
        .unwrap()
        .to_vec()
        .iter()
        .map(|v| v.to_bits())
        .collect();
    assert_eq!(original_bits, loaded_bits);
    // A fresh gradient comes back zeroed.
    assert_eq!(loaded.gradient().unwrap().to_vec(), vec![0.0; 6]);
}

#[test]
fn test_parameter_roundtrip_with_stats() {
    let dev = device();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("w.taper");

    let shape = Shape::vector(2).unwrap();
    let param = Parameter::from_values(&shape, &[1.0, 2.0], &dev).unwrap();
    param.add_stats("m1", &shape, &dev).unwrap();
    param
        .set_stats("m1", dev.new_tensor_by_vec(&shape, vec![0.5, -0.5]).unwrap())
        .unwrap();
    param.save(&path, true).unwrap();

    let with = Parameter::load(&path, true, &dev).unwrap();
    assert_eq!(with.stats("m1").unwrap().unwrap().to_vec(), vec![0.5, -0.5]);

    // Stats can be skipped on load even when present in the file.
    let without = Parameter::load(&path, false, &dev).unwrap();
    assert!(!without.has_stats("m1").unwrap());
    assert_eq!(without.value().unwrap().to_vec(), vec![1.0, 2.0]);
}

#[test]
fn test_model_roundtrip_into_registered_parameters() {
    let dev = device();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.taper");

    let s1 = Shape::matrix(2, 2).unwrap();
    let s2 = Shape::vector(3).unwrap();
    let w = Parameter::from_values(&s1, &[1.0, 2.0, 3.0, 4.0], &dev).unwrap();
    let b = Parameter::from_values(&s2, &[0.1, 0.2, 0.3], &dev).unwrap();
    let mut model = Model::new();
    model.add_parameter("w", &w).unwrap();
    model.add_parameter("b", &b).unwrap();
    model.save(&path, false).unwrap();

    // Perturb, then load back: the same handles must observe the old values.
    w.set_value(dev.new_tensor_filled(&s1, 9.0)).unwrap();
    model.load(&path, false, &dev).unwrap();
    assert_eq!(w.value().unwrap().to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
    assert_eq!(b.value().unwrap().to_vec(), vec![0.1, 0.2, 0.3]);
}

#[test]
fn test_model_load_rejects_unknown_and_missing_names() {
    let dev = device();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.taper");

    let shape = Shape::vector(1).unwrap();
    let p = Parameter::from_values(&shape, &[1.0], &dev).unwrap();
    let mut model = Model::new();
    model.add_parameter("w", &p).unwrap();
    model.save(&path, false).unwrap();

    // A model registering a different name cannot consume the file.
    let q = Parameter::from_values(&shape, &[1.0], &dev).unwrap();
    let mut other = Model::new();
    other.add_parameter("v", &q).unwrap();
    assert!(matches!(
        other.load(&path, false, &dev).unwrap_err(),
        TaperError::Persistence { .. }
    ));

    // A model registering extra parameters is rejected by the count check.
    let mut bigger = Model::new();
    bigger.add_parameter("w", &p).unwrap();
    bigger.add_parameter("extra", &q).unwrap();
    assert!(matches!(
        bigger.load(&path, false, &dev).unwrap_err(),
        TaperError::Persistence { .. }
    ));
}

#[test]
fn test_model_load_rejects_shape_disagreement() {
    let dev = device();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.taper");

    let p = Parameter::from_values(&Shape::vector(2).unwrap(), &[1.0, 2.0], &dev).unwrap();
    let mut model = Model::new();
    model.add_parameter("w", &p).unwrap();
    model.save(&path, false).unwrap();

    let wrong = Parameter::from_values(&Shape::vector(3).unwrap(), &[0.0; 3], &dev).unwrap();
    let mut other = Model::new();
    other.add_parameter("w", &wrong).unwrap();
    assert!(matches!(
        other.load(&path, false, &dev).unwrap_err(),
        TaperError::Persistence { .. }
    ));
}

#[test]
fn test_load_rejects_bad_magic() {
    let dev = device();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("junk.taper");
    fs::write(&path, b"JUNKxxxxxxxxxxxxxxxx").unwrap();
    assert!(matches!(
        Parameter::load(&path, false, &dev).unwrap_err(),
        TaperError::Persistence { .. }
    ));
}

#[test]
fn test_load_rejects_future_version() {
    let dev = device();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.taper");
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"TAPR");
    bytes.extend_from_slice(&9u32.to_le_bytes()); // major
    bytes.extend_from_slice(&0u32.to_le_bytes()); // minor
    bytes.extend_from_slice(&1u32.to_le_bytes()); // parameter tag
    fs::write(&path, bytes).unwrap();
    match Parameter::load(&path, false, &dev).unwrap_err() {
        TaperError::Persistence { message } => assert!(message.contains("version")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_load_rejects_buffer_length_mismatch() {
    let dev = device();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("short.taper");
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"TAPR");
    bytes.extend_from_slice(&0u32.to_le_bytes()); // major
    bytes.extend_from_slice(&1u32.to_le_bytes()); // minor
    bytes.extend_from_slice(&1u32.to_le_bytes()); // parameter tag
    bytes.extend_from_slice(&1u32.to_le_bytes()); // shape rank 1
    bytes.extend_from_slice(&2u32.to_le_bytes()); // dim 2
    bytes.extend_from_slice(&1u32.to_le_bytes()); // batch 1
    bytes.extend_from_slice(&12u64.to_le_bytes()); // 12 bytes for 2 floats
    bytes.extend_from_slice(&[0u8; 12]);
    bytes.extend_from_slice(&0u32.to_le_bytes()); // no stats
    fs::write(&path, bytes).unwrap();
    match Parameter::load(&path, false, &dev).unwrap_err() {
        TaperError::Persistence { message } => assert!(message.contains("length")),
        other => panic!("unexpected error: {other:?}"),
    }
}
