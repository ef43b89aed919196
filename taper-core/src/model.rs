//! A named collection of parameters with whole-model persistence.

use crate::device::Device;
use crate::error::TaperError;
use crate::io::{self, DataKind};
use crate::parameter::Parameter;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// A flat registry of parameters keyed by name.
///
/// The model does not own graphs or devices; it exists so a set of parameters
/// can be saved, loaded and handed to an optimizer as one unit. Names are
/// unique and iteration order is the name order, which keeps saved files
/// deterministic.
#[derive(Debug, Default)]
pub struct Model {
    params: BTreeMap<String, Parameter>,
}

impl Model {
    pub fn new() -> Self {
        Model {
            params: BTreeMap::new(),
        }
    }

    /// Registers `param` under `name`. The handle is cloned, not the state:
    /// the model and the caller share the same parameter.
    pub fn add_parameter(&mut self, name: &str, param: &Parameter) -> Result<(), TaperError> {
        if self.params.contains_key(name) {
            return Err(TaperError::DuplicateKey {
                operation: "Model::add_parameter".to_string(),
                key: name.to_string(),
            });
        }
        self.params.insert(name.to_string(), param.clone());
        Ok(())
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.params.get(name)
    }

    /// Registered parameters in name order.
    pub fn parameters(&self) -> impl Iterator<Item = (&str, &Parameter)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Writes every registered parameter to `path`. All parameters must be
    /// initialized.
    pub fn save(&self, path: impl AsRef<Path>, with_stats: bool) -> Result<(), TaperError> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| TaperError::Persistence {
            message: format!("could not open {:?}: {}", path, e),
        })?;
        let mut w = BufWriter::new(file);
        io::write_header(&mut w, DataKind::Model)?;
        self.write_payload(&mut w, with_stats)?;
        w.flush().map_err(|e| TaperError::Persistence {
            message: format!("write failed: {}", e),
        })
    }

    fn write_payload<W: Write>(&self, w: &mut W, with_stats: bool) -> Result<(), TaperError> {
        io::write_u32(w, self.params.len() as u32)?;
        for (name, param) in &self.params {
            io::write_string(w, name)?;
            io::write_parameter_payload(w, param, with_stats)?;
        }
        Ok(())
    }

    /// Loads stored values into the registered parameters.
    ///
    /// Every stored name must be registered here and vice versa; a parameter
    /// that was already initialized must agree on shape with the stored
    /// tensor. Loaded state replaces the parameter state in place, so graphs
    /// and optimizers holding the same handles observe the new values.
    pub fn load(
        &mut self,
        path: impl AsRef<Path>,
        with_stats: bool,
        device: &dyn Device,
    ) -> Result<(), TaperError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| TaperError::Persistence {
            message: format!("could not open {:?}: {}", path, e),
        })?;
        let mut r = BufReader::new(file);
        io::read_header(&mut r, DataKind::Model)?;
        self.read_payload(&mut r, with_stats, device)
    }

    fn read_payload<R: Read>(
        &mut self,
        r: &mut R,
        with_stats: bool,
        device: &dyn Device,
    ) -> Result<(), TaperError> {
        let count = io::read_u32(r)? as usize;
        if count != self.params.len() {
            return Err(TaperError::Persistence {
                message: format!(
                    "file stores {} parameters, model registers {}",
                    count,
                    self.params.len()
                ),
            });
        }
        for _ in 0..count {
            let name = io::read_string(r)?;
            let loaded = io::read_parameter_payload(r, with_stats, device)?;
            let target = self
                .params
                .get(&name)
                .ok_or_else(|| TaperError::Persistence {
                    message: format!("file stores unknown parameter `{}`", name),
                })?;
            if target.valid() {
                let expected = target.shape()?;
                let actual = loaded.shape()?;
                if expected != actual {
                    return Err(TaperError::Persistence {
                        message: format!(
                            "parameter `{}`: stored shape {} does not match registered shape {}",
                            name, actual, expected
                        ),
                    });
                }
            }
            target.init_by_values(&loaded.shape()?, loaded.value()?.data(), device)?;
            target.restore_stats(loaded.stats_sorted()?)?;
        }
        Ok(())
    }
}
