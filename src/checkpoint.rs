//! Safetensors checkpoints of every network parameter.
//!
//! A checkpoint is one `model_{iteration}.safetensors` file holding the
//! tensors of all varmaps under their own names plus a `checkpoint.version`
//! scalar. Loading validates the whole file before assigning anything.

use {
    crate::error::SacError,
    anyhow::{
        anyhow,
        Context,
        Result,
    },
    candle_core::{
        DType,
        Device,
        Tensor,
        Var,
    },
    candle_nn::VarMap,
    std::{
        collections::HashMap,
        path::{
            Path,
            PathBuf,
        },
    },
    tracing::info,
};

pub const CHECKPOINT_VERSION: u32 = 1;
const VERSION_KEY: &str = "checkpoint.version";

/// `{log_dir}/model_{iteration}.safetensors`
pub fn checkpoint_path(
    log_dir: &Path,
    iteration: usize,
) -> PathBuf {
    log_dir.join(format!("model_{iteration}.safetensors"))
}

/// Parse the iteration back out of a `model_{iteration}` file name.
pub fn iteration_from_path(path: &Path) -> Result<usize, SacError> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(|stem| stem.rsplit_once('_'))
        .and_then(|(_, iteration)| iteration.parse().ok())
        .ok_or_else(|| SacError::CheckpointName(path.to_path_buf()))
}

fn vars_of(varmap: &VarMap) -> Result<Vec<(String, Var)>> {
    let data = varmap
        .data()
        .lock()
        .map_err(|_| anyhow!("varmap lock poisoned"))?;
    Ok(data.iter().map(|(name, var)| (name.clone(), var.clone())).collect())
}

pub fn save(
    varmaps: &[&VarMap],
    path: &Path,
) -> Result<()> {
    let mut tensors: HashMap<String, Tensor> = HashMap::new();
    for varmap in varmaps {
        for (name, var) in vars_of(varmap)? {
            tensors.insert(name, var.as_tensor().detach().to_device(&Device::Cpu)?);
        }
    }
    tensors.insert(
        VERSION_KEY.to_owned(),
        Tensor::new(&[CHECKPOINT_VERSION], &Device::Cpu)?,
    );

    candle_core::safetensors::save(&tensors, path)
        .with_context(|| format!("cannot write checkpoint {}", path.display()))?;
    info!("saved {} tensors to {}", tensors.len(), path.display());
    Ok(())
}

/// Restore every variable of `varmaps` from a checkpoint.
///
/// Fails without touching any parameter if the file is unreadable, carries
/// another version, or lacks or misshapes any tensor.
pub fn load(
    varmaps: &[&VarMap],
    path: &Path,
    device: &Device,
) -> Result<()> {
    let tensors = candle_core::safetensors::load(path, device)
        .with_context(|| format!("cannot read checkpoint {}", path.display()))?;

    let version = tensors
        .get(VERSION_KEY)
        .ok_or_else(|| SacError::CheckpointMissingTensor(VERSION_KEY.to_owned()))?
        .to_dtype(DType::U32)?
        .flatten_all()?
        .to_vec1::<u32>()?;
    if version != [CHECKPOINT_VERSION] {
        Err(SacError::CheckpointVersion {
            expected: CHECKPOINT_VERSION,
            found: version.first().copied().unwrap_or_default(),
        })?
    }

    let mut assignments = Vec::new();
    for varmap in varmaps {
        for (name, var) in vars_of(varmap)? {
            let tensor = tensors
                .get(&name)
                .ok_or_else(|| SacError::CheckpointMissingTensor(name.clone()))?;
            if tensor.dims() != var.dims() {
                Err(SacError::CheckpointShape {
                    name,
                    expected: var.dims().to_vec(),
                    actual: tensor.dims().to_vec(),
                })?
            }
            let tensor = tensor.to_dtype(var.dtype())?;
            assignments.push((var, tensor));
        }
    }

    for (var, tensor) in &assignments {
        var.set(tensor)?;
    }
    info!("restored {} tensors from {}", assignments.len(), path.display());
    Ok(())
}
