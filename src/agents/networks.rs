use {
    candle_core::{
        DType,
        Device,
        Error,
        Module,
        Result,
        Tensor,
        Var,
    },
    candle_nn::{
        linear,
        sequential::seq,
        Activation,
        Linear,
        Sequential,
        VarBuilder,
        VarMap,
    },
};

const LOG_STD_MIN: f32 = -20.0;
const LOG_STD_MAX: f32 = 2.0;
const HALF_LOG_2PI: f64 = 0.918_938_533_204_672_7;
// keeps log(1 - tanh(u)^2) finite when the action saturates
const SQUASH_EPS: f64 = 1e-6;

/// Blend every `{target_prefix}-*` parameter towards its `{network_prefix}-*`
/// twin: `target = tau * network + (1 - tau) * target`.
///
/// With `tau = 1.0` this is a hard copy.
pub(crate) fn track(
    varmap: &VarMap,
    target_prefix: &str,
    network_prefix: &str,
    tau: f64,
) -> Result<()> {
    let target_prefix = format!("{target_prefix}-");
    let data = varmap
        .data()
        .lock()
        .map_err(|_| Error::Msg("varmap lock poisoned".to_owned()))?;

    for (name, target) in data.iter().filter(|(name, _)| name.starts_with(&target_prefix)) {
        let network_name = format!("{network_prefix}-{}", &name[target_prefix.len()..]);
        let network = data
            .get(&network_name)
            .ok_or_else(|| Error::Msg(format!("{name} has no counterpart {network_name}")))?;
        target.set(
            &(network.as_tensor().affine(tau, 0.0)? + target.as_tensor().affine(1.0 - tau, 0.0)?)?
                .detach(),
        )?;
    }
    Ok(())
}

/// All variables of a varmap whose name starts with `{prefix}-`.
pub(crate) fn filter_by_prefix(
    varmap: &VarMap,
    prefix: &str,
) -> Result<Vec<Var>> {
    let prefix = format!("{prefix}-");
    let data = varmap
        .data()
        .lock()
        .map_err(|_| Error::Msg("varmap lock poisoned".to_owned()))?;
    Ok(data
        .iter()
        .filter_map(|(name, var)| name.starts_with(&prefix).then_some(var.clone()))
        .collect())
}

/// Linear layers with ReLU in between, named `{prefix}-fc{i}`.
fn make_network(
    vb: &VarBuilder,
    prefix: &str,
    dims: &[(usize, usize)],
    relu_last: bool,
) -> Result<Sequential> {
    let mut network = seq();
    for (i, &(in_dim, out_dim)) in dims.iter().enumerate() {
        network = network.add(linear(in_dim, out_dim, vb.pp(format!("{prefix}-fc{i}")))?);
        if relu_last || i + 1 < dims.len() {
            network = network.add(Activation::Relu);
        }
    }
    Ok(network)
}


/// A tanh-squashed diagonal Gaussian policy.
pub(crate) struct Policy {
    varmap: VarMap,
    trunk: Sequential,
    mean: Linear,
    log_std: Linear,
}

impl Policy {
    pub(crate) const PREFIX: &'static str = "policy";

    pub(crate) fn new(
        device: &Device,
        size_state: usize,
        hidden_1_size: usize,
        hidden_2_size: usize,
        size_action: usize,
    ) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let prefix = Self::PREFIX;

        let trunk = make_network(
            &vb,
            prefix,
            &[
                (size_state, hidden_1_size),
                (hidden_1_size, hidden_2_size),
            ],
            true,
        )?;
        let mean = linear(hidden_2_size, size_action, vb.pp(format!("{prefix}-mean")))?;
        let log_std = linear(hidden_2_size, size_action, vb.pp(format!("{prefix}-log_std")))?;

        Ok(Self {
            varmap,
            trunk,
            mean,
            log_std,
        })
    }

    pub(crate) fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// The mean and the clamped log standard deviation of the pre-squash
    /// Gaussian.
    pub(crate) fn forward(
        &self,
        state: &Tensor,
    ) -> Result<(Tensor, Tensor)> {
        let xs = self.trunk.forward(state)?;
        let mean = self.mean.forward(&xs)?;
        let log_std = self.log_std.forward(&xs)?.clamp(LOG_STD_MIN, LOG_STD_MAX)?;
        Ok((mean, log_std))
    }

    /// Reparameterized sample `tanh(mean + std * noise)` and its log
    /// probability (summed over action dimensions, shape `(B, 1)`).
    ///
    /// `noise` must be standard normal with the shape of the action batch.
    /// Gradients flow through the sample into the policy parameters.
    pub(crate) fn evaluate(
        &self,
        state: &Tensor,
        noise: &Tensor,
    ) -> Result<(Tensor, Tensor)> {
        let (mean, log_std) = self.forward(state)?;
        let action = (&mean + (log_std.exp()? * noise)?)?.tanh()?;

        let gaussian = (noise.sqr()?.affine(-0.5, -HALF_LOG_2PI)? - &log_std)?;
        let squash = action.sqr()?.affine(-1.0, 1.0 + SQUASH_EPS)?.log()?;
        let log_prob = (gaussian - squash)?.sum_keepdim(1)?;

        Ok((action, log_prob))
    }

    /// The squashed mean, used for evaluation rollouts.
    pub(crate) fn deterministic(
        &self,
        state: &Tensor,
    ) -> Result<Tensor> {
        let (mean, _) = self.forward(state)?;
        mean.tanh()
    }
}


/// A Q network together with its slowly tracking target copy.
///
/// Both live in one varmap, named `{prefix}-fc{i}` and
/// `target-{prefix}-fc{i}`.
pub(crate) struct Critic {
    varmap: VarMap,
    prefix: String,
    network: Sequential,
    target_network: Sequential,
}

impl Critic {
    pub(crate) fn new(
        device: &Device,
        prefix: &str,
        size_state: usize,
        hidden_1_size: usize,
        hidden_2_size: usize,
        size_action: usize,
    ) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let dims = [
            (size_state + size_action, hidden_1_size),
            (hidden_1_size, hidden_2_size),
            (hidden_2_size, 1),
        ];

        let network = make_network(&vb, prefix, &dims, false)?;
        let target_network = make_network(&vb, &format!("target-{prefix}"), &dims, false)?;

        // this sets the two networks to be equal to each other using tau = 1.0
        track(&varmap, &format!("target-{prefix}"), prefix, 1.0)?;

        Ok(Self {
            varmap,
            prefix: prefix.to_owned(),
            network,
            target_network,
        })
    }

    pub(crate) fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// The trainable parameters, excluding the target copy.
    pub(crate) fn vars(&self) -> Result<Vec<Var>> {
        filter_by_prefix(&self.varmap, &self.prefix)
    }

    pub(crate) fn forward(
        &self,
        state: &Tensor,
        action: &Tensor,
    ) -> Result<Tensor> {
        let xs = Tensor::cat(&[action, state], 1)?;
        self.network.forward(&xs)
    }

    pub(crate) fn target_forward(
        &self,
        state: &Tensor,
        action: &Tensor,
    ) -> Result<Tensor> {
        let xs = Tensor::cat(&[action, state], 1)?;
        self.target_network.forward(&xs)
    }

    pub(crate) fn track(
        &self,
        tau: f64,
    ) -> Result<()> {
        track(
            &self.varmap,
            &format!("target-{}", self.prefix),
            &self.prefix,
            tau,
        )
    }
}
