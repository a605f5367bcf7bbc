//! Keep Burn module replicas identical across ranks.

use crate::error::{CollectiveError, CollectiveResult};
use crate::group::{Collective, ReduceOp};
use burn::module::{Module, ModuleMapper, ModuleVisitor, ParamId};
use burn::optim::GradientsParams;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{Tensor, TensorData};
use std::marker::PhantomData;

fn to_host<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> CollectiveResult<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| CollectiveError::Tensor(format!("{e:?}")))
}

struct GradientSync<'a, B: AutodiffBackend> {
    grads: &'a mut GradientsParams,
    group: &'a mut dyn Collective,
    error: Option<CollectiveError>,
    _backend: PhantomData<B>,
}

impl<B: AutodiffBackend> GradientSync<'_, B> {
    fn sync_param<const D: usize>(
        &mut self,
        id: ParamId,
        tensor: &Tensor<B, D>,
    ) -> CollectiveResult<()> {
        let dims = tensor.dims();
        let numel: usize = dims.iter().product();
        // Slot 0 counts the ranks that produced a gradient for this parameter.
        let mut buf = Vec::with_capacity(numel + 1);
        match self.grads.remove::<B::InnerBackend, D>(id.clone()) {
            Some(grad) => {
                buf.push(1.0);
                buf.extend(to_host(grad)?);
            }
            None => buf.resize(numel + 1, 0.0),
        }
        self.group.all_reduce(&mut buf, ReduceOp::Sum)?;
        if buf[0] < 0.5 {
            return Ok(());
        }
        let world = self.group.world_size() as f32;
        let mean: Vec<f32> = buf[1..].iter().map(|v| v / world).collect();
        let grad = Tensor::<B::InnerBackend, D>::from_floats(
            TensorData::new(mean, dims),
            &tensor.device(),
        );
        self.grads.register::<B::InnerBackend, D>(id, grad);
        Ok(())
    }
}

impl<B: AutodiffBackend> ModuleVisitor<B> for GradientSync<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, tensor: &Tensor<B, D>) {
        if self.error.is_some() {
            return;
        }
        if let Err(e) = self.sync_param(id, tensor) {
            self.error = Some(e);
        }
    }
}

/// Replace every gradient in `grads` with its mean over all ranks, visiting parameters
/// in module order. A parameter no rank has a gradient for stays ungradiented; ranks
/// missing a gradient others have contribute zeros.
pub fn all_reduce_gradients<B: AutodiffBackend, M: Module<B>>(
    module: &M,
    grads: &mut GradientsParams,
    group: &mut dyn Collective,
) -> CollectiveResult<()> {
    if group.world_size() == 1 {
        return Ok(());
    }
    let mut visitor = GradientSync::<B> {
        grads,
        group,
        error: None,
        _backend: PhantomData,
    };
    module.visit(&mut visitor);
    match visitor.error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateSync {
    /// Average tensors that do not require grad (batch-norm running statistics). On a
    /// backend without autodiff that is every tensor.
    MeanBuffers,
    /// Copy every tensor from `root`.
    Broadcast { root: usize },
}

struct StateMapper<'a> {
    group: &'a mut dyn Collective,
    mode: StateSync,
    synced: usize,
    error: Option<CollectiveError>,
}

impl StateMapper<'_> {
    fn sync<B: Backend, const D: usize>(
        &mut self,
        tensor: Tensor<B, D>,
    ) -> CollectiveResult<Tensor<B, D>> {
        let require_grad = tensor.is_require_grad();
        if self.mode == StateSync::MeanBuffers && require_grad {
            return Ok(tensor);
        }
        let dims = tensor.dims();
        let device = tensor.device();
        let mut buf = to_host(tensor)?;
        match self.mode {
            StateSync::MeanBuffers => self.group.all_reduce(&mut buf, ReduceOp::Mean)?,
            StateSync::Broadcast { root } => self.group.broadcast(&mut buf, root)?,
        }
        self.synced += 1;
        let out = Tensor::<B, D>::from_floats(TensorData::new(buf, dims), &device);
        Ok(out.set_require_grad(require_grad))
    }
}

impl<B: Backend> ModuleMapper<B> for StateMapper<'_> {
    fn map_float<const D: usize>(&mut self, _id: ParamId, tensor: Tensor<B, D>) -> Tensor<B, D> {
        if self.error.is_some() {
            return tensor;
        }
        match self.sync(tensor.clone()) {
            Ok(out) => out,
            Err(e) => {
                self.error = Some(e);
                tensor
            }
        }
    }
}

/// Synchronize module tensors across ranks. Every rank must pass a module of the same
/// structure.
pub fn sync_module_state<B: Backend, M: Module<B>>(
    module: M,
    group: &mut dyn Collective,
    mode: StateSync,
) -> CollectiveResult<M> {
    if group.world_size() == 1 {
        return Ok(module);
    }
    let mut mapper = StateMapper {
        group,
        mode,
        synced: 0,
        error: None,
    };
    let module = module.map(&mut mapper);
    if let Some(e) = mapper.error {
        return Err(e);
    }
    tracing::debug!(tensors = mapper.synced, ?mode, "module state synchronized");
    Ok(module)
}
