use tracing::debug;

use crate::error::{Result, argument, configuration, ensure_size};
use crate::layers::parameters::ParamsErrors;
use crate::stacked::accumulator::ParamsErrorsAccumulator;
use crate::stacked::parameters::StackedLayersParameters;

/// 随机梯度下降 (SGD) 优化器。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sgd {
    learning_rate: f64,
    /// 按元素裁剪梯度到 `[-c, c]`。
    gradient_clipping: Option<f64>,
}

impl Sgd {
    /// 创建一个新的 SGD 优化器实例。
    pub fn new(learning_rate: f64) -> Result<Self> {
        if !(learning_rate > 0.0) {
            return Err(configuration(format!(
                "learning rate must be positive, got {learning_rate}"
            )));
        }
        Ok(Self {
            learning_rate,
            gradient_clipping: None,
        })
    }

    pub fn with_gradient_clipping(mut self, clipping: f64) -> Result<Self> {
        if !(clipping > 0.0) {
            return Err(configuration(format!(
                "gradient clipping must be positive, got {clipping}"
            )));
        }
        self.gradient_clipping = Some(clipping);
        Ok(self)
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// 使用每层的参数梯度更新整个层栈的参数。
    ///
    /// # Arguments
    ///
    /// * `params` - 需要更新的层栈参数；仍被层实例共享的参数会先被复制。
    /// * `errors` - 每层一份参数梯度，顺序与层序一致。
    pub fn update(
        &self,
        params: &mut StackedLayersParameters,
        errors: &[ParamsErrors],
    ) -> Result<()> {
        ensure_size(params.len(), errors.len(), "number of layer errors")?;
        for (index, layer_errors) in errors.iter().enumerate() {
            let grads = layer_errors.arrays();
            let mut arrays = params.params_mut(index)?.arrays_mut();
            if arrays.len() != grads.len()
                || arrays.iter().zip(&grads).any(|(p, g)| p.shape() != g.shape())
            {
                return Err(argument(format!(
                    "errors of layer {index} do not match its parameters"
                )));
            }
            for (p, g) in arrays.iter_mut().zip(&grads) {
                match self.gradient_clipping {
                    Some(c) => p.scaled_add(-self.learning_rate, &g.mapv(|v| v.clamp(-c, c))),
                    None => p.scaled_add(-self.learning_rate, g),
                }
            }
        }
        Ok(())
    }

    /// 以收集器中的平均梯度更新；收集器为空时不做任何事。
    pub fn step(
        &self,
        params: &mut StackedLayersParameters,
        accumulator: &ParamsErrorsAccumulator,
    ) -> Result<()> {
        let Some(errors) = accumulator.averaged() else {
            return Ok(());
        };
        debug!(
            count = accumulator.count(),
            learning_rate = self.learning_rate,
            "sgd step"
        );
        self.update(params, &errors)
    }
}
