use ndarray::Array1;
use tracing::debug;

use crate::arrays::input::{InputArray, InputType};
use crate::error::{LayerError, Result};
use crate::layers::factory::LayerFactory;
use crate::layers::layer::Layer;
use crate::layers::parameters::ParamsErrors;
use crate::stacked::parameters::StackedLayersParameters;

/// 按配置构建层实例。
///
/// `dropout` 是整个栈的比率：读取稀疏二值输入的层不施加 dropout，其余层都使用该比率。
/// 比率本身仍由 [`LayerFactory::build`] 校验。
pub(crate) fn build_layers(
    params: &StackedLayersParameters,
    dropout: f64,
    windowed: bool,
) -> Result<Vec<Layer>> {
    (0..params.len())
        .map(|index| {
            let (input, layer) = params.interfaces(index)?;
            let layer_dropout = if input.input_type == InputType::SparseBinary {
                if dropout > 0.0 {
                    debug!(index, "dropout skipped on sparse binary input");
                }
                0.0
            } else {
                dropout
            };
            LayerFactory::build(
                input,
                layer,
                params.params(index)?.clone(),
                layer_dropout,
                windowed,
            )
        })
        .collect()
}

pub(crate) fn layer_at(layers: &[Layer], index: usize) -> Result<&Layer> {
    layers.get(index).ok_or(LayerError::LayerIndexOutOfRange {
        index,
        len: layers.len(),
    })
}

pub(crate) fn layer_at_mut(layers: &mut [Layer], index: usize) -> Result<&mut Layer> {
    let len = layers.len();
    layers
        .get_mut(index)
        .ok_or(LayerError::LayerIndexOutOfRange { index, len })
}

/// 把第 `index` 层的输出复制为下一层的输入。
pub(crate) fn feed_next(layers: &mut [Layer], index: usize) -> Result<()> {
    let (lower, upper) = layers.split_at_mut(index + 1);
    upper[0].set_input(InputArray::Dense(lower[index].output_values().clone()))
}

/// 把第 `index` 层的输入误差作为上一层的输出误差。
pub(crate) fn feed_prev(layers: &mut [Layer], index: usize) -> Result<()> {
    let (lower, upper) = layers.split_at_mut(index);
    let errors = upper[0].input().errors()?.clone();
    lower[index - 1].set_errors(errors)
}

/// 非循环层栈：逐层前向，逐层反向。
///
/// 相邻层之间传递的是副本：下一层的输入 dropout 原地修改自己的输入，
/// 不能改动上一层的输出（时间窗口从那里读取 `yPrev`）。误差同样复制回上一层。
#[derive(Clone, Debug)]
pub struct StackedLayers {
    layers: Vec<Layer>,
}

impl StackedLayers {
    /// `dropout` 作用于所有稠密或稀疏输入的层；稀疏二值输入的层不施加。
    pub fn new(params: &StackedLayersParameters, dropout: f64) -> Result<Self> {
        Ok(Self {
            layers: build_layers(params, dropout, false)?,
        })
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, index: usize) -> Result<&Layer> {
        layer_at(&self.layers, index)
    }

    pub fn layer_mut(&mut self, index: usize) -> Result<&mut Layer> {
        layer_at_mut(&mut self.layers, index)
    }

    pub fn set_input(&mut self, values: InputArray) -> Result<()> {
        self.layers[0].set_input(values)
    }

    pub fn set_inputs(&mut self, values: Vec<InputArray>) -> Result<()> {
        self.layers[0].set_inputs(values)
    }

    pub fn forward(&mut self) -> Result<()> {
        for index in 0..self.layers.len() {
            if index > 0 {
                feed_next(&mut self.layers, index - 1)?;
            }
            self.layers[index].forward()?;
        }
        Ok(())
    }

    /// 从输出误差开始反向传播，返回每层的参数梯度（按层序）。
    pub fn backward(
        &mut self,
        output_errors: Array1<f64>,
        propagate_to_input: bool,
    ) -> Result<Vec<ParamsErrors>> {
        let last = self.layers.len() - 1;
        self.layers[last].set_errors(output_errors)?;
        let mut gradients = Vec::with_capacity(self.layers.len());
        for index in (0..self.layers.len()).rev() {
            gradients.push(self.layers[index].backward(index > 0 || propagate_to_input)?);
            if index > 0 {
                feed_prev(&mut self.layers, index)?;
            }
        }
        gradients.reverse();
        Ok(gradients)
    }

    /// 第一层各输入上的误差。
    pub fn input_errors(&self) -> Result<Vec<&Array1<f64>>> {
        self.layers[0]
            .inputs()
            .iter()
            .map(|input| input.errors())
            .collect()
    }

    pub fn output_values(&self) -> &Array1<f64> {
        self.layers[self.layers.len() - 1].output_values()
    }

    /// 参数更新后让各层引用新的参数。
    pub fn set_params(&mut self, params: &StackedLayersParameters) -> Result<()> {
        for (index, layer) in self.layers.iter_mut().enumerate() {
            layer.set_params(params.params(index)?.clone())?;
        }
        Ok(())
    }
}
