use ndarray::{Array1, ArrayViewD, ArrayViewMutD, s};
use serde::{Deserialize, Serialize};

use crate::arrays::augmented::AugmentedArray;
use crate::arrays::input::InputArray;
use crate::error::Result;
use crate::layers::feedforward::RELEVANCE_EPSILON;
use crate::layers::interface::ConnectionType;
use crate::layers::layer::{LayerCell, LayerIo, RelevanceCell};
use crate::layers::parameters::{ParamKind, ParamsGroup};
use crate::layers::window::{LayersWindow, NoWindow};

/// 合并层没有可训练参数，只记录尺寸。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MergeParameters {
    pub input_sizes: Vec<usize>,
    pub output_size: usize,
}

impl MergeParameters {
    pub fn new(input_sizes: Vec<usize>, output_size: usize) -> Self {
        Self {
            input_sizes,
            output_size,
        }
    }
}

impl ParamsGroup for MergeParameters {
    fn input_sizes(&self) -> Vec<usize> {
        self.input_sizes.clone()
    }

    fn output_size(&self) -> usize {
        self.output_size
    }

    fn params(&self) -> Vec<(ParamKind, ArrayViewD<'_, f64>)> {
        Vec::new()
    }

    fn params_mut(&mut self) -> Vec<(ParamKind, ArrayViewMutD<'_, f64>)> {
        Vec::new()
    }
}

/// Concat / Sum / Sub / Avg / Product，可选输出激活。
#[derive(Clone, Debug)]
pub struct MergeCell {
    operation: ConnectionType,
}

impl MergeCell {
    pub fn new(operation: ConnectionType) -> Self {
        Self { operation }
    }

    pub fn operation(&self) -> ConnectionType {
        self.operation
    }

    pub fn supports_relevance(&self) -> bool {
        matches!(self.operation, ConnectionType::Concat | ConnectionType::Sum)
    }

    fn merge(&self, xs: &[Array1<f64>]) -> Array1<f64> {
        match self.operation {
            ConnectionType::Concat => xs.iter().flat_map(|x| x.iter().copied()).collect(),
            ConnectionType::Sub => &xs[0] - &xs[1],
            ConnectionType::Avg => sum(xs) / xs.len() as f64,
            ConnectionType::Product => xs
                .iter()
                .skip(1)
                .fold(xs[0].clone(), |acc, x| acc * x),
            _ => sum(xs),
        }
    }
}

fn sum(xs: &[Array1<f64>]) -> Array1<f64> {
    xs.iter()
        .skip(1)
        .fold(xs[0].clone(), |acc, x| acc + x)
}

fn dense_inputs(inputs: &[AugmentedArray<InputArray>]) -> Vec<Array1<f64>> {
    inputs.iter().map(|input| input.values().to_dense()).collect()
}

impl LayerCell for MergeCell {
    type Params = MergeParameters;

    fn forward(
        &mut self,
        _params: &MergeParameters,
        io: &mut LayerIo<'_>,
        _window: &dyn LayersWindow,
    ) -> Result<()> {
        let y = self.merge(&dense_inputs(io.inputs));
        io.set_output(y)
    }

    fn backward(
        &mut self,
        params: &MergeParameters,
        io: &mut LayerIo<'_>,
        window: &dyn LayersWindow,
        propagate_to_input: bool,
    ) -> Result<MergeParameters> {
        let gy = io.output_gradient(window)?;
        if propagate_to_input {
            let xs = dense_inputs(io.inputs);
            let n = xs.len();
            let mut offset = 0;
            for k in 0..n {
                let gx = match self.operation {
                    ConnectionType::Concat => {
                        let size = xs[k].len();
                        let gx = gy.slice(s![offset..offset + size]).to_owned();
                        offset += size;
                        gx
                    }
                    ConnectionType::Sub if k == 1 => -&gy,
                    ConnectionType::Avg => &gy / n as f64,
                    // 其余输入之积；不做除法，输入含零时也成立
                    ConnectionType::Product => (0..n)
                        .filter(|&j| j != k)
                        .fold(gy.clone(), |acc, j| acc * &xs[j]),
                    _ => gy.clone(),
                };
                io.set_input_errors(k, gx)?;
            }
        }
        Ok(params.clone())
    }
}

impl RelevanceCell for MergeCell {
    fn forward_with_contributions(
        &mut self,
        params: &MergeParameters,
        io: &mut LayerIo<'_>,
        _contributions: &mut MergeParameters,
    ) -> Result<()> {
        self.forward(params, io, &NoWindow)
    }

    /// Concat 按位置切分输出相关度；Sum 按各输入占和的比例分配（epsilon 规则）。
    fn input_relevance(
        &self,
        inputs: &[AugmentedArray<InputArray>],
        output: &AugmentedArray<Array1<f64>>,
        _contributions: &MergeParameters,
    ) -> Result<Vec<Array1<f64>>> {
        let relevance = output.relevance()?;
        let xs = dense_inputs(inputs);
        match self.operation {
            ConnectionType::Concat => {
                let mut offset = 0;
                Ok(xs
                    .iter()
                    .map(|x| {
                        let r = relevance.slice(s![offset..offset + x.len()]).to_owned();
                        offset += x.len();
                        r
                    })
                    .collect())
            }
            _ => {
                let z = output.values_not_activated();
                let scale = Array1::from_shape_fn(z.len(), |j| {
                    let stabilizer = if z[j] >= 0.0 {
                        RELEVANCE_EPSILON
                    } else {
                        -RELEVANCE_EPSILON
                    };
                    relevance[j] / (z[j] + stabilizer)
                });
                Ok(xs.iter().map(|x| x * &scale).collect())
            }
        }
    }
}
