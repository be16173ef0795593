use ndarray::{Array1, ArrayViewD, ArrayViewMutD};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::layers::layer::{LayerCell, LayerIo};
use crate::layers::parameters::{ParamKind, ParametersUnit, ParamsGroup};
use crate::layers::window::LayersWindow;

/// IndRNN 参数：输入变换 `W·x + b` 与逐元素的循环权重 `u`。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndRnnParameters {
    pub unit: ParametersUnit,
    pub recurrent_weights: Array1<f64>,
}

impl IndRnnParameters {
    pub fn new(input_size: usize, output_size: usize) -> Self {
        Self {
            unit: ParametersUnit::new(input_size, output_size, true, false),
            recurrent_weights: Array1::zeros(output_size),
        }
    }
}

impl ParamsGroup for IndRnnParameters {
    fn input_sizes(&self) -> Vec<usize> {
        vec![self.unit.weights.ncols()]
    }

    fn output_size(&self) -> usize {
        self.unit.weights.nrows()
    }

    fn params(&self) -> Vec<(ParamKind, ArrayViewD<'_, f64>)> {
        let mut out = Vec::new();
        self.unit.push_params(&mut out);
        out.push((ParamKind::Weights, self.recurrent_weights.view().into_dyn()));
        out
    }

    fn params_mut(&mut self) -> Vec<(ParamKind, ArrayViewMutD<'_, f64>)> {
        let mut out = Vec::new();
        self.unit.push_params_mut(&mut out);
        out.push((ParamKind::Weights, self.recurrent_weights.view_mut().into_dyn()));
        out
    }
}

/// `y = f(W·x + b + u ⊙ yPrev)`
#[derive(Clone, Debug, Default)]
pub struct IndRnnCell {
    y_prev: Option<Array1<f64>>,
}

impl LayerCell for IndRnnCell {
    type Params = IndRnnParameters;

    fn forward(
        &mut self,
        params: &IndRnnParameters,
        io: &mut LayerIo<'_>,
        window: &dyn LayersWindow,
    ) -> Result<()> {
        self.y_prev = window.prev_output().cloned();
        let mut z = params.unit.linear(io.input(), None);
        if let Some(y_prev) = &self.y_prev {
            z += &(&params.recurrent_weights * y_prev);
        }
        io.set_output(z)
    }

    fn backward(
        &mut self,
        params: &IndRnnParameters,
        io: &mut LayerIo<'_>,
        window: &dyn LayersWindow,
        propagate_to_input: bool,
    ) -> Result<IndRnnParameters> {
        let gz = io.output_gradient(window)?;
        if propagate_to_input {
            io.set_input_errors(0, params.unit.input_errors(&gz))?;
        }
        let recurrent_weights = match &self.y_prev {
            Some(y_prev) => {
                *io.prev_state_errors = Some(&gz * &params.recurrent_weights);
                &gz * y_prev
            }
            None => Array1::zeros(gz.len()),
        };
        Ok(IndRnnParameters {
            unit: params.unit.gradients(&gz, io.input(), None),
            recurrent_weights,
        })
    }
}
