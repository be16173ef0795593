use ndarray::{Array1, ArrayViewD, ArrayViewMutD};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::layers::layer::{LayerCell, LayerIo};
use crate::layers::parameters::{ParamKind, ParamsGroup};
use crate::layers::window::LayersWindow;

const NORM_EPSILON: f64 = 1e-5;

/// 层归一化参数：增益 `g`（按权重初始化）与偏置 `b`。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormParameters {
    pub gains: Array1<f64>,
    pub biases: Array1<f64>,
}

impl NormParameters {
    pub fn new(size: usize) -> Self {
        Self {
            gains: Array1::zeros(size),
            biases: Array1::zeros(size),
        }
    }
}

impl ParamsGroup for NormParameters {
    fn input_sizes(&self) -> Vec<usize> {
        vec![self.gains.len()]
    }

    fn output_size(&self) -> usize {
        self.gains.len()
    }

    fn params(&self) -> Vec<(ParamKind, ArrayViewD<'_, f64>)> {
        vec![
            (ParamKind::Weights, self.gains.view().into_dyn()),
            (ParamKind::Biases, self.biases.view().into_dyn()),
        ]
    }

    fn params_mut(&mut self) -> Vec<(ParamKind, ArrayViewMutD<'_, f64>)> {
        vec![
            (ParamKind::Weights, self.gains.view_mut().into_dyn()),
            (ParamKind::Biases, self.biases.view_mut().into_dyn()),
        ]
    }
}

/// `x̂ = (x − μ)/sqrt(var + ε)`，`y = f(g⊙x̂ + b)`
#[derive(Clone, Debug, Default)]
pub struct NormCell {
    normalized: Array1<f64>,
    deviation: f64,
}

impl LayerCell for NormCell {
    type Params = NormParameters;

    fn forward(
        &mut self,
        params: &NormParameters,
        io: &mut LayerIo<'_>,
        _window: &dyn LayersWindow,
    ) -> Result<()> {
        let x = io.input().to_dense();
        let mean = x.mean().unwrap_or(0.0);
        let variance = x.mapv(|v| (v - mean).powi(2)).mean().unwrap_or(0.0);
        self.deviation = (variance + NORM_EPSILON).sqrt();
        self.normalized = (x - mean) / self.deviation;
        io.set_output(&params.gains * &self.normalized + &params.biases)
    }

    fn backward(
        &mut self,
        params: &NormParameters,
        io: &mut LayerIo<'_>,
        window: &dyn LayersWindow,
        propagate_to_input: bool,
    ) -> Result<NormParameters> {
        let gz = io.output_gradient(window)?;
        if propagate_to_input {
            let gx_hat = &gz * &params.gains;
            let mean_g = gx_hat.mean().unwrap_or(0.0);
            let mean_gx = (&gx_hat * &self.normalized).mean().unwrap_or(0.0);
            let gx = (gx_hat - mean_g - &self.normalized * mean_gx) / self.deviation;
            io.set_input_errors(0, gx)?;
        }
        Ok(NormParameters {
            gains: &gz * &self.normalized,
            biases: gz,
        })
    }
}
