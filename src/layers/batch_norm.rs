use ndarray::{Array1, ArrayViewD, ArrayViewMutD};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::layers::layer::{LayerCell, LayerIo};
use crate::layers::parameters::{ParamKind, ParamsGroup};
use crate::layers::window::LayersWindow;

/// 批归一化参数：逐元素的缩放 `g` 与平移 `b`。
///
/// 批统计量在训练之外折入 `g` 与 `b`，层本身只做仿射变换。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchNormParameters {
    pub gains: Array1<f64>,
    pub biases: Array1<f64>,
}

impl BatchNormParameters {
    pub fn new(size: usize) -> Self {
        Self {
            gains: Array1::zeros(size),
            biases: Array1::zeros(size),
        }
    }
}

impl ParamsGroup for BatchNormParameters {
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

/// `y = f(g ⊙ x + b)`
#[derive(Clone, Debug, Default)]
pub struct BatchNormCell {
    x: Array1<f64>,
}

impl LayerCell for BatchNormCell {
    type Params = BatchNormParameters;

    fn forward(
        &mut self,
        params: &BatchNormParameters,
        io: &mut LayerIo<'_>,
        _window: &dyn LayersWindow,
    ) -> Result<()> {
        self.x = io.input().to_dense();
        io.set_output(&params.gains * &self.x + &params.biases)
    }

    fn backward(
        &mut self,
        params: &BatchNormParameters,
        io: &mut LayerIo<'_>,
        window: &dyn LayersWindow,
        propagate_to_input: bool,
    ) -> Result<BatchNormParameters> {
        let gz = io.output_gradient(window)?;
        if propagate_to_input {
            io.set_input_errors(0, &gz * &params.gains)?;
        }
        Ok(BatchNormParameters {
            gains: &gz * &self.x,
            biases: gz,
        })
    }
}
