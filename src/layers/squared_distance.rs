use ndarray::{Array1, Array2, ArrayViewD, ArrayViewMutD};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::layers::layer::{LayerCell, LayerIo};
use crate::layers::parameters::{ParamKind, ParamsGroup};
use crate::layers::window::LayersWindow;

/// 投影矩阵 `B`（秩 × 输入），秩等于输入尺寸。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SquaredDistanceParameters {
    pub projection: Array2<f64>,
}

impl SquaredDistanceParameters {
    pub fn new(input_size: usize) -> Self {
        Self {
            projection: Array2::zeros((input_size, input_size)),
        }
    }
}

impl ParamsGroup for SquaredDistanceParameters {
    fn input_sizes(&self) -> Vec<usize> {
        vec![self.projection.ncols()]
    }

    fn output_size(&self) -> usize {
        1
    }

    fn params(&self) -> Vec<(ParamKind, ArrayViewD<'_, f64>)> {
        vec![(ParamKind::Weights, self.projection.view().into_dyn())]
    }

    fn params_mut(&mut self) -> Vec<(ParamKind, ArrayViewMutD<'_, f64>)> {
        vec![(ParamKind::Weights, self.projection.view_mut().into_dyn())]
    }
}

/// `y = ‖B·x‖²`
#[derive(Clone, Debug, Default)]
pub struct SquaredDistanceCell {
    projected: Array1<f64>,
}

impl LayerCell for SquaredDistanceCell {
    type Params = SquaredDistanceParameters;

    fn forward(
        &mut self,
        params: &SquaredDistanceParameters,
        io: &mut LayerIo<'_>,
        _window: &dyn LayersWindow,
    ) -> Result<()> {
        self.projected = io.input().dot_by(params.projection.view());
        let distance = self.projected.dot(&self.projected);
        io.set_output(Array1::from_elem(1, distance))
    }

    fn backward(
        &mut self,
        params: &SquaredDistanceParameters,
        io: &mut LayerIo<'_>,
        window: &dyn LayersWindow,
        propagate_to_input: bool,
    ) -> Result<SquaredDistanceParameters> {
        let gz = io.output_gradient(window)?;
        let g_projected = &self.projected * (2.0 * gz[0]);
        if propagate_to_input {
            io.set_input_errors(0, params.projection.t().dot(&g_projected))?;
        }
        Ok(SquaredDistanceParameters {
            projection: io.input().outer(g_projected.view()),
        })
    }
}
