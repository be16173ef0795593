use ndarray::{Array1, Array3, ArrayViewD, ArrayViewMutD, Axis};
use serde::{Deserialize, Serialize};

use crate::arrays::input::outer;
use crate::error::Result;
use crate::layers::layer::{LayerCell, LayerIo};
use crate::layers::parameters::{ParamKind, ParametersUnit, ParamsGroup};
use crate::layers::window::LayersWindow;

/// 双仿射层参数。
///
/// `first` 持有 `W1` 与偏置 `b`，`second` 只持有 `W2`；`bilinear[k]` 是输出第 k 维的双线性矩阵。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BiaffineParameters {
    pub first: ParametersUnit,
    pub second: ParametersUnit,
    pub bilinear: Array3<f64>,
}

impl BiaffineParameters {
    pub fn new(input_size_1: usize, input_size_2: usize, output_size: usize) -> Self {
        Self {
            first: ParametersUnit::new(input_size_1, output_size, true, false),
            second: ParametersUnit::new(input_size_2, output_size, false, false),
            bilinear: Array3::zeros((output_size, input_size_1, input_size_2)),
        }
    }
}

impl ParamsGroup for BiaffineParameters {
    fn input_sizes(&self) -> Vec<usize> {
        vec![self.first.weights.ncols(), self.second.weights.ncols()]
    }

    fn output_size(&self) -> usize {
        self.first.weights.nrows()
    }

    fn params(&self) -> Vec<(ParamKind, ArrayViewD<'_, f64>)> {
        let mut out = Vec::new();
        self.first.push_params(&mut out);
        self.second.push_params(&mut out);
        out.push((ParamKind::Weights, self.bilinear.view().into_dyn()));
        out
    }

    fn params_mut(&mut self) -> Vec<(ParamKind, ArrayViewMutD<'_, f64>)> {
        let mut out = Vec::new();
        self.first.push_params_mut(&mut out);
        self.second.push_params_mut(&mut out);
        out.push((ParamKind::Weights, self.bilinear.view_mut().into_dyn()));
        out
    }
}

/// `y_k = x1ᵀ·Wk·x2 + (W1·x1)_k + (W2·x2)_k + b_k`
#[derive(Clone, Debug, Default)]
pub struct BiaffineCell;

impl LayerCell for BiaffineCell {
    type Params = BiaffineParameters;

    fn forward(
        &mut self,
        params: &BiaffineParameters,
        io: &mut LayerIo<'_>,
        _window: &dyn LayersWindow,
    ) -> Result<()> {
        let (x1, x2) = (io.inputs[0].values(), io.inputs[1].values());
        let (d1, d2) = (x1.to_dense(), x2.to_dense());
        let bilinear = Array1::from_iter(
            params
                .bilinear
                .axis_iter(Axis(0))
                .map(|w| d1.dot(&w.dot(&d2))),
        );
        let z = bilinear + params.first.linear(x1, None) + params.second.linear(x2, None);
        io.set_output(z)
    }

    fn backward(
        &mut self,
        params: &BiaffineParameters,
        io: &mut LayerIo<'_>,
        window: &dyn LayersWindow,
        propagate_to_input: bool,
    ) -> Result<BiaffineParameters> {
        let gz = io.output_gradient(window)?;
        let (x1, x2) = (io.inputs[0].values(), io.inputs[1].values());
        let (d1, d2) = (x1.to_dense(), x2.to_dense());

        let mut bilinear = Array3::zeros(params.bilinear.raw_dim());
        let pair = outer(d1.view(), d2.view());
        for (k, mut slice) in bilinear.axis_iter_mut(Axis(0)).enumerate() {
            slice.assign(&(&pair * gz[k]));
        }
        let gradients = BiaffineParameters {
            first: params.first.gradients(&gz, x1, None),
            second: params.second.gradients(&gz, x2, None),
            bilinear,
        };

        if propagate_to_input {
            let mut g1 = params.first.input_errors(&gz);
            let mut g2 = params.second.input_errors(&gz);
            for (k, w) in params.bilinear.axis_iter(Axis(0)).enumerate() {
                g1.scaled_add(gz[k], &w.dot(&d2));
                g2.scaled_add(gz[k], &w.t().dot(&d1));
            }
            io.set_input_errors(0, g1)?;
            io.set_input_errors(1, g2)?;
        }
        Ok(gradients)
    }
}
