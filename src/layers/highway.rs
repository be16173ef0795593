use ndarray::{Array1, ArrayViewD, ArrayViewMutD};
use serde::{Deserialize, Serialize};

use crate::activations::functions::ActivationFunction;
use crate::arrays::augmented::AugmentedArray;
use crate::error::Result;
use crate::layers::layer::{LayerCell, LayerIo};
use crate::layers::parameters::{ParamKind, ParametersUnit, ParamsGroup};
use crate::layers::window::LayersWindow;

/// Highway 层参数：输入单元 `(Wu, bu)` 与变换门 `(Wt, bt)`。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HighwayParameters {
    pub input_unit: ParametersUnit,
    pub transform_gate: ParametersUnit,
}

impl HighwayParameters {
    pub fn new(size: usize) -> Self {
        Self {
            input_unit: ParametersUnit::new(size, size, true, false),
            transform_gate: ParametersUnit::new(size, size, true, false),
        }
    }
}

impl ParamsGroup for HighwayParameters {
    fn input_sizes(&self) -> Vec<usize> {
        vec![self.input_unit.weights.ncols()]
    }

    fn output_size(&self) -> usize {
        self.input_unit.weights.nrows()
    }

    fn params(&self) -> Vec<(ParamKind, ArrayViewD<'_, f64>)> {
        let mut out = Vec::new();
        self.input_unit.push_params(&mut out);
        self.transform_gate.push_params(&mut out);
        out
    }

    fn params_mut(&mut self) -> Vec<(ParamKind, ArrayViewMutD<'_, f64>)> {
        let mut out = Vec::new();
        self.input_unit.push_params_mut(&mut out);
        self.transform_gate.push_params_mut(&mut out);
        out
    }
}

/// `u = f(Wu·x + bu)`，`t = σ(Wt·x + bt)`，`y = t⊙u + (1−t)⊙x`
#[derive(Clone, Debug)]
pub struct HighwayCell {
    input_unit: AugmentedArray<Array1<f64>>,
    transform_gate: AugmentedArray<Array1<f64>>,
}

impl HighwayCell {
    pub fn new(size: usize, activation: Option<ActivationFunction>) -> Self {
        Self {
            input_unit: AugmentedArray::zeros(size).with_activation(activation),
            transform_gate: AugmentedArray::zeros(size)
                .with_activation(Some(ActivationFunction::Sigmoid)),
        }
    }

    pub fn transform_gate(&self) -> &AugmentedArray<Array1<f64>> {
        &self.transform_gate
    }
}

impl LayerCell for HighwayCell {
    type Params = HighwayParameters;

    fn forward(
        &mut self,
        params: &HighwayParameters,
        io: &mut LayerIo<'_>,
        _window: &dyn LayersWindow,
    ) -> Result<()> {
        let x = io.input();
        self.input_unit
            .assign_activated(params.input_unit.linear(x, None))?;
        self.transform_gate
            .assign_activated(params.transform_gate.linear(x, None))?;

        let t = self.transform_gate.values();
        let y = t * self.input_unit.values() + (1.0 - t) * &x.to_dense();
        io.set_output(y)
    }

    fn backward(
        &mut self,
        params: &HighwayParameters,
        io: &mut LayerIo<'_>,
        window: &dyn LayersWindow,
        propagate_to_input: bool,
    ) -> Result<HighwayParameters> {
        let gy = io.output_gradient(window)?;
        let x = io.input().to_dense();
        let t = self.transform_gate.values();
        let u = self.input_unit.values();

        let gu = &gy * t * self.input_unit.activation_deriv();
        let gt = &gy * &(u - &x) * self.transform_gate.activation_deriv();

        if propagate_to_input {
            let gx = params.input_unit.input_errors(&gu)
                + params.transform_gate.input_errors(&gt)
                + &gy * &(1.0 - t);
            io.set_input_errors(0, gx)?;
        }
        let gradients = HighwayParameters {
            input_unit: params.input_unit.gradients(&gu, io.input(), None),
            transform_gate: params.transform_gate.gradients(&gt, io.input(), None),
        };
        self.input_unit.set_errors(gu)?;
        self.transform_gate.set_errors(gt)?;
        Ok(gradients)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::interface::{ConnectionType, LayerInterface};
    use crate::layers::parameters::LayerParameters;
    use crate::testing::GradientCheck;
    use ndarray::{arr1, arr2};

    #[test]
    fn test_highway_gradients() {
        let mut p = HighwayParameters::new(3);
        p.input_unit.weights = arr2(&[[0.2, -0.5, 0.1], [0.7, 0.3, -0.4], [-0.6, 0.9, 0.2]]);
        p.input_unit.biases = Some(arr1(&[0.1, 0.0, -0.3]));
        p.transform_gate.weights = arr2(&[[-0.3, 0.4, 0.5], [0.1, -0.8, 0.6], [0.4, 0.2, -0.1]]);
        p.transform_gate.biases = Some(arr1(&[-0.2, 0.3, 0.05]));
        GradientCheck::new(
            vec![
                LayerInterface::input(3, Default::default()),
                LayerInterface::layer(3, ConnectionType::Highway, Some(ActivationFunction::Tanh)),
            ],
            LayerParameters::Highway(p),
            vec![arr1(&[0.9, -0.4, 0.3])],
            arr1(&[0.5, -1.0, 0.25]),
        )
        .verify();
    }
}
