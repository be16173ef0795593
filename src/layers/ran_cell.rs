use ndarray::{Array1, ArrayViewD, ArrayViewMutD};
use serde::{Deserialize, Serialize};

use crate::activations::functions::ActivationFunction;
use crate::arrays::augmented::AugmentedArray;
use crate::error::Result;
use crate::layers::layer::{LayerCell, LayerIo};
use crate::layers::parameters::{ParamKind, ParametersUnit, ParamsGroup};
use crate::layers::window::LayersWindow;

/// RAN（循环加性网络）参数：两个带循环项的门，候选值带偏置但没有循环项。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RanParameters {
    pub input_gate: ParametersUnit,
    pub forget_gate: ParametersUnit,
    pub candidate: ParametersUnit,
}

impl RanParameters {
    pub fn new(input_size: usize, output_size: usize) -> Self {
        Self {
            input_gate: ParametersUnit::new(input_size, output_size, true, true),
            forget_gate: ParametersUnit::new(input_size, output_size, true, true),
            candidate: ParametersUnit::new(input_size, output_size, true, false),
        }
    }
}

impl ParamsGroup for RanParameters {
    fn input_sizes(&self) -> Vec<usize> {
        vec![self.candidate.weights.ncols()]
    }

    fn output_size(&self) -> usize {
        self.candidate.weights.nrows()
    }

    fn params(&self) -> Vec<(ParamKind, ArrayViewD<'_, f64>)> {
        let mut out = Vec::new();
        self.input_gate.push_params(&mut out);
        self.forget_gate.push_params(&mut out);
        self.candidate.push_params(&mut out);
        out
    }

    fn params_mut(&mut self) -> Vec<(ParamKind, ArrayViewMutD<'_, f64>)> {
        let mut out = Vec::new();
        self.input_gate.push_params_mut(&mut out);
        self.forget_gate.push_params_mut(&mut out);
        self.candidate.push_params_mut(&mut out);
        out
    }
}

/// `y = f(in ⊙ (Wc·x + bc) + fg ⊙ yPrev)`；层激活函数作用在输出上。
#[derive(Clone, Debug)]
pub struct RanCell {
    input_gate: AugmentedArray<Array1<f64>>,
    forget_gate: AugmentedArray<Array1<f64>>,
    candidate: Array1<f64>,
    y_prev: Option<Array1<f64>>,
}

impl RanCell {
    pub fn new(size: usize) -> Self {
        let gate =
            || AugmentedArray::zeros(size).with_activation(Some(ActivationFunction::Sigmoid));
        Self {
            input_gate: gate(),
            forget_gate: gate(),
            candidate: Array1::zeros(size),
            y_prev: None,
        }
    }

    pub fn input_gate(&self) -> &AugmentedArray<Array1<f64>> {
        &self.input_gate
    }

    pub fn forget_gate(&self) -> &AugmentedArray<Array1<f64>> {
        &self.forget_gate
    }

    pub fn candidate(&self) -> &Array1<f64> {
        &self.candidate
    }
}

impl LayerCell for RanCell {
    type Params = RanParameters;

    fn forward(
        &mut self,
        params: &RanParameters,
        io: &mut LayerIo<'_>,
        window: &dyn LayersWindow,
    ) -> Result<()> {
        let x = io.input();
        self.y_prev = window.prev_output().cloned();
        let y_prev = self.y_prev.as_ref();

        self.input_gate
            .assign_activated(params.input_gate.linear(x, y_prev))?;
        self.forget_gate
            .assign_activated(params.forget_gate.linear(x, y_prev))?;
        self.candidate = params.candidate.linear(x, None);

        let mut z = self.input_gate.values() * &self.candidate;
        if let Some(y_prev) = y_prev {
            z += &(self.forget_gate.values() * y_prev);
        }
        io.set_output(z)
    }

    fn backward(
        &mut self,
        params: &RanParameters,
        io: &mut LayerIo<'_>,
        window: &dyn LayersWindow,
        propagate_to_input: bool,
    ) -> Result<RanParameters> {
        let gz = io.output_gradient(window)?;

        let gin = &gz * &self.candidate * self.input_gate.activation_deriv();
        let gc = &gz * self.input_gate.values();
        let gfg = match &self.y_prev {
            Some(y_prev) => &gz * y_prev * self.forget_gate.activation_deriv(),
            None => Array1::zeros(gz.len()),
        };

        if propagate_to_input {
            let gx = params.input_gate.input_errors(&gin)
                + params.forget_gate.input_errors(&gfg)
                + params.candidate.input_errors(&gc);
            io.set_input_errors(0, gx)?;
        }
        if self.y_prev.is_some() {
            let mut g_prev = &gz * self.forget_gate.values();
            for recurrent in [
                params.input_gate.recurrent_errors(&gin),
                params.forget_gate.recurrent_errors(&gfg),
            ]
            .into_iter()
            .flatten()
            {
                g_prev += &recurrent;
            }
            *io.prev_state_errors = Some(g_prev);
        }

        let x = io.input();
        let y_prev = self.y_prev.as_ref();
        let gradients = RanParameters {
            input_gate: params.input_gate.gradients(&gin, x, y_prev),
            forget_gate: params.forget_gate.gradients(&gfg, x, y_prev),
            candidate: params.candidate.gradients(&gc, x, None),
        };
        self.input_gate.set_errors(gin)?;
        self.forget_gate.set_errors(gfg)?;
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

    fn check(activation: Option<ActivationFunction>) -> GradientCheck {
        let mut p = RanParameters::new(2, 3);
        p.input_gate.weights = arr2(&[[0.3, -0.6], [0.8, 0.1], [-0.4, 0.5]]);
        p.input_gate.biases = Some(arr1(&[0.1, 0.0, -0.1]));
        p.input_gate.recurrent_weights =
            Some(arr2(&[[0.2, -0.1, 0.4], [0.5, 0.3, -0.2], [-0.6, 0.1, 0.2]]));
        p.forget_gate.weights = arr2(&[[-0.5, 0.2], [0.4, -0.7], [0.1, 0.9]]);
        p.forget_gate.biases = Some(arr1(&[0.2, -0.3, 0.4]));
        p.forget_gate.recurrent_weights =
            Some(arr2(&[[0.1, 0.6, -0.3], [-0.2, 0.2, 0.5], [0.4, -0.5, 0.1]]));
        p.candidate.weights = arr2(&[[0.7, -0.2], [-0.9, 0.4], [0.3, 0.6]]);
        p.candidate.biases = Some(arr1(&[-0.05, 0.15, 0.25]));
        GradientCheck::new(
            vec![
                LayerInterface::input(2, Default::default()),
                LayerInterface::layer(3, ConnectionType::Ran, activation),
            ],
            LayerParameters::Ran(p),
            vec![arr1(&[-0.7, 1.1])],
            arr1(&[0.3, -0.9, 0.6]),
        )
    }

    #[test]
    fn test_ran_output_is_activated() {
        let c = check(Some(ActivationFunction::Tanh));
        let stack = c.stack(c.params(), &c.inputs, None).unwrap();
        let layer = stack.layer(0).unwrap();
        let crate::layers::layer::LayerUnit::Ran(cell) = layer.unit() else {
            panic!("expected a RAN unit");
        };
        let expected = (cell.input_gate().values() * cell.candidate()).mapv(f64::tanh);
        layer
            .output_values()
            .iter()
            .zip(expected.iter())
            .for_each(|(a, b)| assert!((a - b).abs() < 1e-12));
    }

    #[test]
    fn test_ran_gradients() {
        for activation in [None, Some(ActivationFunction::Tanh)] {
            check(activation).verify();
            check(activation)
                .with_init_hidden(arr1(&[0.1, 0.4, -0.3]))
                .verify();
        }
    }
}
