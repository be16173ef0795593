use ndarray::{Array1, ArrayViewD, ArrayViewMutD};
use serde::{Deserialize, Serialize};

use crate::activations::functions::ActivationFunction;
use crate::activations::traits::Activation;
use crate::arrays::augmented::AugmentedArray;
use crate::error::Result;
use crate::layers::layer::{LayerCell, LayerIo};
use crate::layers::parameters::{ParamKind, ParametersUnit, ParamsGroup};
use crate::layers::window::LayersWindow;

/// CFN（混沌自由网络）参数：两个带循环项的门，候选值只有输入权重。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CfnParameters {
    pub input_gate: ParametersUnit,
    pub forget_gate: ParametersUnit,
    pub candidate: ParametersUnit,
}

impl CfnParameters {
    pub fn new(input_size: usize, output_size: usize) -> Self {
        Self {
            input_gate: ParametersUnit::new(input_size, output_size, true, true),
            forget_gate: ParametersUnit::new(input_size, output_size, true, true),
            candidate: ParametersUnit::new(input_size, output_size, false, false),
        }
    }
}

impl ParamsGroup for CfnParameters {
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

/// `y = in ⊙ f(Wc·x) + fg ⊙ f(yPrev)`，两个门都是 sigmoid。
#[derive(Clone, Debug)]
pub struct CfnCell {
    input_gate: AugmentedArray<Array1<f64>>,
    forget_gate: AugmentedArray<Array1<f64>>,
    candidate: AugmentedArray<Array1<f64>>,
    activation: Option<ActivationFunction>,
    y_prev: Option<Array1<f64>>,
}

impl CfnCell {
    pub fn new(size: usize, activation: Option<ActivationFunction>) -> Self {
        Self {
            input_gate: AugmentedArray::zeros(size)
                .with_activation(Some(ActivationFunction::Sigmoid)),
            forget_gate: AugmentedArray::zeros(size)
                .with_activation(Some(ActivationFunction::Sigmoid)),
            candidate: AugmentedArray::zeros(size).with_activation(activation),
            activation,
            y_prev: None,
        }
    }

    pub fn input_gate(&self) -> &AugmentedArray<Array1<f64>> {
        &self.input_gate
    }

    pub fn forget_gate(&self) -> &AugmentedArray<Array1<f64>> {
        &self.forget_gate
    }

    pub fn candidate(&self) -> &AugmentedArray<Array1<f64>> {
        &self.candidate
    }

    fn activate(&self, x: &Array1<f64>) -> Array1<f64> {
        match self.activation {
            Some(f) => f.forward(x),
            None => x.clone(),
        }
    }

    fn activation_deriv(&self, x: &Array1<f64>) -> Array1<f64> {
        match self.activation {
            Some(f) => f.derivative(x),
            None => Array1::ones(x.len()),
        }
    }
}

impl LayerCell for CfnCell {
    type Params = CfnParameters;

    fn forward(
        &mut self,
        params: &CfnParameters,
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
        self.candidate
            .assign_activated(params.candidate.linear(x, None))?;

        let mut y = self.input_gate.values() * self.candidate.values();
        if let Some(y_prev) = y_prev {
            y += &(self.forget_gate.values() * &self.activate(y_prev));
        }
        io.set_output(y)
    }

    fn backward(
        &mut self,
        params: &CfnParameters,
        io: &mut LayerIo<'_>,
        window: &dyn LayersWindow,
        propagate_to_input: bool,
    ) -> Result<CfnParameters> {
        let gy = io.output_gradient(window)?;

        let gin = &gy * self.candidate.values() * self.input_gate.activation_deriv();
        let gc = &gy * self.input_gate.values() * self.candidate.activation_deriv();
        let gfg = match &self.y_prev {
            Some(y_prev) => &gy * &self.activate(y_prev) * self.forget_gate.activation_deriv(),
            None => Array1::zeros(gy.len()),
        };

        if propagate_to_input {
            let gx = params.input_gate.input_errors(&gin)
                + params.forget_gate.input_errors(&gfg)
                + params.candidate.input_errors(&gc);
            io.set_input_errors(0, gx)?;
        }
        if let Some(y_prev) = &self.y_prev {
            let mut g_prev = &gy * self.forget_gate.values() * self.activation_deriv(y_prev);
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
        let gradients = CfnParameters {
            input_gate: params.input_gate.gradients(&gin, x, y_prev),
            forget_gate: params.forget_gate.gradients(&gfg, x, y_prev),
            candidate: params.candidate.gradients(&gc, x, None),
        };
        self.input_gate.set_errors(gin)?;
        self.forget_gate.set_errors(gfg)?;
        self.candidate.set_errors(gc)?;
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
        let mut p = CfnParameters::new(3, 2);
        p.input_gate.weights = arr2(&[[0.4, -0.3, 0.2], [-0.1, 0.6, 0.5]]);
        p.input_gate.biases = Some(arr1(&[0.1, -0.2]));
        p.input_gate.recurrent_weights = Some(arr2(&[[0.3, -0.5], [0.7, 0.2]]));
        p.forget_gate.weights = arr2(&[[-0.6, 0.1, 0.4], [0.2, -0.4, 0.3]]);
        p.forget_gate.biases = Some(arr1(&[0.3, 0.05]));
        p.forget_gate.recurrent_weights = Some(arr2(&[[-0.2, 0.4], [0.1, -0.6]]));
        p.candidate.weights = arr2(&[[0.5, 0.9, -0.7], [-0.8, 0.3, 0.1]]);
        GradientCheck::new(
            vec![
                LayerInterface::input(3, Default::default()),
                LayerInterface::layer(2, ConnectionType::Cfn, activation),
            ],
            LayerParameters::Cfn(p),
            vec![arr1(&[0.9, -0.4, 0.6])],
            arr1(&[-0.5, 0.8]),
        )
    }

    #[test]
    fn test_cfn_forward_with_prev_state() {
        let c = check(Some(ActivationFunction::Tanh)).with_init_hidden(arr1(&[0.5, -0.25]));
        let stack = c
            .stack(c.params(), &c.inputs, c.init_hidden.as_ref())
            .unwrap();
        let layer = stack.layer(0).unwrap();
        let crate::layers::layer::LayerUnit::Cfn(cell) = layer.unit() else {
            panic!("expected a CFN unit");
        };
        let expected = cell.input_gate().values() * cell.candidate().values()
            + cell.forget_gate().values() * &arr1(&[0.5f64.tanh(), (-0.25f64).tanh()]);
        layer
            .output_values()
            .iter()
            .zip(expected.iter())
            .for_each(|(a, b)| assert!((a - b).abs() < 1e-12));
    }

    #[test]
    fn test_cfn_gradients() {
        for activation in [None, Some(ActivationFunction::Tanh)] {
            check(activation).verify();
            check(activation)
                .with_init_hidden(arr1(&[0.5, -0.25]))
                .verify();
        }
    }
}
