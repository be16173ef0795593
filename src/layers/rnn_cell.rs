use ndarray::{Array1, ArrayViewD, ArrayViewMutD};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::layers::layer::{LayerCell, LayerIo};
use crate::layers::parameters::{ParamKind, ParametersUnit, ParamsGroup};
use crate::layers::window::LayersWindow;

/// 基础循环层参数：`W`、`b` 与循环权重 `Wr`。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimpleRecurrentParameters {
    pub unit: ParametersUnit,
}

impl SimpleRecurrentParameters {
    pub fn new(input_size: usize, output_size: usize) -> Self {
        Self {
            unit: ParametersUnit::new(input_size, output_size, true, true),
        }
    }
}

impl ParamsGroup for SimpleRecurrentParameters {
    fn input_sizes(&self) -> Vec<usize> {
        vec![self.unit.weights.ncols()]
    }

    fn output_size(&self) -> usize {
        self.unit.weights.nrows()
    }

    fn params(&self) -> Vec<(ParamKind, ArrayViewD<'_, f64>)> {
        let mut out = Vec::new();
        self.unit.push_params(&mut out);
        out
    }

    fn params_mut(&mut self) -> Vec<(ParamKind, ArrayViewMutD<'_, f64>)> {
        let mut out = Vec::new();
        self.unit.push_params_mut(&mut out);
        out
    }
}

/// 基础循环单元 (Vanilla RNN)：`y = f(W·x + b + Wr·yPrev)`。
#[derive(Clone, Debug, Default)]
pub struct SimpleRecurrentCell {
    /// 前向时读到的上一状态输出。
    y_prev: Option<Array1<f64>>,
}

impl LayerCell for SimpleRecurrentCell {
    type Params = SimpleRecurrentParameters;

    fn forward(
        &mut self,
        params: &SimpleRecurrentParameters,
        io: &mut LayerIo<'_>,
        window: &dyn LayersWindow,
    ) -> Result<()> {
        self.y_prev = window.prev_output().cloned();
        let z = params.unit.linear(io.input(), self.y_prev.as_ref());
        io.set_output(z)
    }

    fn backward(
        &mut self,
        params: &SimpleRecurrentParameters,
        io: &mut LayerIo<'_>,
        window: &dyn LayersWindow,
        propagate_to_input: bool,
    ) -> Result<SimpleRecurrentParameters> {
        let gz = io.output_gradient(window)?;
        if propagate_to_input {
            io.set_input_errors(0, params.unit.input_errors(&gz))?;
        }
        if self.y_prev.is_some() {
            *io.prev_state_errors = params.unit.recurrent_errors(&gz);
        }
        Ok(SimpleRecurrentParameters {
            unit: params.unit.gradients(&gz, io.input(), self.y_prev.as_ref()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activations::functions::ActivationFunction;
    use crate::layers::interface::{ConnectionType, LayerInterface};
    use crate::layers::parameters::LayerParameters;
    use crate::testing::GradientCheck;
    use ndarray::{arr1, arr2};

    fn check() -> GradientCheck {
        let mut p = SimpleRecurrentParameters::new(3, 2);
        p.unit.weights = arr2(&[[0.1, -0.4, 0.3], [0.6, 0.2, -0.5]]);
        p.unit.biases = Some(arr1(&[0.2, -0.1]));
        p.unit.recurrent_weights = Some(arr2(&[[0.5, -0.3], [0.2, 0.4]]));
        GradientCheck::new(
            vec![
                LayerInterface::input(3, Default::default()),
                LayerInterface::layer(
                    2,
                    ConnectionType::SimpleRecurrent,
                    Some(ActivationFunction::Tanh),
                ),
            ],
            LayerParameters::SimpleRecurrent(p),
            vec![arr1(&[1.0, -0.5, 0.25])],
            arr1(&[0.9, -0.6]),
        )
    }

    #[test]
    fn test_simple_recurrent_gradients() {
        check().verify();
        check().with_init_hidden(arr1(&[0.3, -0.8])).verify();
    }

    #[test]
    fn test_first_step_has_no_recurrent_contribution() {
        let c = check();
        let mut stack = c.stack(c.params(), &c.inputs, None).unwrap();
        let LayerParameters::SimpleRecurrent(p) = c.params() else {
            unreachable!()
        };
        let expected = p.unit.weights.dot(&c.inputs[0]) + p.unit.biases.as_ref().unwrap();
        assert_eq!(stack.output_values(), &expected.mapv(f64::tanh));

        let gradients = stack
            .backward(c.output_errors.clone(), &crate::stacked::window::NoStates, true)
            .unwrap();
        let LayerParameters::SimpleRecurrent(g) = &gradients[0] else {
            unreachable!()
        };
        assert!(g.unit.recurrent_weights.as_ref().unwrap().iter().all(|&v| v == 0.0));
        assert!(stack.layer(0).unwrap().prev_state_errors().is_none());
    }
}
