use ndarray::{Array1, ArrayViewD, ArrayViewMutD};
use serde::{Deserialize, Serialize};

use crate::activations::functions::ActivationFunction;
use crate::arrays::augmented::AugmentedArray;
use crate::error::Result;
use crate::layers::layer::{LayerCell, LayerIo};
use crate::layers::parameters::{ParamKind, ParametersUnit, ParamsGroup};
use crate::layers::window::LayersWindow;

/// GRU 参数：重置门、更新（分配）门与候选值，每个都带循环权重。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GruParameters {
    pub reset_gate: ParametersUnit,
    pub partition_gate: ParametersUnit,
    pub candidate: ParametersUnit,
}

impl GruParameters {
    pub fn new(input_size: usize, output_size: usize) -> Self {
        Self {
            reset_gate: ParametersUnit::new(input_size, output_size, true, true),
            partition_gate: ParametersUnit::new(input_size, output_size, true, true),
            candidate: ParametersUnit::new(input_size, output_size, true, true),
        }
    }
}

impl ParamsGroup for GruParameters {
    fn input_sizes(&self) -> Vec<usize> {
        vec![self.candidate.weights.ncols()]
    }

    fn output_size(&self) -> usize {
        self.candidate.weights.nrows()
    }

    fn params(&self) -> Vec<(ParamKind, ArrayViewD<'_, f64>)> {
        let mut out = Vec::new();
        self.reset_gate.push_params(&mut out);
        self.partition_gate.push_params(&mut out);
        self.candidate.push_params(&mut out);
        out
    }

    fn params_mut(&mut self) -> Vec<(ParamKind, ArrayViewMutD<'_, f64>)> {
        let mut out = Vec::new();
        self.reset_gate.push_params_mut(&mut out);
        self.partition_gate.push_params_mut(&mut out);
        self.candidate.push_params_mut(&mut out);
        out
    }
}

/// GRU 单元
///
/// ```text
/// r = σ(Wr·x + br + Wrr·yPrev)
/// p = σ(Wp·x + bp + Wpr·yPrev)
/// c = f(Wc·x + bc + Wcr·(yPrev ⊙ r))
/// y = p ⊙ c + (1 − p) ⊙ yPrev
/// ```
///
/// 没有上一状态时所有含 `yPrev` 的项都被省略。输出本身不再激活。
#[derive(Clone, Debug)]
pub struct GruCell {
    reset_gate: AugmentedArray<Array1<f64>>,
    partition_gate: AugmentedArray<Array1<f64>>,
    candidate: AugmentedArray<Array1<f64>>,
    y_prev: Option<Array1<f64>>,
}

impl GruCell {
    pub fn new(size: usize, activation: Option<ActivationFunction>) -> Self {
        Self {
            reset_gate: AugmentedArray::zeros(size)
                .with_activation(Some(ActivationFunction::Sigmoid)),
            partition_gate: AugmentedArray::zeros(size)
                .with_activation(Some(ActivationFunction::Sigmoid)),
            candidate: AugmentedArray::zeros(size).with_activation(activation),
            y_prev: None,
        }
    }

    pub fn reset_gate(&self) -> &AugmentedArray<Array1<f64>> {
        &self.reset_gate
    }

    pub fn partition_gate(&self) -> &AugmentedArray<Array1<f64>> {
        &self.partition_gate
    }

    pub fn candidate(&self) -> &AugmentedArray<Array1<f64>> {
        &self.candidate
    }

    /// `yPrev ⊙ r`，候选值的循环输入。
    fn reset_prev(&self) -> Option<Array1<f64>> {
        self.y_prev.as_ref().map(|y| y * self.reset_gate.values())
    }
}

impl LayerCell for GruCell {
    type Params = GruParameters;

    fn forward(
        &mut self,
        params: &GruParameters,
        io: &mut LayerIo<'_>,
        window: &dyn LayersWindow,
    ) -> Result<()> {
        let x = io.input();
        self.y_prev = window.prev_output().cloned();
        let y_prev = self.y_prev.as_ref();

        // 重置门与分配门的循环项必须在激活之前加入
        self.reset_gate
            .assign_activated(params.reset_gate.linear(x, y_prev))?;
        self.partition_gate
            .assign_activated(params.partition_gate.linear(x, y_prev))?;
        // 候选值的循环项依赖已激活的重置门
        let reset_prev = self.reset_prev();
        self.candidate
            .assign_activated(params.candidate.linear(x, reset_prev.as_ref()))?;

        let p = self.partition_gate.values();
        let mut y = p * self.candidate.values();
        if let Some(y_prev) = &self.y_prev {
            y += &((1.0 - p) * y_prev);
        }
        io.set_output(y)
    }

    fn backward(
        &mut self,
        params: &GruParameters,
        io: &mut LayerIo<'_>,
        window: &dyn LayersWindow,
        propagate_to_input: bool,
    ) -> Result<GruParameters> {
        let gy = io.output_gradient(window)?;
        let p = self.partition_gate.values();
        let c = self.candidate.values();
        let r = self.reset_gate.values();

        let gc = &gy * p * self.candidate.activation_deriv();
        let c_minus_prev = match &self.y_prev {
            Some(y_prev) => c - y_prev,
            None => c.clone(),
        };
        let gp = &gy * &c_minus_prev * self.partition_gate.activation_deriv();
        let wcr_gc = params.candidate.recurrent_errors(&gc);
        let gr = match (&self.y_prev, &wcr_gc) {
            (Some(y_prev), Some(wcr_gc)) => wcr_gc * y_prev * self.reset_gate.activation_deriv(),
            _ => Array1::zeros(r.len()),
        };

        if propagate_to_input {
            let gx = params.reset_gate.input_errors(&gr)
                + params.partition_gate.input_errors(&gp)
                + params.candidate.input_errors(&gc);
            io.set_input_errors(0, gx)?;
        }

        if self.y_prev.is_some() {
            let mut g_prev = &gy * &(1.0 - p);
            for recurrent in [
                params.reset_gate.recurrent_errors(&gr),
                params.partition_gate.recurrent_errors(&gp),
            ]
            .into_iter()
            .flatten()
            {
                g_prev += &recurrent;
            }
            if let Some(wcr_gc) = &wcr_gc {
                g_prev += &(wcr_gc * r);
            }
            *io.prev_state_errors = Some(g_prev);
        }

        let x = io.input();
        let reset_prev = self.reset_prev();
        let gradients = GruParameters {
            reset_gate: params.reset_gate.gradients(&gr, x, self.y_prev.as_ref()),
            partition_gate: params.partition_gate.gradients(&gp, x, self.y_prev.as_ref()),
            candidate: params.candidate.gradients(&gc, x, reset_prev.as_ref()),
        };
        self.reset_gate.set_errors(gr)?;
        self.partition_gate.set_errors(gp)?;
        self.candidate.set_errors(gc)?;
        Ok(gradients)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::interface::{ConnectionType, LayerInterface};
    use crate::layers::layer::LayerUnit;
    use crate::layers::parameters::LayerParameters;
    use crate::testing::GradientCheck;
    use ndarray::{Array2, arr1, arr2};

    fn unit(weights: Array2<f64>, biases: Array1<f64>, recurrent: Array2<f64>) -> ParametersUnit {
        ParametersUnit {
            weights,
            biases: Some(biases),
            recurrent_weights: Some(recurrent),
        }
    }

    fn recurrent(seed: f64) -> Array2<f64> {
        Array2::from_shape_fn((5, 5), |(i, j)| ((i * 5 + j) as f64 * seed).sin() * 0.5)
    }

    fn fixture_params() -> GruParameters {
        GruParameters {
            reset_gate: unit(
                arr2(&[
                    [-0.3, 0.9, -0.3, 0.7],
                    [0.5, 0.7, 0.4, -0.6],
                    [1.0, -0.9, -0.1, -0.5],
                    [0.2, -0.7, 0.8, 0.9],
                    [0.5, -1.0, 1.0, -0.1],
                ]),
                arr1(&[-0.8, 0.9, 0.4, 0.2, 0.3]),
                recurrent(0.7),
            ),
            partition_gate: unit(
                arr2(&[
                    [-0.2, -0.2, 0.0, 0.7],
                    [-0.2, 0.7, -0.1, 0.2],
                    [-0.8, 0.8, 0.6, -0.7],
                    [-0.6, 0.2, -0.2, 0.6],
                    [0.9, 0.0, -0.4, -1.0],
                ]),
                arr1(&[0.7, -0.1, -0.7, -1.0, 0.2]),
                recurrent(1.3),
            ),
            candidate: unit(
                arr2(&[
                    [-0.4, -0.9, -1.0, -0.8],
                    [0.7, -0.2, 0.8, 0.8],
                    [-0.5, -0.8, 0.0, 0.7],
                    [0.0, 0.0, -0.6, 0.2],
                    [0.2, 0.5, -1.0, 0.3],
                ]),
                arr1(&[0.1, -0.3, 0.1, 1.0, -0.8]),
                recurrent(2.1),
            ),
        }
    }

    fn check() -> GradientCheck {
        GradientCheck::new(
            vec![
                LayerInterface::input(4, Default::default()),
                LayerInterface::layer(5, ConnectionType::Gru, Some(ActivationFunction::Tanh)),
            ],
            LayerParameters::Gru(fixture_params()),
            vec![arr1(&[-0.8, -0.9, -0.9, 1.0])],
            arr1(&[0.6, -0.2, 0.4, 0.8, -0.5]),
        )
    }

    fn assert_all_close(actual: &Array1<f64>, expected: &[f64]) {
        actual
            .iter()
            .zip(expected.iter())
            .for_each(|(a, b)| assert!((a - b).abs() < 0.005, "{actual} vs {expected:?}"));
    }

    #[test]
    fn test_gru_forward_without_prev_state() {
        let c = check();
        let stack = c.stack(c.params(), &c.inputs, None).unwrap();
        let layer = stack.layer(0).unwrap();
        let LayerUnit::Gru(cell) = layer.unit() else {
            panic!("expected a GRU unit");
        };
        assert_all_close(cell.reset_gate().values(), &[0.40, 0.25, 0.50, 0.70, 0.45]);
        assert_all_close(cell.partition_gate().values(), &[0.85, 0.43, 0.12, 0.52, 0.24]);
        assert_all_close(cell.candidate().values(), &[0.87, -0.54, 0.96, 0.94, -0.21]);
        assert_all_close(layer.output_values(), &[0.74, -0.23, 0.11, 0.49, -0.05]);
    }

    #[test]
    fn test_gru_gradients() {
        check().verify();
        check()
            .with_init_hidden(arr1(&[0.2, -0.4, 0.6, 0.1, -0.3]))
            .verify();
    }

    #[test]
    fn test_gru_gate_errors_are_recorded() {
        let c = check();
        let mut stack = c.stack(c.params(), &c.inputs, None).unwrap();
        stack
            .backward(c.output_errors.clone(), &crate::stacked::window::NoStates, false)
            .unwrap();
        let LayerUnit::Gru(cell) = stack.layer(0).unwrap().unit() else {
            panic!("expected a GRU unit");
        };
        // 没有上一状态时重置门不影响输出
        assert!(cell.reset_gate().errors().unwrap().iter().all(|&v| v == 0.0));
        assert!(cell.candidate().errors().unwrap().iter().any(|&v| v != 0.0));
    }
}
