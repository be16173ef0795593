use ndarray::{Array1, ArrayViewD, ArrayViewMutD};
use serde::{Deserialize, Serialize};

use crate::activations::functions::ActivationFunction;
use crate::arrays::augmented::AugmentedArray;
use crate::arrays::input::outer;
use crate::error::Result;
use crate::layers::layer::{LayerCell, LayerIo};
use crate::layers::parameters::{ParamKind, ParametersUnit, ParamsGroup};
use crate::layers::window::LayersWindow;

/// Delta-RNN 参数。
///
/// `W` 与 `Wr` 由候选值和分配门共用；`α`、`β1`、`β2` 是逐元素的混合系数。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeltaRnnParameters {
    pub feedforward: ParametersUnit,
    pub candidate_biases: Array1<f64>,
    pub partition_biases: Array1<f64>,
    pub alpha: Array1<f64>,
    pub beta1: Array1<f64>,
    pub beta2: Array1<f64>,
}

impl DeltaRnnParameters {
    pub fn new(input_size: usize, output_size: usize) -> Self {
        Self {
            feedforward: ParametersUnit::new(input_size, output_size, false, true),
            candidate_biases: Array1::zeros(output_size),
            partition_biases: Array1::zeros(output_size),
            alpha: Array1::zeros(output_size),
            beta1: Array1::zeros(output_size),
            beta2: Array1::zeros(output_size),
        }
    }
}

impl ParamsGroup for DeltaRnnParameters {
    fn input_sizes(&self) -> Vec<usize> {
        vec![self.feedforward.weights.ncols()]
    }

    fn output_size(&self) -> usize {
        self.feedforward.weights.nrows()
    }

    fn params(&self) -> Vec<(ParamKind, ArrayViewD<'_, f64>)> {
        let mut out = Vec::new();
        self.feedforward.push_params(&mut out);
        out.push((ParamKind::Biases, self.candidate_biases.view().into_dyn()));
        out.push((ParamKind::Biases, self.partition_biases.view().into_dyn()));
        out.push((ParamKind::Weights, self.alpha.view().into_dyn()));
        out.push((ParamKind::Weights, self.beta1.view().into_dyn()));
        out.push((ParamKind::Weights, self.beta2.view().into_dyn()));
        out
    }

    fn params_mut(&mut self) -> Vec<(ParamKind, ArrayViewMutD<'_, f64>)> {
        let mut out = Vec::new();
        self.feedforward.push_params_mut(&mut out);
        out.push((ParamKind::Biases, self.candidate_biases.view_mut().into_dyn()));
        out.push((ParamKind::Biases, self.partition_biases.view_mut().into_dyn()));
        out.push((ParamKind::Weights, self.alpha.view_mut().into_dyn()));
        out.push((ParamKind::Weights, self.beta1.view_mut().into_dyn()));
        out.push((ParamKind::Weights, self.beta2.view_mut().into_dyn()));
        out
    }
}

/// Delta-RNN 单元
///
/// ```text
/// d1 = α ⊙ (W·x) ⊙ (Wr·yPrev)
/// d2 = β1 ⊙ (Wr·yPrev) + β2 ⊙ (W·x)
/// c = f(d1 + d2 + bc)
/// p = σ(W·x + bp)
/// y = f((1 − p) ⊙ c + p ⊙ yPrev)
/// ```
///
/// 没有上一状态时 `d1` 与 `Wr·yPrev` 项都不存在。
#[derive(Clone, Debug)]
pub struct DeltaRnnCell {
    wx: Array1<f64>,
    /// `Wr·yPrev`
    wr: Option<Array1<f64>>,
    candidate: AugmentedArray<Array1<f64>>,
    partition: AugmentedArray<Array1<f64>>,
    y_prev: Option<Array1<f64>>,
}

impl DeltaRnnCell {
    pub fn new(size: usize, activation: Option<ActivationFunction>) -> Self {
        Self {
            wx: Array1::zeros(size),
            wr: None,
            candidate: AugmentedArray::zeros(size).with_activation(activation),
            partition: AugmentedArray::zeros(size)
                .with_activation(Some(ActivationFunction::Sigmoid)),
            y_prev: None,
        }
    }

    pub fn candidate(&self) -> &AugmentedArray<Array1<f64>> {
        &self.candidate
    }

    pub fn partition(&self) -> &AugmentedArray<Array1<f64>> {
        &self.partition
    }
}

impl LayerCell for DeltaRnnCell {
    type Params = DeltaRnnParameters;

    fn forward(
        &mut self,
        params: &DeltaRnnParameters,
        io: &mut LayerIo<'_>,
        window: &dyn LayersWindow,
    ) -> Result<()> {
        self.y_prev = window.prev_output().cloned();
        self.wx = params.feedforward.linear(io.input(), None);
        self.wr = match (&params.feedforward.recurrent_weights, &self.y_prev) {
            (Some(wr), Some(y_prev)) => Some(wr.dot(y_prev)),
            _ => None,
        };

        let mut c = &params.beta2 * &self.wx + &params.candidate_biases;
        if let Some(wr) = &self.wr {
            c += &(&params.alpha * &self.wx * wr);
            c += &(&params.beta1 * wr);
        }
        self.candidate.assign_activated(c)?;
        self.partition
            .assign_activated(&self.wx + &params.partition_biases)?;

        let p = self.partition.values();
        let mut z = p.mapv(|v| 1.0 - v) * self.candidate.values();
        if let Some(y_prev) = &self.y_prev {
            z += &(p * y_prev);
        }
        io.set_output(z)
    }

    fn backward(
        &mut self,
        params: &DeltaRnnParameters,
        io: &mut LayerIo<'_>,
        window: &dyn LayersWindow,
        propagate_to_input: bool,
    ) -> Result<DeltaRnnParameters> {
        let gz = io.output_gradient(window)?;
        let p = self.partition.values();

        let gc = &gz * &p.mapv(|v| 1.0 - v) * self.candidate.activation_deriv();
        let mut target = self.candidate.values().mapv(|v| -v);
        if let Some(y_prev) = &self.y_prev {
            target += y_prev;
        }
        let gp = target * &gz * self.partition.activation_deriv();

        let zeros = || Array1::<f64>::zeros(gz.len());
        let mut g_wx = &gc * &params.beta2 + &gp;
        let (alpha, beta1, g_wr) = match &self.wr {
            Some(wr) => {
                g_wx += &(&gc * &params.alpha * wr);
                let g_wr = &gc * &(&params.alpha * &self.wx + &params.beta1);
                (&gc * &self.wx * wr, &gc * wr, Some(g_wr))
            }
            None => (zeros(), zeros(), None),
        };

        if propagate_to_input {
            io.set_input_errors(0, params.feedforward.input_errors(&g_wx))?;
        }
        let mut feedforward = params.feedforward.gradients(&g_wx, io.input(), None);
        if let (Some(g_wr), Some(y_prev)) = (&g_wr, &self.y_prev) {
            let mut g_prev = &gz * p;
            if let Some(recurrent) = params.feedforward.recurrent_errors(g_wr) {
                g_prev += &recurrent;
            }
            *io.prev_state_errors = Some(g_prev);
            feedforward.recurrent_weights = Some(outer(g_wr.view(), y_prev.view()));
        }

        let gradients = DeltaRnnParameters {
            feedforward,
            candidate_biases: gc.clone(),
            partition_biases: gp.clone(),
            alpha,
            beta1,
            beta2: &gc * &self.wx,
        };
        self.candidate.set_errors(gc)?;
        self.partition.set_errors(gp)?;
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
    use ndarray::{Array2, arr1};

    fn params() -> DeltaRnnParameters {
        let mut p = DeltaRnnParameters::new(3, 2);
        p.feedforward.weights =
            Array2::from_shape_fn((2, 3), |(i, j)| ((i * 3 + j) as f64 + 0.4).sin() * 0.7);
        p.feedforward.recurrent_weights = Some(Array2::from_shape_fn((2, 2), |(i, j)| {
            ((i * 2 + j) as f64 - 1.3).cos() * 0.6
        }));
        p.candidate_biases = arr1(&[0.1, -0.2]);
        p.partition_biases = arr1(&[-0.3, 0.25]);
        p.alpha = arr1(&[0.9, -0.5]);
        p.beta1 = arr1(&[0.4, 0.7]);
        p.beta2 = arr1(&[-0.6, 0.8]);
        p
    }

    fn check(activation: Option<ActivationFunction>) -> GradientCheck {
        GradientCheck::new(
            vec![
                LayerInterface::input(3, Default::default()),
                LayerInterface::layer(2, ConnectionType::DeltaRnn, activation),
            ],
            LayerParameters::DeltaRnn(params()),
            vec![arr1(&[0.6, -0.9, 0.35])],
            arr1(&[-0.5, 0.8]),
        )
    }

    #[test]
    fn test_deltarnn_forward_without_prev_state() {
        let c = check(Some(ActivationFunction::Tanh));
        let stack = c.stack(c.params(), &c.inputs, None).unwrap();
        let layer = stack.layer(0).unwrap();
        let LayerUnit::DeltaRnn(cell) = layer.unit() else {
            panic!("expected a Delta-RNN unit");
        };
        let p = params();
        let wx = p.feedforward.weights.dot(&c.inputs[0]);
        let candidate = (&p.beta2 * &wx + &p.candidate_biases).mapv(f64::tanh);
        let expected = (cell.partition().values().mapv(|v| 1.0 - v) * &candidate).mapv(f64::tanh);
        layer
            .output_values()
            .iter()
            .zip(expected.iter())
            .for_each(|(a, b)| assert!((a - b).abs() < 1e-12));
    }

    #[test]
    fn test_deltarnn_gradients() {
        for activation in [None, Some(ActivationFunction::Tanh)] {
            check(activation).verify();
            check(activation)
                .with_init_hidden(arr1(&[0.45, -0.3]))
                .verify();
        }
    }

    #[test]
    fn test_deltarnn_mixing_terms_need_prev_state() {
        let c = check(Some(ActivationFunction::Tanh));
        let mut stack = c.stack(c.params(), &c.inputs, None).unwrap();
        let gradients = stack
            .backward(c.output_errors.clone(), &crate::stacked::window::NoStates, true)
            .unwrap();
        let LayerParameters::DeltaRnn(g) = &gradients[0] else {
            panic!("expected Delta-RNN gradients");
        };
        assert!(g.alpha.iter().chain(g.beta1.iter()).all(|&v| v == 0.0));
        assert!(g.beta2.iter().any(|&v| v != 0.0));
        assert!(stack.layer(0).unwrap().prev_state_errors().is_none());
    }
}
