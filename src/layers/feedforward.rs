use ndarray::{Array1, ArrayViewD, ArrayViewMutD, Axis};
use serde::{Deserialize, Serialize};

use crate::arrays::augmented::AugmentedArray;
use crate::arrays::input::InputArray;
use crate::error::{Result, configuration};
use crate::layers::layer::{LayerCell, LayerIo, RelevanceCell};
use crate::layers::parameters::{ParamKind, ParametersUnit, ParamsGroup};
use crate::layers::window::LayersWindow;

/// epsilon 规则中的稳定项。
pub const RELEVANCE_EPSILON: f64 = 0.01;

/// 全连接层参数：`W`（输出×输入）与 `b`。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedforwardParameters {
    pub unit: ParametersUnit,
}

impl FeedforwardParameters {
    pub fn new(input_size: usize, output_size: usize) -> Self {
        Self {
            unit: ParametersUnit::new(input_size, output_size, true, false),
        }
    }
}

impl ParamsGroup for FeedforwardParameters {
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

/// `y = f(W·x + b)`
#[derive(Clone, Debug, Default)]
pub struct FeedforwardCell;

impl LayerCell for FeedforwardCell {
    type Params = FeedforwardParameters;

    fn forward(
        &mut self,
        params: &FeedforwardParameters,
        io: &mut LayerIo<'_>,
        _window: &dyn LayersWindow,
    ) -> Result<()> {
        let z = params.unit.linear(io.input(), None);
        io.set_output(z)
    }

    fn backward(
        &mut self,
        params: &FeedforwardParameters,
        io: &mut LayerIo<'_>,
        window: &dyn LayersWindow,
        propagate_to_input: bool,
    ) -> Result<FeedforwardParameters> {
        let gz = io.output_gradient(window)?;
        if propagate_to_input {
            io.set_input_errors(0, params.unit.input_errors(&gz))?;
        }
        Ok(FeedforwardParameters {
            unit: params.unit.gradients(&gz, io.input(), None),
        })
    }
}

impl RelevanceCell for FeedforwardCell {
    /// 贡献 `c_ji = w_ji·x_i + b_j/n`，其按行求和即激活前的输出。
    ///
    /// 贡献累加进 `contributions.unit.weights`，不覆盖已有的值。
    fn forward_with_contributions(
        &mut self,
        params: &FeedforwardParameters,
        io: &mut LayerIo<'_>,
        contributions: &mut FeedforwardParameters,
    ) -> Result<()> {
        let x = io.input().to_dense();
        let n = x.len().max(1) as f64;
        let mut c = &params.unit.weights * &x.view().insert_axis(Axis(0));
        if let Some(b) = &params.unit.biases {
            c += &(b / n).insert_axis(Axis(1));
        }
        let z = c.sum_axis(Axis(1));
        let target = &mut contributions.unit.weights;
        if target.shape() != c.shape() {
            return Err(configuration("contributions have a different shape"));
        }
        *target += &c;
        io.set_output(z)
    }

    /// epsilon 规则：`R_i = Σ_j c_ji / (z_j + ε·sign(z_j)) · R_j`。
    fn input_relevance(
        &self,
        _inputs: &[AugmentedArray<InputArray>],
        output: &AugmentedArray<Array1<f64>>,
        contributions: &FeedforwardParameters,
    ) -> Result<Vec<Array1<f64>>> {
        let relevance = output.relevance()?;
        let z = output.values_not_activated();
        let scale = Array1::from_shape_fn(z.len(), |j| {
            relevance[j] / (z[j] + RELEVANCE_EPSILON * sign(z[j]))
        });
        Ok(vec![contributions.unit.weights.t().dot(&scale)])
    }
}

fn sign(v: f64) -> f64 {
    if v >= 0.0 { 1.0 } else { -1.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activations::functions::ActivationFunction;
    use crate::error::LayerError;
    use crate::layers::interface::{ConnectionType, LayerInterface};
    use crate::layers::parameters::LayerParameters;
    use crate::testing::GradientCheck;
    use ndarray::{Array2, arr1, arr2};

    fn params() -> LayerParameters {
        let mut p = FeedforwardParameters::new(3, 2);
        p.unit.weights = arr2(&[[0.4, -0.6, 0.2], [-0.1, 0.3, 0.9]]);
        p.unit.biases = Some(arr1(&[0.05, 0.2]));
        LayerParameters::Feedforward(p)
    }

    #[test]
    fn test_feedforward_gradients() {
        for activation in [None, Some(ActivationFunction::Tanh), Some(ActivationFunction::Softmax)] {
            GradientCheck::new(
                vec![
                    LayerInterface::input(3, Default::default()),
                    LayerInterface::layer(2, ConnectionType::Feedforward, activation),
                ],
                params(),
                vec![arr1(&[0.5, -1.2, 0.8])],
                arr1(&[0.7, -0.4]),
            )
            .verify();
        }
    }

    #[test]
    fn test_relevance_is_conserved() {
        let check = GradientCheck::new(
            vec![
                LayerInterface::input(3, Default::default()),
                LayerInterface::layer(2, ConnectionType::Feedforward, Some(ActivationFunction::Tanh)),
            ],
            params(),
            vec![arr1(&[0.5, -1.2, 0.8])],
            arr1(&[0.0, 0.0]),
        );
        let mut stack = check.stack(check.params(), &check.inputs, None).unwrap();
        let layer = stack.layer_mut(0).unwrap();
        let mut contributions = layer.params().zeros_like();
        layer.forward_with_contributions(&mut contributions).unwrap();
        let plain = layer.output_values().clone();
        layer.set_output_relevance(arr1(&[1.0, 2.0])).unwrap();
        layer.set_input_relevance(&contributions).unwrap();
        let total = layer.input().relevance().unwrap().sum();
        // 偏置项也被分配到输入上，因此总量只因 ε 略有损失
        assert!((total - 3.0).abs() < 0.1);

        layer.add_input_relevance(&contributions).unwrap();
        assert!((layer.input().relevance().unwrap().sum() - 2.0 * total).abs() < 1e-12);

        layer.forward().unwrap();
        layer
            .output_values()
            .iter()
            .zip(plain.iter())
            .for_each(|(a, b)| assert!((a - b).abs() < 1e-12));
    }

    #[test]
    fn test_contributions_are_summed_across_forwards() {
        let check = GradientCheck::new(
            vec![
                LayerInterface::input(3, Default::default()),
                LayerInterface::layer(2, ConnectionType::Feedforward, None),
            ],
            params(),
            vec![arr1(&[0.5, -1.2, 0.8])],
            arr1(&[0.0, 0.0]),
        );
        let mut stack = check.stack(check.params(), &check.inputs, None).unwrap();
        let layer = stack.layer_mut(0).unwrap();
        let mut once = layer.params().zeros_like();
        layer.forward_with_contributions(&mut once).unwrap();
        let mut twice = once.clone();
        layer.forward_with_contributions(&mut twice).unwrap();

        let (LayerParameters::Feedforward(once), LayerParameters::Feedforward(twice)) =
            (&once, &twice)
        else {
            panic!("expected feedforward contributions");
        };
        assert_ne!(once.unit.weights, Array2::<f64>::zeros((2, 3)));
        assert_eq!(twice.unit.weights, &once.unit.weights * 2.0);
        // 行和仍是激活前的输出
        let z = once.unit.weights.sum_axis(Axis(1));
        z.iter()
            .zip(layer.output().values_not_activated().iter())
            .for_each(|(a, b)| assert!((a - b).abs() < 1e-12));
    }

    #[test]
    fn test_input_relevance_requires_output_relevance() {
        let check = GradientCheck::new(
            vec![
                LayerInterface::input(3, Default::default()),
                LayerInterface::layer(2, ConnectionType::Feedforward, None),
            ],
            params(),
            vec![arr1(&[0.5, -1.2, 0.8])],
            arr1(&[0.0, 0.0]),
        );
        let mut stack = check.stack(check.params(), &check.inputs, None).unwrap();
        let layer = stack.layer_mut(0).unwrap();
        let contributions = layer.params().zeros_like();
        assert!(matches!(
            layer.set_input_relevance(&contributions),
            Err(LayerError::NotAvailable(_))
        ));
    }
}
