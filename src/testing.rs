//! 有限差分梯度检查，供各层变体的单元测试使用。

use ndarray::Array1;

use crate::arrays::input::InputArray;
use crate::error::Result;
use crate::layers::interface::LayerInterface;
use crate::layers::parameters::LayerParameters;
use crate::stacked::parameters::StackedLayersParameters;
use crate::stacked::recurrent::RecurrentStackedLayers;
use crate::stacked::window::NoStates;

const STEP: f64 = 1e-5;
const TOLERANCE: f64 = 1e-4;

/// 单层网络的一次前向/反向，损失取 `Σ e·y`（`e` 为固定的输出误差）。
///
/// 设置了初始隐藏状态时，循环项参与计算，`∂L/∂yPrev` 也一并检查。
pub(crate) struct GradientCheck {
    pub configuration: Vec<LayerInterface>,
    pub params: LayerParameters,
    pub inputs: Vec<Array1<f64>>,
    pub init_hidden: Option<Array1<f64>>,
    pub output_errors: Array1<f64>,
}

impl GradientCheck {
    pub fn new(
        configuration: Vec<LayerInterface>,
        params: LayerParameters,
        inputs: Vec<Array1<f64>>,
        output_errors: Array1<f64>,
    ) -> Self {
        Self {
            configuration,
            params,
            inputs,
            init_hidden: None,
            output_errors,
        }
    }

    pub fn with_init_hidden(mut self, init_hidden: Array1<f64>) -> Self {
        self.init_hidden = Some(init_hidden);
        self
    }

    pub fn params(&self) -> &LayerParameters {
        &self.params
    }

    /// 构建单层循环栈并完成一次前向。
    pub fn stack(
        &self,
        params: &LayerParameters,
        inputs: &[Array1<f64>],
        init_hidden: Option<&Array1<f64>>,
    ) -> Result<RecurrentStackedLayers> {
        let stack_params =
            StackedLayersParameters::from_params(self.configuration.clone(), vec![params.clone()])?;
        let mut stack = RecurrentStackedLayers::new(&stack_params, 0.0)?;
        stack.set_init_hidden(vec![init_hidden.cloned()])?;
        stack.set_inputs(inputs.iter().cloned().map(InputArray::from).collect())?;
        stack.forward(&NoStates)?;
        Ok(stack)
    }

    fn loss(
        &self,
        params: &LayerParameters,
        inputs: &[Array1<f64>],
        init_hidden: Option<&Array1<f64>>,
    ) -> f64 {
        let stack = self.stack(params, inputs, init_hidden).unwrap();
        stack.output_values().dot(&self.output_errors)
    }

    pub fn verify(&self) {
        let mut stack = self
            .stack(&self.params, &self.inputs, self.init_hidden.as_ref())
            .unwrap();
        let gradients = stack
            .backward(self.output_errors.clone(), &NoStates, true)
            .unwrap();

        for (a, analytic) in gradients[0].arrays().iter().enumerate() {
            for (k, value) in analytic.iter().enumerate() {
                let numeric = central_difference(|h| {
                    let mut params = self.params.clone();
                    {
                        let mut arrays = params.arrays_mut();
                        if let Some(v) = arrays[a].iter_mut().nth(k) {
                            *v += h;
                        }
                    }
                    self.loss(&params, &self.inputs, self.init_hidden.as_ref())
                });
                assert_close(*value, numeric, &format!("parameter array {a}, element {k}"));
            }
        }

        let layer = stack.layer(0).unwrap();
        for (i, x) in self.inputs.iter().enumerate() {
            let errors = layer.inputs()[i].errors().unwrap();
            for k in 0..x.len() {
                let numeric = central_difference(|h| {
                    let mut inputs = self.inputs.clone();
                    inputs[i][k] += h;
                    self.loss(&self.params, &inputs, self.init_hidden.as_ref())
                });
                assert_close(errors[k], numeric, &format!("input {i}, element {k}"));
            }
        }

        if let Some(init_hidden) = &self.init_hidden {
            let errors = stack.init_hidden_errors_of(0).unwrap();
            for k in 0..init_hidden.len() {
                let numeric = central_difference(|h| {
                    let mut hidden = init_hidden.clone();
                    hidden[k] += h;
                    self.loss(&self.params, &self.inputs, Some(&hidden))
                });
                assert_close(errors[k], numeric, &format!("initial hidden, element {k}"));
            }
        }
    }
}

fn central_difference(f: impl Fn(f64) -> f64) -> f64 {
    (f(STEP) - f(-STEP)) / (2.0 * STEP)
}

fn assert_close(analytic: f64, numeric: f64, what: &str) {
    assert!(
        (analytic - numeric).abs() < TOLERANCE,
        "{what}: analytic {analytic} vs numeric {numeric}"
    );
}
