use ndarray::{Array1, ArrayViewD, ArrayViewMutD};
use serde::{Deserialize, Serialize};

use crate::activations::functions::ActivationFunction;
use crate::arrays::augmented::AugmentedArray;
use crate::error::Result;
use crate::layers::layer::{LayerCell, LayerIo, LayerUnit};
use crate::layers::parameters::{ParamKind, ParametersUnit, ParamsGroup};
use crate::layers::window::LayersWindow;

/// LSTM 参数：输入门、输出门、遗忘门与候选值。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LstmParameters {
    pub input_gate: ParametersUnit,
    pub output_gate: ParametersUnit,
    pub forget_gate: ParametersUnit,
    pub candidate: ParametersUnit,
}

impl LstmParameters {
    pub fn new(input_size: usize, output_size: usize) -> Self {
        let unit = || ParametersUnit::new(input_size, output_size, true, true);
        Self {
            input_gate: unit(),
            output_gate: unit(),
            forget_gate: unit(),
            candidate: unit(),
        }
    }

    fn units(&self) -> [&ParametersUnit; 4] {
        [
            &self.input_gate,
            &self.output_gate,
            &self.forget_gate,
            &self.candidate,
        ]
    }
}

impl ParamsGroup for LstmParameters {
    fn input_sizes(&self) -> Vec<usize> {
        vec![self.candidate.weights.ncols()]
    }

    fn output_size(&self) -> usize {
        self.candidate.weights.nrows()
    }

    fn params(&self) -> Vec<(ParamKind, ArrayViewD<'_, f64>)> {
        let mut out = Vec::new();
        for unit in self.units() {
            unit.push_params(&mut out);
        }
        out
    }

    fn params_mut(&mut self) -> Vec<(ParamKind, ArrayViewMutD<'_, f64>)> {
        let mut out = Vec::new();
        self.input_gate.push_params_mut(&mut out);
        self.output_gate.push_params_mut(&mut out);
        self.forget_gate.push_params_mut(&mut out);
        self.candidate.push_params_mut(&mut out);
        out
    }
}

/// LSTM 单元
///
/// ```text
/// i = σ(Wi·x + bi + Wir·yPrev)        o、f 同理
/// c = f(Wc·x + bc + Wcr·yPrev)
/// cell = i ⊙ c + f ⊙ cellPrev
/// y = o ⊙ f(cell)
/// ```
///
/// 只有上一状态也是 LSTM 时才存在 `cellPrev`；初始隐藏状态只提供 `yPrev`。
#[derive(Clone, Debug)]
pub struct LstmCell {
    input_gate: AugmentedArray<Array1<f64>>,
    output_gate: AugmentedArray<Array1<f64>>,
    forget_gate: AugmentedArray<Array1<f64>>,
    candidate: AugmentedArray<Array1<f64>>,
    /// 激活后的值为 `f(cell)`，激活前的值为记忆单元本身。
    cell: AugmentedArray<Array1<f64>>,
    y_prev: Option<Array1<f64>>,
    cell_prev: Option<Array1<f64>>,
    /// 反向传播时传给上一状态记忆单元的误差。
    cell_prev_errors: Option<Array1<f64>>,
}

impl LstmCell {
    pub fn new(size: usize, activation: Option<ActivationFunction>) -> Self {
        let gate =
            || AugmentedArray::zeros(size).with_activation(Some(ActivationFunction::Sigmoid));
        Self {
            input_gate: gate(),
            output_gate: gate(),
            forget_gate: gate(),
            candidate: AugmentedArray::zeros(size).with_activation(activation),
            cell: AugmentedArray::zeros(size).with_activation(activation),
            y_prev: None,
            cell_prev: None,
            cell_prev_errors: None,
        }
    }

    pub fn input_gate(&self) -> &AugmentedArray<Array1<f64>> {
        &self.input_gate
    }

    pub fn output_gate(&self) -> &AugmentedArray<Array1<f64>> {
        &self.output_gate
    }

    pub fn forget_gate(&self) -> &AugmentedArray<Array1<f64>> {
        &self.forget_gate
    }

    pub fn candidate(&self) -> &AugmentedArray<Array1<f64>> {
        &self.candidate
    }

    /// 记忆单元（未激活）。
    pub fn cell_values(&self) -> &Array1<f64> {
        self.cell.values_not_activated()
    }

    pub fn cell_prev_errors(&self) -> Option<&Array1<f64>> {
        self.cell_prev_errors.as_ref()
    }
}

fn prev_cell(window: &dyn LayersWindow) -> Option<Array1<f64>> {
    match window.prev_state().map(|layer| layer.unit()) {
        Some(LayerUnit::Lstm(prev)) => Some(prev.cell_values().clone()),
        _ => None,
    }
}

fn next_cell_errors<'a>(window: &'a dyn LayersWindow) -> Option<&'a Array1<f64>> {
    match window.next_state().map(|layer| layer.unit()) {
        Some(LayerUnit::Lstm(next)) => next.cell_prev_errors(),
        _ => None,
    }
}

impl LayerCell for LstmCell {
    type Params = LstmParameters;

    fn forward(
        &mut self,
        params: &LstmParameters,
        io: &mut LayerIo<'_>,
        window: &dyn LayersWindow,
    ) -> Result<()> {
        let x = io.input();
        self.y_prev = window.prev_output().cloned();
        self.cell_prev = prev_cell(window);
        self.cell_prev_errors = None;
        let y_prev = self.y_prev.as_ref();

        self.input_gate
            .assign_activated(params.input_gate.linear(x, y_prev))?;
        self.output_gate
            .assign_activated(params.output_gate.linear(x, y_prev))?;
        self.forget_gate
            .assign_activated(params.forget_gate.linear(x, y_prev))?;
        self.candidate
            .assign_activated(params.candidate.linear(x, y_prev))?;

        let mut cell = self.input_gate.values() * self.candidate.values();
        if let Some(cell_prev) = &self.cell_prev {
            cell += &(self.forget_gate.values() * cell_prev);
        }
        self.cell.assign_activated(cell)?;
        io.set_output(self.output_gate.values() * self.cell.values())
    }

    fn backward(
        &mut self,
        params: &LstmParameters,
        io: &mut LayerIo<'_>,
        window: &dyn LayersWindow,
        propagate_to_input: bool,
    ) -> Result<LstmParameters> {
        let gy = io.output_gradient(window)?;
        let o = self.output_gate.values();

        let go = &gy * self.cell.values() * self.output_gate.activation_deriv();
        let mut gcell = &gy * o * self.cell.activation_deriv();
        if let Some(next) = next_cell_errors(window) {
            gcell += next;
        }
        let gi = &gcell * self.candidate.values() * self.input_gate.activation_deriv();
        let gc = &gcell * self.input_gate.values() * self.candidate.activation_deriv();
        let gf = match &self.cell_prev {
            Some(cell_prev) => &gcell * cell_prev * self.forget_gate.activation_deriv(),
            None => Array1::zeros(gcell.len()),
        };
        self.cell_prev_errors = self
            .cell_prev
            .as_ref()
            .map(|_| &gcell * self.forget_gate.values());

        let gates = [&gi, &go, &gf, &gc];
        if propagate_to_input {
            let gx = params
                .units()
                .iter()
                .zip(gates)
                .fold(Array1::<f64>::zeros(io.input().size()), |acc, (unit, g)| {
                    acc + unit.input_errors(g)
                });
            io.set_input_errors(0, gx)?;
        }
        if self.y_prev.is_some() {
            let g_prev = params
                .units()
                .iter()
                .zip(gates)
                .filter_map(|(unit, g)| unit.recurrent_errors(g))
                .fold(Array1::<f64>::zeros(gy.len()), |acc, e| acc + e);
            *io.prev_state_errors = Some(g_prev);
        }

        let x = io.input();
        let y_prev = self.y_prev.as_ref();
        let gradients = LstmParameters {
            input_gate: params.input_gate.gradients(&gi, x, y_prev),
            output_gate: params.output_gate.gradients(&go, x, y_prev),
            forget_gate: params.forget_gate.gradients(&gf, x, y_prev),
            candidate: params.candidate.gradients(&gc, x, y_prev),
        };
        self.input_gate.set_errors(gi)?;
        self.output_gate.set_errors(go)?;
        self.forget_gate.set_errors(gf)?;
        self.candidate.set_errors(gc)?;
        self.cell.set_errors(gcell)?;
        Ok(gradients)
    }
}
