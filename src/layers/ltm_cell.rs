use ndarray::{Array1, ArrayViewD, ArrayViewMutD};
use serde::{Deserialize, Serialize};

use crate::activations::functions::ActivationFunction;
use crate::arrays::augmented::AugmentedArray;
use crate::arrays::input::InputArray;
use crate::error::Result;
use crate::layers::layer::{LayerCell, LayerIo, LayerUnit};
use crate::layers::parameters::{ParamKind, ParametersUnit, ParamsGroup};
use crate::layers::window::LayersWindow;

/// LTM（长期记忆）参数：三个输入门与记忆单元的变换。
///
/// 门读取 `x + yPrev`，因此输入与输出尺寸相同。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LtmParameters {
    pub input_gate1: ParametersUnit,
    pub input_gate2: ParametersUnit,
    pub input_gate3: ParametersUnit,
    pub cell: ParametersUnit,
}

impl LtmParameters {
    pub fn new(size: usize) -> Self {
        let unit = || ParametersUnit::new(size, size, true, false);
        Self {
            input_gate1: unit(),
            input_gate2: unit(),
            input_gate3: unit(),
            cell: unit(),
        }
    }

    fn gates(&self) -> [&ParametersUnit; 3] {
        [&self.input_gate1, &self.input_gate2, &self.input_gate3]
    }
}

impl ParamsGroup for LtmParameters {
    fn input_sizes(&self) -> Vec<usize> {
        vec![self.input_gate1.weights.ncols()]
    }

    fn output_size(&self) -> usize {
        self.cell.weights.nrows()
    }

    fn params(&self) -> Vec<(ParamKind, ArrayViewD<'_, f64>)> {
        let mut out = Vec::new();
        for unit in self.gates() {
            unit.push_params(&mut out);
        }
        self.cell.push_params(&mut out);
        out
    }

    fn params_mut(&mut self) -> Vec<(ParamKind, ArrayViewMutD<'_, f64>)> {
        let mut out = Vec::new();
        self.input_gate1.push_params_mut(&mut out);
        self.input_gate2.push_params_mut(&mut out);
        self.input_gate3.push_params_mut(&mut out);
        self.cell.push_params_mut(&mut out);
        out
    }
}

/// LTM 单元
///
/// ```text
/// s = x + yPrev
/// l1 = σ(W1·s + b1)        l2、l3 同理
/// cell = f(Wc·(l1 ⊙ l2 + cellPrev) + bc)
/// y = cell ⊙ l3
/// ```
///
/// 只有上一状态也是 LTM 时才存在 `cellPrev`；初始隐藏状态只提供 `yPrev`。
#[derive(Clone, Debug)]
pub struct LtmCell {
    input_gate1: AugmentedArray<Array1<f64>>,
    input_gate2: AugmentedArray<Array1<f64>>,
    input_gate3: AugmentedArray<Array1<f64>>,
    /// 激活后的值即传给下一时间步的记忆单元。
    cell: AugmentedArray<Array1<f64>>,
    /// `l1 ⊙ l2 + cellPrev`
    cell_input: InputArray,
    gates_input: InputArray,
    has_prev: bool,
    cell_prev: Option<Array1<f64>>,
    cell_prev_errors: Option<Array1<f64>>,
}

impl LtmCell {
    pub fn new(size: usize, activation: Option<ActivationFunction>) -> Self {
        let gate =
            || AugmentedArray::zeros(size).with_activation(Some(ActivationFunction::Sigmoid));
        Self {
            input_gate1: gate(),
            input_gate2: gate(),
            input_gate3: gate(),
            cell: AugmentedArray::zeros(size).with_activation(activation),
            cell_input: InputArray::from(Array1::zeros(size)),
            gates_input: InputArray::from(Array1::zeros(size)),
            has_prev: false,
            cell_prev: None,
            cell_prev_errors: None,
        }
    }

    pub fn input_gate3(&self) -> &AugmentedArray<Array1<f64>> {
        &self.input_gate3
    }

    /// 记忆单元（已激活）。
    pub fn cell_values(&self) -> &Array1<f64> {
        self.cell.values()
    }

    pub fn cell_prev_errors(&self) -> Option<&Array1<f64>> {
        self.cell_prev_errors.as_ref()
    }
}

fn prev_cell(window: &dyn LayersWindow) -> Option<Array1<f64>> {
    match window.prev_state().map(|layer| layer.unit()) {
        Some(LayerUnit::Ltm(prev)) => Some(prev.cell_values().clone()),
        _ => None,
    }
}

fn next_cell_errors<'a>(window: &'a dyn LayersWindow) -> Option<&'a Array1<f64>> {
    match window.next_state().map(|layer| layer.unit()) {
        Some(LayerUnit::Ltm(next)) => next.cell_prev_errors(),
        _ => None,
    }
}

impl LayerCell for LtmCell {
    type Params = LtmParameters;

    fn forward(
        &mut self,
        params: &LtmParameters,
        io: &mut LayerIo<'_>,
        window: &dyn LayersWindow,
    ) -> Result<()> {
        let mut s = io.input().to_dense();
        let y_prev = window.prev_output();
        self.has_prev = y_prev.is_some();
        if let Some(y_prev) = y_prev {
            s += y_prev;
        }
        self.gates_input = InputArray::from(s);
        self.cell_prev = prev_cell(window);
        self.cell_prev_errors = None;

        let s = &self.gates_input;
        self.input_gate1
            .assign_activated(params.input_gate1.linear(s, None))?;
        self.input_gate2
            .assign_activated(params.input_gate2.linear(s, None))?;
        self.input_gate3
            .assign_activated(params.input_gate3.linear(s, None))?;

        let mut c = self.input_gate1.values() * self.input_gate2.values();
        if let Some(cell_prev) = &self.cell_prev {
            c += cell_prev;
        }
        self.cell_input = InputArray::from(c);
        self.cell
            .assign_activated(params.cell.linear(&self.cell_input, None))?;
        io.set_output(self.cell.values() * self.input_gate3.values())
    }

    fn backward(
        &mut self,
        params: &LtmParameters,
        io: &mut LayerIo<'_>,
        window: &dyn LayersWindow,
        propagate_to_input: bool,
    ) -> Result<LtmParameters> {
        let gy = io.output_gradient(window)?;

        let gl3 = &gy * self.cell.values() * self.input_gate3.activation_deriv();
        let mut gcell = &gy * self.input_gate3.values();
        if let Some(next) = next_cell_errors(window) {
            gcell += next;
        }
        let gcell_z = &gcell * &self.cell.activation_deriv();
        let gc = params.cell.input_errors(&gcell_z);
        let gl1 = &gc * self.input_gate2.values() * self.input_gate1.activation_deriv();
        let gl2 = &gc * self.input_gate1.values() * self.input_gate2.activation_deriv();
        self.cell_prev_errors = self.cell_prev.as_ref().map(|_| gc.clone());

        let gates = [&gl1, &gl2, &gl3];
        let gs = params
            .gates()
            .iter()
            .zip(gates)
            .fold(Array1::<f64>::zeros(gy.len()), |acc, (unit, g)| {
                acc + unit.input_errors(g)
            });
        if propagate_to_input {
            io.set_input_errors(0, gs.clone())?;
        }
        if self.has_prev {
            *io.prev_state_errors = Some(gs);
        }

        let s = &self.gates_input;
        let gradients = LtmParameters {
            input_gate1: params.input_gate1.gradients(&gl1, s, None),
            input_gate2: params.input_gate2.gradients(&gl2, s, None),
            input_gate3: params.input_gate3.gradients(&gl3, s, None),
            cell: params.cell.gradients(&gcell_z, &self.cell_input, None),
        };
        self.input_gate1.set_errors(gl1)?;
        self.input_gate2.set_errors(gl2)?;
        self.input_gate3.set_errors(gl3)?;
        self.cell.set_errors(gcell)?;
        Ok(gradients)
    }
}
