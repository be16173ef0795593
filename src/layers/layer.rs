use std::sync::Arc;

use ndarray::Array1;
use tracing::trace;

use crate::activations::functions::ActivationFunction;
use crate::arrays::augmented::AugmentedArray;
use crate::arrays::input::{InputArray, InputType};
use crate::error::{LayerError, Result, argument, configuration, ensure_size};
use crate::layers::batch_norm::BatchNormCell;
use crate::layers::biaffine::BiaffineCell;
use crate::layers::cfn_cell::CfnCell;
use crate::layers::deltarnn_cell::DeltaRnnCell;
use crate::layers::feedforward::FeedforwardCell;
use crate::layers::gru_cell::GruCell;
use crate::layers::highway::HighwayCell;
use crate::layers::indrnn_cell::IndRnnCell;
use crate::layers::interface::ConnectionType;
use crate::layers::lstm_cell::LstmCell;
use crate::layers::ltm_cell::LtmCell;
use crate::layers::merge::MergeCell;
use crate::layers::norm::NormCell;
use crate::layers::parameters::{LayerParameters, ParamsErrors};
use crate::layers::ran_cell::RanCell;
use crate::layers::rnn_cell::SimpleRecurrentCell;
use crate::layers::squared_distance::SquaredDistanceCell;
use crate::layers::tpr_cell::TprCell;
use crate::layers::window::{LayersWindow, NoWindow};

/// 层变体计算时可访问的输入输出槽位。
pub struct LayerIo<'a> {
    pub inputs: &'a mut [AugmentedArray<InputArray>],
    pub output: &'a mut AugmentedArray<Array1<f64>>,
    /// 循环变体在反向传播中写入的 `∂L/∂yPrev`。
    pub prev_state_errors: &'a mut Option<Array1<f64>>,
}

impl LayerIo<'_> {
    /// 单输入层的输入值。
    pub fn input(&self) -> &InputArray {
        self.inputs[0].values()
    }

    pub fn set_input_errors(&mut self, index: usize, errors: Array1<f64>) -> Result<()> {
        self.inputs[index].set_errors(errors)
    }

    /// 写入激活前的输出并应用输出激活函数。
    pub fn set_output(&mut self, values: Array1<f64>) -> Result<()> {
        self.output.assign_activated(values)
    }

    /// 输出误差：先累加后一时间步传回的上一状态误差，再乘以输出激活函数的导数。
    pub fn output_gradient(&mut self, window: &dyn LayersWindow) -> Result<Array1<f64>> {
        if let Some(next) = window.next_state() {
            let recurrent = next
                .prev_state_errors()
                .ok_or(LayerError::NotAvailable("errors of the next state"))?;
            self.output.add_errors(recurrent)?;
        }
        self.output.apply_activation_deriv_to_errors()?;
        Ok(self.output.errors()?.clone())
    }
}

/// 每种层变体实现的前向/反向算法。
///
/// 通用的生命周期（dropout、误差清理、相关度分派）由 [`Layer`] 实现一次。
pub trait LayerCell {
    type Params;

    fn forward(
        &mut self,
        params: &Self::Params,
        io: &mut LayerIo<'_>,
        window: &dyn LayersWindow,
    ) -> Result<()>;

    /// 返回参数梯度；`propagate_to_input` 为真时同时写入输入误差。
    fn backward(
        &mut self,
        params: &Self::Params,
        io: &mut LayerIo<'_>,
        window: &dyn LayersWindow,
        propagate_to_input: bool,
    ) -> Result<Self::Params>;
}

/// 可选能力：相关度（归因）传播。
pub trait RelevanceCell: LayerCell {
    /// 前向计算，同时记录每个权重对输出的贡献。
    fn forward_with_contributions(
        &mut self,
        params: &Self::Params,
        io: &mut LayerIo<'_>,
        contributions: &mut Self::Params,
    ) -> Result<()>;

    /// 依据贡献将输出相关度分配到每个输入上。
    fn input_relevance(
        &self,
        inputs: &[AugmentedArray<InputArray>],
        output: &AugmentedArray<Array1<f64>>,
        contributions: &Self::Params,
    ) -> Result<Vec<Array1<f64>>>;
}

/// 层变体（闭合集合），与 [`LayerParameters`] 一一对应。
#[derive(Clone, Debug)]
pub enum LayerUnit {
    Feedforward(FeedforwardCell),
    Highway(HighwayCell),
    Norm(NormCell),
    BatchNorm(BatchNormCell),
    Merge(MergeCell),
    Biaffine(BiaffineCell),
    SquaredDistance(SquaredDistanceCell),
    SimpleRecurrent(SimpleRecurrentCell),
    Gru(GruCell),
    Lstm(LstmCell),
    Cfn(CfnCell),
    Ran(RanCell),
    IndRnn(IndRnnCell),
    Ltm(LtmCell),
    DeltaRnn(DeltaRnnCell),
    Tpr(TprCell),
}

impl LayerUnit {
    pub fn new(
        connection_type: ConnectionType,
        output_size: usize,
        activation: Option<ActivationFunction>,
    ) -> Self {
        match connection_type {
            ConnectionType::Feedforward => LayerUnit::Feedforward(FeedforwardCell),
            ConnectionType::Highway => LayerUnit::Highway(HighwayCell::new(output_size, activation)),
            ConnectionType::Norm => LayerUnit::Norm(NormCell::default()),
            ConnectionType::BatchNorm => LayerUnit::BatchNorm(BatchNormCell::default()),
            ConnectionType::Concat
            | ConnectionType::Sum
            | ConnectionType::Sub
            | ConnectionType::Avg
            | ConnectionType::Product => LayerUnit::Merge(MergeCell::new(connection_type)),
            ConnectionType::Biaffine => LayerUnit::Biaffine(BiaffineCell),
            ConnectionType::SquaredDistance => {
                LayerUnit::SquaredDistance(SquaredDistanceCell::default())
            }
            ConnectionType::SimpleRecurrent => LayerUnit::SimpleRecurrent(SimpleRecurrentCell::default()),
            ConnectionType::Gru => LayerUnit::Gru(GruCell::new(output_size, activation)),
            ConnectionType::Lstm => LayerUnit::Lstm(LstmCell::new(output_size, activation)),
            ConnectionType::Cfn => LayerUnit::Cfn(CfnCell::new(output_size, activation)),
            ConnectionType::Ran => LayerUnit::Ran(RanCell::new(output_size)),
            ConnectionType::IndRnn => LayerUnit::IndRnn(IndRnnCell::default()),
            ConnectionType::Ltm => LayerUnit::Ltm(LtmCell::new(output_size, activation)),
            ConnectionType::DeltaRnn => {
                LayerUnit::DeltaRnn(DeltaRnnCell::new(output_size, activation))
            }
            ConnectionType::Tpr => LayerUnit::Tpr(TprCell::default()),
        }
    }

    /// 层激活函数是否直接作用于输出（门控变体把它用在内部门上）。
    pub fn activates_output(connection_type: ConnectionType) -> bool {
        !matches!(
            connection_type,
            ConnectionType::Highway
                | ConnectionType::Gru
                | ConnectionType::Lstm
                | ConnectionType::Cfn
                | ConnectionType::Ltm
        )
    }

    pub fn supports_relevance(&self) -> bool {
        match self {
            LayerUnit::Feedforward(_) => true,
            LayerUnit::Merge(cell) => cell.supports_relevance(),
            _ => false,
        }
    }
}

macro_rules! dispatch {
    ($unit:expr, $params:expr, |$cell:ident, $p:ident| $body:expr) => {
        match ($unit, $params) {
            (LayerUnit::Feedforward($cell), LayerParameters::Feedforward($p)) => $body,
            (LayerUnit::Highway($cell), LayerParameters::Highway($p)) => $body,
            (LayerUnit::Norm($cell), LayerParameters::Norm($p)) => $body,
            (LayerUnit::BatchNorm($cell), LayerParameters::BatchNorm($p)) => $body,
            (LayerUnit::Merge($cell), LayerParameters::Merge($p)) => $body,
            (LayerUnit::Biaffine($cell), LayerParameters::Biaffine($p)) => $body,
            (LayerUnit::SquaredDistance($cell), LayerParameters::SquaredDistance($p)) => $body,
            (LayerUnit::SimpleRecurrent($cell), LayerParameters::SimpleRecurrent($p)) => $body,
            (LayerUnit::Gru($cell), LayerParameters::Gru($p)) => $body,
            (LayerUnit::Lstm($cell), LayerParameters::Lstm($p)) => $body,
            (LayerUnit::Cfn($cell), LayerParameters::Cfn($p)) => $body,
            (LayerUnit::Ran($cell), LayerParameters::Ran($p)) => $body,
            (LayerUnit::IndRnn($cell), LayerParameters::IndRnn($p)) => $body,
            (LayerUnit::Ltm($cell), LayerParameters::Ltm($p)) => $body,
            (LayerUnit::DeltaRnn($cell), LayerParameters::DeltaRnn($p)) => $body,
            (LayerUnit::Tpr($cell), LayerParameters::Tpr($p)) => $body,
            _ => Err(configuration(
                "layer parameters do not match the layer connection type",
            )),
        }
    };
}

/// 一次前向中某个输入上的 dropout 状态。
#[derive(Clone, Debug, Default)]
struct DropoutState {
    mask: Option<Array1<f64>>,
    /// 施加掩码前的输入，首次使用时分配，之后复用。
    cache: Option<InputArray>,
    applied: bool,
}

impl DropoutState {
    fn store(&mut self, values: &InputArray) {
        match (&mut self.cache, values) {
            (Some(InputArray::Dense(cache)), InputArray::Dense(v)) if cache.len() == v.len() => {
                cache.assign(v)
            }
            (cache, values) => *cache = Some(values.clone()),
        }
    }

    fn restore(&mut self, values: &mut InputArray) {
        match (&self.cache, values) {
            (Some(InputArray::Dense(cache)), InputArray::Dense(v)) => v.assign(cache),
            (Some(cache), values) => *values = cache.clone(),
            (None, _) => {}
        }
        self.applied = false;
    }
}

/// 通用层：输入槽位、稠密输出、共享参数与一个层变体。
///
/// 参数以 `Arc` 共享：同一位置在所有时间步上的层读取同一份参数。
#[derive(Clone, Debug)]
pub struct Layer {
    connection_type: ConnectionType,
    input_type: InputType,
    inputs: Vec<AugmentedArray<InputArray>>,
    output: AugmentedArray<Array1<f64>>,
    params: Arc<LayerParameters>,
    activation: Option<ActivationFunction>,
    dropout: f64,
    dropout_states: Vec<DropoutState>,
    unit: LayerUnit,
    prev_state_errors: Option<Array1<f64>>,
}

impl Layer {
    /// 由 [`LayerFactory`](crate::layers::factory::LayerFactory) 在校验之后调用。
    pub(crate) fn new(
        connection_type: ConnectionType,
        input_type: InputType,
        params: Arc<LayerParameters>,
        activation: Option<ActivationFunction>,
        dropout: f64,
    ) -> Self {
        let output_size = params.output_size();
        let inputs: Vec<_> = params
            .input_sizes()
            .into_iter()
            .map(|size| AugmentedArray::new(InputArray::zeros(input_type, size)))
            .collect();
        let output_activation = activation.filter(|_| LayerUnit::activates_output(connection_type));
        Self {
            connection_type,
            input_type,
            dropout_states: vec![DropoutState::default(); inputs.len()],
            inputs,
            output: AugmentedArray::zeros(output_size).with_activation(output_activation),
            params,
            activation,
            dropout,
            unit: LayerUnit::new(connection_type, output_size, activation),
            prev_state_errors: None,
        }
    }

    pub fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    pub fn input_type(&self) -> InputType {
        self.input_type
    }

    pub fn dense_input(&self) -> bool {
        self.input_type == InputType::Dense
    }

    pub fn sparse_input(&self) -> bool {
        !self.dense_input()
    }

    pub fn activation(&self) -> Option<ActivationFunction> {
        self.activation
    }

    pub fn dropout(&self) -> f64 {
        self.dropout
    }

    pub fn params(&self) -> &Arc<LayerParameters> {
        &self.params
    }

    /// 替换共享参数（例如优化器更新之后）。形状必须与原参数一致。
    pub fn set_params(&mut self, params: Arc<LayerParameters>) -> Result<()> {
        if std::mem::discriminant(&*params) != std::mem::discriminant(&*self.params)
            || params.input_sizes() != self.params.input_sizes()
            || params.output_size() != self.params.output_size()
        {
            return Err(configuration(
                "replacement parameters have a different shape",
            ));
        }
        self.params = params;
        Ok(())
    }

    pub fn unit(&self) -> &LayerUnit {
        &self.unit
    }

    pub fn input(&self) -> &AugmentedArray<InputArray> {
        &self.inputs[0]
    }

    pub fn inputs(&self) -> &[AugmentedArray<InputArray>] {
        &self.inputs
    }

    pub fn output(&self) -> &AugmentedArray<Array1<f64>> {
        &self.output
    }

    pub fn output_values(&self) -> &Array1<f64> {
        self.output.values()
    }

    /// 循环变体反向传播后得到的 `∂L/∂yPrev`。
    pub fn prev_state_errors(&self) -> Option<&Array1<f64>> {
        self.prev_state_errors.as_ref()
    }

    pub fn set_input(&mut self, values: InputArray) -> Result<()> {
        self.set_input_at(0, values)
    }

    /// 为多输入（合并）层设置全部输入。
    pub fn set_inputs(&mut self, values: Vec<InputArray>) -> Result<()> {
        ensure_size(self.inputs.len(), values.len(), "number of inputs")?;
        for (index, v) in values.into_iter().enumerate() {
            self.set_input_at(index, v)?;
        }
        Ok(())
    }

    pub fn set_input_at(&mut self, index: usize, values: InputArray) -> Result<()> {
        let len = self.inputs.len();
        let input = self
            .inputs
            .get_mut(index)
            .ok_or(LayerError::LayerIndexOutOfRange { index, len })?;
        if values.input_type() != self.input_type {
            return Err(argument(format!(
                "expected a {:?} input, got {:?}",
                self.input_type,
                values.input_type()
            )));
        }
        input.set_values(values)?;
        self.dropout_states[index].applied = false;
        Ok(())
    }

    pub fn set_errors(&mut self, errors: Array1<f64>) -> Result<()> {
        self.output.set_errors(errors)
    }

    pub fn set_output_relevance(&mut self, relevance: Array1<f64>) -> Result<()> {
        self.output.set_relevance(relevance)
    }

    /// 直接写入输出值（不经过前向计算），用于承载初始隐藏状态。
    pub(crate) fn set_output_values(&mut self, values: Array1<f64>) -> Result<()> {
        self.output.set_values(values)?;
        self.output.clear_errors();
        Ok(())
    }

    pub(crate) fn output_mut(&mut self) -> &mut AugmentedArray<Array1<f64>> {
        &mut self.output
    }

    pub fn apply_output_activation_deriv(&mut self) -> Result<()> {
        self.output.apply_activation_deriv_to_errors()
    }

    pub fn forward(&mut self) -> Result<()> {
        self.forward_in(&NoWindow)
    }

    /// 在给定时间窗口中前向计算。
    pub fn forward_in(&mut self, window: &dyn LayersWindow) -> Result<()> {
        self.begin_forward()?;
        let mut io = LayerIo {
            inputs: &mut self.inputs,
            output: &mut self.output,
            prev_state_errors: &mut self.prev_state_errors,
        };
        dispatch!(&mut self.unit, &*self.params, |cell, p| cell
            .forward(p, &mut io, window))
    }

    /// 前向计算并把每个权重的贡献写入 `contributions`，供相关度传播使用。
    pub fn forward_with_contributions(&mut self, contributions: &mut LayerParameters) -> Result<()> {
        if !self.supports_relevance() {
            return Err(LayerError::RelevanceNotSupported(self.connection_type));
        }
        self.begin_forward()?;
        let mut io = LayerIo {
            inputs: &mut self.inputs,
            output: &mut self.output,
            prev_state_errors: &mut self.prev_state_errors,
        };
        match (&mut self.unit, &*self.params, contributions) {
            (
                LayerUnit::Feedforward(cell),
                LayerParameters::Feedforward(p),
                LayerParameters::Feedforward(c),
            ) => cell.forward_with_contributions(p, &mut io, c),
            (LayerUnit::Merge(cell), LayerParameters::Merge(p), LayerParameters::Merge(c)) => {
                cell.forward_with_contributions(p, &mut io, c)
            }
            _ => Err(configuration(
                "contributions do not match the layer parameters",
            )),
        }
    }

    pub fn backward(&mut self, propagate_to_input: bool) -> Result<ParamsErrors> {
        self.backward_in(&NoWindow, propagate_to_input)
    }

    /// 反向传播：读取输出误差，返回参数梯度，并撤销本次前向施加的 dropout。
    pub fn backward_in(
        &mut self,
        window: &dyn LayersWindow,
        propagate_to_input: bool,
    ) -> Result<ParamsErrors> {
        let mut io = LayerIo {
            inputs: &mut self.inputs,
            output: &mut self.output,
            prev_state_errors: &mut self.prev_state_errors,
        };
        let gradients = dispatch!(&mut self.unit, &*self.params, |cell, p| cell
            .backward(p, &mut io, window, propagate_to_input)
            .map(LayerParameters::from))?;
        self.revert_dropout(propagate_to_input)?;
        Ok(gradients)
    }

    pub fn supports_relevance(&self) -> bool {
        self.unit.supports_relevance()
    }

    pub fn set_input_relevance(&mut self, contributions: &LayerParameters) -> Result<()> {
        let relevance = self.input_relevance(contributions)?;
        for (input, r) in self.inputs.iter_mut().zip(relevance) {
            input.set_relevance(r)?;
        }
        Ok(())
    }

    pub fn add_input_relevance(&mut self, contributions: &LayerParameters) -> Result<()> {
        let relevance = self.input_relevance(contributions)?;
        for (input, r) in self.inputs.iter_mut().zip(relevance) {
            input.add_relevance(&r)?;
        }
        Ok(())
    }

    fn input_relevance(&self, contributions: &LayerParameters) -> Result<Vec<Array1<f64>>> {
        match (&self.unit, contributions) {
            (LayerUnit::Feedforward(cell), LayerParameters::Feedforward(c))
                if self.supports_relevance() =>
            {
                cell.input_relevance(&self.inputs, &self.output, c)
            }
            (LayerUnit::Merge(cell), LayerParameters::Merge(c)) if self.supports_relevance() => {
                cell.input_relevance(&self.inputs, &self.output, c)
            }
            _ if !self.supports_relevance() => {
                Err(LayerError::RelevanceNotSupported(self.connection_type))
            }
            _ => Err(configuration(
                "contributions do not match the layer parameters",
            )),
        }
    }

    /// 清除上一周期的误差与相关度，并按需施加 dropout。
    fn begin_forward(&mut self) -> Result<()> {
        self.output.clear_errors();
        self.output.clear_relevance();
        self.prev_state_errors = None;
        for (input, state) in self.inputs.iter_mut().zip(self.dropout_states.iter_mut()) {
            if state.applied {
                // 上一次前向之后没有反向传播
                state.restore(input.values_mut());
            }
            input.clear_errors();
            input.clear_relevance();
        }
        if self.dropout > 0.0 {
            self.apply_dropout()?;
        }
        Ok(())
    }

    /// 反向 dropout：`mask = (u < dropout ? 0 : 1) / (1 - dropout)`，原地乘入输入。
    fn apply_dropout(&mut self) -> Result<()> {
        let dropout = self.dropout;
        let keep = 1.0 - dropout;
        for (input, state) in self.inputs.iter_mut().zip(self.dropout_states.iter_mut()) {
            state.store(input.values());
            let mask = Array1::from_shape_fn(input.size(), |_| {
                if rand::random::<f64>() < dropout { 0.0 } else { 1.0 / keep }
            });
            trace!(
                dropped = mask.iter().filter(|&&m| m == 0.0).count(),
                size = mask.len(),
                "dropout mask drawn"
            );
            input.values_mut().mul_assign_mask(mask.view())?;
            state.mask = Some(mask);
            state.applied = true;
        }
        Ok(())
    }

    fn revert_dropout(&mut self, propagate_to_input: bool) -> Result<()> {
        for (input, state) in self.inputs.iter_mut().zip(self.dropout_states.iter_mut()) {
            if !state.applied {
                continue;
            }
            if propagate_to_input {
                if let Some(mask) = &state.mask {
                    *input.errors_mut()? *= mask;
                }
            }
            state.restore(input.values_mut());
        }
        Ok(())
    }
}
