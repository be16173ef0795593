use ndarray::Array1;
use tracing::debug;

use crate::arrays::input::InputArray;
use crate::error::{LayerError, Result, argument, ensure_size};
use crate::stacked::accumulator::ParamsErrorsAccumulator;
use crate::stacked::parameters::StackedLayersParameters;
use crate::stacked::recurrent::RecurrentStackedLayers;
use crate::stacked::window::SequenceWindow;

/// 序列驱动：持有每个时间步的层栈，按 BPTT 顺序执行。
///
/// 前向 t = 0..T−1，反向 t = T−1..0。时间步之间只通过借用窗口访问，不互相持有。
#[derive(Clone, Debug)]
pub struct RecurrentSequence {
    params: StackedLayersParameters,
    dropout: f64,
    states: Vec<RecurrentStackedLayers>,
    init_hidden: Option<Vec<Option<Array1<f64>>>>,
}

impl RecurrentSequence {
    pub fn new(params: &StackedLayersParameters, dropout: f64) -> Result<Self> {
        // 提前构建一步，让配置错误在这里返回
        let first = RecurrentStackedLayers::new(params, dropout)?;
        Ok(Self {
            params: params.clone(),
            dropout,
            states: vec![first],
            init_hidden: None,
        })
    }

    /// 下一次前向使用的初始隐藏状态（每层一个，或 `None`）。
    pub fn set_init_hidden(&mut self, hidden: Vec<Option<Array1<f64>>>) -> Result<()> {
        ensure_size(self.params.len(), hidden.len(), "number of initial hidden states")?;
        self.init_hidden = Some(hidden);
        Ok(())
    }

    pub fn clear_init_hidden(&mut self) {
        self.init_hidden = None;
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn states(&self) -> &[RecurrentStackedLayers] {
        &self.states
    }

    pub fn state(&self, t: usize) -> Result<&RecurrentStackedLayers> {
        self.states.get(t).ok_or(LayerError::LayerIndexOutOfRange {
            index: t,
            len: self.states.len(),
        })
    }

    /// 单输入网络的前向。
    pub fn forward(&mut self, inputs: Vec<InputArray>) -> Result<()> {
        self.forward_inputs(inputs.into_iter().map(|x| vec![x]).collect())
    }

    /// 每个时间步给出第一层的全部输入（合并层有多个）。
    pub fn forward_inputs(&mut self, inputs: Vec<Vec<InputArray>>) -> Result<()> {
        if inputs.is_empty() {
            return Err(argument("a sequence needs at least one step"));
        }
        self.resize(inputs.len())?;

        let hidden = self
            .init_hidden
            .clone()
            .unwrap_or_else(|| vec![None; self.params.len()]);
        self.states[0].set_init_hidden(hidden)?;

        for (t, x) in inputs.into_iter().enumerate() {
            let (before, rest) = self.states.split_at_mut(t);
            let current = &mut rest[0];
            current.set_inputs(x)?;
            current.forward(&SequenceWindow::new(before.last(), None))?;
        }
        Ok(())
    }

    /// 反向传播整个序列，每个时间步的参数梯度累加到 `accumulator`。
    pub fn backward(
        &mut self,
        output_errors: Vec<Array1<f64>>,
        propagate_to_input: bool,
        accumulator: &mut ParamsErrorsAccumulator,
    ) -> Result<()> {
        ensure_size(self.states.len(), output_errors.len(), "number of output errors")?;
        for (t, errors) in output_errors.into_iter().enumerate().rev() {
            let len = self.states.len();
            let (before, rest) = self.states.split_at_mut(t);
            let (current, after) = rest
                .split_first_mut()
                .ok_or(LayerError::LayerIndexOutOfRange { index: t, len })?;
            let gradients = current.backward(
                errors,
                &SequenceWindow::new(before.last(), after.first()),
                propagate_to_input,
            )?;
            accumulator.accumulate(&gradients)?;
        }
        Ok(())
    }

    pub fn output(&self, t: usize) -> Result<&Array1<f64>> {
        Ok(self.state(t)?.output_values())
    }

    pub fn outputs(&self) -> Vec<&Array1<f64>> {
        self.states.iter().map(|s| s.output_values()).collect()
    }

    /// 第一个时间步上各初始隐藏状态收集到的误差。
    pub fn init_hidden_errors(&self) -> Vec<Option<&Array1<f64>>> {
        self.states[0].init_hidden_errors()
    }

    pub fn params(&self) -> &StackedLayersParameters {
        &self.params
    }

    /// 参数更新后同步到所有时间步。
    pub fn set_params(&mut self, params: &StackedLayersParameters) -> Result<()> {
        for state in &mut self.states {
            state.set_params(params)?;
        }
        self.params = params.clone();
        Ok(())
    }

    fn resize(&mut self, steps: usize) -> Result<()> {
        if steps > self.states.len() {
            debug!(from = self.states.len(), to = steps, "growing recurrent sequence");
        }
        while self.states.len() < steps {
            self.states
                .push(RecurrentStackedLayers::new(&self.params, self.dropout)?);
        }
        self.states.truncate(steps);
        Ok(())
    }
}
