use std::sync::Arc;

use ndarray::Array1;
use tracing::debug;

use crate::arrays::input::{InputArray, InputType};
use crate::error::{LayerError, Result, argument, ensure_size};
use crate::layers::feedforward::FeedforwardParameters;
use crate::layers::interface::ConnectionType;
use crate::layers::layer::Layer;
use crate::layers::parameters::{LayerParameters, ParamsErrors};
use crate::layers::window::{LayerWindow, NoWindow};
use crate::stacked::parameters::StackedLayersParameters;
use crate::stacked::stacked_layers::{build_layers, feed_next, feed_prev, layer_at, layer_at_mut};
use crate::stacked::window::StatesWindow;

/// 第 `index` 层的时间窗口：有初始隐藏状态时以它作为上一状态。
fn layer_window<'a>(
    init_hidden: Option<&'a Layer>,
    states: &'a dyn StatesWindow,
    index: usize,
) -> LayerWindow<'a> {
    let prev = init_hidden.or_else(|| {
        states
            .prev_state()
            .and_then(|state| state.layers.get(index))
    });
    let next = states
        .next_state()
        .and_then(|state| state.layers.get(index));
    LayerWindow::new(prev, next)
}

/// 一个时间步的层栈。
///
/// 不持有相邻时间步：每次前向/反向时由调用者以 [`StatesWindow`] 传入。
#[derive(Clone, Debug)]
pub struct RecurrentStackedLayers {
    layers: Vec<Layer>,
    /// 每层的初始隐藏状态（一个只承载输出的层）。
    init_hidden: Vec<Option<Layer>>,
}

impl RecurrentStackedLayers {
    /// `dropout` 的规则与 [`StackedLayers::new`](crate::stacked::StackedLayers::new) 相同。
    pub fn new(params: &StackedLayersParameters, dropout: f64) -> Result<Self> {
        let layers = build_layers(params, dropout, true)?;
        Ok(Self {
            init_hidden: vec![None; layers.len()],
            layers,
        })
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, index: usize) -> Result<&Layer> {
        layer_at(&self.layers, index)
    }

    pub fn layer_mut(&mut self, index: usize) -> Result<&mut Layer> {
        layer_at_mut(&mut self.layers, index)
    }

    /// 为每层设置（或清除）初始隐藏状态，须在前向之前调用。
    ///
    /// 只有循环层可以设置；长度必须等于层数。
    pub fn set_init_hidden(&mut self, hidden: Vec<Option<Array1<f64>>>) -> Result<()> {
        ensure_size(self.layers.len(), hidden.len(), "number of initial hidden states")?;
        let mut holders = Vec::with_capacity(hidden.len());
        for (index, (layer, state)) in self.layers.iter().zip(hidden).enumerate() {
            let holder = match state {
                None => None,
                Some(_) if !layer.connection_type().is_recurrent() => {
                    return Err(argument(format!(
                        "layer {index} ({:?}) is not recurrent and takes no initial hidden state",
                        layer.connection_type()
                    )));
                }
                Some(values) => {
                    let size = layer.output_values().len();
                    ensure_size(size, values.len(), "initial hidden state")?;
                    debug!(index, size, "initial hidden state set");
                    let params = FeedforwardParameters::new(1, size);
                    let mut holder = Layer::new(
                        ConnectionType::Feedforward,
                        InputType::Dense,
                        Arc::new(LayerParameters::Feedforward(params)),
                        None,
                        0.0,
                    );
                    holder.set_output_values(values)?;
                    Some(holder)
                }
            };
            holders.push(holder);
        }
        self.init_hidden = holders;
        Ok(())
    }

    /// 第 `index` 层的初始隐藏状态层（未设置时为 `None`）。
    pub fn init_hidden(&self, index: usize) -> Option<&Layer> {
        self.init_hidden.get(index).and_then(Option::as_ref)
    }

    /// 反向传播后每个初始隐藏状态上收集到的误差；未设置的位置为 `None`。
    pub fn init_hidden_errors(&self) -> Vec<Option<&Array1<f64>>> {
        self.init_hidden
            .iter()
            .map(|holder| holder.as_ref().and_then(|h| h.output().errors().ok()))
            .collect()
    }

    pub fn init_hidden_errors_of(&self, index: usize) -> Result<&Array1<f64>> {
        layer_at(&self.layers, index)?;
        self.init_hidden(index)
            .ok_or(LayerError::MissingInitHidden(index))?
            .output()
            .errors()
    }

    /// 第 `index` 层在给定状态窗口中的上下文窗口。
    pub fn layers_window<'a>(
        &'a self,
        index: usize,
        states: &'a dyn StatesWindow,
    ) -> LayerWindow<'a> {
        layer_window(self.init_hidden(index), states, index)
    }

    pub fn set_input(&mut self, values: InputArray) -> Result<()> {
        self.layers[0].set_input(values)
    }

    pub fn set_inputs(&mut self, values: Vec<InputArray>) -> Result<()> {
        self.layers[0].set_inputs(values)
    }

    pub fn forward(&mut self, states: &dyn StatesWindow) -> Result<()> {
        for index in 0..self.layers.len() {
            if index > 0 {
                feed_next(&mut self.layers, index - 1)?;
            }
            let layer = &mut self.layers[index];
            if layer.connection_type().is_recurrent() {
                let window = layer_window(self.init_hidden[index].as_ref(), states, index);
                layer.forward_in(&window)?;
            } else {
                layer.forward_in(&NoWindow)?;
            }
        }
        Ok(())
    }

    /// 以本时间步的输出误差反向传播。
    ///
    /// 后一时间步必须已经完成反向传播；循环层会从它那里读取上一状态误差。
    pub fn backward(
        &mut self,
        output_errors: Array1<f64>,
        states: &dyn StatesWindow,
        propagate_to_input: bool,
    ) -> Result<Vec<ParamsErrors>> {
        let last = self.layers.len() - 1;
        self.layers[last].set_errors(output_errors)?;
        let mut gradients = Vec::with_capacity(self.layers.len());
        for index in (0..self.layers.len()).rev() {
            let propagate = index > 0 || propagate_to_input;
            let layer = &mut self.layers[index];
            let layer_gradients = if layer.connection_type().is_recurrent() {
                let window = layer_window(self.init_hidden[index].as_ref(), states, index);
                layer.backward_in(&window, propagate)?
            } else {
                layer.backward_in(&NoWindow, propagate)?
            };
            gradients.push(layer_gradients);

            if let (Some(holder), Some(errors)) = (
                self.init_hidden[index].as_mut(),
                self.layers[index].prev_state_errors(),
            ) {
                holder.output_mut().set_errors(errors.clone())?;
            }
            if index > 0 {
                feed_prev(&mut self.layers, index)?;
            }
        }
        gradients.reverse();
        Ok(gradients)
    }

    pub fn input_errors(&self) -> Result<Vec<&Array1<f64>>> {
        self.layers[0]
            .inputs()
            .iter()
            .map(|input| input.errors())
            .collect()
    }

    pub fn output_values(&self) -> &Array1<f64> {
        self.layers[self.layers.len() - 1].output_values()
    }

    pub fn set_params(&mut self, params: &StackedLayersParameters) -> Result<()> {
        for (index, layer) in self.layers.iter_mut().enumerate() {
            layer.set_params(params.params(index)?.clone())?;
        }
        Ok(())
    }
}
