//! 可堆叠的神经网络层与循环层的时间窗口执行引擎。
//!
//! 一个网络由 [`StackedLayersParameters`] 描述；非循环网络用 [`StackedLayers`] 执行，
//! 循环网络的每个时间步是一个 [`RecurrentStackedLayers`]，由 [`RecurrentSequence`] 驱动 BPTT。

pub mod activations;
pub mod arrays;
pub mod config;
pub mod error;
pub mod layers;
pub mod optimizers;
pub mod stacked;

#[cfg(test)]
mod testing;

pub use activations::ActivationFunction;
pub use arrays::{AugmentedArray, InputArray, InputType, SparseArray, SparseBinaryArray};
pub use config::StackConfig;
pub use error::{LayerError, Result};
pub use layers::{ConnectionType, Initializer, Layer, LayerInterface, LayerParameters, ParamsErrors};
pub use stacked::{
    NoStates, ParamsErrorsAccumulator, RecurrentSequence, RecurrentStackedLayers, SequenceWindow,
    StackedLayers, StackedLayersParameters, StatesWindow,
};
