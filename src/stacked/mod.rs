// 层栈：共享参数、单步执行与序列上的 BPTT
pub mod accumulator;
pub mod parameters;
pub mod recurrent;
pub mod sequence;
pub mod stacked_layers;
pub mod window;

pub use accumulator::ParamsErrorsAccumulator;
pub use parameters::StackedLayersParameters;
pub use recurrent::RecurrentStackedLayers;
pub use sequence::RecurrentSequence;
pub use stacked_layers::StackedLayers;
pub use window::{NoStates, SequenceWindow, StatesWindow};
