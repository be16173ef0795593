// 神经网络层：接口、参数、工厂与各层变体
pub mod batch_norm;
pub mod biaffine;
pub mod cfn_cell;
pub mod deltarnn_cell;
pub mod factory;
pub mod feedforward;
pub mod gru_cell;
pub mod highway;
pub mod indrnn_cell;
pub mod initializer;
pub mod interface;
pub mod layer;
pub mod lstm_cell;
pub mod ltm_cell;
pub mod merge;
pub mod norm;
pub mod parameters;
pub mod ran_cell;
pub mod rnn_cell;
pub mod squared_distance;
pub mod tpr_cell;
pub mod window;

pub use factory::{LayerFactory, LayerParametersFactory};
pub use initializer::{Initializer, ParamsInitializer};
pub use interface::{ConnectionType, LayerInterface};
pub use layer::{Layer, LayerUnit};
pub use parameters::{LayerParameters, ParamsErrors};
pub use window::{LayerWindow, LayersWindow, NoWindow};
