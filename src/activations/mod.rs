// 激活函数
pub mod functions;
pub mod traits;

pub use functions::ActivationFunction;
pub use traits::Activation;
