// 损失函数与参数更新
pub mod losses;
pub mod sgd;

pub use sgd::Sgd;
