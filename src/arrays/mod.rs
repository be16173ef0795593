// 张量基础：稠密/稀疏/二值稀疏输入与带误差槽位的数组
pub mod augmented;
pub mod input;
pub mod sparse;

pub use augmented::AugmentedArray;
pub use input::{InputArray, InputType};
pub use sparse::{SparseArray, SparseBinaryArray};
