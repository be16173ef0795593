use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::arrays::sparse::{SparseArray, SparseBinaryArray};
use crate::error::{Result, configuration, ensure_size};

/// 输入张量的编码方式。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputType {
    #[default]
    Dense,
    Sparse,
    SparseBinary,
}

/// 层输入：三种编码的统一封装。
///
/// 各层变体只针对 `InputArray` 编写一次，编码相关的分派集中在这里。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum InputArray {
    Dense(Array1<f64>),
    Sparse(SparseArray),
    SparseBinary(SparseBinaryArray),
}

impl InputArray {
    /// 按声明的编码构建一个全零（或空）的输入。
    pub fn zeros(input_type: InputType, size: usize) -> Self {
        match input_type {
            InputType::Dense => InputArray::Dense(Array1::zeros(size)),
            InputType::Sparse => InputArray::Sparse(SparseArray::empty(size)),
            InputType::SparseBinary => InputArray::SparseBinary(SparseBinaryArray::empty(size)),
        }
    }

    pub fn input_type(&self) -> InputType {
        match self {
            InputArray::Dense(_) => InputType::Dense,
            InputArray::Sparse(_) => InputType::Sparse,
            InputArray::SparseBinary(_) => InputType::SparseBinary,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            InputArray::Dense(x) => x.len(),
            InputArray::Sparse(x) => x.size(),
            InputArray::SparseBinary(x) => x.size(),
        }
    }

    pub fn to_dense(&self) -> Array1<f64> {
        match self {
            InputArray::Dense(x) => x.clone(),
            InputArray::Sparse(x) => x.to_dense(),
            InputArray::SparseBinary(x) => x.to_dense(),
        }
    }

    /// 计算 `W·x`。
    pub fn dot_by(&self, w: ArrayView2<f64>) -> Array1<f64> {
        match self {
            InputArray::Dense(x) => w.dot(x),
            InputArray::Sparse(x) => x.dot_by(w),
            InputArray::SparseBinary(x) => x.dot_by(w),
        }
    }

    /// 计算 `gy ⊗ x`，即 `W·x` 关于 `W` 的梯度。
    pub fn outer(&self, gy: ArrayView1<f64>) -> Array2<f64> {
        match self {
            InputArray::Dense(x) => outer(gy, x.view()),
            InputArray::Sparse(x) => x.outer(gy),
            InputArray::SparseBinary(x) => x.outer(gy),
        }
    }

    /// 原地乘以 dropout 掩码。二值稀疏输入无法携带缩放后的值。
    pub fn mul_assign_mask(&mut self, mask: ArrayView1<f64>) -> Result<()> {
        ensure_size(self.size(), mask.len(), "dropout mask")?;
        match self {
            InputArray::Dense(x) => {
                *x *= &mask;
                Ok(())
            }
            InputArray::Sparse(x) => {
                x.mul_assign_dense(mask);
                Ok(())
            }
            InputArray::SparseBinary(_) => Err(configuration(
                "dropout cannot be applied to a sparse-binary input",
            )),
        }
    }

    pub fn as_dense(&self) -> Option<&Array1<f64>> {
        match self {
            InputArray::Dense(x) => Some(x),
            _ => None,
        }
    }
}

impl From<Array1<f64>> for InputArray {
    fn from(values: Array1<f64>) -> Self {
        InputArray::Dense(values)
    }
}

impl From<SparseArray> for InputArray {
    fn from(values: SparseArray) -> Self {
        InputArray::Sparse(values)
    }
}

impl From<SparseBinaryArray> for InputArray {
    fn from(values: SparseBinaryArray) -> Self {
        InputArray::SparseBinary(values)
    }
}

/// 稠密外积 `a ⊗ b`。
pub fn outer(a: ArrayView1<f64>, b: ArrayView1<f64>) -> Array2<f64> {
    a.insert_axis(Axis(1)).dot(&b.insert_axis(Axis(0)))
}
