use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{Result, argument};

/// 稀疏向量：固定逻辑长度，按索引升序保存非零项。
///
/// 非零项只能在构建时给出，之后 `set` 仅允许修改已有的活动项。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SparseArray {
    size: usize,
    indices: Vec<usize>,
    values: Vec<f64>,
}

impl SparseArray {
    /// 由 `(index, value)` 列表构建；索引越界或重复时报错。
    pub fn new(size: usize, mut entries: Vec<(usize, f64)>) -> Result<Self> {
        entries.sort_by_key(|&(i, _)| i);
        check_indices(size, entries.iter().map(|&(i, _)| i))?;
        let (indices, values) = entries.into_iter().unzip();
        Ok(Self {
            size,
            indices,
            values,
        })
    }

    pub fn empty(size: usize) -> Self {
        Self {
            size,
            indices: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn active_indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.indices.iter().copied().zip(self.values.iter().copied())
    }

    pub fn get(&self, index: usize) -> f64 {
        match self.indices.binary_search(&index) {
            Ok(pos) => self.values[pos],
            Err(_) => 0.0,
        }
    }

    /// 修改一个已存在的活动项。写入未激活的位置会被拒绝。
    pub fn set(&mut self, index: usize, value: f64) -> Result<()> {
        match self.indices.binary_search(&index) {
            Ok(pos) => {
                self.values[pos] = value;
                Ok(())
            }
            Err(_) => Err(argument(format!(
                "index {index} is not active in this sparse array"
            ))),
        }
    }

    pub fn to_dense(&self) -> Array1<f64> {
        let mut dense = Array1::zeros(self.size);
        for (i, v) in self.iter() {
            dense[i] = v;
        }
        dense
    }

    /// 计算 `W·x`，只访问活动列。
    pub fn dot_by(&self, w: ArrayView2<f64>) -> Array1<f64> {
        let mut out = Array1::zeros(w.nrows());
        for (i, v) in self.iter() {
            out.scaled_add(v, &w.column(i));
        }
        out
    }

    /// 计算外积 `gy ⊗ x`。
    pub fn outer(&self, gy: ArrayView1<f64>) -> Array2<f64> {
        let mut out = Array2::zeros((gy.len(), self.size));
        for (i, v) in self.iter() {
            out.column_mut(i).assign(&(&gy * v));
        }
        out
    }

    /// 逐元素乘以一个稠密掩码（零项保持为零）。
    pub fn mul_assign_dense(&mut self, mask: ArrayView1<f64>) {
        for (value, &i) in self.values.iter_mut().zip(self.indices.iter()) {
            *value *= mask[i];
        }
    }
}

/// 稀疏二值向量：活动项的值恒为 1。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SparseBinaryArray {
    size: usize,
    active: Vec<usize>,
}

impl SparseBinaryArray {
    pub fn new(size: usize, mut active: Vec<usize>) -> Result<Self> {
        active.sort_unstable();
        check_indices(size, active.iter().copied())?;
        Ok(Self { size, active })
    }

    pub fn empty(size: usize) -> Self {
        Self {
            size,
            active: Vec::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn active_indices(&self) -> &[usize] {
        &self.active
    }

    pub fn to_dense(&self) -> Array1<f64> {
        let mut dense = Array1::zeros(self.size);
        for &i in &self.active {
            dense[i] = 1.0;
        }
        dense
    }

    pub fn dot_by(&self, w: ArrayView2<f64>) -> Array1<f64> {
        let mut out = Array1::zeros(w.nrows());
        for &i in &self.active {
            out += &w.column(i);
        }
        out
    }

    pub fn outer(&self, gy: ArrayView1<f64>) -> Array2<f64> {
        let mut out = Array2::zeros((gy.len(), self.size));
        for &i in &self.active {
            out.column_mut(i).assign(&gy);
        }
        out
    }
}

fn check_indices(size: usize, sorted: impl Iterator<Item = usize>) -> Result<()> {
    let mut last: Option<usize> = None;
    for i in sorted {
        if i >= size {
            return Err(argument(format!("index {i} out of bounds for size {size}")));
        }
        if last == Some(i) {
            return Err(argument(format!("duplicate active index {i}")));
        }
        last = Some(i);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    #[test]
    fn test_sparse_set_rejects_inactive_index() {
        let mut x = SparseArray::new(5, vec![(3, 0.5), (1, -2.0)]).unwrap();
        assert!(x.set(3, 1.5).is_ok());
        assert_eq!(x.get(3), 1.5);
        assert!(x.set(0, 1.0).is_err());
        assert_eq!(x.active_indices(), &[1, 3]);
    }

    #[test]
    fn test_sparse_rejects_bad_indices() {
        assert!(SparseArray::new(3, vec![(3, 1.0)]).is_err());
        assert!(SparseArray::new(3, vec![(1, 1.0), (1, 2.0)]).is_err());
        assert!(SparseBinaryArray::new(2, vec![0, 2]).is_err());
    }

    #[test]
    fn test_sparse_dot_matches_dense() {
        let w = arr2(&[[0.1, 0.2, 0.3], [-0.4, 0.5, -0.6]]);
        let x = SparseArray::new(3, vec![(0, 2.0), (2, -1.0)]).unwrap();
        let expected = w.dot(&x.to_dense());
        let result = x.dot_by(w.view());
        result
            .iter()
            .zip(expected.iter())
            .for_each(|(a, b)| assert!((a - b).abs() < 1e-12));

        let b = SparseBinaryArray::new(3, vec![1, 2]).unwrap();
        assert_eq!(b.dot_by(w.view()), w.dot(&b.to_dense()));
    }

    #[test]
    fn test_sparse_outer_matches_dense() {
        let gy = arr1(&[1.0, -2.0]);
        let x = SparseArray::new(3, vec![(1, 3.0)]).unwrap();
        let dense = x.to_dense();
        let expected = gy
            .view()
            .insert_axis(ndarray::Axis(1))
            .dot(&dense.view().insert_axis(ndarray::Axis(0)));
        assert_eq!(x.outer(gy.view()), expected);

        let b = SparseBinaryArray::new(3, vec![0]).unwrap();
        assert_eq!(b.outer(gy.view()), arr2(&[[1.0, 0.0, 0.0], [-2.0, 0.0, 0.0]]));
    }
}
