use ndarray::{Array1, Array2, ArrayViewD, ArrayViewMutD};
use serde::{Deserialize, Serialize};

use crate::arrays::input::{InputArray, outer};
use crate::error::{Result, configuration};
use crate::layers::batch_norm::BatchNormParameters;
use crate::layers::biaffine::BiaffineParameters;
use crate::layers::cfn_cell::CfnParameters;
use crate::layers::deltarnn_cell::DeltaRnnParameters;
use crate::layers::feedforward::FeedforwardParameters;
use crate::layers::gru_cell::GruParameters;
use crate::layers::highway::HighwayParameters;
use crate::layers::indrnn_cell::IndRnnParameters;
use crate::layers::lstm_cell::LstmParameters;
use crate::layers::ltm_cell::LtmParameters;
use crate::layers::merge::MergeParameters;
use crate::layers::norm::NormParameters;
use crate::layers::ran_cell::RanParameters;
use crate::layers::rnn_cell::SimpleRecurrentParameters;
use crate::layers::squared_distance::SquaredDistanceParameters;
use crate::layers::tpr_cell::TprParameters;

/// 参数张量的类别，决定使用哪个初始化器。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    Weights,
    Biases,
}

/// 一组参数张量，按固定顺序暴露给初始化、累加与优化器。
pub trait ParamsGroup {
    fn input_sizes(&self) -> Vec<usize>;

    fn output_size(&self) -> usize;

    fn params(&self) -> Vec<(ParamKind, ArrayViewD<'_, f64>)>;

    fn params_mut(&mut self) -> Vec<(ParamKind, ArrayViewMutD<'_, f64>)>;
}

/// 一个门（或一次线性变换）的参数：`W·x + b (+ Wr·yPrev)`。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParametersUnit {
    pub weights: Array2<f64>,
    pub biases: Option<Array1<f64>>,
    pub recurrent_weights: Option<Array2<f64>>,
}

impl ParametersUnit {
    pub fn new(input_size: usize, output_size: usize, with_biases: bool, recurrent: bool) -> Self {
        Self {
            weights: Array2::zeros((output_size, input_size)),
            biases: with_biases.then(|| Array1::zeros(output_size)),
            recurrent_weights: recurrent.then(|| Array2::zeros((output_size, output_size))),
        }
    }

    /// 计算 `W·x + b`，存在上一状态时再加上 `Wr·yPrev`。
    pub fn linear(&self, x: &InputArray, y_prev: Option<&Array1<f64>>) -> Array1<f64> {
        let mut z = x.dot_by(self.weights.view());
        if let Some(b) = &self.biases {
            z += b;
        }
        if let (Some(wr), Some(y)) = (&self.recurrent_weights, y_prev) {
            z += &wr.dot(y);
        }
        z
    }

    /// 由激活前误差 `gz` 计算本单元的参数梯度。
    ///
    /// 没有上一状态时循环权重的梯度为零。
    pub fn gradients(
        &self,
        gz: &Array1<f64>,
        x: &InputArray,
        y_prev: Option<&Array1<f64>>,
    ) -> ParametersUnit {
        ParametersUnit {
            weights: x.outer(gz.view()),
            biases: self.biases.as_ref().map(|_| gz.clone()),
            recurrent_weights: self.recurrent_weights.as_ref().map(|wr| match y_prev {
                Some(y) => outer(gz.view(), y.view()),
                None => Array2::zeros(wr.raw_dim()),
            }),
        }
    }

    /// `Wᵀ·gz`：传回输入的误差。
    pub fn input_errors(&self, gz: &Array1<f64>) -> Array1<f64> {
        self.weights.t().dot(gz)
    }

    /// `Wrᵀ·gz`：传回上一状态输出的误差。
    pub fn recurrent_errors(&self, gz: &Array1<f64>) -> Option<Array1<f64>> {
        self.recurrent_weights.as_ref().map(|wr| wr.t().dot(gz))
    }

    pub(crate) fn push_params<'a>(&'a self, out: &mut Vec<(ParamKind, ArrayViewD<'a, f64>)>) {
        out.push((ParamKind::Weights, self.weights.view().into_dyn()));
        if let Some(b) = &self.biases {
            out.push((ParamKind::Biases, b.view().into_dyn()));
        }
        if let Some(wr) = &self.recurrent_weights {
            out.push((ParamKind::Weights, wr.view().into_dyn()));
        }
    }

    pub(crate) fn push_params_mut<'a>(
        &'a mut self,
        out: &mut Vec<(ParamKind, ArrayViewMutD<'a, f64>)>,
    ) {
        out.push((ParamKind::Weights, self.weights.view_mut().into_dyn()));
        if let Some(b) = &mut self.biases {
            out.push((ParamKind::Biases, b.view_mut().into_dyn()));
        }
        if let Some(wr) = &mut self.recurrent_weights {
            out.push((ParamKind::Weights, wr.view_mut().into_dyn()));
        }
    }
}

/// 每种层变体的参数（闭合集合）。
///
/// 同一形状也用于反向传播返回的参数梯度，以及相关度传播的贡献累加器。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum LayerParameters {
    Feedforward(FeedforwardParameters),
    Highway(HighwayParameters),
    Norm(NormParameters),
    BatchNorm(BatchNormParameters),
    Merge(MergeParameters),
    Biaffine(BiaffineParameters),
    SquaredDistance(SquaredDistanceParameters),
    SimpleRecurrent(SimpleRecurrentParameters),
    Gru(GruParameters),
    Lstm(LstmParameters),
    Cfn(CfnParameters),
    Ran(RanParameters),
    IndRnn(IndRnnParameters),
    Ltm(LtmParameters),
    DeltaRnn(DeltaRnnParameters),
    Tpr(TprParameters),
}

/// 参数梯度与参数同形。
pub type ParamsErrors = LayerParameters;

macro_rules! with_group {
    ($params:expr, $p:ident => $body:expr) => {
        match $params {
            LayerParameters::Feedforward($p) => $body,
            LayerParameters::Highway($p) => $body,
            LayerParameters::Norm($p) => $body,
            LayerParameters::BatchNorm($p) => $body,
            LayerParameters::Merge($p) => $body,
            LayerParameters::Biaffine($p) => $body,
            LayerParameters::SquaredDistance($p) => $body,
            LayerParameters::SimpleRecurrent($p) => $body,
            LayerParameters::Gru($p) => $body,
            LayerParameters::Lstm($p) => $body,
            LayerParameters::Cfn($p) => $body,
            LayerParameters::Ran($p) => $body,
            LayerParameters::IndRnn($p) => $body,
            LayerParameters::Ltm($p) => $body,
            LayerParameters::DeltaRnn($p) => $body,
            LayerParameters::Tpr($p) => $body,
        }
    };
}

macro_rules! impl_from_params {
    ($($variant:ident($params:ty)),* $(,)?) => {
        $(
            impl From<$params> for LayerParameters {
                fn from(params: $params) -> Self {
                    LayerParameters::$variant(params)
                }
            }
        )*
    };
}

impl_from_params!(
    Feedforward(FeedforwardParameters),
    Highway(HighwayParameters),
    Norm(NormParameters),
    BatchNorm(BatchNormParameters),
    Merge(MergeParameters),
    Biaffine(BiaffineParameters),
    SquaredDistance(SquaredDistanceParameters),
    SimpleRecurrent(SimpleRecurrentParameters),
    Gru(GruParameters),
    Lstm(LstmParameters),
    Cfn(CfnParameters),
    Ran(RanParameters),
    IndRnn(IndRnnParameters),
    Ltm(LtmParameters),
    DeltaRnn(DeltaRnnParameters),
    Tpr(TprParameters),
);

impl LayerParameters {
    pub fn input_sizes(&self) -> Vec<usize> {
        with_group!(self, p => p.input_sizes())
    }

    pub fn input_size(&self) -> usize {
        self.input_sizes().first().copied().unwrap_or(0)
    }

    pub fn output_size(&self) -> usize {
        with_group!(self, p => p.output_size())
    }

    /// 全部参数张量（只读），顺序固定。
    pub fn arrays(&self) -> Vec<ArrayViewD<'_, f64>> {
        with_group!(self, p => p.params().into_iter().map(|(_, a)| a).collect())
    }

    pub fn arrays_mut(&mut self) -> Vec<ArrayViewMutD<'_, f64>> {
        with_group!(self, p => p.params_mut().into_iter().map(|(_, a)| a).collect())
    }

    pub fn weights_list(&mut self) -> Vec<ArrayViewMutD<'_, f64>> {
        self.list_of(ParamKind::Weights)
    }

    pub fn biases_list(&mut self) -> Vec<ArrayViewMutD<'_, f64>> {
        self.list_of(ParamKind::Biases)
    }

    fn list_of(&mut self, kind: ParamKind) -> Vec<ArrayViewMutD<'_, f64>> {
        with_group!(self, p => p
            .params_mut()
            .into_iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, a)| a)
            .collect())
    }

    /// 参数张量的元素总数。
    pub fn count(&self) -> usize {
        self.arrays().iter().map(|a| a.len()).sum()
    }

    /// 同形的全零参数，用作梯度或贡献累加器。
    pub fn zeros_like(&self) -> Self {
        let mut zeros = self.clone();
        for mut array in zeros.arrays_mut() {
            array.fill(0.0);
        }
        zeros
    }

    /// 变体相同且每个张量形状一致。
    pub fn same_shape(&self, other: &LayerParameters) -> bool {
        let (mine, others) = (self.arrays(), other.arrays());
        std::mem::discriminant(self) == std::mem::discriminant(other)
            && mine.len() == others.len()
            && mine.iter().zip(others.iter()).all(|(a, b)| a.shape() == b.shape())
    }

    /// 逐张量累加（求和，不覆盖）。形状不一致时不做任何修改。
    pub fn accumulate(&mut self, other: &LayerParameters) -> Result<()> {
        if !self.same_shape(other) {
            return Err(configuration(
                "cannot accumulate parameters of a different layer shape",
            ));
        }
        let others = other.arrays();
        for (mut a, b) in self.arrays_mut().into_iter().zip(others.iter()) {
            a += b;
        }
        Ok(())
    }

    pub fn scale(&mut self, factor: f64) {
        for mut array in self.arrays_mut() {
            array.mapv_inplace(|v| v * factor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    #[test]
    fn test_unit_linear_omits_recurrent_term_without_prev() {
        let mut unit = ParametersUnit::new(2, 2, true, true);
        unit.weights.fill(1.0);
        unit.biases.as_mut().unwrap().fill(0.5);
        unit.recurrent_weights.as_mut().unwrap().fill(10.0);
        let x = InputArray::from(arr1(&[1.0, 2.0]));
        assert_eq!(unit.linear(&x, None), arr1(&[3.5, 3.5]));
        assert_eq!(unit.linear(&x, Some(&arr1(&[1.0, 0.0]))), arr1(&[13.5, 13.5]));

        let grads = unit.gradients(&arr1(&[1.0, -1.0]), &x, None);
        assert!(grads.recurrent_weights.unwrap().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_weights_and_biases_lists() {
        let mut params = LayerParameters::Gru(GruParameters::new(3, 2));
        assert_eq!(params.weights_list().len(), 6);
        assert_eq!(params.biases_list().len(), 3);
        assert_eq!(params.count(), 3 * (2 * 3 + 2 + 2 * 2));
    }

    #[test]
    fn test_accumulate_sums_and_checks_shape() {
        let mut a = LayerParameters::Feedforward(FeedforwardParameters::new(2, 2));
        let mut b = a.zeros_like();
        for mut array in b.arrays_mut() {
            array.fill(1.0);
        }
        a.accumulate(&b).unwrap();
        a.accumulate(&b).unwrap();
        assert!(a.arrays().iter().all(|arr| arr.iter().all(|&v| v == 2.0)));

        let other = LayerParameters::Feedforward(FeedforwardParameters::new(3, 2));
        assert!(a.accumulate(&other).is_err());
        // 张量形状相同但变体不同
        let norm = LayerParameters::Norm(NormParameters::new(2));
        let batch_norm = LayerParameters::BatchNorm(BatchNormParameters::new(2));
        assert!(norm.clone().accumulate(&batch_norm).is_err());
    }

    #[test]
    fn test_from_wraps_matching_variant() {
        let params = LayerParameters::from(IndRnnParameters::new(3, 2));
        assert!(matches!(params, LayerParameters::IndRnn(_)));
        assert_eq!(params.input_sizes(), vec![3]);
    }
}
