use ndarray::Array1;

use crate::activations::functions::ActivationFunction;
use crate::activations::traits::Activation;
use crate::arrays::input::InputArray;
use crate::error::{LayerError, Result, ensure_size};

/// 具有固定长度的一维张量。
pub trait VectorLike {
    fn size(&self) -> usize;
}

impl VectorLike for Array1<f64> {
    fn size(&self) -> usize {
        self.len()
    }
}

impl VectorLike for InputArray {
    fn size(&self) -> usize {
        InputArray::size(self)
    }
}

/// 带有误差与相关度槽位的张量。
///
/// `errors` 只在反向传播写入后可读，`relevance` 只在相关度传播写入后可读；
/// 两者的长度始终等于 `values` 的长度。
#[derive(Clone, Debug)]
pub struct AugmentedArray<V> {
    values: V,
    errors: Option<Array1<f64>>,
    relevance: Option<Array1<f64>>,
    activation: Option<ActivationFunction>,
    values_not_activated: Option<Array1<f64>>,
}

impl<V: VectorLike> AugmentedArray<V> {
    pub fn new(values: V) -> Self {
        Self {
            values,
            errors: None,
            relevance: None,
            activation: None,
            values_not_activated: None,
        }
    }

    pub fn size(&self) -> usize {
        self.values.size()
    }

    pub fn values(&self) -> &V {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut V {
        &mut self.values
    }

    /// 替换 `values`，长度必须不变。
    pub fn set_values(&mut self, values: V) -> Result<()> {
        ensure_size(self.size(), values.size(), "values")?;
        self.values = values;
        self.values_not_activated = None;
        Ok(())
    }

    pub fn errors(&self) -> Result<&Array1<f64>> {
        self.errors.as_ref().ok_or(LayerError::NotAvailable("errors"))
    }

    pub fn errors_mut(&mut self) -> Result<&mut Array1<f64>> {
        self.errors.as_mut().ok_or(LayerError::NotAvailable("errors"))
    }

    pub fn has_errors(&self) -> bool {
        self.errors.is_some()
    }

    pub fn set_errors(&mut self, errors: Array1<f64>) -> Result<()> {
        ensure_size(self.size(), errors.len(), "errors")?;
        self.errors = Some(errors);
        Ok(())
    }

    /// 累加误差；尚无误差时等同于 `set_errors`。
    pub fn add_errors(&mut self, errors: &Array1<f64>) -> Result<()> {
        ensure_size(self.size(), errors.len(), "errors")?;
        match self.errors.as_mut() {
            Some(current) => *current += errors,
            None => self.errors = Some(errors.clone()),
        }
        Ok(())
    }

    pub fn clear_errors(&mut self) {
        self.errors = None;
    }

    pub fn relevance(&self) -> Result<&Array1<f64>> {
        self.relevance
            .as_ref()
            .ok_or(LayerError::NotAvailable("relevance"))
    }

    pub fn set_relevance(&mut self, relevance: Array1<f64>) -> Result<()> {
        ensure_size(self.size(), relevance.len(), "relevance")?;
        self.relevance = Some(relevance);
        Ok(())
    }

    pub fn add_relevance(&mut self, relevance: &Array1<f64>) -> Result<()> {
        ensure_size(self.size(), relevance.len(), "relevance")?;
        match self.relevance.as_mut() {
            Some(current) => *current += relevance,
            None => self.relevance = Some(relevance.clone()),
        }
        Ok(())
    }

    pub fn clear_relevance(&mut self) {
        self.relevance = None;
    }
}

impl AugmentedArray<Array1<f64>> {
    pub fn zeros(size: usize) -> Self {
        Self::new(Array1::zeros(size))
    }

    pub fn with_activation(mut self, activation: Option<ActivationFunction>) -> Self {
        self.activation = activation;
        self
    }

    pub fn activation(&self) -> Option<ActivationFunction> {
        self.activation
    }

    /// 写入未激活的值，随后通常调用 `activate`。
    pub fn assign_values(&mut self, values: Array1<f64>) -> Result<()> {
        self.set_values(values)
    }

    /// 写入激活前的值并立即激活。
    pub fn assign_activated(&mut self, values: Array1<f64>) -> Result<()> {
        self.assign_values(values)?;
        self.activate();
        Ok(())
    }

    /// 对 `values` 应用激活函数，同时保留激活前的副本。
    pub fn activate(&mut self) {
        if let Some(activation) = self.activation {
            let activated = activation.forward(&self.values);
            self.values_not_activated = Some(std::mem::replace(&mut self.values, activated));
        }
    }

    /// 激活前的值；未设置激活函数时即 `values`。
    pub fn values_not_activated(&self) -> &Array1<f64> {
        self.values_not_activated.as_ref().unwrap_or(&self.values)
    }

    /// 激活函数在激活前取值处的导数；无激活函数时返回 `None`。
    pub fn calculate_activation_deriv(&self) -> Option<Array1<f64>> {
        self.activation
            .map(|activation| activation.derivative(self.values_not_activated()))
    }

    /// 同上，无激活函数时为全一。
    pub fn activation_deriv(&self) -> Array1<f64> {
        self.calculate_activation_deriv()
            .unwrap_or_else(|| Array1::ones(self.size()))
    }

    /// 将 `errors` 乘以激活函数的导数（softmax 等使用雅可比矩阵）。
    pub fn apply_activation_deriv_to_errors(&mut self) -> Result<()> {
        let Some(activation) = self.activation else {
            return Ok(());
        };
        let z = self
            .values_not_activated
            .as_ref()
            .ok_or(LayerError::NotAvailable("pre-activation values"))?;
        let errors = self
            .errors
            .as_mut()
            .ok_or(LayerError::NotAvailable("errors"))?;
        match activation.jacobian(z) {
            Some(jacobian) => *errors = jacobian.t().dot(&*errors),
            None => *errors *= &activation.derivative(z),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    #[test]
    fn test_errors_unavailable_before_backward() {
        let mut array = AugmentedArray::zeros(3);
        assert!(matches!(array.errors(), Err(LayerError::NotAvailable(_))));
        assert!(array.relevance().is_err());
        assert!(array.set_errors(arr1(&[1.0, 2.0])).is_err());
        array.set_errors(arr1(&[1.0, 2.0, 3.0])).unwrap();
        array.add_errors(&arr1(&[1.0, 1.0, 1.0])).unwrap();
        assert_eq!(array.errors().unwrap(), &arr1(&[2.0, 3.0, 4.0]));
    }

    #[test]
    fn test_activate_keeps_pre_activation_values() {
        let mut array = AugmentedArray::zeros(2).with_activation(Some(ActivationFunction::Tanh));
        array.assign_values(arr1(&[0.0, 1.0])).unwrap();
        array.activate();
        assert_eq!(array.values_not_activated(), &arr1(&[0.0, 1.0]));
        assert!((array.values()[1] - 0.76159416).abs() < 1e-6);

        array.set_errors(arr1(&[1.0, 1.0])).unwrap();
        array.apply_activation_deriv_to_errors().unwrap();
        let errors = array.errors().unwrap();
        assert!((errors[0] - 1.0).abs() < 1e-9);
        assert!((errors[1] - 0.41997434).abs() < 1e-6);
    }

    #[test]
    fn test_softmax_uses_jacobian() {
        let mut array = AugmentedArray::zeros(3).with_activation(Some(ActivationFunction::Softmax));
        array.assign_values(arr1(&[0.1, 0.2, 0.3])).unwrap();
        array.activate();
        let s = array.values().clone();
        array.set_errors(arr1(&[1.0, 0.0, 0.0])).unwrap();
        array.apply_activation_deriv_to_errors().unwrap();
        // dL/dz_i = s_i * (δ_i0 - s_0)
        let errors = array.errors().unwrap();
        assert!((errors[0] - s[0] * (1.0 - s[0])).abs() < 1e-12);
        assert!((errors[1] + s[1] * s[0]).abs() < 1e-12);
        assert!((errors.sum()).abs() < 1e-12);
    }
}
