use crate::error::{Result, configuration, ensure_size};
use crate::layers::parameters::ParamsErrors;

/// 参数梯度收集器：逐层求和，从不覆盖。
///
/// 一个序列的所有时间步累加到同一个收集器；多个序列并行时由调用者串行化访问（例如 `Mutex`）。
#[derive(Clone, Debug, Default)]
pub struct ParamsErrorsAccumulator {
    errors: Option<Vec<ParamsErrors>>,
    count: usize,
}

impl ParamsErrorsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 累加一个时间步（或一个栈）的逐层梯度。
    ///
    /// 先校验所有层，任何一层不匹配时总和与计数都保持不变。
    pub fn accumulate(&mut self, errors: &[ParamsErrors]) -> Result<()> {
        match &mut self.errors {
            None => self.errors = Some(errors.to_vec()),
            Some(current) => {
                ensure_size(current.len(), errors.len(), "number of layer errors")?;
                if let Some(index) = current
                    .iter()
                    .zip(errors)
                    .position(|(sum, e)| !sum.same_shape(e))
                {
                    return Err(configuration(format!(
                        "errors of layer {index} do not match the accumulated shape"
                    )));
                }
                for (sum, e) in current.iter_mut().zip(errors) {
                    sum.accumulate(e)?;
                }
            }
        }
        self.count += 1;
        Ok(())
    }

    /// 合并另一个收集器（例如各线程各自收集之后）。
    pub fn merge(&mut self, other: &ParamsErrorsAccumulator) -> Result<()> {
        let Some(errors) = &other.errors else {
            return Ok(());
        };
        let count = self.count + other.count;
        self.accumulate(errors)?;
        self.count = count;
        Ok(())
    }

    pub fn errors(&self) -> Option<&[ParamsErrors]> {
        self.errors.as_deref()
    }

    /// 累加的次数。
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// 按累加次数取平均。
    pub fn averaged(&self) -> Option<Vec<ParamsErrors>> {
        let count = self.count as f64;
        self.errors.as_ref().map(|errors| {
            errors
                .iter()
                .map(|e| {
                    let mut e = e.clone();
                    e.scale(1.0 / count);
                    e
                })
                .collect()
        })
    }

    pub fn reset(&mut self) {
        self.errors = None;
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::feedforward::FeedforwardParameters;
    use crate::layers::parameters::LayerParameters;

    fn filled(value: f64) -> ParamsErrors {
        let mut p = LayerParameters::Feedforward(FeedforwardParameters::new(2, 2));
        for mut array in p.arrays_mut() {
            array.fill(value);
        }
        p
    }

    #[test]
    fn test_accumulate_sums_and_averages() {
        let mut acc = ParamsErrorsAccumulator::new();
        assert!(acc.is_empty());
        assert!(acc.averaged().is_none());
        acc.accumulate(&[filled(1.0)]).unwrap();
        acc.accumulate(&[filled(3.0)]).unwrap();
        assert_eq!(acc.count(), 2);
        assert!(acc.errors().unwrap()[0]
            .arrays()
            .iter()
            .all(|a| a.iter().all(|&v| v == 4.0)));
        let averaged = acc.averaged().unwrap();
        assert!(averaged[0].arrays().iter().all(|a| a.iter().all(|&v| v == 2.0)));

        assert!(acc.accumulate(&[filled(1.0), filled(1.0)]).is_err());
        acc.reset();
        assert!(acc.errors().is_none());
    }

    #[test]
    fn test_merge() {
        let mut a = ParamsErrorsAccumulator::new();
        let mut b = ParamsErrorsAccumulator::new();
        a.accumulate(&[filled(1.0)]).unwrap();
        b.accumulate(&[filled(2.0)]).unwrap();
        b.accumulate(&[filled(2.0)]).unwrap();
        a.merge(&b).unwrap();
        assert_eq!(a.count(), 3);
        assert!(a.errors().unwrap()[0]
            .arrays()
            .iter()
            .all(|arr| arr.iter().all(|&v| v == 5.0)));
        a.merge(&ParamsErrorsAccumulator::new()).unwrap();
        assert_eq!(a.count(), 3);
    }

    #[test]
    fn test_mismatched_layer_leaves_sums_unchanged() {
        let wide = || LayerParameters::Feedforward(FeedforwardParameters::new(2, 3));
        let mut acc = ParamsErrorsAccumulator::new();
        acc.accumulate(&[filled(0.0), wide()]).unwrap();
        let before = acc.errors().unwrap().to_vec();

        let other = LayerParameters::Feedforward(FeedforwardParameters::new(5, 5));
        assert!(acc.accumulate(&[filled(4.0), other.clone()]).is_err());
        assert_eq!(acc.count(), 1);
        assert_eq!(acc.errors().unwrap(), before.as_slice());

        let mut rejected = ParamsErrorsAccumulator::new();
        rejected.accumulate(&[filled(4.0), other]).unwrap();
        assert!(acc.merge(&rejected).is_err());
        assert_eq!(acc.count(), 1);
        assert_eq!(acc.errors().unwrap(), before.as_slice());
    }
}
