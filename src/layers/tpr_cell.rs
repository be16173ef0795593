use ndarray::{Array1, Array2, ArrayViewD, ArrayViewMutD};
use serde::{Deserialize, Serialize};

use crate::activations::functions::sigmoid;
use crate::arrays::input::outer;
use crate::error::{Result, configuration};
use crate::layers::layer::{LayerCell, LayerIo};
use crate::layers::parameters::{ParamKind, ParametersUnit, ParamsGroup};
use crate::layers::window::LayersWindow;

/// TPR（张量积表示）参数。
///
/// 符号与角色各有一个注意力变换（输入加循环项）和一个嵌入矩阵；
/// 输出是符号向量与角色向量的外积按行展开，尺寸为 `dSymbols × dRoles`。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TprParameters {
    pub symbols_attention: ParametersUnit,
    pub roles_attention: ParametersUnit,
    /// `dSymbols × nSymbols`
    pub symbols: Array2<f64>,
    /// `dRoles × nRoles`
    pub roles: Array2<f64>,
}

impl TprParameters {
    /// 由输出尺寸推出维度：`dRoles` 取不超过平方根的最大因子，符号与角色的数量等于各自的维度。
    pub fn new(input_size: usize, output_size: usize) -> Self {
        let d_roles = (1..=output_size)
            .filter(|d| d * d <= output_size && output_size % d == 0)
            .last()
            .unwrap_or(1);
        let d_symbols = output_size / d_roles;
        Self::with_dims(input_size, d_symbols, d_symbols, d_roles, d_roles)
    }

    pub fn with_dims(
        input_size: usize,
        n_symbols: usize,
        d_symbols: usize,
        n_roles: usize,
        d_roles: usize,
    ) -> Self {
        let output_size = d_symbols * d_roles;
        let attention = |n: usize| ParametersUnit {
            weights: Array2::zeros((n, input_size)),
            biases: Some(Array1::zeros(n)),
            recurrent_weights: Some(Array2::zeros((n, output_size))),
        };
        Self {
            symbols_attention: attention(n_symbols),
            roles_attention: attention(n_roles),
            symbols: Array2::zeros((d_symbols, n_symbols)),
            roles: Array2::zeros((d_roles, n_roles)),
        }
    }

    pub fn d_symbols(&self) -> usize {
        self.symbols.nrows()
    }

    pub fn d_roles(&self) -> usize {
        self.roles.nrows()
    }
}

impl ParamsGroup for TprParameters {
    fn input_sizes(&self) -> Vec<usize> {
        vec![self.symbols_attention.weights.ncols()]
    }

    fn output_size(&self) -> usize {
        self.d_symbols() * self.d_roles()
    }

    fn params(&self) -> Vec<(ParamKind, ArrayViewD<'_, f64>)> {
        let mut out = Vec::new();
        self.symbols_attention.push_params(&mut out);
        self.roles_attention.push_params(&mut out);
        out.push((ParamKind::Weights, self.symbols.view().into_dyn()));
        out.push((ParamKind::Weights, self.roles.view().into_dyn()));
        out
    }

    fn params_mut(&mut self) -> Vec<(ParamKind, ArrayViewMutD<'_, f64>)> {
        let mut out = Vec::new();
        self.symbols_attention.push_params_mut(&mut out);
        self.roles_attention.push_params_mut(&mut out);
        out.push((ParamKind::Weights, self.symbols.view_mut().into_dyn()));
        out.push((ParamKind::Weights, self.roles.view_mut().into_dyn()));
        out
    }
}

/// TPR 单元
///
/// ```text
/// aS = σ(WS·x + bS + WSr·yPrev)        aR 同理
/// s = S·aS
/// r = R·aR
/// y = f(vec(s ⊗ r))
/// ```
#[derive(Clone, Debug, Default)]
pub struct TprCell {
    symbols_attention: Array1<f64>,
    roles_attention: Array1<f64>,
    symbol: Array1<f64>,
    role: Array1<f64>,
    y_prev: Option<Array1<f64>>,
}

impl TprCell {
    pub fn symbols_attention(&self) -> &Array1<f64> {
        &self.symbols_attention
    }

    pub fn roles_attention(&self) -> &Array1<f64> {
        &self.roles_attention
    }

    /// 当前的符号向量 `s`。
    pub fn symbol(&self) -> &Array1<f64> {
        &self.symbol
    }

    /// 当前的角色向量 `r`。
    pub fn role(&self) -> &Array1<f64> {
        &self.role
    }
}

impl LayerCell for TprCell {
    type Params = TprParameters;

    fn forward(
        &mut self,
        params: &TprParameters,
        io: &mut LayerIo<'_>,
        window: &dyn LayersWindow,
    ) -> Result<()> {
        let x = io.input();
        self.y_prev = window.prev_output().cloned();
        let y_prev = self.y_prev.as_ref();

        self.symbols_attention = sigmoid(&params.symbols_attention.linear(x, y_prev));
        self.roles_attention = sigmoid(&params.roles_attention.linear(x, y_prev));
        self.symbol = params.symbols.dot(&self.symbols_attention);
        self.role = params.roles.dot(&self.roles_attention);

        let binding = outer(self.symbol.view(), self.role.view());
        io.set_output(binding.iter().copied().collect())
    }

    fn backward(
        &mut self,
        params: &TprParameters,
        io: &mut LayerIo<'_>,
        window: &dyn LayersWindow,
        propagate_to_input: bool,
    ) -> Result<TprParameters> {
        let gy = io.output_gradient(window)?;
        let (d_symbols, d_roles) = (self.symbol.len(), self.role.len());
        if gy.len() != d_symbols * d_roles {
            return Err(configuration("TPR output errors do not match the binding size"));
        }
        let g_binding = Array2::from_shape_fn((d_symbols, d_roles), |(i, j)| gy[i * d_roles + j]);
        let g_symbol = g_binding.dot(&self.role);
        let g_role = g_binding.t().dot(&self.symbol);

        let g_symbols_attention =
            params.symbols.t().dot(&g_symbol) * attention_deriv(&self.symbols_attention);
        let g_roles_attention =
            params.roles.t().dot(&g_role) * attention_deriv(&self.roles_attention);

        if propagate_to_input {
            let gx = params.symbols_attention.input_errors(&g_symbols_attention)
                + params.roles_attention.input_errors(&g_roles_attention);
            io.set_input_errors(0, gx)?;
        }
        if self.y_prev.is_some() {
            let g_prev = [
                params.symbols_attention.recurrent_errors(&g_symbols_attention),
                params.roles_attention.recurrent_errors(&g_roles_attention),
            ]
            .into_iter()
            .flatten()
            .fold(Array1::<f64>::zeros(gy.len()), |acc, e| acc + e);
            *io.prev_state_errors = Some(g_prev);
        }

        let x = io.input();
        let y_prev = self.y_prev.as_ref();
        Ok(TprParameters {
            symbols_attention: params
                .symbols_attention
                .gradients(&g_symbols_attention, x, y_prev),
            roles_attention: params
                .roles_attention
                .gradients(&g_roles_attention, x, y_prev),
            symbols: outer(g_symbol.view(), self.symbols_attention.view()),
            roles: outer(g_role.view(), self.roles_attention.view()),
        })
    }
}

/// 由激活后的值计算 σ'。
fn attention_deriv(a: &Array1<f64>) -> Array1<f64> {
    a.mapv(|v| v * (1.0 - v))
}
