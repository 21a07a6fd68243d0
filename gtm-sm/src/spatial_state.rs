use candle_util::candle_aux_layers::{Act, StackLayers};
use candle_util::candle_core::{DType, Device, IndexOp, Result, Tensor};
use candle_util::candle_nn::{self, Linear, Module, VarBuilder};
use candle_util::candle_sampling::{randn_tensor, uniform_tensor};
use rand::Rng;

/// Stochastic spatial-state recursion
///
/// ```text
/// m_t = M a_t
/// s_t = s_{t-1} + m_t ⊙ σ(s_{t-1} + m_t) + ε,   ε ~ N(0, r_std² I)
/// ```
///
/// where `M` is a bias-free projection of the one-hot action and `σ` is
/// a linear -> tanh -> linear -> sigmoid gate.
pub struct SpatialStateTransition {
    a_dim: usize,
    s_dim: usize,
    r_std: f64,
    action_matrix: Linear,
    gate: StackLayers<Linear>,
}

impl SpatialStateTransition {
    /// Will create these variables:
    ///
    /// * `st.matrix.weight`
    /// * `st.gate.{0,1}.{weight,bias}`
    pub fn new(
        a_dim: usize,
        s_dim: usize,
        gate_hidden: usize,
        r_std: f64,
        vs: VarBuilder,
    ) -> Result<Self> {
        let action_matrix = candle_nn::linear_no_bias(a_dim, s_dim, vs.pp("st.matrix"))?;

        let mut gate = StackLayers::<Linear>::new();
        gate.push_with_act(
            candle_nn::linear(s_dim, gate_hidden, vs.pp("st.gate.0"))?,
            Act::Tanh,
        );
        gate.push_with_act(
            candle_nn::linear(gate_hidden, s_dim, vs.pp("st.gate.1"))?,
            Act::Sigmoid,
        );

        Ok(Self {
            a_dim,
            s_dim,
            r_std,
            action_matrix,
            gate,
        })
    }

    pub fn dim_action(&self) -> usize {
        self.a_dim
    }

    pub fn dim_state(&self) -> usize {
        self.s_dim
    }

    /// s_0 ~ U[-1, 0) (batch x s)
    pub fn initial_state<R: Rng>(
        &self,
        batch_size: usize,
        dtype: DType,
        device: &Device,
        rng: &mut R,
    ) -> Result<Tensor> {
        uniform_tensor((batch_size, self.s_dim), -1., 0., dtype, device, rng)
    }

    /// One transition
    ///
    /// * `s_prev` - previous state (batch x s)
    /// * `a_t` - one-hot action (batch x a)
    pub fn step<R: Rng>(&self, s_prev: &Tensor, a_t: &Tensor, rng: &mut R) -> Result<Tensor> {
        let m_t = self.action_matrix.forward(a_t)?;
        let gate_t = self.gate.forward(&(s_prev + &m_t)?)?;
        let eps = (randn_tensor(s_prev.shape(), s_prev.dtype(), s_prev.device(), rng)?
            * self.r_std)?;
        (s_prev + m_t.mul(&gate_t)?)? + eps
    }

    /// Observation phase: a random start then `observe_dim - 1` steps
    ///
    /// * `actions` - one-hot actions (batch x a x horizon)
    ///
    /// Returns one (batch x s) state per observed step
    pub fn observe<R: Rng>(
        &self,
        actions: &Tensor,
        observe_dim: usize,
        rng: &mut R,
    ) -> Result<Vec<Tensor>> {
        let batch_size = actions.dim(0)?;
        let mut states = Vec::with_capacity(observe_dim);
        if observe_dim == 0 {
            return Ok(states);
        }

        states.push(self.initial_state(batch_size, actions.dtype(), actions.device(), rng)?);
        for t in 1..observe_dim {
            let s_t = self.step(&states[t - 1], &actions.i((.., .., t))?, rng)?;
            states.push(s_t);
        }
        Ok(states)
    }

    /// Prediction phase: continue from the last observed state
    ///
    /// * `s_last` - final observation-phase state (batch x s)
    /// * `actions` - one-hot actions (batch x a x horizon)
    /// * `observe_dim` - prediction step `t` uses action `observe_dim + t`
    pub fn predict<R: Rng>(
        &self,
        s_last: &Tensor,
        actions: &Tensor,
        observe_dim: usize,
        rng: &mut R,
    ) -> Result<Vec<Tensor>> {
        let horizon = actions.dim(2)?;
        let predict_dim = horizon.saturating_sub(observe_dim);
        let mut states: Vec<Tensor> = Vec::with_capacity(predict_dim);

        for t in 0..predict_dim {
            let s_prev = if t == 0 { s_last } else { &states[t - 1] };
            let s_t = self.step(s_prev, &actions.i((.., .., observe_dim + t))?, rng)?;
            states.push(s_t);
        }
        Ok(states)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random_walk::{random_walk, NUM_ACTIONS};
    use candle_util::candle_nn::VarMap;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn build(r_std: f64, varmap: &VarMap) -> Result<SpatialStateTransition> {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu);
        SpatialStateTransition::new(NUM_ACTIONS, 2, 5, r_std, vb)
    }

    #[test]
    fn phases_have_expected_lengths() -> anyhow::Result<()> {
        let varmap = VarMap::new();
        let st = build(0.001, &varmap)?;
        let mut rng = StdRng::seed_from_u64(0);

        let walk = random_walk(3, 10, 9, &mut rng)?;
        let actions = walk.action_one_hot(DType::F32, &Device::Cpu)?;

        let obs = st.observe(&actions, 6, &mut rng)?;
        let pred = st.predict(&obs[5], &actions, 6, &mut rng)?;
        assert_eq!(obs.len(), 6);
        assert_eq!(pred.len(), 4);
        for s in obs.iter().chain(pred.iter()) {
            assert_eq!(s.dims(), &[3, 2]);
        }

        let s0 = obs[0].flatten_all()?.to_vec1::<f32>()?;
        assert!(s0.iter().all(|&x| (-1. ..0.).contains(&x)));
        Ok(())
    }

    #[test]
    fn noiseless_step_is_bounded_by_the_action_projection() -> Result<()> {
        let varmap = VarMap::new();
        let st = build(0., &varmap)?;
        let mut rng = StdRng::seed_from_u64(1);
        let dev = Device::Cpu;

        let s_prev = Tensor::new(&[[0.3f32, -0.7]], &dev)?;
        let a = Tensor::new(&[[0f32, 0., 1., 0., 0.]], &dev)?;

        let s_next = st.step(&s_prev, &a, &mut rng)?;
        let m = st.action_matrix.forward(&a)?;

        let delta = (s_next - &s_prev)?.abs()?.to_vec2::<f32>()?;
        let bound = m.abs()?.to_vec2::<f32>()?;
        for (d, b) in delta[0].iter().zip(bound[0].iter()) {
            assert!(d <= b);
        }
        Ok(())
    }

    #[test]
    fn zero_projection_freezes_the_state() -> Result<()> {
        let varmap = VarMap::new();
        let st = build(0., &varmap)?;
        for var in varmap.all_vars() {
            var.set(&var.zeros_like()?)?;
        }
        let mut rng = StdRng::seed_from_u64(2);
        let s_prev = Tensor::new(&[[0.25f32, 0.5], [-1., 2.]], &Device::Cpu)?;
        let a = Tensor::new(&[[1f32, 0., 0., 0., 0.], [0., 0., 0., 0., 1.]], &Device::Cpu)?;
        let s_next = st.step(&s_prev, &a, &mut rng)?;
        assert_eq!(s_next.to_vec2::<f32>()?, s_prev.to_vec2::<f32>()?);
        Ok(())
    }
}
