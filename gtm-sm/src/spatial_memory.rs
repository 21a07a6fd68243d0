use crate::error::{GtmError, Result};
use candle_util::candle_core::{DType, Tensor};
use log::debug;
use matrix_util::knn_match::PointDict;
use rayon::prelude::*;

/// Memories retrieved for every prediction step of one sample
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RetrievalResult {
    /// observation-phase steps, closest first (prediction steps x K)
    pub indices: Vec<Vec<usize>>,
    /// squared Euclidean distances aligned with `indices`
    pub sq_distances: Vec<Vec<f32>>,
}

impl RetrievalResult {
    pub fn num_steps(&self) -> usize {
        self.indices.len()
    }

    /// row-major (prediction steps * K) indices for `index_select`
    pub fn flat_indices(&self) -> Vec<u32> {
        self.indices
            .iter()
            .flat_map(|row| row.iter().map(|&i| i as u32))
            .collect()
    }
}

/// Nearest-neighbour index over one sample's observation-phase states
///
/// Built fresh for every forward pass and dropped afterwards.
pub struct SpatialMemoryIndex {
    dict: PointDict,
}

impl SpatialMemoryIndex {
    /// * `observed` - one state vector per observation step
    /// * `seed` - seed of the graph construction
    pub fn build(observed: &[Vec<f32>], seed: u64) -> Result<Self> {
        let dict =
            PointDict::from_points(observed, seed).map_err(|e| GtmError::Knn(e.to_string()))?;
        Ok(Self { dict })
    }

    pub fn len(&self) -> usize {
        self.dict.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dict.is_empty()
    }

    /// Retrieve the `knn` closest memories of every query
    pub fn query(&self, queries: &[Vec<f32>], knn: usize) -> Result<RetrievalResult> {
        if knn > self.len() {
            return Err(GtmError::Knn(format!(
                "asked for {} neighbours among {} memories",
                knn,
                self.len()
            )));
        }

        let mut ret = RetrievalResult {
            indices: Vec::with_capacity(queries.len()),
            sq_distances: Vec::with_capacity(queries.len()),
        };

        for q in queries {
            let found = self
                .dict
                .search_knn(q, knn)
                .map_err(|e| GtmError::Knn(e.to_string()))?;
            ret.sq_distances
                .push(found.distances.iter().map(|d| d * d).collect());
            ret.indices.push(found.indices);
        }
        Ok(ret)
    }
}

/// Regroup per-step (batch x s) tensors into `[batch][step][s]`
pub fn states_by_sample(states: &[Tensor]) -> Result<Vec<Vec<Vec<f32>>>> {
    if states.is_empty() {
        return Ok(vec![]);
    }
    let tbs = Tensor::stack(states, 0)?
        .detach()
        .to_dtype(DType::F32)?
        .to_vec3::<f32>()?;

    let nb = tbs[0].len();
    let mut ret = vec![Vec::with_capacity(tbs.len()); nb];
    for step in tbs.into_iter() {
        for (b, s) in step.into_iter().enumerate() {
            ret[b].push(s);
        }
    }
    Ok(ret)
}

/// Build one index per sample and query it with that sample's
/// prediction-phase states
///
/// * `observed` - observation-phase states, one (batch x s) per step
/// * `predicted` - prediction-phase states, one (batch x s) per step
/// * `knn` - neighbours per prediction step
/// * `seed` - sample `b` builds its graph with `seed + b`
pub fn retrieve_memories(
    observed: &[Tensor],
    predicted: &[Tensor],
    knn: usize,
    seed: u64,
) -> Result<Vec<RetrievalResult>> {
    let obs_bts = states_by_sample(observed)?;
    let pred_bts = states_by_sample(predicted)?;

    if obs_bts.len() != pred_bts.len() && !pred_bts.is_empty() {
        return Err(GtmError::Knn(format!(
            "{} observed samples but {} predicted samples",
            obs_bts.len(),
            pred_bts.len()
        )));
    }

    let results = obs_bts
        .par_iter()
        .enumerate()
        .map(|(b, obs_ts)| -> Result<RetrievalResult> {
            let index = SpatialMemoryIndex::build(obs_ts, seed.wrapping_add(b as u64))?;
            match pred_bts.get(b) {
                Some(pred_ts) => index.query(pred_ts, knn),
                None => Ok(RetrievalResult::default()),
            }
        })
        .collect::<Result<Vec<_>>>()?;

    debug!(
        "retrieved {} memories for {} samples",
        results.iter().map(|r| r.num_steps() * knn).sum::<usize>(),
        results.len()
    );

    Ok(results)
}
