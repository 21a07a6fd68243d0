//! Random walks over the patch grid.
//!
//! A walker starts at a uniformly random cell and repeatedly commits to
//! one of four moves for a Poisson(2) number of steps. A move that would
//! leave the grid is replaced by `Stop` for the rest of its segment.

use crate::error::{config_error, GtmError, Result};
use candle_util::candle_core::{DType, Device, Tensor};
use rand::Rng;
use rand_distr::{Distribution, Poisson};

/// four moves and stop
pub const NUM_ACTIONS: usize = 5;

/// draws allowed when looking for an on-grid move
pub const MAX_REJECTION_ATTEMPTS: usize = 1000;

const MEAN_SEGMENT_LENGTH: f64 = 2.0;

/// Grid positions are `[row, col]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    /// col + 1
    Right = 0,
    /// col - 1
    Left = 1,
    /// row - 1
    Up = 2,
    /// row + 1
    Down = 3,
    Stop = 4,
}

impl Action {
    pub const MOVES: [Action; 4] = [Action::Right, Action::Left, Action::Up, Action::Down];

    pub fn label(self) -> usize {
        self as usize
    }

    pub fn from_label(label: usize) -> Option<Action> {
        match label {
            0 => Some(Action::Right),
            1 => Some(Action::Left),
            2 => Some(Action::Up),
            3 => Some(Action::Down),
            4 => Some(Action::Stop),
            _ => None,
        }
    }

    /// The cell reached from `pos`, or `None` if it is off the grid
    pub fn step(self, pos: [usize; 2], grid_size: usize) -> Option<[usize; 2]> {
        let [row, col] = pos;
        match self {
            Action::Right if col + 1 < grid_size => Some([row, col + 1]),
            Action::Left if col > 0 => Some([row, col - 1]),
            Action::Up if row > 0 => Some([row - 1, col]),
            Action::Down if row + 1 < grid_size => Some([row + 1, col]),
            Action::Stop => Some(pos),
            _ => None,
        }
    }
}

/// One walker's rollout, indexed by timestep
#[derive(Clone, Debug, PartialEq)]
pub struct Trajectory {
    pub positions: Vec<[usize; 2]>,
    pub actions: Vec<Action>,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Rollouts of every sample in a batch, all of the same horizon
#[derive(Clone, Debug, PartialEq)]
pub struct WalkBatch {
    pub walks: Vec<Trajectory>,
    pub horizon: usize,
}

impl WalkBatch {
    pub fn batch_size(&self) -> usize {
        self.walks.len()
    }

    /// `[row, col]` of sample `b` at step `t`
    pub fn position(&self, b: usize, t: usize) -> [usize; 2] {
        self.walks[b].positions[t]
    }

    /// integer action labels (batch x horizon)
    pub fn action_labels(&self) -> Vec<Vec<usize>> {
        self.walks
            .iter()
            .map(|w| w.actions.iter().map(|a| a.label()).collect())
            .collect()
    }

    /// one-hot actions (batch x a x horizon)
    pub fn action_one_hot(&self, dtype: DType, device: &Device) -> Result<Tensor> {
        let (nb, nt) = (self.batch_size(), self.horizon);
        let mut data = vec![0f32; nb * NUM_ACTIONS * nt];
        for (b, walk) in self.walks.iter().enumerate() {
            for (t, a) in walk.actions.iter().enumerate() {
                data[b * NUM_ACTIONS * nt + a.label() * nt + t] = 1.;
            }
        }
        Ok(Tensor::from_vec(data, (nb, NUM_ACTIONS, nt), device)?.to_dtype(dtype)?)
    }

    /// one-hot actions at step `t` (batch x a)
    pub fn action_one_hot_at(&self, t: usize, dtype: DType, device: &Device) -> Result<Tensor> {
        let nb = self.batch_size();
        let mut data = vec![0f32; nb * NUM_ACTIONS];
        for (b, walk) in self.walks.iter().enumerate() {
            data[b * NUM_ACTIONS + walk.actions[t].label()] = 1.;
        }
        Ok(Tensor::from_vec(data, (nb, NUM_ACTIONS), device)?.to_dtype(dtype)?)
    }
}

/// An action being carried out over several steps
#[derive(Clone, Debug, PartialEq)]
struct Segment {
    action: Action,
    remaining: i64,
    blocked: bool,
}

impl Segment {
    fn draw<R: Rng>(
        pos: [usize; 2],
        grid_size: usize,
        duration: &Poisson<f64>,
        rng: &mut R,
    ) -> Result<Self> {
        let action = draw_valid_move(pos, grid_size, rng)?;
        let remaining = duration.sample(rng) as i64;
        Ok(Self {
            action,
            remaining,
            blocked: false,
        })
    }

    fn is_exhausted(&self) -> bool {
        self.remaining <= 0
    }

    /// Take one step from `prev`.
    ///
    /// Once blocked by the boundary the segment only stops, and its
    /// duration keeps draining while it does.
    fn advance(&mut self, prev: [usize; 2], grid_size: usize) -> ([usize; 2], Action) {
        let out = if self.remaining > 0 && !self.blocked {
            match self.action.step(prev, grid_size) {
                Some(next) => (next, self.action),
                None => {
                    self.blocked = true;
                    (prev, Action::Stop)
                }
            }
        } else {
            (prev, Action::Stop)
        };
        self.remaining -= 1;
        out
    }
}

/// Draw a move uniformly among the four, rejecting off-grid ones
pub fn draw_valid_move<R: Rng>(pos: [usize; 2], grid_size: usize, rng: &mut R) -> Result<Action> {
    for _ in 0..MAX_REJECTION_ATTEMPTS {
        let action = Action::MOVES[rng.random_range(0..Action::MOVES.len())];
        if action.step(pos, grid_size).is_some() {
            return Ok(action);
        }
    }
    Err(GtmError::BoundaryRejectionExhausted {
        attempts: MAX_REJECTION_ATTEMPTS,
        position: pos,
    })
}

fn sample_trajectory<R: Rng>(
    horizon: usize,
    grid_size: usize,
    duration: &Poisson<f64>,
    rng: &mut R,
) -> Result<Trajectory> {
    let mut positions = Vec::with_capacity(horizon);
    let mut actions = Vec::with_capacity(horizon);

    if horizon == 0 {
        return Ok(Trajectory { positions, actions });
    }

    let row = rng.random_range(0..grid_size);
    let col = rng.random_range(0..grid_size);
    positions.push([row, col]);
    actions.push(Action::Stop);

    let mut segment: Option<Segment> = None;

    for t in 1..horizon {
        let prev = positions[t - 1];

        let mut seg = match segment.take() {
            Some(seg) if !seg.is_exhausted() => seg,
            _ => Segment::draw(prev, grid_size, duration, rng)?,
        };

        let (pos, action) = seg.advance(prev, grid_size);
        positions.push(pos);
        actions.push(action);
        segment = Some(seg);
    }

    Ok(Trajectory { positions, actions })
}

/// Sample one random walk per batch element
///
/// * `batch_size` - number of walkers
/// * `horizon` - steps per walk, including the starting cell
/// * `grid_size` - side length of the square grid
/// * `rng` - the only source of randomness
pub fn random_walk<R: Rng>(
    batch_size: usize,
    horizon: usize,
    grid_size: usize,
    rng: &mut R,
) -> Result<WalkBatch> {
    if grid_size < 2 {
        return Err(config_error(format!(
            "a walk needs a grid of at least 2 x 2, got {}",
            grid_size
        )));
    }

    let duration = Poisson::new(MEAN_SEGMENT_LENGTH)
        .map_err(|e| config_error(format!("segment length: {}", e)))?;

    let walks = (0..batch_size)
        .map(|_| sample_trajectory(horizon, grid_size, &duration, rng))
        .collect::<Result<Vec<_>>>()?;

    Ok(WalkBatch { walks, horizon })
}
