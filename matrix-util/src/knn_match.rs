use instant_distance::{Builder, HnswMap, Search};
use log::debug;

/// A dictionary (HnswMap wrapper) for fast point look-up
///
/// Points keep their insertion order as values, so a search hands back
/// the row index of each neighbour in the input point list.
pub struct PointDict {
    pub dict: HnswMap<VecPoint, usize>,
    pub data_vec: Vec<VecPoint>,
    ef_search: usize,
}

/// Output of a k-nearest neighbour search, closest first
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KnnOut {
    pub indices: Vec<usize>,
    pub distances: Vec<f32>,
}

impl PointDict {
    /// Build a dictionary over `points`
    ///
    /// * `points` - each item is one point; all must share a dimension
    /// * `seed` - seed of the graph layer assignment
    ///
    /// The search beam is at least the number of points, which makes
    /// queries on memory-sized dictionaries exhaustive over the graph.
    pub fn from_points<V>(points: &[V], seed: u64) -> anyhow::Result<Self>
    where
        V: MakeVecPoint,
    {
        let data_vec = points.iter().map(|x| x.to_vp()).collect::<Vec<_>>();

        if let Some(first) = data_vec.first() {
            let dim = first.data.len();
            if data_vec.iter().any(|x| x.data.len() != dim) {
                return Err(anyhow::anyhow!("points must share the same dimension"));
            }
        }

        let ef_search = data_vec.len().max(DEFAULT_EF_SEARCH);
        let names = (0..data_vec.len()).collect::<Vec<_>>();

        let dict = Builder::default()
            .ef_search(ef_search)
            .seed(seed)
            .build(data_vec.clone(), names);

        debug!(
            "point dictionary: {} points, ef_search {}",
            data_vec.len(),
            ef_search
        );

        Ok(PointDict {
            dict,
            data_vec,
            ef_search,
        })
    }

    pub fn len(&self) -> usize {
        self.data_vec.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data_vec.is_empty()
    }

    /// k-nearest neighbour search of one query point
    ///
    /// * `query` - the query point
    /// * `knn` - the number of nearest neighbours to return
    ///
    pub fn search_knn<V>(&self, query: &V, knn: usize) -> anyhow::Result<KnnOut>
    where
        V: MakeVecPoint + ?Sized,
    {
        let query = query.to_vp();

        if let Some(first) = self.data_vec.first() {
            if first.data.len() != query.data.len() {
                return Err(anyhow::anyhow!(
                    "query dimension {} != dictionary dimension {}",
                    query.data.len(),
                    first.data.len()
                ));
            }
        }

        let nquery = knn.min(self.data_vec.len());
        let mut search = Search::default();

        let mut ret = KnnOut {
            indices: Vec::with_capacity(nquery),
            distances: Vec::with_capacity(nquery),
        };

        for item in self.dict.search(&query, &mut search).take(nquery) {
            ret.indices.push(*item.value);
            ret.distances.push(item.distance);
        }
        Ok(ret)
    }
}

const DEFAULT_EF_SEARCH: usize = 100;

#[derive(Clone, Debug)]
/// a wrapper for Vec<f32>
pub struct VecPoint {
    pub data: Vec<f32>,
}

pub trait MakeVecPoint {
    fn to_vp(&self) -> VecPoint;
}

impl MakeVecPoint for Vec<f32> {
    fn to_vp(&self) -> VecPoint {
        VecPoint { data: self.clone() }
    }
}

impl MakeVecPoint for [f32] {
    fn to_vp(&self) -> VecPoint {
        VecPoint {
            data: self.to_vec(),
        }
    }
}

impl MakeVecPoint for VecPoint {
    fn to_vp(&self) -> VecPoint {
        self.clone()
    }
}

impl instant_distance::Point for VecPoint {
    fn distance(&self, other: &Self) -> f32 {
        self.data
            .iter()
            .zip(other.data.iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f32>()
            .sqrt()
    }
}
