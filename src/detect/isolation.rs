//! Isolation forest over a dense feature matrix.
//!
//! Each tree is grown on a random subsample by picking a random feature and a
//! random split value between that feature's min and max, until a point is
//! isolated or the height limit `ceil(log2(psi))` is hit. Points that need
//! few splits to isolate are outliers.
//!
//! Scores follow the usual convention `-2^(-E[h(x)] / c(psi))`: values lie in
//! `[-1, 0)` and LOWER means MORE anomalous.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Expected path length of an unsuccessful BST search among `n` points.
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

#[derive(Debug, Clone)]
pub struct IsolationTree {
    root: Node,
}

impl IsolationTree {
    fn grow(data: &[Vec<f64>], rows: Vec<usize>, height_limit: usize, rng: &mut StdRng) -> Self {
        Self {
            root: grow_node(data, rows, 0, height_limit, rng),
        }
    }

    /// Path length of `x`, with the unbuilt subtree estimate added at leaves.
    pub fn path_length(&self, x: &[f64]) -> f64 {
        let mut node = &self.root;
        let mut depth = 0.0;
        loop {
            match node {
                Node::Leaf { size } => return depth + average_path_length(*size),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if x[*feature] <= *threshold { left } else { right };
                    depth += 1.0;
                }
            }
        }
    }
}

fn grow_node(
    data: &[Vec<f64>],
    rows: Vec<usize>,
    depth: usize,
    height_limit: usize,
    rng: &mut StdRng,
) -> Node {
    if depth >= height_limit || rows.len() <= 1 {
        return Node::Leaf { size: rows.len() };
    }

    let n_features = data[rows[0]].len();
    let splittable: Vec<(usize, f64, f64)> = (0..n_features)
        .filter_map(|f| {
            let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
                (lo.min(data[r][f]), hi.max(data[r][f]))
            });
            (hi > lo).then_some((f, lo, hi))
        })
        .collect();

    // Every remaining point is identical on every feature.
    if splittable.is_empty() {
        return Node::Leaf { size: rows.len() };
    }

    let (feature, lo, hi) = splittable[rng.gen_range(0..splittable.len())];
    let threshold = split_value(lo, hi, rng.gen());
    let (left, right): (Vec<usize>, Vec<usize>) =
        rows.into_iter().partition(|&r| data[r][feature] <= threshold);

    Node::Split {
        feature,
        threshold,
        left: Box::new(grow_node(data, left, depth + 1, height_limit, rng)),
        right: Box::new(grow_node(data, right, depth + 1, height_limit, rng)),
    }
}

/// Point at fraction `u` of `[lo, hi)`. Interpolates instead of forming
/// `hi - lo`, which overflows for spans wider than `f64::MAX`.
fn split_value(lo: f64, hi: f64, u: f64) -> f64 {
    let t = lo * (1.0 - u) + hi * u;
    if t >= lo && t < hi {
        t
    } else {
        lo
    }
}

#[derive(Debug, Clone)]
pub struct IsolationForest {
    pub n_trees: usize,
    pub max_samples: usize,
    trees: Vec<IsolationTree>,
    sample_size: usize,
}

impl IsolationForest {
    pub fn new(n_trees: usize, max_samples: usize) -> Self {
        Self {
            n_trees: n_trees.max(1),
            max_samples: max_samples.max(1),
            trees: Vec::new(),
            sample_size: 0,
        }
    }

    /// Grow the forest on `data` (rows of equal width). Same seed and same
    /// data always yield the same forest.
    pub fn fit(&mut self, data: &[Vec<f64>], seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        self.sample_size = self.max_samples.min(data.len());
        let height_limit = (self.sample_size.max(2) as f64).log2().ceil() as usize;

        self.trees = (0..self.n_trees)
            .map(|_| {
                let rows = index::sample(&mut rng, data.len(), self.sample_size).into_vec();
                IsolationTree::grow(data, rows, height_limit, &mut rng)
            })
            .collect();
    }

    /// Isolation score of each row. Lower is more anomalous.
    pub fn score_samples(&self, data: &[Vec<f64>]) -> Vec<f64> {
        let norm = average_path_length(self.sample_size);
        data.iter()
            .map(|x| {
                let mean_depth = self.trees.iter().map(|t| t.path_length(x)).sum::<f64>()
                    / self.trees.len() as f64;
                // A single-point sample has no meaningful normaliser.
                let ratio = if norm > 0.0 { mean_depth / norm } else { 1.0 };
                -(2f64.powf(-ratio))
            })
            .collect()
    }

    /// Fit, score, and flag the `contamination` fraction with the lowest scores.
    /// Returns the scores and per-row outlier flags.
    pub fn fit_predict(
        &mut self,
        data: &[Vec<f64>],
        seed: u64,
        contamination: f64,
    ) -> (Vec<f64>, Vec<bool>) {
        self.fit(data, seed);
        let scores = self.score_samples(data);
        let threshold = percentile(&scores, contamination * 100.0);
        let flags = scores.iter().map(|&s| s < threshold).collect();
        (scores, flags)
    }
}

/// Linear-interpolated percentile (`q` in `[0, 100]`) of `values`.
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}
