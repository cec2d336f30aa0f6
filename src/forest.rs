use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy)]
pub struct ForestParams {
    pub n_trees: usize,
    pub seed: u64,
    /// `None` grows until leaves are pure.
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 400,
            seed: 42,
            max_depth: None,
            min_samples_split: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    pub fn predict(&self, x: &[f64]) -> f64 {
        let mut at = 0;
        loop {
            match self.nodes[at] {
                Node::Leaf { value } => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    at = if x[feature] <= threshold { left } else { right };
                }
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// Bagged ensemble of squared-error regression trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<RegressionTree>,
}

impl RandomForest {
    /// Fits one tree per bootstrap sample. Panics if `x` and `y` differ in
    /// length; callers guarantee a non-empty training set.
    pub fn fit<const N: usize>(x: &[[f64; N]], y: &[f64], params: ForestParams) -> Self {
        assert_eq!(x.len(), y.len(), "feature and target rows must align");
        let n = x.len();
        let mut rng = StdRng::seed_from_u64(params.seed);
        let trees = (0..params.n_trees)
            .map(|_| {
                let mut sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                let mut builder = TreeBuilder {
                    x,
                    y,
                    params,
                    nodes: Vec::new(),
                };
                builder.grow(&mut sample, 0);
                RegressionTree {
                    nodes: builder.nodes,
                }
            })
            .collect();
        Self { trees }
    }

    pub fn predict(&self, x: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        let total: f64 = self.trees.iter().map(|tree| tree.predict(x)).sum();
        total / self.trees.len() as f64
    }

    pub fn trees(&self) -> &[RegressionTree] {
        &self.trees
    }
}

struct TreeBuilder<'a, const N: usize> {
    x: &'a [[f64; N]],
    y: &'a [f64],
    params: ForestParams,
    nodes: Vec<Node>,
}

struct Split {
    feature: usize,
    threshold: f64,
}

impl<const N: usize> TreeBuilder<'_, N> {
    fn grow(&mut self, rows: &mut [usize], depth: usize) -> usize {
        let id = self.nodes.len();
        let mean = rows.iter().map(|&i| self.y[i]).sum::<f64>() / rows.len() as f64;
        self.nodes.push(Node::Leaf { value: mean });

        let depth_reached = self.params.max_depth.is_some_and(|max| depth >= max);
        if rows.len() < self.params.min_samples_split || depth_reached {
            return id;
        }
        let Some(split) = self.best_split(rows) else {
            return id;
        };

        let x = self.x;
        rows.sort_by(|&a, &b| x[a][split.feature].total_cmp(&x[b][split.feature]));
        let mid = rows.partition_point(|&i| x[i][split.feature] <= split.threshold);
        let (left_rows, right_rows) = rows.split_at_mut(mid);
        let left = self.grow(left_rows, depth + 1);
        let right = self.grow(right_rows, depth + 1);
        self.nodes[id] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        id
    }

    /// Maximises sum_left^2/n_left + sum_right^2/n_right, which is the same
    /// as minimising the children's squared error.
    fn best_split(&self, rows: &[usize]) -> Option<Split> {
        let n = rows.len();
        let total: f64 = rows.iter().map(|&i| self.y[i]).sum();
        let mut best_score = total * total / n as f64;
        let mut best = None;
        let mut order = rows.to_vec();

        for feature in 0..N {
            order.sort_by(|&a, &b| self.x[a][feature].total_cmp(&self.x[b][feature]));
            let mut left_sum = 0.0;
            for k in 1..n {
                left_sum += self.y[order[k - 1]];
                let lo = self.x[order[k - 1]][feature];
                let hi = self.x[order[k]][feature];
                if hi <= lo {
                    continue;
                }
                let right_sum = total - left_sum;
                let score = left_sum * left_sum / k as f64 + right_sum * right_sum / (n - k) as f64;
                if score > best_score + 1e-9 {
                    best_score = score;
                    let mut threshold = (lo + hi) / 2.0;
                    if threshold >= hi {
                        threshold = lo;
                    }
                    best = Some(Split { feature, threshold });
                }
            }
        }
        best
    }
}
