//! Agglomerative (average-linkage) clustering over either matrix axis, and
//! the metadata-driven ordering used when sample clustering is disabled.

use crate::assembler::FeatureMatrix;
use crate::config::HeatmapConfig;
use crate::metadata::{SampleMetadata, MISSING};
use log::debug;
use rayon::prelude::*;
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    /// Features.
    Rows,
    /// Samples.
    Columns,
}

/// One agglomeration step. Leaves are nodes `0..n`, the k-th merge is node `n + k`.
#[derive(Debug, Clone, PartialEq)]
pub struct Merge {
    pub left: usize,
    pub right: usize,
    pub height: f64,
    pub size: usize,
}

/// U-shaped connector in leaf coordinates: x = 5 + 10 * leaf position, y = merge height.
#[derive(Debug, Clone, PartialEq)]
pub struct DendrogramSegment {
    pub x: [f64; 4],
    pub y: [f64; 4],
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dendrogram {
    /// Leaf labels in original axis order.
    labels: Vec<String>,
    merges: Vec<Merge>,
    /// Leaf order as indices into `labels`.
    order: Vec<usize>,
    clustered: bool,
}

impl Dendrogram {
    /// A dendrogram with a fixed leaf order and no tree above it.
    pub fn from_order(labels: Vec<String>, order: Vec<usize>) -> Self {
        Dendrogram {
            labels,
            merges: Vec::new(),
            order,
            clustered: false,
        }
    }

    fn from_merges(labels: Vec<String>, merges: Vec<Merge>) -> Self {
        let order = leaf_order(labels.len(), &merges);
        Dendrogram {
            labels,
            merges,
            order,
            clustered: true,
        }
    }

    /// Order samples by condition (configured order, else lexicographic),
    /// ties broken by sample identifier.
    pub fn by_condition(
        samples: &[String],
        metadata: &SampleMetadata,
        config: &HeatmapConfig,
    ) -> Self {
        let conditions: Vec<&str> = samples
            .iter()
            .map(|s| metadata.condition_of(s).unwrap_or(MISSING))
            .collect();
        let labels: Vec<String> = conditions.iter().map(|c| c.to_string()).collect();
        let rank: FxHashMap<String, usize> = config
            .order_conditions(&labels)
            .into_iter()
            .enumerate()
            .map(|(i, c)| (c, i))
            .collect();

        let mut order: Vec<usize> = (0..samples.len()).collect();
        order.sort_by(|&a, &b| {
            rank[conditions[a]]
                .cmp(&rank[conditions[b]])
                .then_with(|| samples[a].cmp(&samples[b]))
        });
        Dendrogram::from_order(samples.to_vec(), order)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn merges(&self) -> &[Merge] {
        &self.merges
    }

    pub fn leaves(&self) -> &[usize] {
        &self.order
    }

    /// Whether the order comes from clustering (and a tree can be drawn).
    pub fn is_clustered(&self) -> bool {
        self.clustered
    }

    pub fn ordered_labels(&self) -> Vec<String> {
        self.order.iter().map(|&i| self.labels[i].clone()).collect()
    }

    /// True when the leaf order is a permutation of `0..len`.
    pub fn is_permutation(&self) -> bool {
        let mut seen = vec![false; self.labels.len()];
        self.order.len() == self.labels.len()
            && self.order.iter().all(|&i| i < seen.len() && !std::mem::replace(&mut seen[i], true))
    }

    pub fn max_height(&self) -> f64 {
        self.merges.iter().map(|m| m.height).fold(0.0, f64::max)
    }

    /// Connector lines for every merge, in merge order.
    pub fn segments(&self) -> Vec<DendrogramSegment> {
        let n = self.labels.len();
        let mut x = vec![0.0; n + self.merges.len()];
        let mut y = vec![0.0; n + self.merges.len()];
        for (pos, &leaf) in self.order.iter().enumerate() {
            x[leaf] = 5.0 + 10.0 * pos as f64;
        }
        self.merges
            .iter()
            .enumerate()
            .map(|(k, m)| {
                let node = n + k;
                x[node] = (x[m.left] + x[m.right]) / 2.0;
                y[node] = m.height;
                DendrogramSegment {
                    x: [x[m.left], x[m.left], x[m.right], x[m.right]],
                    y: [y[m.left], m.height, m.height, y[m.right]],
                }
            })
            .collect()
    }

    /// Drop leaves where `keep` is false; unary nodes collapse into their
    /// surviving child so the remaining order is unchanged.
    pub fn prune(&self, keep: &[bool]) -> Dendrogram {
        let n = self.labels.len();
        let mut node_map: Vec<Option<usize>> = Vec::with_capacity(n + self.merges.len());
        let mut labels = Vec::new();
        for (i, label) in self.labels.iter().enumerate() {
            if keep[i] {
                node_map.push(Some(labels.len()));
                labels.push(label.clone());
            } else {
                node_map.push(None);
            }
        }

        if !self.clustered {
            let order = self.order.iter().filter_map(|&i| node_map[i]).collect();
            return Dendrogram::from_order(labels, order);
        }

        let m = labels.len();
        let mut merges = Vec::new();
        for merge in &self.merges {
            let mapped = match (node_map[merge.left], node_map[merge.right]) {
                (Some(l), Some(r)) => {
                    let size = node_size(m, &merges, l) + node_size(m, &merges, r);
                    merges.push(Merge {
                        left: l,
                        right: r,
                        height: merge.height,
                        size,
                    });
                    Some(m + merges.len() - 1)
                }
                (Some(only), None) | (None, Some(only)) => Some(only),
                (None, None) => None,
            };
            node_map.push(mapped);
        }
        Dendrogram::from_merges(labels, merges)
    }
}

fn node_size(n: usize, merges: &[Merge], node: usize) -> usize {
    if node < n {
        1
    } else {
        merges[node - n].size
    }
}

/// Left-to-right leaf traversal from the root.
fn leaf_order(n: usize, merges: &[Merge]) -> Vec<usize> {
    if merges.is_empty() {
        return (0..n).collect();
    }
    let mut order = Vec::with_capacity(n);
    let mut stack = vec![n + merges.len() - 1];
    while let Some(node) = stack.pop() {
        if node < n {
            order.push(node);
        } else {
            let m = &merges[node - n];
            stack.push(m.right);
            stack.push(m.left);
        }
    }
    order
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Full pairwise distance matrix; upper triangle computed in parallel.
fn distance_matrix(vectors: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let n = vectors.len();
    let pairs: Vec<(usize, usize, f64)> = (0..n)
        .into_par_iter()
        .flat_map(|i| {
            (i + 1..n)
                .map(|j| (i, j, euclidean(&vectors[i], &vectors[j])))
                .collect::<Vec<_>>()
        })
        .collect();

    let mut dist = vec![vec![0.0; n]; n];
    for (i, j, d) in pairs {
        dist[i][j] = d;
        dist[j][i] = d;
    }
    dist
}

/// Average-linkage clustering of the given axis. Equal distances merge the
/// pair with the lowest (smaller id, larger id) first.
pub fn cluster_axis(matrix: &FeatureMatrix, axis: Axis) -> Dendrogram {
    let (labels, vectors): (Vec<String>, Vec<Vec<f64>>) = match axis {
        Axis::Rows => (
            matrix.features().to_vec(),
            (0..matrix.n_rows()).map(|i| matrix.row(i).to_vec()).collect(),
        ),
        Axis::Columns => (
            matrix.samples().to_vec(),
            (0..matrix.n_cols()).map(|j| matrix.column(j)).collect(),
        ),
    };
    let dendrogram = Dendrogram::from_merges(labels, average_linkage(&vectors));
    debug!(
        "Clustered {:?}: {} leaves, max height {:.3}",
        axis,
        dendrogram.len(),
        dendrogram.max_height()
    );
    dendrogram
}

pub fn average_linkage(vectors: &[Vec<f64>]) -> Vec<Merge> {
    let n = vectors.len();
    if n < 2 {
        return Vec::new();
    }
    let mut dist = distance_matrix(vectors);
    // slot -> current cluster id and size; merged clusters reuse the lower slot
    let mut ids: Vec<usize> = (0..n).collect();
    let mut sizes: Vec<usize> = vec![1; n];
    let mut active: Vec<bool> = vec![true; n];
    let mut merges = Vec::with_capacity(n - 1);

    for step in 0..n - 1 {
        let mut best: Option<(f64, (usize, usize), usize, usize)> = None;
        for a in 0..n {
            if !active[a] {
                continue;
            }
            for b in (a + 1)..n {
                if !active[b] {
                    continue;
                }
                let d = dist[a][b];
                let key = (ids[a].min(ids[b]), ids[a].max(ids[b]));
                let better = match best {
                    None => true,
                    Some((bd, bkey, _, _)) => d < bd || (d == bd && key < bkey),
                };
                if better {
                    best = Some((d, key, a, b));
                }
            }
        }
        let Some((height, (left, right), a, b)) = best else {
            break;
        };

        let size = sizes[a] + sizes[b];
        for c in 0..n {
            if active[c] && c != a && c != b {
                let d = (sizes[a] as f64 * dist[a][c] + sizes[b] as f64 * dist[b][c]) / size as f64;
                dist[a][c] = d;
                dist[c][a] = d;
            }
        }
        active[b] = false;
        ids[a] = n + step;
        sizes[a] = size;

        debug!("merge {}: {} + {} at {:.4}", n + step, left, right, height);
        merges.push(Merge {
            left,
            right,
            height,
            size,
        });
    }
    merges
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    /// Five points on a line: a=0 b=1 c=5 d=6 e=20.
    fn line_matrix() -> FeatureMatrix {
        FeatureMatrix::from_rows(
            ids(&["a", "b", "c", "d", "e"]),
            ids(&["s"]),
            vec![vec![0.0], vec![1.0], vec![5.0], vec![6.0], vec![20.0]],
        )
        .unwrap()
    }

    #[test]
    fn average_linkage_on_a_line() {
        let d = cluster_axis(&line_matrix(), Axis::Rows);
        let merges = d.merges();
        assert_eq!(merges.len(), 4);
        // a-b and c-d tie at 1.0; the older pair merges first
        assert_eq!((merges[0].left, merges[0].right, merges[0].height), (0, 1, 1.0));
        assert_eq!((merges[1].left, merges[1].right, merges[1].height), (2, 3, 1.0));
        assert_eq!((merges[2].left, merges[2].right, merges[2].height), (5, 6, 5.0));
        assert_eq!((merges[3].left, merges[3].right, merges[3].height), (4, 7, 17.0));
        assert_eq!(merges[3].size, 5);
        assert_eq!(d.leaves(), &[4, 0, 1, 2, 3]);
        assert_eq!(d.ordered_labels(), ids(&["e", "a", "b", "c", "d"]));
        assert!(d.is_permutation());
        assert!(d.is_clustered());
    }

    #[test]
    fn clustering_is_deterministic() {
        let m = FeatureMatrix::from_rows(
            ids(&["g1", "g2", "g3"]),
            ids(&["s1", "s2", "s3", "s4"]),
            vec![
                vec![1.0, 1.0, -1.0, -1.0],
                vec![-1.0, -1.0, 1.0, 1.0],
                vec![1.0, -1.0, 1.0, -1.0],
            ],
        )
        .unwrap();
        let first = cluster_axis(&m, Axis::Columns);
        let second = cluster_axis(&m, Axis::Columns);
        assert_eq!(first, second);
        assert_eq!(first.len(), 4);
        assert!(first.is_permutation());
    }

    #[test]
    fn single_leaf_is_trivial() {
        let rows = vec![vec![0.0], vec![1.0]];
        let m = FeatureMatrix::from_rows(ids(&["g1", "g2"]), ids(&["s1"]), rows).unwrap();
        let d = cluster_axis(&m, Axis::Columns);
        assert_eq!(d.leaves(), &[0]);
        assert!(d.merges().is_empty());
        assert!(d.segments().is_empty());
    }

    #[test]
    fn segments_follow_leaf_positions() {
        let d = cluster_axis(&line_matrix(), Axis::Rows);
        let segs = d.segments();
        assert_eq!(segs.len(), 4);
        // a (position 1) joins b (position 2) at height 1
        assert_eq!(segs[0].x, [15.0, 15.0, 25.0, 25.0]);
        assert_eq!(segs[0].y, [0.0, 1.0, 1.0, 0.0]);
        // root joins e (position 0) with the a..d subtree centred at 30
        assert_eq!(segs[3].x, [5.0, 5.0, 30.0, 30.0]);
        assert_eq!(segs[3].y, [0.0, 17.0, 17.0, 5.0]);
    }

    #[test]
    fn prune_keeps_relative_order() {
        let d = cluster_axis(&line_matrix(), Axis::Rows);
        let pruned = d.prune(&[true, true, false, true, true]);
        assert_eq!(pruned.ordered_labels(), ids(&["e", "a", "b", "d"]));
        assert_eq!(pruned.merges().len(), 3);
        assert_eq!(pruned.merges()[2].size, 4);
        assert!(pruned.is_permutation());
        assert!(pruned.is_clustered());
    }

    #[test]
    fn order_by_condition() {
        let metadata = SampleMetadata::new(
            ids(&["s1", "s2", "s3", "s4"]),
            ids(&["B", "A", "B", "A"]),
        )
        .unwrap();
        let samples = ids(&["s3", "s1", "s4", "s2"]);
        let mut config = HeatmapConfig::default();

        let d = Dendrogram::by_condition(&samples, &metadata, &config);
        assert_eq!(d.ordered_labels(), ids(&["s2", "s4", "s1", "s3"]));
        assert!(!d.is_clustered());

        config.sorted_conditions = true;
        config.condition_list = ids(&["B", "A"]);
        let d = Dendrogram::by_condition(&samples, &metadata, &config);
        assert_eq!(d.ordered_labels(), ids(&["s1", "s3", "s2", "s4"]));
    }
}
