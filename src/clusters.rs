use std::collections::VecDeque;

pub const TFCE_E: f64 = 0.5;
pub const TFCE_H: f64 = 2.0;
const TFCE_STEPS: f64 = 100.0;

pub fn label_clusters(active: &[bool], neighbors: &[Vec<usize>]) -> (Vec<Option<usize>>, Vec<usize>) {
    let mut labels = vec![None; active.len()];
    let mut sizes = Vec::new();
    let mut queue = VecDeque::new();
    for start in 0..active.len() {
        if !active[start] || labels[start].is_some() {
            continue;
        }
        let label = sizes.len();
        let mut size = 0usize;
        labels[start] = Some(label);
        queue.push_back(start);
        while let Some(v) = queue.pop_front() {
            size += 1;
            for &n in &neighbors[v] {
                if active[n] && labels[n].is_none() {
                    labels[n] = Some(label);
                    queue.push_back(n);
                }
            }
        }
        sizes.push(size);
    }
    (labels, sizes)
}

pub fn tfce(stat: &[f64], neighbors: &[Vec<usize>]) -> Vec<f64> {
    let max_abs = stat
        .iter()
        .filter(|v| v.is_finite())
        .fold(0.0f64, |m, v| m.max(v.abs()));
    let mut out = vec![0.0; stat.len()];
    if max_abs <= 0.0 {
        return out;
    }
    let dh = max_abs / TFCE_STEPS;
    for sign in [1.0, -1.0] {
        let tail: Vec<f64> = stat.iter().map(|v| (sign * v).max(0.0)).collect();
        let tail_max = tail.iter().copied().fold(0.0f64, f64::max);
        let mut h = dh;
        while h <= tail_max + dh * 1e-9 {
            let active: Vec<bool> = tail.iter().map(|&v| v >= h).collect();
            let (labels, sizes) = label_clusters(&active, neighbors);
            let height = h.powf(TFCE_H) * dh;
            for (v, label) in labels.iter().enumerate() {
                if let Some(l) = label {
                    out[v] += sign * (sizes[*l] as f64).powf(TFCE_E) * height;
                }
            }
            h += dh;
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterMaps {
    pub size: Vec<f64>,
    pub mass: Vec<f64>,
    pub max_size: f64,
    pub max_mass: f64,
}

pub fn cluster_maps(stat: &[f64], neighbors: &[Vec<usize>], threshold: f64) -> ClusterMaps {
    let mut size = vec![0.0; stat.len()];
    let mut mass = vec![0.0; stat.len()];
    let mut max_size = 0.0f64;
    let mut max_mass = 0.0f64;
    for sign in [1.0, -1.0] {
        let active: Vec<bool> = stat.iter().map(|v| sign * v > threshold).collect();
        let (labels, sizes) = label_clusters(&active, neighbors);
        let mut masses = vec![0.0; sizes.len()];
        for (v, label) in labels.iter().enumerate() {
            if let Some(l) = label {
                masses[*l] += sign * stat[v] - threshold;
            }
        }
        for (v, label) in labels.iter().enumerate() {
            if let Some(l) = label {
                size[v] = sizes[*l] as f64;
                mass[v] = masses[*l];
            }
        }
        max_size = sizes.iter().fold(max_size, |m, &s| m.max(s as f64));
        max_mass = masses.iter().fold(max_mass, |m, &s| m.max(s));
    }
    ClusterMaps {
        size,
        mass,
        max_size,
        max_mass,
    }
}
