use log::{debug, info};
use rand::prelude::*;
use rayon::prelude::*;

use crate::hamming::hamming;

#[derive(Debug, Clone, Default)]
pub struct KModeState<const N: usize> {
    /// 聚类中心到所有向量的总距离
    pub distsum: u64,
    /// 聚类中心
    pub centroids: Vec<[u8; N]>,
    /// 每个聚类中心包含的向量数量
    pub centroid_frequency: Vec<usize>,
}

/// K-modes 聚类算法，用于二进制向量
///
/// 初始中心点由 seed 决定，相同的输入和 seed 总是得到相同的结果
pub fn kmodes_binary<const N: usize>(
    data: &[[u8; N]],
    k: usize,
    max_iter: usize,
    seed: u64,
) -> KModeState<N> {
    if data.is_empty() || k == 0 {
        return KModeState::default();
    }
    let k = k.min(data.len());

    let mut rng = StdRng::seed_from_u64(seed);

    // 随机初始化聚类中心
    let mut centroids: Vec<[u8; N]> = data.choose_multiple(&mut rng, k).cloned().collect();

    let (mut assignments, mut distance) = update_assignments(data, &centroids);
    let mut centroid_frequency = frequency(&assignments, k);

    for iter in 0..max_iter {
        // 更新聚类中心
        let new_centroids: Vec<[u8; N]> = (0..k)
            .into_par_iter()
            .map(|cluster_id| update_centroid(data, &assignments, cluster_id, &centroids[cluster_id]))
            .collect();

        // 分配每个数据点到最近的聚类中心
        let (new_assignments, new_distance) = update_assignments(data, &new_centroids);
        debug!("k-modes 第 {iter} 轮，总距离 {new_distance}");

        // 如果距离没有变小，则算法收敛
        if new_distance >= distance {
            break;
        }
        centroids = new_centroids;
        centroid_frequency = frequency(&new_assignments, k);
        assignments = new_assignments;
        distance = new_distance;
    }

    info!(
        "k-modes 完成：{} 个向量，{k} 个中心点，总距离 {distance}，不平衡度 {:.2}",
        data.len(),
        imbalance_factor(&centroid_frequency)
    );
    KModeState { distsum: distance, centroids, centroid_frequency }
}

/// 返回距离最近的聚类中心，距离相同时取序号较小的一个
pub fn nearest_centroid<const N: usize>(point: &[u8; N], centroids: &[[u8; N]]) -> (usize, u32) {
    let mut min_distance = u32::MAX;
    let mut best_cluster = 0;
    for (j, centroid) in centroids.iter().enumerate() {
        let distance = hamming::<N>(point, centroid);
        if distance < min_distance {
            min_distance = distance;
            best_cluster = j;
        }
    }
    (best_cluster, min_distance)
}

/// 将每个点分配给最近的聚类中心，并返回聚类中心的序号和总距离
pub fn update_assignments<const N: usize>(
    data: &[[u8; N]],
    centroids: &[[u8; N]],
) -> (Vec<usize>, u64) {
    let (assignments, distances): (Vec<_>, Vec<_>) =
        data.par_iter().map(|point| nearest_centroid(point, centroids)).unzip();
    let distance = distances.iter().map(|&d| d as u64).sum();
    (assignments, distance)
}

/// 更新聚类中心：计算分配给该聚类的所有点的众数
///
/// 没有分配到任何点的聚类保留原来的中心
fn update_centroid<const N: usize>(
    data: &[[u8; N]],
    assignments: &[usize],
    cluster_id: usize,
    previous: &[u8; N],
) -> [u8; N] {
    let mut bit_counts = vec![[0u32; 8]; N];
    let mut count = 0u32;
    for (point, _) in data.iter().zip(assignments).filter(|(_, a)| **a == cluster_id) {
        count += 1;
        for (byte_pos, byte_val) in point.iter().enumerate() {
            for bit_pos in 0..8 {
                if (byte_val >> bit_pos) & 1 == 1 {
                    bit_counts[byte_pos][bit_pos] += 1;
                }
            }
        }
    }

    if count == 0 {
        return *previous;
    }

    let half_count = count / 2;
    let mut new_centroid = [0u8; N];
    for (byte, counts) in new_centroid.iter_mut().zip(&bit_counts) {
        for (bit_pos, c) in counts.iter().enumerate() {
            if *c > half_count {
                *byte |= 1 << bit_pos;
            }
        }
    }
    new_centroid
}

fn frequency(assignments: &[usize], k: usize) -> Vec<usize> {
    let mut hist = vec![0; k];
    for &a in assignments {
        hist[a] += 1;
    }
    hist
}

/// 计算不平衡因子
pub fn imbalance_factor(hist: &[usize]) -> f32 {
    let (mut tot, mut uf) = (0.0, 0.0);
    for h in hist {
        let h = *h as f32;
        tot += h;
        uf += h.powf(2.0);
    }
    if tot == 0.0 {
        return 0.0;
    }
    uf * hist.len() as f32 / tot.powf(2.0)
}
