//! 倒排文件索引
//!
//! 使用 k-modes 对所有描述符聚类得到粗量化器，每个描述符根据最近的聚类中心
//! 放入对应的倒排列表。搜索时只在距离查询向量最近的 nprobe 个列表中计算汉明距离。
//! 当描述符数量不足以支撑聚类时，整个索引退化为单个列表，搜索是精确的。

pub mod invlists;
pub mod snapshot;

use std::cmp::Ordering;

pub use invlists::*;
use log::info;
pub use snapshot::*;

use crate::config::IndexOptions;
use crate::hamming::{hamming, knn_hamming};
use crate::kmodes::{kmodes_binary, nearest_centroid};
use crate::types::{DESCRIPTOR_SIZE, Descriptor, FeatureSet, Source};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Neighbor {
    /// 索引中的条目编号
    pub id: u64,
    pub distance: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IvfIndex {
    /// 粗量化器的聚类中心，为空时只有一个列表
    centroids: Vec<Descriptor>,
    invlists: ArrayInvertedLists<DESCRIPTOR_SIZE>,
    /// 每张图片对应一个来源
    sources: Vec<Source>,
    /// 条目编号 -> 来源序号
    owners: Vec<u32>,
}

impl IvfIndex {
    /// 使用给定的聚类中心创建空索引
    pub fn with_centroids(centroids: Vec<Descriptor>) -> Self {
        let nlist = centroids.len().max(1);
        Self { centroids, invlists: ArrayInvertedLists::new(nlist), sources: vec![], owners: vec![] }
    }

    /// 从全部特征集合构建索引
    pub fn build<'a>(sets: impl IntoIterator<Item = &'a FeatureSet>, opts: &IndexOptions) -> Self {
        let sets = sets.into_iter().collect::<Vec<_>>();
        let data = sets.iter().flat_map(|s| s.descriptors.iter().copied()).collect::<Vec<_>>();

        let nlist = choose_nlist(data.len(), opts);
        let centroids = if nlist > 1 {
            info!("对 {} 个描述符进行聚类，中心点数量 = {nlist}", data.len());
            kmodes_binary(&data, nlist, opts.max_iter, opts.seed).centroids
        } else {
            vec![]
        };

        let mut index = Self::with_centroids(centroids);
        for set in sets {
            index.add(set);
        }
        info!(
            "索引构建完成：{} 张图片，{} 个描述符，{} 个列表，不平衡度 {:.2}",
            index.sources.len(),
            index.ntotal(),
            index.nlist(),
            index.invlists.imbalance()
        );
        index
    }

    /// 添加一张图片的全部描述符，已有的条目保持不变
    pub fn add(&mut self, set: &FeatureSet) {
        let slot = self.sources.len() as u32;
        self.sources.push(Source { object_id: set.object_id.clone(), image_id: set.image_id.clone() });
        for descriptor in &set.descriptors {
            let id = self.owners.len() as u64;
            self.owners.push(slot);
            let list_no = self.assign(descriptor);
            self.invlists.add_entry(list_no, id, descriptor);
        }
    }

    /// 描述符所属的倒排列表
    fn assign(&self, descriptor: &Descriptor) -> usize {
        if self.centroids.is_empty() { 0 } else { nearest_centroid(descriptor, &self.centroids).0 }
    }

    /// 距离查询向量最近的 nprobe 个列表，距离相同时编号小的在前
    fn probe(&self, descriptor: &Descriptor, nprobe: usize) -> Vec<usize> {
        if self.centroids.is_empty() {
            return vec![0];
        }
        let nprobe = nprobe.clamp(1, self.centroids.len());
        knn_hamming::<DESCRIPTOR_SIZE>(descriptor, &self.centroids, nprobe)
            .into_iter()
            .map(|(i, _)| i)
            .collect()
    }

    /// 搜索最近的 k 个条目
    ///
    /// 结果按 (距离, 物体 ID, 图片 ID, 条目编号) 升序排列
    pub fn search(&self, descriptor: &Descriptor, k: usize, nprobe: usize) -> Vec<Neighbor> {
        if k == 0 {
            return vec![];
        }
        let mut neighbors = vec![];
        for list_no in self.probe(descriptor, nprobe) {
            let (ids, codes) = self.invlists.get_list(list_no);
            neighbors.extend(
                ids.iter()
                    .zip(codes.iter())
                    .map(|(&id, code)| Neighbor { id, distance: hamming(descriptor, code) }),
            );
        }

        // 先按距离筛掉明显不可能进入前 k 的条目，再做完整排序
        if neighbors.len() > k {
            let (_, kth, _) = neighbors.select_nth_unstable_by_key(k - 1, |n| n.distance);
            let bound = kth.distance;
            neighbors.retain(|n| n.distance <= bound);
        }
        neighbors.sort_by(|a, b| self.compare(a, b));
        neighbors.truncate(k);
        neighbors
    }

    fn compare(&self, a: &Neighbor, b: &Neighbor) -> Ordering {
        let (sa, sb) = (self.source(a.id), self.source(b.id));
        a.distance
            .cmp(&b.distance)
            .then_with(|| sa.object_id.cmp(&sb.object_id))
            .then_with(|| sa.image_id.cmp(&sb.image_id))
            .then_with(|| a.id.cmp(&b.id))
    }

    /// 条目的来源
    pub fn source(&self, id: u64) -> &Source {
        &self.sources[self.owners[id as usize] as usize]
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// 索引中的描述符总数
    pub fn ntotal(&self) -> usize {
        self.owners.len()
    }

    pub fn nlist(&self) -> usize {
        self.invlists.nlist()
    }

    /// 是否只有一个列表，此时搜索结果是精确的
    pub fn is_flat(&self) -> bool {
        self.centroids.is_empty()
    }
}

/// 根据描述符数量决定聚类中心数量，数量不足时返回 1
fn choose_nlist(n: usize, opts: &IndexOptions) -> usize {
    let min_points = opts.min_points_per_list.max(1);
    let nlist = if opts.nlist > 0 { opts.nlist } else { n.isqrt().min(n / min_points) };
    if nlist <= 1 || n < nlist * min_points { 1 } else { nlist }
}
