use std::collections::HashMap;

use itertools::Itertools;

use crate::config::MatchOptions;
use crate::ivf::IvfIndex;
use crate::types::{Candidate, Descriptor};

/// 根据查询描述符对索引中的物体进行排序和判定
pub trait MatchEngine {
    /// 返回所有获得投票的物体，按得分从高到低排列
    fn rank(&self, index: &IvfIndex, query: &[Descriptor], k: usize) -> Vec<Candidate>;

    /// 从排序结果中选出最终匹配的物体，置信度不足时返回 None
    fn decide<'a>(&self, ranked: &'a [Candidate]) -> Option<&'a Candidate>;
}

/// 最近邻投票
///
/// 每个查询描述符最多给一个物体投一票：最近邻的距离不超过 `distance`，
/// 且最近邻与最近的另一个物体的邻居距离之比小于 `ratio`。
pub struct VoteMatcher {
    opts: MatchOptions,
}

impl VoteMatcher {
    pub fn new(opts: MatchOptions) -> Self {
        Self { opts }
    }

    pub fn options(&self) -> &MatchOptions {
        &self.opts
    }
}

impl MatchEngine for VoteMatcher {
    fn rank(&self, index: &IvfIndex, query: &[Descriptor], k: usize) -> Vec<Candidate> {
        // 物体 ID -> (票数, 距离之和)
        let mut votes: HashMap<&str, (usize, u64)> = HashMap::new();

        for descriptor in query {
            let neighbors = index.search(descriptor, k.max(1), self.opts.nprobe);
            let Some(best) = neighbors.first() else {
                continue;
            };
            if best.distance > self.opts.distance {
                continue;
            }
            let owner = index.source(best.id).object_id.as_str();

            if self.opts.ratio > 0. {
                // 同一物体的多个邻居不算歧义，只和其他物体比较
                let second = neighbors.iter().find(|n| index.source(n.id).object_id != owner);
                if let Some(second) = second {
                    if best.distance as f32 >= self.opts.ratio * second.distance as f32 {
                        continue;
                    }
                }
            }

            let entry = votes.entry(owner).or_default();
            entry.0 += 1;
            entry.1 += best.distance as u64;
        }

        votes
            .into_iter()
            .map(|(object_id, (votes, distance_sum))| Candidate {
                object_id: object_id.to_string(),
                votes,
                distance_sum,
            })
            .sorted_by(|a, b| {
                b.votes
                    .cmp(&a.votes)
                    .then(a.distance_sum.cmp(&b.distance_sum))
                    .then_with(|| a.object_id.cmp(&b.object_id))
            })
            .collect()
    }

    fn decide<'a>(&self, ranked: &'a [Candidate]) -> Option<&'a Candidate> {
        ranked.first().filter(|c| c.votes > 0 && c.votes >= self.opts.min_votes)
    }
}
