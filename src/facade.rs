use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Instant;

use log::{debug, info};

use crate::config::{DataDir, IndexConfig};
use crate::error::{IndexError, Result};
use crate::image::Image;
use crate::ivf::{IvfIndex, fingerprint};
use crate::matcher::{MatchEngine, VoteMatcher};
use crate::metrics;
use crate::orb::{FeatureExtractor, OrbExtractor};
use crate::store::IndexStore;
use crate::types::{Candidate, Descriptor, FeatureSet, ObjectRecord, validate_identifier};

pub struct IqIndexBuilder {
    config: IndexConfig,
    extractor: Option<Box<dyn FeatureExtractor + Send + Sync>>,
    matcher: Option<Box<dyn MatchEngine + Send + Sync>>,
}

impl IqIndexBuilder {
    pub fn new() -> Self {
        Self { config: IndexConfig::default(), extractor: None, matcher: None }
    }

    pub fn config(mut self, config: IndexConfig) -> Self {
        self.config = config;
        self
    }

    /// 替换默认的 ORB 特征提取器
    pub fn extractor(mut self, extractor: impl FeatureExtractor + Send + Sync + 'static) -> Self {
        self.extractor = Some(Box::new(extractor));
        self
    }

    /// 替换默认的投票匹配器
    pub fn matcher(mut self, matcher: impl MatchEngine + Send + Sync + 'static) -> Self {
        self.matcher = Some(Box::new(matcher));
        self
    }

    pub fn build(self) -> IqIndex {
        let extractor = self
            .extractor
            .unwrap_or_else(|| Box::new(OrbExtractor::create(self.config.orb.clone())));
        let matcher =
            self.matcher.unwrap_or_else(|| Box::new(VoteMatcher::new(self.config.search.clone())));
        IqIndex { config: self.config, extractor, matcher, state: None }
    }

    /// 加载数据目录并训练索引
    pub fn open(self, dir: &DataDir) -> Result<IqIndex> {
        let mut index = self.build();
        index.load_data_dir(dir)?;
        index.train()?;
        Ok(index)
    }
}

impl Default for IqIndexBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// load() 之后的全部状态
struct LoadedState {
    store: IndexStore,
    /// 物体列表文件中的全部 ID，包括加载失败的物体
    manifest: Vec<String>,
    /// 可用的物体 ID，决定物体的序号
    order: Vec<String>,
    records: HashMap<String, ObjectRecord>,
    sets: Vec<FeatureSet>,
    quarantined: HashSet<String>,
    index: Option<IvfIndex>,
}

/// 物体识别索引
///
/// load() / train() / compute() 需要独占访问；索引稳定时 match 可以并发调用
pub struct IqIndex {
    config: IndexConfig,
    extractor: Box<dyn FeatureExtractor + Send + Sync>,
    matcher: Box<dyn MatchEngine + Send + Sync>,
    state: Option<LoadedState>,
}

impl IqIndex {
    pub fn builder() -> IqIndexBuilder {
        IqIndexBuilder::new()
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn extractor(&self) -> &(dyn FeatureExtractor + Send + Sync) {
        self.extractor.as_ref()
    }

    fn state(&self) -> Result<&LoadedState> {
        self.state.as_ref().ok_or(IndexError::NotLoaded)
    }

    fn state_mut(&mut self) -> Result<&mut LoadedState> {
        self.state.as_mut().ok_or(IndexError::NotLoaded)
    }

    /// 从物体列表文件和图片目录加载所有物体
    ///
    /// 如果存在与当前数据一致的索引快照，加载后即可直接匹配。
    /// 失败时保留之前的状态
    pub fn load(&mut self, index_path: impl AsRef<Path>, images_path: impl AsRef<Path>) -> Result<()> {
        self.load_store(IndexStore::new(index_path.as_ref(), images_path.as_ref()))
    }

    pub fn load_data_dir(&mut self, dir: &DataDir) -> Result<()> {
        self.load_store(IndexStore::from_data_dir(dir))
    }

    fn load_store(&mut self, store: IndexStore) -> Result<()> {
        let start = Instant::now();
        let data = store.load()?;

        let fp = fingerprint(&data.sets);
        let index = match store.read_snapshot() {
            Some((index, snapshot_fp)) if snapshot_fp == fp => {
                info!("使用索引快照：{} 个描述符", index.ntotal());
                Some(index)
            }
            Some(_) => {
                info!("索引快照已过期，需要重新训练");
                None
            }
            None => None,
        };
        if let Some(index) = &index {
            metrics::set_indexed_descriptors(index.ntotal());
        }

        let order = data.records.iter().map(|r| r.id.clone()).collect();
        let records = data.records.into_iter().map(|r| (r.id.clone(), r)).collect();
        self.state = Some(LoadedState {
            store,
            manifest: data.manifest,
            order,
            records,
            sets: data.sets,
            quarantined: data.quarantined.into_iter().collect(),
            index,
        });
        debug!("加载耗时 {:.2}s", start.elapsed().as_secs_f32());
        Ok(())
    }

    /// 使用全部已保存的特征重建索引
    ///
    /// 快照写入成功后才会替换内存中的索引
    pub fn train(&mut self) -> Result<()> {
        let opts = self.config.index.clone();
        let state = self.state_mut()?;
        let start = Instant::now();

        let index = IvfIndex::build(&state.sets, &opts);
        state.store.rebuild_persist(&index, fingerprint(&state.sets))?;

        metrics::set_indexed_descriptors(index.ntotal());
        state.index = Some(index);
        info!("训练完成，耗时 {:.2}s", start.elapsed().as_secs_f32());
        Ok(())
    }

    /// 识别图片中的物体，返回物体序号
    pub fn match_image(&self, image: &Image) -> Result<Option<usize>> {
        let start = Instant::now();
        let state = self.state()?;
        let index = state.index.as_ref().ok_or(IndexError::NotTrained)?;
        let descriptors = self.extractor.extract(image)?;

        let ranked = self.matcher.rank(index, &descriptors, self.config.search.k);
        let best = self.matcher.decide(&ranked);
        let ordinal = best.and_then(|c| state.order.iter().position(|id| *id == c.object_id));

        let outcome = if ordinal.is_some() { "match" } else { "no_match" };
        let votes = ranked.first().map(|c| c.votes).unwrap_or(0);
        let elapsed = start.elapsed().as_secs_f32();
        metrics::observe_match((image.width(), image.height()), outcome, elapsed, votes);
        debug!("匹配 {} 个描述符：{outcome}，最高票数 {votes}，耗时 {elapsed:.3}s", descriptors.len());
        Ok(ordinal)
    }

    /// 对图片中的描述符排序，返回所有获得投票的物体
    pub fn rank(&self, image: &Image) -> Result<Vec<Candidate>> {
        let descriptors = self.extractor.extract(image)?;
        self.rank_descriptors(&descriptors)
    }

    pub fn rank_descriptors(&self, descriptors: &[Descriptor]) -> Result<Vec<Candidate>> {
        let index = self.state()?.index.as_ref().ok_or(IndexError::NotTrained)?;
        Ok(self.matcher.rank(index, descriptors, self.config.search.k))
    }

    /// 提取图片特征，添加到物体中并更新索引
    pub fn compute(&mut self, image: &Image, object_id: &str, image_id: &str) -> Result<()> {
        self.check_new_image(object_id, image_id)?;
        let descriptors = self.extractor.extract(image)?;
        self.add_features(FeatureSet::new(object_id, image_id, descriptors))
    }

    /// 检查图片能否添加到物体中
    fn check_new_image(&self, object_id: &str, image_id: &str) -> Result<()> {
        let state = self.state()?;
        for id in [object_id, image_id] {
            if !validate_identifier(id) {
                return Err(IndexError::InvalidIdentifier(format!("{id:?}")));
            }
        }
        if state.quarantined.contains(object_id) {
            return Err(IndexError::Corrupt(format!("物体 {object_id} 的数据已损坏")));
        }
        if state.records.get(object_id).is_some_and(|r| r.images.iter().any(|i| i == image_id)) {
            return Err(IndexError::InvalidIdentifier(format!("图片 {object_id}/{image_id} 已存在")));
        }
        Ok(())
    }

    /// 添加已经提取好的特征，先写入磁盘，成功后才修改内存中的状态
    pub fn add_features(&mut self, set: FeatureSet) -> Result<()> {
        self.check_new_image(&set.object_id, &set.image_id)?;
        let opts = self.config.index.clone();
        let state = self.state_mut()?;

        let is_new = !state.records.contains_key(&set.object_id);
        let mut record = match state.records.get(&set.object_id) {
            Some(record) => record.clone(),
            None => ObjectRecord::new(&set.object_id),
        };
        record.images.push(set.image_id.clone());

        let manifest = is_new.then(|| {
            let mut manifest = state.manifest.clone();
            manifest.push(set.object_id.clone());
            manifest
        });
        state.store.persist(&record, &set, manifest.as_deref())?;

        if let Some(manifest) = manifest {
            state.manifest = manifest;
            state.order.push(set.object_id.clone());
        }
        state.records.insert(set.object_id.clone(), record);

        // 与 load() 得到的顺序一致：按物体列表排列，同一物体的图片相邻
        let rank: HashMap<&str, usize> =
            state.order.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();
        let rank_of = |id: &str| rank.get(id).copied().unwrap_or(usize::MAX);
        let own = rank_of(&set.object_id);
        let pos = state.sets.partition_point(|s| rank_of(&s.object_id) <= own);
        state.sets.insert(pos, set);

        // 尚未训练时，使用包括新特征在内的全部特征构建索引
        let index = match state.index.take() {
            Some(mut index) => {
                index.add(&state.sets[pos]);
                index
            }
            None => IvfIndex::build(&state.sets, &opts),
        };
        metrics::set_indexed_descriptors(index.ntotal());
        metrics::inc_computed_images();
        state.index = Some(index);
        Ok(())
    }

    /// 修改物体的名称和描述
    pub fn describe(&mut self, object_id: &str, name: &str, meta: &str) -> Result<()> {
        let state = self.state_mut()?;
        let Some(record) = state.records.get(object_id) else {
            return Err(IndexError::InvalidIdentifier(format!("物体 {object_id} 不存在")));
        };
        let mut record = record.clone();
        record.name = name.to_string();
        record.meta = meta.to_string();
        state.store.save_record(&record)?;
        state.records.insert(object_id.to_string(), record);
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.state.is_some()
    }

    pub fn is_trained(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.index.is_some())
    }

    pub fn index(&self) -> Option<&IvfIndex> {
        self.state.as_ref()?.index.as_ref()
    }

    pub fn object_count(&self) -> usize {
        self.state.as_ref().map(|s| s.order.len()).unwrap_or(0)
    }

    pub fn object_id_at(&self, ordinal: usize) -> Option<&str> {
        self.state.as_ref()?.order.get(ordinal).map(String::as_str)
    }

    fn record(&self, object_id: &str) -> Option<&ObjectRecord> {
        self.state.as_ref()?.records.get(object_id)
    }

    pub fn name(&self, object_id: &str) -> Option<&str> {
        self.record(object_id).map(|r| r.name.as_str())
    }

    pub fn metadata(&self, object_id: &str) -> Option<&str> {
        self.record(object_id).map(|r| r.meta.as_str())
    }

    pub fn image_ids(&self, object_id: &str) -> Option<&[String]> {
        self.record(object_id).map(|r| r.images.as_slice())
    }

    /// 所有物体的图片总数
    pub fn num_images(&self) -> usize {
        self.state.as_ref().map(|s| s.records.values().map(|r| r.images.len()).sum()).unwrap_or(0)
    }

    /// 加载时被跳过的物体
    pub fn quarantined(&self) -> Vec<&str> {
        let Some(state) = &self.state else {
            return vec![];
        };
        state.manifest.iter().filter(|id| state.quarantined.contains(*id)).map(String::as_str).collect()
    }
}
