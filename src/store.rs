//! 磁盘存储
//!
//! ```text
//! <root>/objects.json                 物体列表，决定物体的序号
//! <root>/index.snapshot               索引快照，可选
//! <images>/<object>/meta.json         名称、描述和图片列表
//! <images>/<object>/<image>.feat      zstd(bincode(FeatureSet))
//! ```
//!
//! 所有写入都先写临时文件再重命名。compute() 的写入顺序为特征文件、元数据、物体列表，
//! 中途失败时新的记录不会被任何文件引用，下次加载时不可见。

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::config::DataDir;
use crate::error::{IndexError, Result};
use crate::ivf::{Fingerprint, IvfIndex, load_snapshot, save_snapshot};
use crate::types::{FeatureSet, ObjectRecord, validate_identifier};
use crate::utils::write_bytes_atomic;

/// 特征文件使用的 zstd 压缩等级
const ZSTD_LEVEL: i32 = 3;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    objects: Vec<String>,
}

/// load() 的结果
#[derive(Debug, Default)]
pub struct LoadedData {
    /// 物体列表中的全部 ID，包括加载失败的物体
    pub manifest: Vec<String>,
    /// 成功加载的物体，按物体列表的顺序排列
    pub records: Vec<ObjectRecord>,
    /// 成功加载的特征集合，按物体、图片的顺序排列
    pub sets: Vec<FeatureSet>,
    /// 数据缺失或损坏而被跳过的物体
    pub quarantined: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct IndexStore {
    manifest: PathBuf,
    snapshot: PathBuf,
    images: PathBuf,
}

impl IndexStore {
    /// 快照文件与物体列表位于同一目录
    pub fn new(manifest: impl Into<PathBuf>, images: impl Into<PathBuf>) -> Self {
        let manifest = manifest.into();
        let snapshot = manifest.with_file_name("index.snapshot");
        Self { manifest, snapshot, images: images.into() }
    }

    pub fn from_data_dir(dir: &DataDir) -> Self {
        Self { manifest: dir.manifest(), snapshot: dir.snapshot(), images: dir.images() }
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot
    }

    pub fn object_dir(&self, object_id: &str) -> PathBuf {
        self.images.join(object_id)
    }

    pub fn meta_path(&self, object_id: &str) -> PathBuf {
        self.object_dir(object_id).join("meta.json")
    }

    pub fn feature_path(&self, object_id: &str, image_id: &str) -> PathBuf {
        self.object_dir(object_id).join(format!("{image_id}.feat"))
    }

    /// 加载物体列表和所有物体的数据
    ///
    /// 物体列表不存在时视为空；单个物体的数据损坏只会跳过该物体
    pub fn load(&self) -> Result<LoadedData> {
        let manifest = self.read_manifest()?;
        let mut data = LoadedData::default();
        let mut seen = HashSet::new();

        for object_id in manifest.objects {
            if !validate_identifier(&object_id) {
                warn!("跳过非法的物体 ID: {object_id:?}");
                continue;
            }
            if !seen.insert(object_id.clone()) {
                warn!("物体列表中存在重复的 ID: {object_id}");
                continue;
            }
            data.manifest.push(object_id.clone());

            match self.load_object(&object_id) {
                Ok((record, sets)) => {
                    data.records.push(record);
                    data.sets.extend(sets);
                }
                Err(e) => {
                    warn!("跳过物体 {object_id}: {e}");
                    data.quarantined.push(object_id);
                }
            }
        }

        info!(
            "加载了 {} 个物体，{} 张图片，跳过 {} 个物体",
            data.records.len(),
            data.sets.len(),
            data.quarantined.len()
        );
        Ok(data)
    }

    fn read_manifest(&self) -> Result<Manifest> {
        let path = &self.manifest;
        match fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| IndexError::Corrupt(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                info!("物体列表 {} 不存在，使用空索引", path.display());
                Ok(Manifest::default())
            }
            Err(e) => Err(IndexError::persistence(path.display().to_string(), e)),
        }
    }

    /// 加载单个物体，任何一个文件出错都会导致整个物体加载失败
    fn load_object(&self, object_id: &str) -> Result<(ObjectRecord, Vec<FeatureSet>)> {
        let path = self.meta_path(object_id);
        let bytes = fs::read(&path).map_err(|e| IndexError::persistence(path.display().to_string(), e))?;
        let mut record: ObjectRecord = serde_json::from_slice(&bytes)
            .map_err(|e| IndexError::Corrupt(format!("{}: {e}", path.display())))?;
        record.id = object_id.to_string();

        let mut images = HashSet::new();
        let mut sets = Vec::with_capacity(record.images.len());
        for image_id in &record.images {
            if !validate_identifier(image_id) || !images.insert(image_id.as_str()) {
                return Err(IndexError::Corrupt(format!("非法或重复的图片 ID: {image_id:?}")));
            }
            sets.push(self.read_feature_set(object_id, image_id)?);
        }
        debug!("加载物体 {object_id}: {} 张图片", sets.len());
        Ok((record, sets))
    }

    fn read_feature_set(&self, object_id: &str, image_id: &str) -> Result<FeatureSet> {
        let path = self.feature_path(object_id, image_id);
        let corrupt = |msg: String| IndexError::Corrupt(format!("{}: {msg}", path.display()));

        let bytes = fs::read(&path).map_err(|e| IndexError::persistence(path.display().to_string(), e))?;
        let bytes = zstd::decode_all(&bytes[..]).map_err(|e| corrupt(e.to_string()))?;
        let set: FeatureSet = bincode::deserialize(&bytes).map_err(|e| corrupt(e.to_string()))?;
        if set.object_id != object_id || set.image_id != image_id {
            return Err(corrupt(format!("文件属于 {}/{}", set.object_id, set.image_id)));
        }
        Ok(set)
    }

    /// 保存一张图片的特征
    ///
    /// `record` 是已经包含这张图片的物体记录；新物体需要同时传入更新后的物体列表
    pub fn persist(&self, record: &ObjectRecord, set: &FeatureSet, manifest: Option<&[String]>) -> Result<()> {
        let bytes = bincode::serialize(set).map_err(|e| IndexError::Corrupt(e.to_string()))?;
        let bytes = zstd::encode_all(&bytes[..], ZSTD_LEVEL)
            .map_err(|e| IndexError::persistence("压缩特征", e))?;
        write_bytes_atomic(&self.feature_path(&set.object_id, &set.image_id), &bytes)?;

        self.save_record(record)?;
        if let Some(objects) = manifest {
            self.write_manifest(objects)?;
        }
        debug!("保存特征 {}/{}: {} 个描述符", set.object_id, set.image_id, set.len());
        Ok(())
    }

    /// 保存物体的元数据
    pub fn save_record(&self, record: &ObjectRecord) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(record).map_err(|e| IndexError::Corrupt(e.to_string()))?;
        write_bytes_atomic(&self.meta_path(&record.id), &bytes)
    }

    pub fn write_manifest(&self, objects: &[String]) -> Result<()> {
        let manifest = Manifest { objects: objects.to_vec() };
        let bytes = serde_json::to_vec_pretty(&manifest).map_err(|e| IndexError::Corrupt(e.to_string()))?;
        write_bytes_atomic(&self.manifest, &bytes)
    }

    /// 保存重建后的索引
    pub fn rebuild_persist(&self, index: &IvfIndex, fingerprint: Fingerprint) -> Result<()> {
        save_snapshot(index, fingerprint, &self.snapshot)?;
        info!("索引快照已保存到 {}", self.snapshot.display());
        Ok(())
    }

    /// 读取索引快照，不存在或者无法读取时返回 None
    pub fn read_snapshot(&self) -> Option<(IvfIndex, Fingerprint)> {
        if !self.snapshot.exists() {
            return None;
        }
        match load_snapshot(&self.snapshot) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("忽略无法读取的索引快照: {e}");
                None
            }
        }
    }
}

/// 将预置的数据目录复制到数据目录
///
/// 已经存在的文件只有在 overwrite 时才会被覆盖，返回复制的文件数量
pub fn install_seed(seed: &Path, target: &Path, overwrite: bool) -> Result<usize> {
    let mut copied = 0;
    for entry in WalkDir::new(seed).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let context = e.path().unwrap_or(seed).display().to_string();
            IndexError::persistence(context, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(seed).unwrap_or(entry.path());
        let dest = target.join(relative);
        if dest.exists() && !overwrite {
            debug!("跳过已存在的文件 {}", dest.display());
            continue;
        }
        let bytes = fs::read(entry.path())
            .map_err(|e| IndexError::persistence(entry.path().display().to_string(), e))?;
        write_bytes_atomic(&dest, &bytes)?;
        copied += 1;
    }
    info!("从 {} 复制了 {copied} 个文件到 {}", seed.display(), target.display());
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &Path) -> IndexStore {
        IndexStore::from_data_dir(&DataDir::new(dir))
    }

    fn record(id: &str, images: &[&str]) -> ObjectRecord {
        let mut r = ObjectRecord::new(id);
        r.images = images.iter().map(|s| s.to_string()).collect();
        r
    }

    #[test]
    fn missing_manifest_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let data = store(dir.path()).load().unwrap();
        assert!(data.manifest.is_empty());
        assert!(data.records.is_empty());
    }

    #[test]
    fn persist_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let set = FeatureSet::new("cola", "front", vec![[1; 32], [2; 32]]);
        store.persist(&record("cola", &["front"]), &set, Some(&["cola".to_string()])).unwrap();

        let data = store.load().unwrap();
        assert_eq!(data.manifest, ["cola"]);
        assert_eq!(data.records[0].id, "cola");
        assert_eq!(data.records[0].name, "cola");
        assert_eq!(data.records[0].images, ["front"]);
        assert_eq!(data.sets, [set]);
    }

    #[test]
    fn corrupt_object_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let a = FeatureSet::new("a", "1", vec![[1; 32]]);
        let b = FeatureSet::new("b", "1", vec![[2; 32]]);
        store.persist(&record("a", &["1"]), &a, None).unwrap();
        store.persist(&record("b", &["1"]), &b, None).unwrap();
        store.write_manifest(&["a".to_string(), "b".to_string(), "missing".to_string()]).unwrap();

        fs::write(store.feature_path("a", "1"), b"not zstd").unwrap();

        let data = store.load().unwrap();
        assert_eq!(data.manifest, ["a", "b", "missing"]);
        assert_eq!(data.records.len(), 1);
        assert_eq!(data.records[0].id, "b");
        assert_eq!(data.quarantined, ["a", "missing"]);
    }

    #[test]
    fn misplaced_feature_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let set = FeatureSet::new("a", "1", vec![[1; 32]]);
        store.persist(&record("a", &["1"]), &set, Some(&["a".to_string()])).unwrap();
        fs::copy(store.feature_path("a", "1"), store.feature_path("a", "2")).unwrap();
        store.save_record(&record("a", &["1", "2"])).unwrap();

        let data = store.load().unwrap();
        assert_eq!(data.quarantined, ["a"]);
    }

    #[test]
    fn broken_manifest_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        fs::write(store.manifest_path(), b"{").unwrap();
        assert!(matches!(store.load(), Err(IndexError::Corrupt(_))));
    }

    #[test]
    fn install_seed_copies_tree() {
        let seed = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        let seed_store = store(seed.path());
        let set = FeatureSet::new("a", "1", vec![[1; 32]]);
        seed_store.persist(&record("a", &["1"]), &set, Some(&["a".to_string()])).unwrap();

        assert_eq!(install_seed(seed.path(), target.path(), false).unwrap(), 3);
        assert_eq!(install_seed(seed.path(), target.path(), false).unwrap(), 0);
        assert_eq!(install_seed(seed.path(), target.path(), true).unwrap(), 3);
        assert_eq!(store(target.path()).load().unwrap().sets, [set]);
    }
}
