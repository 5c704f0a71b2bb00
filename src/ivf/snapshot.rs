//! 索引快照
//!
//! 文件布局：
//!
//! ```text
//! | SnapshotHeader | centroids | list 0 ids | list 0 codes | ... | sources |
//! ```
//!
//! 倒排列表和来源表均使用 zstd 压缩，header 中记录了每一段的偏移量和大小。
//! fingerprint 是构建索引时所有特征集合的哈希，用于判断快照是否过期。
//! 它只取决于特征内容，与读取时的索引参数无关。

use std::borrow::Cow;
use std::fs::File;
use std::io::{Cursor, Seek, SeekFrom, Write};
use std::path::Path;

use binrw::{BinRead, BinWrite, binrw};
use bytemuck::cast_slice;
use memmap2::Mmap;
use zstd::bulk::{compress, decompress};

use super::{ArrayInvertedLists, InvertedLists, IvfIndex};
use crate::error::{IndexError, Result};
use crate::types::{DESCRIPTOR_SIZE, Descriptor, FeatureSet, Source};
use crate::utils::write_atomic;

pub const SNAPSHOT_VERSION: u32 = 1;

pub type Fingerprint = [u8; 32];

#[binrw]
#[brw(little, magic = b"IQIX")]
#[br(import(file_len: u64))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub version: u32,
    /// 构建索引的特征集合的哈希
    pub fingerprint: Fingerprint,
    /// 向量字节数
    pub code_size: u64,
    /// 聚类中心数量，为 0 表示只有一个列表
    pub ncentroids: u64,
    pub centroids_offset: u64,
    /// 倒排列表数量，每个列表在 header 中占 32 字节，不能超过文件大小
    #[br(assert(nlist.checked_mul(32).is_some_and(|n| n <= file_len), "列表数量 {} 超出文件范围", nlist))]
    pub nlist: u64,
    /// 每个倒排列表的元素数量
    #[br(count = nlist)]
    pub list_len: Vec<u64>,
    /// 倒排列表在整个文件中的偏移量
    #[br(count = nlist)]
    pub list_offset: Vec<u64>,
    /// 倒排列表的总大小
    #[br(count = nlist)]
    pub list_size: Vec<u64>,
    /// 单个倒排列表中 id 和 code 部分的分割点
    #[br(count = nlist)]
    pub list_split: Vec<u64>,
    pub sources_offset: u64,
    pub sources_size: u64,
}

impl SnapshotHeader {
    fn new(fingerprint: Fingerprint, ncentroids: usize, nlist: usize) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            fingerprint,
            code_size: DESCRIPTOR_SIZE as u64,
            ncentroids: ncentroids as u64,
            centroids_offset: 0,
            nlist: nlist as u64,
            list_len: vec![0; nlist],
            list_offset: vec![0; nlist],
            list_size: vec![0; nlist],
            list_split: vec![0; nlist],
            sources_offset: 0,
            sources_size: 0,
        }
    }
}

/// 计算特征集合的指纹，顺序敏感
pub fn fingerprint<'a>(sets: impl IntoIterator<Item = &'a FeatureSet>) -> Fingerprint {
    let mut hasher = blake3::Hasher::new();
    for set in sets {
        for id in [&set.object_id, &set.image_id] {
            hasher.update(&(id.len() as u64).to_le_bytes());
            hasher.update(id.as_bytes());
        }
        hasher.update(&(set.descriptors.len() as u64).to_le_bytes());
        hasher.update(set.descriptors.as_flattened());
    }
    *hasher.finalize().as_bytes()
}

/// 将索引写入快照文件，写入过程是原子的
pub fn save_snapshot(index: &IvfIndex, fingerprint: Fingerprint, path: &Path) -> Result<()> {
    let io_err = |e: std::io::Error| IndexError::persistence(path.display().to_string(), e);
    let bin_err = |e: binrw::Error| IndexError::persistence(path.display().to_string(), binrw_io(e));

    write_atomic(path, |writer| {
        // 提前写入 header 占位，后续再来覆盖
        let mut header = SnapshotHeader::new(fingerprint, index.centroids.len(), index.nlist());
        header.write(writer).map_err(bin_err)?;

        header.centroids_offset = writer.stream_position().map_err(io_err)?;
        writer.write_all(index.centroids.as_flattened()).map_err(io_err)?;

        let mut offset = writer.stream_position().map_err(io_err)?;
        for i in 0..index.nlist() {
            let (ids, codes) = index.invlists.get_list(i);
            write_one_list(writer, &mut header, i, &ids, &codes, &mut offset).map_err(io_err)?;
        }

        let table = bincode::serialize(&(&index.sources, &index.owners))
            .map_err(|e| IndexError::Corrupt(e.to_string()))?;
        let table = compress(&table, 0).map_err(io_err)?;
        header.sources_offset = offset;
        header.sources_size = table.len() as u64;
        writer.write_all(&table).map_err(io_err)?;

        writer.seek(SeekFrom::Start(0)).map_err(io_err)?;
        header.write(writer).map_err(bin_err)?;
        writer.flush().map_err(io_err)
    })
}

fn write_one_list<W: Write>(
    writer: &mut W,
    header: &mut SnapshotHeader,
    list_no: usize,
    ids: &Cow<[u64]>,
    codes: &Cow<[Descriptor]>,
    offset: &mut u64,
) -> std::io::Result<()> {
    header.list_len[list_no] = ids.len() as u64;

    let ids = compress(cast_slice::<u64, u8>(ids), 0)?;
    let codes = compress(codes.as_flattened(), 0)?;
    let size = (ids.len() + codes.len()) as u64;

    header.list_offset[list_no] = *offset;
    header.list_size[list_no] = size;
    header.list_split[list_no] = ids.len() as u64;

    *offset += size;

    writer.write_all(&ids)?;
    writer.write_all(&codes)?;
    Ok(())
}

/// 读取快照，返回索引和它的指纹
pub fn load_snapshot(path: &Path) -> Result<(IvfIndex, Fingerprint)> {
    let file = File::open(path).map_err(|e| IndexError::persistence(path.display().to_string(), e))?;
    let mmap = unsafe { Mmap::map(&file) }
        .map_err(|e| IndexError::persistence(path.display().to_string(), e))?;
    let corrupt = |msg: String| IndexError::Corrupt(format!("{}: {msg}", path.display()));

    let file_len = mmap.len() as u64;
    let header = SnapshotHeader::read_args(&mut Cursor::new(&mmap[..]), (file_len,))
        .map_err(|e| corrupt(e.to_string()))?;
    if header.version != SNAPSHOT_VERSION {
        return Err(corrupt(format!("不支持的快照版本 {}", header.version)));
    }
    if header.code_size != DESCRIPTOR_SIZE as u64 {
        return Err(corrupt(format!("向量长度不一致: {}", header.code_size)));
    }
    let expected_nlist = header.ncentroids.max(1);
    if header.nlist != expected_nlist {
        return Err(corrupt(format!("列表数量 {} 与中心点数量不符", header.nlist)));
    }

    let centroids_size = header
        .ncentroids
        .checked_mul(DESCRIPTOR_SIZE as u64)
        .ok_or_else(|| corrupt("中心点数量溢出".to_string()))?;
    let centroids = section(&mmap, header.centroids_offset, centroids_size).map_err(corrupt)?;
    let centroids = to_descriptors(centroids);

    // 先读来源表，倒排列表的总长度必须与它一致，解压时的缓冲区大小也由此限定
    let table = section(&mmap, header.sources_offset, header.sources_size).map_err(corrupt)?;
    let table = zstd::decode_all(table).map_err(|e| corrupt(e.to_string()))?;
    let (sources, owners): (Vec<Source>, Vec<u32>) =
        bincode::deserialize(&table).map_err(|e| corrupt(e.to_string()))?;
    let ntotal = owners.len();
    let listed = header
        .list_len
        .iter()
        .try_fold(0u64, |acc, &len| acc.checked_add(len))
        .filter(|&sum| sum == ntotal as u64);
    if listed.is_none() {
        return Err(corrupt("倒排列表长度与来源表不一致".to_string()));
    }

    let nlist = header.nlist as usize;
    let mut invlists = ArrayInvertedLists::<DESCRIPTOR_SIZE>::new(nlist);
    for i in 0..nlist {
        // 总和已校验，单个列表长度不会超过 ntotal
        let len = header.list_len[i] as usize;
        let ids_size = len * size_of::<u64>();
        let codes_size = len * DESCRIPTOR_SIZE;
        let data = section(&mmap, header.list_offset[i], header.list_size[i]).map_err(corrupt)?;
        let split = (header.list_split[i] as usize).min(data.len());
        let (ids, codes) = data.split_at(split);

        let ids = decompress(ids, ids_size).map_err(|e| corrupt(e.to_string()))?;
        let codes = decompress(codes, codes_size).map_err(|e| corrupt(e.to_string()))?;
        if ids.len() != ids_size || codes.len() != codes_size {
            return Err(corrupt(format!("倒排列表 {i} 长度不符")));
        }
        invlists.ids[i] = bytemuck::pod_collect_to_vec(&ids);
        invlists.codes[i] = to_descriptors(&codes);
    }

    // 所有条目编号都必须指向有效的来源
    if owners.iter().any(|&o| o as usize >= sources.len()) {
        return Err(corrupt("来源表与倒排列表不一致".to_string()));
    }
    if invlists.ids.iter().flatten().any(|&id| id as usize >= ntotal) {
        return Err(corrupt("条目编号超出范围".to_string()));
    }

    let index = IvfIndex { centroids, invlists, sources, owners };
    Ok((index, header.fingerprint))
}

/// 从文件中取出一段数据，超出范围时返回错误
fn section(data: &[u8], offset: u64, size: u64) -> std::result::Result<&[u8], String> {
    usize::try_from(offset)
        .ok()
        .zip(usize::try_from(size).ok())
        .and_then(|(start, size)| Some(start..start.checked_add(size)?))
        .filter(|range| range.end <= data.len())
        .map(|range| &data[range])
        .ok_or_else(|| format!("数据段 {offset}+{size} 超出文件范围"))
}

fn to_descriptors(bytes: &[u8]) -> Vec<Descriptor> {
    bytes
        .chunks_exact(DESCRIPTOR_SIZE)
        .map(|chunk| {
            let mut d = [0u8; DESCRIPTOR_SIZE];
            d.copy_from_slice(chunk);
            d
        })
        .collect()
}

fn binrw_io(e: binrw::Error) -> std::io::Error {
    match e {
        binrw::Error::Io(e) => e,
        e => std::io::Error::other(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use rand::prelude::*;

    use super::*;
    use crate::config::IndexOptions;

    fn random_set(object_id: &str, n: usize, seed: u64) -> FeatureSet {
        let mut rng = StdRng::seed_from_u64(seed);
        let descriptors = (0..n)
            .map(|_| {
                let mut d = [0u8; DESCRIPTOR_SIZE];
                rng.fill(&mut d[..]);
                d
            })
            .collect();
        FeatureSet::new(object_id, "img", descriptors)
    }

    #[test]
    fn snapshot_restores_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.snapshot");
        let sets = [random_set("a", 1500, 1), random_set("b", 1500, 2)];
        let opts = IndexOptions::default();
        let index = IvfIndex::build(&sets, &opts);
        let fp = fingerprint(&sets);

        save_snapshot(&index, fp, &path).unwrap();
        let (loaded, loaded_fp) = load_snapshot(&path).unwrap();
        assert_eq!(loaded, index);
        assert_eq!(loaded_fp, fp);
    }

    #[test]
    fn flat_snapshot_restores_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.snapshot");
        let sets = [random_set("a", 3, 1), FeatureSet::new("b", "empty", vec![])];
        let index = IvfIndex::build(&sets, &IndexOptions::default());
        save_snapshot(&index, [0; 32], &path).unwrap();
        assert_eq!(load_snapshot(&path).unwrap().0, index);
    }

    #[test]
    fn fingerprint_depends_on_content_and_order() {
        let a = random_set("a", 10, 1);
        let b = random_set("b", 10, 2);
        assert_eq!(fingerprint([&a, &b]), fingerprint([&a, &b]));
        assert_ne!(fingerprint([&a, &b]), fingerprint([&b, &a]));
        assert_ne!(fingerprint([&a]), fingerprint([&random_set("a", 10, 3)]));
    }

    /// header 中 nlist 字段之后是 list_len[0]
    const NLIST_OFFSET: usize = 4 + 4 + 32 + 8 + 8 + 8;
    const LIST_LEN_OFFSET: usize = NLIST_OFFSET + 8;

    fn patched_snapshot(offset: usize, value: u64) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.snapshot");
        let sets = [random_set("a", 100, 1)];
        save_snapshot(&IvfIndex::build(&sets, &IndexOptions::default()), [1; 32], &path).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();
        (dir, path)
    }

    #[test]
    fn huge_list_len_is_corrupt() {
        for value in [1u64 << 61, u64::MAX, 101] {
            let (_dir, path) = patched_snapshot(LIST_LEN_OFFSET, value);
            assert!(matches!(load_snapshot(&path), Err(IndexError::Corrupt(_))));
        }
    }

    #[test]
    fn huge_nlist_is_corrupt() {
        for value in [1u64 << 40, u64::MAX] {
            let (_dir, path) = patched_snapshot(NLIST_OFFSET, value);
            assert!(matches!(load_snapshot(&path), Err(IndexError::Corrupt(_))));
        }
    }

    #[test]
    fn truncated_snapshot_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.snapshot");
        let sets = [random_set("a", 100, 1)];
        save_snapshot(&IvfIndex::build(&sets, &IndexOptions::default()), [1; 32], &path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
        assert!(matches!(load_snapshot(&path), Err(IndexError::Corrupt(_))));

        std::fs::write(&path, b"garbage").unwrap();
        assert!(matches!(load_snapshot(&path), Err(IndexError::Corrupt(_))));
    }
}
