use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use clap::{Parser, Subcommand};
use directories::ProjectDirs;

use crate::cli::*;

static DATA_DIR: LazyLock<String> = LazyLock::new(|| {
    ProjectDirs::from("", "iqengines", "iqindex")
        .map(|dirs| dirs.data_dir().to_string_lossy().into_owned())
        .unwrap_or_else(|| "iqedata".to_string())
});

fn default_data_dir() -> &'static str {
    DATA_DIR.as_str()
}

#[derive(Parser, Debug, Clone, PartialEq)]
pub struct OrbOptions {
    /// ORB 特征点最大保留数量
    #[arg(short = 'n', value_name = "N", long, default_value_t = 500)]
    pub orb_nfeatures: u32,
    /// ORB 特征金字塔缩放因子
    #[arg(long, value_name = "SCALE", default_value_t = 1.2)]
    pub orb_scale_factor: f32,
    /// ORB 特征金字塔层数
    #[arg(long, value_name = "N", default_value_t = 8)]
    pub orb_nlevels: u32,
    /// FAST 角点检测器初始阈值
    #[arg(long, value_name = "THRESHOLD", default_value_t = 20)]
    pub orb_ini_th_fast: u8,
    /// FAST 角点检测器最小阈值，初始阈值找不到足够角点时使用
    #[arg(long, value_name = "THRESHOLD", default_value_t = 7)]
    pub orb_min_th_fast: u8,
    /// 特征点是否不需要方向信息
    #[arg(long)]
    pub orb_not_oriented: bool,
    /// 计算描述符前的高斯模糊强度
    #[arg(long, value_name = "SIGMA", default_value_t = 2.0)]
    pub orb_blur_sigma: f32,
    /// 图片最小边长，低于该值的图片视为无效
    #[arg(long, value_name = "PIXELS", default_value_t = 32)]
    pub min_size: u32,
    /// 图片最大尺寸，如果宽高**均**超过这个尺寸，则等比缩放
    #[arg(short = 'S', long, value_name = "WIDTHxHEIGHT", value_parser = parse_size, verbatim_doc_comment, default_value = "1080x768")]
    pub max_size: (u32, u32),
}

impl Default for OrbOptions {
    fn default() -> Self {
        Self {
            orb_nfeatures: 500,
            orb_scale_factor: 1.2,
            orb_nlevels: 8,
            orb_ini_th_fast: 20,
            orb_min_th_fast: 7,
            orb_not_oriented: false,
            orb_blur_sigma: 2.0,
            min_size: 32,
            max_size: (1080, 768),
        }
    }
}

#[derive(Parser, Debug, Clone, PartialEq)]
pub struct MatchOptions {
    /// 两个相似向量的允许的最大距离，范围从 0 到 256
    #[arg(long, value_name = "N", default_value_t = 64, value_parser = clap::value_parser!(u32).range(0..=256))]
    pub distance: u32,
    /// 最近邻与次近邻（不同物体）距离之比的上限，为 0 时不检查
    #[arg(long, value_name = "RATIO", default_value_t = 0.8)]
    pub ratio: f32,
    /// 每个查询描述符找到的最佳匹配数量
    #[arg(short, value_name = "K", default_value_t = 3)]
    pub k: usize,
    /// 判定为匹配所需的最少票数
    #[arg(long, value_name = "N", default_value_t = 4)]
    pub min_votes: usize,
    /// 搜索的倒排列表数量
    #[arg(long, default_value_t = 8)]
    pub nprobe: usize,
    /// 查询图片裁剪为正方形后缩放到的边长
    #[arg(long, value_name = "PIXELS", default_value_t = 150)]
    pub query_size: u32,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self { distance: 64, ratio: 0.8, k: 3, min_votes: 4, nprobe: 8, query_size: 150 }
    }
}

#[derive(Parser, Debug, Clone, PartialEq)]
pub struct IndexOptions {
    /// 聚类中心点数量，为 0 时根据特征数量自动选择
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub nlist: usize,
    /// k-modes 最大迭代次数
    #[arg(long, value_name = "N", default_value_t = 20)]
    pub max_iter: usize,
    /// k-modes 初始化使用的随机种子
    #[arg(long, value_name = "SEED", default_value_t = 42)]
    pub seed: u64,
    /// 每个倒排列表至少对应的特征数量，特征不足时退化为单个列表
    #[arg(long, value_name = "N", default_value_t = 30)]
    pub min_points_per_list: usize,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self { nlist: 0, max_iter: 20, seed: 42, min_points_per_list: 30 }
    }
}

/// 索引的全部配置
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexConfig {
    pub orb: OrbOptions,
    pub search: MatchOptions,
    pub index: IndexOptions,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "iqindex", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// iqindex 数据目录
    #[arg(short, long, default_value = default_data_dir())]
    pub data_dir: DataDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 从预置数据目录初始化
    Init(InitCommand),
    /// 提取图片特征并添加到物体
    Add(AddCommand),
    /// 使用已添加的特征构建索引
    Train(TrainCommand),
    /// 识别图片中的物体
    Search(SearchCommand),
    /// 列出所有物体
    List(ListCommand),
    /// 修改物体的名称和描述
    Describe(DescribeCommand),
    /// 在图片上标出特征点
    Show(ShowCommand),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDir {
    path: PathBuf,
}

impl DataDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回物体列表文件的路径
    pub fn manifest(&self) -> PathBuf {
        self.path.join("objects.json")
    }

    /// 返回索引快照文件的路径
    pub fn snapshot(&self) -> PathBuf {
        self.path.join("index.snapshot")
    }

    /// 返回存放所有物体目录的路径
    pub fn images(&self) -> PathBuf {
        self.path.join("objects")
    }
}

impl FromStr for DataDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

fn parse_size(s: &str) -> anyhow::Result<(u32, u32)> {
    let parts: Vec<&str> = s.split('x').collect();
    if parts.len() != 2 {
        return Err(anyhow::anyhow!("无效的尺寸: {}", s));
    }
    Ok((parts[0].parse()?, parts[1].parse()?))
}
