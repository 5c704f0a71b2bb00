use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Parser, ValueEnum};
use log::debug;
use serde::Serialize;

use crate::cli::{SubCommandExtend, load_index};
use crate::config::{IndexConfig, MatchOptions, Opts, OrbOptions};
use crate::image::Image;

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub orb: OrbOptions,
    #[command(flatten)]
    pub search: MatchOptions,
    /// 被搜索的图片路径
    pub image: PathBuf,
    /// 先裁剪出图片中心的正方形区域，再缩放到 --query-size
    #[arg(long)]
    pub center_crop: bool,
    /// 最多输出的候选物体数量
    #[arg(short, long, default_value_t = 10)]
    pub count: usize,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", default_value = "table")]
    pub output_format: OutputFormat,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Table,
}

#[derive(Serialize)]
struct SearchEntry<'a> {
    object_id: &'a str,
    name: &'a str,
    votes: usize,
    distance_sum: u64,
}

#[derive(Serialize)]
struct SearchResult<'a> {
    /// 判定的物体序号
    matched: Option<usize>,
    candidates: Vec<SearchEntry<'a>>,
}

impl SubCommandExtend for SearchCommand {
    fn run(&self, opts: &Opts) -> Result<()> {
        let config = IndexConfig { orb: self.orb.clone(), search: self.search.clone(), ..Default::default() };
        let index = load_index(opts, config)?;
        if !index.is_trained() {
            bail!("索引尚未训练，请先运行 train");
        }

        let mut image = Image::open(&self.image)?;
        if self.center_crop {
            image = image.center_square(self.search.query_size)?;
        }
        debug!("查询图片尺寸 {}x{}", image.width(), image.height());

        let ranked = index.rank(&image)?;
        let matched = index.match_image(&image)?;
        let candidates = ranked
            .iter()
            .take(self.count)
            .map(|c| SearchEntry {
                object_id: &c.object_id,
                name: index.name(&c.object_id).unwrap_or_default(),
                votes: c.votes,
                distance_sum: c.distance_sum,
            })
            .collect::<Vec<_>>();

        print_result(&SearchResult { matched, candidates }, self.output_format)
    }
}

fn print_result(result: &SearchResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        OutputFormat::Table => {
            for c in &result.candidates {
                println!("{}\t{}\t{}\t{}", c.votes, c.distance_sum, c.object_id, c.name);
            }
            match result.matched {
                Some(ordinal) => println!("match: {ordinal}"),
                None => println!("match: none"),
            }
        }
    }
    Ok(())
}
