use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use indicatif::ParallelProgressIterator;
use log::{info, warn};
use rayon::prelude::*;
use regex::Regex;
use walkdir::WalkDir;

use crate::cli::{SubCommandExtend, load_index};
use crate::config::{IndexConfig, IndexOptions, Opts, OrbOptions};
use crate::error::IndexError;
use crate::image::Image;
use crate::types::FeatureSet;
use crate::utils::pb_style;

#[derive(Parser, Debug, Clone)]
pub struct AddCommand {
    #[command(flatten)]
    pub orb: OrbOptions,
    #[command(flatten)]
    pub index: IndexOptions,
    /// 图片所在目录，每个子目录对应一个物体，目录名为物体 ID，文件名为图片 ID
    pub path: PathBuf,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "jpg,png,webp")]
    pub suffix: String,
    /// 添加完成后重新训练索引
    #[arg(long)]
    pub train: bool,
}

/// 从图片路径得到 (物体 ID, 图片 ID)
fn identify(path: &Path) -> Option<(String, String)> {
    let image_id = path.file_stem()?.to_str()?;
    let object_id = path.parent()?.file_name()?.to_str()?;
    Some((object_id.to_string(), image_id.to_string()))
}

impl SubCommandExtend for AddCommand {
    fn run(&self, opts: &Opts) -> Result<()> {
        let re_suf = Regex::new(&format!("(?i)^({})$", self.suffix.replace(',', "|")))?;
        let config =
            IndexConfig { orb: self.orb.clone(), index: self.index.clone(), ..Default::default() };
        let mut index = load_index(opts, config)?;

        let mut entries = WalkDir::new(&self.path)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| {
                path.extension().is_some_and(|ext| re_suf.is_match(&ext.to_string_lossy()))
            })
            .collect::<Vec<_>>();
        entries.sort();

        let extractor = index.extractor();
        let sets = entries
            .par_iter()
            .progress_with_style(pb_style())
            .filter_map(|path| {
                let Some((object_id, image_id)) = identify(path) else {
                    warn!("无法识别物体 ID：{}", path.display());
                    return None;
                };
                let result = Image::open(path).and_then(|image| extractor.extract(&image));
                match result {
                    Ok(descriptors) => Some(FeatureSet::new(object_id, image_id, descriptors)),
                    Err(e) => {
                        warn!("{}: {e}", path.display());
                        None
                    }
                }
            })
            .collect::<Vec<_>>();

        let (mut added, mut skipped) = (0, 0);
        for set in sets {
            let name = format!("{}/{}", set.object_id, set.image_id);
            match index.add_features(set) {
                Ok(()) => added += 1,
                Err(e @ (IndexError::InvalidIdentifier(_) | IndexError::Corrupt(_))) => {
                    warn!("跳过 {name}: {e}");
                    skipped += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
        info!("添加了 {added} 张图片，跳过 {skipped} 张");

        if self.train {
            index.train()?;
        }
        println!("{added} added, {skipped} skipped");
        Ok(())
    }
}
