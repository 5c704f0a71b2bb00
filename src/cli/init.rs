use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use crate::cli::SubCommandExtend;
use crate::config::{IndexConfig, IndexOptions, Opts};
use crate::facade::IqIndex;
use crate::store::install_seed;

#[derive(Parser, Debug, Clone)]
pub struct InitCommand {
    #[command(flatten)]
    pub index: IndexOptions,
    /// 预置数据目录，包含 objects.json 和 objects/
    pub source: PathBuf,
    /// 覆盖数据目录中已经存在的文件
    #[arg(long)]
    pub overwrite: bool,
    /// 只复制文件，不训练索引
    #[arg(long)]
    pub no_train: bool,
}

impl SubCommandExtend for InitCommand {
    fn run(&self, opts: &Opts) -> Result<()> {
        let copied = install_seed(&self.source, opts.data_dir.path(), self.overwrite)?;
        println!("复制了 {copied} 个文件");

        if !self.no_train {
            let config = IndexConfig { index: self.index.clone(), ..Default::default() };
            let index = IqIndex::builder().config(config).open(&opts.data_dir)?;
            println!("{} 个物体，{} 张图片", index.object_count(), index.num_images());
        }
        Ok(())
    }
}
