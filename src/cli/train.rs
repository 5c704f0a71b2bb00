use anyhow::Result;
use clap::Parser;

use crate::cli::{SubCommandExtend, load_index};
use crate::config::{IndexConfig, IndexOptions, Opts};

#[derive(Parser, Debug, Clone)]
pub struct TrainCommand {
    #[command(flatten)]
    pub index: IndexOptions,
}

impl SubCommandExtend for TrainCommand {
    fn run(&self, opts: &Opts) -> Result<()> {
        let config = IndexConfig { index: self.index.clone(), ..Default::default() };
        let mut index = load_index(opts, config)?;
        index.train()?;

        if let Some(ivf) = index.index() {
            println!(
                "{} 个物体，{} 张图片，{} 个描述符，{} 个倒排列表",
                index.object_count(),
                index.num_images(),
                ivf.ntotal(),
                ivf.nlist()
            );
        }
        Ok(())
    }
}
