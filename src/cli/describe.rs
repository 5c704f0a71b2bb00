use anyhow::Result;
use clap::Parser;

use crate::cli::{SubCommandExtend, load_index};
use crate::config::{IndexConfig, Opts};

#[derive(Parser, Debug, Clone)]
pub struct DescribeCommand {
    /// 物体 ID
    pub object_id: String,
    /// 显示名称
    pub name: String,
    /// 物体描述
    #[arg(short, long, default_value = "")]
    pub meta: String,
}

impl SubCommandExtend for DescribeCommand {
    fn run(&self, opts: &Opts) -> Result<()> {
        let mut index = load_index(opts, IndexConfig::default())?;
        index.describe(&self.object_id, &self.name, &self.meta)?;
        Ok(())
    }
}
