mod add;
mod describe;
mod init;
mod list;
mod search;
mod show;
mod train;

pub use add::*;
pub use describe::*;
pub use init::*;
pub use list::*;
pub use search::*;
pub use show::*;
pub use train::*;

use crate::config::{IndexConfig, Opts};
use crate::facade::IqIndex;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> anyhow::Result<()>;
}

/// 加载数据目录中的索引，不进行训练
fn load_index(opts: &Opts, config: IndexConfig) -> anyhow::Result<IqIndex> {
    let mut index = IqIndex::builder().config(config).build();
    index.load_data_dir(&opts.data_dir)?;
    for id in index.quarantined() {
        log::warn!("物体 {id} 的数据已损坏，已跳过");
    }
    Ok(index)
}
