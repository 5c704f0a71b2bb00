use anyhow::Result;
use clap::Parser;
use serde::Serialize;

use crate::cli::{OutputFormat, SubCommandExtend, load_index};
use crate::config::{IndexConfig, Opts};

#[derive(Parser, Debug, Clone)]
pub struct ListCommand {
    /// 输出格式
    #[arg(long, value_name = "FORMAT", default_value = "table")]
    pub output_format: OutputFormat,
}

#[derive(Serialize)]
struct ObjectEntry<'a> {
    ordinal: usize,
    id: &'a str,
    name: &'a str,
    meta: &'a str,
    images: &'a [String],
}

impl SubCommandExtend for ListCommand {
    fn run(&self, opts: &Opts) -> Result<()> {
        let index = load_index(opts, IndexConfig::default())?;

        let entries = (0..index.object_count())
            .filter_map(|ordinal| {
                let id = index.object_id_at(ordinal)?;
                Some(ObjectEntry {
                    ordinal,
                    id,
                    name: index.name(id)?,
                    meta: index.metadata(id)?,
                    images: index.image_ids(id)?,
                })
            })
            .collect::<Vec<_>>();

        match self.output_format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
            OutputFormat::Table => {
                for e in entries {
                    println!("{}\t{}\t{}\t{}", e.ordinal, e.id, e.name, e.images.len());
                }
            }
        }
        Ok(())
    }
}
