use clap::Parser;
use iqindex::Opts;
use iqindex::cli::SubCommandExtend;
use iqindex::config::SubCommand;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let opts = Opts::parse();
    match &opts.subcmd {
        SubCommand::Init(config) => config.run(&opts),
        SubCommand::Add(config) => config.run(&opts),
        SubCommand::Train(config) => config.run(&opts),
        SubCommand::Search(config) => config.run(&opts),
        SubCommand::List(config) => config.run(&opts),
        SubCommand::Describe(config) => config.run(&opts),
        SubCommand::Show(config) => config.run(&opts),
    }
}
