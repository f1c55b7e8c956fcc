use clap::Parser;
use tracing::info;

use devdash::aggregator::TaskAggregator;
use devdash::cli::{Cli, OutputFormat};
use devdash::config::Config;
use devdash::report;

fn main() {
    let cli = Cli::parse();
    devdash::logging::init(cli.log_format);

    info!("devdash starting");

    let config = match Config::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    info!(?config, "config loaded");

    let aggregator = TaskAggregator::from_config(&config);

    let tasks = aggregator.fetch_all(&config.service_tree);

    let output = match config.format {
        OutputFormat::Table => report::render_table(&config.service_tree, &tasks),
        OutputFormat::Json => match report::render_json(&config.service_tree, &tasks) {
            Ok(json) => json,
            Err(e) => {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        },
    };
    println!("{}", output.trim_end());
}
