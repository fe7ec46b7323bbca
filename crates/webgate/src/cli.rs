use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "webgate", version, about = "Authorization-and-relay reverse proxy")]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.yaml")]
    pub config: PathBuf,

    /// Listen address (overrides config file setting)
    #[arg(long)]
    pub listen: Option<String>,

    /// Additional allowed URL pattern (repeatable, appended to the config
    /// file's list)
    #[arg(long = "url-pattern")]
    pub url_patterns: Vec<String>,
}
