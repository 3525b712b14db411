use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "tokprobe")]
#[command(about = "Count and truncate text by tokens using a model's count-tokens API")]
#[command(long_about = "Count and truncate text by tokens using a model's count-tokens API.

Drop-in replacement for ttok:

    tokprobe one two three
    cat input.txt | tokprobe
    cat input.txt | tokprobe -t 100
    tokprobe -m claude-3-5-haiku-20241022 \"text\"")]
#[command(version)]
pub struct Cli {
    /// Text to count; words are joined with single spaces
    pub prompt: Vec<String>,

    /// Read text from a file (`-` for stdin), placed before the prompt
    #[arg(short, long = "input", value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Truncate to this many tokens instead of counting
    #[arg(short, long, value_name = "N")]
    pub truncate: Option<usize>,

    /// Model to count with (default from config)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Region substituted into the oracle endpoint
    #[arg(long)]
    pub region: Option<String>,

    /// Use this config file instead of the default location
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Print search and cache diagnostics as JSON on stderr
    #[arg(long)]
    pub metadata: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}
