use clap::Parser;
use std::path::PathBuf;
use vocalscale::{Genre, Mood};

#[derive(Parser, Debug)]
#[command(name = "vocalscale", about = "Detects sung notes in a recording and recommends matching scales")]
pub struct Cli {
    /// Input audio file (WAV, MP3, FLAC, OGG)
    pub input: Option<PathBuf>,

    /// Config file (defaults to vocalscale.toml, then the user config dir)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Scale library TOML file replacing the built-in scales
    #[arg(long)]
    pub scales: Option<PathBuf>,

    /// Number of scales to recommend
    #[arg(short = 'n', long, default_value_t = 5)]
    pub max_results: usize,

    /// Preferred mood (happy, sad, calm, energetic, mysterious, romantic, dramatic, neutral)
    #[arg(long)]
    pub mood: Option<Mood>,

    /// Preferred genres (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub genre: Vec<Genre>,

    /// Minimum Jaccard similarity for a scale to be listed (0.0-1.0)
    #[arg(long, default_value_t = 0.2)]
    pub min_similarity: f32,

    /// Reference pitch of A4 in Hz
    #[arg(long, default_value_t = 440.0)]
    pub a4: f32,

    /// Abort the analysis after this many seconds
    #[arg(long)]
    pub timeout: Option<f32>,

    /// Print the report and recommendations as JSON
    #[arg(long)]
    pub json: bool,

    /// List available scales and exit
    #[arg(long)]
    pub list_scales: bool,

    /// Debug-level logging
    #[arg(short, long)]
    pub verbose: bool,
}
