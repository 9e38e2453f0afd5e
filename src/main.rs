mod cli;
mod config;
mod decode;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cli::Cli;
use vocalscale::music::note::PITCH_CLASS_NAMES;
use vocalscale::{AnalysisError, AnalysisReport, Analyzer, CancelToken, ScaleLibrary, ScaleRecommendationResult};

#[derive(Serialize)]
struct JsonOutput<'a> {
    report: &'a AnalysisReport,
    recommendations: &'a [ScaleRecommendationResult],
}

fn main() -> Result<()> {
    let mut cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();

    // Load config: explicit --config path, or auto-detect vocalscale.toml / global config
    let config_path = cli.config.clone().or_else(find_config);
    let cfg = match config_path {
        Some(ref path) => match config::load_config(path) {
            Some(cfg) => {
                log::info!("Loaded config from {}", path.display());
                cfg
            }
            None => {
                log::warn!("Failed to load config from {}", path.display());
                config::Config::default()
            }
        },
        None => config::Config::default(),
    };

    // Merge: config values apply only when the CLI is at its default
    let mut recommend = cfg.recommend.clone();
    if cli.max_results == 5 { cli.max_results = recommend.max_results; }
    if cli.min_similarity == 0.2 { cli.min_similarity = recommend.min_similarity_threshold; }
    if cli.a4 == 440.0 { cli.a4 = cfg.analysis.reference_a4; }
    if cli.mood.is_none() { cli.mood = recommend.preferred_mood; }
    if cli.genre.is_empty() { cli.genre = recommend.preferred_genres.clone(); }
    if cli.scales.is_none() { cli.scales = cfg.analysis.scales.clone(); }
    recommend.max_results = cli.max_results;
    recommend.min_similarity_threshold = cli.min_similarity;
    recommend.preferred_mood = cli.mood;
    recommend.preferred_genres = cli.genre.clone();

    let mut analysis = cfg.analysis_config();
    analysis.reference_a4 = cli.a4;
    if let Some(secs) = cli.timeout {
        analysis.timeout = Some(config::secs_to_duration(secs).context("--timeout must be a positive number of seconds")?);
    }

    let library = match cli.scales {
        Some(ref path) => load_library(path)?,
        None => ScaleLibrary::builtin(),
    };

    // List scales mode
    if cli.list_scales {
        println!("Available scales:");
        for scale in &library {
            println!(
                "  {:<18} {:<32} {:<11} {:<10} complexity {}",
                scale.id,
                scale.name,
                scale.scale_type.label(),
                scale.mood,
                scale.complexity
            );
        }
        return Ok(());
    }

    let input = cli.input.as_ref().context("Input audio file is required")?;
    if !input.exists() {
        anyhow::bail!("Input file not found: {}", input.display());
    }

    log::info!("vocalscale - sung-note scale recommender");
    log::info!("Input: {}", input.display());
    log::info!("Scales: {} ({} in library)", cli.scales.as_ref().map_or("built-in".into(), |p| p.display().to_string()), library.len());

    // 1. Decode audio
    log::info!("Decoding audio...");
    let audio = decode::decode_audio(input)?;

    // 2. Analyze
    let analyzer = Analyzer::new(analysis).context("Invalid analysis configuration")?;
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg} [{elapsed_precise}]")?);
    spinner.set_message("Analyzing audio...");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let cancel = CancelToken::new();
    let report = analyzer.analyze(&audio.samples, audio.sample_rate, &cancel);
    spinner.finish_and_clear();
    let report = report.context("Analysis failed")?;

    // 3. Recommend
    let recommendations = match analyzer.recommend(&report, &library, &recommend) {
        Ok(results) => results,
        Err(AnalysisError::InsufficientData(reason)) => {
            log::warn!("No scale recommendations: {}", reason);
            Vec::new()
        }
        Err(e) => return Err(e).context("Recommendation failed"),
    };

    if cli.json {
        let output = JsonOutput {
            report: &report,
            recommendations: &recommendations,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_report(&report, &recommendations);
    }
    Ok(())
}

fn find_config() -> Option<PathBuf> {
    let local = PathBuf::from("vocalscale.toml");
    if local.exists() {
        return Some(local);
    }
    if let Some(home) = dirs::home_dir() {
        let xdg = home.join(".config").join("vocalscale").join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        let platform = config_dir.join("vocalscale").join("config.toml");
        if platform.exists() {
            return Some(platform);
        }
    }
    None
}

fn load_library(path: &Path) -> Result<ScaleLibrary> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read scale library: {}", path.display()))?;
    let library = ScaleLibrary::from_toml_str(&source)
        .with_context(|| format!("Invalid scale library: {}", path.display()))?;
    log::info!("Loaded {} scales from {}", library.len(), path.display());
    Ok(library)
}

fn print_report(report: &AnalysisReport, recommendations: &[ScaleRecommendationResult]) {
    println!(
        "Duration {:.1}s, {:.0}% voiced, {} of {} syllables kept",
        report.duration,
        report.speech_ratio * 100.0,
        report.syllables.len(),
        report.raw_syllable_count
    );

    println!("\nNotes:");
    if report.syllables.is_empty() {
        println!("  (none)");
    }
    for syllable in &report.syllables {
        if let Some(ref note) = syllable.note {
            println!(
                "  {:>7.2}s  {:<4} {:>8.1} Hz  {:+6.1} cents  {:.2}s",
                syllable.start_time,
                note.name,
                note.frequency,
                note.deviation_cents,
                note.duration
            );
        }
    }

    let names: Vec<&str> = report
        .pitch_classes
        .iter()
        .map(|&pc| PITCH_CLASS_NAMES[pc as usize % 12])
        .collect();
    println!("\nPitch classes: {}", if names.is_empty() { "-".into() } else { names.join(" ") });

    println!("\nRecommended scales:");
    if recommendations.is_empty() {
        println!("  (none)");
    }
    for (rank, result) in recommendations.iter().enumerate() {
        let matching: Vec<&str> = result
            .matching_notes
            .iter()
            .map(|&pc| PITCH_CLASS_NAMES[pc as usize % 12])
            .collect();
        println!(
            "  {:>2}. {:<32} confidence {:.2}  similarity {:.2}  coverage {:>3.0}%  [{}]",
            rank + 1,
            result.scale.name,
            result.confidence_score,
            result.similarity_score,
            result.coverage * 100.0,
            matching.join(" ")
        );
    }
}
