use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use voxmatch::{
    Config, DetectContext, Detection, JsonlSink, Recognizer, Region, UnknownReason,
    add_regional_variants, phonetic_distance,
};

#[derive(Parser)]
#[command(name = "voxmatch", version, about = "Accent-tolerant voice command matching")]
struct Cli {
    /// Config file (default: $VOXMATCH_CONFIG or ./voxmatch.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Match transcripts read line by line from stdin (default)
    Listen,
    /// Match a single transcript
    Detect {
        #[arg(required = true)]
        text: Vec<String>,
        /// Show every scored candidate instead of the decision
        #[arg(long)]
        all: bool,
    },
    /// Print the accent variants of a phrase
    Variants {
        phrase: String,
        #[arg(long, default_value = "mixed")]
        region: Region,
    },
    /// Phonetic distance between two spellings
    Distance { a: String, b: String },
    /// List commands and their phrases
    Commands,
}

#[hotpath::main]
fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Listen) {
        Command::Variants { phrase, region } => {
            let variants = add_regional_variants(&phrase, region);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&variants)?);
            } else {
                for v in &variants {
                    println!("{v}");
                }
                eprintln!("{} variants ({region})", variants.len());
            }
            Ok(())
        }
        Command::Distance { a, b } => {
            let distance = phonetic_distance(&a, &b);
            if cli.json {
                println!("{}", serde_json::json!({ "a": a, "b": b, "distance": distance }));
            } else {
                println!("{distance:.3}");
            }
            Ok(())
        }
        Command::Commands => {
            let config = Config::load(cli.config.as_deref()).context("loading config")?;
            let recognizer = Recognizer::from_config(&config).context("building command catalog")?;
            print!("{}", recognizer.help_text());
            Ok(())
        }
        Command::Detect { text, all } => {
            let config = Config::load(cli.config.as_deref()).context("loading config")?;
            let recognizer = Recognizer::from_config(&config).context("building command catalog")?;
            let text = text.join(" ");

            if all {
                let candidates = recognizer.candidates(&text)?;
                if cli.json {
                    println!("{}", serde_json::to_string_pretty(&candidates)?);
                } else {
                    for c in &candidates {
                        println!(
                            "{:>6.2}/{:<4.0} {:<16} '{}' (quality {:.2})",
                            c.score, c.max_score, c.command, c.phrase, c.quality
                        );
                    }
                }
                return Ok(());
            }

            let mut ctx = context(&config);
            let detection = recognizer.detect(&mut ctx, &text);
            print_detection(&detection, cli.json)?;
            Ok(())
        }
        Command::Listen => {
            let config = Config::load(cli.config.as_deref()).context("loading config")?;
            run_listen(&config, cli.json)
        }
    }
}

fn context(config: &Config) -> DetectContext {
    let ctx = DetectContext::from_config(config);
    if !config.sink.enabled {
        return ctx;
    }
    match JsonlSink::open(&config.sink.path, config.sink.capacity) {
        Ok(sink) => ctx.with_sink(sink),
        Err(e) => {
            warn!(error = %e, "unrecognized input will not be saved");
            ctx
        }
    }
}

fn print_detection(detection: &Detection, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(detection)?);
    } else {
        println!("{detection}");
    }
    Ok(())
}

fn run_listen(config: &Config, json: bool) -> Result<()> {
    let recognizer = Recognizer::from_config(config).context("building command catalog")?;
    let mut ctx = context(config);
    info!("listening on stdin, one transcript per line");

    for line in io::stdin().lock().lines() {
        let line = line.context("reading stdin")?;
        if line.trim().is_empty() {
            continue;
        }

        let detection = recognizer.detect(&mut ctx, &line);
        print_detection(&detection, json)?;

        if !config.learning.auto_promote {
            continue;
        }
        let closest = match &detection {
            Detection::Unknown(u) if u.reason == UnknownReason::LowConfidence => u.closest.as_deref(),
            _ => None,
        };
        if let Some(command) = closest {
            match recognizer.learn_pronunciation(&ctx, &line, command) {
                Ok(Some(learned)) => eprintln!(
                    "Learned '{}' as {} after {} attempts",
                    learned.utterance, learned.command, learned.attempts
                ),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "could not learn pronunciation"),
            }
        }
    }

    eprintln!("\n{}", ctx.stats().summary().trim_end());
    let stats = ctx.tracker().statistics();
    eprintln!(
        "Threshold: current={:.1} base={:.1} failures={} successes={} avg_success={:.2}",
        stats.current_threshold,
        stats.base_threshold,
        stats.recent_failures,
        stats.recent_successes,
        stats.average_success_score
    );
    Ok(())
}
