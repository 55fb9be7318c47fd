//! CLI Module
//!
//! Command-line interface for offline synthesis and scene rendering.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Soundscape - procedural ambient sound synthesis and mixing
#[derive(Parser, Debug)]
#[command(name = "soundscape")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Engine configuration file (JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the sound categories
    #[command(name = "categories")]
    Categories,

    /// Synthesize one category's loop buffer to a WAV file
    #[command(name = "generate")]
    Generate {
        /// Sound category (e.g. rain, pink, coffee-shop)
        category: String,

        /// Output WAV path
        #[arg(short, long)]
        output: PathBuf,

        /// Loop length in seconds (defaults to the category's configured length)
        #[arg(short, long)]
        duration: Option<f64>,

        /// RNG seed for reproducible output
        #[arg(long)]
        seed: Option<u64>,

        /// Sample rate of the generated buffer
        #[arg(long)]
        sample_rate: Option<u32>,

        /// Output bit depth: 16, 24 or 32 (float)
        #[arg(long, default_value_t = 16)]
        bit_depth: u16,
    },

    /// Mix a scene description through the engine and render it to WAV
    #[command(name = "render")]
    Render {
        /// Scene JSON: {"masterVolume": 0.8, "layers": [{"category": "rain", "volume": 0.3}]}
        scene: PathBuf,

        /// Output WAV path
        #[arg(short, long)]
        output: PathBuf,

        /// Seconds of audio to render
        #[arg(short, long, default_value_t = 10.0)]
        seconds: f64,

        /// Directory that layer `source` paths are resolved against
        #[arg(long)]
        assets: Option<PathBuf>,

        /// Print a spectrum summary of the rendered mix
        #[arg(long)]
        analyse: bool,

        /// Output bit depth: 16, 24 or 32 (float)
        #[arg(long, default_value_t = 16)]
        bit_depth: u16,
    },
}
