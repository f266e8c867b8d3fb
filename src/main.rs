//! GPT decoder CLI
//!
//! Builds a freshly initialized model from a configuration and runs forward
//! passes or generation over raw token ids.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use clap::{Parser, ValueEnum};
use serde::Serialize;

use gpt_decoder::Batch;
use gpt_decoder::inference::{GenerationConfig, argmax, generate};
use gpt_decoder::model::{Gpt, GptConfig, parameter_count};

/// Output format for results.
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Plain,
    Json,
}

/// Run a decoder-only GPT transformer over token ids.
#[derive(Debug, Parser)]
#[command(
    name = "gpt-decoder",
    version,
    about = "Forward passes and generation with a decoder-only GPT transformer",
    long_about = "Builds a GPT decoder with N(0, 0.02) initialized weights and runs it over \
                  comma-separated token ids.\n\nCheckpoints are not loaded; the model is \
                  freshly initialized on every run."
)]
struct Cli {
    /// JSON model configuration (only `vocab_size` is required)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Vocabulary size when no config file is given
    #[arg(long, default_value = "50")]
    vocab_size: usize,

    /// Use the small two-layer preset instead of GPT-1 sizes
    #[arg(long)]
    tiny: bool,

    /// Comma-separated token ids, e.g. "1,5,9"
    #[arg(short, long)]
    tokens: Option<String>,

    /// Generate this many tokens after the given ids
    #[arg(short, long)]
    generate: Option<usize>,

    /// Sampling temperature (<= 0 means greedy)
    #[arg(long, default_value = "1.0")]
    temperature: f32,

    /// Top-k sampling (0 = disabled)
    #[arg(long, default_value = "0")]
    top_k: usize,

    /// Random seed for reproducible sampling
    #[arg(long)]
    seed: Option<u64>,

    /// Print model info and exit
    #[arg(long)]
    info: bool,

    #[arg(long, value_enum, default_value = "plain")]
    format: OutputFormat,
}

#[derive(Debug, Serialize)]
struct ForwardOutput {
    tokens: Vec<u32>,
    logits_shape: Vec<usize>,
    argmax: Vec<u32>,
    elapsed_ms: u64,
}

#[derive(Debug, Serialize)]
struct GenerateOutput {
    prompt: Vec<u32>,
    output: Vec<u32>,
    elapsed_ms: u64,
    seed: Option<u64>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gpt_decoder=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let device = Device::Cpu;
    let varmap = VarMap::new();
    let model = Gpt::init(config, &varmap, &device).context("build model")?;

    if cli.info {
        print_model_info(&model, &varmap);
        return Ok(());
    }

    let tokens = cli
        .tokens
        .as_deref()
        .context("No tokens provided. Usage: gpt-decoder --tokens 1,2,3 [--generate N]")?;
    let tokens = parse_tokens(tokens)?;

    match cli.generate {
        Some(n) => run_generate(&model, &cli, tokens, n),
        None => run_forward(&model, &cli, tokens),
    }
}

fn load_config(cli: &Cli) -> Result<GptConfig> {
    let config = match &cli.config {
        Some(path) => read_config(path)?,
        None if cli.tiny => GptConfig::tiny(cli.vocab_size),
        None => GptConfig::new(cli.vocab_size),
    };
    config.validate().context("invalid GptConfig")?;
    Ok(config)
}

fn read_config(path: &Path) -> Result<GptConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read config {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))
}

fn parse_tokens(raw: &str) -> Result<Vec<u32>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u32>().with_context(|| format!("invalid token id {s:?}")))
        .collect()
}

fn print_model_info(model: &Gpt, varmap: &VarMap) {
    let config = model.config();

    println!("GPT Decoder Model Info");
    println!("======================");
    println!();
    println!("  Vocabulary size: {} tokens", config.vocab_size);
    println!("  Context length:  {} tokens", config.block_size);
    println!("  Layers:          {}", config.num_layers_per_stack);
    println!("  Attention heads: {}", config.num_heads);
    println!("  Model dim:       {}", config.dim_model);
    println!("  FFN dim:         {}", config.dim_ffn);
    println!("  Dropout:         {}", config.dropout);
    println!("  Normalization:   {:?}", config.norm_placement);
    println!("  Activation:      {:?}", config.activation);
    println!("  Parameters:      {}", parameter_count(varmap));
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis().try_into().unwrap_or(u64::MAX)
}

fn run_forward(model: &Gpt, cli: &Cli, tokens: Vec<u32>) -> Result<()> {
    let len = tokens.len();
    let src = Tensor::from_vec(tokens.clone(), (1, len), model.device())?;
    let batch = Batch::causal(src)?;

    let start = Instant::now();
    let logits = model.forward(&batch)?;
    let elapsed_ms = elapsed_ms(start);

    let rows: Vec<Vec<f32>> = logits.squeeze(0)?.to_vec2()?;
    let output = ForwardOutput {
        tokens,
        logits_shape: logits.dims().to_vec(),
        argmax: rows.iter().map(|row| argmax(row)).collect(),
        elapsed_ms,
    };

    match cli.format {
        OutputFormat::Plain => {
            println!("logits shape: {:?}", output.logits_shape);
            println!("argmax:       {:?}", output.argmax);
            println!("elapsed:      {} ms", output.elapsed_ms);
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
    }
    Ok(())
}

fn run_generate(model: &Gpt, cli: &Cli, prompt: Vec<u32>, max_new_tokens: usize) -> Result<()> {
    let cfg = GenerationConfig {
        max_new_tokens,
        temperature: cli.temperature,
        top_k: cli.top_k,
        seed: cli.seed,
        eos_id: None,
    };

    let start = Instant::now();
    let output = generate(model, &prompt, &cfg).context("generation failed")?;
    let output = GenerateOutput {
        prompt,
        output,
        elapsed_ms: elapsed_ms(start),
        seed: cli.seed,
    };

    match cli.format {
        OutputFormat::Plain => {
            let ids: Vec<String> = output.output.iter().map(u32::to_string).collect();
            println!("{}", ids.join(","));
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
    }
    Ok(())
}
