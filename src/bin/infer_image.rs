//! infer_image - run one-shot ripeness inference on an image file.
//!
//! Uses the same config and detector backend as `lychee_api` and prints the
//! `/v1/infer/image` response body to stdout.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;

use lychee_ripe::{
    config::{LycheeConfig, CONFIG_ENV},
    decode_image_bytes,
    detect::build_registry,
    schema::ImageInferResponse,
    InferencePipeline,
};

#[derive(Parser, Debug)]
#[command(name = "infer_image", about = "Run ripeness inference on one image")]
struct Args {
    /// Image file (JPEG or PNG)
    #[arg(long, value_name = "PATH")]
    image: PathBuf,

    /// Config file; falls back to built-in defaults
    #[arg(long, value_name = "PATH", env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Pretty-print the JSON response
    #[arg(long)]
    pretty: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let config = LycheeConfig::load_from(args.config.as_deref())?;
    let registry = build_registry(&config.model)?;
    let detector = registry
        .default_backend()
        .ok_or_else(|| anyhow!("no detector backend registered"))?;
    {
        let mut backend = detector
            .lock()
            .map_err(|_| anyhow!("detector lock poisoned"))?;
        backend.load()?;
    }

    let bytes = std::fs::read(&args.image)
        .with_context(|| format!("failed to read {}", args.image.display()))?;
    let frame = decode_image_bytes(&bytes)?;

    let pipeline = InferencePipeline::new(
        detector,
        config.model.model_version.clone(),
        config.schema_version.clone(),
    );
    let (result, inference_ms) = pipeline.infer_image(&frame)?;
    let response = ImageInferResponse {
        model_version: pipeline.model_version().to_string(),
        schema_version: pipeline.schema_version().to_string(),
        inference_ms,
        result,
    };

    let out = if args.pretty {
        serde_json::to_string_pretty(&response)?
    } else {
        serde_json::to_string(&response)?
    };
    println!("{out}");
    Ok(())
}
