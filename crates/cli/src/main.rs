//! CLI tool for serializing dialogue notebooks into training JSONL.
//!
//! This tool processes `.ipynb` notebook files that encode a synthetic
//! human/assistant dialogue and outputs role-labeled conversation records in
//! JSONL format. Role imputation, code-language tagging, and free-form
//! metadata parsing go through an OpenAI-compatible completion endpoint.

use std::path::PathBuf;

use clap::Parser;

use notebook_dialogue_core::{
    process_all_notebooks, write_jsonl_output, CompletionRequest, CompletionService, Manifest,
    PipelineConfig, ServiceError,
};

/// Serialize dialogue notebooks to conversation-record JSONL.
#[derive(Parser, Debug)]
#[command(name = "notebook-dialogue-serialize")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Root directory containing .ipynb notebook files
    #[arg(long)]
    notebook_root: PathBuf,

    /// Output directory for JSONL files
    #[arg(long)]
    output_dir: PathBuf,

    /// Optional tracking manifest CSV restricting and annotating the batch
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Model name for the completion endpoint
    #[arg(long, default_value = "gpt-4-1106-preview")]
    model: String,

    /// Base URL of the OpenAI-compatible completion endpoint
    #[arg(long, default_value = "https://api.openai.com/v1")]
    base_url: String,

    /// Environment variable holding the API key
    #[arg(long, default_value = "OPENAI_API_KEY")]
    api_key_env: String,

    /// Minimum messages required to keep a record
    #[arg(long, default_value = "2")]
    min_messages: usize,

    /// Fraction of records for validation (0.0-1.0)
    #[arg(long, default_value = "0.1")]
    val_ratio: f64,

    /// Number of parallel workers (defaults to the rayon global pool size)
    #[arg(long)]
    max_workers: Option<usize>,
}

/// Completion service backed by an OpenAI-compatible chat endpoint.
///
/// The blocking client is shared across rayon workers; deterministic requests
/// pin temperature 0 and a fixed seed so reruns over the same notebooks
/// produce identical records.
struct OpenAiCompletionService {
    client: reqwest::blocking::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl OpenAiCompletionService {
    fn new(base_url: String, model: String, api_key: String) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key,
        }
    }
}

impl CompletionService for OpenAiCompletionService {
    fn complete(&self, request: &CompletionRequest) -> Result<String, ServiceError> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": request.system_instruction},
                {"role": "user", "content": request.context},
            ],
            "max_tokens": request.max_tokens,
        });
        if request.deterministic {
            body["temperature"] = serde_json::json!(0);
            body["seed"] = serde_json::json!(42);
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| ServiceError(e.to_string()))?;

        let payload: serde_json::Value =
            response.json().map_err(|e| ServiceError(e.to_string()))?;
        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ServiceError("malformed completion response".to_string()))
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    if let Some(workers) = args.max_workers {
        rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build_global()?;
    }

    let api_key = std::env::var(&args.api_key_env)
        .map_err(|_| format!("API key environment variable {} is not set", args.api_key_env))?;
    let service =
        OpenAiCompletionService::new(args.base_url.clone(), args.model.clone(), api_key);

    let manifest = match &args.manifest {
        Some(path) => {
            let manifest = Manifest::from_path(path)?;
            println!("Loaded manifest with {} task(s) from {:?}", manifest.len(), path);
            Some(manifest)
        }
        None => None,
    };

    let config = PipelineConfig {
        min_messages: args.min_messages,
        val_ratio: args.val_ratio,
    };

    println!("Processing notebooks from {:?}...", args.notebook_root);
    let results =
        process_all_notebooks(&args.notebook_root, &service, &config, manifest.as_ref())?;

    let total_converted = results.len();
    if total_converted == 0 {
        return Err("every notebook in the batch failed to convert".into());
    }
    println!("Converted {} notebooks", total_converted);

    println!("Writing output to {:?}...", args.output_dir);
    let result = write_jsonl_output(results, &args.output_dir, args.val_ratio)?;

    let metadata_path = args.output_dir.join("metadata.json");
    let metadata = serde_json::json!({
        "config": {
            "notebook_root": args.notebook_root.to_string_lossy(),
            "output_dir": args.output_dir.to_string_lossy(),
            "manifest": args.manifest.as_ref().map(|p| p.to_string_lossy().to_string()),
            "model": args.model,
            "base_url": args.base_url,
            "min_messages": args.min_messages,
            "val_ratio": args.val_ratio,
        },
        "counts": {
            "total_notebooks": result.total_notebooks,
            "total_records": result.total_records,
            "train_records": result.train_records,
            "val_records": result.val_records,
        },
        "stats": {
            "total_messages": result.total_messages,
            "total_turn_groups": result.total_turn_groups,
            "avg_messages_per_record": if result.total_records > 0 {
                result.total_messages as f64 / result.total_records as f64
            } else {
                0.0
            },
        },
        "files": {
            "train_path": args.output_dir.join("training.jsonl").to_string_lossy(),
            "val_path": args.output_dir.join("validation.jsonl").to_string_lossy(),
        },
    });
    std::fs::write(&metadata_path, serde_json::to_string_pretty(&metadata)?)?;

    println!("\n[summary]");
    println!("  Total notebooks converted: {}", result.total_notebooks);
    println!("  Train records: {}", result.train_records);
    println!("  Val records: {}", result.val_records);
    println!("  Total messages: {}", result.total_messages);
    println!("  Total turn groups: {}", result.total_turn_groups);
    println!("  Output: {:?}/{{training,validation}}.jsonl", args.output_dir);
    println!("  Metadata: {:?}", metadata_path);

    Ok(())
}
