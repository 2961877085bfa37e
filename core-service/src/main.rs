//! AI Engine - Command Entry Point
//!
//! `ai-engine <train|predict|serve|export>`, request JSON đọc từ stdin.
//! Log ra stderr, stdout chỉ chứa kết quả để process cha parse.

use std::io::{self, BufRead, Read, Write};

use anyhow::{bail, Context};

use ai_security_engine::constants::{APP_NAME, ENGINE_VERSION};
use ai_security_engine::error::EngineError;
use ai_security_engine::logic::ai_bridge::{handle_json, ModelStore};
use ai_security_engine::logic::model::{run_export, ExportRequest};
use ai_security_engine::logic::training::{result_line, run_training, TrainingRequest};

fn read_stdin() -> anyhow::Result<String> {
    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .context("failed to read request from stdin")?;
    Ok(input)
}

fn train() -> anyhow::Result<()> {
    let input = read_stdin()?;
    let outcome = TrainingRequest::from_json(&input).and_then(|request| run_training(&request));
    if let Err(e) = &outcome {
        log::error!("Training failed: {}", e);
    }
    println!("{}", result_line(&outcome));
    Ok(())
}

fn export() -> anyhow::Result<()> {
    let input = read_stdin()?;
    let outcome = serde_json::from_str::<ExportRequest>(&input)
        .map_err(EngineError::from)
        .and_then(|request| run_export(&request));
    if let Err(e) = &outcome {
        log::error!("Export failed: {}", e);
    }
    println!("{}", result_line(&outcome));
    Ok(())
}

fn predict() -> anyhow::Result<()> {
    let input = read_stdin()?;
    let response = handle_json(&ModelStore::new(), &input);
    println!("{}", serde_json::to_string(&response)?);
    Ok(())
}

/// One request per line, one response per line; packages stay cached
fn serve() -> anyhow::Result<()> {
    let store = ModelStore::new();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for line in io::stdin().lock().lines() {
        let line = line.context("failed to read request line")?;
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_json(&store, &line);
        writeln!(out, "{}", serde_json::to_string(&response)?)?;
        out.flush()?;
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let command = std::env::args().nth(1).unwrap_or_else(|| "predict".to_string());
    log::info!("{} engine v{} - {}", APP_NAME, ENGINE_VERSION, command);

    match command.as_str() {
        "train" => train(),
        "predict" => predict(),
        "serve" => serve(),
        "export" => export(),
        other => bail!("unknown command '{}' (expected train, predict, serve or export)", other),
    }
}
