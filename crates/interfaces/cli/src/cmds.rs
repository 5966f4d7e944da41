use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

use dirwatch_config::{AppConfig, EnrichmentProvider};
use dirwatch_llm::CommandEnricher;
use dirwatch_monitor::{Monitor, ScheduleSettings};
use dirwatch_snapshot::{file_diff, file_history};

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn scan(config: &AppConfig) -> Result<()> {
    let monitor = Monitor::from_config(config)?;
    let result = monitor.scan_now().await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

pub async fn digest(config: &AppConfig, files: &[PathBuf], template: Option<&Path>) -> Result<()> {
    let monitor = Monitor::from_config(config)?;
    let outcome = monitor.digest().generate(files, template).await?;
    let source = if outcome.enriched {
        monitor.enricher().name().to_string()
    } else {
        "local fallback".to_string()
    };
    println!("digest written to {} ({source})", outcome.path.display());
    Ok(())
}

pub async fn history(config: &AppConfig, path: &str, limit: usize) -> Result<()> {
    let root = monitor_root(config)?;
    let commits = file_history(&root, path, limit).await?;
    if commits.is_empty() {
        println!("no snapshot history for {path}");
        return Ok(());
    }
    for commit in commits {
        println!(
            "{}  {}  {:<12}  {}",
            commit.hash, commit.date, commit.author, commit.message
        );
    }
    Ok(())
}

pub async fn diff(config: &AppConfig, path: &str, commit: &str) -> Result<()> {
    let root = monitor_root(config)?;
    let patch = file_diff(&root, path, Some(commit)).await?;
    if patch.is_empty() {
        println!("no changes to {path} in {commit}");
    } else {
        print!("{patch}");
    }
    Ok(())
}

fn monitor_root(config: &AppConfig) -> Result<PathBuf> {
    config
        .root_path()
        .canonicalize()
        .with_context(|| format!("monitor root {}", config.monitor.root))
}

pub async fn doctor(config: &AppConfig, config_path: &Path) -> Result<()> {
    println!("dirwatch doctor");
    println!(
        "- config file: {} ({})",
        config_path.display(),
        if config_path.exists() { "found" } else { "not found, using defaults" }
    );

    let root = config.root_path();
    let root_ok = root.is_dir();
    println!(
        "- monitor root: {} ({})",
        root.display(),
        if root_ok { "ok" } else { "missing" }
    );
    println!("- report dir: {}", config.report_dir().display());
    println!("- change log: {}", config.change_log_path().display());

    match config.validate() {
        Ok(()) => println!("- configuration: valid"),
        Err(err) => println!("- configuration: INVALID: {err}"),
    }

    match ScheduleSettings::from_config(&config.schedule) {
        Ok(settings) => {
            let times: Vec<String> = settings
                .scheduler
                .times()
                .iter()
                .map(|t| t.format("%H:%M").to_string())
                .collect();
            let next = settings
                .scheduler
                .next_after(settings.clock.now())
                .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "never".to_string());
            println!(
                "- scan times: {} ({}), next at {next}",
                times.join(", "),
                config.schedule.timezone
            );
        }
        Err(err) => println!("- scan times: {err}"),
    }

    let enrichment = &config.enrichment;
    if !enrichment.enabled {
        println!("- enrichment: disabled (fallback narratives)");
    } else {
        match enrichment.provider {
            EnrichmentProvider::Command => {
                let probe = CommandEnricher::new(&enrichment.command)
                    .probe(PROBE_TIMEOUT)
                    .await;
                match probe {
                    Ok(version) => println!("- enrichment: command {} ({version})", enrichment.command),
                    Err(err) => println!("- enrichment: command {} unavailable: {err}", enrichment.command),
                }
            }
            EnrichmentProvider::Http => println!("- enrichment: http {}", enrichment.endpoint),
        }
    }

    println!(
        "- http boundary: {}",
        if config.server.enabled {
            format!("{}:{}", config.server.host, config.server.port)
        } else {
            "disabled".to_string()
        }
    );
    println!(
        "- git snapshots: {}",
        if config.snapshot.git_enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}

pub fn config(config: &AppConfig, path: &Path, write: bool) -> Result<()> {
    if write {
        config.save_to(path)?;
        println!("configuration written to {}", path.display());
    } else {
        print!("{}", toml::to_string_pretty(config)?);
    }
    Ok(())
}
