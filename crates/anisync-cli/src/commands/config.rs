use super::Session;
use crate::output::Output;
use crate::ConfigCommands;
use anisync_config::{AccountConfig, Config, RemoteKind};
use color_eyre::eyre::eyre;
use color_eyre::Result;
use comfy_table::{Cell, Table};
use owo_colors::OwoColorize;
use serde_json::json;
use std::path::PathBuf;

pub fn run_config(cmd: ConfigCommands, session: &Session, output: &Output) -> Result<()> {
    match cmd {
        ConfigCommands::Show { full } => show_config(full, session, output),
        ConfigCommands::Init {
            force,
            remote_url,
            remote_dir,
            account,
            verified,
        } => init_config(force, remote_url, remote_dir, account, verified, session, output),
    }
}

fn show_config(full: bool, session: &Session, output: &Output) -> Result<()> {
    let config = &session.config;
    let token = config.remote.api_token.as_deref().unwrap_or_default();
    let token_display = if full { token.to_string() } else { mask_string(token) };

    if !output.is_human() {
        output.data(&json!({
            "config_file": session.config_file,
            "exists": session.config_file.exists(),
            "sync": config.sync,
            "remote": {
                "kind": config.remote.kind,
                "base_url": config.remote.base_url,
                "api_token": token_display,
                "directory": session.remote_dir(),
                "request_timeout_secs": config.remote.request_timeout_secs,
            },
            "account": config.account,
            "logging": config.logging,
        }));
        return Ok(());
    }

    if !session.config_file.exists() {
        output.warn(format!(
            "Configuration file not found at {}; showing defaults. Run 'anisync config init' to create it.",
            session.config_file.display()
        ));
    }

    println!("\n{}", "Configuration".bright_cyan().bold());
    println!();

    let mut info_table = section("Config File");
    info_table.add_row(vec![Cell::new("Path"), Cell::new(session.config_file.display().to_string())]);
    println!("{}\n", info_table);

    let mut account_table = section("Account");
    match &config.account {
        Some(account) => {
            account_table.add_row(vec![Cell::new("Id"), Cell::new(&account.id)]);
            account_table.add_row(vec![Cell::new("Verified"), Cell::new(check(account.verified))]);
        }
        None => {
            account_table.add_row(vec![Cell::new("Status"), Cell::new("signed out")]);
        }
    }
    println!("{}\n", account_table);

    let mut remote_table = section("Remote Store");
    match config.remote.kind {
        RemoteKind::Directory => {
            remote_table.add_row(vec![Cell::new("Kind"), Cell::new("directory")]);
            remote_table.add_row(vec![Cell::new("Directory"), Cell::new(session.remote_dir().display().to_string())]);
        }
        RemoteKind::Http => {
            remote_table.add_row(vec![Cell::new("Kind"), Cell::new("http")]);
            remote_table.add_row(vec![
                Cell::new("Base URL"),
                Cell::new(config.remote.base_url.as_deref().unwrap_or("<not set>")),
            ]);
            remote_table.add_row(vec![Cell::new("API Token"), Cell::new(token_display)]);
            remote_table.add_row(vec![
                Cell::new("Request Timeout"),
                Cell::new(format!("{}s", config.remote.request_timeout_secs)),
            ]);
        }
    }
    println!("{}\n", remote_table);

    let sync = &config.sync;
    let mut sync_table = section("Sync Options");
    for (name, value) in [
        ("Debounce", format!("{}ms", sync.debounce_ms)),
        ("Watchlist Write Attempts", sync.watchlist_retry_attempts.to_string()),
        ("Watchlist Retry Backoff", format!("{}ms", sync.watchlist_retry_backoff_ms)),
        ("Remote Read Cache TTL", format!("{}s", sync.cache_ttl_secs)),
        ("Size Warning At", format!("{} bytes", sync.soft_ceiling_bytes)),
        ("Size Limit", format!("{} bytes", sync.hard_ceiling_bytes)),
        ("Progress Save Threshold", format!("{}s", sync.progress_threshold_secs)),
        ("Progress Save Interval", format!("{}s", sync.progress_idle_secs)),
    ] {
        sync_table.add_row(vec![Cell::new(name), Cell::new(value)]);
    }
    println!("{}\n", sync_table);

    let mut logging_table = section("Logging");
    logging_table.add_row(vec![Cell::new("Level"), Cell::new(&config.logging.level)]);
    logging_table.add_row(vec![
        Cell::new("JSON"),
        Cell::new(match config.logging.json {
            Some(json) => check(json),
            None => "auto".to_string(),
        }),
    ]);
    if let Some(file) = &config.logging.file {
        logging_table.add_row(vec![Cell::new("File"), Cell::new(file.display().to_string())]);
    }
    println!("{}", logging_table);

    if let Err(e) = config.validate() {
        output.warn(format!("Configuration is invalid: {}", e));
    }

    Ok(())
}

fn init_config(
    force: bool,
    remote_url: Option<String>,
    remote_dir: Option<PathBuf>,
    account: Option<String>,
    verified: bool,
    session: &Session,
    output: &Output,
) -> Result<()> {
    let config_file = &session.config_file;
    if config_file.exists() && !force {
        return Err(eyre!(
            "Config file already exists at {}; pass --force to overwrite it",
            config_file.display()
        ));
    }

    let mut config = Config::default();
    if let Some(url) = remote_url {
        config.remote.kind = RemoteKind::Http;
        config.remote.base_url = Some(url);
    } else {
        config.remote.kind = RemoteKind::Directory;
        config.remote.directory = remote_dir;
    }
    config.account = account.map(|id| AccountConfig { id, verified });

    config
        .validate()
        .map_err(|e| eyre!("Refusing to write an invalid config: {}", e))?;
    config
        .save_to_file(config_file)
        .map_err(|e| eyre!("Failed to save config to {}: {}", config_file.display(), e))?;

    output.success(format!("Wrote {}", config_file.display()));
    if config.remote.kind == RemoteKind::Http {
        output.info("Set remote.api_token in the file if your document service requires one.");
    }
    Ok(())
}

fn section(title: &str) -> Table {
    let mut table = Table::new();
    table.set_header(vec![
        Cell::new(title).fg(comfy_table::Color::Cyan).add_attribute(comfy_table::Attribute::Bold)
    ]);
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.apply_modifier(comfy_table::modifiers::UTF8_ROUND_CORNERS);
    table
}

fn check(value: bool) -> String {
    if value {
        "✓".green().to_string()
    } else {
        "✗".red().to_string()
    }
}

fn mask_string(s: &str) -> String {
    if s.is_empty() {
        return "<not set>".to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{}***{}", head, tail)
}
