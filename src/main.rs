//! Tiering daemon: scans raw storage and compresses cold files until stopped.

use std::path::PathBuf;

use tierstore::{TierService, config, logging};

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let Some(options) = parse_args(std::env::args().skip(1).collect())? else {
        return Ok(());
    };
    let config = match &options.config_path {
        Some(path) => config::load_from(path)?,
        None => config::load_or_default()?,
    };
    if let Err(err) = logging::init(&config.logging) {
        eprintln!("Logging disabled: {err}");
    }

    let service = TierService::open(&config)?;
    service.start()?;
    tracing::info!(
        workers = service.pool_stats().workers,
        hot_threshold_secs = config.tiering.hot_threshold_secs,
        "Tiering daemon running"
    );
    service.join();
    service.shutdown()?;
    Ok(())
}

#[derive(Debug, Clone)]
struct CliOptions {
    config_path: Option<PathBuf>,
}

fn parse_args(args: Vec<String>) -> Result<Option<CliOptions>, String> {
    let mut config_path = None;
    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "-h" | "--help" => {
                println!("{}", help_text());
                return Ok(None);
            }
            "--config" => {
                idx += 1;
                let value = args
                    .get(idx)
                    .ok_or_else(|| "--config requires a value".to_string())?;
                config_path = Some(PathBuf::from(value));
            }
            unknown => return Err(format!("Unknown argument: {unknown}\n\n{}", help_text())),
        }
        idx += 1;
    }
    Ok(Some(CliOptions { config_path }))
}

fn help_text() -> String {
    [
        "tierstore",
        "",
        "Usage:",
        "  tierstore [--config <path-to-config.toml>]",
        "",
        "Without --config the file is read from the application directory",
        "(override its base with TIERSTORE_HOME).",
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_config_flag() {
        let options = parse_args(vec!["--config".into(), "/etc/tier.toml".into()])
            .unwrap()
            .unwrap();
        assert_eq!(options.config_path, Some(PathBuf::from("/etc/tier.toml")));
    }

    #[test]
    fn rejects_unknown_and_incomplete_flags() {
        assert!(parse_args(vec!["--bogus".into()]).is_err());
        assert!(parse_args(vec!["--config".into()]).is_err());
        assert!(parse_args(Vec::new()).unwrap().unwrap().config_path.is_none());
    }
}
