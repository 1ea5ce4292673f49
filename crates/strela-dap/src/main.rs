use clap::Parser;
use std::path::PathBuf;

use strela_config::{init_tracing, StrelaConfig, CONFIG_ENV_VAR};

/// Debug adapter for Strela programs.
///
/// Speaks the Debug Adapter Protocol on stdio and launches the Strela runtime
/// in debug mode for each `launch` request.
#[derive(Debug, Parser)]
#[command(name = "strela-dap", version, about)]
struct Cli {
    /// Path to a TOML config file.
    ///
    /// If unset, `STRELA_DAP_CONFIG` is used as a fallback. When neither is
    /// provided the adapter uses built-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config);
    init_tracing(&config.logging);
    tracing::info!(target: "strela.dap", version = env!("CARGO_PKG_VERSION"), "starting");

    strela_dap::server::run_stdio(config.debuggee).await
}

fn load_config(cli_path: Option<PathBuf>) -> StrelaConfig {
    let Some(path) = StrelaConfig::resolve_path(cli_path) else {
        return StrelaConfig::default();
    };

    match StrelaConfig::load_from_path(&path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!(
                "strela-dap: failed to load config from {} (via --config or {CONFIG_ENV_VAR}): {err}; continuing with defaults",
                path.display()
            );
            StrelaConfig::default()
        }
    }
}
