//! headcni CNI plugin
//!
//! Invoked by the container runtime once per lifecycle event:
//! - ADD runs the delegate (or the configured plugin chain)
//! - DEL tears down whatever was persisted for the container
//! - CHECK asks each persisted delegate to verify its work
//! - VERSION reports the supported CNI versions

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;
mod skel;

/// Filter used when `HEADCNI_LOG` is unset
const DEFAULT_LOG_FILTER: &str = "headcni=info,headcni_plugins=info,headcni_network=warn,headcni_core=warn";

#[derive(Parser, Debug)]
#[command(name = "headcni")]
#[command(about = "CNI meta-plugin: delegate chaining with rollback and persisted teardown state")]
#[command(disable_version_flag = true)]
struct Args {
    /// Print version information and exit
    #[arg(short = 'V', long)]
    version: bool,
}

fn version_string() -> String {
    format!(
        "CNI Plugin headcni version {} ({}/{})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

fn main() -> Result<()> {
    let args = Args::parse();
    if args.version {
        println!("{}", version_string());
        return Ok(());
    }

    // Load environment from /etc/headcni/environment (if exists)
    headcni_core::config::load_environment();

    // stdout carries the CNI result, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("HEADCNI_LOG").unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let code = runtime.block_on(skel::run());
    drop(runtime);

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_string() {
        let version = version_string();
        assert!(version.starts_with("CNI Plugin headcni version "));
        assert!(version.contains(std::env::consts::ARCH));
    }

    #[test]
    fn test_args_without_flags() {
        let args = Args::try_parse_from(["headcni"]).unwrap();
        assert!(!args.version);
        let args = Args::try_parse_from(["headcni", "--version"]).unwrap();
        assert!(args.version);
    }
}
