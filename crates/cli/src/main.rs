use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use modelrepo_compose::{Composer, RuleTable, RulesVersion};
use modelrepo_core::wire::RunFunctionRequest;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "modelrepo-fn", version, about = "Compose model repositories from a KubeModelRepo intent")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Json)]
    output: Output,

    /// Rule table YAML file; takes precedence over --rules-version
    #[arg(long = "rules", global = true, env = "MODELREPO_RULES")]
    rules: Option<PathBuf>,

    /// Builtin rule table revision (v1, v2)
    #[arg(long = "rules-version", global = true, default_value_t = RulesVersion::V2)]
    rules_version: RulesVersion,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Json, Yaml }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one invocation against a RunFunctionRequest document (JSON or YAML)
    Render {
        /// Request file, or "-" for stdin
        #[arg(long = "request", default_value = "-")]
        request: String,
        /// Response TTL in seconds
        #[arg(long = "ttl")]
        ttl: Option<u64>,
    },
    /// Print the effective rule table as YAML
    Rules,
}

fn init_tracing() {
    let env = std::env::var("MODELREPO_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    // stdout carries the response document
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("MODELREPO_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid MODELREPO_METRICS_ADDR; expected host:port");
        }
    }
}

fn load_rules(path: Option<&Path>, version: RulesVersion) -> Result<RuleTable> {
    match path {
        Some(p) => RuleTable::load(p).with_context(|| format!("loading rule table from {}", p.display())),
        None => RuleTable::builtin(version).with_context(|| format!("loading builtin rule table {version}")),
    }
}

/// JSON is valid YAML, so one parser covers both.
fn parse_document(text: &str) -> Result<serde_json::Value> {
    let val: serde_yaml::Value = serde_yaml::from_str(text).context("parsing request document")?;
    serde_json::to_value(val).context("converting request document to JSON")
}

fn read_request(source: &str) -> Result<RunFunctionRequest> {
    let text = if source == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).context("reading request from stdin")?;
        buf
    } else {
        std::fs::read_to_string(source).with_context(|| format!("reading request from {source}"))?
    };
    serde_json::from_value(parse_document(&text)?).context("decoding RunFunctionRequest")
}

fn print<T: serde::Serialize>(output: Output, value: &T) -> Result<()> {
    match output {
        Output::Json => println!("{}", serde_json::to_string_pretty(value)?),
        Output::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let rules = load_rules(cli.rules.as_deref(), cli.rules_version)?;

    match cli.command {
        Commands::Render { request, ttl } => {
            let req = read_request(&request)?;
            let mut composer = Composer::new(rules);
            if let Some(secs) = ttl {
                composer = composer.with_ttl(Duration::from_secs(secs));
            }
            info!(rules = %composer.rules().version, tag = %req.meta.tag, "render invoked");
            let resp = composer.run(&req);
            print(cli.output, &resp)?;
            if resp.is_fatal() {
                std::process::exit(2);
            }
        }
        Commands::Rules => print!("{}", rules.to_yaml()?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_and_json_requests_decode_alike() {
        let yaml = "meta:\n  tag: a\nobserved:\n  composite:\n    resource:\n      spec:\n        repos:\n          - group: x.io\n";
        let json = r#"{"meta":{"tag":"a"},"observed":{"composite":{"resource":{"spec":{"repos":[{"group":"x.io"}]}}}}}"#;
        assert_eq!(parse_document(yaml).unwrap(), parse_document(json).unwrap());
    }

    #[test]
    fn rules_file_overrides_builtin() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("modelrepo-rules-{}.yaml", std::process::id()));
        let mut table = RuleTable::builtin(RulesVersion::V1).unwrap();
        table.version = "custom".into();
        std::fs::write(&path, table.to_yaml().unwrap()).unwrap();

        assert_eq!(load_rules(Some(&path), RulesVersion::V2).unwrap().version, "custom");
        assert_eq!(load_rules(None, RulesVersion::V1).unwrap().version, "v1");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_rules_file_has_context() {
        let err = load_rules(Some(Path::new("/nonexistent/rules.yaml")), RulesVersion::V2).unwrap_err();
        assert!(format!("{err:#}").contains("loading rule table from /nonexistent/rules.yaml"), "err={err:#}");
    }
}
