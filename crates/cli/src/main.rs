use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use tracing::info;
use tsop_apply::{ReconcileReport, Reconciler};
use tsop_core::{validate, RawSpec, ResolvedSpec};
use tsop_kubehub::memory::MemoryClient;
use tsop_kubehub::{ClusterClient, KubeClient};
use tsop_render::{render_all, BaseTemplates, DirTemplates, EmbeddedTemplates};

#[derive(Parser, Debug)]
#[command(name = "tsopctl", version, about = "Typesense cluster reconciler")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Directory with base template overrides (missing files use the built-in copy)
    #[arg(long = "templates", env = "TSOP_TEMPLATES_DIR", global = true)]
    templates: Option<PathBuf>,

    /// Kubeconfig context to use (default: current context or in-cluster)
    #[arg(long = "context", env = "TSOP_KUBE_CONTEXT", global = true)]
    context: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json, Yaml }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate a spec and print it with defaults applied
    Validate {
        /// Spec file (YAML or JSON); "-" reads stdin
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
    },
    /// Print the rendered objects without touching the cluster
    Render {
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
        /// Render as an update (stamps a rollout restart on the workload)
        #[arg(long = "update", action = ArgAction::SetTrue)]
        update: bool,
    },
    /// Reconcile the cluster against a spec
    Apply {
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
        /// Treat as an update: stamp a rollout restart and warn about objects that were missing
        #[arg(long = "update", action = ArgAction::SetTrue)]
        update: bool,
        /// Reconcile against an empty in-memory cluster and report what would be done
        #[arg(long = "dry-run", action = ArgAction::SetTrue)]
        dry_run: bool,
    },
    /// Delete a deployment (its whole namespace)
    Cleanup {
        /// Take the namespace from this spec
        #[arg(short = 'f', long = "file", conflicts_with = "namespace")]
        file: Option<PathBuf>,
        /// Namespace to delete
        #[arg(long = "ns")]
        namespace: Option<String>,
    },
}

fn init_tracing() {
    let env = std::env::var("TSOP_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("TSOP_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid TSOP_METRICS_ADDR; expected host:port");
        }
    }
}

fn read_spec(path: &Path) -> Result<RawSpec> {
    let text = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).context("reading spec from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path).with_context(|| format!("reading spec {}", path.display()))?
    };
    Ok(RawSpec::from_yaml_str(&text)?)
}

fn load_templates(dir: Option<&Path>) -> Result<BaseTemplates> {
    let base = match dir {
        Some(d) => BaseTemplates::load(&DirTemplates::new(d)),
        None => BaseTemplates::load(&EmbeddedTemplates),
    };
    base.context("loading base templates")
}

/// Rendered objects as one multi-document YAML stream, in apply order.
fn render_documents(base: &BaseTemplates, spec: &ResolvedSpec, restart_stamp: Option<&str>) -> Result<String> {
    let mut docs = Vec::new();
    for resource in render_all(base, spec, restart_stamp)? {
        for obj in resource.into_objects() {
            docs.push(serde_yaml::to_string(&obj.to_json()?)?);
        }
    }
    Ok(docs.join("---\n"))
}

fn print_report(report: &ReconcileReport, output: Output) -> Result<()> {
    match output {
        Output::Human => {
            let mode = if report.is_update { "update" } else { "install" };
            println!("namespace {} ({})", report.namespace, mode);
            for s in &report.steps {
                println!("  {:<12} {:<12} {:?}", s.kind, s.name, s.outcome);
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(report)?),
        Output::Yaml => print!("{}", serde_yaml::to_string(report)?),
    }
    Ok(())
}

async fn cluster_client(context: Option<&str>) -> Result<Arc<dyn ClusterClient>> {
    let client = KubeClient::try_default(context).await.context("connecting to cluster")?;
    Ok(Arc::new(client))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { file } => {
            let spec = validate(&read_spec(&file)?)?;
            match cli.output {
                Output::Human => {
                    println!("namespace:     {}", spec.namespace);
                    println!("image:         {}", spec.image);
                    println!("host:          {}", spec.host);
                    println!("clusterDomain: {}", spec.cluster_domain);
                    println!("replicas:      {}", spec.replicas);
                    println!("storage:       {}", spec.storage.as_ref().map(|s| format!("{} {}", s.storage_class_name, s.size)).unwrap_or_else(|| "scratch".into()));
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&spec)?),
                Output::Yaml => print!("{}", serde_yaml::to_string(&spec)?),
            }
        }
        Commands::Render { file, update } => {
            let spec = validate(&read_spec(&file)?)?;
            let base = load_templates(cli.templates.as_deref())?;
            let stamp = update.then(tsop_ops::restart_stamp);
            print!("{}", render_documents(&base, &spec, stamp.as_deref())?);
        }
        Commands::Apply { file, update, dry_run } => {
            let raw = read_spec(&file)?;
            let base = load_templates(cli.templates.as_deref())?;
            let client: Arc<dyn ClusterClient> =
                if dry_run { Arc::new(MemoryClient::new()) } else { cluster_client(cli.context.as_deref()).await? };
            info!(update, dry_run, "apply invoked");
            let report = Reconciler::new(client, base).reconcile(&raw, update).await?;
            print_report(&report, cli.output)?;
        }
        Commands::Cleanup { file, namespace } => {
            let ns = match (file, namespace) {
                (_, Some(ns)) => ns,
                (Some(f), None) => validate(&read_spec(&f)?)?.namespace,
                (None, None) => return Err(anyhow!("cleanup needs --ns or -f")),
            };
            let client = cluster_client(cli.context.as_deref()).await?;
            tsop_ops::cleanup(client.as_ref(), &ns).await?;
            if cli.output == Output::Human {
                println!("namespace {} deleted", ns);
            }
        }
    }
    Ok(())
}
