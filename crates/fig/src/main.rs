//! Fig CLI
//!
//! Runs display scripts and verifications of a client file from the command
//! line.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use fig::fig_script::{ScriptOutcome, ScriptRunReport};
use fig::fig_types::{DynamicVerificationDefinition, TargetRuntime};
use fig::{BehaviorService, ClientFile, FigConfig};

/// Fig client behavior runner
#[derive(Parser, Debug)]
#[command(name = "fig")]
#[command(about = "Run display scripts and verifications for client settings", long_about = None)]
struct Args {
    /// Path to the configuration file (defaults to ./fig.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run display scripts and print the resulting client
    Script {
        /// Client file
        client: PathBuf,

        /// Run this script file instead of the settings' own scripts
        #[arg(long, conflicts_with = "setting")]
        script: Option<PathBuf>,

        /// Only run the display script of this setting
        #[arg(long)]
        setting: Option<String>,
    },

    /// Run the client's verifications
    Verify {
        /// Client file
        client: PathBuf,

        /// Only run the verification with this name
        #[arg(long)]
        name: Option<String>,
    },

    /// List the registered plugin verifiers
    Verifiers,

    /// Check that a verification snippet compiles
    Compile {
        /// Snippet file
        snippet: PathBuf,

        #[arg(long, value_enum, default_value_t = RuntimeArg::Es2023)]
        runtime: RuntimeArg,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum RuntimeArg {
    Es2020,
    Es2023,
}

impl From<RuntimeArg> for TargetRuntime {
    fn from(arg: RuntimeArg) -> Self {
        match arg {
            RuntimeArg::Es2020 => TargetRuntime::Es2020,
            RuntimeArg::Es2023 => TargetRuntime::Es2023,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let config = FigConfig::load(args.config.as_deref())?;

    // Initialize tracing; stdout is reserved for command output
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let service = BehaviorService::new(&config);

    let ok = match args.command {
        Command::Script {
            client,
            script,
            setting,
        } => run_scripts(&service, &client, script.as_deref(), setting.as_deref()).await?,
        Command::Verify { client, name } => run_verifications(&service, &client, name.as_deref()).await?,
        Command::Verifiers => {
            for verifier in service.describe_verifiers() {
                println!(
                    "{} ({})\n    {}",
                    verifier.name,
                    verifier.property_arguments.join(", "),
                    verifier.description
                );
            }
            true
        }
        Command::Compile { snippet, runtime } => compile(&service, &snippet, runtime.into()).await?,
    };

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// Run display scripts and print the mutated client as TOML
async fn run_scripts(
    service: &BehaviorService,
    path: &Path,
    script: Option<&Path>,
    setting: Option<&str>,
) -> Result<bool> {
    let mut file = ClientFile::load(path).await?;
    let mut client = file.scriptable_client();

    let reports = match (script, setting) {
        (Some(script), _) => {
            let source = tokio::fs::read_to_string(script)
                .await
                .with_context(|| format!("Failed to read script {}", script.display()))?;
            vec![service.test_display_script(Some(&source), &mut client)]
        }
        (None, Some(name)) => {
            let Some(target) = client.setting(name) else {
                bail!("Client {} has no setting named {}", file.name, name);
            };
            let source = target.display_script.clone();
            vec![service.test_display_script(source.as_deref(), &mut client)]
        }
        (None, None) => service.run_all_display_scripts(&mut client),
    };

    let ok = reports.iter().map(log_report).fold(true, |all, ok| all && ok);

    file.apply_scriptable(client);
    print!("{}", file.to_toml_string()?);
    Ok(ok)
}

fn log_report(report: &ScriptRunReport) -> bool {
    let duration_ms = report.duration.as_secs_f64() * 1000.0;
    match &report.outcome {
        ScriptOutcome::Completed => {
            info!(duration_ms, "Display script completed");
            true
        }
        ScriptOutcome::Skipped(reason) => {
            info!(?reason, "Display script skipped");
            true
        }
        ScriptOutcome::Failed(error) => {
            warn!(duration_ms, error = %error, "Display script failed");
            false
        }
    }
}

async fn run_verifications(
    service: &BehaviorService,
    path: &Path,
    name: Option<&str>,
) -> Result<bool> {
    let file = ClientFile::load(path).await?;
    let definitions: Vec<_> = file
        .verifications()
        .into_iter()
        .filter(|definition| name.is_none_or(|name| definition.name() == name))
        .collect();

    if definitions.is_empty() {
        match name {
            Some(name) => bail!("Client {} has no verification named {}", file.name, name),
            None => {
                info!("Client {} has no verifications", file.name);
                return Ok(true);
            }
        }
    }

    let results = service
        .run_all_verifications(&definitions, &file.setting_values())
        .await;

    for (definition, result) in definitions.iter().zip(&results) {
        let status = if result.success { "PASS" } else { "FAIL" };
        println!("{status} {}: {}", definition.name(), result.message);
        for diagnostic in &result.compile_errors {
            println!("    {diagnostic}");
        }
        for line in &result.logs {
            println!("    log: {line}");
        }
    }

    Ok(results.iter().all(|result| result.success))
}

async fn compile(service: &BehaviorService, path: &Path, runtime: TargetRuntime) -> Result<bool> {
    let code = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read snippet {}", path.display()))?;
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snippet".to_string());

    let definition = DynamicVerificationDefinition::new(name, code).with_target_runtime(runtime);
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    match service.compile_only_cancellable(&definition, cancel).await {
        Ok(()) => {
            println!("{} compiles for {}", path.display(), runtime);
            Ok(true)
        }
        Err(e) => {
            println!("{} does not compile for {}:", path.display(), runtime);
            for diagnostic in &e.diagnostics {
                println!("    {diagnostic}");
            }
            Ok(false)
        }
    }
}
