use clap::{Parser, Subcommand};
use kubeassist::agent;
use kubeassist::config::{self, Config};
use kubeassist::events::{EventKind, GatewayEvent};
use kubeassist::gateway::{CommandResult, Gateway};
use kubeassist::llm::{ChatMessage, OllamaClient};
use kubeassist::tools::KubectlTool;
use std::io::{self, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kubeassist")]
#[command(about = "Ask questions about a Kubernetes cluster", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Run one kubectl command through the gateway (allowlisted verbs only). Prints output, or the error to stderr.
    Exec {
        /// Config file path (default: KUBEASSIST_CONFIG_PATH or ~/.kubeassist/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// The command, e.g. "get pods -A" or "kubectl get pods -A"
        command: String,
    },

    /// Ask one question; the agent may run kubectl commands to answer it.
    Ask {
        /// Config file path (default: KUBEASSIST_CONFIG_PATH or ~/.kubeassist/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Model name (default from config)
        #[arg(long, short)]
        model: Option<String>,

        query: String,
    },

    /// Diagnose a cluster issue; prints a diagnosis and recommended actions.
    Debug {
        /// Config file path (default: KUBEASSIST_CONFIG_PATH or ~/.kubeassist/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Model name (default from config)
        #[arg(long, short)]
        model: Option<String>,

        /// Description of the issue, e.g. "pods in namespace shop keep restarting"
        issue: String,
    },

    /// Chat with the agent (interactive). /exit or /quit to leave.
    Chat {
        /// Config file path (default: KUBEASSIST_CONFIG_PATH or ~/.kubeassist/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Model name (default from config)
        #[arg(long, short)]
        model: Option<String>,
    },

    /// List models available on the Ollama server.
    Models {
        /// Config file path (default: KUBEASSIST_CONFIG_PATH or ~/.kubeassist/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("kubeassist {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Exec { config, command }) => match run_exec(config, &command) {
            Ok(0) => {}
            Ok(code) => std::process::exit(code),
            Err(e) => {
                log::error!("exec failed: {:#}", e);
                std::process::exit(1);
            }
        },
        Some(Commands::Debug {
            config,
            model,
            issue,
        }) => {
            if let Err(e) = run_debug(config, model, &issue).await {
                log::error!("debug failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Ask {
            config,
            model,
            query,
        }) => {
            if let Err(e) = run_ask(config, model, &query).await {
                log::error!("ask failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Chat { config, model }) => {
            if let Err(e) = run_chat(config, model).await {
                log::error!("chat failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Models { config }) => {
            if let Err(e) = run_models(config).await {
                log::error!("models failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

/// Returns the process exit code.
fn run_exec(config_path: Option<PathBuf>, command: &str) -> anyhow::Result<i32> {
    let (config, _) = config::load_config(config_path)?;
    let res = config.kubectl.gateway().execute(command);
    Ok(write_exec_result(&res, &mut io::stdout(), &mut io::stderr())?)
}

/// Output to `out` and exit 0, or error to `err` and exit 1.
fn write_exec_result(
    res: &CommandResult,
    out: &mut impl Write,
    err: &mut impl Write,
) -> io::Result<i32> {
    match &res.error {
        None => {
            writeln!(out, "{}", res.output)?;
            Ok(0)
        }
        Some(e) => {
            writeln!(err, "{}", e)?;
            Ok(1)
        }
    }
}

/// Narrates gateway progress on stderr.
fn narrate(event: &GatewayEvent) {
    match event.event {
        EventKind::Executing => eprintln!("$ {}", event.detail),
        EventKind::Failed => eprintln!("! {}", event.detail),
        EventKind::Validating | EventKind::Succeeded => {}
    }
}

struct Session {
    client: OllamaClient,
    model: String,
    tool: KubectlTool,
    max_steps: usize,
}

fn open_session(config: &Config, model: Option<String>) -> Session {
    let gateway: Gateway = config.kubectl.gateway().with_sink(narrate);
    let model = config.agents.resolve_model(model.as_deref());
    let base_url = config.agents.resolve_ollama_base_url();
    log::info!("using model {} at {}", model, base_url);
    Session {
        client: OllamaClient::new(Some(base_url)),
        model,
        tool: KubectlTool::new(gateway),
        max_steps: config.agents.max_steps(),
    }
}

fn print_report(report: &agent::AgentReport) {
    println!("{}", report.response.trim());
    if !report.commands.is_empty() {
        println!();
        println!("commands used:");
        for (cmd, out) in report.commands.iter().zip(&report.outputs) {
            match &out.error {
                None => println!("  {}", cmd),
                Some(e) => println!("  {} (error: {})", cmd, e),
            }
        }
    }
}

async fn run_ask(
    config_path: Option<PathBuf>,
    model: Option<String>,
    query: &str,
) -> anyhow::Result<()> {
    let (config, _) = config::load_config(config_path)?;
    let session = open_session(&config, model);
    let mut history: Vec<ChatMessage> = Vec::new();
    let report = agent::run_query(
        &session.client,
        &session.model,
        &session.tool,
        &mut history,
        query,
        session.max_steps,
    )
    .await?;
    print_report(&report);
    Ok(())
}

async fn run_debug(
    config_path: Option<PathBuf>,
    model: Option<String>,
    issue: &str,
) -> anyhow::Result<()> {
    let (config, _) = config::load_config(config_path)?;
    let session = open_session(&config, model);
    let report = agent::run_diagnosis(
        &session.client,
        &session.model,
        &session.tool,
        issue,
        session.max_steps,
    )
    .await?;
    println!("{}", report.diagnosis.diagnosis.trim());
    if !report.diagnosis.recommended_actions.is_empty() {
        println!();
        println!("recommended actions:");
        for (i, action) in report.diagnosis.recommended_actions.iter().enumerate() {
            println!("  {}. {}", i + 1, action);
        }
    }
    if !report.commands.is_empty() {
        println!();
        println!("commands used:");
        for cmd in &report.commands {
            println!("  {}", cmd);
        }
    }
    Ok(())
}

async fn run_chat(config_path: Option<PathBuf>, model: Option<String>) -> anyhow::Result<()> {
    let (config, _) = config::load_config(config_path)?;
    let session = open_session(&config, model);
    let mut history: Vec<ChatMessage> = Vec::new();
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
            break;
        }

        match agent::run_query(
            &session.client,
            &session.model,
            &session.tool,
            &mut history,
            input,
            session.max_steps,
        )
        .await
        {
            Ok(report) => print_report(&report),
            Err(e) => eprintln!("chat error: {}", e),
        }
    }

    Ok(())
}

async fn run_models(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let (config, _) = config::load_config(config_path)?;
    let client = OllamaClient::new(Some(config.agents.resolve_ollama_base_url()));
    for m in client.list_models().await? {
        println!("{}", m.name);
    }
    Ok(())
}
