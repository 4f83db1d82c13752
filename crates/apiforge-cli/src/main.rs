//! apiforge CLI - generate and run API test suites from OpenAPI and Swagger specs

mod output;
mod storage;

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tokio_stream::StreamExt;
use tracing_subscriber::EnvFilter;

use apiforge_core::config::Settings;
use apiforge_core::export::ExportFormat;
use apiforge_core::model::{Assertion, CaseEdit, EndpointRef, ExecutionStatus, Payload, TestCategory};
use apiforge_core::project::{ApiKeyLocation, AuthConfig, ConfigUpdate, LlmConfig, LlmProvider};
use apiforge_core::schema::{self, SchemaKind};
use apiforge_runner::{CaseOverrides, Engine, SpecSource};

use storage::FileStore;

#[derive(Parser)]
#[command(name = "apiforge")]
#[command(about = "Generate and run API test suites from OpenAPI and Swagger specs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, global = true, default_value = "terminal")]
    output: OutputFormat,

    /// Settings file (default: .apiforge.toml in the working directory)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Verbose logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Name recorded in the project activity trail
    #[arg(long, global = true)]
    actor: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an example .apiforge.toml
    Init,

    /// Import endpoints from a spec file, URL, pasted text or cURL command
    Import {
        project: String,
        /// OpenAPI 3.x / Swagger 2.0 file (JSON or YAML)
        file: Option<PathBuf>,
        #[arg(long, conflicts_with_all = ["file", "curl", "text"])]
        url: Option<String>,
        #[arg(long, conflicts_with_all = ["file", "url", "text"])]
        curl: Option<String>,
        /// Spec content; `-` reads stdin
        #[arg(long, conflicts_with_all = ["file", "url", "curl"])]
        text: Option<String>,
        /// Add new endpoints instead of replacing the project's endpoints
        #[arg(long)]
        merge: bool,
    },

    /// List projects
    Projects,

    /// List a project's endpoints
    Endpoints { project: String },

    /// Generate test cases for endpoints without any
    Generate {
        project: String,
        /// Limit to endpoints like "GET /users" (repeatable)
        #[arg(short, long = "endpoint")]
        endpoints: Vec<EndpointRef>,
        /// Limit to categories (repeatable)
        #[arg(short, long = "category")]
        categories: Vec<TestCategory>,
    },

    /// Show a project's test cases
    Cases {
        project: String,
        /// Only cases of this endpoint
        #[arg(short, long)]
        endpoint: Option<EndpointRef>,
    },

    /// Delete test cases by endpoint
    Delete {
        project: String,
        #[arg(short, long = "endpoint", required_unless_present = "all")]
        endpoints: Vec<EndpointRef>,
        /// Delete every case
        #[arg(long)]
        all: bool,
    },

    /// Edit a stored test case
    Edit {
        project: String,
        index: u64,
        /// JSON request body
        #[arg(long)]
        payload: Option<String>,
        /// Assertions as a JSON array
        #[arg(long)]
        assertions: Option<String>,
        /// Comma-separated status codes
        #[arg(long, value_delimiter = ',')]
        expected_status: Vec<u16>,
    },

    /// Execute test cases against the configured target
    Execute {
        project: String,
        /// Only these case indices (repeatable)
        #[arg(short, long = "index")]
        indices: Vec<u64>,
        /// Print each result as it arrives
        #[arg(short, long)]
        follow: bool,
    },

    /// Run one test case now, optionally with overrides
    RunOne {
        project: String,
        index: u64,
        /// JSON request body
        #[arg(long)]
        payload: Option<String>,
        /// Query parameter KEY=VALUE (repeatable)
        #[arg(long = "query", value_parser = parse_pair)]
        query: Vec<(String, String)>,
        /// Header KEY=VALUE (repeatable)
        #[arg(long = "header", value_parser = parse_pair)]
        headers: Vec<(String, String)>,
        /// Assertions as a JSON array
        #[arg(long)]
        assertions: Option<String>,
    },

    /// Show a stored execution
    Execution { id: String },

    /// Manage a project's target config
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Aggregate recent executions
    Report {
        #[arg(short, long)]
        project: Option<String>,
        #[arg(short, long, default_value_t = 7)]
        days: u32,
    },

    /// Export a project's test cases
    Export {
        project: String,
        #[arg(short, long, default_value = "json")]
        format: ExportFormat,
        /// Write to a file instead of stdout
        #[arg(short = 'o', long)]
        out: Option<PathBuf>,
    },

    /// Draft an issue for one result of an execution
    Issue { execution: String, index: u64 },

    /// Recent changes to a project, newest first
    Activity {
        project: String,
        #[arg(short = 'n', long, default_value_t = 50)]
        limit: usize,
    },

    /// Print the JSON Schema of the interchange format
    Schema {
        #[arg(default_value = "execution")]
        kind: SchemaKind,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the config without secrets
    Show { project: String },

    /// Create or update the config; omitted secrets keep their stored value
    Set(ConfigArgs),

    /// Send one request to the base URL
    Check { project: String },

    /// Remove the stored LLM API key
    ClearLlmKey { project: String },
}

#[derive(clap::Args)]
struct ConfigArgs {
    project: String,
    #[arg(long)]
    base_url: Option<String>,
    #[arg(long)]
    timeout: Option<u64>,
    /// Static header KEY=VALUE sent with every request (repeatable)
    #[arg(long = "header", value_parser = parse_pair)]
    headers: Vec<(String, String)>,

    #[arg(long)]
    auth_type: Option<AuthType>,
    #[arg(long)]
    username: Option<String>,
    #[arg(long)]
    password: Option<String>,
    #[arg(long)]
    token: Option<String>,
    #[arg(long)]
    key_name: Option<String>,
    #[arg(long)]
    key_value: Option<String>,
    #[arg(long, default_value = "header")]
    key_location: KeyLocation,
    #[arg(long)]
    token_url: Option<String>,
    #[arg(long)]
    client_id: Option<String>,
    #[arg(long)]
    client_secret: Option<String>,
    #[arg(long)]
    scope: Option<String>,

    #[arg(long)]
    llm_provider: Option<LlmProvider>,
    #[arg(long)]
    llm_model: Option<String>,
    #[arg(long)]
    llm_key: Option<String>,
    #[arg(long)]
    llm_endpoint: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AuthType {
    None,
    Basic,
    Bearer,
    ApiKey,
    Oauth2,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KeyLocation {
    Header,
    Query,
}

impl From<KeyLocation> for ApiKeyLocation {
    fn from(arg: KeyLocation) -> Self {
        match arg {
            KeyLocation::Header => Self::Header,
            KeyLocation::Query => Self::Query,
        }
    }
}

#[derive(Clone, Copy, ValueEnum, PartialEq, Eq)]
enum OutputFormat {
    Terminal,
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(3)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_pair(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))
}

fn parse_json<T: serde::de::DeserializeOwned>(what: &str, text: &str) -> Result<T> {
    serde_json::from_str(text).with_context(|| format!("{what} is not valid JSON"))
}

fn open_engine(settings_path: Option<&PathBuf>) -> Result<Engine<FileStore>> {
    let settings = match settings_path {
        Some(path) => Settings::load(path)?,
        None => Settings::load_default()?,
    };
    let data_dir = settings.data_dir();
    let store = FileStore::open(&data_dir)?;
    let cipher = storage::load_cipher(&data_dir, &settings.secret_key_env)
        .with_context(|| format!("cannot load secret key from {}", data_dir.display()))?;
    Ok(Engine::new(Arc::new(store), Arc::new(cipher), settings))
}

fn suite_id(engine: &Engine<FileStore>, project: &str) -> Result<String> {
    Ok(engine.suite_for_project(project)?.id)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli) -> Result<u8> {
    if let Commands::Init = cli.command {
        let path = ".apiforge.toml";
        if std::path::Path::new(path).exists() {
            eprintln!("{path} already exists");
            return Ok(1);
        }
        std::fs::write(path, Settings::example())?;
        println!("Created {path}");
        println!("\nNext steps:");
        println!("  apiforge import <project> openapi.yaml");
        println!("  apiforge config set <project> --base-url https://api.example.com");
        println!("  apiforge generate <project> && apiforge execute <project> --follow");
        return Ok(0);
    }
    if let Commands::Schema { kind } = cli.command {
        println!("{}", schema::generate(kind)?);
        return Ok(0);
    }

    let mut engine = open_engine(cli.settings.as_ref())?;
    if let Some(actor) = cli.actor {
        engine = engine.with_actor(actor);
    }
    let json = cli.output == OutputFormat::Json;

    match cli.command {
        Commands::Init | Commands::Schema { .. } => Ok(0),

        Commands::Import {
            project,
            file,
            url,
            curl,
            text,
            merge,
        } => {
            let source = match (file, url, curl, text) {
                (Some(path), ..) => SpecSource::File(path),
                (_, Some(url), ..) => SpecSource::Url(url),
                (_, _, Some(command), _) => SpecSource::Curl(command),
                (_, _, _, Some(text)) if text == "-" => {
                    SpecSource::Text(std::io::read_to_string(std::io::stdin())?)
                }
                (_, _, _, Some(text)) => SpecSource::Text(text),
                (None, None, None, None) => bail!("give a spec file, --url, --curl or --text"),
            };
            let outcome = engine.import(&project, &source, merge).await?;
            if json {
                print_json(&outcome)?;
            } else {
                output::import(&outcome);
            }
            Ok(0)
        }

        Commands::Projects => {
            let projects = engine.projects()?;
            if json {
                print_json(&projects)?;
            } else {
                output::projects(&projects);
            }
            Ok(0)
        }

        Commands::Endpoints { project } => {
            let endpoints = engine.endpoints(&project)?;
            if json {
                print_json(&endpoints)?;
            } else {
                output::endpoints(&endpoints);
            }
            Ok(0)
        }

        Commands::Generate {
            project,
            endpoints,
            categories,
        } => {
            let selected = (!endpoints.is_empty()).then_some(endpoints);
            let categories =
                (!categories.is_empty()).then(|| categories.into_iter().collect::<BTreeSet<_>>());
            let outcome = engine.generate(&project, selected, categories)?;
            if json {
                print_json(&outcome)?;
            } else {
                output::generated(&outcome);
            }
            Ok(0)
        }

        Commands::Cases { project, endpoint } => {
            let mut suite = engine.get_cases(&suite_id(&engine, &project)?)?;
            if let Some(endpoint) = endpoint {
                suite.test_cases.retain(|c| c.endpoint == endpoint);
            }
            if json {
                print_json(&suite)?;
            } else {
                output::suite(&suite);
            }
            Ok(0)
        }

        Commands::Delete {
            project,
            endpoints,
            all,
        } => {
            let id = suite_id(&engine, &project)?;
            let deleted = engine.delete_cases(&id, (!all).then_some(endpoints.as_slice()))?;
            if json {
                print_json(&serde_json::json!({ "deleted_count": deleted }))?;
            } else {
                println!("Deleted {deleted} test case(s)");
            }
            Ok(0)
        }

        Commands::Edit {
            project,
            index,
            payload,
            assertions,
            expected_status,
        } => {
            let edit = CaseEdit {
                payload: payload
                    .map(|p| parse_json::<Value>("--payload", &p).map(Payload::Json))
                    .transpose()?,
                assertions: assertions
                    .map(|a| parse_json::<Vec<Assertion>>("--assertions", &a))
                    .transpose()?,
                expected_status: (!expected_status.is_empty()).then_some(expected_status),
                ..CaseEdit::default()
            };
            let case = engine.update_case(&suite_id(&engine, &project)?, index, edit)?;
            if json {
                print_json(&case)?;
            } else {
                println!("Updated #{} {}", case.index, case.name);
            }
            Ok(0)
        }

        Commands::Execute {
            project,
            indices,
            follow,
        } => {
            let id = suite_id(&engine, &project)?;
            let selected = (!indices.is_empty()).then_some(indices.as_slice());
            let handle = engine.execute(&id, selected)?;
            if !json {
                eprintln!("Execution {} started", handle.id());
            }

            let done = if follow && !json {
                let mut stream = handle.stream();
                let mut printed = 0;
                let mut last = handle.snapshot();
                while let Some(state) = stream.next().await {
                    for (i, result) in state.results.iter().enumerate().skip(printed) {
                        output::result_line(result, i + 1, state.summary.total);
                    }
                    printed = state.results.len();
                    let terminal = state.status.is_terminal();
                    last = state;
                    if terminal {
                        break;
                    }
                }
                last
            } else {
                handle.wait().await
            };

            if json {
                print_json(&done)?;
            } else {
                output::execution(&done);
            }
            Ok(match done.status {
                ExecutionStatus::Failed => 3,
                _ if done.summary.failed + done.summary.errors > 0 => 1,
                _ => 0,
            })
        }

        Commands::RunOne {
            project,
            index,
            payload,
            query,
            headers,
            assertions,
        } => {
            let overrides = CaseOverrides {
                payload: payload
                    .map(|p| parse_json::<Value>("--payload", &p).map(Payload::Json))
                    .transpose()?,
                query: (!query.is_empty()).then(|| {
                    query
                        .into_iter()
                        .map(|(k, v)| (k, Value::String(v)))
                        .collect::<BTreeMap<_, _>>()
                }),
                headers: (!headers.is_empty()).then(|| headers.into_iter().collect()),
                assertions: assertions
                    .map(|a| parse_json::<Vec<Assertion>>("--assertions", &a))
                    .transpose()?,
            };
            let result = engine
                .execute_single(&suite_id(&engine, &project)?, index, Some(&overrides))
                .await?;
            if json {
                print_json(&result)?;
            } else {
                output::result_detail(&result);
            }
            Ok(u8::from(result.status != apiforge_core::model::ResultStatus::Passed))
        }

        Commands::Execution { id } => {
            let execution = engine.get_execution(&id)?;
            if json {
                print_json(&execution)?;
            } else {
                output::execution(&execution);
            }
            Ok(0)
        }

        Commands::Config { action } => config(&engine, action, json).await,

        Commands::Report { project, days } => {
            let report = engine.report(project.as_deref(), days)?;
            if json {
                print_json(&report)?;
            } else {
                output::report(&report);
            }
            Ok(0)
        }

        Commands::Export {
            project,
            format,
            out,
        } => {
            let text = engine.export(&suite_id(&engine, &project)?, format)?;
            match out {
                Some(path) => {
                    std::fs::write(&path, text)
                        .with_context(|| format!("cannot write {}", path.display()))?;
                    eprintln!("Wrote {}", path.display());
                }
                None => println!("{text}"),
            }
            Ok(0)
        }

        Commands::Issue { execution, index } => {
            let draft = engine.issue_draft(&execution, index)?;
            if json {
                print_json(&draft)?;
            } else {
                println!("{}\n\n{}", draft.title, draft.body);
            }
            Ok(0)
        }

        Commands::Activity { project, limit } => {
            let entries = engine.activity(&project, limit.clamp(1, 500))?;
            if json {
                print_json(&entries)?;
            } else {
                output::activity(&entries);
            }
            Ok(0)
        }
    }
}

async fn config(engine: &Engine<FileStore>, action: ConfigAction, json: bool) -> Result<u8> {
    match action {
        ConfigAction::Show { project } => {
            let Some(view) = engine.get_config(&project)? else {
                eprintln!("No config for '{project}'. Run `apiforge config set {project} --base-url ...`");
                return Ok(1);
            };
            if json {
                print_json(&view)?;
            } else {
                output::config(&view);
            }
            Ok(0)
        }
        ConfigAction::Set(args) => {
            let project = args.project.clone();
            let view = engine.save_config(&project, config_update(args)?)?;
            if json {
                print_json(&view)?;
            } else {
                println!("Saved config for '{project}'");
                output::config(&view);
            }
            Ok(0)
        }
        ConfigAction::Check { project } => {
            let check = engine.check_connection(&project).await?;
            if json {
                print_json(&check)?;
            } else {
                output::connection(&check);
            }
            Ok(if check.reachable { 0 } else { 1 })
        }
        ConfigAction::ClearLlmKey { project } => {
            let cleared = engine.clear_llm_key(&project)?;
            println!("{}", if cleared { "LLM key removed" } else { "No LLM key stored" });
            Ok(0)
        }
    }
}

fn config_update(args: ConfigArgs) -> Result<ConfigUpdate> {
    let auth = match args.auth_type {
        None => None,
        Some(AuthType::None) => Some(AuthConfig::None),
        Some(AuthType::Basic) => Some(AuthConfig::Basic {
            username: args.username.context("--username is required for basic auth")?,
            password: args.password,
        }),
        Some(AuthType::Bearer) => Some(AuthConfig::Bearer { token: args.token }),
        Some(AuthType::ApiKey) => Some(AuthConfig::ApiKey {
            key_name: args.key_name.unwrap_or_else(|| "X-API-Key".to_string()),
            key_value: args.key_value,
            location: args.key_location.into(),
        }),
        Some(AuthType::Oauth2) => Some(AuthConfig::OAuth2 {
            token_url: args.token_url.context("--token-url is required for oauth2")?,
            client_id: args.client_id.context("--client-id is required for oauth2")?,
            client_secret: args.client_secret,
            grant_type: "client_credentials".to_string(),
            scope: args.scope,
        }),
    };

    let llm = match (args.llm_provider, args.llm_model) {
        (None, None) if args.llm_key.is_none() && args.llm_endpoint.is_none() => None,
        (provider, Some(model)) => Some(LlmConfig {
            provider: provider.unwrap_or_default(),
            model,
            api_key: args.llm_key.map(Some),
            endpoint: args.llm_endpoint,
        }),
        (_, None) => bail!("--llm-model is required when configuring an LLM"),
    };

    Ok(ConfigUpdate {
        base_url: args.base_url,
        auth,
        llm,
        timeout_secs: args.timeout,
        headers: (!args.headers.is_empty()).then(|| args.headers.into_iter().collect()),
    })
}
