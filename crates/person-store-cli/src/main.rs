use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use person_store_api::{
    AgeRequest, CreatePersonRequest, IdRequest, JobTitleRequest, PersonStoreApi, SexRequest,
    UpdatePersonRequest,
};
use person_store_core::{Person, PersonId, PersonStore};
use person_store_loader::{bundled_dataset, load_dataset, Dataset};
use serde::Deserialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "pstore")]
#[command(about = "Person Store CLI")]
struct Cli {
    /// Initial dataset (NDJSON or JSON array); the bundled dataset when omitted.
    #[arg(long)]
    data: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Person {
        #[command(subcommand)]
        command: Box<PersonCommand>,
    },
    Query {
        #[command(subcommand)]
        command: QueryCommand,
    },
    Tool {
        #[command(subcommand)]
        command: ToolCommand,
    },
    /// Run NDJSON tool calls (`{"tool": ..., "arguments": ...}`) against one store.
    Batch(BatchArgs),
    Dataset {
        #[command(subcommand)]
        command: DatasetCommand,
    },
}

#[derive(Debug, Subcommand)]
enum PersonCommand {
    List,
    Get(IdArgs),
    Create(PersonArgs),
    Update(UpdateArgs),
    Delete(IdArgs),
}

#[derive(Debug, Args)]
struct IdArgs {
    #[arg(long)]
    id: u64,
}

#[derive(Debug, Args)]
struct PersonArgs {
    #[arg(long)]
    first_name: String,
    #[arg(long)]
    last_name: String,
    #[arg(long)]
    email: String,
    #[arg(long)]
    sex: String,
    #[arg(long)]
    ip_address: String,
    #[arg(long)]
    job_title: String,
    #[arg(long, allow_negative_numbers = true)]
    age: i32,
}

#[derive(Debug, Args)]
struct UpdateArgs {
    #[arg(long)]
    id: u64,
    #[command(flatten)]
    person: PersonArgs,
}

#[derive(Debug, Subcommand)]
enum QueryCommand {
    JobTitle {
        #[arg(long)]
        query: Option<String>,
    },
    Sex {
        #[arg(long)]
        sex: Option<String>,
    },
    Age {
        #[arg(long, allow_negative_numbers = true)]
        age: i32,
    },
}

#[derive(Debug, Subcommand)]
enum ToolCommand {
    List,
    Call(ToolCallArgs),
}

#[derive(Debug, Args)]
struct ToolCallArgs {
    #[arg(long)]
    name: String,
    /// JSON object of tool arguments.
    #[arg(long)]
    args: Option<String>,
}

#[derive(Debug, Args)]
struct BatchArgs {
    /// NDJSON file of tool calls, or `-` for stdin.
    #[arg(long = "in")]
    input: PathBuf,
}

#[derive(Debug, Subcommand)]
enum DatasetCommand {
    Info,
}

#[derive(Debug, Deserialize)]
struct BatchCall {
    tool: String,
    #[serde(default)]
    arguments: Value,
}

impl PersonArgs {
    fn into_person(self) -> Person {
        Person {
            id: PersonId::default(),
            first_name: self.first_name,
            last_name: self.last_name,
            email: self.email,
            sex: self.sex,
            ip_address: self.ip_address,
            job_title: self.job_title,
            age: self.age,
        }
    }
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).context("failed to serialize CLI output")
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init();
}

fn open_dataset(path: Option<&Path>) -> Result<Dataset> {
    match path {
        Some(path) => load_dataset(path),
        None => bundled_dataset(),
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let Dataset { info, records } = open_dataset(cli.data.as_deref())?;

    let store = PersonStore::with_records(records)
        .with_context(|| format!("failed to initialize store from {}", info.source))?;
    let api = PersonStoreApi::new(Arc::new(store));

    match cli.command {
        Command::Person { command } => run_person(*command, &api),
        Command::Query { command } => run_query(command, &api),
        Command::Tool { command } => run_tool(command, &api),
        Command::Batch(args) => run_batch(&args, &api),
        Command::Dataset { command: DatasetCommand::Info } => emit_json(to_value(&info)?),
    }
}

fn run_person(command: PersonCommand, api: &PersonStoreApi) -> Result<()> {
    match command {
        PersonCommand::List => emit_json(to_value(&api.get_all_persons())?),
        PersonCommand::Get(args) => emit_json(to_value(&api.get_person_by_id(PersonId(args.id)))?),
        PersonCommand::Create(args) => {
            let created =
                api.create_person(CreatePersonRequest { person: Some(args.into_person()) })?;
            emit_json(to_value(&created)?)
        }
        PersonCommand::Update(args) => {
            let result = api.update_person(UpdatePersonRequest {
                id: PersonId(args.id),
                person: Some(args.person.into_person()),
            })?;
            emit_json(to_value(&result)?)
        }
        PersonCommand::Delete(args) => {
            emit_json(to_value(&api.delete_person(IdRequest { id: PersonId(args.id) })?)?)
        }
    }
}

fn run_query(command: QueryCommand, api: &PersonStoreApi) -> Result<()> {
    let list = match command {
        QueryCommand::JobTitle { query } => api.search_by_job_title(&JobTitleRequest { query }),
        QueryCommand::Sex { sex } => api.filter_by_sex(&SexRequest { sex }),
        QueryCommand::Age { age } => api.filter_by_age(AgeRequest { age }),
    };
    emit_json(to_value(&list)?)
}

fn run_tool(command: ToolCommand, api: &PersonStoreApi) -> Result<()> {
    match command {
        ToolCommand::List => emit_json(serde_json::json!({ "tools": PersonStoreApi::tools() })),
        ToolCommand::Call(args) => {
            let arguments = match args.args.as_deref() {
                Some(raw) => serde_json::from_str(raw)
                    .with_context(|| format!("--args is not valid JSON: {raw}"))?,
                None => Value::Null,
            };
            let result = api.invoke(&args.name, arguments)?;
            emit_json(serde_json::json!({ "tool": args.name, "data": result }))
        }
    }
}

fn read_batch_input(input: &Path) -> Result<String> {
    if input == Path::new("-") {
        let mut body = String::new();
        std::io::stdin().read_to_string(&mut body).context("failed to read batch from stdin")?;
        return Ok(body);
    }
    fs::read_to_string(input)
        .with_context(|| format!("failed to read batch file {}", input.display()))
}

fn run_batch(args: &BatchArgs, api: &PersonStoreApi) -> Result<()> {
    let body = read_batch_input(&args.input)?;
    let mut results = Vec::new();

    for (index, line) in body.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let call: BatchCall = serde_json::from_str(trimmed)
            .with_context(|| format!("failed to parse batch line {}", index + 1))?;

        let outcome = match api.invoke(&call.tool, call.arguments) {
            Ok(data) => serde_json::json!({
                "line": index + 1,
                "tool": call.tool,
                "ok": true,
                "data": data
            }),
            Err(err) => {
                tracing::warn!(tool = %call.tool, line = index + 1, "batch call failed: {err:#}");
                serde_json::json!({
                    "line": index + 1,
                    "tool": call.tool,
                    "ok": false,
                    "error": format!("{err:#}")
                })
            }
        };
        results.push(outcome);
    }

    emit_json(serde_json::json!({ "results": results }))
}
