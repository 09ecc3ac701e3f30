use clap::{Parser, Subcommand};
use flowline::compiler::loader::load_process_from_yaml;
use flowline::runtime::context::Args;
use flowline::runtime::engine::Engine;
use flowline::runtime::interceptor::LogInterceptor;
use flowline::runtime::redis_storage::RedisStateStore;
use flowline::runtime::task::Task;
use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{Result, anyhow};
use tracing::{info, warn};
use uuid::Uuid;

// Upper bound on auto-completed tasks in `run`, so a cycle cannot spin forever.
const MAX_STEPS: usize = 1000;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Redis connection URL (all commands except `run`)
    #[arg(long, global = true, default_value = "redis://127.0.0.1:6379/0")]
    redis: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a process locally in memory, completing every task as it appears
    Run {
        /// Path to the process YAML file
        #[arg(long, short)]
        file: PathBuf,

        /// Completes every task as this operator instead of its first actor
        #[arg(long)]
        operator: Option<String>,

        /// Start arguments (key=value)
        #[arg(long, short = 'D', value_parser = parse_key_val)]
        vars: Vec<(String, serde_json::Value)>,
    },

    /// Deploy a process definition as its next version
    Deploy {
        #[arg(long, short)]
        file: PathBuf,
    },

    /// Start an order of the latest version of a process
    Start {
        #[arg(long)]
        process: String,

        #[arg(long)]
        operator: Option<String>,

        #[arg(long, short = 'D', value_parser = parse_key_val)]
        vars: Vec<(String, serde_json::Value)>,
    },

    /// List the active tasks of an order
    Tasks {
        #[arg(long)]
        order: Uuid,
    },

    /// Complete a task
    Execute {
        #[arg(long)]
        task: Uuid,

        #[arg(long)]
        operator: String,

        /// Route straight to this node
        #[arg(long, conflicts_with = "reject")]
        jump: Option<String>,

        /// Route back to the previous task node
        #[arg(long)]
        reject: bool,

        #[arg(long, short = 'D', value_parser = parse_key_val)]
        vars: Vec<(String, serde_json::Value)>,
    },

    /// Claim a task
    Take {
        #[arg(long)]
        task: Uuid,

        #[arg(long)]
        operator: String,
    },

    /// Restore a completed task
    Withdraw {
        #[arg(long)]
        task: Uuid,

        #[arg(long)]
        operator: String,
    },

    /// Terminate an order and close its tasks
    Terminate {
        #[arg(long)]
        order: Uuid,

        #[arg(long)]
        operator: Option<String>,
    },
}

fn parse_key_val(s: &str) -> Result<(String, serde_json::Value), String> {
    let pos = s.find('=').ok_or_else(|| format!("invalid KEY=value: no `=` found in `{}`", s))?;
    let key = s[..pos].to_string();
    let val_str = &s[pos + 1..];
    // Try parsing as JSON, otherwise treat as string
    let val = serde_json::from_str(val_str).unwrap_or_else(|_| serde_json::Value::String(val_str.to_string()));
    Ok((key, val))
}

fn print_tasks(tasks: &[Task]) {
    for task in tasks {
        println!(
            "{}  order={}  node={}  actors=[{}]  operator={}",
            task.id,
            task.order_id,
            task.task_name,
            task.actor_ids.join(","),
            task.operator.as_deref().unwrap_or("-"),
        );
    }
}

async fn redis_engine(url: &str) -> Result<Engine> {
    let client = redis::Client::open(url)?;
    let engine = Engine::new(Arc::new(RedisStateStore::new(client)))
        .with_interceptor(Arc::new(LogInterceptor));
    engine.register_builtin_handlers();
    let loaded = engine.load_processes().await?;
    info!(loaded, "Processes loaded from store");
    Ok(engine)
}

async fn run_standalone(file: PathBuf, operator: Option<String>, vars: Args) -> Result<()> {
    info!("Running in Standalone Memory Mode");
    let engine = Engine::in_memory().with_interceptor(Arc::new(LogInterceptor));
    engine.register_builtin_handlers();

    let process = engine.deploy(load_process_from_yaml(&file)?).await?;
    let order = engine.start_instance_by_id(&process.id, operator.as_deref(), vars).await?;
    println!("order {} started ({} v{})", order.id, process.id, process.version);

    for _ in 0..MAX_STEPS {
        let order = engine.get_order(order.id).await?;
        if !order.is_active() {
            println!("order {} is {:?}", order.id, order.state);
            return Ok(());
        }
        let Some(task) = engine.active_tasks(order.id).await?.into_iter().next() else {
            warn!(order_id = %order.id, "Order is active but has no tasks left");
            return Ok(());
        };

        let actor = match (&operator, task.actor_ids.first()) {
            (Some(op), _) => op.clone(),
            (None, Some(first)) => first.clone(),
            (None, None) => "flowline".to_string(),
        };
        println!("completing {} [{}] as {}", task.task_name, task.id, actor);
        let produced = engine.execute_task(task.id, &actor, Args::new()).await?;
        print_tasks(&produced);
    }
    Err(anyhow!("order {} did not finish within {} steps", order.id, MAX_STEPS))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { file, operator, vars } => {
            run_standalone(file, operator, vars.into_iter().collect()).await?;
        }
        Commands::Deploy { file } => {
            let engine = redis_engine(&cli.redis).await?;
            let process = engine.deploy(load_process_from_yaml(&file)?).await?;
            println!("deployed {} v{}", process.id, process.version);
        }
        Commands::Start { process, operator, vars } => {
            let engine = redis_engine(&cli.redis).await?;
            let order = engine.start_instance_by_id(&process, operator.as_deref(), vars.into_iter().collect()).await?;
            println!("order {} started", order.id);
            print_tasks(&engine.active_tasks(order.id).await?);
        }
        Commands::Tasks { order } => {
            let engine = redis_engine(&cli.redis).await?;
            print_tasks(&engine.active_tasks(order).await?);
        }
        Commands::Execute { task, operator, jump, reject, vars } => {
            let engine = redis_engine(&cli.redis).await?;
            let args: Args = vars.into_iter().collect();
            let produced = if reject {
                engine.execute_and_jump_task(task, &operator, args, None).await?
            } else if let Some(target) = jump {
                engine.execute_and_jump_task(task, &operator, args, Some(target.as_str())).await?
            } else {
                engine.execute_task(task, &operator, args).await?
            };
            print_tasks(&produced);
        }
        Commands::Take { task, operator } => {
            let engine = redis_engine(&cli.redis).await?;
            print_tasks(&[engine.take_task(task, &operator).await?]);
        }
        Commands::Withdraw { task, operator } => {
            let engine = redis_engine(&cli.redis).await?;
            print_tasks(&[engine.withdraw_task(task, &operator).await?]);
        }
        Commands::Terminate { order, operator } => {
            let engine = redis_engine(&cli.redis).await?;
            engine.terminate_by_id(order, operator.as_deref()).await?;
            println!("order {} terminated", order);
        }
    }

    Ok(())
}
