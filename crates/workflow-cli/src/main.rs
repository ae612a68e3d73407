//! Command line front end for the approval engine
//!
//! Operates on the SQLite database named in the configuration file.

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use serde_json::json;
use std::sync::Arc;
use workflow_core::store::{SqliteStore, Store};
use workflow_core::workflow::{
    ActionRegistry, CurrentUser, Engine, RequestContext, TemplateAdmin, WorkflowRuntime,
};
use workflow_core::EngineConfig;
use workflow_types::{
    role, user_state, TemplateSpec, User, UserId, WorkflowId, FORM_ACTION, FORM_JUMP_NODE,
    FORM_TITLE,
};

fn cli() -> Command {
    Command::new("workflow")
        .version("1.0.0")
        .about("Approval workflow engine")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_name("FILE")
                .help("Configuration file path")
                .env("WORKFLOW_CONFIG")
                .default_value("workflow.json")
                .global(true),
        )
        .subcommand(Command::new("init-db").about("Create the database tables"))
        .subcommand(
            Command::new("import-template")
                .about("Create a workflow type and its nodes from a JSON file")
                .arg(Arg::new("file").value_name("FILE").required(true)),
        )
        .subcommand(
            Command::new("add-user")
                .about("Create or replace a user")
                .arg(id_arg("id", "User id"))
                .arg(Arg::new("username").long("username").value_name("NAME").required(true))
                .arg(
                    Arg::new("nickname")
                        .long("nickname")
                        .value_name("NAME")
                        .help("Display name, defaults to the username"),
                )
                .arg(
                    Arg::new("super-admin")
                        .long("super-admin")
                        .help("Grant the super admin role")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("disabled")
                        .long("disabled")
                        .help("Create the user disabled")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("initiate")
                .about("Start a workflow")
                .arg(Arg::new("type").long("type").value_name("ONLY_NAME").required(true))
                .arg(id_arg("user", "Acting user id"))
                .arg(Arg::new("title").long("title").value_name("TITLE")),
        )
        .subcommand(
            Command::new("examine")
                .about("Approve, overrule or cancel the current node")
                .arg(id_arg("workflow", "Workflow id"))
                .arg(id_arg("user", "Acting user id"))
                .arg(
                    Arg::new("action")
                        .long("action")
                        .value_name("ACTION")
                        .value_parser(["next", "overrule", "cancel"])
                        .default_value("next"),
                )
                .arg(
                    Arg::new("jump-node")
                        .long("jump-node")
                        .value_name("NODE")
                        .help("Overrule target node")
                        .value_parser(clap::value_parser!(i64)),
                ),
        )
        .subcommand(
            Command::new("show")
                .about("Print a workflow with its current operators")
                .arg(id_arg("workflow", "Workflow id")),
        )
        .subcommand(Command::new("actions").about("List registered node actions"))
}

fn id_arg(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .value_name("ID")
        .help(help)
        .required(true)
        .value_parser(clap::value_parser!(i64))
}

fn id_of(matches: &ArgMatches, name: &str) -> Result<i64> {
    matches
        .get_one::<i64>(name)
        .copied()
        .with_context(|| format!("--{} is required", name))
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    // Load configuration
    let config_path = matches
        .get_one::<String>("config")
        .context("--config is required")?;
    let config = EngineConfig::load(config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    // Initialize logging with the configured level if RUST_LOG is not set
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_level.as_str()),
    )
    .init();
    log::info!("Loaded configuration from {}", config_path);

    let store = SqliteStore::connect(&config.database.url, config.database.max_connections).await?;
    if config.database.auto_migrate || matches.subcommand_name() == Some("init-db") {
        store.migrate().await?;
    }

    let runtime = WorkflowRuntime::new(
        Arc::new(store.clone()),
        Arc::new(ActionRegistry::with_builtin_actions()),
    )
    .with_options(config.engine.clone());

    let result = run(&matches, &store, &runtime).await;
    store.shutdown().await;
    result
}

async fn run(matches: &ArgMatches, store: &SqliteStore, runtime: &WorkflowRuntime) -> Result<()> {
    match matches.subcommand() {
        Some(("init-db", _)) => {
            println!("Database ready");
        }
        Some(("import-template", sub)) => {
            let file = sub.get_one::<String>("file").context("FILE is required")?;
            let content = std::fs::read_to_string(file)
                .with_context(|| format!("Failed to read {}", file))?;
            let spec: TemplateSpec = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse template {}", file))?;
            let (created, nodes) = TemplateAdmin::new(runtime).import(&spec).await?;
            println!(
                "Imported workflow type '{}' (id {}) with {} nodes",
                created.only_name,
                created.id,
                nodes.len()
            );
        }
        Some(("add-user", sub)) => {
            let username = sub.get_one::<String>("username").context("--username is required")?;
            let nickname = sub.get_one::<String>("nickname").unwrap_or(username);
            let mut user = User::new(id_of(sub, "id")?, username, nickname);
            if sub.get_flag("super-admin") {
                user = user.with_role(role::SUPER_ADMIN);
            }
            if sub.get_flag("disabled") {
                user = user.with_state(user_state::DISABLED);
            }
            let mut tx = store.begin().await?;
            tx.put_user(&user).await?;
            tx.commit().await?;
            println!("Saved user {} ({})", user.id, user.username);
        }
        Some(("initiate", sub)) => {
            let only_name = sub.get_one::<String>("type").context("--type is required")?;
            let ctx = acting_user(store, id_of(sub, "user")?).await?;
            let mut engine = Engine::create_by_only_name(runtime, ctx, only_name).await?;
            if let Some(title) = sub.get_one::<String>("title") {
                engine.set_form_data_field(FORM_TITLE, json!(title));
            }
            engine.initiate().await?;
            print_engine(&engine)?;
        }
        Some(("examine", sub)) => {
            let workflow_id = WorkflowId::new(id_of(sub, "workflow")?);
            let ctx = acting_user(store, id_of(sub, "user")?).await?;
            let mut engine = Engine::open(runtime, ctx, workflow_id).await?;
            if let Some(action) = sub.get_one::<String>("action") {
                engine.set_form_data_field(FORM_ACTION, json!(action));
            }
            if let Some(jump) = sub.get_one::<i64>("jump-node") {
                engine.set_form_data_field(FORM_JUMP_NODE, json!(jump));
            }
            engine.examine_approve().await?;
            print_engine(&engine)?;
        }
        Some(("show", sub)) => {
            let workflow_id = WorkflowId::new(id_of(sub, "workflow")?);
            let engine =
                Engine::open(runtime, Arc::new(RequestContext::anonymous()), workflow_id).await?;
            print_engine(&engine)?;
        }
        Some(("actions", _)) => {
            for (key, label) in runtime.actions().get_all_action_name() {
                println!("{:<16} {}", key, label);
            }
        }
        Some((other, _)) => anyhow::bail!("Unknown command '{}'", other),
        None => anyhow::bail!("No command given"),
    }
    Ok(())
}

/// Request context for a stored user
async fn acting_user(store: &SqliteStore, id: i64) -> Result<Arc<dyn CurrentUser>> {
    let mut tx = store.begin().await?;
    let user = tx
        .get_user(UserId::new(id))
        .await
        .with_context(|| format!("User {} does not exist", id))?;
    tx.rollback().await?;
    Ok(Arc::new(RequestContext::authenticated(user)))
}

fn print_engine(engine: &Engine) -> Result<()> {
    let report = json!({
        "workflow": engine.workflow(),
        "node": engine.current_node().map(|n| json!({"node": n.node, "name": n.name})),
        "operators": engine.operators(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        cli().debug_assert();
    }

    #[test]
    fn test_examine_arguments() {
        let matches = cli()
            .try_get_matches_from([
                "workflow",
                "examine",
                "--workflow",
                "3",
                "--user",
                "5",
                "--action",
                "overrule",
                "--jump-node",
                "1",
            ])
            .unwrap();
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "examine");
        assert_eq!(id_of(sub, "workflow").unwrap(), 3);
        assert_eq!(sub.get_one::<String>("action").map(String::as_str), Some("overrule"));
        assert_eq!(sub.get_one::<i64>("jump-node"), Some(&1));
    }

    #[test]
    fn test_unknown_action_rejected() {
        let result = cli().try_get_matches_from([
            "workflow",
            "examine",
            "--workflow",
            "3",
            "--user",
            "5",
            "--action",
            "approve",
        ]);
        assert!(result.is_err());
    }
}
