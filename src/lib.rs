// src/lib.rs

pub mod cli;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod errors;
pub mod fs;
pub mod logging;
pub mod model;
pub mod store;
pub mod tasks;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cli::{CliArgs, Command};
use crate::config::{ConfigFile, TransferFile, load_and_validate, load_transfer};
use crate::engine::{ChainOutcome, ChainRunner, ContextResolver};
use crate::errors::TaskgateError;
use crate::fs::RealFileSystem;
use crate::model::{Rule, Transfer, TransferContext};
use crate::store::{MemoryStore, Store};
use crate::tasks::TaskRegistry;
use crate::types::{Chain, Direction, TransferStatus};

/// High-level entry point used by `main.rs`.
///
/// Loads and validates the configuration, then dispatches the subcommand.
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;
    debug!(config = ?config_path, rules = cfg.import().rules.len(), "configuration loaded");

    match args.command {
        Command::Check => check(&cfg),
        Command::Run {
            rule,
            direction,
            chain,
            transfer,
        } => run_transfer(&cfg, &rule, direction, chain.into(), &transfer).await,
    }
}

/// Validate every task of every rule without running anything.
///
/// Tasks whose arguments reference `#TOKEN#`s depend on a live transfer;
/// only their type is checked here.
fn check(cfg: &ConfigFile) -> Result<()> {
    let store = cfg.seed_store()?;
    let registry = TaskRegistry::with_builtin_tasks();
    let mut failures = 0usize;

    println!("taskgate check");
    for rule in cfg.rules() {
        println!("rule {} ({}):", rule.name, rule.direction);
        let ctx = TransferContext::new(
            Transfer {
                rule: rule.name.clone(),
                ..Transfer::default()
            },
            rule.clone(),
            cfg.paths.clone(),
        );

        for chain in Chain::ALL {
            for def in rule.tasks(chain) {
                let label = format!("{}[{}] {}", chain, def.rank, def.kind);
                if serde_json::Value::Object(def.args.clone()).to_string().contains('#') {
                    println!("  - {label}: deferred (depends on the transfer)");
                    continue;
                }
                let verdict = registry.create(&def.kind).and_then(|mut task| {
                    let args = ContextResolver::new(&ctx, &store).interpolate_args(&def.args)?;
                    task.validate_db(&store, &args)
                });
                match verdict {
                    Ok(()) => println!("  - {label}: ok"),
                    Err(e) => {
                        failures += 1;
                        println!("  - {label}: {e}");
                    }
                }
            }
        }
    }

    if failures > 0 {
        return Err(TaskgateError::ConfigError(format!("{failures} task(s) failed validation")).into());
    }
    println!("all tasks valid");
    Ok(())
}

/// Pick the rule to run. A name shared by a send and a receive rule needs an
/// explicit direction.
fn find_rule(store: &dyn Store, name: &str, direction: Option<Direction>) -> Result<Rule, TaskgateError> {
    if let Some(direction) = direction {
        return store
            .rule(name, direction)
            .map_err(|_| TaskgateError::RuleNotFound(format!("{} ({})", name, direction)));
    }
    let mut rules = store.rules_named(name)?;
    match rules.len() {
        0 => Err(TaskgateError::RuleNotFound(name.to_string())),
        1 => Ok(rules.remove(0)),
        _ => Err(TaskgateError::ConfigError(format!(
            "rule '{}' exists for both directions; pass --direction",
            name
        ))),
    }
}

/// Assemble the transfer context: the rule, the transfer row and whichever
/// agent/account pair the transfer names.
fn build_context(
    cfg: &ConfigFile,
    store: &dyn Store,
    rule: Rule,
    spec: &TransferFile,
) -> Result<TransferContext, TaskgateError> {
    let mut transfer = spec.to_transfer(&rule);
    transfer.start = Some(Utc::now());
    transfer.status = TransferStatus::Running;

    let mut ctx = TransferContext::new(transfer, rule, cfg.paths.clone());

    if let Some(ref name) = spec.local_agent {
        let agent = store.local_agent_by_name(name)?;
        if let Some(ref login) = spec.local_account {
            let account = store.local_account_by_login(agent.id, login)?;
            ctx.transfer.local_account_id = Some(account.id);
            ctx.local_account = Some(account);
        }
        ctx.local_agent = Some(agent);
    }
    if let Some(ref name) = spec.remote_agent {
        let agent = store.remote_agent_by_name(name)?;
        if let Some(ref login) = spec.remote_account {
            let account = store.remote_account_by_login(agent.id, login)?;
            ctx.transfer.remote_account_id = Some(account.id);
            ctx.remote_account = Some(account);
        }
        ctx.remote_agent = Some(agent);
    }
    Ok(ctx)
}

async fn run_transfer(
    cfg: &ConfigFile,
    rule_name: &str,
    direction: Option<Direction>,
    chain: Chain,
    transfer_path: &Path,
) -> Result<()> {
    let store: Arc<MemoryStore> = Arc::new(cfg.seed_store()?);
    let spec = load_transfer(transfer_path)?;
    let rule = find_rule(store.as_ref(), rule_name, direction)?;

    let mut ctx = build_context(cfg, store.as_ref(), rule, &spec)?;
    if ctx.transfer.task_number > 0 {
        // A non-zero task number resumes the chain at that step.
        ctx.transfer.step = chain.step();
    }
    ctx.transfer.id = store.insert_transfer(ctx.transfer.clone())?;

    // Ctrl-C → stop before the next step.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            cancel.cancel();
        });
    }

    let store_dyn: Arc<dyn Store> = store.clone();
    let runner = ChainRunner::new(
        Arc::new(TaskRegistry::with_builtin_tasks()),
        store_dyn,
        Arc::new(RealFileSystem),
    )
    .with_trace(|step| {
        debug!(
            transfer = step.transfer_id,
            chain = %step.chain,
            rank = step.rank,
            next = step.task_number,
            "step recorded"
        );
        Ok(())
    });

    info!(transfer = ctx.transfer.id, rule = %ctx.rule.name, %chain, "starting chain");
    let result = runner.run_chain(&cancel, chain, &mut ctx, None).await;

    let stored = store.transfer(ctx.transfer.id)?;
    print_transfer(&stored);

    match result {
        Ok(ChainOutcome::Completed) => {
            println!("{} chain completed", chain);
            Ok(())
        }
        Ok(ChainOutcome::CompletedWithWarning(msg)) => {
            println!("{} chain completed with a warning: {}", chain, msg);
            Ok(())
        }
        Err(e) => Err(TaskgateError::Chain(e).into()),
    }
}

fn print_transfer(transfer: &Transfer) {
    println!("transfer {}", transfer.id);
    println!("  rule: {}", transfer.rule);
    println!("  local_path: {}", transfer.local_path.display());
    println!("  filesize: {}", transfer.filesize);
    println!("  step: {} (task {})", transfer.step, transfer.task_number);
    if !transfer.error.is_ok() {
        println!(
            "  error: {} {}",
            transfer.error.code.as_str(),
            transfer.error.details
        );
    }
}
