//! mushd - softcode evaluation daemon
//!
//! Reads one command per line from stdin and prints what it evaluates to.
//! A line of the form `@as #N <text>` runs the text as object `#N`;
//! anything else runs as the default player.

use anyhow::{Context, Result};
use mush_config::ServerConfig;
use mush_core::{Dbref, Identities};
use mush_scripting::{EvalFlags, EvalLimits, MemoryWorld, Session};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Object commands run as when no `@as` prefix is given
const DEFAULT_PLAYER: Dbref = Dbref(1);

/// World used when no `world_file` is configured
const BUILTIN_WORLD: &str = r#"{
    "objects": [
        { "id": 0, "name": "Room Zero", "owner": 1, "location": -1 },
        {
            "id": 1, "name": "Wizard", "owner": 1, "location": 0,
            "gender": "male", "flags": ["WIZARD", "CONNECTED"]
        },
        {
            "id": 2, "name": "Toolbox", "owner": 1, "location": 0,
            "attributes": {
                "GREET": "Hello, %0!",
                "DOUBLE": "[mul(%0,2)]",
                "FACT": "[switch(%0,0,1,[mul(%0,u(me/FACT,sub(%0,1)))])]"
            }
        }
    ]
}"#;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config = load_config()?;
    config.display();

    let world = Arc::new(load_world(&config)?);
    let session = Arc::new(Session::with_builtins(EvalLimits::from(&config)));
    info!("Ready: {} objects, {} functions", world.len(), session.functions().len());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let (who, text) = split_command(&line);
        let output = run_command(&session, &world, config.cpu_time_limit(), who, text).await?;
        stdout.write_all(output.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        for message in render_notifications(who, world.take_all_notifications()) {
            stdout.write_all(message.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
        }
        stdout.flush().await?;
    }

    info!("End of input, shutting down");
    Ok(())
}

fn load_config() -> Result<ServerConfig> {
    let config = match std::env::args().nth(1) {
        Some(path) => ServerConfig::load_from_file(&path)
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        None => match ServerConfig::load_default() {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to load default options file: {}", e);
                warn!("Using default configuration");
                ServerConfig::default()
            }
        },
    };
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn load_world(config: &ServerConfig) -> Result<MemoryWorld> {
    let json = match config.world_file {
        Some(ref path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read world file {}", path))?,
        None => BUILTIN_WORLD.to_string(),
    };
    MemoryWorld::from_json(&json).context("Failed to load world")
}

/// Split off an `@as #N` prefix
fn split_command(line: &str) -> (Dbref, &str) {
    if let Some(rest) = line.strip_prefix("@as ") {
        let rest = rest.trim_start();
        let (target, text) = rest.split_once(' ').unwrap_or((rest, ""));
        if let Some(who) = Dbref::parse(target) {
            return (who, text);
        }
    }
    (DEFAULT_PLAYER, line)
}

/// Messages for the acting object print as-is, others carry their recipient
fn render_notifications(who: Dbref, pending: Vec<(Dbref, String)>) -> Vec<String> {
    pending
        .into_iter()
        .map(|(target, message)| {
            if target == who {
                message
            } else {
                format!("[{}] {}", target, message)
            }
        })
        .collect()
}

/// Evaluate one command under the CPU watchdog
async fn run_command(
    session: &Arc<Session>,
    world: &Arc<MemoryWorld>,
    budget: Duration,
    who: Dbref,
    text: &str,
) -> Result<String> {
    session.begin_command();

    let watchdog = {
        let session = Arc::clone(session);
        tokio::spawn(async move {
            tokio::time::sleep(budget).await;
            session.cpu().trip();
        })
    };

    let job = {
        let session = Arc::clone(session);
        let world = Arc::clone(world);
        let text = text.to_string();
        tokio::task::spawn_blocking(move || {
            let mut ctx = session.new_context();
            session
                .evaluator(world.as_ref())
                .evaluate(&mut ctx, &text, Identities::solo(who), EvalFlags::DEFAULT)
        })
    };

    let result = job.await;
    watchdog.abort();

    match result {
        Ok(evaluation) => {
            if evaluation.halted {
                warn!("Evaluation for {} halted by a resource limit", who);
            }
            Ok(evaluation.output)
        }
        Err(e) => {
            error!("Evaluation task failed: {}", e);
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_command() {
        assert_eq!(split_command("@as #2 [u(me/GREET,you)]"), (Dbref(2), "[u(me/GREET,you)]"));
        assert_eq!(split_command("[add(1,2)]"), (DEFAULT_PLAYER, "[add(1,2)]"));
        assert_eq!(split_command("@as nobody x"), (DEFAULT_PLAYER, "@as nobody x"));
    }

    #[test]
    fn test_render_notifications() {
        let pending = vec![
            (Dbref(1), "CPU usage exceeded.".to_string()),
            (Dbref(3), "#2! [add(1,1)] => 2".to_string()),
        ];
        assert_eq!(
            render_notifications(Dbref(1), pending),
            vec!["CPU usage exceeded.", "[#3] #2! [add(1,1)] => 2"]
        );
    }

    #[test]
    fn test_builtin_world_loads() {
        let world = MemoryWorld::from_json(BUILTIN_WORLD).unwrap();
        assert_eq!(world.len(), 3);
    }
}
