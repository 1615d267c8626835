//! leolani CLI: run the coordination core, inspect configuration and friends.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use tokio::io::AsyncBufReadExt;

use leolani::app::Application;
use leolani::config::LeolaniConfig;
use leolani::event::{Event, Payload, TextSignal, TextSignalEvent};
use leolani::friends::{DurableFriendStore, FriendStore};

#[derive(Parser)]
#[command(name = "leolani", version, about = "Leolani conversational agent core")]
struct Cli {
    /// Configuration file (defaults to $XDG_CONFIG_HOME/leolani/leolani.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start all components and run until Ctrl-C.
    Run {
        /// Read user utterances from stdin and print agent replies.
        #[arg(long)]
        console: bool,
    },

    /// Print the effective configuration as TOML.
    Config,

    /// List identities in the durable friend store.
    Friends {
        /// Friend store directory (overrides the configuration).
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Show only this identifier.
        identifier: Option<String>,
    },
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = LeolaniConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { console } => {
            let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
            runtime.block_on(run(config, console))?;
        }

        Commands::Config => {
            print!("{}", config.to_toml()?);
        }

        Commands::Friends {
            data_dir,
            identifier,
        } => {
            let dir = match data_dir {
                Some(dir) => dir,
                None => config.friends_dir()?,
            };
            let store = DurableFriendStore::open(&dir)?;
            match identifier {
                Some(identifier) => match store.get(&identifier)? {
                    Some(friend) => println!(
                        "{identifier}\t{}\t{}",
                        friend.uri.as_deref().unwrap_or("-"),
                        friend.names.join(", ")
                    ),
                    None => println!("{identifier}: unknown"),
                },
                None => {
                    let friends = store.get_all()?;
                    if friends.is_empty() {
                        println!("No friends in {}", dir.display());
                    }
                    for (identifier, friend) in friends {
                        println!(
                            "{identifier}\t{}\t{}",
                            friend.uri.as_deref().unwrap_or("-"),
                            friend.names.join(", ")
                        );
                    }
                }
            }
        }
    }

    Ok(())
}

async fn run(config: LeolaniConfig, console: bool) -> Result<()> {
    let text_in = config.topics.text_in.clone();
    let text_out = config.topics.text_out.clone();
    let app = Application::start(config).await?;

    let printer = console.then(|| {
        app.bus().subscribe(
            &text_out,
            Arc::new(|event: &Event| {
                if let Payload::TextSignal(text) = &event.payload {
                    println!("leolani> {}", text.signal.text);
                }
            }),
        )
    });

    if console {
        let bus = Arc::clone(app.bus());
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                line = lines.next_line() => match line.into_diagnostic()? {
                    Some(line) if !line.trim().is_empty() => {
                        let signal = TextSignal::new(None, line.trim());
                        let event = Event::for_payload(TextSignalEvent::for_user(signal));
                        bus.publish(&text_in, event.with_source("console"));
                    }
                    Some(_) => {}
                    None => break,
                },
            }
        }
    } else {
        tokio::signal::ctrl_c().await.into_diagnostic()?;
    }

    if let Some(id) = printer {
        app.bus().unsubscribe(id);
    }
    tracing::info!("shutting down");
    app.stop().await;
    Ok(())
}
