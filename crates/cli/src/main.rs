use clap::{Parser, Subcommand};
use hl7vg_core::constants::DEFAULT_PROCESS_LIMIT;
use hl7vg_core::{CoreConfig, Hl7Service, ObsValue, RecordId};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "hl7vg")]
#[command(about = "HL7 v2 result queue CLI")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue an HL7 message read from a file
    Enqueue {
        /// Path to the message file
        file: PathBuf,
        /// Id of the sending source
        #[arg(long, default_value_t = 1)]
        source_id: u32,
    },
    /// Process pending queue entries
    Process {
        /// Maximum number of entries to process
        #[arg(long, default_value_t = DEFAULT_PROCESS_LIMIT)]
        limit: usize,
        /// Process only this queue entry
        #[arg(long)]
        id: Option<String>,
    },
    /// List queue entries
    Queue,
    /// List captured processing errors
    Errors,
    /// List archived messages
    Archive,
    /// List observations for a concept code
    Observations {
        /// Concept code, e.g. 1558
        concept: String,
    },
}

fn service() -> Result<Hl7Service, Box<dyn std::error::Error>> {
    let cfg = CoreConfig::from_env_values(
        std::env::var("HL7_DATA_DIR").ok(),
        std::env::var("HL7_IGNORE_MISSING_NONLOCAL_PATIENTS").ok(),
        std::env::var("HL7_SOURCES").ok(),
    )?;
    Ok(Hl7Service::open(Arc::new(cfg))?)
}

fn describe(value: &ObsValue) -> String {
    match value {
        ObsValue::Coded(c) => match &c.text {
            Some(text) => format!("{} ({})", c.code, text),
            None => c.code.clone(),
        },
        ObsValue::Numeric(n) => n.to_string(),
        ObsValue::Text(t) => t.clone(),
        ObsValue::Date(d) => d.to_string(),
        ObsValue::DateTime(dt) => dt.to_string(),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("hl7vg=info".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Enqueue { file, source_id }) => {
            let raw = match std::fs::read_to_string(&file) {
                Ok(raw) => raw,
                Err(e) => {
                    eprintln!("Error reading {}: {}", file.display(), e);
                    return Ok(());
                }
            };
            if raw.trim().is_empty() {
                println!("{} is empty; nothing queued.", file.display());
                return Ok(());
            }
            match service()?.enqueue(&raw, source_id) {
                Ok(entry) => println!("Queued {} (key: {})", entry.id, entry.key()),
                Err(e) => eprintln!("Error queueing message: {}", e),
            }
        }
        Some(Commands::Process { limit, id }) => {
            let service = service()?;
            let result = match id {
                Some(id) => {
                    let id = RecordId::parse(&id)?;
                    service.process(&id).map(|done| vec![done])
                }
                None => service.process_pending(limit),
            };
            match result {
                Ok(done) if done.is_empty() => println!("No pending messages."),
                Ok(done) => {
                    for processed in done {
                        println!(
                            "{} (key: {}): {:?}",
                            processed.entry.id,
                            processed.entry.key(),
                            processed.disposition
                        );
                    }
                }
                Err(e) => eprintln!("Error processing queue: {}", e),
            }
        }
        Some(Commands::Queue) => match service()?.pending() {
            Ok(entries) if entries.is_empty() => println!("Queue is empty."),
            Ok(entries) => {
                for entry in entries {
                    println!(
                        "ID: {}, Key: {}, Source: {}, State: {:?}, Created: {}",
                        entry.id,
                        entry.key(),
                        entry.source,
                        entry.state,
                        entry.created_at
                    );
                }
            }
            Err(e) => eprintln!("Error listing queue: {}", e),
        },
        Some(Commands::Errors) => match service()?.errors() {
            Ok(errors) if errors.is_empty() => println!("No errors recorded."),
            Ok(errors) => {
                for error in errors {
                    println!("ID: {}, Failed: {}, {}", error.id, error.failed_at, error.error);
                    println!("  {}", error.error_details.replace('\n', "\n  "));
                }
            }
            Err(e) => eprintln!("Error listing errors: {}", e),
        },
        Some(Commands::Archive) => match service()?.archived() {
            Ok(entries) if entries.is_empty() => println!("Archive is empty."),
            Ok(entries) => {
                for entry in entries {
                    println!(
                        "ID: {}, Key: {}, Source: {}, Archived: {}",
                        entry.id,
                        entry.source_key.as_deref().unwrap_or("-"),
                        entry.source,
                        entry.archived_at
                    );
                }
            }
            Err(e) => eprintln!("Error listing archive: {}", e),
        },
        Some(Commands::Observations { concept }) => {
            match service()?.observations_by_concept(&concept) {
                Ok(observations) if observations.is_empty() => {
                    println!("No observations for concept {}.", concept)
                }
                Ok(observations) => {
                    for obs in observations {
                        let group = obs
                            .value_group_id
                            .map(|g| g.to_string())
                            .unwrap_or_else(|| "-".into());
                        println!(
                            "ID: {}, Person: {}, Value: {}, Observed: {}, Group: {}",
                            obs.id,
                            obs.person_id,
                            describe(&obs.value),
                            obs.observed_at,
                            group
                        );
                    }
                }
                Err(e) => eprintln!("Error listing observations: {}", e),
            }
        }
        None => {
            println!("Use 'hl7vg --help' for commands");
        }
    }

    Ok(())
}
