use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use titanium_queue::config::DEFAULT_CONFIG_FILE;
use titanium_queue::{PersistentQueue, QueueConfig, StringCodec};

const DEFAULT_STORE_PATH: &str = "./data/queue.log";

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let config = QueueConfig::load(Path::new(DEFAULT_CONFIG_FILE))?;
    let store = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH));
    if let Some(parent) = store.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    let queue: PersistentQueue<String, StringCodec> =
        PersistentQueue::with_codec(&store, config, StringCodec)
            .with_context(|| format!("opening {}", store.display()))?;

    println!("Welcome to Titanium Queue! ({} queued)", queue.size());
    println!("Commands: PUSH <value> | POP | PEEK | SIZE | LIST | CLEAR | COMPACT | EXIT");

    let mut input = String::new();
    loop {
        print!("> ");
        io::stdout().flush()?;
        input.clear();

        if io::stdin().read_line(&mut input)? == 0 {
            break; // EOF
        }
        let trimmed = input.trim();
        if trimmed.is_empty() {
            continue;
        }

        let (command, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((command, rest)) => (command.to_uppercase(), rest.trim()),
            None => (trimmed.to_uppercase(), ""),
        };

        match command.as_str() {
            "PUSH" => {
                if rest.is_empty() {
                    println!("Usage: PUSH <value>");
                    continue;
                }
                match queue.add(rest.to_string()) {
                    Ok(()) => println!("OK"),
                    Err(e) => eprintln!("Error: {}", e),
                }
            }
            "POP" => match queue.poll() {
                Ok(Some(value)) => println!("{}", value),
                Ok(None) => println!("(empty)"),
                Err(e) => eprintln!("Error: {}", e),
            },
            "PEEK" => match queue.peek() {
                Some(value) => println!("{}", value),
                None => println!("(empty)"),
            },
            "SIZE" => println!("{}", queue.size()),
            "LIST" => {
                for (i, value) in queue.iter().enumerate() {
                    println!("{}) {}", i + 1, value);
                }
            }
            "CLEAR" => match queue.clear() {
                Ok(()) => println!("OK"),
                Err(e) => eprintln!("Error: {}", e),
            },
            "COMPACT" => match queue.compact() {
                Ok(()) => println!("OK"),
                Err(e) => eprintln!("Error: {}", e),
            },
            "EXIT" => break,
            _ => println!("Unknown command: {}", command),
        }
    }
    Ok(())
}
