//! Interactive client for a dictd server
//!
//! Reads commands from stdin and sends each one as its own request

use clap::Parser;
use dictd::{Client, Response};
use std::io::{self, Write};

#[derive(Parser, Debug)]
#[command(author, version, about = "Interactive dictd client")]
struct Args {
    /// Server address
    #[arg(long, default_value = "127.0.0.1:27000")]
    addr: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let client = Client::new(args.addr);

    println!("Talking to dictd at {}", client.addr());
    println!("Type 'help' for available commands or 'quit' to exit.");

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();

        if input.is_empty() {
            continue;
        }

        match input {
            "quit" | "exit" => {
                println!("Goodbye!");
                break;
            }
            "help" => {
                print_help();
            }
            _ => {
                if let Err(e) = handle_command(&client, input).await {
                    println!("Error: {}", e);
                }
            }
        }
    }

    Ok(())
}

async fn handle_command(client: &Client, input: &str) -> Result<(), Box<dyn std::error::Error>> {
    let (command, rest) = input.split_once(' ').unwrap_or((input, ""));
    let rest = rest.trim();

    match command {
        "get" => {
            if rest.is_empty() {
                println!("Usage: get <key>");
                return Ok(());
            }
            print_values(&client.get(rest).await?);
        }
        "put" | "delete" | "del" => {
            let Some((key, value)) = rest.split_once(' ') else {
                println!("Usage: {} <key> <value>", command);
                return Ok(());
            };
            let values = if command == "put" {
                client.put(key, value.trim()).await?
            } else {
                client.delete(key, value.trim()).await?
            };
            print_values(&values);
        }
        "raw" => match client.send_line(rest).await? {
            Response::Found(values) => print_values(&values),
            Response::NotFound => print_values(&[]),
        },
        _ => {
            println!("Unknown command: {}. Type 'help' for available commands.", command);
        }
    }

    Ok(())
}

fn print_values(values: &[String]) {
    if values.is_empty() {
        println!("(not found)");
        return;
    }
    for (i, value) in values.iter().enumerate() {
        println!("{}) {}", i + 1, value);
    }
}

fn print_help() {
    println!("Available commands:");
    println!("  get <key>              - List the values of a key");
    println!("  put <key> <value>      - Add a value to a key");
    println!("  delete <key> <value>   - Remove a value from a key");
    println!("  raw <line>             - Send a request line verbatim");
    println!("  help                   - Show this help message");
    println!("  quit                   - Exit the client");
}
