//! Interactive console for the LasGo text protocol.

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use sara_client::{ConnectionConfig, LasgoTextClient};

const HELP_TEXT: &str = r#"
Console commands:
  help                 Show this help
  quit, exit           Leave the console

Anything else is sent to the stage verbatim, for example:
  QV                   Server version
  GP                   Current position
  MV <x> <y>           Move and wait
  BM <x> <y>           Queue a move
  ST                   Status line
  AB                   Abort the current move
"#;

pub async fn run(
    address: &str,
    config: ConnectionConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "LasGo text console".bold().cyan());
    println!("Connecting to {}...", address);

    let mut lasgo = LasgoTextClient::connect(address, config).await?;
    println!("{}", "Connected!".green());

    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;

    let history_path = std::env::var("HOME")
        .map(|h| std::path::PathBuf::from(h).join(".sara_history"))
        .unwrap_or_else(|_| ".sara_history".into());
    let _ = rl.load_history(&history_path);

    println!("Type 'help' for available commands.\n");

    loop {
        let prompt = format!("{} ", "lasgo>".cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                match console_command(line) {
                    ConsoleAction::Skip => continue,
                    ConsoleAction::Help => println!("{}", HELP_TEXT),
                    ConsoleAction::Quit => break,
                    ConsoleAction::Send(command) => match lasgo.send(command).await {
                        Ok(reply) => println!("{}\n", reply),
                        Err(e) => {
                            println!("{}: {}\n", "Error".red(), e);
                            if !lasgo.is_usable() {
                                println!("{}", "Session lost, leaving console.".red());
                                break;
                            }
                        }
                    },
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);

    let _ = lasgo.close().await;
    println!("{}", "Disconnected.".dimmed());

    Ok(())
}

#[derive(Debug, PartialEq)]
enum ConsoleAction<'a> {
    Skip,
    Help,
    Quit,
    Send(&'a str),
}

fn console_command(line: &str) -> ConsoleAction<'_> {
    match line.to_lowercase().as_str() {
        "" => ConsoleAction::Skip,
        "help" | "?" => ConsoleAction::Help,
        "quit" | "exit" | "q" => ConsoleAction::Quit,
        _ => ConsoleAction::Send(line),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_command() {
        assert_eq!(console_command(""), ConsoleAction::Skip);
        assert_eq!(console_command("HELP"), ConsoleAction::Help);
        assert_eq!(console_command("exit"), ConsoleAction::Quit);
        assert_eq!(console_command("MV 1.0 2.0"), ConsoleAction::Send("MV 1.0 2.0"));
    }
}
