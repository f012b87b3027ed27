//! Line-oriented interactive chat

use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::cli::model_list::render_model_list;
use crate::core::conversation::{ConversationController, ConversationUpdate, TurnOutcome};
use crate::utils::logging::LoggingState;

#[derive(Debug, PartialEq, Eq)]
enum ChatInput<'a> {
    Empty,
    Message(&'a str),
    Retry,
    Reset,
    Model(&'a str),
    Models,
    Quit,
    Unknown(&'a str),
}

fn parse_input(line: &str) -> ChatInput<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ChatInput::Empty;
    }
    let Some(command) = trimmed.strip_prefix('/') else {
        return ChatInput::Message(line.trim_end_matches(['\r', '\n']));
    };

    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map(|(name, rest)| (name, rest.trim()))
        .unwrap_or((command, ""));
    match name {
        "retry" => ChatInput::Retry,
        "reset" | "clear" => ChatInput::Reset,
        "model" if !rest.is_empty() => ChatInput::Model(rest),
        "model" | "models" => ChatInput::Models,
        "quit" | "exit" => ChatInput::Quit,
        _ => ChatInput::Unknown(name),
    }
}

enum Step {
    Update(Option<ConversationUpdate>),
    Interrupted,
}

pub async fn run_chat(
    mut controller: ConversationController,
    log: Option<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    let logging = LoggingState::new(log)?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("💬 polychat · {}", controller.model());
    println!("Type a message, /retry, /reset, /model <id>, /models or /quit.");
    if logging.is_active() {
        println!("Logging: {}", logging.status_string());
    }

    loop {
        print!("\n> ");
        io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = tokio::signal::ctrl_c() => Ok(None),
        }?;
        let Some(line) = line else {
            println!();
            break;
        };

        match parse_input(&line) {
            ChatInput::Empty => {}
            ChatInput::Quit => break,
            ChatInput::Models => {
                let listing = render_model_list(controller.catalog(), Some(controller.model()));
                print!("{listing}");
            }
            ChatInput::Model(id) => match controller.select_model(id) {
                Ok(()) => println!("Model set to {id}"),
                Err(err) => eprintln!("⚠️  {err}"),
            },
            ChatInput::Reset => {
                reset_conversation(&mut controller, &logging)?;
                println!("Started a new conversation.");
            }
            ChatInput::Retry => match controller.regenerate() {
                Ok(_) => {
                    logging.rewrite(controller.transcript())?;
                    stream_reply(&mut controller, &logging).await?;
                }
                Err(err) => eprintln!("⚠️  {err}"),
            },
            ChatInput::Message(text) => match controller.submit(text) {
                Ok(_) => {
                    if let Some(user) = controller.transcript().iter().rev().nth(1) {
                        logging.log_message(user)?;
                    }
                    stream_reply(&mut controller, &logging).await?;
                }
                Err(err) => eprintln!("⚠️  {err}"),
            },
            ChatInput::Unknown(name) => eprintln!("⚠️  Unknown command: /{name}"),
        }
    }

    Ok(())
}

/// Earlier turns stay in the log; only a boundary note is appended.
fn reset_conversation(
    controller: &mut ConversationController,
    logging: &LoggingState,
) -> io::Result<()> {
    controller.reset();
    logging.log_note("New conversation")
}

/// Print deltas until the active turn settles. Ctrl+C cancels the turn.
async fn stream_reply(
    controller: &mut ConversationController,
    logging: &LoggingState,
) -> Result<(), Box<dyn Error>> {
    let mut stdout = io::stdout();
    writeln!(stdout)?;

    loop {
        let step = tokio::select! {
            update = controller.next_update() => Step::Update(update),
            _ = tokio::signal::ctrl_c() => Step::Interrupted,
        };

        match step {
            Step::Update(Some(ConversationUpdate::Delta(text))) => {
                write!(stdout, "{text}")?;
                stdout.flush()?;
            }
            Step::Update(Some(ConversationUpdate::Settled(outcome))) => {
                writeln!(stdout)?;
                if let TurnOutcome::Failed(reason) = outcome {
                    eprintln!("❌ {reason}");
                    eprintln!("   Partial reply kept; /retry to try again.");
                }
                break;
            }
            Step::Update(None) => break,
            Step::Interrupted => {
                controller.cancel();
                writeln!(stdout, "\n[stopped]")?;
                break;
            }
        }
    }

    if let Some(reply) = controller.transcript().last() {
        logging.log_message(reply)?;
    }
    Ok(())
}
