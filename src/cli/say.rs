//! Non-interactive "say" command

use std::error::Error;
use std::io::{self, Write};

use crate::core::conversation::{ConversationController, ConversationUpdate, TurnOutcome};

pub async fn run_say(
    mut controller: ConversationController,
    prompt: String,
) -> Result<(), Box<dyn Error>> {
    controller.submit(&prompt)?;

    let mut stdout = io::stdout();
    while let Some(update) = controller.next_update().await {
        match update {
            ConversationUpdate::Delta(text) => {
                write!(stdout, "{text}")?;
                stdout.flush()?;
            }
            ConversationUpdate::Settled(TurnOutcome::Completed) => {
                writeln!(stdout)?;
                break;
            }
            ConversationUpdate::Settled(TurnOutcome::Failed(reason)) => {
                writeln!(stdout)?;
                return Err(reason.into());
            }
        }
    }
    Ok(())
}
