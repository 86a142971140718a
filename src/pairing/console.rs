use std::io::{BufRead, Write};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Indicator, Operator};
use crate::protocol::registry::Role;

/// Terminal operator for stereo setup.
///
/// Stdin is read on its own thread so pending prompts can be dropped when the
/// wait window elapses or the operator hits Ctrl-C.
pub struct ConsoleOperator {
    lines: mpsc::Receiver<String>,
    preset_role: Option<Role>,
}

impl ConsoleOperator {
    /// `preset_role` skips the role prompt.
    pub fn spawn(preset_role: Option<Role>) -> Self {
        let (tx, rx) = mpsc::channel(8);
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        });
        Self {
            lines: rx,
            preset_role,
        }
    }

    async fn prompt(&mut self, text: &str) -> Option<String> {
        print!("{}", text);
        let _ = std::io::stdout().flush();
        self.lines.recv().await.map(|line| line.trim().to_lowercase())
    }
}

#[async_trait]
impl Operator for ConsoleOperator {
    async fn confirm_start(&mut self) -> Option<bool> {
        println!("=== Stereo Setup ===");
        println!("This will put the connected speaker into pairing/discovery mode.");
        let answer = self.prompt("Continue? [y/N]: ").await?;
        Some(parse_yes(&answer))
    }

    async fn show_instructions(&mut self, window: Duration) {
        println!();
        println!("The connected speaker is now in discovery mode (fast blinking).");
        println!();
        println!("On the second speaker:");
        println!("  1. Turn it on");
        println!("  2. Press the Bluetooth button twice");
        println!("  3. Wait for it to start blinking fast");
        println!("  4. Wait for both speakers to stop blinking");
        println!();
        println!(
            "Press Enter once the lights stop blinking (continuing automatically in {}s).",
            window.as_secs()
        );
    }

    async fn wait_settled(&mut self) -> Option<()> {
        self.lines.recv().await.map(|_| ())
    }

    async fn report_indicator(&mut self) -> Option<Indicator> {
        loop {
            let answer = self
                .prompt("Did both lights go solid (s) or turn off (o)? [s/o]: ")
                .await?;
            match parse_indicator(&answer) {
                Some(indicator) => return Some(indicator),
                None => println!("Please answer 's' for solid or 'o' for off."),
            }
        }
    }

    async fn choose_role(&mut self) -> Option<Role> {
        if let Some(role) = self.preset_role {
            return Some(role);
        }
        loop {
            let answer = self
                .prompt("Which channel should the connected speaker play? [L/r]: ")
                .await?;
            match parse_role(&answer) {
                Some(role) => return Some(role),
                None => println!("Please answer 'l' or 'r'."),
            }
        }
    }

    async fn offer_retry(&mut self, attempts: u32) -> Option<bool> {
        println!();
        println!(
            "Pairing timed out (attempt {}). Several attempts are often needed.",
            attempts
        );
        let answer = self.prompt("Try again? [y/N]: ").await?;
        Some(parse_yes(&answer))
    }
}

fn parse_yes(answer: &str) -> bool {
    matches!(answer, "y" | "yes")
}

fn parse_indicator(answer: &str) -> Option<Indicator> {
    match answer {
        "s" | "solid" | "y" | "yes" => Some(Indicator::Solid),
        "o" | "off" | "n" | "no" => Some(Indicator::Off),
        _ => None,
    }
}

/// Empty input picks the default, LEFT.
fn parse_role(answer: &str) -> Option<Role> {
    match answer {
        "" | "l" | "left" => Some(Role::Left),
        "r" | "right" => Some(Role::Right),
        _ => None,
    }
}
