//! Terminal chat against the relay.
//!
//! Usage: chess-chat <fen> [model]
//! Reads one question per line from stdin. Ctrl-C cancels the answer in
//! progress; an empty line or EOF exits.

use std::io::Write;

use chat_client::{ChatClient, ChatSession, TurnOutcome};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

const DEFAULT_MODEL: &str = "claude-sonnet";

fn print_suffix(text: &str, printed: &mut usize) {
    if text.len() < *printed {
        *printed = 0;
    }
    if let Some(suffix) = text.get(*printed..) {
        print!("{suffix}");
        let _ = std::io::stdout().flush();
        *printed = text.len();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(fen) = args.get(1).cloned() else {
        anyhow::bail!("usage: chess-chat <fen> [model]");
    };
    let model = args.get(2).cloned().unwrap_or_else(|| DEFAULT_MODEL.to_string());
    let server_url =
        std::env::var("CHAT_SERVER_URL").unwrap_or_else(|_| "http://localhost:8000".to_string());

    let mut session = ChatSession::new(ChatClient::new(&server_url)?);
    let cancel = session.cancel_handle();
    let mut reply = session.subscribe();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(question) = lines.next_line().await? else {
            break;
        };
        if question.trim().is_empty() {
            break;
        }

        let _ = reply.borrow_and_update();
        let mut printed = 0;

        let outcome = {
            let turn = session.send(&question, &fen, &model);
            tokio::pin!(turn);
            loop {
                tokio::select! {
                    outcome = &mut turn => break outcome,
                    changed = reply.changed() => {
                        if changed.is_ok() {
                            let text = reply.borrow_and_update().clone();
                            print_suffix(&text, &mut printed);
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        cancel.cancel();
                    }
                }
            }
        };

        let text = reply.borrow_and_update().clone();
        print_suffix(&text, &mut printed);

        match outcome {
            TurnOutcome::Completed => println!(),
            TurnOutcome::Cancelled => println!(" [cancelled]"),
            TurnOutcome::Failed(reason) => {
                tracing::debug!(%reason, "Turn failed");
                if let Some(last) = session.messages().last() {
                    println!("\n{}", last.content);
                }
            }
        }
    }

    Ok(())
}
