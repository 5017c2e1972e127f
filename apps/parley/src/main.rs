mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use parley_client_core::api::FileUpload;
use parley_client_core::render;
use parley_client_core::telemetry::init_tracing;
use parley_client_core::{ChatClient, SessionPhase, SessionUpdate};
use parley_proto::{ConversationId, UserId};
use time::UtcOffset;
use tokio::io::{AsyncBufReadExt, BufReader};

use cli::{Cli, Input, HELP};

#[tokio::main]
async fn main() -> Result<()> {
    let (conversation, config, log_filter) = Cli::parse().into_config();
    init_tracing(&log_filter);

    let offset = config.display_offset;
    let mut client = ChatClient::from_config(&config)
        .await
        .context("failed to set up chat client")?;
    client.open(ConversationId::from(conversation)).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let Some(input) = Input::parse(&line) else { continue };
                if !handle_input(&mut client, input, offset).await {
                    break;
                }
            }
            event = client.next_event() => {
                if let Some(event) = event {
                    let update = client.apply(event).await;
                    report(&client, update, offset);
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.close().await;
    Ok(())
}

async fn handle_input(client: &mut ChatClient, input: Input, offset: UtcOffset) -> bool {
    match input {
        Input::Text(text) => {
            if let Err(err) = client.send_text(&text) {
                eprintln!("! message not sent: {err}");
            }
        }
        Input::Files(paths) => {
            let mut files = Vec::with_capacity(paths.len());
            for path in &paths {
                match FileUpload::from_path(path).await {
                    Ok(file) => files.push(file),
                    Err(err) => eprintln!("! {}: {err}", path.display()),
                }
            }
            if let Err(err) = client.send_files(files) {
                eprintln!("! upload not started: {err}");
            }
        }
        Input::More => {
            if !client.load_older() {
                let reason = if client.has_more_history() { "already loading" } else { "no older messages" };
                println!("-- {reason} --");
            }
        }
        Input::Search(query) => {
            let viewer = client.user_id().clone();
            let hits = client.search(&query);
            println!("-- {} match(es) for {query:?} --", hits.len());
            for message in hits {
                println!("[{}] {}", message.id, render::line(message, &viewer, offset));
            }
        }
        Input::Delete(id) => match client.delete_message(&id).await {
            Ok(()) => println!("-- deleted {id} --"),
            Err(err) => eprintln!("! delete failed: {err}"),
        },
        Input::Discard(id) => match client.discard_pending(&id).await {
            Ok(()) => println!("-- discarded {id} --"),
            Err(err) => eprintln!("! discard failed: {err}"),
        },
        Input::Help => println!("{HELP}"),
        Input::Quit => return false,
        Input::Unknown(command) => eprintln!("! unknown command {command}; /help lists commands"),
    }
    true
}

fn report(client: &ChatClient, update: SessionUpdate, offset: UtcOffset) {
    let viewer: &UserId = client.user_id();
    match update {
        SessionUpdate::HistoryMerged { admitted, has_more } => {
            if admitted > 0 {
                print_transcript(client, offset);
            }
            if !has_more {
                println!("-- start of conversation --");
            }
        }
        SessionUpdate::LiveMessage { id, .. } => {
            if let Some(message) = client.messages().iter().find(|m| m.id == id) {
                println!("{}", render::line(message, viewer, offset));
            }
        }
        SessionUpdate::DraftsSent(ids) => {
            for message in client.messages().iter().filter(|m| ids.contains(&m.id)) {
                println!("{}", render::line(message, viewer, offset));
            }
        }
        SessionUpdate::HistoryUnavailable(err) => eprintln!("! history unavailable: {err}"),
        SessionUpdate::SendFailed(err) => eprintln!("! send failed: {err}"),
        SessionUpdate::PhaseChanged(SessionPhase::Live) => eprintln!("-- connected --"),
        SessionUpdate::PhaseChanged(SessionPhase::Reconnecting) => eprintln!("-- reconnecting --"),
        SessionUpdate::PhaseChanged(SessionPhase::Closed) => eprintln!("-- channel closed by server --"),
        SessionUpdate::PhaseChanged(_) | SessionUpdate::Stale | SessionUpdate::Unchanged => {}
    }
}

fn print_transcript(client: &ChatClient, offset: UtcOffset) {
    let viewer = client.user_id();
    println!("---");
    for message in client.messages() {
        println!("{}", render::line(message, viewer, offset));
    }
}
