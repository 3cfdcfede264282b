use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

use whispry_core::{
    config::Config,
    domain::{ConnectionState, UserId},
    engine::{EngineSettings, SendOutcome, SyncEngine},
    message::Message,
};
use whispry_http::RestClient;
use whispry_stomp::{StompChannel, StompSettings};

const HELP: &str = "commands: /peer <id>, /reload, /quit; anything else is sent";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    whispry_core::logging::init("whispry")?;

    let cfg = Config::load()?;
    let rest = Arc::new(RestClient::new(&cfg)?);
    let session = rest
        .open_session(&cfg.token)
        .await
        .context("could not restore session from WHISPRY_TOKEN")?;
    info!(user = %session.user_id(), name = %session.identity.display_name, "signed in");

    let (channel, events) = StompChannel::new(StompSettings::from_config(&cfg));
    let engine = Arc::new(SyncEngine::new(
        EngineSettings::from_config(&cfg),
        rest.clone(),
        rest,
        Arc::new(channel),
        Some(session.clone()),
    ));
    engine.start().await?;

    let pump = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run_push_events(events).await })
    };
    let render = tokio::spawn(render_loop(engine.clone(), session.user_id().clone()));

    if let Some(peer) = cfg.initial_peer.as_deref() {
        engine.select_peer(Some(UserId::from(peer))).await;
    }

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line.split_once(' ').unwrap_or((line, "")) {
            ("/quit", _) => break,
            ("/reload", _) => engine.reload().await,
            ("/peer", id) if !id.trim().is_empty() => {
                engine.select_peer(Some(UserId::from(id.trim()))).await
            }
            ("/peer", _) => engine.select_peer(None).await,
            _ if line.starts_with('/') => println!("{HELP}"),
            _ => match engine.send(line).await {
                SendOutcome::Skipped if !line.is_empty() => {
                    println!("no conversation selected; use /peer <id>")
                }
                outcome => tracing::debug!(?outcome, "send finished"),
            },
        }
    }

    engine.shutdown().await?;
    render.abort();
    pump.abort();
    Ok(())
}

/// Print messages and notices as the engine publishes new revisions.
async fn render_loop(engine: Arc<SyncEngine>, me: UserId) {
    let mut changes = engine.subscribe_changes();
    let mut shown_epoch = None;
    let mut shown = 0usize;
    let mut link = ConnectionState::Disconnected;
    let mut stdout = tokio::io::stdout();

    while changes.changed().await.is_ok() {
        let thread = engine.snapshot().await;
        let mut out = String::new();

        let state = engine.connection_state();
        if state != link {
            link = state;
            out.push_str(&format!("* push {}\n", state.as_str()));
        }

        // Peer switches, reloads and session changes replace the thread.
        if shown_epoch != Some(thread.epoch) {
            shown_epoch = Some(thread.epoch);
            shown = 0;
            if let Some(p) = &thread.peer {
                out.push_str(&format!("--- conversation with {p} ---\n"));
            }
        }
        for msg in thread.messages.iter().skip(shown) {
            out.push_str(&render_line(msg, &me));
        }
        shown = thread.messages.len();

        for notice in engine.take_notices().await {
            out.push_str(&format!("! {}\n", notice.text));
        }

        if !out.is_empty() && stdout.write_all(out.as_bytes()).await.is_err() {
            break;
        }
        let _ = stdout.flush().await;
    }
}

fn render_line(msg: &Message, me: &UserId) -> String {
    let who = match &msg.sender_id {
        Some(id) if id == me => "me".to_string(),
        Some(id) => id.to_string(),
        None => "?".to_string(),
    };
    let when = msg.timestamp.as_deref().unwrap_or("");
    format!("[{when}] {who}: {}\n", msg.content)
}
