//! Line-based chat loop on stdin.
//!
//! Each line is one user turn.  `/image <path> [question]` describes an
//! image through the vision role first and chats about the description.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;
use companion_memory::{ConversationTurn, SummaryOutcome};
use companion_router::{ChatPayload, ProviderRole};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::app::App;

const DEFAULT_IMAGE_QUESTION: &str = "Describe this image in a few sentences.";

pub async fn run(app: &mut App) -> Result<()> {
    println!();
    println!("  companion v{}", env!("CARGO_PKG_VERSION"));
    println!("  Type a message, /image <path> to share a picture, or 'quit' to exit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await.context("failed to read input")? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == "quit" || trimmed == "exit" {
            info!("user requested exit");
            break;
        }

        let text = match trimmed.strip_prefix("/image") {
            Some(rest) => match describe_image(app, rest.trim()).await {
                Some(text) => text,
                None => continue,
            },
            None => trimmed.to_owned(),
        };

        handle_turn(app, &text).await?;
    }

    app.save_cooldowns().await;
    Ok(())
}

/// One full chat exchange: context, route, record, maybe summarize.
async fn handle_turn(app: &mut App, text: &str) -> Result<()> {
    if app
        .engine
        .buffer()
        .rotate_if_new_day(Local::now().date_naive())
        .await
        .is_some()
    {
        match app.engine.summarize_all().await {
            Ok(entries) => info!(entries, "previous day summarized into memory"),
            Err(e) => warn!(error = %e, "previous day kept for the next cycle"),
        }
    }

    let payload = app
        .context
        .build(app.engine.store(), app.engine.buffer(), text)
        .await
        .context("failed to assemble chat context")?;

    if let Err(e) = app.engine.record_turn(ConversationTurn::user(text)).await {
        warn!(error = %e, "failed to record user turn");
    }
    app.touch_user_activity().await;

    match app.router.route(ProviderRole::Chat, &payload).await {
        Ok(reply) => {
            println!("{}\n", reply.text);
            if let Err(e) = app.engine.record_turn(ConversationTurn::bot(&reply.text)).await {
                warn!(error = %e, "failed to record reply");
            }
        }
        Err(e) if e.is_exhaustion() => println!("{}\n", e.user_facing_reply()),
        Err(e) => return Err(e).context("chat request failed"),
    }

    report_summary(app.engine.maybe_summarize().await);
    app.save_cooldowns().await;
    Ok(())
}

/// Route an image through the vision role.  Returns the text to chat with,
/// or `None` after printing why the image could not be used.
async fn describe_image(app: &App, args: &str) -> Option<String> {
    let (path, question) = match args.split_once(char::is_whitespace) {
        Some((path, question)) => (path, question.trim()),
        None => (args, ""),
    };
    if path.is_empty() {
        println!("usage: /image <path> [question]\n");
        return None;
    }

    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) => {
            println!("could not read {path}: {e}\n");
            return None;
        }
    };

    let prompt = if question.is_empty() { DEFAULT_IMAGE_QUESTION } else { question };
    let payload = ChatPayload::prompt(prompt).with_image(mime_for(Path::new(path)), bytes);

    match app.router.route(ProviderRole::Vision, &payload).await {
        Ok(reply) => {
            let caption = if question.is_empty() { "" } else { question };
            Some(format!("[I'm sharing an image: {}] {caption}", reply.text.trim()).trim().to_owned())
        }
        Err(e) => {
            warn!(error = %e, "image description failed");
            println!("{}\n", e.user_facing_reply());
            None
        }
    }
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}

fn report_summary(result: companion_memory::Result<SummaryOutcome>) {
    match result {
        Ok(SummaryOutcome::Stored {
            entry,
            summarized_turns,
            remaining_turns,
        }) => info!(
            summarized_turns,
            remaining_turns,
            importance = entry.importance,
            "conversation summarized into memory"
        ),
        Ok(_) => {}
        Err(e) if e.is_summarize_failure() => {
            warn!(error = %e, "summary deferred to the next cycle")
        }
        Err(e) => warn!(error = %e, "summarization cycle failed"),
    }
}
