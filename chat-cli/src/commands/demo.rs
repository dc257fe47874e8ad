//! Scripted two-person chat against the in-memory backend.

use anyhow::{Context, Result};
use classroom_chat_client::{
    Bubble, ChatController, ChatError, GatewayError, MockBackend, StaticIdentity,
};
use classroom_chat_types::{ChannelId, MessageStatus, UserId};

use crate::config::CliConfig;

type DemoController = ChatController<MockBackend, MockBackend, StaticIdentity>;

const GREETING: &str = "Hi! Did everyone finish the reading?";

/// Run the demo command and return the transcript.
///
/// The classmate greets the channel, then every entry of `messages` is sent
/// as the configured user. With `fail_first`, the first send hits a
/// simulated outage and is rolled back.
pub async fn run(config: &CliConfig, messages: &[String], fail_first: bool) -> Result<Vec<String>> {
    let demo = &config.demo;
    let channel = ChannelId::new(demo.channel.clone());
    let user = UserId::new(demo.user.clone());
    let classmate = UserId::new(demo.classmate.clone());

    let backend = MockBackend::new();
    backend.register_profile(&user, &demo.user_email);
    backend.register_profile(&classmate, &demo.classmate_email);

    let me = controller(&backend, user, config);
    let them = controller(&backend, classmate, config);

    let mut transcript = Vec::new();

    them.activate(channel.clone())
        .await
        .context("Classmate could not join the channel")?;
    them.send(GREETING)
        .await
        .context("Classmate greeting failed")?;

    me.activate(channel.clone())
        .await
        .context("Failed to load channel history")?;
    transcript.push(format!("Joined {}", channel));

    for (i, text) in messages.iter().enumerate() {
        if fail_first && i == 0 {
            backend.fail_next_append(GatewayError::Network("simulated outage".into()));
        }

        let outgoing = match me.stage_send(text).await {
            Ok(outgoing) => outgoing,
            Err(ChatError::Validation(e)) => {
                transcript.push(format!("  skipped {:?}: {}", text, e));
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        transcript.push(format!("  pending: {}", outgoing.text));

        match me.deliver(outgoing).await {
            Ok(()) => transcript.push(format!("  sent: {}", text.trim())),
            Err(e) => {
                let restored = e.failed_text().unwrap_or_default().to_string();
                transcript.push(format!("  not sent ({}), text restored: {}", e, restored));
                me.dismiss_error().await;
            }
        }
    }

    // Feed-driven reloads run in the background; settle explicitly
    me.reload().await.context("Final reload failed")?;

    let bubbles = me.bubbles().await;
    transcript.push(format!("{} message(s) in {}:", bubbles.len(), channel));
    transcript.extend(bubbles.iter().map(render));

    them.deactivate().await;
    me.deactivate().await;
    tracing::debug!("Demo finished with {} rows stored", backend.rows(&channel).len());

    Ok(transcript)
}

fn controller(backend: &MockBackend, user: UserId, config: &CliConfig) -> DemoController {
    ChatController::new(
        backend.clone(),
        backend.clone(),
        StaticIdentity::signed_in(user),
        config.chat.clone(),
    )
}

fn render(bubble: &Bubble) -> String {
    let marker = match bubble.status {
        MessageStatus::Confirmed => "",
        MessageStatus::Pending => " (sending)",
        MessageStatus::Failed => " (failed)",
    };
    format!("  {}: {}{}", bubble.sender, bubble.content, marker)
}
