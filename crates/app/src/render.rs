//! Plain-text rendering of chat state for the terminal.

use amai_chat::{
    ChannelMessage, ChatMessage, ChatState, IntegrationRegistry, RetainedError, SourceRecord,
    StatusEvent, StatusKind, StreamSession,
};

pub const WELCOME_TITLE: &str = "Welcome to Adaptive Marketing AI";
pub const WELCOME_TAGLINE: &str = "Your intelligent marketing companion that connects to multiple platforms, generates campaign queries, and answers questions across channels with AI-powered insights.";
pub const ERROR_BANNER: &str =
    "I apologize, but I encountered an issue while processing your request.";
pub const ERROR_FALLBACK: &str =
    "An unexpected error occurred. Please try again or rephrase your question.";
pub const GENERATING_CHANNELS: &str = "Generating messages for marketing channels...";

/// Rows shown before the source list is collapsed.
pub const SOURCE_PREVIEW_LIMIT: usize = 5;

pub const PROMPT_SUGGESTIONS: [&str; 6] = [
    "Create a campaign for customers who added an item to their cart but didn't buy in the last 7 days",
    "Make a 7-day re-engagement campaign for abandoned carts",
    "Generate a welcome email series for new subscribers",
    "Create a personalized product recommendation campaign",
    "Design a win-back campaign for inactive customers",
    "Build a seasonal promotion campaign for high-value customers",
];

pub const HELP: &str = "\
Commands:
  /connect <WEBSITE|SHOPIFY|CRMS>   connect or disconnect a data source
  /integrations                     list connected data sources
  /history                          print the conversation
  /clear                            clear the conversation
  /download <chat-id> <channel>     save generated channel messages
  /suggest <n>                      send campaign suggestion n
  /host <url>                       change the backend host
  /help                             show this help
  /quit                             exit
Anything else is sent as a chat message.";

/// Seconds with one decimal, e.g. `1.5s`.
pub fn format_duration(millis: i64) -> String {
    format!("{:.1}s", millis as f64 / 1000.0)
}

fn plural(count: u64, singular: &str, plural: &str) -> String {
    if count == 1 {
        format!("{count} {singular}")
    } else {
        format!("{count} {plural}")
    }
}

pub fn welcome() -> String {
    let mut lines = vec![
        WELCOME_TITLE.to_string(),
        WELCOME_TAGLINE.to_string(),
        String::new(),
        "Campaign Suggestions".to_string(),
    ];
    lines.extend(
        PROMPT_SUGGESTIONS
            .iter()
            .enumerate()
            .map(|(index, suggestion)| format!("  {}. {suggestion}", index + 1)),
    );
    lines.push(String::new());
    lines.push("Type /suggest <n> to use one, or /help for commands.".to_string());
    lines.join("\n")
}

pub fn status_line(status: &StatusEvent) -> String {
    let timing = status
        .time_taken_ms
        .map(|millis| format!(" ({})", format_duration(millis)))
        .unwrap_or_default();
    match status.kind {
        StatusKind::Status => format!("  * {}{timing}", status.content),
        StatusKind::Thinking => format!("  ~ {}{timing}", status.content),
        StatusKind::Error => {
            let detail = if status.content.trim().is_empty() {
                ERROR_FALLBACK
            } else {
                status.content.as_str()
            };
            format!("  ! {ERROR_BANNER}\n    {detail}{timing}")
        }
    }
}

/// Error lines of a failed exchange, without the user's message.
pub fn error_banner(statuses: &[StatusEvent]) -> String {
    statuses
        .iter()
        .filter(|status| status.is_error())
        .map(status_line)
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn retained_error(retained: &RetainedError) -> String {
    format!(
        "You: {}\n{}",
        retained.sent_message,
        error_banner(&retained.statuses)
    )
}

/// Snapshot of an in-flight exchange.
pub fn active_session(session: &StreamSession) -> String {
    let mut lines = vec![format!("You: {}", session.sent_message())];
    lines.extend(session.statuses().iter().map(status_line));
    if !session.response().is_empty() {
        lines.push(format!("Assistant: {}", session.response()));
    }
    lines.extend(sources(session.sources()));
    lines.extend(channel_messages(
        session.channel_messages().unwrap_or_default(),
        session.is_generating_channel_messages(),
    ));
    lines.join("\n")
}

pub fn sources(records: &[SourceRecord]) -> Vec<String> {
    if records.is_empty() {
        return Vec::new();
    }

    let count = records.len() as u64;
    let mut lines = vec![format!(
        "Data Sources ({})",
        plural(count, "record", "records")
    )];
    for (index, record) in records.iter().take(SOURCE_PREVIEW_LIMIT).enumerate() {
        let mut row = format!("  {}. ", index + 1);
        let name = record.display_name();
        row.push_str(if name.is_empty() { "(unnamed)" } else { name.as_str() });
        if let Some(source) = record.data_source() {
            row.push_str(&format!(" [{source}]"));
        }
        if let Some(email) = record.email() {
            row.push_str(&format!(" {email}"));
        }
        if let Some(phone) = record.phone() {
            row.push_str(&format!(" {phone}"));
        }
        lines.push(row);
    }
    if records.len() > SOURCE_PREVIEW_LIMIT {
        lines.push(format!(
            "  ... and {} more",
            records.len() - SOURCE_PREVIEW_LIMIT
        ));
    }
    lines
}

/// Known channels only; unknown names from the server are skipped.
pub fn channel_messages(messages: &[ChannelMessage], generating: bool) -> Vec<String> {
    let mut lines = Vec::new();
    if generating {
        lines.push(GENERATING_CHANNELS.to_string());
    }

    let rows = messages
        .iter()
        .filter_map(|message| {
            let name = message.kind().display_name()?;
            let summary = if message.total == 0 {
                "Available".to_string()
            } else {
                plural(message.total, "message", "messages")
            };
            Some(format!("  {name}: {summary}"))
        })
        .collect::<Vec<_>>();
    if !rows.is_empty() {
        lines.push("Channel Messages".to_string());
        lines.extend(rows);
    }
    lines
}

pub fn exchange(message: &ChatMessage) -> String {
    let mut lines = vec![
        format!("You: {}", message.message),
        format!("Assistant: {}", message.response),
    ];
    if let Some(records) = &message.sources {
        lines.extend(sources(records));
    }
    if let Some(channels) = &message.channel_messages {
        let rendered = channel_messages(channels, false);
        if !rendered.is_empty() {
            lines.extend(rendered);
            lines.push(format!("  (id: {})", message.id));
        }
    }
    lines.join("\n")
}

/// History followed by a retained error banner or the in-flight exchange.
pub fn conversation(state: &ChatState) -> String {
    let mut blocks = state
        .history()
        .messages()
        .iter()
        .map(exchange)
        .collect::<Vec<_>>();
    if let Some(retained) = state.retained_error() {
        blocks.push(retained_error(retained));
    }
    if let Some(session) = state.session() {
        blocks.push(active_session(session));
    }

    if blocks.is_empty() {
        return welcome();
    }
    blocks.join("\n\n")
}

pub fn integrations(registry: &IntegrationRegistry) -> String {
    let count = registry.len() as u64;
    if count == 0 {
        return "No data sources connected. Use /connect WEBSITE|SHOPIFY|CRMS.".to_string();
    }

    let mut lines = vec![format!(
        "{} connected",
        plural(count, "source", "sources")
    )];
    lines.extend(registry.connected().map(|integration| {
        format!(
            "  {} ({}) since {}",
            integration.data_source.label(),
            integration.data_source,
            integration.created_at.format("%Y-%m-%d %H:%M")
        )
    }));
    lines.join("\n")
}
