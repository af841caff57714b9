use std::io::Write;
use std::sync::Arc;

use amai_chat::{Applied, ChatState, DataSource, PollApplied, StreamOutcome, ToggleAction};
use snafu::{OptionExt, ResultExt, ensure};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::controller::{ChatController, Update, connect_backend};
use crate::error::{
    AppResult, BusySnafu, InvalidDataSourceSnafu, InvalidSuggestionSnafu,
    MissingArgumentSnafu, SettingsSnafu, TerminalSnafu, UnknownCommandSnafu,
};
use crate::poller::PollOutcome;
use crate::render::{self, PROMPT_SUGGESTIONS};
use crate::settings::{ClientSettings, SettingsStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    Connect(DataSource),
    Integrations,
    History,
    Clear,
    Download { chat_id: String, channel: String },
    /// One-based index into the prompt suggestions.
    Suggest(usize),
    Host(String),
    Help,
    Quit,
}

impl Command {
    /// Parses one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> AppResult<Option<Self>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Some(Self::Send(line.to_string())));
        };

        let mut words = rest.split_whitespace();
        let name = words.next().unwrap_or_default();
        let command = match name {
            "connect" => {
                let raw = words.next().context(MissingArgumentSnafu {
                    stage: "parse-command",
                    command: "/connect",
                    argument: "a data source (WEBSITE, SHOPIFY or CRMS)",
                })?;
                let source = DataSource::parse(raw).context(InvalidDataSourceSnafu {
                    stage: "parse-command",
                })?;
                Self::Connect(source)
            }
            "integrations" => Self::Integrations,
            "history" => Self::History,
            "clear" => Self::Clear,
            "download" => {
                let (Some(chat_id), Some(channel)) = (words.next(), words.next()) else {
                    return MissingArgumentSnafu {
                        stage: "parse-command",
                        command: "/download",
                        argument: "a chat id and a channel",
                    }
                    .fail();
                };
                Self::Download {
                    chat_id: chat_id.to_string(),
                    channel: channel.to_string(),
                }
            }
            "suggest" => {
                let raw = words.next().context(MissingArgumentSnafu {
                    stage: "parse-command",
                    command: "/suggest",
                    argument: "a suggestion number",
                })?;
                let index = raw
                    .parse::<usize>()
                    .ok()
                    .filter(|index| (1..=PROMPT_SUGGESTIONS.len()).contains(index));
                let Some(index) = index else {
                    return InvalidSuggestionSnafu {
                        stage: "parse-command",
                        raw,
                        max: PROMPT_SUGGESTIONS.len(),
                    }
                    .fail();
                };
                Self::Suggest(index)
            }
            "host" => {
                let url = words.next().context(MissingArgumentSnafu {
                    stage: "parse-command",
                    command: "/host",
                    argument: "a backend url",
                })?;
                Self::Host(url.to_string())
            }
            "help" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => {
                return UnknownCommandSnafu {
                    stage: "parse-command",
                    command: format!("/{other}"),
                }
                .fail();
            }
        };
        Ok(Some(command))
    }
}

const CHANNELS_PENDING: &str = "Channel messages are not ready yet; check /history later.";

/// Turns controller updates into terminal text.
#[derive(Debug, Default)]
pub struct StreamPrinter {
    response_started: bool,
}

impl StreamPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text to print for `update`, written as-is (no newline appended).
    pub fn render(&mut self, update: &Update, state: &ChatState) -> String {
        match update {
            Update::Applied(Applied::ResponseChunk(chunk)) => {
                if self.response_started {
                    chunk.clone()
                } else {
                    self.response_started = true;
                    format!("Assistant: {chunk}")
                }
            }
            Update::Applied(Applied::Status(status) | Applied::ServerError(status)) => {
                self.line(render::status_line(status))
            }
            Update::Applied(Applied::SourcesReplaced(count)) => {
                self.line(format!("  (retrieved {count} records)"))
            }
            Update::Applied(Applied::GeneratingChannelMessages) => {
                self.line(render::GENERATING_CHANNELS.to_string())
            }
            Update::Applied(Applied::ChannelMessages(messages)) => {
                self.lines(render::channel_messages(messages, false))
            }
            Update::Applied(Applied::PollChannelMessages(request)) => self.line(format!(
                "  (waiting for channel messages: {})",
                request.channels.join(", ")
            )),
            Update::Applied(Applied::Finished(outcome)) => {
                let text = self.finished(outcome);
                self.response_started = false;
                text
            }
            Update::Applied(Applied::Ignored(_) | Applied::Suppressed) => String::new(),
            Update::TransportFailed { reason } => {
                let text = self.line(format!("Connection lost: {reason}"));
                self.response_started = false;
                text
            }
            Update::ChannelMessagesResolved(PollApplied::History) => state
                .history()
                .latest()
                .and_then(|entry| entry.channel_messages.as_deref())
                .map(|messages| self.lines(render::channel_messages(messages, false)))
                .unwrap_or_default(),
            Update::ChannelMessagesResolved(_) => String::new(),
            Update::ChannelMessagesUnavailable(PollOutcome::Exhausted { .. }) => {
                self.line(CHANNELS_PENDING.to_string())
            }
            // A newer request or shutdown took over.
            Update::ChannelMessagesUnavailable(_) => String::new(),
        }
    }

    fn finished(&mut self, outcome: &StreamOutcome) -> String {
        match outcome {
            StreamOutcome::Completed(message) => {
                let mut lines = Vec::new();
                if let Some(records) = &message.sources {
                    lines.extend(render::sources(records));
                }
                if let Some(channels) = &message.channel_messages {
                    lines.extend(render::channel_messages(channels, false));
                }
                lines.push(format!("  (id: {})", message.id));
                self.lines(lines)
            }
            StreamOutcome::Empty => self.line("(no response)".to_string()),
            StreamOutcome::ErrorRetained(retained) => {
                self.line(render::error_banner(&retained.statuses))
            }
            StreamOutcome::ErrorDiscarded => self.line(String::new()),
        }
    }

    /// Starts on a fresh line if a response is mid-line.
    fn line(&self, text: String) -> String {
        if self.response_started {
            format!("\n{text}\n")
        } else {
            format!("{text}\n")
        }
    }

    fn lines(&self, lines: Vec<String>) -> String {
        if lines.is_empty() {
            return String::new();
        }
        self.line(lines.join("\n"))
    }
}

enum Flow {
    Continue,
    Quit,
}

pub struct Repl {
    controller: ChatController,
    settings: Arc<SettingsStore>,
    printer: StreamPrinter,
}

impl Repl {
    pub fn new(controller: ChatController, settings: Arc<SettingsStore>) -> Self {
        Self {
            controller,
            settings,
            printer: StreamPrinter::new(),
        }
    }

    pub async fn run(mut self) -> AppResult<()> {
        let summary = self.controller.load().await;
        if summary.integrations.is_none() || summary.history.is_none() {
            print_text("Could not reach the backend; some data may be missing.\n")?;
        }
        print_text(&format!(
            "{}\n\n",
            render::conversation(self.controller.state())
        ))?;

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line.context(TerminalSnafu { stage: "read-input" })? else {
                        break;
                    };
                    match self.dispatch(&line).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Quit) => break,
                        Err(error) => print_text(&format!("error: {error}\n"))?,
                    }
                }
                Some(event) = self.controller.next_event() => {
                    if let Some(update) = self.controller.handle(event) {
                        let text = self.printer.render(&update, self.controller.state());
                        print_text(&text)?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn dispatch(&mut self, line: &str) -> AppResult<Flow> {
        let Some(command) = Command::parse(line)? else {
            return Ok(Flow::Continue);
        };

        match command {
            Command::Send(text) => self.send(&text)?,
            Command::Suggest(index) => self.send(PROMPT_SUGGESTIONS[index - 1])?,
            Command::Connect(source) => {
                let text = match self.controller.toggle_integration(source).await {
                    None => format!("{} is already being updated\n", source.label()),
                    Some(outcome) => {
                        let verb = match outcome.action {
                            ToggleAction::Connect(_) => "connect",
                            ToggleAction::Disconnect(_) => "disconnect",
                        };
                        match outcome.error {
                            Some(error) => {
                                format!("Failed to {verb} {}: {error}\n", source.label())
                            }
                            None => format!(
                                "{}\n",
                                render::integrations(self.controller.integrations())
                            ),
                        }
                    }
                };
                print_text(&text)?;
            }
            Command::Integrations => print_text(&format!(
                "{}\n",
                render::integrations(self.controller.integrations())
            ))?,
            Command::History => print_text(&format!(
                "{}\n",
                render::conversation(self.controller.state())
            ))?,
            Command::Clear => {
                self.controller.clear_history().await?;
                print_text("Conversation cleared.\n")?;
            }
            Command::Download { chat_id, channel } => {
                let path = self.controller.download(&chat_id, &channel).await?;
                print_text(&format!("Saved {}\n", path.display()))?;
            }
            Command::Host(host) => self.change_host(&host)?,
            Command::Help => print_text(&format!("{}\n", render::HELP))?,
            Command::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    fn send(&mut self, text: &str) -> AppResult<()> {
        let ticket = self.controller.submit(text)?;
        self.printer = StreamPrinter::new();
        print_text(&format!("You: {}\n", ticket.message))
    }

    fn change_host(&mut self, host: &str) -> AppResult<()> {
        ensure!(
            !self.controller.state().is_streaming(),
            BusySnafu {
                stage: "change-host",
                action: "change the backend host",
            }
        );
        let backend = connect_backend(host)?;
        let updated = ClientSettings {
            backend_host: backend.host().to_string(),
            ..(*self.settings.settings()).clone()
        };

        self.controller.set_backend(Arc::new(backend))?;
        self.settings
            .update(updated)
            .context(SettingsSnafu { stage: "change-host" })?;
        print_text(&format!("Backend host set to {}\n", self.settings.settings().backend_host))
    }
}

fn print_text(text: &str) -> AppResult<()> {
    if text.is_empty() {
        return Ok(());
    }
    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(text.as_bytes())
        .and_then(|()| stdout.flush())
        .context(TerminalSnafu {
            stage: "write-output",
        })
}
