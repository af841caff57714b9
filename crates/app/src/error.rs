use std::path::PathBuf;

use amai_chat::{ChatError, SubmitRejected};
use amai_client::ClientError;
use snafu::Snafu;

use crate::settings::SettingsError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AppError {
    #[snafu(display("{source}"))]
    Settings {
        stage: &'static str,
        source: SettingsError,
    },
    #[snafu(display("backend call failed on `{stage}`: {source}"))]
    Backend {
        stage: &'static str,
        source: ClientError,
    },
    #[snafu(display("message not sent: {reason}"))]
    Rejected {
        stage: &'static str,
        reason: SubmitRejected,
    },
    #[snafu(display("cannot {action} while a response is streaming"))]
    Busy {
        stage: &'static str,
        action: &'static str,
    },
    #[snafu(display("failed to create download directory {path:?}: {source}"))]
    CreateDownloadDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to write download to {path:?}: {source}"))]
    WriteDownload {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("unknown command `{command}`, try /help"))]
    UnknownCommand { stage: &'static str, command: String },
    #[snafu(display("`{command}` needs {argument}"))]
    MissingArgument {
        stage: &'static str,
        command: &'static str,
        argument: &'static str,
    },
    #[snafu(display("{source}"))]
    InvalidDataSource {
        stage: &'static str,
        source: ChatError,
    },
    #[snafu(display("suggestion must be a number between 1 and {max}, got '{raw}'"))]
    InvalidSuggestion {
        stage: &'static str,
        raw: String,
        max: usize,
    },
    #[snafu(display("terminal io failed on `{stage}`: {source}"))]
    Terminal {
        stage: &'static str,
        source: std::io::Error,
    },
}
