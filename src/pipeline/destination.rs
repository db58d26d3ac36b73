//! Where a finished response goes, and how it is rendered for that place.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lines beyond which a response is shown in the browser.
pub const BROWSER_LINE_THRESHOLD: usize = 60;

/// Target surface for a response.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Destination {
    Above,
    Below,
    Clipboard,
    Snip,
    Context,
    NewContext,
    AppendClipboard,
    Browser,
    TextToSpeech,
    Chain,
    Paste,
    Thread,
    NewThread,
    #[default]
    Default,
}

/// Text prepared for a destination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponsePresentation {
    pub display_text: String,
    pub paste_text: String,
    pub browser_lines: Vec<String>,
    pub open_browser: bool,
}

/// Render `text` for `destination`.
///
/// Only `open_browser` depends on the destination: the browser opens for
/// the browser destination or when the text has more than
/// [`BROWSER_LINE_THRESHOLD`] lines. The text fields are the same for every
/// destination; acting on them is left to the presentation surface.
pub fn render_for_destination(text: &str, destination: Destination) -> ResponsePresentation {
    let lines: Vec<String> = text.split('\n').map(str::to_string).collect();
    ResponsePresentation {
        display_text: text.to_string(),
        paste_text: text.to_string(),
        open_browser: destination == Destination::Browser || lines.len() > BROWSER_LINE_THRESHOLD,
        browser_lines: lines,
    }
}
