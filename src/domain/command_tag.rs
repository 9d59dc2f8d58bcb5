// ============================================================
// Layer 3 — Command-Tag Protocol
// ============================================================
// The closed vocabulary of device-control markers. Training data
// teaches the model to end a device-control reply with exactly one
// marker; the serving side reads it back from the reply suffix.
//
// Marker syntax:  <|identifier|>
//   e.g. "好的，已为您打开风扇<|fan_on|>"
//
// Both sides go through this module: the system prompt lists the
// markers produced by CommandTag::ALL, and extraction only accepts
// identifiers from the same list. Anything else that happens to
// look like a marker (including chat-template tokens such as
// <|im_end|>) is plain text.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const TAG_OPEN:  &str = "<|";
pub const TAG_CLOSE: &str = "|>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandTag {
    FanOn,
    FanOff,
    LightOn,
    LightOff,
    FanSpeedUp,
    FanSpeedDown,
    FanHigh,
    AcOn,
    AcOff,
    GetTemperature,
    GetHumidity,
    WindowOpen,
    WindowClose,
    Status,
}

impl CommandTag {
    pub const ALL: [CommandTag; 14] = [
        CommandTag::FanOn,
        CommandTag::FanOff,
        CommandTag::LightOn,
        CommandTag::LightOff,
        CommandTag::FanSpeedUp,
        CommandTag::FanSpeedDown,
        CommandTag::FanHigh,
        CommandTag::AcOn,
        CommandTag::AcOff,
        CommandTag::GetTemperature,
        CommandTag::GetHumidity,
        CommandTag::WindowOpen,
        CommandTag::WindowClose,
        CommandTag::Status,
    ];

    /// The bare identifier, e.g. `fan_on`.
    pub fn identifier(&self) -> &'static str {
        match self {
            CommandTag::FanOn          => "fan_on",
            CommandTag::FanOff         => "fan_off",
            CommandTag::LightOn        => "light_on",
            CommandTag::LightOff       => "light_off",
            CommandTag::FanSpeedUp     => "fan_speed_up",
            CommandTag::FanSpeedDown   => "fan_speed_down",
            CommandTag::FanHigh        => "fan_high",
            CommandTag::AcOn           => "ac_on",
            CommandTag::AcOff          => "ac_off",
            CommandTag::GetTemperature => "get_temperature",
            CommandTag::GetHumidity    => "get_humidity",
            CommandTag::WindowOpen     => "window_open",
            CommandTag::WindowClose    => "window_close",
            CommandTag::Status         => "status",
        }
    }

    /// The delimited marker, e.g. `<|fan_on|>`.
    pub fn marker(&self) -> String {
        format!("{TAG_OPEN}{}{TAG_CLOSE}", self.identifier())
    }

    pub fn from_identifier(id: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.identifier() == id)
    }

    /// Every marker in protocol order.
    pub fn all_markers() -> Vec<String> {
        Self::ALL.iter().map(|t| t.marker()).collect()
    }

    /// Detect the tag a reply ends with.
    ///
    /// Only a recognised marker at the very end of the reply (trailing
    /// whitespace ignored) counts. Unknown identifiers and markers in
    /// the middle of the text return None.
    pub fn extract(reply: &str) -> Option<Self> {
        split_reply(reply).1
    }
}

impl fmt::Display for CommandTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}

/// Split a reply into its spoken text and its trailing command tag.
///
/// When no recognised tag ends the reply, the whole reply is returned
/// unchanged as text.
pub fn split_reply(reply: &str) -> (&str, Option<CommandTag>) {
    let trimmed = reply.trim_end();
    let Some(body) = trimmed.strip_suffix(TAG_CLOSE) else {
        return (reply, None);
    };
    let Some(open) = body.rfind(TAG_OPEN) else {
        return (reply, None);
    };
    let identifier = &body[open + TAG_OPEN.len()..];
    match CommandTag::from_identifier(identifier) {
        Some(tag) => (trimmed[..open].trim_end(), Some(tag)),
        None      => (reply, None),
    }
}

/// Drop a dangling, unclosed marker from the end of a reply.
///
/// A generation budget can stop the model halfway through a marker,
/// leaving e.g. "好的<|light_o". Such a fragment is neither text nor
/// a command, so it is removed. Complete markers are left alone.
pub fn strip_partial_marker(reply: &str) -> &str {
    let Some(open) = reply.rfind(TAG_OPEN) else {
        // A lone "<" at the very end is the first half of an opener.
        return reply.strip_suffix('<').unwrap_or(reply);
    };
    let tail = &reply[open + TAG_OPEN.len()..];
    if tail.contains(TAG_CLOSE) {
        return reply;
    }
    let looks_partial = tail
        .trim_end_matches('|')
        .chars()
        .all(|c| c.is_ascii_lowercase() || c == '_');
    if looks_partial {
        reply[..open].trim_end()
    } else {
        reply
    }
}

/// System prompt used at serving time. Lists every marker the model
/// may emit, generated from the closed set.
pub fn system_prompt() -> String {
    let markers = CommandTag::all_markers().join(", ");
    format!(
        "你是秋原管家，既是智能家居控制助手，也可以作为陪聊和问答助手。\n\
         — 如果用户输入以下家电命令，请在回答末尾附加对应的命令标记：\n  \
         {markers}\n\
         — 如果用户的问题是其他内容（闲聊、知识问答、建议等），\n  \
         请用自然语言直接回答，不要输出任何 <|…|> 标记。"
    )
}
