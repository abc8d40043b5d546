//! Prompt construction

use super::ChatMessage;
use crate::models::Glossary;

/// System prompt without a glossary
pub const NOVEL_SYSTEM_PROMPT: &str = "你是一位精通二次元文化的资深轻小说翻译家。\n请将日文文本翻译成流畅、优美的中文。\n\n**核心要求：**\n1. **深度思考：** 在翻译前，先在 <think> 标签中分析文风、补全主语并梳理逻辑。\n2. **信达雅：** 译文需符合中文轻小说阅读习惯，还原原作的沉浸感与文学性。";

const GLOSSARY_HEADER: &str = "\n\n【术语表】\n";

const USER_PREFIX: &str = "请翻译：\n";

/// Render a glossary as JSON with sorted keys, or an empty string
pub fn format_glossary(glossary: &Glossary) -> String {
    if glossary.is_empty() {
        return String::new();
    }
    // BTreeMap serializes in key order
    serde_json::to_string(glossary).unwrap_or_default()
}

/// System prompt, with the glossary block when the glossary is non-empty
pub fn system_prompt(glossary: &Glossary) -> String {
    let rendered = format_glossary(glossary);
    if rendered.is_empty() {
        NOVEL_SYSTEM_PROMPT.to_string()
    } else {
        format!("{NOVEL_SYSTEM_PROMPT}{GLOSSARY_HEADER}{rendered}")
    }
}

/// Replace full-width digits with ASCII digits
pub fn normalize_digits(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '０'..='９' => char::from_u32(c as u32 - '０' as u32 + '0' as u32).unwrap_or(c),
            _ => c,
        })
        .collect()
}

/// Build the message list for one request
///
/// `prev_text` becomes an assistant turn ahead of the user turn when non-empty.
pub fn build_messages(text: &str, prev_text: &str, glossary: &Glossary) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(system_prompt(glossary))];
    if !prev_text.is_empty() {
        messages.push(ChatMessage::assistant(prev_text));
    }
    messages.push(ChatMessage::user(format!(
        "{USER_PREFIX}{}",
        normalize_digits(text)
    )));
    messages
}
