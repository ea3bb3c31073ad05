//! Dictation vs. command classification.
//!
//! Ordered regex rules decide first; a chat model is only asked when no rule
//! matches. Nothing here returns an error: every failure degrades to
//! "probably dictation".

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};
use voxagent_core::{ChatMessage, Intent, IntentKind, TriggerMode};
use voxagent_models::ChatModel;

const RULE_CONFIDENCE: f32 = 0.9;
const DEFAULT_CONFIDENCE: f32 = 0.5;

/// Matched in order, before any command rule.
static DICTATION_RULES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r#"^["“”].*["“”]$"#,
        r"^输入[:：]?\s*",
        r"^(?:Type|type|Input|input)[:：]\s*",
    ])
});

/// Matched in order after the dictation rules.
static COMMAND_RULES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"^(打开|启动|运行|关闭)\s*.+",
        r"^(帮我|请|麻烦).*(写|发|创建|删除|搜索|查找|复制|粘贴)",
        r"^(总结|翻译|润色|改写|修改|编辑)",
        r"(?i)^(发送|发给).*(slack|邮件|微信|消息)",
        r"^(搜索|查询|查找|找一下)",
        r"^(执行|运行).*(命令|脚本)",
        r"^(读取|写入|保存|删除).*(文件|文档)",
        r"^(设置|配置|调整)",
        r"^(?:Open|open|Launch|launch|Start|start|Close|close|Quit|quit)\s+\S",
        r"^(?:Please|please|Can you|can you)\b.*\b(?:write|send|create|delete|search|find|copy|paste)\b",
        r"^(?:Summarize|summarize|Translate|translate|Rewrite|rewrite)\b",
        r"^(?:Send|send|Message|message|Email|email)\b.*\b(?:to|on|via)\b",
        r"^(?:Search|search|Look up|look up|Find|find)\b",
        r"^(?:Run|run|Execute|execute)\b.*\b(?:command|script)\b",
        r"^(?:Read|read|Save|save|Delete|delete)\b.*\b(?:file|document)\b",
    ])
});

const CLASSIFY_PROMPT: &str = "You are an intent classifier. Decide whether the user input \
is dictation or a command.\n\n\
- dictation: the user only wants their speech typed at the current cursor position\n\
- command: the user wants the computer to perform an action\n\n\
Reply with JSON only: {\"intent\": \"dictation\" | \"command\", \"confidence\": 0-1}\n\n\
User input: ";

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(pattern = p, "Skipping invalid intent rule: {}", e);
                None
            }
        })
        .collect()
}

pub struct IntentResolver {
    fallback: Option<Arc<dyn ChatModel>>,
}

impl IntentResolver {
    /// A resolver that only uses the built-in rules.
    pub fn rules_only() -> Self {
        Self { fallback: None }
    }

    /// A resolver that asks `model` when no rule matches.
    pub fn with_fallback(model: Arc<dyn ChatModel>) -> Self {
        Self {
            fallback: Some(model),
        }
    }

    /// Classify `text`. An explicit dictation or agent mode short-circuits
    /// everything else.
    pub async fn resolve(&self, text: &str, explicit: Option<TriggerMode>) -> Intent {
        match explicit {
            Some(TriggerMode::Dictation) => return Intent::dictation(1.0),
            Some(TriggerMode::Agent) => return Intent::command(1.0),
            Some(TriggerMode::Command) | None => {}
        }

        if let Some(intent) = match_rules(text) {
            debug!(text, intent = ?intent.kind, "Intent resolved by rules");
            return intent;
        }

        if let Some(model) = &self.fallback {
            return classify_with_model(model.as_ref(), text).await;
        }

        Intent::dictation(DEFAULT_CONFIDENCE)
    }
}

fn match_rules(text: &str) -> Option<Intent> {
    let text = text.trim();
    if DICTATION_RULES.iter().any(|re| re.is_match(text)) {
        return Some(Intent::dictation(RULE_CONFIDENCE));
    }
    if COMMAND_RULES.iter().any(|re| re.is_match(text)) {
        return Some(Intent::command(RULE_CONFIDENCE));
    }
    None
}

async fn classify_with_model(model: &dyn ChatModel, text: &str) -> Intent {
    let messages = [ChatMessage::user(format!("{CLASSIFY_PROMPT}{text}"))];
    let response = match model.chat(&messages, &[]).await {
        Ok(response) => response,
        Err(e) => {
            warn!(model = model.name(), "Intent classification failed, assuming dictation: {}", e);
            return Intent::dictation(DEFAULT_CONFIDENCE);
        }
    };

    let content = response.content.unwrap_or_default();
    match parse_classification(&content) {
        Some(intent) => {
            debug!(text, intent = ?intent.kind, confidence = intent.confidence, "Intent resolved by model");
            intent
        }
        None => {
            warn!(content = %content, "Could not parse intent classification");
            Intent::dictation(DEFAULT_CONFIDENCE)
        }
    }
}

/// Accepts the JSON object anywhere in the reply, e.g. inside a code fence.
fn parse_classification(content: &str) -> Option<Intent> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    let value: Value = serde_json::from_str(content.get(start..=end)?).ok()?;

    let kind = match value.get("intent")?.as_str()? {
        "command" => IntentKind::Command,
        _ => IntentKind::Dictation,
    };
    let confidence = value.get("confidence")?.as_f64()?;
    Some(Intent::new(kind, confidence as f32))
}
