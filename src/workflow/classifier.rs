//! 消息复杂度分类
//!
//! 廉价启发式：长度、情绪词、求助词、目标/进展词、多话题连接词。
//! 升级一个档位至少需要两个相互独立的信号。

use serde::Serialize;

use crate::workflow::Complexity;

const LONG_MESSAGE_CHARS: usize = 100;
const VERY_LONG_MESSAGE_CHARS: usize = 300;

const EMOTIONAL_MARKERS: &[&str] = &[
    "anxious", "anxiety", "sad", "depressed", "stressed", "overwhelmed", "lonely", "angry",
    "scared", "afraid", "worried", "upset", "hurt", "crying", "cry", "struggling", "exhausted",
    "panic", "grief", "grieving", "heartbroken", "frustrated", "ashamed", "guilty", "miserable",
    "nervous",
];

const HELP_MARKERS: &[&str] = &[
    "help", "advice", "what should i", "how do i", "how can i", "don't know what to do",
    "what do i do", "any tips", "need someone",
];

const PROGRESS_MARKERS: &[&str] = &[
    "goal", "goals", "progress", "habit", "habits", "working on", "improve", "improving",
    "milestone", "tracking", "streak", "since last time", "last week",
];

const MULTI_TOPIC_MARKERS: &[&str] = &[
    "also", "another thing", "on top of that", "besides", "as well as", "not only",
];

/// 分类时检测到的信号
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ComplexitySignals {
    pub long_message: bool,
    pub very_long_message: bool,
    pub emotional: bool,
    pub help_seeking: bool,
    pub progress: bool,
    pub multi_topic: bool,
}

impl ComplexitySignals {
    /// simple -> supportive 的信号数
    pub fn supportive_count(&self) -> usize {
        [
            self.long_message,
            self.emotional,
            self.help_seeking,
            self.progress,
            self.multi_topic,
        ]
        .iter()
        .filter(|s| **s)
        .count()
    }

    /// supportive -> deep 的信号数
    pub fn deep_count(&self) -> usize {
        [self.very_long_message, self.progress, self.multi_topic]
            .iter()
            .filter(|s| **s)
            .count()
    }
}

/// 复杂度分类器（无状态）
#[derive(Debug, Default, Clone, Copy)]
pub struct ComplexityClassifier;

impl ComplexityClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, message: &str) -> Complexity {
        Self::level(&self.signals(message))
    }

    pub fn level(signals: &ComplexitySignals) -> Complexity {
        if signals.supportive_count() < 2 {
            Complexity::Simple
        } else if signals.deep_count() >= 2 {
            Complexity::Deep
        } else {
            Complexity::Supportive
        }
    }

    pub fn signals(&self, message: &str) -> ComplexitySignals {
        let chars = message.chars().count();
        let padded = padded_words(message);
        let sentences = message
            .split(['.', '!', '?'])
            .filter(|s| !s.trim().is_empty())
            .count();

        ComplexitySignals {
            long_message: chars >= LONG_MESSAGE_CHARS,
            very_long_message: chars >= VERY_LONG_MESSAGE_CHARS,
            emotional: contains_any(&padded, EMOTIONAL_MARKERS),
            help_seeking: message.contains('?') || contains_any(&padded, HELP_MARKERS),
            progress: contains_any(&padded, PROGRESS_MARKERS),
            multi_topic: sentences >= 3 || contains_any(&padded, MULTI_TOPIC_MARKERS),
        }
    }
}

/// 小写、按词切分后以空格包裹，便于按整词/整短语匹配
fn padded_words(message: &str) -> String {
    let lowered = message.to_lowercase().replace('\u{2019}', "'");
    let words: Vec<&str> = lowered
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|w| !w.is_empty())
        .collect();
    format!(" {} ", words.join(" "))
}

fn contains_any(padded: &str, markers: &[&str]) -> bool {
    markers
        .iter()
        .any(|m| padded.contains(&format!(" {} ", m)))
}
