//! 风险短语索引
//!
//! 将关键词/短语表预编译为单个正则（最长短语优先），对输入只扫描一遍；
//! 命中的文本再通过哈希表映射回 (类别, 严重度权重, 紧迫标签)。

use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::risk::RiskError;

/// 风险类别（0–10 分制分别计分）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    /// 自杀/自我伤害意图
    SelfHarm,
    /// 对他人的暴力
    Violence,
    /// 自伤行为（割伤、烧伤等）
    SelfInjury,
    /// 现实感改变（幻听、被控制感）
    AlteredReality,
}

impl RiskCategory {
    pub fn all() -> [RiskCategory; 4] {
        [
            RiskCategory::SelfHarm,
            RiskCategory::Violence,
            RiskCategory::SelfInjury,
            RiskCategory::AlteredReality,
        ]
    }
}

/// 短语的紧迫标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    /// 命中即 immediacy = 10
    Immediate,
    Elevated,
    Background,
}

/// 索引条目的含义
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IndicatorKind {
    Risk {
        category: RiskCategory,
        weight: f32,
        urgency: Urgency,
    },
    /// 保护性因素，按 reduction 扣减总分（总扣减有上限）
    Protective { reduction: f32 },
    /// 显式时间指代（"tonight"、"right now"）
    TimeReference,
}

use IndicatorKind::{Protective, Risk, TimeReference};
use RiskCategory::{AlteredReality, SelfHarm, SelfInjury, Violence};
use Urgency::{Background, Elevated, Immediate};

const fn risk(category: RiskCategory, weight: f32, urgency: Urgency) -> IndicatorKind {
    Risk {
        category,
        weight,
        urgency,
    }
}

const fn protective(reduction: f32) -> IndicatorKind {
    Protective { reduction }
}

/// 内置短语表（未经临床验证，仅保留启发式机制）
const BUILTIN: &[(&str, IndicatorKind)] = &[
    // 自杀意图
    ("kill myself", risk(SelfHarm, 9.0, Immediate)),
    ("end my life", risk(SelfHarm, 9.0, Immediate)),
    ("take my own life", risk(SelfHarm, 9.0, Immediate)),
    ("commit suicide", risk(SelfHarm, 9.0, Immediate)),
    ("going to end it", risk(SelfHarm, 8.5, Immediate)),
    ("suicide plan", risk(SelfHarm, 9.0, Immediate)),
    ("want to die", risk(SelfHarm, 8.0, Elevated)),
    ("end it all", risk(SelfHarm, 8.0, Elevated)),
    ("suicidal", risk(SelfHarm, 7.5, Elevated)),
    ("suicide", risk(SelfHarm, 7.0, Elevated)),
    ("better off dead", risk(SelfHarm, 7.5, Elevated)),
    ("wish i was dead", risk(SelfHarm, 7.5, Elevated)),
    ("no reason to live", risk(SelfHarm, 7.5, Elevated)),
    ("not worth living", risk(SelfHarm, 7.0, Elevated)),
    ("don't want to be here anymore", risk(SelfHarm, 7.0, Elevated)),
    ("can't go on", risk(SelfHarm, 6.0, Elevated)),
    ("hopeless", risk(SelfHarm, 3.5, Background)),
    ("worthless", risk(SelfHarm, 3.0, Background)),
    ("a burden", risk(SelfHarm, 3.5, Background)),
    ("can't take it anymore", risk(SelfHarm, 4.0, Background)),
    ("empty inside", risk(SelfHarm, 3.0, Background)),
    ("give up", risk(SelfHarm, 2.5, Background)),
    // 自伤
    ("hurt myself", risk(SelfInjury, 7.5, Elevated)),
    ("harm myself", risk(SelfInjury, 7.5, Elevated)),
    ("harming myself", risk(SelfInjury, 7.5, Elevated)),
    ("cut myself", risk(SelfInjury, 7.5, Elevated)),
    ("cutting myself", risk(SelfInjury, 7.5, Elevated)),
    ("burn myself", risk(SelfInjury, 7.0, Elevated)),
    ("self harm", risk(SelfInjury, 6.5, Elevated)),
    ("self-harm", risk(SelfInjury, 6.5, Elevated)),
    ("punish myself", risk(SelfInjury, 4.5, Background)),
    // 暴力
    ("kill him", risk(Violence, 8.5, Immediate)),
    ("kill her", risk(Violence, 8.5, Immediate)),
    ("kill them", risk(Violence, 8.5, Immediate)),
    ("get a gun", risk(Violence, 8.5, Immediate)),
    ("hurt someone", risk(Violence, 7.0, Elevated)),
    ("hurt somebody", risk(Violence, 7.0, Elevated)),
    ("make them pay", risk(Violence, 5.0, Background)),
    ("so angry i could", risk(Violence, 4.0, Background)),
    // 现实感改变
    ("voices telling me", risk(AlteredReality, 7.0, Elevated)),
    ("hearing voices", risk(AlteredReality, 6.0, Elevated)),
    ("they are watching me", risk(AlteredReality, 5.0, Background)),
    ("being controlled", risk(AlteredReality, 5.0, Background)),
    ("nothing is real", risk(AlteredReality, 5.0, Background)),
    // 保护性因素
    ("my family", protective(0.5)),
    ("my kids", protective(0.7)),
    ("my therapist", protective(0.7)),
    ("getting help", protective(0.7)),
    ("support group", protective(0.5)),
    ("reasons to live", protective(1.0)),
    ("i would never", protective(1.0)),
    ("wouldn't act on", protective(1.0)),
    ("safety plan", protective(0.8)),
    ("feeling safe", protective(0.7)),
    ("hopeful", protective(0.6)),
    ("coping", protective(0.4)),
    // 时间指代
    ("right now", TimeReference),
    ("tonight", TimeReference),
    ("today", TimeReference),
    ("immediately", TimeReference),
    ("this weekend", TimeReference),
    ("tomorrow", TimeReference),
    ("soon", TimeReference),
];

/// 一次命中
#[derive(Debug, Clone, Copy)]
pub struct LexiconMatch<'a> {
    pub phrase: &'a str,
    pub kind: IndicatorKind,
}

/// 预编译的短语索引
#[derive(Debug)]
pub struct Lexicon {
    pattern: Regex,
    entries: HashMap<String, IndicatorKind>,
}

impl Lexicon {
    /// 使用内置短语表
    pub fn builtin() -> Result<Self, RiskError> {
        Self::from_entries(
            BUILTIN
                .iter()
                .map(|(phrase, kind)| (phrase.to_string(), *kind)),
        )
    }

    /// 由 (短语, 含义) 列表构建；短语按长度降序放入交替分支，保证最长匹配优先
    pub fn from_entries(
        entries: impl IntoIterator<Item = (String, IndicatorKind)>,
    ) -> Result<Self, RiskError> {
        let mut table: HashMap<String, IndicatorKind> = HashMap::new();
        for (phrase, kind) in entries {
            let key = phrase_key(&normalize(&phrase));
            if !key.is_empty() {
                table.insert(key, kind);
            }
        }
        if table.is_empty() {
            return Err(RiskError::EmptyLexicon);
        }

        let mut phrases: Vec<&String> = table.keys().collect();
        phrases.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        let alternatives: Vec<String> = phrases
            .iter()
            .map(|p| {
                p.split(' ')
                    .map(regex::escape)
                    .collect::<Vec<_>>()
                    .join(r"\s+")
            })
            .collect();
        let pattern = Regex::new(&format!(r"(?i)\b(?:{})\b", alternatives.join("|")))?;

        Ok(Self {
            pattern,
            entries: table,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 单遍扫描（输入须已经过 [`normalize`]）
    pub fn scan<'a>(&'a self, normalized: &str) -> Vec<LexiconMatch<'a>> {
        self.pattern
            .find_iter(normalized)
            .filter_map(|m| {
                let key = phrase_key(m.as_str());
                self.entries
                    .get_key_value(&key)
                    .map(|(phrase, kind)| LexiconMatch {
                        phrase: phrase.as_str(),
                        kind: *kind,
                    })
            })
            .collect()
    }
}

/// 小写化并统一弯引号
pub fn normalize(text: &str) -> String {
    text.to_lowercase().replace(['\u{2019}', '\u{2018}'], "'")
}

fn phrase_key(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_compiles() {
        let lexicon = Lexicon::builtin().unwrap();
        assert!(lexicon.len() > 50);
    }

    #[test]
    fn test_longest_phrase_wins() {
        let lexicon = Lexicon::builtin().unwrap();
        let matches = lexicon.scan(&normalize("I keep cutting myself"));
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].phrase, "cutting myself");
    }

    #[test]
    fn test_whitespace_and_quotes_normalized() {
        let lexicon = Lexicon::builtin().unwrap();
        let matches = lexicon.scan(&normalize("I  don\u{2019}t want to be   here anymore"));
        assert_eq!(matches.len(), 1);
        assert!(matches!(matches[0].kind, IndicatorKind::Risk { category: RiskCategory::SelfHarm, .. }));
    }

    #[test]
    fn test_word_boundaries() {
        let lexicon = Lexicon::builtin().unwrap();
        // "soonest" 不应命中 "soon"
        assert!(lexicon.scan(&normalize("the soonest slot")).is_empty());
    }

    #[test]
    fn test_empty_lexicon_rejected() {
        let err = Lexicon::from_entries(Vec::new()).unwrap_err();
        assert!(matches!(err, RiskError::EmptyLexicon));
    }
}
