use serde::{Deserialize, Serialize};

/// Long-term facts distilled from past sessions.
///
/// Each field behaves as an ordered set: insertion order is kept so the
/// snapshot injected into the prompt reads chronologically, and a string is
/// never stored twice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryRecord {
    #[serde(rename = "longTimeTargets", alias = "long_time_target")]
    pub long_time_targets: Vec<String>,
    #[serde(rename = "causes", alias = "cause")]
    pub causes: Vec<String>,
    #[serde(rename = "toolsToAssist", alias = "tools_to_assist")]
    pub tools_to_assist: Vec<String>,
}

impl MemoryRecord {
    pub fn is_empty(&self) -> bool {
        self.long_time_targets.is_empty() && self.causes.is_empty() && self.tools_to_assist.is_empty()
    }

    pub fn len(&self) -> usize {
        self.long_time_targets.len() + self.causes.len() + self.tools_to_assist.len()
    }

    /// Merge proposed additions into a copy of this record.
    ///
    /// Returns the merged record and whether anything was added. Blank
    /// strings are ignored and entries are compared after trimming, so
    /// `merge(merge(r, a), a) == merge(r, a)`.
    pub fn merge(&self, additions: &MemoryRecord) -> (MemoryRecord, bool) {
        let mut merged = self.clone();
        let mut changed = false;

        changed |= merge_field(&mut merged.long_time_targets, &additions.long_time_targets);
        changed |= merge_field(&mut merged.causes, &additions.causes);
        changed |= merge_field(&mut merged.tools_to_assist, &additions.tools_to_assist);

        (merged, changed)
    }

    /// Drop duplicate and blank entries, keeping the first occurrence.
    ///
    /// Files edited by hand or written by older versions may carry
    /// duplicates; the in-memory record must not.
    pub fn normalized(self) -> MemoryRecord {
        MemoryRecord::default().merge(&self).0
    }

    /// Compact JSON rendering used for the memory snapshot message.
    pub fn to_prompt_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

fn merge_field(target: &mut Vec<String>, proposed: &[String]) -> bool {
    let mut changed = false;
    for item in proposed {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        if !target.iter().any(|existing| existing == item) {
            target.push(item.to_string());
            changed = true;
        }
    }
    changed
}
