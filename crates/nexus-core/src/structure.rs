//! Topics and modules known to a canvas.
//!
//! Every node names a `main_topic` and a `module`. The structure records
//! each label the first time a node introduces it, together with a
//! description and a display color, so collaborators can see which
//! groupings already exist before classifying new material.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::model::{default_main_topic, default_module, Node, NodeType};

/// Colors handed to new topics, in rotation.
const PALETTE: [&str; 9] = [
    "#0A84FF", "#30D158", "#BF5AF2", "#FF9F0A", "#FF375F", "#FFD60A", "#64D2FF", "#5E5CE6",
    "#FF453A",
];

const DEFAULT_TOPIC_COLOR: &str = "#6B7280";
const AUTO_TOPIC_DESCRIPTION: &str = "Auto-generated topic";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicEntry {
    #[serde(default)]
    pub description: String,
    pub color: String,
    /// Module label to description.
    #[serde(default)]
    pub modules: IndexMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Structure {
    #[serde(default)]
    pub topics: IndexMap<String, TopicEntry>,
}

impl Default for Structure {
    fn default() -> Self {
        let mut modules = IndexMap::new();
        modules.insert(default_module(), "General notes and documents".to_string());
        let mut topics = IndexMap::new();
        topics.insert(
            default_main_topic(),
            TopicEntry {
                description: "Default container for new nodes".to_string(),
                color: DEFAULT_TOPIC_COLOR.to_string(),
                modules,
            },
        );
        Self { topics }
    }
}

impl Structure {
    /// Adds `topic`, and `module` beneath it, if they are not known yet.
    /// Existing entries keep their description and blank labels are
    /// ignored. Returns whether anything was added.
    pub fn ensure(&mut self, topic: &str, module: Option<&str>, description: &str) -> bool {
        if topic.trim().is_empty() {
            return false;
        }
        let module = module.filter(|m| !m.trim().is_empty());
        let mut changed = false;
        if !self.topics.contains_key(topic) {
            let color = PALETTE[self.topics.len() % PALETTE.len()].to_string();
            let description = if module.is_some() {
                AUTO_TOPIC_DESCRIPTION.to_string()
            } else {
                description.to_string()
            };
            self.topics.insert(
                topic.to_string(),
                TopicEntry {
                    description,
                    color,
                    modules: IndexMap::new(),
                },
            );
            changed = true;
        }
        if let (Some(module), Some(entry)) = (module, self.topics.get_mut(topic)) {
            if !entry.modules.contains_key(module) {
                entry.modules.insert(module.to_string(), description.to_string());
                changed = true;
            }
        }
        changed
    }

    /// Records the labels a node carries. A module node describes its own
    /// module; a topic node describes its own topic.
    pub fn observe(&mut self, node: &Node) -> bool {
        let description = node.kind.description().unwrap_or_default();
        match node.node_type() {
            NodeType::Topic => {
                let added_topic = self.ensure(&node.main_topic, None, description);
                self.ensure(&node.main_topic, Some(&node.module), "") || added_topic
            }
            NodeType::Module => self.ensure(&node.main_topic, Some(&node.module), description),
            NodeType::Child => self.ensure(&node.main_topic, Some(&node.module), ""),
        }
    }

    pub fn contains(&self, topic: &str, module: &str) -> bool {
        self.topics
            .get(topic)
            .is_some_and(|t| t.modules.contains_key(module))
    }

    /// Plain-text listing for prompts.
    pub fn summary(&self) -> String {
        let mut lines = vec!["### CURRENT CONTEXT REGISTRY ###".to_string()];
        for (topic, entry) in &self.topics {
            lines.push(format!("- Topic: {topic} ({})", entry.description));
            for (module, description) in &entry.modules {
                lines.push(format!("  - Module: {module} ({description})"));
            }
        }
        lines.join("\n")
    }
}
