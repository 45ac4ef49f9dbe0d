//! The six analysis stages, their routing profiles, prompts and output schemas.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::types::StageInputs;
use crate::cache::EntityType;
use crate::routing::TaskType;
use crate::types::{ForgeError, StageIdentity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extraction,
    GapAnalysis,
    Strategy,
    Competitive,
    RiskScoring,
    Polish,
}

/// Routing features and memory participation of a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageProfile {
    pub task: TaskType,
    pub requires_reasoning: bool,
    pub requires_creativity: bool,
    /// Entity kind this stage both reads from and writes to institutional memory
    pub memory: Option<EntityType>,
}

impl Stage {
    /// Execution order. Each stage may consume every earlier stage's output.
    pub const ALL: [Stage; 6] = [
        Stage::Extraction,
        Stage::GapAnalysis,
        Stage::Strategy,
        Stage::Competitive,
        Stage::RiskScoring,
        Stage::Polish,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::GapAnalysis => "gap_analysis",
            Self::Strategy => "strategy",
            Self::Competitive => "competitive",
            Self::RiskScoring => "risk_scoring",
            Self::Polish => "polish",
        }
    }

    pub fn profile(&self) -> StageProfile {
        let (task, requires_reasoning, requires_creativity, memory) = match self {
            Self::Extraction => (TaskType::DataExtraction, false, false, Some(EntityType::Company)),
            Self::GapAnalysis => (TaskType::GapAnalysis, true, false, Some(EntityType::Industry)),
            Self::Strategy => (TaskType::StrategicPlanning, true, true, None),
            Self::Competitive => (
                TaskType::CompetitiveAnalysis,
                true,
                false,
                Some(EntityType::Competitor),
            ),
            Self::RiskScoring => (TaskType::RiskAssessment, true, false, None),
            Self::Polish => (TaskType::Polish, false, true, None),
        };
        StageProfile {
            task,
            requires_reasoning,
            requires_creativity,
            memory,
        }
    }

    /// Stages before this one, in order
    pub fn upstream(&self) -> &'static [Stage] {
        let idx = Self::ALL.iter().position(|s| s == self).unwrap_or(0);
        &Self::ALL[..idx]
    }

    pub fn prompt(&self, identity: &StageIdentity, inputs: &StageInputs) -> String {
        let (role, objectives) = self.brief();
        let mut prompt = format!(
            r#"<ROLE>
{role}
</ROLE>

<OBJECTIVES>
{objectives}
</OBJECTIVES>

## Engagement
Company: {company}
Industry: {industry}
Challenge: {challenge}
"#,
            company = identity.company,
            industry = identity.industry,
            challenge = if inputs.challenge.trim().is_empty() {
                "(not stated)"
            } else {
                inputs.challenge.trim()
            },
        );

        if inputs.extracted_data.as_object().is_some_and(|m| !m.is_empty()) {
            prompt.push_str("\n## Extracted Data\n");
            prompt.push_str(&pretty(&inputs.extracted_data));
            prompt.push('\n');
        }

        if let Some(record) = &inputs.memory {
            prompt.push_str(&format!(
                "\n## Known {} Facts (cached {}, source: {})\n{}\n",
                record.entity_type,
                record.cached_at.format("%Y-%m-%d"),
                record.source,
                pretty(&record.data)
            ));
        }

        for (name, output) in &inputs.upstream {
            prompt.push_str(&format!("\n## Prior Stage: {}\n{}\n", name, pretty(output)));
        }

        for (name, value) in &inputs.extra {
            prompt.push_str(&format!("\n## {}\n{}\n", name, pretty(value)));
        }

        prompt.push_str(
            r#"
<FOCUS>
- Ground every claim in the data above; say so when data is missing
- Report a "confidence" between 0 and 1 for the whole answer
- Respond with a single JSON object matching the schema
</FOCUS>"#,
        );
        prompt
    }

    fn brief(&self) -> (&'static str, &'static str) {
        match self {
            Self::Extraction => (
                "You are a business analyst who turns raw company material into a structured profile.",
                "1. Build a factual company profile\n2. Pull out quantitative key metrics\n3. Rate the quality and completeness of the data",
            ),
            Self::GapAnalysis => (
                "You are a strategy consultant specializing in capability and market gap assessment.",
                "1. Identify gaps between the company's position and the challenge\n2. Rate each gap's severity\n3. Capture industry insights that hold beyond this company",
            ),
            Self::Strategy => (
                "You are a senior strategy partner designing options for an executive team.",
                "1. Propose distinct strategic options that close the identified gaps\n2. Recommend one option\n3. Explain the rationale and first steps",
            ),
            Self::Competitive => (
                "You are a competitive intelligence analyst.",
                "1. Identify the most relevant competitors\n2. Describe their positioning and threat level\n3. Name sources of differentiation for the company",
            ),
            Self::RiskScoring => (
                "You are a risk analyst stress-testing a proposed strategy.",
                "1. List the main execution and market risks\n2. Score likelihood and impact from 0 to 1\n3. Propose a mitigation for each risk",
            ),
            Self::Polish => (
                "You are an editor preparing a board-ready strategy brief.",
                "1. Write a concise executive summary of all prior stages\n2. Distill the key recommendations\n3. Keep the language plain and specific",
            ),
        }
    }

    /// JSON schema the model output must satisfy
    pub fn schema(&self) -> Value {
        let body = match self {
            Self::Extraction => json!({
                "company_profile": {"type": "object"},
                "key_metrics": {"type": "object"},
                "data_quality": {"type": "string"},
            }),
            Self::GapAnalysis => json!({
                "gaps": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "area": {"type": "string"},
                            "description": {"type": "string"},
                            "severity": {"type": "string", "enum": ["low", "medium", "high"]}
                        },
                        "required": ["area", "description", "severity"]
                    }
                },
                "industry_insights": {"type": "array", "items": {"type": "string"}},
            }),
            Self::Strategy => json!({
                "strategic_options": {"type": "array", "items": {"type": "object"}},
                "recommended": {"type": "string"},
                "rationale": {"type": "string"},
            }),
            Self::Competitive => json!({
                "competitors": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "name": {"type": "string"},
                            "positioning": {"type": "string"},
                            "threat_level": {"type": "string"}
                        },
                        "required": ["name"]
                    }
                },
                "differentiation": {"type": "array", "items": {"type": "string"}},
            }),
            Self::RiskScoring => json!({
                "risks": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "name": {"type": "string"},
                            "likelihood": {"type": "number"},
                            "impact": {"type": "number"},
                            "mitigation": {"type": "string"}
                        },
                        "required": ["name", "likelihood", "impact"]
                    }
                },
                "overall_risk": {"type": "number"},
            }),
            Self::Polish => json!({
                "executive_summary": {"type": "string"},
                "key_recommendations": {"type": "array", "items": {"type": "string"}},
            }),
        };

        let mut properties = body;
        let mut required: Vec<String> = properties
            .as_object()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        if let Some(map) = properties.as_object_mut() {
            map.insert(
                "confidence".to_string(),
                json!({"type": "number", "minimum": 0, "maximum": 1}),
            );
        }
        required.push("confidence".to_string());

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Entity id a memory record of this stage is filed under
    pub fn memory_entity_id<'a>(&self, identity: &'a StageIdentity) -> Option<&'a str> {
        match self.profile().memory? {
            EntityType::Company | EntityType::Competitor => Some(&identity.company),
            EntityType::Industry => Some(&identity.industry),
        }
    }

    /// Portion of a stage output worth remembering across runs
    pub fn memory_payload(&self, output: &Value) -> Option<Value> {
        let field = match self.profile().memory? {
            EntityType::Company => "company_profile",
            EntityType::Industry => "industry_insights",
            EntityType::Competitor => "competitors",
        };
        Some(output.get(field).cloned().unwrap_or_else(|| output.clone()))
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == normalized)
            .ok_or_else(|| ForgeError::InvalidInput(format!("Unknown stage: {}", s)))
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
