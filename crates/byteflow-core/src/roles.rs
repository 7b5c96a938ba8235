//! Role registry — load the report pipeline definition from YAML.
//!
//! A pipeline YAML defines an ordered set of role-specialized agents:
//!
//! ```yaml
//! name: "Industry Report Pipeline"
//! version: "1.0"
//!
//! roles:
//!   - key: "policy_analyst"
//!     name: "Policy Analyst"
//!     provider: "qwen"
//!     ordinal: 0
//!     temperature: 0.6
//!     augment_with_search: true
//!     system_prompt: |
//!       You analyze the policy landscape around ${topic}.
//!       Target length: ${word_limit} words. Report type: ${report_type}.
//!
//!   - key: "conclusion_generator"
//!     name: "Conclusion Generator"
//!     provider: "qwen"
//!     ordinal: 1
//!     include_prior_outputs: true
//!     is_final: true
//!     system_prompt: |
//!       Synthesize the sections below into a final report on ${topic}.
//!       ${context}
//! ```
//!
//! The registry is loaded once at startup, validated against the known
//! provider identifiers, and treated as read-only for the process lifetime.

use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;

/// One role (agent) in the pipeline, loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleDefinition {
    /// Unique role key (e.g., "policy_analyst")
    pub key: String,

    /// Display name
    pub name: String,

    /// Provider identifier this role is bound to (e.g., "ollama", "qwen", "ernie")
    pub provider: String,

    /// System-prompt template. Placeholders: `${topic}`, `${word_limit}`,
    /// `${report_type}`, `${context}`, `${search_results}`.
    pub system_prompt: String,

    /// Sampling temperature (0.0–2.0)
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Maximum output tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Position in the pipeline; unique, defines execution order
    pub ordinal: u32,

    /// Whether this role's prompt receives all prior roles' outputs as context
    #[serde(default)]
    pub include_prior_outputs: bool,

    /// Whether this role's prompt may be augmented with external search results
    #[serde(default)]
    pub augment_with_search: bool,

    /// Whether this role's output becomes the final report answer.
    /// Exactly one role per pipeline carries this flag.
    #[serde(default)]
    pub is_final: bool,
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

/// Top-level pipeline definition document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Version string
    #[serde(default = "default_version")]
    pub version: String,

    /// Roles, in any order in the document; sorted by ordinal on load
    pub roles: Vec<RoleDefinition>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl PipelineConfig {
    /// Parse a pipeline definition from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, WorkflowError> {
        serde_yaml::from_str(yaml)
            .map_err(|e| WorkflowError::Config(format!("Failed to parse pipeline YAML: {}", e)))
    }

    /// Load a pipeline definition from a file path.
    pub fn from_file(path: &str) -> Result<Self, WorkflowError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            WorkflowError::Config(format!("Failed to read pipeline file '{}': {}", path, e))
        })?;
        Self::from_yaml(&content)
    }
}

/// Validated, ordinal-sorted role list. Read-only after construction.
#[derive(Debug, Clone)]
pub struct RoleRegistry {
    name: String,
    roles: Vec<RoleDefinition>,
    final_role: RoleDefinition,
}

impl RoleRegistry {
    /// Build a registry from a parsed pipeline config, validating against the
    /// known provider identifiers. Unknown providers fail here, at load time,
    /// not at call time.
    pub fn new(config: PipelineConfig, known_providers: &[String]) -> Result<Self, WorkflowError> {
        let mut roles = config.roles;

        if roles.is_empty() {
            return Err(WorkflowError::Config(
                "Pipeline must define at least one role".to_string(),
            ));
        }

        let mut seen_keys = std::collections::HashSet::new();
        let mut seen_ordinals = std::collections::HashSet::new();
        let mut final_count = 0usize;

        for role in &roles {
            if !seen_keys.insert(role.key.clone()) {
                return Err(WorkflowError::Config(format!(
                    "Duplicate role key '{}'",
                    role.key
                )));
            }
            if !seen_ordinals.insert(role.ordinal) {
                return Err(WorkflowError::Config(format!(
                    "Duplicate ordinal {} (role '{}')",
                    role.ordinal, role.key
                )));
            }
            if !(0.0..=2.0).contains(&role.temperature) {
                return Err(WorkflowError::Config(format!(
                    "Role '{}': temperature {} out of range 0.0–2.0",
                    role.key, role.temperature
                )));
            }
            if role.max_tokens == 0 {
                return Err(WorkflowError::Config(format!(
                    "Role '{}': max_tokens must be positive",
                    role.key
                )));
            }
            if !known_providers.iter().any(|p| p == &role.provider) {
                return Err(WorkflowError::Config(format!(
                    "Role '{}' references unknown provider '{}' (known: {})",
                    role.key,
                    role.provider,
                    known_providers.join(", ")
                )));
            }
            if role.is_final {
                final_count += 1;
            }
        }

        if final_count != 1 {
            return Err(WorkflowError::Config(format!(
                "Exactly one role must set is_final (found {})",
                final_count
            )));
        }

        roles.sort_by_key(|r| r.ordinal);

        // Reordering a pipeline must not silently change which output becomes
        // the answer, so the final role has to sit at the end.
        let final_role = match roles.last() {
            Some(last) if last.is_final => last.clone(),
            _ => {
                return Err(WorkflowError::Config(
                    "The is_final role must have the highest ordinal".to_string(),
                ))
            }
        };

        tracing::info!(
            "[RoleRegistry] Loaded pipeline '{}' with {} roles",
            config.name,
            roles.len()
        );

        Ok(Self {
            name: config.name,
            roles,
            final_role,
        })
    }

    /// Load and validate a pipeline from a YAML string.
    pub fn from_yaml(yaml: &str, known_providers: &[String]) -> Result<Self, WorkflowError> {
        Self::new(PipelineConfig::from_yaml(yaml)?, known_providers)
    }

    /// Load and validate a pipeline from a file path.
    pub fn from_file(path: &str, known_providers: &[String]) -> Result<Self, WorkflowError> {
        Self::new(PipelineConfig::from_file(path)?, known_providers)
    }

    /// Pipeline name.
    pub fn pipeline_name(&self) -> &str {
        &self.name
    }

    /// Roles in execution (ordinal) order.
    pub fn roles(&self) -> &[RoleDefinition] {
        &self.roles
    }

    /// Number of roles.
    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    /// The role whose output becomes the final report answer.
    pub fn final_role(&self) -> &RoleDefinition {
        &self.final_role
    }

    /// Get a role by key.
    pub fn get(&self, key: &str) -> Option<&RoleDefinition> {
        self.roles.iter().find(|r| r.key == key)
    }

    /// Built-in default pipeline (no file needed). Mirrors `pipeline.yaml`.
    pub fn builtin(known_providers: &[String]) -> Result<Self, WorkflowError> {
        Self::from_yaml(DEFAULT_PIPELINE_YAML, known_providers)
    }
}

/// The stock six-role report pipeline, embedded as a fallback when no
/// pipeline file is supplied.
pub const DEFAULT_PIPELINE_YAML: &str = include_str!("../../../pipeline.yaml");
