//! Provider Configuration
//!
//! Per-provider sections of the configuration document and the table of
//! built-in provider endpoints.

use crate::config::document::OrderedMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Upstream parameter filled when a slot carries a single unmapped variable.
pub const API_KEY_PARAM: &str = "api_key";

/// Upstream parameter that overrides the provider base URL per slot.
pub const API_BASE_PARAM: &str = "api_base";

/// How the variables of a provider's credential slots map onto upstream parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyMappingConfig {
    /// Logical variable name -> upstream parameter (e.g. `OPENAI_API_KEY: api_key`)
    #[serde(default)]
    pub env_mapping: BTreeMap<String, String>,

    /// Parameters applied when a slot does not provide them
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub defaults: BTreeMap<String, String>,

    /// Overrides the built-in endpoint for this provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// A self-contained provider: own endpoint, own credential, own model table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomRouteConfig {
    /// Environment variable holding the API key
    #[serde(default)]
    pub api_key: String,

    /// OpenAI-compatible endpoint root
    #[serde(default)]
    pub base_url: String,

    /// client model name -> backend model id
    #[serde(flatten)]
    pub models: OrderedMap<String>,
}

/// Default endpoint for well-known OpenAI-compatible providers.
pub fn builtin_base_url(provider: &str) -> Option<&'static str> {
    let url = match provider {
        "openai" => "https://api.openai.com/v1",
        "deepseek" => "https://api.deepseek.com/v1",
        "groq" => "https://api.groq.com/openai/v1",
        "mistral" => "https://api.mistral.ai/v1",
        "together_ai" => "https://api.together.xyz/v1",
        "openrouter" => "https://openrouter.ai/api/v1",
        "fireworks_ai" => "https://api.fireworks.ai/inference/v1",
        "moonshot" => "https://api.moonshot.cn/v1",
        "dashscope" => "https://dashscope.aliyuncs.com/compatible-mode/v1",
        "xai" => "https://api.x.ai/v1",
        _ => return None,
    };
    Some(url)
}
