//! OpenAI-compatible evaluator backend.
//!
//! OpenAI, DeepSeek, Groq, Ollama and llama.cpp all speak the same chat
//! completions API, so one evaluator covers them; a [`ProviderPreset`] only
//! picks the base URL, default model and key variable.
//!
//! The model is forced to call the `provide_decision` tool so the answer
//! arrives as structured JSON instead of free text.

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionNamedToolChoice, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionTool, ChatCompletionToolChoiceOption, ChatCompletionToolType,
    CreateChatCompletionRequestArgs, FunctionName, FunctionObject,
};
use async_openai::Client;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::prompt::{self, TOOL_PROVIDE_DECISION};
use super::{EvaluationRequest, Evaluator, EvaluatorError, EvaluatorReply};

/// Known OpenAI-compatible providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderPreset {
    OpenAi,
    DeepSeek,
    Groq,
    Ollama,
    LlamaCpp,
}

impl ProviderPreset {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "openai" => Some(Self::OpenAi),
            "deepseek" => Some(Self::DeepSeek),
            "groq" => Some(Self::Groq),
            "ollama" => Some(Self::Ollama),
            "llamacpp" | "llama.cpp" => Some(Self::LlamaCpp),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::DeepSeek => "deepseek",
            Self::Groq => "groq",
            Self::Ollama => "ollama",
            Self::LlamaCpp => "llamacpp",
        }
    }

    pub fn base_url(self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::DeepSeek => "https://api.deepseek.com/v1",
            Self::Groq => "https://api.groq.com/openai/v1",
            Self::Ollama => "http://localhost:11434/v1",
            Self::LlamaCpp => "http://localhost:8080/v1",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-4.1-mini",
            Self::DeepSeek => "deepseek-chat",
            Self::Groq => "llama-3.3-70b-versatile",
            Self::Ollama => "qwen2.5:14b",
            Self::LlamaCpp => "gpt-3.5-turbo",
        }
    }

    /// Environment variable holding the API key, if the provider needs one.
    pub fn key_env_var(self) -> Option<&'static str> {
        match self {
            Self::OpenAi => Some("OPENAI_API_KEY"),
            Self::DeepSeek => Some("DEEPSEEK_API_KEY"),
            Self::Groq => Some("GROQ_API_KEY"),
            Self::Ollama | Self::LlamaCpp => None,
        }
    }

    /// Placeholder key for local servers that ignore authentication.
    pub fn placeholder_key(self) -> Option<&'static str> {
        match self {
            Self::Ollama => Some("ollama"),
            Self::LlamaCpp => Some("llamacpp"),
            _ => None,
        }
    }
}

/// Arguments of the `provide_decision` tool call.
#[derive(Debug, Deserialize)]
struct DecisionArgs {
    decision: String,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    required_clarification: Option<String>,
}

pub struct OpenAiEvaluator {
    client: Client<OpenAIConfig>,
    model: String,
    provider: String,
}

impl std::fmt::Debug for OpenAiEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The client config holds the API key.
        f.debug_struct("OpenAiEvaluator")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl OpenAiEvaluator {
    pub fn new(
        provider: &str,
        api_key: &str,
        base_url: &str,
        model: impl Into<String>,
    ) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(base_url);
        Self {
            client: Client::with_config(config),
            model: model.into(),
            provider: provider.to_string(),
        }
    }

    pub fn from_preset(preset: ProviderPreset, api_key: &str, model: Option<&str>) -> Self {
        Self::new(
            preset.name(),
            api_key,
            preset.base_url(),
            model.unwrap_or(preset.default_model()),
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_messages(
        &self,
        request: &EvaluationRequest<'_>,
    ) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
        let os_info = request
            .context
            .get("os")
            .map(String::as_str)
            .unwrap_or("Unknown OS");

        let system_msg = ChatCompletionRequestSystemMessageArgs::default()
            .content(prompt::system_prompt(os_info))
            .build()?
            .into();
        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt::build_prompt(request))
            .build()?
            .into();

        Ok(vec![system_msg, user_msg])
    }
}

/// Create the provide_decision tool definition
fn create_decision_tool() -> ChatCompletionTool {
    ChatCompletionTool {
        r#type: ChatCompletionToolType::Function,
        function: FunctionObject {
            name: TOOL_PROVIDE_DECISION.to_string(),
            description: Some("Submit safety evaluation decision".to_string()),
            parameters: Some(serde_json::json!({
                "type": "object",
                "properties": {
                    "decision": {
                        "type": "string",
                        "enum": ["ALLOW", "DENY", "CHALLENGE"],
                        "description": "The gatekeeper decision"
                    },
                    "reasoning": {
                        "type": "string",
                        "description": "Brief explanation of the decision"
                    },
                    "required_clarification": {
                        "type": "string",
                        "description": "What clarification is needed (only for CHALLENGE)"
                    }
                },
                "required": ["decision", "reasoning"]
            })),
            strict: None,
        },
    }
}

fn forced_tool_choice() -> ChatCompletionToolChoiceOption {
    ChatCompletionToolChoiceOption::Named(ChatCompletionNamedToolChoice {
        r#type: ChatCompletionToolType::Function,
        function: FunctionName {
            name: TOOL_PROVIDE_DECISION.to_string(),
        },
    })
}

/// Parse the JSON arguments of a `provide_decision` call.
pub(crate) fn parse_decision_arguments(args: &str) -> Result<EvaluatorReply, EvaluatorError> {
    let parsed: DecisionArgs = serde_json::from_str(args)
        .map_err(|e| EvaluatorError::Malformed(format!("invalid tool arguments: {}", e)))?;

    Ok(EvaluatorReply {
        decision: parsed.decision,
        reason: parsed.reasoning,
        required_clarification: parsed.required_clarification,
    })
}

fn classify_error(err: OpenAIError) -> EvaluatorError {
    match err {
        OpenAIError::ApiError(api) => {
            let text = api.to_string();
            let lower = text.to_ascii_lowercase();
            if lower.contains("api key") || lower.contains("api_key") || lower.contains("auth") {
                EvaluatorError::Auth(text)
            } else {
                EvaluatorError::Api(text)
            }
        }
        OpenAIError::InvalidArgument(msg) => EvaluatorError::Malformed(msg),
        other => EvaluatorError::Transport(other.to_string()),
    }
}

#[async_trait]
impl Evaluator for OpenAiEvaluator {
    fn name(&self) -> &str {
        &self.provider
    }

    async fn assess(
        &self,
        request: &EvaluationRequest<'_>,
    ) -> Result<EvaluatorReply, EvaluatorError> {
        let messages = self.build_messages(request).map_err(classify_error)?;

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .tools(vec![create_decision_tool()])
            .tool_choice(forced_tool_choice())
            .build()
            .map_err(classify_error)?;

        let response = self
            .client
            .chat()
            .create(chat_request)
            .await
            .map_err(classify_error)?;

        let tool_call = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.tool_calls)
            .and_then(|calls| {
                calls
                    .into_iter()
                    .find(|call| call.function.name == TOOL_PROVIDE_DECISION)
            })
            .ok_or_else(|| EvaluatorError::Malformed("no structured response".to_string()))?;

        debug!(
            "{} tool call arguments: {}",
            self.provider, tool_call.function.arguments
        );
        parse_decision_arguments(&tool_call.function.arguments)
    }
}
