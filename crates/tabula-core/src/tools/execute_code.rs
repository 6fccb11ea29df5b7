//! `execute_code` tool: runs analysis code in a fresh sandbox and returns the
//! result as JSON.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::errors::SandboxError;
use crate::executors::{CodeExecutor, ExecutionRequest, ExecutionResult};
use crate::tools::{Tool, ToolMetadata};

pub const TOOL_NAME: &str = "execute_code";

pub struct ExecuteCodeTool {
    executor: Arc<dyn CodeExecutor>,
}

impl ExecuteCodeTool {
    pub fn new(executor: Arc<dyn CodeExecutor>) -> Self {
        Self { executor }
    }

    fn parse_request(arguments: Value) -> Result<ExecutionRequest, SandboxError> {
        let request: ExecutionRequest = serde_json::from_value(arguments)?;
        if request.code.trim().is_empty() {
            return Err(SandboxError::InvalidRequest(
                "'code' must not be empty".to_string(),
            ));
        }
        Ok(request)
    }
}

#[async_trait]
impl Tool for ExecuteCodeTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            name: TOOL_NAME.to_string(),
            description: "Executes Python code in an isolated sandbox with pandas, matplotlib and seaborn preloaded. Input files are copied into the working directory; expected output files are copied back and reported when the code created them.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "code": {
                        "type": "string",
                        "description": "Python source to execute"
                    },
                    "input_files": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Names of files in the data directory to make available to the code"
                    },
                    "output_files_expected": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Names of files the code is expected to write to its working directory"
                    }
                },
                "required": ["code"]
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> Result<String, SandboxError> {
        let request = Self::parse_request(arguments)?;

        let result = match self.executor.execute(request).await {
            Ok(result) => result,
            Err(SandboxError::Cancelled) => return Err(SandboxError::Cancelled),
            Err(e) => {
                // The calling agent gets a failed run it can reason about
                log::error!("Sandbox execution failed before completion: {}", e);
                ExecutionResult::failure(e.to_string())
            }
        };

        Ok(serde_json::to_string(&result)?)
    }
}
