//! CLI command implementations

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

use crate::auth::{AuthError, AuthResult, LogDelivery, SignInRequest, SignUpRequest, UserPool};
use crate::backend::BackendStack;
use crate::config::BackendConfig;
use crate::observability::Logger;
use crate::resolver::{ResolveRequest, ResolverError};

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::{error_response, ok_response, parse_request, write_response, write_value};

/// Parse arguments and run the selected command
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Validate { config } => validate(&config),
        Command::Names { config } => names(&config),
        Command::Serve { config } => serve(&config),
    }
}

/// Load and validate the configuration
pub fn validate(config_path: &Path) -> CliResult<()> {
    let config = BackendConfig::load(config_path)?;
    write_response(json!({ "appName": config.app_name }))
}

/// Print derived resource names
pub fn names(config_path: &Path) -> CliResult<()> {
    let config = BackendConfig::load(config_path)?;
    write_response(serde_json::to_value(config.resource_names())?)
}

/// Serve requests from stdin until EOF, then stop the stream workers
pub fn serve(config_path: &Path) -> CliResult<()> {
    let config = BackendConfig::load(config_path)?;

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::boot_failed(format!("Failed to create tokio runtime: {}", e)))?;

    rt.block_on(async {
        let stack = BackendStack::build(config, Arc::new(LogDelivery))?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let workers = stack.start_stream_consumer(shutdown_rx);

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let response = match parse_request(&line) {
                Ok(request) => handle_request(&stack, request).await,
                Err(e) => error_response(e.code_str(), e.message()),
            };
            write_value(&response)?;
        }

        // Workers finish their current batch before observing this
        let _ = shutdown_tx.send(true);
        workers
            .join()
            .await
            .map_err(|e| CliError::boot_failed(format!("Stream consumer failed: {}", e)))?;

        let metrics = serde_json::to_string(&stack.metrics().snapshot())?;
        Logger::info("SERVE_STOPPED", &[("metrics", &metrics)]);
        Ok(())
    })
}

/// User pool calls accepted by `serve`, tagged by `auth`
#[derive(Debug, Deserialize)]
#[serde(tag = "auth", rename_all = "camelCase")]
pub enum AuthRequest {
    SignUp {
        email: String,
        password: String,
    },
    ConfirmSignUp {
        email: String,
        code: String,
    },
    ResendConfirmationCode {
        email: String,
    },
    SignIn {
        email: String,
        password: String,
    },
    ForgotPassword {
        email: String,
    },
    ConfirmForgotPassword {
        email: String,
        code: String,
        #[serde(rename = "newPassword")]
        new_password: String,
    },
}

/// Token payload for a sign-in response
fn token_data<T: Serialize>(token: &T) -> AuthResult<Value> {
    serde_json::to_value(token).map_err(|_| AuthError::TokenGenerationFailed)
}

fn run_auth(pool: &UserPool, request: AuthRequest) -> AuthResult<Value> {
    match request {
        AuthRequest::SignUp { email, password } => {
            let user_id = pool.sign_up(SignUpRequest { email, password })?;
            Ok(json!({ "userId": user_id, "confirmed": false }))
        }
        AuthRequest::ConfirmSignUp { email, code } => {
            pool.confirm_sign_up(&email, &code)?;
            Ok(json!({ "confirmed": true }))
        }
        AuthRequest::ResendConfirmationCode { email } => {
            pool.resend_confirmation_code(&email)?;
            Ok(Value::Null)
        }
        AuthRequest::SignIn { email, password } => {
            let token = pool.sign_in(SignInRequest { email, password })?;
            token_data(&token)
        }
        AuthRequest::ForgotPassword { email } => {
            pool.forgot_password(&email)?;
            Ok(Value::Null)
        }
        AuthRequest::ConfirmForgotPassword {
            email,
            code,
            new_password,
        } => {
            pool.confirm_forgot_password(&email, &code, &new_password)?;
            Ok(Value::Null)
        }
    }
}

fn resolver_error_response(e: &ResolverError) -> Value {
    let mut response = error_response(e.code(), &e.to_string());
    if let Some(stage) = e.stage() {
        response["stage"] = json!(stage.to_string());
    }
    response["statusCode"] = json!(e.status_code());
    response
}

/// Handle one request line: a user pool call or an API operation
pub async fn handle_request(stack: &BackendStack, request: Value) -> Value {
    if request.get("auth").is_some() {
        return match serde_json::from_value::<AuthRequest>(request) {
            Ok(auth) => match run_auth(stack.user_pool(), auth) {
                Ok(data) => ok_response(data),
                Err(e) => error_response(e.code(), &e.to_string()),
            },
            Err(e) => error_response("INVALID_REQUEST", &e.to_string()),
        };
    }

    match serde_json::from_value::<ResolveRequest>(request) {
        Ok(request) => match stack.resolve(request).await {
            Ok(data) => ok_response(data),
            Err(e) => resolver_error_response(&e),
        },
        Err(e) => error_response("INVALID_REQUEST", &e.to_string()),
    }
}
