//! Portfolio construction via the external optimizer
//!
//! The optimizer is a black box: it takes λ, a horizon and a target size as
//! three positional arguments and prints one JSON object with
//! `selected_assets` and `weights`. The transport lives behind
//! [`OptimizerBackend`] so tests can swap the subprocess for a fake.

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::error::{BoardError, BoardResult};
use crate::portfolio::Portfolio;

/// Capability to run the optimizer once and hand back its raw stdout.
#[async_trait]
pub trait OptimizerBackend: Send + Sync {
    async fn invoke(&self, lambda: f64, horizon: u32, size: u32) -> BoardResult<String>;
}

/// Validates requests, runs the backend and checks the response shape.
pub struct OptimizerClient {
    backend: Box<dyn OptimizerBackend>,
}

impl OptimizerClient {
    pub fn new(backend: impl OptimizerBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
        }
    }

    /// Build a portfolio. Never retries; that is the caller's decision.
    pub async fn build(&self, lambda: f64, horizon: u32, size: u32) -> BoardResult<Portfolio> {
        if !lambda.is_finite() {
            return Err(BoardError::invalid(format!("risk aversion {} is not finite", lambda)));
        }
        if horizon == 0 || size == 0 {
            return Err(BoardError::invalid(format!(
                "horizon ({}) and size ({}) must be positive",
                horizon, size
            )));
        }

        info!(lambda, horizon, size, "Invoking portfolio optimizer");
        let raw = self.backend.invoke(lambda, horizon, size).await?;
        let portfolio = parse_response(&raw)?;
        info!(assets = portfolio.len(), "Optimizer returned portfolio");
        Ok(portfolio)
    }
}

/// Turn optimizer stdout into a [`Portfolio`].
///
/// Anything that is not JSON means the optimizer is broken; JSON of the wrong
/// shape means it broke its contract.
pub fn parse_response(raw: &str) -> BoardResult<Portfolio> {
    let json: Value = serde_json::from_str(raw.trim()).map_err(|e| {
        error!(output = %raw, "Optimizer output is not JSON: {}", e);
        BoardError::OptimizerUnavailable {
            diagnostic: format!("unparseable output ({}): {}", e, raw.trim()),
        }
    })?;

    let obj = json.as_object().ok_or_else(|| {
        BoardError::OptimizerContractViolation("response is not a JSON object".to_string())
    })?;

    let assets = obj
        .get("selected_assets")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            BoardError::OptimizerContractViolation("missing selected_assets array".to_string())
        })?;
    let weights = obj.get("weights").and_then(Value::as_array).ok_or_else(|| {
        BoardError::OptimizerContractViolation("missing weights array".to_string())
    })?;

    let tickers = assets
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| {
            BoardError::OptimizerContractViolation("selected_assets must be strings".to_string())
        })?;
    let weights = weights
        .iter()
        .map(Value::as_f64)
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| {
            BoardError::OptimizerContractViolation("weights must be numbers".to_string())
        })?;

    Portfolio::new(tickers, weights)
}

/// Runs the optimizer as a child process.
pub struct SubprocessOptimizer {
    program: PathBuf,
    script: Option<PathBuf>,
    timeout: Duration,
}

impl SubprocessOptimizer {
    pub fn new(program: impl Into<PathBuf>, script: Option<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            script,
            timeout,
        }
    }

    fn command(&self, lambda: f64, horizon: u32, size: u32) -> Command {
        let mut cmd = Command::new(&self.program);
        if let Some(script) = &self.script {
            cmd.arg(script);
        }
        cmd.arg(lambda.to_string())
            .arg(horizon.to_string())
            .arg(size.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl OptimizerBackend for SubprocessOptimizer {
    async fn invoke(&self, lambda: f64, horizon: u32, size: u32) -> BoardResult<String> {
        debug!(program = %self.program.display(), "Spawning optimizer");
        let mut cmd = self.command(lambda, horizon, size);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                error!("Optimizer failed to start: {}", e);
                return Err(BoardError::OptimizerUnavailable {
                    diagnostic: format!("failed to start {}: {}", self.program.display(), e),
                });
            }
            Err(_) => {
                error!("Optimizer timed out after {:?}", self.timeout);
                return Err(BoardError::OptimizerUnavailable {
                    diagnostic: format!("timed out after {:?}", self.timeout),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(status = %output.status, "Optimizer exited with failure: {}", stderr.trim());
            return Err(BoardError::OptimizerUnavailable {
                diagnostic: format!("{}: {}", output.status, stderr.trim()),
            });
        }
        Ok(stdout)
    }
}

/// Scripted optimizer for tests.
#[derive(Default)]
pub struct FakeOptimizer {
    response: Mutex<Option<Result<String, String>>>,
    calls: AtomicUsize,
    last_args: Mutex<Option<(f64, u32, u32)>>,
}

impl FakeOptimizer {
    /// Answers every call with `stdout`.
    pub fn returning(stdout: impl Into<String>) -> Self {
        Self {
            response: Mutex::new(Some(Ok(stdout.into()))),
            ..Default::default()
        }
    }

    /// Fails every call as if the process crashed with `diagnostic`.
    pub fn failing(diagnostic: impl Into<String>) -> Self {
        Self {
            response: Mutex::new(Some(Err(diagnostic.into()))),
            ..Default::default()
        }
    }

    pub fn set_response(&self, stdout: impl Into<String>) {
        if let Ok(mut slot) = self.response.lock() {
            *slot = Some(Ok(stdout.into()));
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_args(&self) -> Option<(f64, u32, u32)> {
        self.last_args.lock().ok().and_then(|a| *a)
    }
}

#[async_trait]
impl OptimizerBackend for FakeOptimizer {
    async fn invoke(&self, lambda: f64, horizon: u32, size: u32) -> BoardResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut args) = self.last_args.lock() {
            *args = Some((lambda, horizon, size));
        }
        let scripted = self.response.lock().ok().and_then(|r| r.clone());
        match scripted {
            Some(Ok(stdout)) => Ok(stdout),
            Some(Err(diagnostic)) => Err(BoardError::OptimizerUnavailable { diagnostic }),
            None => Err(BoardError::OptimizerUnavailable {
                diagnostic: "no scripted response".to_string(),
            }),
        }
    }
}

#[async_trait]
impl<T: OptimizerBackend + ?Sized> OptimizerBackend for std::sync::Arc<T> {
    async fn invoke(&self, lambda: f64, horizon: u32, size: u32) -> BoardResult<String> {
        (**self).invoke(lambda, horizon, size).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const GOOD: &str = r#"{"selected_assets": ["AAA", "BBB"], "weights": [0.6, 0.4]}"#;

    #[tokio::test]
    async fn test_build_returns_parsed_portfolio() {
        let fake = Arc::new(FakeOptimizer::returning(GOOD));
        let client = OptimizerClient::new(fake.clone());

        let p = client.build(1.5, 10, 2).await.unwrap();
        assert_eq!(p.selected_assets(), &["AAA".to_string(), "BBB".to_string()]);
        assert_eq!(fake.calls(), 1);
        assert_eq!(fake.last_args(), Some((1.5, 10, 2)));
    }

    #[tokio::test]
    async fn test_invalid_request_never_reaches_backend() {
        let fake = Arc::new(FakeOptimizer::returning(GOOD));
        let client = OptimizerClient::new(fake.clone());

        for (lambda, horizon, size) in [(f64::NAN, 5, 5), (f64::INFINITY, 5, 5), (1.0, 0, 5), (1.0, 5, 0)] {
            let err = client.build(lambda, horizon, size).await.unwrap_err();
            assert!(matches!(err, BoardError::InvalidRequest(_)));
        }
        assert_eq!(fake.calls(), 0);
    }

    #[tokio::test]
    async fn test_backend_failure_is_unavailable() {
        let client = OptimizerClient::new(FakeOptimizer::failing("exit status: 1"));
        let err = client.build(1.0, 5, 5).await.unwrap_err();
        assert!(matches!(err, BoardError::OptimizerUnavailable { ref diagnostic } if diagnostic.contains("exit status")));
    }

    #[test]
    fn test_non_json_is_unavailable() {
        let err = parse_response("Traceback (most recent call last):").unwrap_err();
        assert!(matches!(err, BoardError::OptimizerUnavailable { .. }));
    }

    #[test]
    fn test_shape_violations() {
        for raw in [
            r#"[1, 2]"#,
            r#"{"selected_assets": ["A"]}"#,
            r#"{"selected_assets": ["A", "B"], "weights": [1.0]}"#,
            r#"{"selected_assets": ["A"], "weights": ["1.0"]}"#,
            r#"{"selected_assets": [1], "weights": [1.0]}"#,
        ] {
            let err = parse_response(raw).unwrap_err();
            assert!(
                matches!(err, BoardError::OptimizerContractViolation(_)),
                "{} gave {:?}",
                raw,
                err
            );
        }
    }

    #[test]
    fn test_trailing_newline_tolerated() {
        assert!(parse_response(&format!("{}\n", GOOD)).is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_subprocess_non_zero_exit() {
        let opt = SubprocessOptimizer::new("false", None, Duration::from_secs(5));
        let err = opt.invoke(1.0, 5, 5).await.unwrap_err();
        assert!(matches!(err, BoardError::OptimizerUnavailable { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_subprocess_passes_positional_args() {
        let opt = SubprocessOptimizer::new("echo", None, Duration::from_secs(5));
        let out = opt.invoke(1.5, 10, 4).await.unwrap();
        assert_eq!(out.trim(), "1.5 10 4");
    }

    #[tokio::test]
    async fn test_missing_program_is_unavailable() {
        let opt = SubprocessOptimizer::new(
            "/nonexistent/optimizer-binary",
            None,
            Duration::from_secs(5),
        );
        let err = opt.invoke(1.0, 1, 1).await.unwrap_err();
        assert!(matches!(err, BoardError::OptimizerUnavailable { .. }));
    }
}
