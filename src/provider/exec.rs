//! Exec provider - delegates each call to an external program
//!
//! The program receives one JSON request on stdin and answers on stdout:
//!
//! ```text
//! request:  {"operation": "create", "resource": "db", "type": "database",
//!            "environment": "prod", "profile": "ops", "id": null,
//!            "attributes": {...}}
//! create:   {"id": "db-123", "outputs": {"endpoint": "..."}}
//! update:   {"outputs": {...}}          (empty stdout means no outputs)
//! delete:   anything
//! ```
//!
//! Exit code 75 (`EX_TEMPFAIL`) marks a transient failure, any other non-zero
//! code a permanent one. Stderr becomes the error message.

use declarative::{Attributes, CallContext, Created, Outputs, Provider, ProviderError};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Exit code signalling a retryable failure
pub const EXIT_TRANSIENT: i32 = 75;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Serialize)]
struct Request<'a> {
    operation: &'static str,
    resource: &'a str,
    #[serde(rename = "type")]
    resource_type: &'a str,
    environment: &'a str,
    profile: Option<&'a str>,
    id: Option<&'a str>,
    attributes: Option<&'a Attributes>,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    id: String,
    #[serde(default)]
    outputs: Outputs,
}

#[derive(Debug, Default, Deserialize)]
struct UpdateResponse {
    #[serde(default)]
    outputs: Outputs,
}

#[derive(Debug, Clone)]
pub struct ExecProvider {
    command: PathBuf,
    args: Vec<String>,
}

impl ExecProvider {
    pub fn new(command: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    /// Run the program once and return its stdout
    fn invoke(&self, ctx: &CallContext<'_>, request: &Request<'_>) -> Result<String, ProviderError> {
        let payload = serde_json::to_vec(request)
            .map_err(|e| ProviderError::permanent(format!("could not encode request: {e}")))?;

        log::debug!(
            "Running {} for {} {}",
            self.command.display(),
            request.operation,
            ctx.resource
        );
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .env("STRATA_ENVIRONMENT", ctx.environment)
            .env("STRATA_OPERATION", request.operation)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ProviderError::permanent(format!("could not run {}: {e}", self.command.display())))?;

        // Drain both pipes on helper threads so a chatty child cannot block
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        // Written from a thread too, so a child that never reads still hits the deadline.
        // A child that exits without reading is judged by its exit status.
        if let Some(mut stdin) = child.stdin.take() {
            thread::spawn(move || {
                let _ = stdin.write_all(&payload);
            });
        }

        let status = wait_with_deadline(&mut child, ctx.deadline)?;
        let Some(status) = status else {
            log::warn!("{} timed out; killed {}", ctx.resource, self.command.display());
            return Err(ctx.timeout_error());
        };

        let stdout = stdout.map(join).unwrap_or_default();
        let stderr = stderr.map(join).unwrap_or_default();

        if status.success() {
            return Ok(stdout);
        }

        let message = match stderr.trim() {
            "" => format!("{} exited with {status}", self.command.display()),
            text => text.to_string(),
        };
        match status.code() {
            Some(EXIT_TRANSIENT) => Err(ProviderError::transient(message)),
            _ => Err(ProviderError::permanent(message)),
        }
    }

    fn request<'a>(
        ctx: &'a CallContext<'a>,
        operation: &'static str,
        id: Option<&'a str>,
        attributes: Option<&'a Attributes>,
    ) -> Request<'a> {
        Request {
            operation,
            resource: ctx.resource,
            resource_type: ctx.resource_type,
            environment: ctx.environment,
            profile: ctx.credentials.profile.as_deref(),
            id,
            attributes,
        }
    }
}

impl Provider for ExecProvider {
    fn name(&self) -> &str {
        "exec"
    }

    fn create(&self, ctx: &CallContext<'_>, attributes: &Attributes) -> Result<Created, ProviderError> {
        let stdout = self.invoke(ctx, &Self::request(ctx, "create", None, Some(attributes)))?;
        let response: CreateResponse = serde_json::from_str(&stdout)
            .map_err(|e| ProviderError::permanent(format!("invalid create response for {}: {e}", ctx.resource)))?;
        Ok(Created {
            id: response.id,
            outputs: response.outputs,
        })
    }

    fn update(&self, ctx: &CallContext<'_>, id: &str, attributes: &Attributes) -> Result<Outputs, ProviderError> {
        let stdout = self.invoke(ctx, &Self::request(ctx, "update", Some(id), Some(attributes)))?;
        if stdout.trim().is_empty() {
            return Ok(Outputs::new());
        }
        let response: UpdateResponse = serde_json::from_str(&stdout)
            .map_err(|e| ProviderError::permanent(format!("invalid update response for {}: {e}", ctx.resource)))?;
        Ok(response.outputs)
    }

    fn delete(&self, ctx: &CallContext<'_>, id: &str) -> Result<(), ProviderError> {
        self.invoke(ctx, &Self::request(ctx, "delete", Some(id), None))?;
        Ok(())
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = String::new();
        let _ = pipe.read_to_string(&mut buf);
        buf
    })
}

fn join(handle: thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

/// Wait for the child; `Ok(None)` means the deadline passed and it was killed
fn wait_with_deadline(child: &mut Child, deadline: Option<Instant>) -> Result<Option<ExitStatus>, ProviderError> {
    let waited = |e: std::io::Error| ProviderError::transient(format!("waiting for provider process: {e}"));

    let Some(deadline) = deadline else {
        return child.wait().map(Some).map_err(waited);
    };

    loop {
        if let Some(status) = child.try_wait().map_err(waited)? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use declarative::{CancelToken, Credentials};
    use serde_json::json;

    fn sh(script: &str) -> ExecProvider {
        ExecProvider::new("sh", vec!["-c".into(), script.into()])
    }

    fn with_ctx<T>(timeout: Option<Duration>, f: impl FnOnce(&CallContext<'_>) -> T) -> T {
        let credentials = Credentials::profile("ops");
        let cancel = CancelToken::new();
        let ctx = CallContext {
            resource: "db",
            resource_type: "database",
            environment: "prod",
            credentials: &credentials,
            deadline: timeout.map(|t| Instant::now() + t),
            timeout,
            cancel: &cancel,
        };
        f(&ctx)
    }

    #[test]
    fn test_create_parses_response() {
        let provider = sh(r#"cat > /dev/null; echo '{"id": "db-123", "outputs": {"endpoint": "db.internal"}}'"#);
        let created = with_ctx(None, |ctx| provider.create(ctx, &Attributes::new())).unwrap();
        assert_eq!(created.id, "db-123");
        assert_eq!(created.outputs["endpoint"], json!("db.internal"));
    }

    #[test]
    fn test_request_carries_context() {
        // Echo the request back as outputs
        let provider = sh(r#"printf '{"outputs": %s}' "$(cat)""#);
        let mut attributes = Attributes::new();
        attributes.insert("size".into(), json!(20));
        let outputs = with_ctx(None, |ctx| provider.update(ctx, "db-123", &attributes)).unwrap();
        assert_eq!(outputs["operation"], json!("update"));
        assert_eq!(outputs["id"], json!("db-123"));
        assert_eq!(outputs["profile"], json!("ops"));
        assert_eq!(outputs["attributes"]["size"], json!(20));
    }

    #[test]
    fn test_empty_update_response() {
        let provider = sh("cat > /dev/null");
        let outputs = with_ctx(None, |ctx| provider.update(ctx, "db-123", &Attributes::new())).unwrap();
        assert!(outputs.is_empty());
    }

    #[test]
    fn test_exit_codes_classified() {
        let transient = sh("cat > /dev/null; echo throttled >&2; exit 75");
        let err = with_ctx(None, |ctx| transient.delete(ctx, "db-123")).unwrap_err();
        assert_eq!(err, ProviderError::transient("throttled"));

        let permanent = sh("cat > /dev/null; echo 'quota exceeded' >&2; exit 1");
        let err = with_ctx(None, |ctx| permanent.delete(ctx, "db-123")).unwrap_err();
        assert_eq!(err, ProviderError::permanent("quota exceeded"));
    }

    #[test]
    fn test_deadline_kills_child() {
        let provider = sh("sleep 5");
        let started = Instant::now();
        let err = with_ctx(Some(Duration::from_millis(100)), |ctx| provider.delete(ctx, "db-123")).unwrap_err();
        assert!(matches!(err, ProviderError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_garbage_response_is_permanent() {
        let provider = sh("cat > /dev/null; echo not-json");
        let err = with_ctx(None, |ctx| provider.create(ctx, &Attributes::new())).unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_missing_program_is_permanent() {
        let provider = ExecProvider::new("/nonexistent/strata-provider", Vec::new());
        let err = with_ctx(None, |ctx| provider.delete(ctx, "db-123")).unwrap_err();
        assert!(!err.is_retryable());
    }
}
