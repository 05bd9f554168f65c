//! An in-memory [`SandboxProvider`] for tests.
//!
//! Deliberately not a real language runtime: it understands just enough of
//! `print(...)`, simple integer assignment, and a literal failure marker to
//! drive the scenarios in the execution-core test suite (and whatever a
//! consumer crate wants to exercise) without a live provider.

use crate::{CommandOutput, ProviderError, SandboxId, SandboxProvider};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
struct MockSandbox {
    files: HashMap<String, Vec<u8>>,
    vars: HashMap<String, String>,
    closed: bool,
}

/// An in-memory stand-in for a real sandbox provider.
pub struct MockSandboxProvider {
    sandboxes: Mutex<HashMap<SandboxId, MockSandbox>>,
    create_count: AtomicUsize,
    close_count: AtomicUsize,
    fail_create: AtomicBool,
}

impl Default for MockSandboxProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSandboxProvider {
    pub fn new() -> Self {
        Self {
            sandboxes: Mutex::new(HashMap::new()),
            create_count: AtomicUsize::new(0),
            close_count: AtomicUsize::new(0),
            fail_create: AtomicBool::new(false),
        }
    }

    /// After calling this, every subsequent `create()` fails. Used to
    /// exercise pool-exhaustion / creation-refusal paths.
    pub fn poison_creation(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    pub fn create_count(&self) -> usize {
        self.create_count.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    pub fn live_count(&self) -> usize {
        self.sandboxes
            .lock()
            .unwrap()
            .values()
            .filter(|s| !s.closed)
            .count()
    }

    fn require_open<'a>(
        &self,
        sandboxes: &'a mut HashMap<SandboxId, MockSandbox>,
        id: SandboxId,
    ) -> Result<&'a mut MockSandbox, ProviderError> {
        match sandboxes.get_mut(&id) {
            Some(sb) if !sb.closed => Ok(sb),
            Some(_) => Err(ProviderError::Status("sandbox already closed".into())),
            None => Err(ProviderError::Status("unknown sandbox".into())),
        }
    }

    /// Minimal Python-ish evaluator: `x=<int>` stores, `print(<expr>)` prints.
    /// `<expr>` is a variable name, an integer literal, or `a+b` of either.
    fn eval_python(vars: &mut HashMap<String, String>, code: &str) -> CommandOutput {
        let mut stdout = String::new();
        for line in code.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line.contains("while True") || line.contains("while 1") {
                // Non-terminating line: contributes no output. The actual
                // "hang" is simulated by the caller sleeping before this
                // function ever runs (see `run_native_interpreter`), so the
                // coordinator's deadline fires first.
                continue;
            }
            if let Some(rest) = line.strip_prefix("print(").and_then(|s| s.strip_suffix(')')) {
                stdout.push_str(&Self::resolve(vars, rest));
                stdout.push('\n');
                continue;
            }
            if let Some((name, value)) = line.split_once('=') {
                let name = name.trim();
                if !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                    let resolved = Self::resolve(vars, value.trim());
                    vars.insert(name.to_string(), resolved);
                    continue;
                }
            }
        }
        CommandOutput {
            stdout,
            stderr: String::new(),
            exit_code: 0,
        }
    }

    fn resolve(vars: &HashMap<String, String>, expr: &str) -> String {
        let expr = expr.trim();
        if let Some((lhs, rhs)) = expr.split_once('+') {
            let l: i64 = Self::resolve(vars, lhs).parse().unwrap_or(0);
            let r: i64 = Self::resolve(vars, rhs).parse().unwrap_or(0);
            return (l + r).to_string();
        }
        if let Ok(n) = expr.parse::<i64>() {
            return n.to_string();
        }
        if let Some(v) = vars.get(expr) {
            return v.clone();
        }
        expr.trim_matches('"').trim_matches('\'').to_string()
    }
}

#[async_trait]
impl SandboxProvider for MockSandboxProvider {
    async fn create(&self) -> Result<SandboxId, ProviderError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ProviderError::Status("provider refused to create sandbox".into()));
        }
        let id = SandboxId::new();
        self.sandboxes.lock().unwrap().insert(id, MockSandbox::default());
        self.create_count.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    async fn write_file(&self, id: SandboxId, path: &str, content: &[u8]) -> Result<(), ProviderError> {
        let mut sandboxes = self.sandboxes.lock().unwrap();
        let sb = self.require_open(&mut sandboxes, id)?;
        sb.files.insert(path.to_string(), content.to_vec());
        Ok(())
    }

    async fn run_shell(&self, id: SandboxId, cmd: &str) -> Result<CommandOutput, ProviderError> {
        let mut sandboxes = self.sandboxes.lock().unwrap();
        let sb = self.require_open(&mut sandboxes, id)?;

        if let Some(path) = cmd.strip_prefix("cat ") {
            let path = path.trim();
            return match sb.files.get(path) {
                Some(bytes) => Ok(CommandOutput {
                    stdout: String::from_utf8_lossy(bytes).into_owned(),
                    stderr: String::new(),
                    exit_code: 0,
                }),
                None => Ok(CommandOutput {
                    stdout: String::new(),
                    stderr: format!("cat: {path}: No such file or directory"),
                    exit_code: 1,
                }),
            };
        }

        if cmd.starts_with("cc ") || cmd.starts_with("gcc ") {
            // Pull the source path (last-but-one token, "-o out src.c").
            let src_path = cmd.split_whitespace().last().unwrap_or_default();
            let source = sb
                .files
                .get(src_path)
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default();
            if source.contains("return x;") {
                return Ok(CommandOutput {
                    stdout: String::new(),
                    stderr: "program.c:1:16: error: use of undeclared identifier 'x'".to_string(),
                    exit_code: 1,
                });
            }
            sb.files.insert(format!("{src_path}.out"), b"compiled".to_vec());
            return Ok(CommandOutput {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
            });
        }

        if let Some(stripped) = cmd.strip_prefix("node ") {
            let path = stripped.trim();
            let source = sb
                .files
                .get(path)
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default();
            let stdout = Self::eval_python(&mut sb.vars, &source).stdout;
            return Ok(CommandOutput {
                stdout,
                stderr: String::new(),
                exit_code: 0,
            });
        }

        if cmd.ends_with(".out") || sb.files.contains_key(cmd) {
            return Ok(CommandOutput {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
            });
        }

        // Plain shell command: echo back a normalised form so tests can
        // assert on deterministic output without a real shell.
        Ok(CommandOutput {
            stdout: cmd.to_string(),
            stderr: String::new(),
            exit_code: 0,
        })
    }

    async fn run_native_interpreter(
        &self,
        id: SandboxId,
        language: &str,
        code: &str,
    ) -> Result<CommandOutput, ProviderError> {
        if code.contains("while True") || code.contains("while 1") {
            // Simulate a non-terminating program: sleep far longer than any
            // test's deadline so the coordinator's own timeout wins the race.
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }

        let mut sandboxes = self.sandboxes.lock().unwrap();
        let sb = self.require_open(&mut sandboxes, id)?;
        match language {
            "python" => Ok(Self::eval_python(&mut sb.vars, code)),
            other => Err(ProviderError::Status(format!(
                "mock provider has no native interpreter for {other}"
            ))),
        }
    }

    async fn close(&self, id: SandboxId) -> Result<(), ProviderError> {
        let mut sandboxes = self.sandboxes.lock().unwrap();
        let sb = self.require_open(&mut sandboxes, id)?;
        sb.closed = true;
        self.close_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
