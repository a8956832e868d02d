//! Command matrices: a line-oriented matrix format for the CLI.
//!
//! ```text
//! # login smoke test
//! service auth-db
//!
//! case login
//! ./client login --user qa
//! ? ./client warm-cache
//!
//! case logout
//! ./client logout
//! ```
//!
//! `service` lines declare resources the run holds while executing. `case`
//! opens a case; commands before the first case belong to an implicit `main`
//! case. Every other non-comment line is a shell command run inside the
//! run's working directory. A `?` prefix marks a command whose failure only
//! conditionally passes its case.

use ini::Ini;
use scriptrunner::collaborators::{
    CompileError, CompileRequest, CompiledArtifact, ScriptCompiler, ScriptContext, ScriptError,
    ScriptFuture, TestScript,
};
use scriptrunner::outcome::{Outcome, OutcomeStatus};
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Case name used for commands that precede any `case` line.
pub const IMPLICIT_CASE: &str = "main";

/// Outcome recorded for each case.
const CASE_OUTCOME: &str = "result";

/// Prefix of environment variables carrying settings to commands.
const SETTINGS_ENV_PREFIX: &str = "SCRIPTRUNNER_";

#[derive(Clone, Debug, PartialEq, Eq)]
struct Step {
    command: String,
    tolerated: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Case {
    name: String,
    steps: Vec<Step>,
}

/// Parsed command matrix.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandMatrix {
    services: Vec<String>,
    cases: Vec<Case>,
}

impl CommandMatrix {
    /// Parses matrix text. `cancel` is checked between lines.
    pub fn parse(
        source: &str,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<Self, CompileError> {
        let mut matrix = CommandMatrix::default();

        for (index, raw) in source.lines().enumerate() {
            if cancel.is_cancelled() {
                return Err(CompileError::Canceled);
            }
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (keyword, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
            let rest = rest.trim();
            match keyword {
                "service" | "case" if rest.is_empty() => {
                    return Err(CompileError::matrix(
                        path,
                        format!("line {}: '{}' needs a name", index + 1, keyword),
                    ));
                }
                "service" => {
                    if !matrix.services.iter().any(|s| s == rest) {
                        matrix.services.push(rest.to_string());
                    }
                }
                "case" => {
                    if matrix.cases.iter().any(|c| c.name == rest) {
                        return Err(CompileError::matrix(
                            path,
                            format!("line {}: duplicate case '{}'", index + 1, rest),
                        ));
                    }
                    matrix.cases.push(Case {
                        name: rest.to_string(),
                        steps: Vec::new(),
                    });
                }
                _ => {
                    let step = match line.strip_prefix('?') {
                        Some(command) => Step {
                            command: command.trim().to_string(),
                            tolerated: true,
                        },
                        None => Step {
                            command: line.to_string(),
                            tolerated: false,
                        },
                    };
                    if matrix.cases.is_empty() {
                        matrix.cases.push(Case {
                            name: IMPLICIT_CASE.to_string(),
                            steps: Vec::new(),
                        });
                    }
                    if let Some(case) = matrix.cases.last_mut() {
                        case.steps.push(step);
                    }
                }
            }
        }

        if let Some(empty) = matrix.cases.iter().find(|c| c.steps.is_empty()) {
            return Err(CompileError::matrix(
                path,
                format!("case '{}' has no commands", empty.name),
            ));
        }
        if matrix.cases.is_empty() {
            return Err(CompileError::matrix(path, "no commands"));
        }
        Ok(matrix)
    }

    pub fn services(&self) -> &[String] {
        &self.services
    }

    pub fn case_names(&self) -> Vec<&str> {
        self.cases.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Flattens an INI settings file into `section.key` entries. Keys outside
/// any section keep their bare name.
fn load_settings(path: &Path) -> Result<BTreeMap<String, String>, CompileError> {
    let ini = Ini::load_from_file(path).map_err(|e| CompileError::Other {
        message: format!("cannot read settings {}", path.display()),
        source: Some(Box::new(e)),
    })?;

    let mut settings = BTreeMap::new();
    for (section, properties) in ini.iter() {
        for (key, value) in properties.iter() {
            let name = match section {
                Some(section) => format!("{}.{}", section, key),
                None => key.to_string(),
            };
            settings.insert(name, value.to_string());
        }
    }
    Ok(settings)
}

/// [`ScriptCompiler`] for command matrices.
#[derive(Debug, Default)]
pub struct CommandMatrixCompiler;

impl CommandMatrixCompiler {
    pub fn new() -> Self {
        Self
    }
}

impl ScriptCompiler for CommandMatrixCompiler {
    fn compile(
        &self,
        request: &CompileRequest,
        cancel: &CancellationToken,
    ) -> Result<CompiledArtifact, CompileError> {
        let source = std::fs::read_to_string(&request.matrix_file)?;
        let matrix = CommandMatrix::parse(&source, &request.matrix_file, cancel)?;
        let settings = match &request.settings_file {
            Some(path) => load_settings(path)?,
            None => BTreeMap::new(),
        };

        debug!(
            run_id = %request.run_id,
            cases = matrix.cases.len(),
            services = ?matrix.services,
            "Command matrix compiled"
        );

        let services = matrix.services.clone();
        let script = CommandScript {
            matrix,
            static_variables: request.params.static_variables.clone(),
        };
        Ok(
            CompiledArtifact::new(request.params.matrix_name(), std::sync::Arc::new(script))
                .with_services(services)
                .with_settings(settings),
        )
    }
}

/// Runs the commands of a [`CommandMatrix`] case by case.
struct CommandScript {
    matrix: CommandMatrix,
    static_variables: BTreeMap<String, String>,
}

fn env_name(key: &str) -> String {
    let mut name = String::from(SETTINGS_ENV_PREFIX);
    name.extend(key.chars().map(|c| {
        if c.is_ascii_alphanumeric() {
            c.to_ascii_uppercase()
        } else {
            '_'
        }
    }));
    name
}

impl CommandScript {
    async fn run_step(&self, ctx: &ScriptContext, step: &Step) -> Result<bool, ScriptError> {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&step.command)
            .current_dir(ctx.work_folder())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        for (key, value) in ctx.settings().iter().chain(self.static_variables.iter()) {
            command.env(env_name(key), value);
        }

        let mut child = command
            .spawn()
            .map_err(|e| ScriptError::with_source(format!("cannot start `{}`", step.command), e))?;

        tokio::select! {
            status = child.wait() => {
                let status = status.map_err(|e| {
                    ScriptError::with_source(format!("lost `{}`", step.command), e)
                })?;
                debug!(run_id = %ctx.run_id(), command = %step.command, %status, "Command exited");
                Ok(status.success())
            }
            _ = ctx.cancellation().cancelled() => {
                if let Err(e) = child.kill().await {
                    warn!(run_id = %ctx.run_id(), error = %e, "Failed to kill command");
                }
                Err(ScriptError::Canceled)
            }
        }
    }

    async fn run_case(&self, ctx: &mut ScriptContext, case: &Case) -> Result<(), ScriptError> {
        let mut status = OutcomeStatus::Passed;
        for step in &case.steps {
            ctx.checkpoint(&format!("{}: {}", case.name, step.command))
                .await?;
            if self.run_step(ctx, step).await? {
                continue;
            }
            if step.tolerated {
                status = OutcomeStatus::ConditionallyPassed;
            } else {
                status = OutcomeStatus::Failed;
                break;
            }
        }

        let outcomes = ctx.outcomes_mut();
        outcomes.store_outcome(Outcome::new(&case.name, CASE_OUTCOME, status));
        outcomes.on_outcome_complete(&case.name, CASE_OUTCOME);
        outcomes.on_group_complete(&case.name)?;
        Ok(())
    }

    async fn execute(&self, ctx: &mut ScriptContext) -> Result<(), ScriptError> {
        let total = self.matrix.cases.len();
        let mut failed = Vec::new();

        for (index, case) in self.matrix.cases.iter().enumerate() {
            if !ctx.range().contains(index as u32 + 1) {
                debug!(run_id = %ctx.run_id(), case = %case.name, "Case outside range");
                continue;
            }
            match self.run_case(ctx, case).await {
                Ok(()) => info!(run_id = %ctx.run_id(), case = %case.name, "Case passed"),
                Err(ScriptError::Outcome(e)) if ctx.continue_on_failure() => {
                    warn!(run_id = %ctx.run_id(), case = %case.name, error = %e, "Case failed");
                    failed.push(case.name.clone());
                }
                Err(e) => return Err(e),
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(ScriptError::failed(format!(
                "{} of {} cases failed: {}",
                failed.len(),
                total,
                failed.join(", ")
            )))
        }
    }
}

impl TestScript for CommandScript {
    fn run<'a>(&'a self, ctx: &'a mut ScriptContext) -> ScriptFuture<'a> {
        Box::pin(self.execute(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptrunner::debug::DebugController;
    use scriptrunner::run::{CaseRange, RunId};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn parse(source: &str) -> Result<CommandMatrix, CompileError> {
        CommandMatrix::parse(source, Path::new("t.matrix"), &CancellationToken::new())
    }

    fn context(dir: &TempDir) -> ScriptContext {
        ScriptContext::new(
            RunId::new(1),
            dir.path(),
            Arc::new(DebugController::new()),
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_parse_cases_and_services() {
        let matrix = parse(
            "# smoke\nservice db\nservice db\necho setup\ncase login\n? true\ntrue\n",
        )
        .unwrap();
        assert_eq!(matrix.services().to_vec(), vec!["db".to_string()]);
        assert_eq!(matrix.case_names(), vec![IMPLICIT_CASE, "login"]);
        assert!(matrix.cases[1].steps[0].tolerated);
        assert_eq!(matrix.cases[1].steps[0].command, "true");
    }

    #[test]
    fn test_parse_rejects_bad_matrices() {
        assert!(matches!(parse(""), Err(CompileError::Matrix { .. })));
        assert!(matches!(parse("case a\n"), Err(CompileError::Matrix { .. })));
        assert!(matches!(parse("service\n"), Err(CompileError::Matrix { .. })));
        assert!(matches!(
            parse("case a\ntrue\ncase a\ntrue\n"),
            Err(CompileError::Matrix { .. })
        ));
    }

    #[test]
    fn test_parse_stops_when_canceled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = CommandMatrix::parse("true\n", Path::new("t.matrix"), &cancel);
        assert!(matches!(result, Err(CompileError::Canceled)));
    }

    #[test]
    fn test_env_name() {
        assert_eq!(env_name("db.host"), "SCRIPTRUNNER_DB_HOST");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_script_records_case_verdicts() {
        let dir = TempDir::new().unwrap();
        let script = CommandScript {
            matrix: parse("case ok\ntrue\ncase soft\n? false\ntrue\n").unwrap(),
            static_variables: BTreeMap::new(),
        };
        let mut ctx = context(&dir);

        script.run(&mut ctx).await.unwrap();
        assert_eq!(
            ctx.outcomes().group_status("ok").unwrap(),
            OutcomeStatus::Passed
        );
        assert_eq!(
            ctx.outcomes().group_status("soft").unwrap(),
            OutcomeStatus::ConditionallyPassed
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_case_stops_the_run() {
        let dir = TempDir::new().unwrap();
        let script = CommandScript {
            matrix: parse("case bad\nfalse\ncase never\ntouch marker\n").unwrap(),
            static_variables: BTreeMap::new(),
        };
        let mut ctx = context(&dir);

        let err = script.run(&mut ctx).await.unwrap_err();
        assert!(matches!(err, ScriptError::Outcome(_)));
        assert!(!dir.path().join("marker").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_continue_on_failure_and_range() {
        let dir = TempDir::new().unwrap();
        let script = CommandScript {
            matrix: parse("case bad\nfalse\ncase good\ntouch good\ncase skipped\ntouch skipped\n")
                .unwrap(),
            static_variables: BTreeMap::new(),
        };
        let mut ctx = context(&dir)
            .with_continue_on_failure(true)
            .with_range("1-2".parse::<CaseRange>().unwrap());

        let err = script.run(&mut ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "1 of 3 cases failed: bad");
        assert!(dir.path().join("good").exists());
        assert!(!dir.path().join("skipped").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_commands_see_settings() {
        let dir = TempDir::new().unwrap();
        let script = CommandScript {
            matrix: parse("test \"$SCRIPTRUNNER_DB_HOST\" = qa-db\n").unwrap(),
            static_variables: BTreeMap::new(),
        };
        let mut settings = BTreeMap::new();
        settings.insert("db.host".to_string(), "qa-db".to_string());
        let mut ctx = context(&dir).with_settings(settings);

        script.run(&mut ctx).await.unwrap();
    }

    #[test]
    fn test_compiler_builds_artifact() {
        let dir = TempDir::new().unwrap();
        let matrix_file = dir.path().join("login.matrix");
        let settings_file = dir.path().join("qa.ini");
        std::fs::write(&matrix_file, "service auth\ncase login\ntrue\n").unwrap();
        std::fs::write(&settings_file, "[db]\nhost = qa-db\n").unwrap();

        let request = CompileRequest {
            run_id: RunId::new(3),
            matrix_file,
            settings_file: Some(settings_file),
            work_folder: dir.path().to_path_buf(),
            params: scriptrunner::run::RunParams::builder("login.matrix").build(),
        };
        let artifact = CommandMatrixCompiler::new()
            .compile(&request, &CancellationToken::new())
            .unwrap();

        assert_eq!(artifact.script_name(), "login");
        assert!(artifact.services().contains("auth"));
        assert_eq!(
            artifact.settings().get("db.host").map(String::as_str),
            Some("qa-db")
        );
    }
}
