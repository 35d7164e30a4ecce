//! dbt transform runner

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::OnceLock;

use regex::Regex;

use crate::domain::result::{Error, Result};
use crate::ports::{TransformOutcome, TransformRunner};

/// Runs `dbt run --select tag:...` in a project directory
pub struct DbtRunner {
    program: String,
    project_dir: PathBuf,
    install_deps: bool,
    env: Vec<(String, String)>,
}

impl DbtRunner {
    pub fn new(program: impl Into<String>, project_dir: &Path, install_deps: bool) -> Self {
        Self {
            program: program.into(),
            project_dir: project_dir.to_path_buf(),
            install_deps,
            env: Vec::new(),
        }
    }

    /// Extra environment passed to every dbt invocation
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    fn invoke(&self, args: &[String]) -> Result<Output> {
        tracing::debug!(program = %self.program, ?args, dir = %self.project_dir.display(), "invoking dbt");
        let mut cmd = Command::new(&self.program);
        cmd.args(args).current_dir(&self.project_dir);
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        let output = cmd.output().map_err(|e| {
            Error::transform(
                format!("failed to start '{}': {}", self.program, e),
                String::new(),
            )
        })?;

        if !output.status.success() {
            let captured = combined_output(&output);
            return Err(Error::transform(
                format!("dbt {} exited with {}", args.join(" "), output.status),
                captured,
            ));
        }
        Ok(output)
    }
}

impl TransformRunner for DbtRunner {
    fn run(&self, tags: &BTreeSet<String>) -> Result<TransformOutcome> {
        if tags.is_empty() {
            return Ok(TransformOutcome::default());
        }
        if self.install_deps {
            self.invoke(&["deps".to_string()])?;
        }

        let args = run_args(tags);
        let output = self.invoke(&args)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let models_built = parse_models_built(&stdout);
        tracing::info!(?tags, models_built, "dbt run completed");
        Ok(TransformOutcome { models_built })
    }
}

/// `run --select tag:a tag:b` (dbt treats space-separated selectors as a union)
fn run_args(tags: &BTreeSet<String>) -> Vec<String> {
    let mut args = vec!["run".to_string(), "--select".to_string()];
    args.extend(tags.iter().map(|t| format!("tag:{}", t)));
    args
}

fn combined_output(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    match (stdout.trim().is_empty(), stderr.trim().is_empty()) {
        (true, _) => stderr.into_owned(),
        (false, true) => stdout.into_owned(),
        (false, false) => format!("{}\n{}", stderr, stdout),
    }
}

/// Models built, from dbt's `Done. PASS=N ...` summary or its `OK created` lines
pub fn parse_models_built(stdout: &str) -> usize {
    static SUMMARY: OnceLock<Option<Regex>> = OnceLock::new();
    let summary = SUMMARY.get_or_init(|| Regex::new(r"Done\. PASS=(\d+)").ok());

    if let Some(re) = summary {
        if let Some(n) = re
            .captures_iter(stdout)
            .last()
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
        {
            return n;
        }
    }
    stdout.lines().filter(|l| l.contains("OK created")).count()
}
