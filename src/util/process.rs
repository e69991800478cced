//! Process execution.
//!
//! Every component that shells out does so through [`CommandRunner`].
//! [`ShellRunner`] is the real implementation and hands the command line to
//! the platform shell; tests substitute a scripted runner.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use anyhow::{bail, Context, Result};

/// Builder for subprocess execution.
#[derive(Debug, Clone)]
pub struct ProcessBuilder {
    program: PathBuf,
    args: Vec<String>,
    env: HashMap<String, String>,
    cwd: Option<PathBuf>,
}

impl ProcessBuilder {
    /// Create a new process builder for the given program.
    pub fn new(program: impl AsRef<Path>) -> Self {
        ProcessBuilder {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_string_lossy().into_owned());
        self
    }

    /// Set an environment variable.
    pub fn env(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.env
            .insert(key.as_ref().to_string(), value.as_ref().to_string());
        self
    }

    /// Set the working directory.
    pub fn cwd(mut self, cwd: impl AsRef<Path>) -> Self {
        self.cwd = Some(cwd.as_ref().to_path_buf());
        self
    }

    fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
        }
        cmd
    }

    /// Execute the command and wait for completion, capturing both streams.
    pub fn exec(&self) -> Result<Output> {
        let mut cmd = self.build_command();
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        cmd.output()
            .with_context(|| format!("failed to execute `{}`", self.display_command()))
    }

    /// Display the command for error messages.
    pub fn display_command(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Captured result of a shell command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// First line of stdout, empty when the command printed nothing.
    pub first_line: String,
    /// Every stdout line with trailing whitespace removed.
    pub lines: Vec<String>,
    /// Exit code; -1 when the process was terminated by a signal.
    pub code: i32,
}

impl CommandOutput {
    /// Build an output record from raw stdout text.
    pub fn from_stdout(stdout: &str, code: i32) -> Self {
        let lines: Vec<String> = stdout.lines().map(|l| l.trim_end().to_string()).collect();
        CommandOutput {
            first_line: lines.first().cloned().unwrap_or_default(),
            lines,
            code,
        }
    }

    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// The single seam through which the crate runs external commands.
pub trait CommandRunner: Send + Sync {
    /// Run `cmd` through the shell in `cwd` with extra environment variables.
    fn run_in(
        &self,
        cmd: &str,
        cwd: Option<&Path>,
        env: &[(String, String)],
    ) -> Result<CommandOutput>;

    /// Run `cmd` through the shell in the current directory.
    fn run(&self, cmd: &str) -> Result<CommandOutput> {
        self.run_in(cmd, None, &[])
    }

    /// Run `cmd` and fail unless it exits with status zero.
    fn run_checked(&self, cmd: &str, cwd: Option<&Path>) -> Result<CommandOutput> {
        let output = self.run_in(cmd, cwd, &[])?;
        if !output.success() {
            bail!("`{}` failed with exit code {}", cmd, output.code);
        }
        Ok(output)
    }
}

/// Runs commands through `sh -c` (or `cmd /C` on Windows).
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run_in(
        &self,
        cmd: &str,
        cwd: Option<&Path>,
        env: &[(String, String)],
    ) -> Result<CommandOutput> {
        let mut builder = if cfg!(windows) {
            ProcessBuilder::new("cmd").arg("/C").arg(cmd)
        } else {
            ProcessBuilder::new("sh").arg("-c").arg(cmd)
        };
        if let Some(cwd) = cwd {
            builder = builder.cwd(cwd);
        }
        for (key, value) in env {
            builder = builder.env(key, value);
        }

        tracing::debug!("Running `{}`", cmd);
        let output = builder.exec()?;
        let code = output.status.code().unwrap_or(-1);
        if code != 0 {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::debug!("`{}` exited with {}: {}", cmd, code, stderr.trim());
        }

        Ok(CommandOutput::from_stdout(
            &String::from_utf8_lossy(&output.stdout),
            code,
        ))
    }
}

/// Run a command through the host shell.
pub fn run_command(cmd: &str) -> Result<CommandOutput> {
    ShellRunner.run(cmd)
}

/// Quote a value for inclusion in a POSIX shell command line.
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:+,@%".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// `sudo ` when the current user is not root, empty otherwise.
pub fn sudo_prefix(runner: &dyn CommandRunner) -> &'static str {
    match runner.run("id -u") {
        Ok(out) if out.first_line.trim() == "0" => "",
        _ => {
            tracing::warn!("Current user is not root, using sudo for running command");
            "sudo "
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_run_command_echo() {
        let out = run_command("echo abc").unwrap();
        assert_eq!(out.first_line, "abc");
        assert_eq!(out.lines, vec!["abc".to_string()]);
        assert_eq!(out.code, 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_run_command_exit_code() {
        let out = run_command("printf 'one\\ntwo\\n'; exit 3").unwrap();
        assert_eq!(out.first_line, "one");
        assert_eq!(out.lines.len(), 2);
        assert_eq!(out.code, 3);
        assert!(!out.success());
    }

    #[cfg(unix)]
    #[test]
    fn test_run_in_env_and_cwd() {
        let tmp = tempfile::TempDir::new().unwrap();
        let out = ShellRunner
            .run_in(
                "echo $STATICA_TEST_VAR; pwd",
                Some(tmp.path()),
                &[("STATICA_TEST_VAR".to_string(), "hello".to_string())],
            )
            .unwrap();
        assert_eq!(out.first_line, "hello");
        let cwd = PathBuf::from(&out.lines[1]);
        assert_eq!(
            cwd.canonicalize().unwrap(),
            tmp.path().canonicalize().unwrap()
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_run_checked_fails_on_nonzero() {
        let err = ShellRunner.run_checked("exit 2", None).unwrap_err();
        assert!(err.to_string().contains("exit code 2"));
    }

    #[test]
    fn test_output_without_stdout() {
        let out = CommandOutput::from_stdout("", 0);
        assert_eq!(out.first_line, "");
        assert!(out.lines.is_empty());
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/usr/bin/gcc"), "/usr/bin/gcc");
        assert_eq!(shell_quote("it's here"), r"'it'\''s here'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_display_command() {
        let pb = ProcessBuilder::new("tar").arg("-xf").arg("php.tar.xz");
        assert_eq!(pb.display_command(), "tar -xf php.tar.xz");
    }
}
