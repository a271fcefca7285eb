// SPDX-License-Identifier: MPL-2.0

//! The seam between this tool and the programs it drives.

use std::{
    fmt,
    io::{self, Write as _},
    path::Path,
    process::{Command, Stdio},
};

/// One run of an external program.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Invocation {
    pub program: &'static str,
    pub args: Vec<String>,
    pub env: Vec<(&'static str, &'static str)>,
    pub stdin: Option<String>,
}

impl Invocation {
    pub fn new(program: &'static str) -> Self {
        Self {
            program,
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: &'static str, value: &'static str) -> Self {
        self.env.push((key, value));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }

        Ok(())
    }
}

/// What an external program left behind.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Output {
    pub success: bool,
    /// A human-readable exit status.
    pub status: String,
    pub stdout: String,
    pub stderr: String,
}

impl Output {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            status: "exit status: 0".into(),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}

/// Runs programs and answers questions about the machine.
pub trait Host {
    /// Runs `invocation` to completion. Only failing to start the program is an error here; the
    /// exit status is reported in [`Output`].
    fn run(&mut self, invocation: &Invocation) -> io::Result<Output>;

    fn is_block_device(&self, path: &Path) -> bool;
}

/// The real machine.
#[derive(Debug, Default)]
pub struct System;

impl Host for System {
    fn run(&mut self, invocation: &Invocation) -> io::Result<Output> {
        tracing::debug!("running `{}`", invocation);

        let mut child = Command::new(invocation.program)
            .args(&invocation.args)
            .envs(invocation.env.iter().copied())
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let (Some(input), Some(mut pipe)) = (&invocation.stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes())?;
            // Dropping the pipe closes it, so the child sees end-of-file.
        }

        let output = child.wait_with_output()?;

        Ok(Output {
            success: output.status.success(),
            status: output.status.to_string(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    #[cfg(unix)]
    fn is_block_device(&self, path: &Path) -> bool {
        use std::os::unix::fs::FileTypeExt as _;

        std::fs::metadata(path)
            .map(|it| it.file_type().is_block_device())
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    fn is_block_device(&self, _: &Path) -> bool {
        false
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::path::PathBuf;

    use super::*;

    /// A host that records invocations and answers them from a script.
    pub(crate) struct Scripted {
        pub block_devices: Vec<PathBuf>,
        pub calls: Vec<Invocation>,
        respond: Box<dyn FnMut(&Invocation) -> Output>,
    }

    impl Scripted {
        pub fn new(respond: impl FnMut(&Invocation) -> Output + 'static) -> Self {
            Self {
                block_devices: Vec::new(),
                calls: Vec::new(),
                respond: Box::new(respond),
            }
        }

        /// The calls made, rendered as command lines.
        pub fn command_lines(&self) -> Vec<String> {
            self.calls.iter().map(ToString::to_string).collect()
        }
    }

    impl Host for Scripted {
        fn run(&mut self, invocation: &Invocation) -> io::Result<Output> {
            self.calls.push(invocation.clone());
            Ok((self.respond)(invocation))
        }

        fn is_block_device(&self, path: &Path) -> bool {
            self.block_devices.iter().any(|it| it == path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_as_command_line() {
        let inv = Invocation::new("losetup")
            .args(["--find", "--show"])
            .arg("/tmp/card.sparse");
        assert_eq!(inv.to_string(), "losetup --find --show /tmp/card.sparse");
    }

    #[cfg(unix)]
    #[test]
    fn system_feeds_stdin_and_captures_output() {
        let out = System.run(&Invocation::new("cat").stdin("0 8 linear /dev/loop0 0")).unwrap();
        assert!(out.success);
        assert_eq!(out.stdout, "0 8 linear /dev/loop0 0");
    }

    #[cfg(unix)]
    #[test]
    fn regular_files_are_not_block_devices() {
        assert!(!System.is_block_device(Path::new("/")));
        assert!(!System.is_block_device(Path::new("/definitely/not/here")));
    }
}
